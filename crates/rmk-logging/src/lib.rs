use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Environment variable consulted after `RUST_LOG` for the filter directive.
pub const LOG_ENV_VAR: &str = "RMK_LOG";

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeLogRecord {
    pub ts: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<JsonValue>,
}

type LogHook = Arc<dyn Fn(&RuntimeLogRecord) + Send + Sync>;

static LOG_HOOK: OnceCell<LogHook> = OnceCell::new();

pub struct LoggingGuard {
    _guard: Option<DefaultGuard>,
}

#[derive(Clone, Debug)]
pub struct LoggingOptions {
    /// Emit newline-delimited JSON instead of the human-readable format.
    pub json: bool,
    /// Write formatted events to stderr. Hooks still fire when this is off.
    pub stderr: bool,
    /// Directive used when neither `RUST_LOG` nor `RMK_LOG` is set.
    pub default_filter: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            json: false,
            stderr: true,
            default_filter: "info".to_string(),
        }
    }
}

pub fn set_runtime_log_hook<F>(hook: F)
where
    F: Fn(&RuntimeLogRecord) + Send + Sync + 'static,
{
    let _ = LOG_HOOK.set(Arc::new(hook));
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV_VAR))
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(opts: LoggingOptions) -> LoggingGuard {
    // Route log:: macros from the accelerate crates into tracing
    let _ = LogTracer::init();

    let build_subscriber = || {
        let plain = (opts.stderr && !opts.json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
        });
        let json = (opts.stderr && opts.json).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        });
        tracing_subscriber::registry()
            .with(env_filter(&opts.default_filter))
            .with(LogBridgeLayer)
            .with(plain)
            .with(json)
    };

    let guard = match tracing::subscriber::set_global_default(build_subscriber()) {
        Ok(()) => None,
        Err(_) => Some(tracing::subscriber::set_default(build_subscriber())),
    };

    LoggingGuard { _guard: guard }
}

static PROCESS_LOGGING: OnceCell<LoggingGuard> = OnceCell::new();

/// [`init_logging`] for hosts that cannot hold a guard, such as an extension
/// module. The guard lives for the rest of the process. Returns `false` when
/// logging was already set up through this function.
pub fn init_logging_once(opts: LoggingOptions) -> bool {
    let mut installed = false;
    PROCESS_LOGGING.get_or_init(|| {
        installed = true;
        init_logging(opts)
    });
    installed
}

struct LogBridgeLayer;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl<S> Layer<S> for LogBridgeLayer
where
    S: Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let hook = match LOG_HOOK.get() {
            Some(h) => h,
            None => return,
        };
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        // tracing-log puts the originating module in `log.target`
        let target = visitor
            .log_target
            .take()
            .unwrap_or_else(|| event.metadata().target().to_string());

        let record = RuntimeLogRecord {
            ts: now_rfc3339(),
            level: event.metadata().level().to_string(),
            target,
            message: visitor
                .message
                .unwrap_or_else(|| event.metadata().name().to_string()),
            span_id: tracing::Span::current()
                .id()
                .map(|id| id.into_u64().to_string()),
            fields: visitor
                .fields
                .filter(|obj| obj.as_object().map(|m| !m.is_empty()).unwrap_or(false)),
        };
        hook(&record);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    log_target: Option<String>,
    fields: Option<JsonValue>,
}

impl JsonVisitor {
    fn insert(&mut self, name: &str, value: JsonValue) {
        if name.starts_with("log.") {
            if name == "log.target" {
                self.log_target = value.as_str().map(str::to_string);
            }
            return;
        }
        let obj = self
            .fields
            .get_or_insert_with(|| JsonValue::Object(Default::default()));
        if let JsonValue::Object(map) = obj {
            map.insert(name.to_string(), value);
        }
    }
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field.name(), JsonValue::String(rendered));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field.name(), JsonValue::String(value.to_string()));
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field.name(), JsonValue::from(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field.name(), JsonValue::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field.name(), JsonValue::Bool(value));
    }
}
