//! rmk - square and cube a vector of numbers on the GPU
//!
//! Runs the elementwise kernels through whichever provider is available
//! (WGPU on Metal/Vulkan/DX12, or the in-process host fallback) and prints
//! the results.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};
use rmk_accelerate::{AccelPowerPreference, AccelerateInitOptions, AccelerateProviderPreference};
use std::path::PathBuf;

mod config;
mod output;

use config::{ConfigLoader, LogLevel, RmkConfig};

#[derive(Parser)]
#[command(
    name = "rmk",
    version = env!("CARGO_PKG_VERSION"),
    about = "Square and cube numbers with a GPU compute kernel",
    after_help = r#"
Environment Variables:
  RMK_CONFIG=<path>            Path to configuration file
  RMK_ACCEL_ENABLED=0          Disable the GPU provider
  RMK_ACCEL_PROVIDER=inprocess Provider preference (auto, wgpu, inprocess)
  RMK_ACCEL_FALLBACK=0         Do not fall back to the in-process provider
  RMK_WGPU_POWER=low-power     Adapter power preference
  RMK_WGPU_FORCE_FALLBACK=1    Use the software fallback adapter
  RMK_WGPU_FORCE_PRECISION=f64 Device precision when the adapter supports it
  RMK_LOG_LEVEL=debug          Log level (error, warn, info, debug, trace)
  RMK_LOG / RUST_LOG           tracing filter directives (override the log level)
"#
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, env = "RMK_VERBOSE", value_parser = parse_bool_env)]
    verbose: bool,

    /// Configuration file path
    #[arg(long, global = true, env = "RMK_CONFIG")]
    config: Option<PathBuf>,

    /// Acceleration provider
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderArg>,

    /// Adapter power preference
    #[arg(long, global = true, value_enum)]
    power: Option<PowerArg>,

    /// Use the software fallback adapter
    #[arg(long, global = true)]
    force_fallback_adapter: bool,

    /// Fail instead of falling back to the in-process provider
    #[arg(long, global = true)]
    no_fallback: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Square and cube the input and print both results (default)
    Run {
        /// Comma-separated input values
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        input: Option<Vec<f64>>,
    },
    /// Show acceleration provider information
    Info {
        /// Output provider information and telemetry as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        config_command: ConfigCommand,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Print a sample configuration, or write it to a file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Config file to validate
        config_file: PathBuf,
    },
    /// Show configuration file locations
    Paths,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProviderArg {
    Auto,
    Wgpu,
    Inprocess,
}

impl From<ProviderArg> for AccelerateProviderPreference {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Auto => AccelerateProviderPreference::Auto,
            ProviderArg::Wgpu => AccelerateProviderPreference::Wgpu,
            ProviderArg::Inprocess => AccelerateProviderPreference::InProcess,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PowerArg {
    Auto,
    HighPerformance,
    LowPower,
}

impl From<PowerArg> for AccelPowerPreference {
    fn from(arg: PowerArg) -> Self {
        match arg {
            PowerArg::Auto => AccelPowerPreference::Auto,
            PowerArg::HighPerformance => AccelPowerPreference::HighPerformance,
            PowerArg::LowPower => AccelPowerPreference::LowPower,
        }
    }
}

/// Custom parser for boolean environment variables that accepts both "1"/"0" and "true"/"false"
fn parse_bool_env(s: &str) -> Result<bool, String> {
    config::parse_bool(s).ok_or_else(|| {
        format!("Invalid boolean value '{s}'. Expected: 1/0, true/false, yes/no, on/off")
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load_with(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.logging.level
    };
    let _logging = rmk_logging::init_logging(rmk_logging::LoggingOptions {
        json: config.logging.json,
        stderr: true,
        default_filter: level.as_str().to_string(),
    });
    debug!("Configuration loaded: {config:?}");

    match cli.command.clone() {
        Some(Commands::Config { config_command }) => {
            execute_config_command(config_command, &config)
        }
        Some(Commands::Info { json }) => {
            initialize_provider(&config);
            show_accel_info(json)
        }
        Some(Commands::Run { input }) => {
            initialize_provider(&config);
            execute_run(input.unwrap_or_else(|| config.smoke.input.clone()))
        }
        None => {
            initialize_provider(&config);
            execute_run(config.smoke.input.clone())
        }
    }
}

fn apply_cli_overrides(config: &mut RmkConfig, cli: &Cli) {
    if let Some(provider) = cli.provider {
        config.accelerate.provider = provider.into();
    }
    if let Some(power) = cli.power {
        config.accelerate.wgpu_power_preference = power.into();
    }
    if cli.force_fallback_adapter {
        config.accelerate.wgpu_force_fallback_adapter = true;
    }
    if cli.no_fallback {
        config.accelerate.allow_inprocess_fallback = false;
    }
}

fn initialize_provider(config: &RmkConfig) {
    let options: AccelerateInitOptions = (&config.accelerate).into();
    rmk_accelerate::initialize_acceleration_provider_with(&options);
}

fn execute_run(input: Vec<f64>) -> Result<()> {
    if rmk_accelerate_api::provider().is_none() {
        bail!("no acceleration provider registered (enable acceleration or allow the in-process fallback)");
    }
    info!("running square/cube on {} values", input.len());

    let squared = rmk_accelerate::square_numbers(&input).context("square kernel failed")?;
    let cubed = rmk_accelerate::cube_numbers(&input).context("cube kernel failed")?;

    println!("Squared Output: {}", output::float_list(&squared));
    println!("Cubed Output: {}", output::float_list(&cubed));
    Ok(())
}

fn show_accel_info(json: bool) -> Result<()> {
    let Some(p) = rmk_accelerate_api::provider() else {
        if json {
            let payload = serde_json::json!({
                "device": serde_json::Value::Null,
                "precision": serde_json::Value::Null,
                "error": "no acceleration provider registered",
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!("Acceleration Provider Info");
            println!("==========================");
            println!("No acceleration provider registered");
        }
        return Ok(());
    };

    let info = p.device_info_struct();
    let telemetry = p.telemetry_snapshot();
    if json {
        let payload = serde_json::json!({
            "device": info,
            "precision": p.precision().as_str(),
            "warmup_ms": p.last_warmup_millis(),
            "telemetry": telemetry,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Acceleration Provider Info");
        println!("==========================");
        println!(
            "Device: {} ({})",
            info.name,
            info.backend.as_deref().unwrap_or("unknown")
        );
        println!("Vendor: {}", info.vendor);
        println!("Description: {}", p.device_info());
        println!("Precision: {}", p.precision().as_str());
        if let Some(bytes) = info.memory_bytes {
            println!("Memory: {bytes} bytes");
        }
        if let Some(ms) = p.last_warmup_millis() {
            println!("Warmup: last duration ~{ms} ms");
        }
        let to_ms = |ns: u64| ns as f64 / 1_000_000.0;
        println!("Telemetry:");
        println!(
            "  uploads: {} bytes, downloads: {} bytes",
            telemetry.upload_bytes, telemetry.download_bytes
        );
        println!(
            "  unary_power: count={} wall_ms={:.3}",
            telemetry.unary_power.count,
            to_ms(telemetry.unary_power.total_wall_time_ns)
        );
    }
    Ok(())
}

fn execute_config_command(config_command: ConfigCommand, config: &RmkConfig) -> Result<()> {
    match config_command {
        ConfigCommand::Show => {
            let yaml =
                serde_yaml::to_string(config).context("Failed to serialize configuration")?;
            println!("{yaml}");
        }
        ConfigCommand::Generate { output: None } => {
            println!("{}", ConfigLoader::generate_sample_config());
        }
        ConfigCommand::Generate {
            output: Some(output),
        } => {
            ConfigLoader::save_to_file(&RmkConfig::default(), &output)
                .with_context(|| format!("Failed to write config to {}", output.display()))?;
            println!("Sample configuration generated: {}", output.display());
        }
        ConfigCommand::Validate { config_file } => {
            ConfigLoader::load_from_file(&config_file)?;
            println!("Configuration file is valid: {}", config_file.display());
        }
        ConfigCommand::Paths => {
            println!("rmk configuration file locations (first existing wins):");
            for path in ConfigLoader::find_config_files() {
                let exists = if path.is_file() { " (exists)" } else { "" };
                println!("  {}{}", path.display(), exists);
            }
        }
    }
    Ok(())
}
