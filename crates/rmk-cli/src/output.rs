//! Result printing in the same notation Python uses for a list of floats,
//! so `rmk run` prints the same lines as `demos/test_kernel.py`.

/// `[a, b, c]` with each element rendered by [`float_repr`].
pub fn float_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| float_repr(*v)).collect();
    format!("[{}]", items.join(", "))
}

/// Shortest round-trip digits, laid out like Python's `repr(float)`.
/// Zero and magnitudes in `[1e-4, 1e16)` are positional, with a `.0` when
/// integral; anything else gets a signed two-digit exponent (`1e+20`).
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sign = if value.is_sign_negative() { "-" } else { "" };
    // `{:e}` yields the shortest digits as `d.ddde<exp>`.
    let sci = format!("{:e}", value.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let point = exp + 1;

    if point <= -4 || point > 16 {
        let (lead, rest) = digits.split_at(1);
        let frac = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{sign}{lead}{frac}e{exp_sign}{:02}", exp.abs());
    }

    let len = digits.len() as i32;
    let body = if point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else if point >= len {
        format!("{}{}.0", digits, "0".repeat((point - len) as usize))
    } else {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    };
    format!("{sign}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_values_keep_a_trailing_zero() {
        assert_eq!(float_list(&[1.0, 4.0, 9.0, 16.0]), "[1.0, 4.0, 9.0, 16.0]");
        assert_eq!(float_repr(-27.0), "-27.0");
        assert_eq!(float_repr(0.0), "0.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e15), "1000000000000000.0");
    }

    #[test]
    fn large_and_small_magnitudes_switch_to_exponent_form() {
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e300), "1.5e+300");
        assert_eq!(float_repr(1.5241578781054718e16), "1.5241578781054718e+16");
        assert_eq!(float_repr(1e-5), "1e-05");
        assert_eq!(float_repr(1.0000000000000002e-10), "1.0000000000000002e-10");
    }

    #[test]
    fn fractions_near_the_cutoff_stay_positional() {
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.125), "0.125");
        assert_eq!(float_repr(123456789.125), "123456789.125");
    }

    #[test]
    fn non_finite_values_use_lowercase_names() {
        assert_eq!(
            float_list(&[f64::NAN, f64::INFINITY, f64::NEG_INFINITY]),
            "[nan, inf, -inf]"
        );
        assert_eq!(float_list(&[]), "[]");
    }
}
