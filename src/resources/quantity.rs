//! Value comparison of Kubernetes resource quantities.
//!
//! The API server may hand back a quantity in a different spelling than
//! the one written (`500m` for `0.5`, `1` for `1000m`). Comparing strings
//! would make every such child look drifted on every pass.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// A quantity reduced to an exact value, or kept verbatim when it does not
/// parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuantityValue {
    /// Value in units of 10^-9
    Nanos(i128),
    Raw(String),
}

impl QuantityValue {
    pub fn of(quantity: &Quantity) -> Self {
        parse_nanos(&quantity.0)
            .map(QuantityValue::Nanos)
            .unwrap_or_else(|| QuantityValue::Raw(quantity.0.trim().to_string()))
    }
}

/// `true` when both quantities denote the same amount.
pub fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    QuantityValue::of(a) == QuantityValue::of(b)
}

/// `true` when both maps hold the same keys with equal quantities.
pub fn same_quantities(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    fn values(m: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<&String, QuantityValue> {
        m.into_iter()
            .flatten()
            .map(|(k, q)| (k, QuantityValue::of(q)))
            .collect()
    }
    values(a) == values(b)
}

/// Multiplier of a suffix as `factor * 10^exponent`.
fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    let scale = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        _ => {
            // Decimal exponent: `1e3`, `5E-2`
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            (1, exponent.parse().ok()?)
        }
    };
    Some(scale)
}

/// Parse `<sign><digits>[.<digits>]<suffix>` into nano-units.
///
/// Returns `None` for malformed input, overflow, or values finer than a
/// nano-unit.
fn parse_nanos(input: &str) -> Option<i128> {
    let input = input.trim();
    let (negative, unsigned) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    let number_len = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut mantissa: i128 = 0;
    for digit in whole.chars().chain(fraction.chars()) {
        let d = i128::from(digit.to_digit(10)?);
        mantissa = mantissa.checked_mul(10)?.checked_add(d)?;
    }

    let (factor, exponent) = suffix_scale(suffix)?;
    let fraction_len = i32::try_from(fraction.len()).ok()?;
    let shift = exponent.checked_add(9)?.checked_sub(fraction_len)?;

    let scaled = mantissa.checked_mul(factor)?;
    let nanos = if shift >= 0 {
        scaled.checked_mul(10i128.checked_pow(shift.unsigned_abs())?)?
    } else {
        let divisor = 10i128.checked_pow(shift.unsigned_abs())?;
        if scaled % divisor != 0 {
            return None;
        }
        scaled / divisor
    };
    Some(if negative { -nanos } else { nanos })
}
