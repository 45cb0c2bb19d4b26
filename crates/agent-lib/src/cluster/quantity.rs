//! Kubernetes resource quantity parsing

/// Integer value of a quantity string such as `500m`, `2Gi` or `1.5e3`,
/// rounded away from zero.
///
/// Returns `None` for malformed input. Values beyond `i64` saturate.
pub fn parse_quantity(input: &str) -> Option<i64> {
    let input = input.trim();
    let number_end = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(number_end);

    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        mantissa = mantissa.checked_mul(10)?.checked_add((c as u8 - b'0') as i128)?;
    }

    let (exponent, multiplier) = suffix_scale(suffix)?;
    let exponent = exponent.checked_sub(i32::try_from(fraction.len()).ok()?)?;
    let scaled = mantissa.checked_mul(multiplier)?;

    let magnitude = if exponent >= 0 {
        10i128
            .checked_pow(exponent as u32)
            .and_then(|p| scaled.checked_mul(p))
            .unwrap_or(if scaled == 0 { 0 } else { i128::MAX })
    } else {
        match 10i128.checked_pow(exponent.unsigned_abs()) {
            Some(divisor) => scaled / divisor + i128::from(scaled % divisor != 0),
            // Anything non-zero this small still rounds up to one
            None => i128::from(scaled > 0),
        }
    };

    let magnitude = magnitude.min(i64::MAX as i128) as i64;
    Some(if negative { -magnitude } else { magnitude })
}

/// Decimal exponent and binary multiplier for a quantity suffix
fn suffix_scale(suffix: &str) -> Option<(i32, i128)> {
    let scale = match suffix {
        "" => (0, 1),
        "n" => (-9, 1),
        "u" => (-6, 1),
        "m" => (-3, 1),
        "k" => (3, 1),
        "M" => (6, 1),
        "G" => (9, 1),
        "T" => (12, 1),
        "P" => (15, 1),
        "E" => (18, 1),
        "Ki" => (0, 1 << 10),
        "Mi" => (0, 1 << 20),
        "Gi" => (0, 1 << 30),
        "Ti" => (0, 1 << 40),
        "Pi" => (0, 1 << 50),
        "Ei" => (0, 1 << 60),
        _ => {
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            (exponent.parse().ok()?, 1)
        }
    };
    Some(scale)
}
