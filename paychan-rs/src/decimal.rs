use crate::error::Error;
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Parse an amount string as a nonnegative arbitrary-precision decimal.
/// Exponents and signs are rejected so wire values stay canonical.
pub fn parse_amount(value: &str) -> Result<BigDecimal, Error> {
    if value.is_empty()
        || value.matches('.').count() > 1
        || !value.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return Err(Error::InvalidFields(format!("invalid amount `{value}`")))
    }
    BigDecimal::from_str(value)
        .map_err(|err| Error::InvalidFields(format!("invalid amount `{value}`: {err}")))
}

/// Parse a signed decimal, e.g. a balance bound or a peer-reported balance.
pub fn parse_signed(value: &str) -> Result<BigDecimal, Error> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty()
        || digits.matches('.').count() > 1
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return Err(Error::InvalidFields(format!("invalid decimal `{value}`")))
    }
    BigDecimal::from_str(value)
        .map_err(|err| Error::InvalidFields(format!("invalid decimal `{value}`: {err}")))
}

/// Flip the sign of a decimal string without widening it through a float.
pub fn negate(value: &str) -> String {
    match value.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None if value == "0" => value.to_string(),
        None => format!("-{value}"),
    }
}
