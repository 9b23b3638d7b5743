use crate::error::{Error, Result};

pub const COUNTRY_CODE: &str = "250";

/// Normalizes a mobile-money phone number to its canonical 12-digit form
/// (country code followed by the 9-digit subscriber number).
///
/// Accepts 9 digits, 10 digits with a leading `0`, or the full 12 digits.
/// Spaces, dashes and a leading `+` are ignored.
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidPhoneFormat(raw.to_string()));
    }
    match digits.len() {
        9 => Ok(format!("{COUNTRY_CODE}{digits}")),
        10 if digits.starts_with('0') => Ok(format!("{COUNTRY_CODE}{}", &digits[1..])),
        12 => Ok(digits),
        _ => Err(Error::InvalidPhoneFormat(raw.to_string())),
    }
}
