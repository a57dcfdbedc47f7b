use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ApiError;

/// Fail with the list of fields that are absent or blank.
pub fn require(fields: &[(&str, Option<&str>)]) -> Result<(), ApiError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| (*name).to_owned())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(missing))
    }
}

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::BadRequest(format!(
            "{field} debe tener entre {min} y {max} caracteres (tiene {len})"
        )));
    }
    Ok(())
}

pub fn check_email(value: &str) -> Result<(), ApiError> {
    check_length("email", value, 3, 254)?;
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ApiError::BadRequest("correo electrónico inválido".into()));
    };
    if local.is_empty() || domain.is_empty() || value.contains(char::is_whitespace) {
        return Err(ApiError::BadRequest("correo electrónico inválido".into()));
    }
    Ok(())
}

/// Parse a challenge deadline.
///
/// Accepts an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date read as
/// midnight UTC of that day, so the stored value keeps the date as sent.
pub fn parse_deadline(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        && let Some(start) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(start.and_utc());
    }
    Err(ApiError::BadRequest(format!(
        "{field} debe ser una fecha ISO 8601 (AAAA-MM-DD o fecha y hora RFC 3339)"
    )))
}

/// A measurement as clients send it: a JSON number or a numeric string.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Number(f64),
    Text(String),
}

impl Reading {
    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

/// Resolve required readings to finite numbers, in order.
///
/// Absent or blank readings are reported together as missing fields; a
/// reading that is present but not a finite number is a 400 naming the field.
pub fn readings(fields: &[(&str, Option<&Reading>)]) -> Result<Vec<f64>, ApiError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.is_none_or(Reading::is_blank))
        .map(|(name, _)| (*name).to_owned())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::Validation(missing));
    }

    fields
        .iter()
        .filter_map(|(name, value)| value.map(|v| (*name, v)))
        .map(|(name, value)| {
            let number = match value {
                Reading::Number(n) => Some(*n),
                Reading::Text(s) => s.trim().parse::<f64>().ok(),
            };
            number
                .filter(|n| n.is_finite())
                .ok_or_else(|| ApiError::BadRequest(format!("{name} debe ser numérico")))
        })
        .collect()
}
