use std::str::FromStr;

use uuid::Uuid;

use crate::errors::AppError;

/// Ids are stored as hyphenated text; anything else is a corrupt row.
pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid '{}': {}", s, e)))
}

pub fn parse_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>, AppError> {
    match s.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(Some(parse_uuid(s)?)),
        _ => Ok(None),
    }
}

/// Upper-case text columns back into their enum.
pub fn parse_enum<T>(s: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    s.parse::<T>().map_err(AppError::internal)
}
