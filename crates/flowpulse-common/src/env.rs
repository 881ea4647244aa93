use crate::ConfigError;

/// Trims a CLI/ENV value and treats blanks and unresolved `${VAR}` placeholders as unset.
pub fn sanitize_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Some PaaS systems inject unresolved placeholders verbatim.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

pub fn parse_u16_value(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<u16>, ConfigError> {
    let Some(raw) = sanitize_value(value) else {
        return Ok(None);
    };
    raw.parse::<u16>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { field, value: raw })
}

pub fn parse_u64_value(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = sanitize_value(value) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { field, value: raw })
}
