//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::sync::session_code;

const MAX_HOST_ID_LENGTH: usize = 64;

/// Validates that a session code looks like `XXXX-DDDD` (any letter prefix,
/// case-insensitive). The configured prefix itself is checked by the service.
///
/// # Examples
///
/// ```ignore
/// validate_session_code_shape("KOLO-1234") // Ok
/// validate_session_code_shape("kolo-1234") // Ok
/// validate_session_code_shape("KOLO-12")   // Err
/// ```
pub fn validate_session_code_shape(code: &str) -> Result<(), ValidationError> {
    let normalized = session_code::normalize(code);
    let Some((prefix, _)) = normalized.split_once('-') else {
        return Err(code_error());
    };
    if prefix.is_empty() || !session_code::validate(prefix, &normalized) {
        return Err(code_error());
    }
    Ok(())
}

/// Validates that a host id is a non-empty token of printable ASCII without spaces.
pub fn validate_host_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_HOST_ID_LENGTH {
        let mut err = ValidationError::new("host_id_length");
        err.message = Some(
            format!(
                "Host ID must be between 1 and {MAX_HOST_ID_LENGTH} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id.chars().all(|c| c.is_ascii_graphic()) {
        let mut err = ValidationError::new("host_id_format");
        err.message = Some("Host ID must contain only printable ASCII characters".into());
        return Err(err);
    }

    Ok(())
}

fn code_error() -> ValidationError {
    let mut err = ValidationError::new("session_code_format");
    err.message = Some("Session code must look like PREFIX-1234".into());
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_shape_accepts_any_prefix() {
        assert!(validate_session_code_shape("KOLO-1234").is_ok());
        assert!(validate_session_code_shape(" kolo-9999 ").is_ok());
        assert!(validate_session_code_shape("WHEEL-1000").is_ok());
    }

    #[test]
    fn session_code_shape_rejects_malformed() {
        assert!(validate_session_code_shape("KOLO-123").is_err()); // too short
        assert!(validate_session_code_shape("KOLO1234").is_err()); // no dash
        assert!(validate_session_code_shape("-1234").is_err()); // no prefix
        assert!(validate_session_code_shape("KOLO-12a4").is_err()); // letter
    }

    #[test]
    fn host_id_rules() {
        assert!(validate_host_id("3f1c2d9e-host").is_ok());
        assert!(validate_host_id("").is_err());
        assert!(validate_host_id("has space").is_err());
        assert!(validate_host_id(&"x".repeat(65)).is_err());
    }
}
