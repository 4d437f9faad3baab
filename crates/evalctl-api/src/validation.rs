use evalctl_config::Config;
use evalctl_types::{limits, ErrorKind, Language, Priority};

use crate::error::ApiError;
use crate::types::SubmitRequest;

const ALLOWED_LANGUAGES: &[&str] = &["python"];

/// §4.9 "Validation": every failure returns 4xx with a machine-readable
/// error kind. Bounds are read from `config` rather than hard-coded so an
/// operator's environment overrides apply here too.
pub fn validate_submission(req: &SubmitRequest, config: &Config) -> Result<(), ApiError> {
    if req.code.is_empty() {
        return Err(ApiError::new(ErrorKind::InvalidRequest, "code must not be empty"));
    }
    if req.code.len() > config.max_code_size_bytes {
        return Err(ApiError::new(
            ErrorKind::PayloadTooLarge,
            format!("code exceeds {} bytes", config.max_code_size_bytes),
        ));
    }
    if !ALLOWED_LANGUAGES.contains(&req.language.as_str()) {
        return Err(ApiError::new(
            ErrorKind::InvalidRequest,
            format!("unsupported language {:?}", req.language),
        ));
    }
    let timeout = req.timeout_seconds.unwrap_or(config.default_timeout_seconds);
    if timeout < limits::MIN_TIMEOUT_SECONDS || timeout > config.max_timeout_seconds {
        return Err(ApiError::new(
            ErrorKind::InvalidRequest,
            format!(
                "timeout_seconds must be in [{}, {}]",
                limits::MIN_TIMEOUT_SECONDS,
                config.max_timeout_seconds
            ),
        ));
    }
    if req.code.contains('\0') && !req.allow_null_bytes.unwrap_or(false) {
        return Err(ApiError::new(
            ErrorKind::InvalidRequest,
            "code contains null bytes; pass allow_null_bytes to opt in",
        ));
    }
    Ok(())
}

pub fn parse_language(raw: &str) -> Language {
    Language::from(raw)
}

pub fn parse_priority(raw: Option<&str>) -> Result<Priority, ApiError> {
    match raw {
        None => Ok(Priority::default()),
        Some("low") => Ok(Priority::Low),
        Some("normal") => Ok(Priority::Normal),
        Some("high") => Ok(Priority::High),
        Some(other) => Err(ApiError::new(ErrorKind::InvalidRequest, format!("invalid priority {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            max_code_size_bytes: 1024,
            max_timeout_seconds: 600,
            default_timeout_seconds: 30,
            max_concurrent_evaluations: 20,
            blob_threshold_bytes: 1_048_576,
            preview_bytes: 1024,
            broker_url: "mem://".into(),
            event_bus_url: "mem://".into(),
            storage_url: "mem://".into(),
            cluster_namespace: "default".into(),
            allow_sandbox_fallback: true,
            retry_max_attempts: 3,
            retry_base_seconds: 2,
            retry_cap_seconds: 60,
            bind_addr: "0.0.0.0:8080".into(),
            health_bind_addr: "0.0.0.0:9090".into(),
        }
    }

    fn req() -> SubmitRequest {
        SubmitRequest {
            eval_id: None,
            code: "print(1)".into(),
            language: "python".into(),
            timeout_seconds: None,
            priority: None,
            resources: None,
            allow_null_bytes: None,
        }
    }

    #[test]
    fn empty_code_is_rejected() {
        let mut r = req();
        r.code.clear();
        let err = validate_submission(&r, &config()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn oversized_code_is_rejected_as_payload_too_large() {
        let mut r = req();
        r.code = "x".repeat(2048);
        let err = validate_submission(&r, &config()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn unknown_language_is_rejected() {
        let mut r = req();
        r.language = "cobol".into();
        let err = validate_submission(&r, &config()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn timeout_out_of_bounds_is_rejected() {
        let mut r = req();
        r.timeout_seconds = Some(0);
        assert!(validate_submission(&r, &config()).is_err());
        r.timeout_seconds = Some(9999);
        assert!(validate_submission(&r, &config()).is_err());
    }

    #[test]
    fn null_byte_requires_explicit_opt_in() {
        let mut r = req();
        r.code = "print(1)\0".into();
        assert!(validate_submission(&r, &config()).is_err());
        r.allow_null_bytes = Some(true);
        assert!(validate_submission(&r, &config()).is_ok());
    }
}
