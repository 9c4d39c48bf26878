//! Request validation utilities.

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> crate::types::Result<()> {
    if s.is_empty() {
        return Err(crate::types::Error::validation(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Validate that a value is positive.
pub fn validate_positive(n: u32, field: &str) -> crate::types::Result<()> {
    if n == 0 {
        return Err(crate::types::Error::validation(format!(
            "{} must be positive",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_accepts_text_and_rejects_empty() {
        assert!(validate_non_empty("leave_request", "definition key").is_ok());

        let err = validate_non_empty("", "definition key").unwrap_err();
        assert_eq!(err.to_string(), "validation error: definition key cannot be empty");
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(validate_positive(1, "worker_pool_size").is_ok());
        assert!(validate_positive(0, "worker_pool_size").is_err());
    }
}
