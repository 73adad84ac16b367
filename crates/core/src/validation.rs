//! Input validation utilities.
//!
//! Checks applied to user-supplied values before they are used to build paths
//! or parameter files.

use crate::{RegistrationError, RegistrationResult};
use std::path::Path;

/// Validates that a patient identifier is safe to use as a single path component.
///
/// Identifiers come from directory names and are joined onto output paths, so
/// they must not be empty, must not contain path separators and must not be
/// `.` or `..`.
pub fn validate_patient_id(id: &str) -> RegistrationResult<()> {
    const MAX_PATIENT_ID_LEN: usize = 255;

    if id.trim().is_empty() {
        return Err(RegistrationError::InvalidInput(
            "patient id cannot be empty".into(),
        ));
    }

    if id.len() > MAX_PATIENT_ID_LEN {
        return Err(RegistrationError::InvalidInput(format!(
            "patient id exceeds maximum length of {} characters",
            MAX_PATIENT_ID_LEN
        )));
    }

    if id == "." || id == ".." {
        return Err(RegistrationError::InvalidInput(format!(
            "patient id cannot be '{id}'"
        )));
    }

    if id.contains(['/', '\\', '\0']) {
        return Err(RegistrationError::InvalidInput(format!(
            "patient id contains a path separator: {id}"
        )));
    }

    Ok(())
}

/// Rejects zero for counts that Elastix requires to be positive.
pub fn validate_positive(name: &str, value: u32) -> RegistrationResult<()> {
    if value == 0 {
        return Err(RegistrationError::InvalidInput(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

/// Rejects zero-second tool time limits.
pub fn validate_timeout_secs(name: &str, secs: u64) -> RegistrationResult<()> {
    if secs == 0 {
        return Err(RegistrationError::InvalidInput(format!(
            "{name} must be a positive number of seconds"
        )));
    }
    Ok(())
}

/// Rejects an output directory that is, or resolves to, the patient data
/// directory.
pub fn validate_distinct_dirs(data_dir: &Path, output_dir: &Path) -> RegistrationResult<()> {
    let same = data_dir == output_dir
        || matches!(
            (data_dir.canonicalize(), output_dir.canonicalize()),
            (Ok(data), Ok(output)) if data == output
        );
    if same {
        return Err(RegistrationError::InvalidInput(
            "output directory must differ from the patient data directory".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(validate_timeout_secs("elastix_timeout_secs", 1).is_ok());
        assert!(matches!(
            validate_timeout_secs("elastix_timeout_secs", 0),
            Err(RegistrationError::InvalidInput(msg)) if msg.contains("elastix_timeout_secs")
        ));
    }

    #[test]
    fn output_dir_must_not_alias_data_dir() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        std::fs::create_dir(&data).unwrap();

        assert!(validate_distinct_dirs(&data, &temp.path().join("output")).is_ok());
        assert!(validate_distinct_dirs(&data, &data).is_err());
        assert!(matches!(
            validate_distinct_dirs(&data, &temp.path().join("data/../data")),
            Err(RegistrationError::InvalidInput(_))
        ));
    }
}
