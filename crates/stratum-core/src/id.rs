//! Resource-id validation and path-safe keys.
//!
//! Resource ids double as map keys and as on-disk directory names for the
//! Terraform plane, so they are validated up front and escaped before they
//! ever touch a filesystem path.

use std::fmt::Write;

use crate::error::CoreError;

/// Reject ids that cannot be stored or addressed reliably.
pub fn validate(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(invalid(id, "id must not be empty"));
    }
    if id.chars().any(char::is_control) {
        return Err(invalid(id, "id must not contain control characters"));
    }
    Ok(())
}

/// Injective, filesystem-safe encoding of a resource id.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte is
/// percent-encoded, as is a leading `.` so that `.` / `..` and hidden
/// names can never be produced.
pub fn resource_key(id: &str) -> String {
    let mut key = String::with_capacity(id.len());
    for (i, byte) in id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && i > 0);
        if keep {
            key.push(byte as char);
        } else {
            let _ = write!(key, "%{byte:02X}");
        }
    }
    key
}

fn invalid(id: &str, reason: &str) -> CoreError {
    CoreError::InvalidResourceId {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}
