//! Ref and alias name validation.
//!
//! Valid names:
//! - Must be non-empty
//! - Must not contain whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` (double dot)
//! - Must not start or end with `.` or `/`
//! - Must not contain consecutive slashes (`//`)
//! - Components between slashes must be non-empty and not start with `.`
//!
//! Names end up as filesystem paths in the fs backend, so the rules exist to
//! keep traversal and platform quirks out of the index.

use crate::error::{RefError, RefResult};

/// Characters that are forbidden anywhere in a name.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

/// Validate a ref or alias name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use cairn_refs::names::validate_name;
///
/// assert!(validate_name("builds/linux/latest").is_ok());
/// assert!(validate_name("release-1.4").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("bad..name").is_err());
/// ```
pub fn validate_name(name: &str) -> RefResult<()> {
    let invalid = |reason: String| RefError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty".into()));
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(invalid(format!("contains forbidden character: {ch:?}")));
        }
    }

    // Parent traversal.
    if name.contains("..") {
        return Err(invalid("must not contain '..'".into()));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid("must not start or end with '.'".into()));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid("must not start or end with '/'".into()));
    }

    if name.contains("//") {
        return Err(invalid("must not contain consecutive slashes '//'".into()));
    }

    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid("path components must not be empty".into()));
        }
        if component.starts_with('.') {
            return Err(invalid(format!(
                "component must not start with '.': {component:?}"
            )));
        }
    }

    Ok(())
}
