//! Standardized user-facing error and warning messages.
//!
//! All messages follow the format:
//! ```text
//! fseal: error: <category>: <brief>
//!
//!   <details>
//!
//!   <suggestion>
//! ```
//!
//! Messages name targets, keys and paths. They never contain secret values.

use crate::Error;
use crate::envelope::DecryptReason;
use crate::rotation::RotationError;
use std::fmt::Write;

/// Error category shown after `fseal: error:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors (KDL parsing, key table, recipients)
    Config,
    /// Bad command-line input (target names, key names, seal input)
    Input,
    /// Artifact could not be decrypted
    Decrypt,
    /// Artifact does not belong to the requested target
    Target,
    /// Resolution finished in a blocking state
    Resolve,
    /// Recipient rotation failed
    Rotate,
    /// Filesystem failures
    Io,
    /// Bugs: conditions that should never happen
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Input => write!(f, "input"),
            Self::Decrypt => write!(f, "decrypt"),
            Self::Target => write!(f, "target"),
            Self::Resolve => write!(f, "resolve"),
            Self::Rotate => write!(f, "rotate"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

fn push_block(msg: &mut String, block: &str) {
    msg.push_str("\n\n");
    for line in block.lines() {
        let _ = writeln!(msg, "  {}", line);
    }
    if msg.ends_with('\n') {
        msg.pop();
    }
}

/// Format a standardized error message.
pub fn format_error(
    category: ErrorCategory,
    brief: &str,
    details: Option<&str>,
    suggestion: Option<&str>,
) -> String {
    let mut msg = format!("fseal: error: {}: {}", category, brief);
    if let Some(details) = details {
        push_block(&mut msg, details);
    }
    if let Some(suggestion) = suggestion {
        push_block(&mut msg, suggestion);
    }
    msg
}

/// Format a standardized warning message.
pub fn format_warning(category: ErrorCategory, brief: &str, details: Option<&str>) -> String {
    let mut msg = format!("fseal: warning: {}: {}", category, brief);
    if let Some(details) = details {
        push_block(&mut msg, details);
    }
    msg
}

/// Warning for a key that fell back to its placeholder.
pub fn placeholder_warning(target: &str, key: &str, env_var: Option<&str>) -> String {
    let hint = match env_var {
        Some(var) => format!("Seal it into the artifact or set {}.", var),
        None => "Seal it into the artifact.".to_string(),
    };
    format_warning(
        ErrorCategory::Resolve,
        &format!("'{}' uses a placeholder for '{}'", target, key),
        Some(&hint),
    )
}

/// Render any library error in the standard format.
pub fn render(err: &Error) -> String {
    match err {
        Error::Config(msg) => format_error(ErrorCategory::Config, msg, None, None),
        Error::Kdl(msg) => format_error(
            ErrorCategory::Config,
            "invalid KDL syntax",
            Some(msg),
            Some("Check for missing quotes or invalid characters."),
        ),
        Error::Toml(msg) => format_error(
            ErrorCategory::Input,
            "invalid TOML input",
            Some(msg),
            Some("Seal input must be a flat table of string values."),
        ),
        Error::Json(e) => format_error(ErrorCategory::Input, "invalid JSON", Some(&e.to_string()), None),
        Error::InvalidKey(msg) => format_error(ErrorCategory::Input, "invalid key name", Some(msg), None),
        Error::UnknownKey(key) => format_error(
            ErrorCategory::Input,
            &format!("unknown key '{}'", key),
            None,
            Some("Run 'fseal keys' to list the configured keys."),
        ),
        Error::DuplicateKey(key) => format_error(
            ErrorCategory::Input,
            &format!("key '{}' given more than once", key),
            None,
            None,
        ),
        Error::InvalidTarget(msg) => format_error(
            ErrorCategory::Input,
            "invalid target identifier",
            Some(msg),
            Some("Targets use letters, digits, '.', '_' and '-' and may not start with '.'."),
        ),
        Error::InvalidInput(msg) => format_error(ErrorCategory::Input, msg, None, None),
        Error::Decrypt(e) => format_error(
            ErrorCategory::Decrypt,
            decrypt_brief(e.reason()),
            Some(e.detail()),
            None,
        ),
        Error::Seal(e) => format_error(ErrorCategory::Input, "cannot seal artifact", Some(&e.to_string()), None),
        Error::TargetMismatch {
            expected,
            found,
            path,
        } => format_error(
            ErrorCategory::Target,
            &format!("artifact for '{}' is tagged '{}'", expected, found),
            Some(&format!("Artifact: {}", path.display())),
            Some("The file was copied or renamed from another target. Reseal it for this target."),
        ),
        Error::InvariantViolation { target, key } => format_error(
            ErrorCategory::Internal,
            &format!("no provider resolved '{}' for '{}'", key, target),
            None,
            Some("The placeholder provider should always answer. Please report this."),
        ),
        Error::Corrupted {
            target,
            keys,
            detail,
        } => format_error(
            ErrorCategory::Resolve,
            &format!("secrets for '{}' are corrupted", target),
            Some(&format!("Affected keys: {}\n{}", keys.join(", "), detail)),
            Some("Restore the artifact from version control or reseal it."),
        ),
        Error::Degraded { target, keys } => format_error(
            ErrorCategory::Resolve,
            &format!("secrets for '{}' are degraded", target),
            Some(&format!("Placeholder keys: {}", keys.join(", "))),
            None,
        ),
        Error::Rotation(e) => render_rotation(e),
        Error::Io(e) => format_error(ErrorCategory::Io, &e.to_string(), None, None),
        Error::Other(msg) => format_error(ErrorCategory::Internal, msg, None, None),
    }
}

fn decrypt_brief(reason: DecryptReason) -> &'static str {
    match reason {
        DecryptReason::KeyMismatch => "key material does not open this artifact",
        DecryptReason::Malformed => "artifact is malformed or tampered",
        DecryptReason::Unreadable => "artifact or key file is unreadable",
    }
}

fn render_rotation(err: &RotationError) -> String {
    match err {
        RotationError::CannotDecryptOriginal(e) => format_error(
            ErrorCategory::Rotate,
            "cannot decrypt the original artifact",
            Some(&e.to_string()),
            Some("Pass the current key with --key-file."),
        ),
        RotationError::NoRecipients => format_error(
            ErrorCategory::Rotate,
            "no recipients",
            None,
            Some("Pass at least one --recipient, or use --union to keep the current ones."),
        ),
        RotationError::VerificationFailed(detail) => format_error(
            ErrorCategory::Rotate,
            "resealed artifact failed verification",
            Some(detail),
            Some("The original artifact was left untouched."),
        ),
        RotationError::Seal(e) => {
            format_error(ErrorCategory::Rotate, "reseal failed", Some(&e.to_string()), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_error_full() {
        let msg = format_error(
            ErrorCategory::Config,
            "bad thing",
            Some("line one\nline two"),
            Some("fix it"),
        );
        assert_eq!(
            msg,
            "fseal: error: config: bad thing\n\n  line one\n  line two\n\n  fix it"
        );
    }

    #[test]
    fn test_format_error_brief_only() {
        assert_eq!(
            format_error(ErrorCategory::Io, "disk full", None, None),
            "fseal: error: io: disk full"
        );
    }

    #[test]
    fn test_format_warning() {
        let msg = format_warning(ErrorCategory::Resolve, "careful", Some("detail"));
        assert_eq!(msg, "fseal: warning: resolve: careful\n\n  detail");
    }

    #[test]
    fn test_placeholder_warning_names_env_var() {
        let msg = placeholder_warning("rx-7", "endpoint", Some("ROBOT_ENDPOINT"));
        assert!(msg.starts_with("fseal: warning: resolve: 'rx-7' uses a placeholder for 'endpoint'"));
        assert!(msg.contains("ROBOT_ENDPOINT"));
    }

    #[test]
    fn test_render_target_mismatch() {
        let msg = render(&Error::TargetMismatch {
            expected: "rx-7".into(),
            found: "rx-8".into(),
            path: PathBuf::from("secrets/rx-7.enc.json"),
        });
        assert!(msg.starts_with("fseal: error: target: artifact for 'rx-7' is tagged 'rx-8'"));
        assert!(msg.contains("secrets/rx-7.enc.json"));
    }

    #[test]
    fn test_render_corrupted_names_keys() {
        let msg = render(&Error::Corrupted {
            target: "rx-7".into(),
            keys: vec!["endpoint".into(), "identity".into()],
            detail: "malformed: authentication failed".into(),
        });
        assert!(msg.starts_with("fseal: error: resolve: secrets for 'rx-7' are corrupted"));
        assert!(msg.contains("Affected keys: endpoint, identity"));
    }

    #[test]
    fn test_render_rotation_error() {
        let msg = render(&Error::Rotation(RotationError::NoRecipients));
        assert!(msg.starts_with("fseal: error: rotate: no recipients"));
    }
}
