//! Error types for directory operations.
//!
//! One enum covers the whole crate: required-field guards, the normalized
//! login failure, not-found, and protocol/transport errors passed through
//! from the backend unchanged.

use thiserror::Error;

/// Error that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No entry matched the lookup.
    #[error("not found")]
    NotFound,

    /// Authentication failed. Covers both wrong passwords and malformed
    /// bind DNs so callers cannot distinguish unknown accounts from bad
    /// credentials.
    #[error("incorrect username or password")]
    Login,

    /// The configured base DN is empty.
    #[error("directory base DN is empty")]
    EmptyBase,

    /// A bind was attempted with an empty DN.
    #[error("bind DN is empty")]
    EmptyDn,

    /// A bind was attempted with an empty password.
    #[error("bind password is empty")]
    EmptyPassword,

    /// A group operation was given an empty name.
    #[error("group name is empty")]
    EmptyCn,

    /// A person operation was given an empty uid.
    #[error("uid is empty")]
    EmptyUid,

    /// The uid does not match the accepted identifier pattern.
    #[error("invalid uid: {uid}")]
    InvalidUid { uid: String },

    /// The DN is not syntactically well-formed.
    #[error("invalid DN: {dn}")]
    InvalidDn { dn: String },

    /// The operation is not implemented for this backend dialect.
    #[error("unsupported operation for this backend")]
    Unsupported,

    /// The configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The connection provider could not hand out a handle.
    #[error("connection pool error: {message}")]
    Pool { message: String },

    /// The connection failed below the protocol layer.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server answered with a non-success result code.
    #[error("directory result {code}: {text}")]
    Protocol { code: u32, text: String },
}

impl DirectoryError {
    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a pool error.
    pub fn pool(message: impl Into<String>) -> Self {
        DirectoryError::Pool {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        DirectoryError::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error from a server result code.
    pub fn protocol(code: u32, text: impl Into<String>) -> Self {
        DirectoryError::Protocol {
            code,
            text: text.into(),
        }
    }

    /// Whether this error means the target entry does not exist. Covers
    /// both the mapped `NotFound` and the raw noSuchObject result code.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DirectoryError::NotFound
                | DirectoryError::Protocol {
                    code: result_code::NO_SUCH_OBJECT,
                    ..
                }
        )
    }

    /// Whether this error is the normalized login failure.
    #[must_use]
    pub fn is_login_failure(&self) -> bool {
        matches!(self, DirectoryError::Login)
    }

    /// Normalize credential-shaped protocol failures into [`Login`].
    ///
    /// Binds that fail with invalidCredentials (49) or invalidDNSyntax (34)
    /// collapse into one opaque error; everything else passes through.
    ///
    /// [`Login`]: DirectoryError::Login
    #[must_use]
    pub fn normalize_bind_failure(self) -> Self {
        match self {
            DirectoryError::Protocol {
                code: result_code::INVALID_CREDENTIALS | result_code::INVALID_DN_SYNTAX,
                ..
            } => DirectoryError::Login,
            other => other,
        }
    }
}

/// LDAP result codes the core branches on.
pub mod result_code {
    /// noSuchObject
    pub const NO_SUCH_OBJECT: u32 = 32;
    /// invalidDNSyntax
    pub const INVALID_DN_SYNTAX: u32 = 34;
    /// invalidCredentials
    pub const INVALID_CREDENTIALS: u32 = 49;
    /// entryAlreadyExists
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        assert!(DirectoryError::NotFound.is_not_found());
        assert!(DirectoryError::protocol(32, "no such object").is_not_found());
        assert!(!DirectoryError::protocol(49, "invalid credentials").is_not_found());
        assert!(!DirectoryError::Login.is_not_found());
    }

    #[test]
    fn test_normalize_bind_failure() {
        let err = DirectoryError::protocol(49, "invalid credentials").normalize_bind_failure();
        assert!(err.is_login_failure());

        let err = DirectoryError::protocol(34, "invalid DN syntax").normalize_bind_failure();
        assert!(err.is_login_failure());

        let err = DirectoryError::protocol(32, "no such object").normalize_bind_failure();
        assert!(!err.is_login_failure());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DirectoryError::Login.to_string(),
            "incorrect username or password"
        );
        assert_eq!(
            DirectoryError::protocol(50, "insufficient access").to_string(),
            "directory result 50: insufficient access"
        );
        assert_eq!(
            DirectoryError::InvalidUid {
                uid: "Bad Uid".to_string()
            }
            .to_string(),
            "invalid uid: Bad Uid"
        );
    }
}
