use std::io;

/// Broad origin of a failure, used by callers to decide how to surface it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recoverable by user action (reconnect, supply credentials, pick another name).
    User,
    /// Ambiguous; the caller decides whether it is fatal.
    Conditional,
    /// Backend, filesystem or protocol failure.
    System,
}

/// Errors produced by storage backends and the services built on them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Must connect to server first")]
    NotConnected,

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Access denied: {0}")]
    Access(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Username and password are required")]
    MissingCredentials,

    #[error("Request failed ({status}): {detail}")]
    Request { status: u16, detail: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Origins differ: {0}")]
    CrossOrigin(String),
}

impl StorageError {
    /// Stable numeric code. The thousands digit encodes the [`ErrorKind`].
    pub fn code(&self) -> u16 {
        match self {
            Self::Unsupported(_) => 4000,
            Self::VersionNotFound(_) => 4003,
            Self::InvalidCredentials => 4005,
            Self::NotConnected => 4006,
            Self::Unknown(_) => 5000,
            Self::NotFound(_) => 5001,
            Self::InvalidPath(_) => 5002,
            Self::Io(_) => 6000,
            Self::Access(_) => 6001,
            Self::AlreadyExists(_) => 6002,
            Self::FileNotFound(_) => 6004,
            Self::TypeMismatch(_) => 6005,
            Self::MissingCredentials => 6008,
            Self::Request { .. } => 6009,
            Self::InvalidResponse(_) => 6010,
            Self::Serialization(_) => 6011,
            Self::CrossOrigin(_) => 6012,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            4000..=4999 => ErrorKind::User,
            5000..=5999 => ErrorKind::Conditional,
            _ => ErrorKind::System,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }

    pub fn is_conditional_error(&self) -> bool {
        self.kind() == ErrorKind::Conditional
    }

    pub fn is_system_error(&self) -> bool {
        self.kind() == ErrorKind::System
    }

    /// True for both flavours of "absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::FileNotFound(_))
    }

    /// Map an I/O error, keeping the path in the message.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::Access(format!("{}: {}", path, err)),
            _ => Self::Io(format!("{}: {}", path, err)),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound(err.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(err.to_string()),
            io::ErrorKind::PermissionDenied => Self::Access(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
