use foundation::ProfileId;

/// Failure to produce a validated catalogue for a profile.
///
/// Cloneable so a single in-flight load can hand the same outcome to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThemeLoadError {
    #[error("failed to fetch theme catalogue for profile {profile}: {message}")]
    Fetch { profile: ProfileId, message: String },
    #[error("theme catalogue for profile {profile} is not valid JSON: {message}")]
    Parse { profile: ProfileId, message: String },
    #[error("theme catalogue for profile {profile} is not a JSON object")]
    NotAnObject { profile: ProfileId },
    #[error("theme catalogue for profile {profile} has no usable themes")]
    NoThemes { profile: ProfileId },
}

impl ThemeLoadError {
    pub fn profile(&self) -> &ProfileId {
        match self {
            ThemeLoadError::Fetch { profile, .. }
            | ThemeLoadError::Parse { profile, .. }
            | ThemeLoadError::NotAnObject { profile }
            | ThemeLoadError::NoThemes { profile } => profile,
        }
    }
}

/// Error reported by a catalogue source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("catalogue not found: {0}")]
    NotFound(String),
    #[error("catalogue source error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadStoreError {
    #[error("payload storage unavailable")]
    Unavailable,
    #[error("payload storage corrupt: {0}")]
    Corrupt(String),
    #[error("payload storage error: {0}")]
    Io(String),
}
