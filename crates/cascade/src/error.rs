use catalog::{MalformedTheme, ThemeLoadError};
use foundation::{ProfileId, ThemeId};

/// Errors that abort a theme operation as a whole.
///
/// Per-layer failures never surface here; they are reported in the
/// run report instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeError {
    #[error("malformed theme: {0}")]
    MalformedTheme(#[from] MalformedTheme),
    #[error("theme {theme} is not defined for profile {profile}")]
    UnknownTheme { profile: ProfileId, theme: ThemeId },
    #[error("profile {profile} has no primary themes")]
    NoPrimaryThemes { profile: ProfileId },
    #[error(transparent)]
    Load(#[from] ThemeLoadError),
}
