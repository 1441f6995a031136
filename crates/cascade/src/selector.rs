use std::sync::Arc;

use catalog::{ThemeCatalogue, ThemeDefinition, ThemeLoader, ThemeType};
use foundation::{ProfileId, ThemeId};
use parking_lot::Mutex;
use runtime::CancellationToken;

use crate::applier::ThemeApplier;
use crate::error::CascadeError;
use crate::report::ThemeRunReport;

#[derive(Debug, Default)]
struct SelectorState {
    primary: Option<ThemeId>,
    secondary: Option<ThemeId>,
    run: Option<CancellationToken>,
}

/// Caller-facing theme switcher for one profile.
///
/// Starting a run supersedes the previous one: its token is cancelled, so
/// only the latest selection finishes applying.
#[derive(Debug)]
pub struct ThemeSelector {
    profile: ProfileId,
    loader: Arc<ThemeLoader>,
    applier: Arc<ThemeApplier>,
    state: Mutex<SelectorState>,
}

impl ThemeSelector {
    pub fn new(profile: ProfileId, loader: Arc<ThemeLoader>, applier: Arc<ThemeApplier>) -> Self {
        Self {
            profile,
            loader,
            applier,
            state: Mutex::new(SelectorState::default()),
        }
    }

    pub async fn catalogue(&self) -> Result<Arc<ThemeCatalogue>, CascadeError> {
        Ok(self.loader.load(&self.profile).await?)
    }

    pub async fn primary_themes(&self) -> Result<Vec<ThemeDefinition>, CascadeError> {
        let catalogue = self.catalogue().await?;
        Ok(catalogue.primary_themes().into_iter().cloned().collect())
    }

    pub async fn secondary_themes(&self) -> Result<Vec<ThemeDefinition>, CascadeError> {
        let catalogue = self.catalogue().await?;
        Ok(catalogue.secondary_themes().into_iter().cloned().collect())
    }

    /// Active primary theme.
    pub fn active_theme(&self) -> Option<ThemeId> {
        self.state.lock().primary.clone()
    }

    pub fn active_secondary(&self) -> Option<ThemeId> {
        self.state.lock().secondary.clone()
    }

    /// Cancels the run in progress, if any.
    pub fn cancel_current(&self) {
        if let Some(token) = self.state.lock().run.take() {
            token.cancel();
        }
    }

    /// Loads the catalogue, finds `theme_id` and applies it.
    ///
    /// An unknown id leaves the map and the active selection untouched.
    pub async fn set_theme(&self, theme_id: &str) -> Result<ThemeRunReport, CascadeError> {
        let catalogue = self.catalogue().await?;
        let Some(theme) = catalogue.theme(theme_id) else {
            tracing::warn!(profile = %self.profile, theme_id, "unknown theme requested");
            return Err(CascadeError::UnknownTheme {
                profile: self.profile.clone(),
                theme: ThemeId::new(theme_id),
            });
        };
        self.run(theme).await
    }

    pub async fn apply_default(&self) -> Result<ThemeRunReport, CascadeError> {
        let catalogue = self.catalogue().await?;
        let theme = catalogue
            .default_definition()
            .ok_or_else(|| CascadeError::UnknownTheme {
                profile: self.profile.clone(),
                theme: catalogue.default_theme.clone(),
            })?;
        self.run(theme).await
    }

    /// Applies the primary theme after the active one, wrapping around.
    pub async fn next_primary(&self) -> Result<ThemeRunReport, CascadeError> {
        self.step_primary(1).await
    }

    pub async fn previous_primary(&self) -> Result<ThemeRunReport, CascadeError> {
        self.step_primary(-1).await
    }

    async fn step_primary(&self, step: isize) -> Result<ThemeRunReport, CascadeError> {
        let catalogue = self.catalogue().await?;
        let primaries = catalogue.primary_themes();
        if primaries.is_empty() {
            return Err(CascadeError::NoPrimaryThemes {
                profile: self.profile.clone(),
            });
        }
        let len = primaries.len() as isize;
        let active = self.active_theme();
        let position = active
            .as_ref()
            .and_then(|id| primaries.iter().position(|t| &t.id == id));
        let index = match position {
            Some(current) => (current as isize + step).rem_euclid(len),
            None if step >= 0 => 0,
            None => len - 1,
        };
        self.run(primaries[index as usize]).await
    }

    async fn run(&self, theme: &ThemeDefinition) -> Result<ThemeRunReport, CascadeError> {
        let token = CancellationToken::new();
        if let Some(previous) = self.state.lock().run.replace(token.clone()) {
            previous.cancel();
        }

        let report = self.applier.apply_theme(theme, &token).await?;

        if !report.cancelled {
            let mut state = self.state.lock();
            match theme.kind {
                ThemeType::Primary => state.primary = Some(theme.id.clone()),
                ThemeType::Secondary => state.secondary = Some(theme.id.clone()),
            }
            state.run = None;
        }
        Ok(report)
    }
}
