//! On-disk profile packages.
//!
//! ```text
//! <root>/<profile>/themes.json
//! <root>/<profile>/layers.json
//! <root>/<profile>/styles/<layer or styleDirectory>/<style file>
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cascade::{StyleLoadError, StyleLoader};
use catalog::{CatalogueSource, SourceError};
use foundation::{LayerId, ProfileId};
use layers::{LayerConfig, StyleOption};
use runtime::BoxFuture;
use serde_json::Value;

use crate::manifest::{LayerManifest, MANIFEST_VERSION};

pub const THEMES_FILE_NAME: &str = "themes.json";
pub const LAYERS_FILE_NAME: &str = "layers.json";
pub const STYLES_DIR_NAME: &str = "styles";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("layer manifest parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported layer manifest version: {found}")]
    UnsupportedVersion { found: String },
    #[error("layer {0} is declared more than once")]
    DuplicateLayer(LayerId),
}

/// A directory holding one sub-directory per profile.
#[derive(Debug, Clone)]
pub struct ProfileDirectory {
    root: PathBuf,
}

impl ProfileDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, profile: &ProfileId) -> PathBuf {
        self.root.join(profile.as_str())
    }

    pub fn themes_path(&self, profile: &ProfileId) -> PathBuf {
        self.profile_dir(profile).join(THEMES_FILE_NAME)
    }

    pub fn style_path(&self, profile: &ProfileId, layer: &LayerConfig, style: &StyleOption) -> PathBuf {
        let dir = layer
            .style_directory
            .as_deref()
            .unwrap_or(layer.id.as_str());
        self.profile_dir(profile)
            .join(STYLES_DIR_NAME)
            .join(dir)
            .join(style.file_name())
    }

    /// Profiles present under the root, sorted.
    pub fn list_profiles(&self) -> Result<Vec<ProfileId>, ProfileError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ProfileError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut profiles: Vec<ProfileId> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().join(THEMES_FILE_NAME).is_file())
            .filter_map(|e| e.file_name().to_str().map(ProfileId::from))
            .collect();
        profiles.sort();
        Ok(profiles)
    }

    pub fn open(&self, profile: &ProfileId) -> Result<ProfilePackage, ProfileError> {
        ProfilePackage::load(self.profile_dir(profile), profile.clone())
    }
}

impl CatalogueSource for ProfileDirectory {
    fn fetch_catalogue<'a>(&'a self, profile: &'a ProfileId) -> BoxFuture<'a, Result<String, SourceError>> {
        let path = self.themes_path(profile);
        Box::pin(async move {
            tokio::fs::read_to_string(&path).await.map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    SourceError::NotFound(path.display().to_string())
                } else {
                    SourceError::Io(format!("{}: {e}", path.display()))
                }
            })
        })
    }
}

impl StyleLoader for ProfileDirectory {
    fn load_style<'a>(
        &'a self,
        profile: &'a ProfileId,
        layer: &'a LayerConfig,
        style: &'a StyleOption,
    ) -> BoxFuture<'a, Result<Value, StyleLoadError>> {
        let path = self.style_path(profile, layer, style);
        Box::pin(async move {
            let payload = tokio::fs::read_to_string(&path).await.map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    StyleLoadError::NotFound {
                        layer: layer.id.clone(),
                        style: style.id.clone(),
                        path: path.display().to_string(),
                    }
                } else {
                    StyleLoadError::Io {
                        layer: layer.id.clone(),
                        style: style.id.clone(),
                        message: e.to_string(),
                    }
                }
            })?;
            serde_json::from_str(&payload).map_err(|e| StyleLoadError::Parse {
                layer: layer.id.clone(),
                style: style.id.clone(),
                message: e.to_string(),
            })
        })
    }
}

/// One profile's directory with its layer manifest loaded.
#[derive(Debug, Clone)]
pub struct ProfilePackage {
    root: PathBuf,
    profile: ProfileId,
    manifest: LayerManifest,
}

impl ProfilePackage {
    pub fn load(root: impl AsRef<Path>, profile: ProfileId) -> Result<Self, ProfileError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(LAYERS_FILE_NAME);
        let payload = fs::read_to_string(&manifest_path).map_err(|source| ProfileError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest: LayerManifest =
            serde_json::from_str(&payload).map_err(|source| ProfileError::Parse {
                path: manifest_path,
                source,
            })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                found: manifest.version,
            });
        }
        if let Some(dup) = manifest.duplicate_id() {
            return Err(ProfileError::DuplicateLayer(dup.clone()));
        }

        tracing::debug!(profile = %profile, layers = manifest.layers.len(), "profile package loaded");
        Ok(Self {
            root,
            profile,
            manifest,
        })
    }

    pub fn manifest(&self) -> &LayerManifest {
        &self.manifest
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &ProfileId {
        &self.profile
    }

    pub fn data_path(&self, layer: &str) -> Option<PathBuf> {
        let entry = self.manifest.entry(layer)?;
        entry.data.as_ref().map(|p| self.root.join(p))
    }
}
