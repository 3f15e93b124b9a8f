//! Uploader credentials file.
//!
//! Backend parameters that don't belong on a command line (tokens, site
//! URLs) live in a small JSON file. Resolution order per parameter:
//! explicit CLI flag, then this file, then a built-in default where one
//! exists (PicGo's localhost endpoint). The file is searched in the
//! working directory first, then in `~/.ragprep/`.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "config.json";
const SETTINGS_DIR: &str = ".ragprep";

/// PicGo relay parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicGoSettings {
    pub endpoint: String,
}

/// Generic HTTP endpoint parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub upload_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Parsed settings file. Absent sections mean "resolve from flags or
/// defaults"; only the parameters a selected backend actually needs are
/// validated, at build time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploaderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picgo: Option<PicGoSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointSettings>,
}

impl UploaderSettings {
    /// Load settings from `path`, or from the default search locations.
    ///
    /// An explicitly named file must exist and parse; with no explicit
    /// path, a missing file simply yields empty settings (flags and
    /// defaults may still cover everything a run needs), while a file
    /// that exists but fails to parse is always an error.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        if let Some(path) = path {
            return Self::read_file(path);
        }

        for candidate in Self::default_locations() {
            if candidate.is_file() {
                return Self::read_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(SETTINGS_FILE)];
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join(SETTINGS_DIR).join(SETTINGS_FILE));
        }
        locations
    }

    fn read_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PipelineError::SettingsRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| PipelineError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a template settings file for the user to fill in.
    pub fn write_template(path: &Path) -> Result<(), PipelineError> {
        let template = UploaderSettings {
            picgo: Some(PicGoSettings {
                endpoint: "http://127.0.0.1:36677".into(),
            }),
            endpoint: Some(EndpointSettings {
                upload_url: "https://images.example.com/upload".into(),
                public_base: Some("https://images.example.com".into()),
                auth_token: Some("replace-me".into()),
            }),
        };
        let json = serde_json::to_string_pretty(&template)
            .map_err(|e| PipelineError::Internal(format!("template serialisation: {e}")))?;
        std::fs::write(path, json).map_err(|source| PipelineError::LogWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = UploaderSettings::load(Some(Path::new("/no/such/config.json"))).unwrap_err();
        assert!(matches!(err, PipelineError::SettingsRead { .. }));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = UploaderSettings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, PipelineError::SettingsParse { .. }));
    }

    #[test]
    fn sections_are_optional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"picgo": {"endpoint": "http://127.0.0.1:36677"}}"#).unwrap();
        let settings = UploaderSettings::load(Some(&path)).unwrap();
        assert!(settings.picgo.is_some());
        assert!(settings.endpoint.is_none());
    }

    #[test]
    fn template_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        UploaderSettings::write_template(&path).unwrap();
        let settings = UploaderSettings::load(Some(&path)).unwrap();
        assert!(settings.picgo.is_some());
        assert_eq!(
            settings.endpoint.unwrap().public_base.as_deref(),
            Some("https://images.example.com")
        );
    }
}
