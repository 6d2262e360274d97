use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::LoopConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse settings json: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("parse settings json at {field}: {source}")]
    ParseAt {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Application settings. Every field is optional in the JSON form; missing
/// fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameSettings {
    pub title: String,
    pub version: String,
    pub width: u32,
    pub height: u32,
    pub menu_enabled: bool,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            title: "ECS Runtime".to_string(),
            version: "0.1".to_string(),
            width: 1280,
            height: 720,
            menu_enabled: false,
            loop_config: LoopConfig::default(),
        }
    }
}

impl GameSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            let field = error.path().to_string();
            let source = error.into_inner();
            if field.is_empty() || field == "." {
                SettingsError::Parse { source }
            } else {
                SettingsError::ParseAt { field, source }
            }
        })
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;
    use crate::app::{FailurePolicy, Timestep};

    #[test]
    fn missing_fields_keep_defaults() {
        let settings = GameSettings::from_json_str(
            &json!({
                "title": "Breakout",
                "loop": { "timestep": "fixed", "failure_policy": "log_and_continue" }
            })
            .to_string(),
        )
        .expect("settings");

        assert_eq!(settings.title, "Breakout");
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.loop_config.timestep, Timestep::Fixed);
        assert_eq!(
            settings.loop_config.failure_policy,
            FailurePolicy::LogAndContinue
        );
        assert_eq!(settings.loop_config.target_tps, 60);
    }

    #[test]
    fn type_error_names_the_field_path() {
        let error = GameSettings::from_json_str(r#"{ "loop": { "target_tps": "fast" } }"#)
            .expect_err("bad type");

        match &error {
            SettingsError::ParseAt { field, .. } => assert_eq!(field, "loop.target_tps"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(error.to_string().starts_with("parse settings json at loop.target_tps:"));
    }

    #[test]
    fn malformed_document_has_no_field_path() {
        let error = GameSettings::from_json_str("{ not json").expect_err("syntax");

        assert!(matches!(error, SettingsError::Parse { .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "menu_enabled": true, "height": 600 }}"#).expect("write");

        let settings = GameSettings::load(file.path()).expect("load");

        assert!(settings.menu_enabled);
        assert_eq!(settings.height, 600);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");

        let error = GameSettings::load(&path).expect_err("missing");

        assert!(matches!(error, SettingsError::Read { path: ref missing, .. } if *missing == path));
    }
}
