use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-adapter fallback policy.
///
/// All flags default to `false`: an adapter that does not opt in never
/// pulls rows into memory and never post-processes a query it cannot
/// translate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOptions {
    /// Terminal hooks may evaluate the native query and finish in memory.
    pub allow_in_memory_evaluation: bool,
    /// Untranslatable chainable operators may run in memory after the
    /// translated prefix.
    pub allow_implicit_post_processing: bool,
    /// Like `allow_implicit_post_processing`, but also required when the
    /// refusing translator was a generic default translator.
    pub allow_implicit_default_post_processing: bool,
}

impl AdapterOptions {
    /// Every fallback allowed.
    pub fn permissive() -> Self {
        Self {
            allow_in_memory_evaluation: true,
            allow_implicit_post_processing: true,
            allow_implicit_default_post_processing: true,
        }
    }

    pub fn with_in_memory_evaluation(mut self, allow: bool) -> Self {
        self.allow_in_memory_evaluation = allow;
        self
    }

    pub fn with_implicit_post_processing(mut self, allow: bool) -> Self {
        self.allow_implicit_post_processing = allow;
        self
    }

    pub fn with_implicit_default_post_processing(mut self, allow: bool) -> Self {
        self.allow_implicit_default_post_processing = allow;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: OptionsFile = toml::from_str(content).context("Failed to parse adapter options")?;
        Ok(file.adapter)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = OptionsFile {
            adapter: self.clone(),
        };
        toml::to_string_pretty(&file).context("Failed to serialize adapter options")
    }

    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("asyncquery")
            .join("adapter.toml")
    }

    /// Loads options from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&Self::get_config_path())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OptionsFile {
    #[serde(default)]
    adapter: AdapterOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_strict() {
        let options = AdapterOptions::default();
        assert!(!options.allow_in_memory_evaluation);
        assert!(!options.allow_implicit_post_processing);
        assert!(!options.allow_implicit_default_post_processing);
    }

    #[test]
    fn test_parse_partial_file() {
        let options = AdapterOptions::from_toml_str(
            "[adapter]\nallow_implicit_post_processing = true\n",
        )
        .unwrap();
        assert!(options.allow_implicit_post_processing);
        assert!(!options.allow_in_memory_evaluation);
    }

    #[test]
    fn test_parse_empty_file() {
        assert_eq!(
            AdapterOptions::from_toml_str("").unwrap(),
            AdapterOptions::default()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("adapter.toml");
        let options = AdapterOptions::default().with_in_memory_evaluation(true);
        options.save(&path).unwrap();
        assert_eq!(AdapterOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let options = AdapterOptions::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(options, AdapterOptions::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let invalid = "[adapter]\nallow_in_memory_evaluation = 3";
        assert!(AdapterOptions::from_toml_str(invalid).is_err());
    }
}
