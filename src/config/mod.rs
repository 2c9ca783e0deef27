use crate::catalog::OperationCatalog;
use crate::models::{CatalogFile, Settings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Prefix of environment variables that override `settings.yaml`
pub const ENV_PREFIX: &str = "OPTRACK";

/// Configuration manager for the settings and operation catalog files.
///
/// Manages two files in the configuration directory:
/// - `settings.yaml`: logging and channel sizing, layered with `OPTRACK_*`
///   environment variables
/// - `operations.yaml`: optional override of the builtin operation catalog
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    catalog_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("settings.yaml"),
            catalog_path: config_dir.join("operations.yaml"),
            config_dir,
        })
    }

    /// Load settings: defaults, then `settings.yaml` if present, then
    /// `OPTRACK_*` environment variables (e.g. `OPTRACK_DEBUG_MODE=true`).
    pub fn load_settings(&self) -> Result<Settings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let defaults = config::Config::try_from(&Settings::default())
            .context("Failed to build default settings")?;

        let settings: Settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::new(self.settings_path.as_str(), config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to load settings from {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.config_dir);
        Ok(settings)
    }

    /// Save settings to `settings.yaml`.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Load the operation catalog.
    ///
    /// # Returns
    /// The catalog from `operations.yaml`, or the builtin catalog if the file
    /// doesn't exist
    pub fn load_catalog(&self) -> Result<OperationCatalog> {
        if !self.catalog_path.exists() {
            tracing::info!(
                "Catalog file not found at {}, using builtin operations",
                self.catalog_path
            );
            return Ok(OperationCatalog::builtin());
        }

        let file_contents = fs::read_to_string(&self.catalog_path)
            .with_context(|| format!("Failed to read catalog: {}", self.catalog_path))?;

        let file: CatalogFile = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse catalog: {}", self.catalog_path))?;

        let catalog = OperationCatalog::try_from(file)
            .with_context(|| format!("Invalid catalog: {}", self.catalog_path))?;

        tracing::info!(
            "Loaded {} operations from {}",
            catalog.len(),
            self.catalog_path
        );
        Ok(catalog)
    }

    /// Save the operation catalog to `operations.yaml`.
    pub fn save_catalog(&self, catalog: &OperationCatalog) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(&CatalogFile::from(catalog))
            .context("Failed to serialize catalog to YAML")?;

        fs::write(&self.catalog_path, yaml_string)
            .with_context(|| format!("Failed to write catalog: {}", self.catalog_path))?;

        tracing::info!("Saved catalog to {}", self.catalog_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();

        let settings = manager.load_settings().unwrap();
        assert_eq!(settings.log_prefix, "optrack");

        let catalog = manager.load_catalog().unwrap();
        assert_eq!(catalog, OperationCatalog::builtin());
    }

    #[test]
    fn test_partial_settings_file_keeps_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(
            manager.config_dir().join("settings.yaml"),
            "log_prefix: custom\nbus_capacity: 32\n",
        )
        .unwrap();

        let settings = manager.load_settings().unwrap();
        assert_eq!(settings.log_prefix, "custom");
        assert_eq!(settings.bus_capacity, 32);
        assert_eq!(settings.log_dir, "logs");
    }

    #[test]
    fn test_invalid_catalog_is_an_error() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(
            manager.config_dir().join("operations.yaml"),
            "Operations:\n  empty:\n    title: Empty\n    steps: {}\n",
        )
        .unwrap();

        let err = manager.load_catalog().unwrap_err();
        assert!(format!("{err:#}").contains("has no steps"));
    }
}
