use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment prefix for overrides, e.g. `QUANTAI__SIZING__MAX_POSITION=0.1`.
pub const ENV_PREFIX: &str = "QUANTAI";
pub const DEFAULT_CONFIG_FILE: &str = "quantai.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub regime: RegimeSettings,
    pub boosting: BoostingSettings,
    pub linear: LinearSettings,
    pub sizing: SizingSettings,
    pub ai: AiSettings,
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            regime: RegimeSettings::default(),
            boosting: BoostingSettings::default(),
            linear: LinearSettings::default(),
            sizing: SizingSettings::default(),
            ai: AiSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    /// Layer defaults, an optional TOML file and `QUANTAI__*` environment
    /// variables, in that order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut settings: Settings = ::config::Config::builder()
            .add_source(::config::File::from(file).required(path.is_some()))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.ai.api_key.is_none() {
            settings.ai.api_key = std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty());
        }

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.general.lookback_days < 60 {
            errors.push("lookback_days must be >= 60".to_string());
        }
        if self.general.test_fraction <= 0.0 || self.general.test_fraction >= 1.0 {
            errors.push("test_fraction must be between 0 and 1".to_string());
        }

        if self.regime.n_regimes < 2 {
            errors.push("regime: n_regimes must be >= 2".to_string());
        }
        if self.regime.max_iter == 0 {
            errors.push("regime: max_iter must be > 0".to_string());
        }
        if self.regime.tol <= 0.0 {
            errors.push("regime: tol must be > 0".to_string());
        }

        if self.boosting.max_iter == 0 {
            errors.push("boosting: max_iter must be > 0".to_string());
        }
        if self.boosting.max_depth == 0 {
            errors.push("boosting: max_depth must be > 0".to_string());
        }
        if self.boosting.learning_rate <= 0.0 || self.boosting.learning_rate > 1.0 {
            errors.push("boosting: learning_rate must be between 0 and 1".to_string());
        }
        if !(0.0..1.0).contains(&self.boosting.validation_fraction) {
            errors.push("boosting: validation_fraction must be in [0, 1)".to_string());
        }

        if self.linear.alpha <= 0.0 {
            errors.push("linear: alpha must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.linear.l1_ratio) {
            errors.push("linear: l1_ratio must be between 0 and 1".to_string());
        }
        if self.linear.max_epochs == 0 {
            errors.push("linear: max_epochs must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.linear.validation_fraction) {
            errors.push("linear: validation_fraction must be in [0, 1)".to_string());
        }

        if self.sizing.max_position <= 0.0 || self.sizing.max_position > 1.0 {
            errors.push("sizing: max_position must be between 0 and 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub lookback_days: u32,
    pub test_fraction: f64,
    pub logs_dir: PathBuf,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            lookback_days: 252,
            test_fraction: 0.2,
            logs_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    pub n_regimes: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            n_regimes: 3,
            max_iter: 500,
            tol: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingSettings {
    pub max_iter: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
    pub l2_regularization: f64,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for BoostingSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            max_depth: 5,
            learning_rate: 0.1,
            min_samples_leaf: 20,
            l2_regularization: 0.0,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            tol: 1e-7,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSettings {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub max_epochs: usize,
    pub tol: f64,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for LinearSettings {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            l1_ratio: 0.5,
            max_epochs: 2000,
            tol: 1e-4,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingSettings {
    pub max_position: f64,
}

impl Default for SizingSettings {
    fn default() -> Self {
        Self { max_position: 0.25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub enabled: bool,
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: "sqlite:trade_history.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.general.lookback_days, 252);
        assert_eq!(settings.regime.n_regimes, 3);
        assert_eq!(settings.sizing.max_position, 0.25);
        assert_eq!(settings.ai.model, "llama-3.1-8b-instant");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut settings = Settings::default();
        settings.regime.n_regimes = 1;
        settings.sizing.max_position = 1.5;
        settings.linear.l1_ratio = 2.0;

        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("n_regimes")));
        assert!(errors.iter().any(|e| e.contains("max_position")));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [regime]
            n_regimes = 4

            [sizing]
            max_position = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(settings.regime.n_regimes, 4);
        assert_eq!(settings.regime.max_iter, 500);
        assert_eq!(settings.sizing.max_position, 0.1);
        assert_eq!(settings.boosting.max_depth, 5);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.linear.max_epochs, 2000);
    }
}
