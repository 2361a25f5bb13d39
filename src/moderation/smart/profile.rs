//! Moderation profiles
//!
//! A profile is a named directory holding everything one moderation policy
//! needs: `profile.json` (thresholds and training limits), `history.db`
//! (the sample store) and the classifier artifacts `vectorizer.bin` /
//! `model.bin`. A missing or partial `profile.json` falls back to defaults
//! field by field.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Decision thresholds for the classifier probability
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbabilityConfig {
    /// Below this the request passes outright
    pub low_risk_threshold: f64,
    /// Above this the request is blocked
    pub high_risk_threshold: f64,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            low_risk_threshold: 0.3,
            high_risk_threshold: 0.8,
        }
    }
}

/// Training limits and feature extraction settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Training aborts below this sample count
    pub min_samples: usize,
    /// At most this many recent samples participate per run
    pub max_samples: usize,
    /// Incremental update batch size
    pub batch_size: usize,
    /// Wall-clock training budget in seconds
    pub max_seconds: u64,
    /// The store is trimmed oldest-first to this many rows before training
    pub max_db_items: usize,
    /// Vocabulary cap
    pub max_features: usize,
    /// Mix character bi/tri-grams into the feature string
    pub use_char_ngram: bool,
    /// Build word n-grams over the token sequence
    pub use_word_ngram: bool,
    /// Word n-gram range, inclusive
    pub word_ngram_range: (usize, usize),
    /// A model older than this is eligible for retraining
    pub retrain_interval_minutes: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            max_samples: 20_000,
            batch_size: 1_000,
            max_seconds: 300,
            max_db_items: 100_000,
            max_features: 50_000,
            use_char_ngram: true,
            use_word_ngram: false,
            word_ngram_range: (1, 2),
            retrain_interval_minutes: 60,
        }
    }
}

/// Parsed `profile.json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub probability: ProbabilityConfig,
    pub bow_training: TrainingConfig,
}

/// A moderation profile: its name, directory and configuration
#[derive(Debug, Clone)]
pub struct ModerationProfile {
    pub name: String,
    pub dir: PathBuf,
    pub config: ProfileConfig,
}

impl ModerationProfile {
    /// Load a profile from `<base>/<name>/`. The directory is created if
    /// absent; a missing `profile.json` yields defaults.
    pub fn load(base: &Path, name: &str) -> Result<Self> {
        let dir = base.join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create profile directory {}", dir.display()))?;

        let config_path = dir.join("profile.json");
        let config = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            ProfileConfig::default()
        };

        Ok(Self {
            name: name.to_string(),
            dir,
            config,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join("history.db")
    }

    pub fn vectorizer_path(&self) -> PathBuf {
        self.dir.join("vectorizer.bin")
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join("model.bin")
    }

    /// Both artifacts exist; `model.bin` alone is never published without
    /// its paired vectorizer.
    pub fn model_exists(&self) -> bool {
        self.model_path().exists() && self.vectorizer_path().exists()
    }
}

/// Enumerate profile names under a base directory: every subdirectory with a
/// `profile.json`.
pub fn list_profiles(base: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(base) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| e.path().join("profile.json").exists())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}
