//! Smart moderation tier - classifier-backed scoring
//!
//! Scores the extracted request text with the profile's bag-of-words model
//! and maps the probability onto three bands: pass below `low`, block above
//! `high`, uncertain in between. The uncertain band passes in this gateway;
//! an AI reviewer is an external collaborator, not a core dependency.

pub mod bow;
pub mod profile;
pub mod scheduler;
pub mod storage;
pub mod train;

use anyhow::Result;

use self::bow::ModelCache;
use self::profile::ModerationProfile;

/// Outcome of a classifier prediction mapped to decision bands
#[derive(Debug, Clone, PartialEq)]
pub enum SmartVerdict {
    /// `p < low`
    Pass { probability: f64 },
    /// `low <= p <= high`
    Uncertain { probability: f64 },
    /// `p > high`
    Block { probability: f64, reason: String },
}

impl SmartVerdict {
    pub fn probability(&self) -> f64 {
        match self {
            SmartVerdict::Pass { probability }
            | SmartVerdict::Uncertain { probability }
            | SmartVerdict::Block { probability, .. } => *probability,
        }
    }
}

/// Score `text` under a profile's model and apply the threshold bands.
pub fn smart_predict(
    text: &str,
    profile: &ModerationProfile,
    models: &ModelCache,
) -> Result<SmartVerdict> {
    let p = models.predict_proba(profile, text)?;
    let low = profile.config.probability.low_risk_threshold;
    let high = profile.config.probability.high_risk_threshold;

    let verdict = if p < low {
        SmartVerdict::Pass { probability: p }
    } else if p > high {
        SmartVerdict::Block {
            probability: p,
            reason: format!("BoW model: high risk (p={:.3} > {})", p, high),
        }
    } else {
        SmartVerdict::Uncertain { probability: p }
    };

    tracing::debug!(
        "Smart moderation verdict for profile {}: {:?}",
        profile.name,
        verdict
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::smart::storage::SampleStore;
    use crate::moderation::smart::train::train_profile;

    /// Train a tiny real model so band mapping runs against actual artifacts
    fn trained_profile(low: f64, high: f64) -> (tempfile::TempDir, ModerationProfile) {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("p")).unwrap();
        std::fs::write(
            base.path().join("p/profile.json"),
            format!(
                r#"{{
                    "probability": {{"low_risk_threshold": {}, "high_risk_threshold": {}}},
                    "bow_training": {{"min_samples": 10, "batch_size": 100, "max_seconds": 30}}
                }}"#,
                low, high
            ),
        )
        .unwrap();
        let profile = ModerationProfile::load(base.path(), "p").unwrap();

        let store = SampleStore::open(&profile.db_path()).unwrap();
        for i in 0..200 {
            if i % 2 == 0 {
                store
                    .append(&format!("spam offer cheap pills {}", i), 1, Some("test"))
                    .unwrap();
            } else {
                store
                    .append(&format!("hello friendly discussion {}", i), 0, Some("test"))
                    .unwrap();
            }
        }
        train_profile(&profile).unwrap();
        (base, profile)
    }

    #[test]
    fn test_bands_follow_thresholds() {
        let (_base, profile) = trained_profile(0.3, 0.8);
        let models = ModelCache::new();

        let spam = smart_predict("spam offer cheap pills 42", &profile, &models).unwrap();
        assert!(matches!(spam, SmartVerdict::Block { .. }), "{:?}", spam);

        let ham = smart_predict("hello friendly discussion 13", &profile, &models).unwrap();
        assert!(
            matches!(ham, SmartVerdict::Pass { .. } | SmartVerdict::Uncertain { .. }),
            "{:?}",
            ham
        );
    }

    #[test]
    fn test_identical_input_is_deterministic() {
        let (_base, profile) = trained_profile(0.3, 0.8);
        let models = ModelCache::new();
        let a = smart_predict("spam offer", &profile, &models).unwrap();
        let b = smart_predict("spam offer", &profile, &models).unwrap();
        assert_eq!(a.probability(), b.probability());
    }

    #[test]
    fn test_extreme_thresholds_force_uncertain() {
        // With low=0.0 nothing passes outright and with high=1.0 nothing
        // blocks, so every probability lands in the uncertain band
        let (_base, profile) = trained_profile(0.0, 1.0);
        let models = ModelCache::new();
        let verdict = smart_predict("spam offer cheap pills 1", &profile, &models).unwrap();
        assert!(matches!(verdict, SmartVerdict::Uncertain { .. }), "{:?}", verdict);
    }

    #[test]
    fn test_missing_artifacts_error() {
        let base = tempfile::tempdir().unwrap();
        let profile = ModerationProfile::load(base.path(), "empty").unwrap();
        let models = ModelCache::new();
        assert!(smart_predict("anything", &profile, &models).is_err());
    }
}
