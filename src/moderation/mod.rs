//! Two-tier content moderation
//!
//! Tier one is a keyword prefilter (cheap, file-driven); tier two a
//! self-trained linear classifier. Both run before any upstream call and
//! short-circuit on a block. Every labeled outcome is appended to the
//! profile's sample store so the classifier retrains on live traffic:
//! label 1 on block, label 0 on an explicit smart-tier pass. Uncertain
//! outcomes pass and are logged, but carry no label worth persisting.

pub mod basic;
pub mod smart;

use std::path::Path;

use anyhow::Result;

use crate::config::request::RequestConfig;
use crate::util::preview;
use self::basic::FilterCache;
use self::smart::bow::ModelCache;
use self::smart::profile::ModerationProfile;
use self::smart::storage::SampleStore;
use self::smart::SmartVerdict;

/// Error code for classifier blocks; keyword blocks use the configured
/// `basic_moderation.error_code`
const SMART_BLOCK_CODE: &str = "SMART_MODERATION_BLOCKED";

/// The moderation decision for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Pass,
    Blocked { code: String, reason: String },
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Blocked { .. })
    }
}

/// Run both moderation tiers over the extracted request text.
///
/// Blocking (filesystem, SQLite, classifier math); callers run it on a
/// blocking context. Sample writes complete before this returns, so labeled
/// outcomes are durable before the response is finalized.
pub fn moderate(
    text: &str,
    cfg: &RequestConfig,
    filters: &FilterCache,
    models: &ModelCache,
    profiles_dir: &Path,
) -> Result<Decision> {
    let smart_cfg = &cfg.smart_moderation;

    // Tier one: keyword prefilter
    if let Some(reason) = basic::basic_moderation(text, &cfg.basic_moderation, filters) {
        if smart_cfg.enabled {
            record_sample(profiles_dir, &smart_cfg.profile, text, 1, "keyword");
        }
        return Ok(Decision::Blocked {
            code: cfg.basic_moderation.error_code.clone(),
            reason,
        });
    }

    // Tier two: classifier
    if smart_cfg.enabled {
        let profile = ModerationProfile::load(profiles_dir, &smart_cfg.profile)?;

        if !profile.model_exists() {
            // Nothing trained yet; the scheduler will catch up once samples
            // accumulate from keyword outcomes
            tracing::debug!(
                "Smart moderation enabled but profile {} has no model; passing",
                profile.name
            );
            return Ok(Decision::Pass);
        }

        match smart::smart_predict(text, &profile, models)? {
            SmartVerdict::Block { probability, reason } => {
                tracing::info!(
                    "Smart moderation blocked request (p={:.3}, text: {})",
                    probability,
                    preview(text, 120)
                );
                record_sample(profiles_dir, &smart_cfg.profile, text, 1, "bow");
                return Ok(Decision::Blocked {
                    code: SMART_BLOCK_CODE.to_string(),
                    reason,
                });
            }
            SmartVerdict::Pass { probability } => {
                tracing::debug!("Smart moderation passed request (p={:.3})", probability);
                record_sample(profiles_dir, &smart_cfg.profile, text, 0, "bow");
            }
            SmartVerdict::Uncertain { probability } => {
                tracing::info!(
                    "Smart moderation uncertain (p={:.3}), passing: {}",
                    probability,
                    preview(text, 120)
                );
            }
        }
    }

    Ok(Decision::Pass)
}

/// Append a labeled outcome to the profile's sample store. Failures are
/// logged, not propagated: a full disk must not take serving down.
fn record_sample(profiles_dir: &Path, profile_name: &str, text: &str, label: i64, category: &str) {
    let result = ModerationProfile::load(profiles_dir, profile_name)
        .and_then(|profile| SampleStore::open(&profile.db_path()))
        .and_then(|store| store.append(text, label, Some(category)));
    if let Err(e) = result {
        tracing::error!("Failed to record moderation sample: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::request::{BasicModeration, SmartModeration};

    fn cfg_with_keywords(path: &Path, smart: bool) -> RequestConfig {
        RequestConfig {
            basic_moderation: BasicModeration {
                enabled: true,
                keywords_file: path.to_string_lossy().to_string(),
                error_code: "BASIC_MODERATION_BLOCKED".to_string(),
            },
            smart_moderation: SmartModeration {
                enabled: smart,
                profile: "default".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_keyword_block_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let kw = dir.path().join("kw.txt");
        std::fs::write(&kw, "forbidden\n").unwrap();

        let decision = moderate(
            "this is Forbidden stuff",
            &cfg_with_keywords(&kw, false),
            &FilterCache::new(),
            &ModelCache::new(),
            dir.path(),
        )
        .unwrap();

        assert_eq!(
            decision,
            Decision::Blocked {
                code: "BASIC_MODERATION_BLOCKED".to_string(),
                reason: "[BASIC_MODERATION_BLOCKED] Matched keyword: forbidden".to_string(),
            }
        );
    }

    #[test]
    fn test_clean_text_passes() {
        let dir = tempfile::tempdir().unwrap();
        let kw = dir.path().join("kw.txt");
        std::fs::write(&kw, "forbidden\n").unwrap();

        let decision = moderate(
            "perfectly fine",
            &cfg_with_keywords(&kw, false),
            &FilterCache::new(),
            &ModelCache::new(),
            dir.path(),
        )
        .unwrap();
        assert_eq!(decision, Decision::Pass);
    }

    #[test]
    fn test_keyword_block_records_violation_sample_when_smart_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let kw = dir.path().join("kw.txt");
        std::fs::write(&kw, "forbidden\n").unwrap();

        let decision = moderate(
            "very forbidden",
            &cfg_with_keywords(&kw, true),
            &FilterCache::new(),
            &ModelCache::new(),
            dir.path(),
        )
        .unwrap();
        assert!(decision.is_blocked());

        let profile = ModerationProfile::load(dir.path(), "default").unwrap();
        let store = SampleStore::open(&profile.db_path()).unwrap();
        let sample = store.find_by_text("very forbidden").unwrap().unwrap();
        assert_eq!(sample.label, 1);
        assert_eq!(sample.category.as_deref(), Some("keyword"));
    }

    #[test]
    fn test_smart_without_model_passes() {
        let dir = tempfile::tempdir().unwrap();
        let kw = dir.path().join("kw.txt");
        std::fs::write(&kw, "forbidden\n").unwrap();

        let decision = moderate(
            "nothing wrong here",
            &cfg_with_keywords(&kw, true),
            &FilterCache::new(),
            &ModelCache::new(),
            dir.path(),
        )
        .unwrap();
        assert_eq!(decision, Decision::Pass);
    }

    #[test]
    fn test_disabled_tiers_pass_everything() {
        let dir = tempfile::tempdir().unwrap();
        let decision = moderate(
            "forbidden",
            &RequestConfig::default(),
            &FilterCache::new(),
            &ModelCache::new(),
            dir.path(),
        )
        .unwrap();
        assert_eq!(decision, Decision::Pass);
    }
}
