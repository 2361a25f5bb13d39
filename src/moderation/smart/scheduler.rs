//! Training scheduler - periodic retraining across profiles
//!
//! A long-lived background task. Each tick enumerates the profile
//! directories and trains every eligible profile, sequentially, so peak
//! memory stays bounded to one training run. A profile is eligible when it
//! has enough samples and either no model exists yet or the model is older
//! than its retrain interval. Failures are logged and do not affect other
//! profiles.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::moderation::smart::profile::{list_profiles, ModerationProfile};
use crate::moderation::smart::storage::SampleStore;
use crate::moderation::smart::train::train_profile;

/// Decide whether a profile should retrain this tick.
pub fn should_train(profile: &ModerationProfile) -> bool {
    let Ok(store) = SampleStore::open(&profile.db_path()) else {
        return false;
    };
    let Ok(count) = store.count() else {
        return false;
    };
    if count < profile.config.bow_training.min_samples {
        return false;
    }

    if !profile.model_exists() {
        return true;
    }

    let interval = Duration::from_secs(profile.config.bow_training.retrain_interval_minutes * 60);
    let model_age = std::fs::metadata(profile.model_path())
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());

    match model_age {
        Some(age) => age > interval,
        // Unreadable mtime: retrain rather than let the model go stale
        None => true,
    }
}

/// One scheduler pass: train every eligible profile, one at a time.
async fn train_all_profiles(base: &Path) {
    let profiles = list_profiles(base);
    if profiles.is_empty() {
        tracing::debug!("Scheduler found no profiles under {}", base.display());
        return;
    }

    tracing::debug!("Scheduler scanning {} profile(s)", profiles.len());

    for name in profiles {
        let profile = match ModerationProfile::load(base, &name) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!("Failed to load profile {}: {:#}", name, e);
                continue;
            }
        };

        if !should_train(&profile) {
            tracing::debug!("Skipping training for {}", name);
            continue;
        }

        tracing::info!("Scheduler training profile {}", name);
        // Training blocks on CPU and disk; keep it off the serving workers
        let result = tokio::task::spawn_blocking(move || train_profile(&profile)).await;
        match result {
            Ok(Ok(outcome)) => tracing::info!("Training finished for {}: {:?}", name, outcome),
            Ok(Err(e)) => tracing::error!("Training failed for {}: {:#}", name, e),
            Err(e) => tracing::error!("Training task panicked for {}: {}", name, e),
        }
    }
}

/// Spawn the scheduler loop. It ticks every `interval` until `shutdown`
/// flips to true; training already in flight finishes its current profile.
pub fn spawn_scheduler(
    profiles_dir: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Training scheduler started (interval: {}s, profiles: {})",
            interval.as_secs(),
            profiles_dir.display()
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    tracing::debug!(
                        "Scheduler tick at {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
                    );
                    train_all_profiles(&profiles_dir).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Training scheduler stopped");
    })
}
