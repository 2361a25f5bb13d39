//! Bag-of-words classifier - features, model and prediction
//!
//! The smart tier scores text with a TF-IDF vectorizer over a mixed
//! word/character-n-gram feature string and an online logistic classifier
//! trained by SGD on log-loss. Both artifacts are persisted per profile
//! (`vectorizer.bin`, `model.bin`) and loaded through a process-wide cache
//! invalidated by artifact mtime.
//!
//! # Feature string
//!
//! Word tokens come from a light segmenter: alphanumeric runs are words,
//! CJK runs split into single-character tokens (character n-grams carry the
//! CJK signal that a dictionary segmenter would otherwise provide). With
//! `use_char_ngram` the string additionally contains every character bigram
//! and trigram of the raw text. Tokens are space-joined; the vectorizer
//! treats the result as a plain token sequence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::memory_guard::TrackedCache;
use crate::moderation::smart::profile::ModerationProfile;

/// Cached models before FIFO eviction
const MAX_CACHED_MODELS: usize = 100;

// ============================================================================
// Tokenization
// ============================================================================

/// Whether a character belongs to a CJK script that has no word boundaries
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'        // CJK unified ideographs
        | '\u{3400}'..='\u{4dbf}'      // extension A
        | '\u{3040}'..='\u{30ff}'      // hiragana + katakana
        | '\u{ac00}'..='\u{d7af}'      // hangul syllables
    )
}

/// Split text into word-level tokens: lowercased alphanumeric runs, with
/// CJK characters emitted one token each.
fn word_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Build the vectorizer input: word tokens plus optional character bi- and
/// trigrams of the raw text, space-joined.
pub fn tokenize_for_bow(text: &str, use_char_ngram: bool) -> String {
    let mut tokens = word_tokens(text);

    if use_char_ngram {
        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(2) {
            tokens.push(window.iter().collect());
        }
        for window in chars.windows(3) {
            tokens.push(window.iter().collect());
        }
    }

    tokens.join(" ")
}

// ============================================================================
// TF-IDF vectorizer
// ============================================================================

/// Sparse feature vector as (index, weight) pairs, l2-normalized
pub type SparseVector = Vec<(usize, f64)>;

/// TF-IDF vectorizer with a capped vocabulary.
///
/// `fit` establishes the vocabulary from the first training batch and
/// freezes it; later batches and predictions only `transform`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    pub vocabulary: HashMap<String, usize>,
    pub idf: Vec<f64>,
    pub max_features: usize,
    /// Word n-gram range over the token sequence, inclusive
    pub ngram_range: (usize, usize),
}

impl TfidfVectorizer {
    pub fn new(max_features: usize, ngram_range: (usize, usize)) -> Self {
        Self {
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            max_features,
            ngram_range,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.vocabulary.len()
    }

    /// All n-grams of a document's token sequence within the configured range
    fn ngrams(&self, doc: &str) -> Vec<String> {
        let tokens: Vec<&str> = doc.split_whitespace().collect();
        let (lo, hi) = self.ngram_range;
        let mut grams = Vec::new();
        for n in lo..=hi {
            if n == 0 || tokens.len() < n {
                continue;
            }
            for window in tokens.windows(n) {
                grams.push(window.join(" "));
            }
        }
        grams
    }

    /// Build the vocabulary and IDF table from a document batch.
    ///
    /// Terms must appear in at least 2 documents (`min_df`) and at most 80%
    /// of them (`max_df`); the vocabulary is capped at `max_features` by
    /// total term count and ordered alphabetically for determinism.
    pub fn fit(&mut self, docs: &[String]) {
        let n_docs = docs.len();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_count: HashMap<String, usize> = HashMap::new();

        for doc in docs {
            let grams = self.ngrams(doc);
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for gram in &grams {
                *seen.entry(gram.as_str()).or_insert(0) += 1;
            }
            for (gram, count) in seen {
                *doc_freq.entry(gram.to_string()).or_insert(0) += 1;
                *term_count.entry(gram.to_string()).or_insert(0) += count;
            }
        }

        let min_df = 2usize.min(n_docs.max(1));
        let max_df = (0.8 * n_docs as f64).floor() as usize;

        let mut kept: Vec<(String, usize)> = doc_freq
            .iter()
            .filter(|(_, &df)| df >= min_df && df <= max_df.max(min_df))
            .map(|(term, _)| (term.clone(), term_count[term]))
            .collect();

        // Cap by corpus frequency, then order alphabetically
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        kept.truncate(self.max_features);
        kept.sort_by(|a, b| a.0.cmp(&b.0));

        self.vocabulary = kept
            .iter()
            .enumerate()
            .map(|(i, (term, _))| (term.clone(), i))
            .collect();

        // Smoothed IDF: ln((1 + n) / (1 + df)) + 1
        self.idf = vec![0.0; self.vocabulary.len()];
        for (term, &index) in &self.vocabulary {
            let df = doc_freq.get(term).copied().unwrap_or(0);
            self.idf[index] = (((1 + n_docs) as f64) / ((1 + df) as f64)).ln() + 1.0;
        }
    }

    /// Map a document onto the frozen vocabulary
    pub fn transform(&self, doc: &str) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for gram in self.ngrams(doc) {
            if let Some(&index) = self.vocabulary.get(&gram) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(index, tf)| (index, tf * self.idf[index]))
            .collect();

        let norm: f64 = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in vector.iter_mut() {
                *w /= norm;
            }
        }
        vector.sort_by_key(|(index, _)| *index);
        vector
    }
}

// ============================================================================
// Online logistic classifier
// ============================================================================

/// Logistic regression trained by SGD on log-loss over sparse inputs.
///
/// Class weighting is balanced per batch so rare violation labels still
/// move the boundary. Updates are deterministic; randomness lives only in
/// the trainer's sample shuffle.
#[derive(Debug, Serialize, Deserialize)]
pub struct SgdLogistic {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Base learning rate
    pub eta0: f64,
    /// L2 regularization strength
    pub alpha: f64,
    /// Total updates applied, drives the learning-rate decay
    pub updates: u64,
}

impl SgdLogistic {
    pub fn new(n_features: usize) -> Self {
        Self {
            weights: vec![0.0; n_features],
            bias: 0.0,
            eta0: 0.1,
            alpha: 1e-4,
            updates: 0,
        }
    }

    fn sigmoid(z: f64) -> f64 {
        1.0 / (1.0 + (-z).exp())
    }

    /// Probability of class 1 (violation)
    pub fn predict_proba(&self, x: &SparseVector) -> f64 {
        let z: f64 = x
            .iter()
            .map(|(index, w)| w * self.weights.get(*index).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.bias;
        Self::sigmoid(z)
    }

    /// One incremental pass over a batch. Labels are 0/1; the class set is
    /// fixed, so batches may be single-class.
    pub fn partial_fit(&mut self, batch: &[(SparseVector, u8)]) {
        if batch.is_empty() {
            return;
        }

        // Balanced class weights: n / (2 * count(class))
        let n = batch.len() as f64;
        let positives = batch.iter().filter(|(_, y)| *y == 1).count() as f64;
        let negatives = n - positives;
        let weight_pos = if positives > 0.0 { n / (2.0 * positives) } else { 1.0 };
        let weight_neg = if negatives > 0.0 { n / (2.0 * negatives) } else { 1.0 };

        for (x, y) in batch {
            self.updates += 1;
            // Inverse-scaling decay keeps late batches from thrashing the
            // boundary established by early ones
            let eta = self.eta0 / (1.0 + self.eta0 * self.alpha * self.updates as f64);

            let p = self.predict_proba(x);
            let class_weight = if *y == 1 { weight_pos } else { weight_neg };
            let gradient = (p - f64::from(*y)) * class_weight;

            for (index, value) in x {
                let w = &mut self.weights[*index];
                *w -= eta * (gradient * value + self.alpha * *w);
            }
            self.bias -= eta * gradient;
        }
    }
}

// ============================================================================
// Artifact persistence
// ============================================================================

/// Atomically persist a serializable artifact: write to a sibling temp file,
/// then rename over the target.
pub fn save_artifact<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(value).context("Failed to serialize artifact")?;
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, &encoded)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

pub fn load_artifact<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    bincode::deserialize(&raw).with_context(|| format!("Failed to decode {}", path.display()))
}

// ============================================================================
// Model cache
// ============================================================================

struct CachedModel {
    vectorizer: TfidfVectorizer,
    model: SgdLogistic,
    vectorizer_mtime: SystemTime,
    model_mtime: SystemTime,
}

/// Process-wide classifier cache keyed by profile name, invalidated when
/// either artifact's mtime changes.
pub struct ModelCache {
    inner: Mutex<ModelCacheInner>,
}

#[derive(Default)]
struct ModelCacheInner {
    models: HashMap<String, CachedModel>,
    order: Vec<String>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ModelCacheInner::default()),
        }
    }

    /// Predict the violation probability for `text` under a profile's model.
    ///
    /// Fails when the artifacts are missing or unreadable; the caller
    /// decides whether that passes or blocks.
    pub fn predict_proba(&self, profile: &ModerationProfile, text: &str) -> Result<f64> {
        let vec_path = profile.vectorizer_path();
        let model_path = profile.model_path();
        let vec_mtime = mtime_of(&vec_path)?;
        let model_mtime = mtime_of(&model_path)?;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let stale = match inner.models.get(&profile.name) {
            Some(cached) => {
                cached.vectorizer_mtime != vec_mtime || cached.model_mtime != model_mtime
            }
            None => true,
        };

        if stale {
            tracing::debug!("Loading classifier artifacts for profile {}", profile.name);
            let vectorizer: TfidfVectorizer = load_artifact(&vec_path)?;
            let model: SgdLogistic = load_artifact(&model_path)?;

            if !inner.models.contains_key(&profile.name) && inner.models.len() >= MAX_CACHED_MODELS
            {
                if !inner.order.is_empty() {
                    let oldest = inner.order.remove(0);
                    inner.models.remove(&oldest);
                }
            }
            if !inner.models.contains_key(&profile.name) {
                inner.order.push(profile.name.clone());
            }
            inner.models.insert(
                profile.name.clone(),
                CachedModel {
                    vectorizer,
                    model,
                    vectorizer_mtime: vec_mtime,
                    model_mtime,
                },
            );
        }

        let cached = inner
            .models
            .get(&profile.name)
            .context("model cache entry vanished")?;

        let doc = tokenize_for_bow(text, profile.config.bow_training.use_char_ngram);
        let features = cached.vectorizer.transform(&doc);
        Ok(cached.model.predict_proba(&features))
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .models
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedCache for ModelCache {
    fn name(&self) -> &'static str {
        "classifier_models"
    }

    fn estimated_size(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .models
            .values()
            .map(|m| {
                let vocab: usize = m
                    .vectorizer
                    .vocabulary
                    .keys()
                    .map(|k| k.len() + 16)
                    .sum();
                vocab + m.vectorizer.idf.len() * 8 + m.model.weights.len() * 8
            })
            .sum()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.models.clear();
        inner.order.clear();
    }
}

fn mtime_of(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("No artifact at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_tokens_mixed_scripts() {
        assert_eq!(word_tokens("Hello, world!"), vec!["hello", "world"]);
        assert_eq!(word_tokens("真的吗 yes"), vec!["真", "的", "吗", "yes"]);
        assert_eq!(word_tokens("a-b c2"), vec!["a", "b", "c2"]);
    }

    #[test]
    fn test_tokenize_includes_char_ngrams() {
        let joined = tokenize_for_bow("abc", true);
        let tokens: Vec<&str> = joined.split(' ').collect();
        assert!(tokens.contains(&"abc"));
        assert!(tokens.contains(&"ab"));
        assert!(tokens.contains(&"bc"));

        let without = tokenize_for_bow("abc", false);
        assert_eq!(without, "abc");
    }

    fn corpus() -> Vec<String> {
        vec![
            "spam offer buy now".to_string(),
            "spam offer cheap pills".to_string(),
            "hello friend how are you".to_string(),
            "hello there friend".to_string(),
        ]
    }

    #[test]
    fn test_vectorizer_min_df_filters_singletons() {
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 1));
        vectorizer.fit(&corpus());
        // "spam", "offer", "hello", "friend" appear in 2 docs; "pills" in 1
        assert!(vectorizer.vocabulary.contains_key("spam"));
        assert!(vectorizer.vocabulary.contains_key("friend"));
        assert!(!vectorizer.vocabulary.contains_key("pills"));
    }

    #[test]
    fn test_transform_is_l2_normalized() {
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 1));
        vectorizer.fit(&corpus());
        let v = vectorizer.transform("spam offer spam");
        let norm: f64 = v.iter().map(|(_, w)| w * w).sum();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_terms_transform_to_empty() {
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 1));
        vectorizer.fit(&corpus());
        assert!(vectorizer.transform("completely unseen words").is_empty());
    }

    #[test]
    fn test_max_features_cap() {
        let mut vectorizer = TfidfVectorizer::new(2, (1, 1));
        vectorizer.fit(&corpus());
        assert!(vectorizer.feature_count() <= 2);
        assert_eq!(vectorizer.idf.len(), vectorizer.feature_count());
    }

    #[test]
    fn test_classifier_learns_separable_labels() {
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 1));
        let docs = corpus();
        vectorizer.fit(&docs);

        let labels = [1u8, 1, 0, 0];
        let batch: Vec<(SparseVector, u8)> = docs
            .iter()
            .zip(labels)
            .map(|(d, y)| (vectorizer.transform(d), y))
            .collect();

        let mut clf = SgdLogistic::new(vectorizer.feature_count());
        for _ in 0..50 {
            clf.partial_fit(&batch);
        }

        let spam = clf.predict_proba(&vectorizer.transform("spam offer"));
        let ham = clf.predict_proba(&vectorizer.transform("hello friend"));
        assert!(spam > 0.5, "spam scored {}", spam);
        assert!(ham < 0.5, "ham scored {}", ham);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 1));
        let docs = corpus();
        vectorizer.fit(&docs);
        let batch: Vec<(SparseVector, u8)> = docs
            .iter()
            .zip([1u8, 1, 0, 0])
            .map(|(d, y)| (vectorizer.transform(d), y))
            .collect();
        let mut clf = SgdLogistic::new(vectorizer.feature_count());
        clf.partial_fit(&batch);

        let a = clf.predict_proba(&vectorizer.transform("spam offer"));
        let b = clf.predict_proba(&vectorizer.transform("spam offer"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut vectorizer = TfidfVectorizer::new(1000, (1, 2));
        vectorizer.fit(&corpus());

        let path = dir.path().join("vectorizer.bin");
        save_artifact(&vectorizer, &path).unwrap();
        let loaded: TfidfVectorizer = load_artifact(&path).unwrap();
        assert_eq!(loaded.vocabulary, vectorizer.vocabulary);
        assert_eq!(loaded.ngram_range, (1, 2));
    }
}
