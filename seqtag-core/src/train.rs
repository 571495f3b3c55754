//! Averaged perceptron training.
//!
//! Per spec, logical time `t` advances once per TRAINING SENTENCE, not
//! once per token: every feature update fired while processing one
//! sentence is stamped with the same `t`. Each sentence is first
//! decoded in full with the current (non-averaged) weights; if the
//! decoded label sequence already matches gold, nothing is updated.
//! Otherwise two full-sentence weight adjustments are made — one adding
//! the features fired under the GOLD label history, one subtracting the
//! features fired under the PREDICTED label history — mirroring
//! `train_sequence`/`adjust_weights` in the source this crate is built
//! against (`examples/original_source/pefselab/c/search.c`).
//!
//! Averaging is lazy: instead of summing the full weight vector after
//! every single-feature update (an O(weights_len) operation that would
//! dominate training time), each weight slot tracks the step index it
//! was last touched at. A slot is only "caught up" — its running total
//! advanced by `weight * steps_since_last_touch` — when it is touched
//! again, or when the caller asks for a snapshot.

use std::marker::PhantomData;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::decode::{beam_search, greedy_search};
use crate::features::{combine, extract_invariants};
use crate::hash::FeatureHash;
use crate::model::WeightVector;
use crate::sentence::Sentence;
use crate::tagset::EDGE_LABEL;

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub seed: u64,
    pub max_epochs: usize,
    /// Epochs without tune-error improvement before stopping early.
    pub max_patience: usize,
    /// 0.0 disables dropout entirely.
    pub dropout_rate: f64,
    pub min_weights_len: usize,
    pub max_weights_len: usize,
    /// Maximum tolerated tune-error regression (as a fraction, e.g.
    /// `0.0025` for 0.25%) from folding the weight vector in half, and
    /// from moving to the next `weights_len` in a sweep.
    pub compression_tolerance: f64,
    /// Beam width used to evaluate tuning error during training and
    /// post-training compression (spec §4.4: "evaluate ... using the
    /// beam decoder"). The inner training loop itself always decodes
    /// greedily, for speed.
    pub tune_beam_width: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            seed: 0,
            max_epochs: 20,
            max_patience: 5,
            dropout_rate: 0.0,
            min_weights_len: 1 << 16,
            max_weights_len: 1 << 22,
            compression_tolerance: 0.0025,
            tune_beam_width: 4,
        }
    }
}

impl TrainConfig {
    /// `(rate * 2^32) as u32`, the integer threshold `FeatureHash::dropout`
    /// compares a mixed hash against.
    fn dropout_constant(&self) -> u32 {
        (self.dropout_rate * 4294967296.0) as u32
    }
}

struct LazyAveraged {
    weights: Vec<f32>,
    totals: Vec<f64>,
    last_touch: Vec<u32>,
}

impl LazyAveraged {
    fn new(len: usize) -> Self {
        LazyAveraged { weights: vec![0.0; len], totals: vec![0.0; len], last_touch: vec![0; len] }
    }

    fn add(&mut self, index: usize, delta: f32, t: u32) {
        let elapsed = (t - self.last_touch[index]) as f64;
        self.totals[index] += self.weights[index] as f64 * elapsed;
        self.weights[index] += delta;
        self.last_touch[index] = t;
    }

    /// Averaged weights as of step `t`, without mutating `self`.
    fn snapshot(&self, t: usize) -> WeightVector {
        let mut out = vec![0.0f32; self.weights.len()];
        if t == 0 {
            return WeightVector::from_raw(out);
        }
        for i in 0..self.weights.len() {
            let elapsed = (t as u32 - self.last_touch[i]) as f64;
            let total = self.totals[i] + self.weights[i] as f64 * elapsed;
            out[i] = (total / t as f64) as f32;
        }
        WeightVector::from_raw(out)
    }
}

/// Fraction of tokens whose beam-decoded label disagrees with gold.
/// `beam_width == 1` makes this identical to greedy decoding.
pub fn token_error_rate<H: FeatureHash>(
    weights: &WeightVector,
    sentences: &[Sentence],
    beam_width: usize,
) -> f64 {
    let mut wrong = 0usize;
    let mut total = 0usize;
    for sentence in sentences {
        let predicted = beam_search::<H>(weights.as_slice(), sentence, beam_width.max(1), None);
        let gold = sentence.gold_labels();
        total += gold.len();
        wrong += predicted.iter().zip(gold.iter()).filter(|(p, g)| p != g).count();
    }
    if total == 0 {
        0.0
    } else {
        wrong as f64 / total as f64
    }
}

/// Update every feature fired by `labels` over `sentence`, with the
/// label history taken from `labels` itself (not gold), at a single
/// logical time `t` shared by every position in the sentence.
fn adjust_weights<H: FeatureHash>(
    lazy: &mut LazyAveraged,
    invariants: &[Vec<H>],
    labels: &[u8],
    delta: f32,
    t: u32,
    weights_len: usize,
    dropout: Option<(H, u32)>,
) {
    for (i, inv) in invariants.iter().enumerate() {
        let cur = labels[i];
        let prev1 = if i >= 1 { labels[i - 1] } else { EDGE_LABEL };
        let prev2 = if i >= 2 { labels[i - 2] } else { EDGE_LABEL };
        for f in combine(inv, cur, prev1, prev2) {
            if let Some((seed, constant)) = dropout {
                if f.dropout(seed, constant) {
                    continue;
                }
            }
            lazy.add(f.index(weights_len), delta, t);
        }
    }
}

pub struct Trainer<H: FeatureHash> {
    config: TrainConfig,
    _hash: PhantomData<H>,
}

impl<H: FeatureHash> Trainer<H> {
    pub fn new(config: TrainConfig) -> Self {
        Trainer { config, _hash: PhantomData }
    }

    /// Train a single weight vector of the given length, with dev-set
    /// early stopping and a post-training compression attempt. Returns
    /// the final (possibly folded) weight vector.
    pub fn train(&self, train: &[Sentence], tune: &[Sentence], weights_len: usize) -> WeightVector {
        self.train_inner(train, tune, weights_len, None).0
    }

    /// As [`Trainer::train`], but also returns the tune error rate
    /// achieved by the returned vector, for the sweep's early-exit
    /// comparison against the best error seen across all `weights_len`.
    ///
    /// When `model_path` is given, the snapshot is written to disk
    /// immediately on every new best tune error (spec §4.4 step (e):
    /// "the on-disk model always reflects the best model seen"), so a
    /// crash mid-sweep still leaves a usable model rather than nothing.
    /// A write failure is logged and otherwise ignored — training keeps
    /// going on the in-memory weights regardless.
    fn train_inner(
        &self,
        train: &[Sentence],
        tune: &[Sentence],
        weights_len: usize,
        model_path: Option<&Path>,
    ) -> (WeightVector, f64) {
        assert!(weights_len.is_power_of_two());
        let mut lazy = LazyAveraged::new(weights_len);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let mut t: usize = 0;
        let mut best_error = 1.0f64;
        let mut tune_error_avg = 1.0f64;
        let mut patience_left = self.config.max_patience;
        let mut best_weights = lazy.snapshot(0);
        let dropout_constant = self.config.dropout_constant();

        for epoch in 0..self.config.max_epochs {
            order.shuffle(&mut rng);
            // dropout_seed advances once per sentence (spec §9), giving a
            // distinct dropout mask per sentence per epoch rather than a
            // single mask for the whole epoch.
            let mut dropout_seed: u64 = self.config.seed.wrapping_add(epoch as u64).wrapping_mul(2654435761);
            let mut n_errs = 0usize;
            let mut n_total = 0usize;

            for &idx in &order {
                let sentence = &train[idx];
                let gold = sentence.gold_labels();
                n_total += sentence.len();

                let dropout = if self.config.dropout_rate > 0.0 {
                    Some((H::from_salt(dropout_seed), dropout_constant))
                } else {
                    None
                };

                let predicted = greedy_search::<H>(&lazy.weights, sentence, dropout);
                if predicted != gold {
                    n_errs += predicted.iter().zip(&gold).filter(|(p, g)| *p != g).count();
                    let invariants: Vec<Vec<H>> = sentence.rows.iter().map(extract_invariants).collect();
                    adjust_weights(&mut lazy, &invariants, &gold, 1.0, t as u32, weights_len, dropout);
                    adjust_weights(&mut lazy, &invariants, &predicted, -1.0, t as u32, weights_len, dropout);
                }

                t += 1;
                dropout_seed = dropout_seed.wrapping_add(1);
            }

            debug!(
                epoch,
                train_error = n_errs as f64 / n_total.max(1) as f64,
                "training error after epoch"
            );

            let snapshot = lazy.snapshot(t);
            let tune_error = token_error_rate::<H>(&snapshot, tune, self.config.tune_beam_width);
            info!(epoch, tune_error, "tune error after epoch");

            if tune_error < best_error {
                best_error = tune_error;
                if let Some(path) = model_path {
                    match snapshot.write(path) {
                        Ok(()) => info!(epoch, tune_error, "persisted new best model snapshot"),
                        Err(err) => {
                            tracing::warn!(epoch, error = %err, "failed to persist improved model snapshot")
                        }
                    }
                }
                best_weights = snapshot;
                patience_left = self.config.max_patience;
            }

            if epoch == 0 {
                tune_error_avg = tune_error;
            } else {
                if tune_error > 0.99 * tune_error_avg {
                    patience_left -= 1;
                    if patience_left == 0 {
                        info!(epoch, best_error, "stopping early: patience exhausted");
                        break;
                    }
                }
                tune_error_avg = tune_error_avg * 0.5 + tune_error * 0.5;
            }
        }

        // Post-training compression: keep folding the vector in half as
        // long as tune error stays within `compression_tolerance` of the
        // best error achieved during training. That bound (`fold_threshold`)
        // is fixed at the pre-compression `best_error` and never tightened
        // by a previously accepted fold — tightening it after each fold
        // would reject folds this same tolerance would otherwise accept.
        let fold_threshold = best_error;
        let mut current = best_weights;
        let mut current_error = best_error;
        while current.len() > 1 {
            let folded = current.fold();
            let folded_error = token_error_rate::<H>(&folded, tune, self.config.tune_beam_width);
            if folded_error <= fold_threshold * (1.0 + self.config.compression_tolerance) {
                info!(folded_len = folded.len(), folded_error, "accepting folded weight vector");
                current = folded;
                current_error = folded_error;
            } else {
                info!(rejected_len = folded.len(), folded_error, "rejecting folded weight vector");
                break;
            }
        }

        (current, current_error)
    }

    /// Sweep `weights_len` across `min_weights_len..=max_weights_len`
    /// (powers of two), keeping whichever trained (and possibly folded)
    /// model has the lowest tune error. Exits early once a new
    /// `weights_len` fails to improve on the best error seen so far by
    /// more than `compression_tolerance`.
    ///
    /// `model_path`, when given, is forwarded to every `weights_len`
    /// trial so the file on disk is kept up to date with that trial's
    /// best snapshot as training proceeds (see [`Trainer::train_inner`]).
    /// The caller is still responsible for a final write of whichever
    /// candidate the sweep ultimately returns, since an early-exiting
    /// later trial can leave the file holding a worse candidate than the
    /// one this function returns.
    pub fn train_with_sweep(
        &self,
        train: &[Sentence],
        tune: &[Sentence],
        model_path: Option<&Path>,
    ) -> (WeightVector, usize) {
        let mut best_overall: Option<(WeightVector, f64)> = None;
        let mut best_error_ever = 1.0f64;
        let mut len = self.config.min_weights_len;

        while len <= self.config.max_weights_len {
            let (weights, error) = self.train_inner(train, tune, len, model_path);
            info!(weights_len = len, final_len = weights.len(), error, "sweep candidate");

            let stop = error > best_error_ever * (1.0 + self.config.compression_tolerance);
            if error < best_error_ever || best_overall.is_none() {
                best_error_ever = best_error_ever.min(error);
                best_overall = Some((weights, error));
            }
            if stop {
                info!(weights_len = len, "sweep stopping: no further improvement within tolerance");
                break;
            }
            len *= 2;
        }

        let (weights, _) = best_overall.expect("sweep range must be non-empty");
        let final_len = weights.len();
        (weights, final_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::TokenRow;

    fn tiny_corpus() -> Vec<Sentence> {
        vec![
            Sentence::new(vec![
                TokenRow::new(vec!["Anna".into(), "anna".into()], Some(1)),
                TokenRow::new(vec!["went".into(), "went".into()], Some(0)),
                TokenRow::new(vec!["home".into(), "home".into()], Some(0)),
            ]),
            Sentence::new(vec![
                TokenRow::new(vec!["Bob".into(), "bob".into()], Some(1)),
                TokenRow::new(vec!["ran".into(), "ran".into()], Some(0)),
            ]),
        ]
    }

    #[test]
    fn training_reduces_tune_error_from_zero_weights() {
        let corpus = tiny_corpus();
        let config = TrainConfig {
            max_epochs: 10,
            min_weights_len: 1 << 12,
            max_weights_len: 1 << 12,
            ..Default::default()
        };
        let trainer: Trainer<u64> = Trainer::new(config);
        let zero = WeightVector::zeroed(1 << 12);
        let baseline_error = token_error_rate::<u64>(&zero, &corpus, 1);

        let trained = trainer.train(&corpus, &corpus, 1 << 12);
        let trained_error = token_error_rate::<u64>(&trained, &corpus, 1);
        assert!(trained_error <= baseline_error);
    }

    #[test]
    fn sweep_returns_a_power_of_two_length() {
        let corpus = tiny_corpus();
        let config = TrainConfig {
            max_epochs: 2,
            min_weights_len: 1 << 8,
            max_weights_len: 1 << 10,
            ..Default::default()
        };
        let trainer: Trainer<u64> = Trainer::new(config);
        let (_weights, len) = trainer.train_with_sweep(&corpus, &corpus, None);
        assert!(len.is_power_of_two());
        assert!(len <= 1 << 10);
    }

    #[test]
    fn same_seed_trains_identical_weights() {
        let corpus = tiny_corpus();
        let config = TrainConfig {
            max_epochs: 3,
            min_weights_len: 1 << 10,
            max_weights_len: 1 << 10,
            seed: 42,
            ..Default::default()
        };
        let a = Trainer::<u64>::new(config.clone()).train(&corpus, &corpus, 1 << 10);
        let b = Trainer::<u64>::new(config).train(&corpus, &corpus, 1 << 10);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn improving_snapshot_is_persisted_mid_training() {
        let corpus = tiny_corpus();
        let config = TrainConfig {
            max_epochs: 10,
            min_weights_len: 1 << 12,
            max_weights_len: 1 << 12,
            ..Default::default()
        };
        let trainer: Trainer<u64> = Trainer::new(config);
        let dir = std::env::temp_dir().join(format!("seqtag-train-persist-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.bin");

        trainer.train_inner(&corpus, &corpus, 1 << 12, Some(&path));
        // Training from zero weights always improves at least once, so
        // the model file must exist and already hold a usable snapshot,
        // even though the function hasn't returned yet.
        let on_disk = WeightVector::read(&path).unwrap();
        assert!(on_disk.len().is_power_of_two());

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn logical_time_advances_once_per_sentence() {
        // Two one-token sentences: after both are processed without a
        // single mid-sentence tick, t must equal 2, not the token count
        // summed some other way. This is exercised indirectly: a weight
        // vector trained on an all-correct-from-the-start corpus (gold
        // always equals the zero-weights prediction) must leave every
        // slot's `last_touch` at 0 and the average equal to zero, which
        // only holds if `t` only ever advances by whole sentences.
        let corpus = vec![
            Sentence::new(vec![TokenRow::new(vec!["x".into(), "x".into()], Some(0))]),
            Sentence::new(vec![TokenRow::new(vec!["y".into(), "y".into()], Some(0))]),
        ];
        let config = TrainConfig {
            max_epochs: 1,
            min_weights_len: 1 << 8,
            max_weights_len: 1 << 8,
            ..Default::default()
        };
        let trainer: Trainer<u64> = Trainer::new(config);
        let trained = trainer.train(&corpus, &corpus, 1 << 8);
        assert!(trained.as_slice().iter().all(|&w| w == 0.0));
    }
}
