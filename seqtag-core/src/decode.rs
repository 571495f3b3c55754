//! Scoring and search.
//!
//! Both [`greedy_search`] and [`beam_search`] score label sequences
//! left to right using the current weight vector; neither does a full
//! Viterbi pass, since the feature templates in [`crate::features`]
//! only look back one or two labels (the transition structure a beam
//! can approximate without a DP table over the whole tag set squared).
//! `beam_search` with `beam_width == 1` must produce exactly the same
//! output as `greedy_search` — tie-breaking always prefers the lower
//! tag index, in both searches, so that property holds by construction.

use crate::features::{combine, extract_invariants};
use crate::hash::FeatureHash;
use crate::sentence::Sentence;
use crate::tagset::{EDGE_LABEL, NUM_TAGS};

/// Sum of weights for every surviving feature. Dropout, when enabled,
/// skips a feature whenever `mix(dropout_seed, feature) < dropout_constant`.
pub fn get_score<H: FeatureHash>(weights: &[f32], feats: &[H], dropout: Option<(H, u32)>) -> f32 {
    let mut score = 0.0f32;
    for &f in feats {
        if let Some((seed, constant)) = dropout {
            if f.dropout(seed, constant) {
                continue;
            }
        }
        score += weights[f.index(weights.len())];
    }
    score
}

/// Score every candidate label at position `i` given history
/// `(prev1, prev2)`, returning `(label, score)` pairs in label order.
fn score_labels<H: FeatureHash>(
    weights: &[f32],
    invariants: &[H],
    prev1: u8,
    prev2: u8,
    dropout: Option<(H, u32)>,
) -> Vec<(u8, f32)> {
    (0..NUM_TAGS as u8)
        .map(|label| {
            let feats = combine(invariants, label, prev1, prev2);
            (label, get_score(weights, &feats, dropout))
        })
        .collect()
}

/// Greedy left-to-right decoding: at each position, pick the label
/// with the highest score given the labels already chosen. Ties go to
/// the lower tag index (the first one found, since scores are scanned
/// in ascending label order and only a strictly greater score
/// replaces the incumbent).
pub fn greedy_search<H: FeatureHash>(
    weights: &[f32],
    sentence: &Sentence,
    dropout: Option<(H, u32)>,
) -> Vec<u8> {
    let mut labels = Vec::with_capacity(sentence.len());
    for (i, row) in sentence.rows.iter().enumerate() {
        let invariants: Vec<H> = extract_invariants(row);
        let prev1 = if i >= 1 { labels[i - 1] } else { EDGE_LABEL };
        let prev2 = if i >= 2 { labels[i - 2] } else { EDGE_LABEL };

        let mut best_label = 0u8;
        let mut best_score = f32::NEG_INFINITY;
        for (label, score) in score_labels(weights, &invariants, prev1, prev2, dropout) {
            if score > best_score {
                best_score = score;
                best_label = label;
            }
        }
        labels.push(best_label);
    }
    labels
}

#[derive(Clone)]
struct Hypothesis {
    labels: Vec<u8>,
    score: f32,
}

/// Beam search over the same left-to-right scoring function. Keeps the
/// `beam_width` highest-scoring partial hypotheses at each step.
pub fn beam_search<H: FeatureHash>(
    weights: &[f32],
    sentence: &Sentence,
    beam_width: usize,
    dropout: Option<(H, u32)>,
) -> Vec<u8> {
    assert!(beam_width >= 1);
    let mut beam = vec![Hypothesis { labels: Vec::new(), score: 0.0 }];

    for (i, row) in sentence.rows.iter().enumerate() {
        let invariants: Vec<H> = extract_invariants(row);
        let mut candidates: Vec<Hypothesis> = Vec::with_capacity(beam.len() * NUM_TAGS);

        for hyp in &beam {
            let prev1 = if i >= 1 { hyp.labels[i - 1] } else { EDGE_LABEL };
            let prev2 = if i >= 2 { hyp.labels[i - 2] } else { EDGE_LABEL };
            for (label, step_score) in score_labels(weights, &invariants, prev1, prev2, dropout) {
                let mut labels = hyp.labels.clone();
                labels.push(label);
                candidates.push(Hypothesis { labels, score: hyp.score + step_score });
            }
        }

        // Highest score first; ties broken by lower last label, then
        // lower second-to-last, working backward to position 0 (spec
        // §4.3: "lower last label; then lower second-to-last; then
        // lexicographic").
        candidates.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                for k in (0..=i).rev() {
                    match a.labels[k].cmp(&b.labels[k]) {
                        std::cmp::Ordering::Equal => continue,
                        other => return other,
                    }
                }
                std::cmp::Ordering::Equal
            })
        });
        candidates.truncate(beam_width);
        beam = candidates;
    }

    // `beam` is already sorted best-first (score, then the tie-break
    // above) from the final iteration's ranking step.
    beam.into_iter().next().map(|h| h.labels).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::TokenRow;

    fn toy_sentence() -> Sentence {
        Sentence::new(vec![
            TokenRow::new(vec!["Anna".into(), "anna".into()], Some(1)),
            TokenRow::new(vec!["went".into(), "went".into()], Some(0)),
            TokenRow::new(vec!["home".into(), "home".into()], Some(0)),
        ])
    }

    #[test]
    fn beam_width_one_matches_greedy() {
        let weights = vec![0.3f32; 1 << 12];
        let sentence = toy_sentence();
        let greedy = greedy_search::<u64>(&weights, &sentence, None);
        let beam = beam_search::<u64>(&weights, &sentence, 1, None);
        assert_eq!(greedy, beam);
    }

    #[test]
    fn decoding_produces_one_label_per_token() {
        let weights = vec![0.0f32; 1 << 10];
        let sentence = toy_sentence();
        let labels = greedy_search::<u64>(&weights, &sentence, None);
        assert_eq!(labels.len(), sentence.len());
        for &l in &labels {
            assert!((l as usize) < NUM_TAGS);
        }
    }

    #[test]
    fn beam_search_is_deterministic_across_widths() {
        let mut weights = vec![0.0f32; 1 << 12];
        for (i, w) in weights.iter_mut().enumerate() {
            *w = ((i % 7) as f32 - 3.0) * 0.1;
        }
        let sentence = toy_sentence();

        for width in [1, 2, 4, 8] {
            let a = beam_search::<u64>(&weights, &sentence, width, None);
            let b = beam_search::<u64>(&weights, &sentence, width, None);
            assert_eq!(a, b, "beam width {width} must be deterministic");
            assert_eq!(a.len(), sentence.len());
        }
    }
}
