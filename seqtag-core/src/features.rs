//! Hashed feature templates.
//!
//! Feature extraction happens in two passes. [`extract_invariants`]
//! computes, once per token, a fixed-size array of hashes that do not
//! depend on label history (word identity, affix hashes, a
//! character-class shape hash, secondary-field hashes). [`combine`]
//! then folds those invariants together with the previous one or two
//! predicted labels to produce the actual feature hashes the decoder
//! and trainer index into the weight vector with.
//!
//! Every template carries its own compile-time salt so that, say, a
//! "prefix of length 2" feature can never collide with a "suffix of
//! length 2" feature just because the underlying code-point hash
//! happened to match.

use crate::hash::FeatureHash;
use crate::sentence::TokenRow;
use crate::tagset::EDGE_LABEL;

/// Guard against hashing degenerate (too-short) prefixes/suffixes.
const MIN_STEM: usize = 1;
const MAX_AFFIX_LEN: usize = 4;

/// word identity, 4 prefixes, 4 suffixes, one shape hash, one secondary
/// field hash.
pub const N_INVARIANTS: usize = 1 + MAX_AFFIX_LEN + MAX_AFFIX_LEN + 1 + 1;

/// Each invariant is combined three ways: alone, with `labels[i-1]`, and
/// with `labels[i-1]` and `labels[i-2]` together.
pub const N_FEATURES: usize = N_INVARIANTS * 3;

const SALT_WORD: u64 = 0x9e3779b97f4a7c15;
const SALT_PREFIX: [u64; MAX_AFFIX_LEN] = [
    0xc2b2ae3d27d4eb4f,
    0x165667b19e3779f9,
    0x27d4eb2f165667c5,
    0x85ebca77c2b2ae63,
];
const SALT_SUFFIX: [u64; MAX_AFFIX_LEN] = [
    0xff51afd7ed558ccd,
    0xc4ceb9fe1a85ec53,
    0x9e3779b185ebca87,
    0xfff7f3e9a69e8ae1,
];
const SALT_SHAPE: u64 = 0x94d049bb133111eb;
const SALT_SECONDARY: u64 = 0xbf58476d1ce4e5b9;

const SALT_UNI: u64 = 0x2545f4914f6cdd1d;
const SALT_BI1: u64 = 0x8ebc6af09c88c6e3;
const SALT_BI2: u64 = 0x589965cc75374cc3;

/// Character-class shape: maps each code point to one of five classes
/// (`digit`, `upper`, `lower`, `punct`, `other`) and hashes the
/// resulting pattern, collapsing runs of the same class so `"Ab12!"`
/// and `"Xy99?"` share a shape.
fn shape_bytes(word: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(word.len());
    let mut last: Option<u8> = None;
    for ch in word.chars() {
        let class = if ch.is_ascii_digit() {
            b'd'
        } else if ch.is_uppercase() {
            b'U'
        } else if ch.is_lowercase() {
            b'l'
        } else if ch.is_ascii_punctuation() {
            b'p'
        } else {
            b'x'
        };
        if last != Some(class) {
            out.push(class);
            last = Some(class);
        }
    }
    out
}

/// Compute the `N_INVARIANTS` label-independent hashes for one token.
pub fn extract_invariants<H: FeatureHash>(row: &TokenRow) -> Vec<H> {
    let word = row.word();
    let bytes = word.as_bytes();
    let mut out = Vec::with_capacity(N_INVARIANTS);

    out.push(H::hash_data(H::from_salt(SALT_WORD), bytes));

    for len in 1..=MAX_AFFIX_LEN {
        out.push(H::utf8_prefix(bytes, len, MIN_STEM));
    }
    for len in 1..=MAX_AFFIX_LEN {
        out.push(H::utf8_suffix(bytes, len, MIN_STEM));
    }

    let shape = shape_bytes(word);
    out.push(H::hash_data(H::from_salt(SALT_SHAPE), &shape));

    out.push(H::hash_data(H::from_salt(SALT_SECONDARY), row.field(1).as_bytes()));

    out
}

fn salted<H: FeatureHash>(base: H, salt: u64) -> H {
    H::mix(H::from_salt(salt), base)
}

fn salt_by_template_index<H: FeatureHash>(inv: H, i: usize) -> H {
    match i {
        0 => salted(inv, SALT_WORD),
        1..=4 => salted(inv, SALT_PREFIX[i - 1]),
        5..=8 => salted(inv, SALT_SUFFIX[i - 5]),
        9 => salted(inv, SALT_SHAPE),
        _ => salted(inv, SALT_SECONDARY),
    }
}

/// Combine label-independent invariants with the label being scored
/// (`label`) and with label history (`prev1`, `prev2`) into the full
/// feature set the decoder scores against. `label` is folded into
/// every template so that the weight vector holds one value per
/// (template, word-ish-feature, label) triple, the way a linear
/// structured perceptron's sparse weight table would if it weren't
/// hashed into a fixed-size array.
pub fn combine<H: FeatureHash>(invariants: &[H], label: u8, prev1: u8, prev2: u8) -> Vec<H> {
    debug_assert_eq!(invariants.len(), N_INVARIANTS);
    let mut out = Vec::with_capacity(N_FEATURES);

    let label_h = H::from_salt(label as u64);
    let prev1_label = H::from_salt(prev1 as u64);
    let prev2_label = H::from_salt((prev2 as u64) << 8 | EDGE_LABEL as u64);

    for (i, &inv) in invariants.iter().enumerate() {
        let inv = salt_by_template_index(inv, i);
        out.push(H::fmix(H::mix(label_h, H::mix(H::from_salt(SALT_UNI), inv))));
        out.push(H::fmix(H::mix(
            label_h,
            H::mix(prev1_label, H::mix(H::from_salt(SALT_BI1), inv)),
        )));
        out.push(H::fmix(H::mix(
            label_h,
            H::mix(prev2_label, H::mix(prev1_label, H::mix(H::from_salt(SALT_BI2), inv))),
        )));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::TokenRow;

    #[test]
    fn invariant_count_matches_const() {
        let row = TokenRow::new(vec!["Stockholm".into(), "stockholm".into()], None);
        let inv: Vec<u64> = extract_invariants(&row);
        assert_eq!(inv.len(), N_INVARIANTS);
    }

    #[test]
    fn feature_count_matches_const() {
        let row = TokenRow::new(vec!["Stockholm".into(), "stockholm".into()], None);
        let inv: Vec<u64> = extract_invariants(&row);
        let feats = combine(&inv, 0, EDGE_LABEL, EDGE_LABEL);
        assert_eq!(feats.len(), N_FEATURES);
    }

    #[test]
    fn different_words_hash_differently() {
        let a = TokenRow::new(vec!["Stockholm".into(), "stockholm".into()], None);
        let b = TokenRow::new(vec!["Gothenburg".into(), "gothenburg".into()], None);
        let ia: Vec<u64> = extract_invariants(&a);
        let ib: Vec<u64> = extract_invariants(&b);
        assert_ne!(ia, ib);
    }

    #[test]
    fn label_history_changes_the_feature_set() {
        let row = TokenRow::new(vec!["Stockholm".into(), "stockholm".into()], None);
        let inv: Vec<u64> = extract_invariants(&row);
        let a = combine(&inv, 0, 0, EDGE_LABEL);
        let b = combine(&inv, 0, 1, EDGE_LABEL);
        assert_ne!(a, b);
    }

    #[test]
    fn candidate_label_changes_the_feature_set() {
        let row = TokenRow::new(vec!["Stockholm".into(), "stockholm".into()], None);
        let inv: Vec<u64> = extract_invariants(&row);
        let a = combine(&inv, 0, EDGE_LABEL, EDGE_LABEL);
        let b = combine(&inv, 1, EDGE_LABEL, EDGE_LABEL);
        assert_ne!(a, b);
    }

    #[test]
    fn shape_collapses_runs() {
        assert_eq!(shape_bytes("Ab12"), shape_bytes("Xy99"));
        assert_ne!(shape_bytes("Ab12"), shape_bytes("ab12"));
    }
}
