//! Compile-time BIO tag set.
//!
//! Generalized from the teacher's `tagger::{Tag, EntityCategory}` BIO
//! scheme. The hasher, feature extractor, decoder and trainer never
//! reference these variants by name — they only see `u8` label indices
//! `0..NUM_TAGS` plus the out-of-range [`EDGE_LABEL`] sentinel used for
//! label history before the start of a sentence. Swapping in a
//! different label set means touching only this module.

use crate::error::TaggerError;

/// Number of labels in the compile-time tag set.
pub const NUM_TAGS: usize = 9;

/// Sentinel label history value for positions before the start of a
/// sentence (`i - 1 < 0`, `i - 2 < 0`). Deliberately outside
/// `0..NUM_TAGS` so it can never collide with a real tag index.
pub const EDGE_LABEL: u8 = NUM_TAGS as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    O,
    BPer,
    IPer,
    BOrg,
    IOrg,
    BLoc,
    ILoc,
    BMisc,
    IMisc,
}

impl Tag {
    pub const ALL: [Tag; NUM_TAGS] = [
        Tag::O,
        Tag::BPer,
        Tag::IPer,
        Tag::BOrg,
        Tag::IOrg,
        Tag::BLoc,
        Tag::ILoc,
        Tag::BMisc,
        Tag::IMisc,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(i: u8) -> Option<Tag> {
        Tag::ALL.get(i as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::O => "O",
            Tag::BPer => "B-PER",
            Tag::IPer => "I-PER",
            Tag::BOrg => "B-ORG",
            Tag::IOrg => "I-ORG",
            Tag::BLoc => "B-LOC",
            Tag::ILoc => "I-LOC",
            Tag::BMisc => "B-MISC",
            Tag::IMisc => "I-MISC",
        }
    }

    pub fn parse(s: &str) -> Result<Tag, TaggerError> {
        match s {
            "O" => Ok(Tag::O),
            "B-PER" => Ok(Tag::BPer),
            "I-PER" => Ok(Tag::IPer),
            "B-ORG" => Ok(Tag::BOrg),
            "I-ORG" => Ok(Tag::IOrg),
            "B-LOC" => Ok(Tag::BLoc),
            "I-LOC" => Ok(Tag::ILoc),
            "B-MISC" => Ok(Tag::BMisc),
            "I-MISC" => Ok(Tag::IMisc),
            other => Err(TaggerError::UnknownTag(other.to_string())),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
