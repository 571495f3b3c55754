//! Tab-separated row reader/writer.
//!
//! Input format: one token per line, fields separated by tabs, a blank
//! line ends a sentence. Training/evaluation input carries a trailing
//! gold-tag column; plain tagging input does not.

use std::io::{BufRead, Write};

use seqtag_core::sentence::{MAX_ITEMS, MAX_STR, N_TAG_FIELDS, N_TRAIN_FIELDS};
use seqtag_core::tagset::EDGE_LABEL;
use seqtag_core::{Sentence, TaggerError, Tag, TokenRow};

/// Sentence count above which the reader refuses to keep scanning
/// (spec §7 `Overflow`, matching the source's `max_sents = 0x100000`).
const MAX_SENTS: usize = 0x100000;

/// Per-sentence byte budget, matching the source's fixed 64 KiB sentence
/// buffer (`uint8_t buf[max_len]` with `max_len = 0x10000`). Spec §7
/// `MalformedInput`: "over-length buffer (> 64 KiB per sentence)".
const MAX_SENTENCE_BYTES: usize = 0x10000;

type Result<T> = std::result::Result<T, TaggerError>;

fn strip_control_bytes(s: &str) -> String {
    s.chars().filter(|&c| c == '\t' || (c as u32) >= 0x0a).collect()
}

/// Truncate a field to `MAX_STR - 1` bytes at a char boundary, leaving
/// room for the NUL terminator the original C reader reserves. Rust
/// strings don't need the terminator itself; only the length budget
/// carries over.
fn truncate_field(field: &str) -> String {
    if field.len() < MAX_STR {
        return field.to_string();
    }
    let mut end = MAX_STR - 1;
    while end > 0 && !field.is_char_boundary(end) {
        end -= 1;
    }
    field[..end].to_string()
}

/// Read all sentences from `reader`. When `expect_gold` is true, the
/// last tab-separated field of every row is parsed as a gold tag.
pub fn read_sentences<R: BufRead>(mut reader: R, expect_gold: bool) -> Result<Vec<Sentence>> {
    let mut sentences = Vec::new();
    let mut current: Vec<TokenRow> = Vec::new();
    let mut offset: u64 = 0;
    let mut sentence_bytes: usize = 0;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(TaggerError::Io)?;
        if read == 0 {
            break;
        }
        offset += read as u64;

        let cleaned = strip_control_bytes(line.trim_end_matches(['\n', '\r']));
        if cleaned.is_empty() {
            if !current.is_empty() {
                if sentences.len() >= MAX_SENTS {
                    return Err(TaggerError::Overflow);
                }
                sentences.push(Sentence::new(std::mem::take(&mut current)));
            }
            sentence_bytes = 0;
            continue;
        }

        sentence_bytes += line.len();
        if sentence_bytes > MAX_SENTENCE_BYTES {
            return Err(TaggerError::MalformedInput { offset });
        }

        if current.len() >= MAX_ITEMS {
            return Err(TaggerError::MalformedInput { offset });
        }

        let mut fields: Vec<String> = cleaned.split('\t').map(truncate_field).collect();
        let expected_fields = if expect_gold { N_TRAIN_FIELDS } else { N_TAG_FIELDS };
        if fields.len() != expected_fields {
            return Err(TaggerError::MalformedInput { offset });
        }
        let gold = if expect_gold {
            let tag_field = fields.pop().ok_or(TaggerError::MalformedInput { offset })?;
            let label = match Tag::parse(&tag_field) {
                Ok(tag) => tag.index(),
                Err(_) => {
                    tracing::warn!(offset, tag = %tag_field, "unknown tag, marking row as edge/error");
                    EDGE_LABEL
                }
            };
            Some(label)
        } else {
            None
        };
        current.push(TokenRow::new(fields, gold));
    }

    if !current.is_empty() {
        return Err(TaggerError::MalformedInput { offset });
    }
    Ok(sentences)
}

/// Write one sentence's predicted tags, one token per line, field(s)
/// followed by the predicted tag, terminated by a blank line.
pub fn write_tagged<W: Write>(writer: &mut W, sentence: &Sentence, predicted: &[u8]) -> Result<()> {
    for (row, &label) in sentence.rows.iter().zip(predicted) {
        let tag = Tag::from_index(label).map(Tag::as_str).unwrap_or("O");
        writeln!(writer, "{}\t{}", row.fields.join("\t"), tag).map_err(TaggerError::Io)?;
    }
    writeln!(writer).map_err(TaggerError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_two_sentences_separated_by_blank_line() {
        let input = "Anna\tanna\tB-PER\nwent\twent\tO\n\nBob\tbob\tB-PER\n";
        let sentences = read_sentences(Cursor::new(input), true).unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].len(), 2);
        assert_eq!(sentences[1].len(), 1);
        assert_eq!(sentences[0].rows[0].gold, Some(Tag::BPer.index()));
    }

    #[test]
    fn eof_mid_sentence_is_an_error() {
        let input = "Anna\tanna\tB-PER\n";
        let err = read_sentences(Cursor::new(input), true).unwrap_err();
        assert!(matches!(err, TaggerError::MalformedInput { .. }));
    }

    #[test]
    fn strips_control_bytes_but_keeps_tabs() {
        let stripped = strip_control_bytes("a\tb\u{0001}c");
        assert_eq!(stripped, "a\tbc");
    }

    #[test]
    fn long_field_is_truncated() {
        let long = "a".repeat(MAX_STR + 100);
        let truncated = truncate_field(&long);
        assert!(truncated.len() < MAX_STR);
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        // Only two fields in a training row that needs three.
        let input = "Anna\tB-PER\n\n";
        let err = read_sentences(Cursor::new(input), true).unwrap_err();
        assert!(matches!(err, TaggerError::MalformedInput { .. }));
    }

    #[test]
    fn plain_tagging_input_has_no_tag_column() {
        let input = "Anna\tanna\nwent\twent\n\n";
        let sentences = read_sentences(Cursor::new(input), false).unwrap();
        assert_eq!(sentences.len(), 1);
        assert!(sentences[0].rows.iter().all(|r| r.gold.is_none()));
    }

    #[test]
    fn unknown_tag_becomes_edge_label() {
        let input = "Anna\tanna\tB-ALIEN\n\n";
        let sentences = read_sentences(Cursor::new(input), true).unwrap();
        assert_eq!(sentences[0].rows[0].gold, Some(EDGE_LABEL));
        // Never equal to any label a decoder can actually produce.
        assert!(EDGE_LABEL as usize >= seqtag_core::tagset::NUM_TAGS);
    }

    #[test]
    fn over_length_sentence_is_malformed() {
        // Long fields, not a long row count, push the sentence over the
        // 64 KiB cap while staying far under MAX_ITEMS (1024 rows).
        let word = "a".repeat(3000);
        let row = format!("{word}\t{word}\tO\n");
        let row_count = MAX_SENTENCE_BYTES / row.len() + 2;
        assert!(row_count < MAX_ITEMS);
        let input = row.repeat(row_count);

        let err = read_sentences(Cursor::new(input), true).unwrap_err();
        assert!(matches!(err, TaggerError::MalformedInput { .. }));
    }
}
