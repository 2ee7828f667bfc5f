//! Front-matter extraction for ingested documents.
//!
//! Documents may begin with a `---` delimited key/value header:
//!
//! ```text
//! ---
//! title: Deployment Runbook
//! sensitivity: confidential
//! ---
//! body text...
//! ```
//!
//! Extraction never fails: an absent or malformed header yields an empty
//! metadata set and the original text unchanged, so a bad header can
//! never abort ingestion.

use std::collections::BTreeMap;

/// Parsed front matter plus the remaining document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub fields: BTreeMap<String, String>,
    pub body: String,
}

/// Split a leading `---` key/value block off the document text.
///
/// Keys are lowercased; values are trimmed. Lines inside the block that
/// are not `key: value` pairs make the whole header malformed, in which
/// case the original text is returned untouched.
pub fn extract_front_matter(text: &str) -> FrontMatter {
    let unchanged = || FrontMatter {
        fields: BTreeMap::new(),
        body: text.to_string(),
    };

    // Byte offsets are tracked on the raw segments so CRLF line
    // endings count correctly.
    let mut segments = text.split_inclusive('\n');
    match segments.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return unchanged(),
    }

    let mut fields = BTreeMap::new();
    let mut consumed = text.split_inclusive('\n').next().map(str::len).unwrap_or(0);
    let mut closed = false;

    for segment in segments {
        consumed += segment.len();
        let line = segment.trim_end_matches(['\r', '\n']);
        if line.trim() == "---" {
            closed = true;
            break;
        }
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                fields.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
            _ => return unchanged(),
        }
    }

    if !closed {
        // Opening fence without a closing one: treat as plain text.
        return unchanged();
    }

    let body = text
        .get(consumed.min(text.len())..)
        .unwrap_or_default()
        .trim_start_matches(['\r', '\n'])
        .to_string();

    FrontMatter { fields, body }
}
