//! Authoritative codebook: ordered description/code pairs for one question.
//!
//! The codebook is never changed in place. New categories found during a run
//! end up in the resolved group list, which is a superset of it.

use crate::canon::{canonicalize, normalize};
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Non-response and refusal codes. Passed through untouched, never issued to
/// a discovered category and never merged into one.
pub const RESERVED_CODES: [i64; 6] = [55, 66, 77, 88, 98, 99];

/// Largest code a codebook line may carry
pub const MAX_CODE: i64 = 999_999;

pub fn is_reserved(code: i64) -> bool {
    RESERVED_CODES.contains(&code)
}

#[derive(Debug, Clone, Serialize)]
pub struct CodebookEntry {
    pub code: i64,
    pub description: String,
    #[serde(skip)]
    normalized: String,
    #[serde(skip)]
    canonical: String,
}

impl CodebookEntry {
    pub fn new(code: i64, description: &str) -> Self {
        let description = description.trim().to_string();
        Self {
            code,
            normalized: normalize(&description),
            canonical: canonicalize(&description),
            description,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Codebook {
    entries: Vec<CodebookEntry>,
}

impl Codebook {
    /// Build from `"<code> | <description>"` lines. Malformed lines and lines
    /// repeating an earlier code or description are skipped with a warning.
    pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut codebook = Codebook::default();
        let mut seen_descriptions = HashSet::new();

        for (idx, line) in lines.iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            let Some((code, description)) = parse_line(line) else {
                warn!("Skipping malformed codebook line {}: {:?}", idx + 1, line);
                continue;
            };
            if codebook.contains_code(code) {
                warn!("Skipping codebook line {}: code {} already defined", idx + 1, code);
                continue;
            }
            if !seen_descriptions.insert(description.to_lowercase()) {
                warn!("Skipping codebook line {}: duplicate description {:?}", idx + 1, description);
                continue;
            }
            codebook.entries.push(CodebookEntry::new(code, description));
        }

        codebook
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        let lines: Vec<String> = pairs
            .into_iter()
            .map(|(description, code)| format!("{} | {}", code, description))
            .collect();
        Self::parse_lines(&lines)
    }

    /// Lines in the same form the codebook is read from
    pub fn render_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{} | {}", e.code, e.description))
            .collect()
    }

    pub fn entries(&self) -> &[CodebookEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_code(&self, code: i64) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Largest non-reserved code, 0 for an empty codebook
    pub fn max_code(&self) -> i64 {
        self.entries
            .iter()
            .map(|e| e.code)
            .filter(|c| !is_reserved(*c))
            .max()
            .unwrap_or(0)
    }

    /// Entry whose description matches `title`: normalized equality first,
    /// then canonical equality.
    pub fn find_match(&self, title: &str) -> Option<&CodebookEntry> {
        let norm = normalize(title);
        if norm.is_empty() {
            return None;
        }
        if let Some(entry) = self.entries.iter().find(|e| e.normalized == norm) {
            return Some(entry);
        }

        let canon = canonicalize(title);
        self.entries
            .iter()
            .find(|e| !e.canonical.is_empty() && e.canonical == canon)
    }
}

/// Parse one `"<code> | <description>"` line. Codes outside `0..=MAX_CODE`
/// are rejected.
pub fn parse_line(line: &str) -> Option<(i64, &str)> {
    let (code, description) = line.split_once('|')?;
    let code = code.trim().parse::<i64>().ok().filter(|c| (0..=MAX_CODE).contains(c))?;
    let description = description.trim();
    if description.is_empty() {
        return None;
    }
    Some((code, description))
}
