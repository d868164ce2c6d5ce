//! Response classifier: maps every original answer to a final code.
//!
//! Tiers are tried in order and the first hit wins:
//! non-response code, exact raw text, exact normalized text, exact canonical
//! text, best containment, best fuzzy ratio. Anything left is `Unmatched`.

use crate::canon::{canonicalize, normalize};
use crate::config::Thresholds;
use crate::question::RawAnswer;
use crate::resolve::CodedGroup;
use crate::similarity::{containment, ratio};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which rule produced a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    NonResponse,
    Passthrough,
    ExactRaw,
    ExactNormalized,
    ExactCanonical,
    Partial,
    Fuzzy,
}

/// Outcome for one answer, in input position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    Coded { code: i64, tier: MatchTier },
    /// Non-integral number echoed as-is
    Literal { value: f64 },
    Blank,
    Unmatched,
}

impl Assignment {
    pub fn code(&self) -> Option<i64> {
        match self {
            Assignment::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self, Assignment::Unmatched)
    }
}

pub struct ResponseClassifier<'a> {
    thresholds: &'a Thresholds,
    exact: HashMap<String, i64>,
    normalized: HashMap<String, i64>,
    canonical: HashMap<String, i64>,
    /// Normalized titles and members, for the similarity tiers
    phrases: Vec<(String, i64)>,
}

impl<'a> ResponseClassifier<'a> {
    /// Index every group title and member. Members are indexed before titles,
    /// and within each pass the first group to claim a form keeps it.
    pub fn new(groups: &[CodedGroup], thresholds: &'a Thresholds) -> Self {
        let mut classifier = Self {
            thresholds,
            exact: HashMap::new(),
            normalized: HashMap::new(),
            canonical: HashMap::new(),
            phrases: Vec::new(),
        };

        let members = groups
            .iter()
            .flat_map(|g| g.members.iter().map(move |m| (m.as_str(), g.code)));
        let titles = groups.iter().map(|g| (g.description.as_str(), g.code));

        for (text, code) in members.chain(titles) {
            classifier.index(text, code);
        }
        classifier
    }

    fn index(&mut self, text: &str, code: i64) {
        let raw = text.trim();
        if raw.is_empty() {
            return;
        }
        let norm = normalize(raw);
        let canon = canonicalize(raw);

        self.exact.entry(raw.to_string()).or_insert(code);
        if !norm.is_empty() {
            self.normalized.entry(norm.clone()).or_insert(code);
            if !self.phrases.iter().any(|(p, _)| *p == norm) {
                self.phrases.push((norm, code));
            }
        }
        if !canon.is_empty() {
            self.canonical.entry(canon).or_insert(code);
        }
    }

    pub fn classify(&self, answer: &RawAnswer) -> Assignment {
        match answer {
            RawAnswer::Blank => Assignment::Blank,
            RawAnswer::Number(value) => match answer.as_code() {
                Some(code) if answer.is_non_response() => Assignment::Coded {
                    code,
                    tier: MatchTier::NonResponse,
                },
                Some(code) => Assignment::Coded {
                    code,
                    tier: MatchTier::Passthrough,
                },
                None => Assignment::Literal { value: *value },
            },
            RawAnswer::Text(text) => self.classify_text(text),
        }
    }

    fn classify_text(&self, text: &str) -> Assignment {
        let raw = text.trim();
        if raw.is_empty() {
            return Assignment::Blank;
        }
        if let Some(&code) = self.exact.get(raw) {
            return coded(code, MatchTier::ExactRaw);
        }

        let norm = normalize(raw);
        if let Some(&code) = self.normalized.get(&norm) {
            return coded(code, MatchTier::ExactNormalized);
        }
        if let Some(&code) = self.canonical.get(&canonicalize(raw)) {
            return coded(code, MatchTier::ExactCanonical);
        }
        if norm.is_empty() {
            return Assignment::Unmatched;
        }

        let partial = best(&self.phrases, |p| containment(&norm, p));
        if let Some((code, score)) = partial {
            if score >= self.thresholds.partial_containment {
                return coded(code, MatchTier::Partial);
            }
        }

        let fuzzy = best(&self.phrases, |p| Some(ratio(&norm, p) / 100.0));
        if let Some((code, score)) = fuzzy {
            if score >= self.thresholds.fuzzy_ratio {
                return coded(code, MatchTier::Fuzzy);
            }
        }

        Assignment::Unmatched
    }
}

fn coded(code: i64, tier: MatchTier) -> Assignment {
    Assignment::Coded { code, tier }
}

/// Highest-scoring phrase; the earliest wins ties
fn best(phrases: &[(String, i64)], score: impl Fn(&str) -> Option<f64>) -> Option<(i64, f64)> {
    phrases
        .iter()
        .filter_map(|(phrase, code)| score(phrase).map(|s| (*code, s)))
        .fold(None, |acc, (code, s)| match acc {
            Some((_, best)) if best >= s => acc,
            _ => Some((code, s)),
        })
}
