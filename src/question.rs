//! Raw survey answers and question-type detection.

use crate::codebook::is_reserved;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Raw Answers
// ============================================================================

/// One original survey response.
///
/// Built from JSON: numbers and numeric strings become `Number`, blank strings
/// and `null` become `Blank`, everything else is `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum RawAnswer {
    Number(f64),
    Text(String),
    Blank,
}

impl RawAnswer {
    /// Parse a cell value the way a coder reads it: a finite number if the
    /// trimmed text is one, blank if it is empty, text otherwise.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return RawAnswer::Blank;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => RawAnswer::Number(n),
            _ => RawAnswer::Text(text.to_string()),
        }
    }

    /// Integral numeric value, usable as a code
    pub fn as_code(&self) -> Option<i64> {
        match self {
            RawAnswer::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Some(*n as i64),
            _ => None,
        }
    }

    /// Trimmed text of a `Text` answer
    pub fn text(&self) -> Option<&str> {
        match self {
            RawAnswer::Text(t) => Some(t.trim()),
            _ => None,
        }
    }

    /// Numeric answer holding one of the non-response codes
    pub fn is_non_response(&self) -> bool {
        self.as_code().is_some_and(is_reserved)
    }
}

impl From<Value> for RawAnswer {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawAnswer::Blank,
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => RawAnswer::Number(f),
                _ => RawAnswer::Text(n.to_string()),
            },
            Value::String(s) => RawAnswer::from_text(&s),
            other => RawAnswer::Text(other.to_string()),
        }
    }
}

impl From<RawAnswer> for Value {
    fn from(answer: RawAnswer) -> Self {
        match answer {
            RawAnswer::Number(n) => match RawAnswer::Number(n).as_code() {
                Some(code) => Value::from(code),
                None => Value::from(n),
            },
            RawAnswer::Text(t) => Value::String(t),
            RawAnswer::Blank => Value::Null,
        }
    }
}

impl From<&str> for RawAnswer {
    fn from(text: &str) -> Self {
        RawAnswer::from_text(text)
    }
}

impl fmt::Display for RawAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawAnswer::Number(n) => match self.as_code() {
                Some(code) => write!(f, "{}", code),
                None => write!(f, "{}", n),
            },
            RawAnswer::Text(t) => write!(f, "{}", t.trim()),
            RawAnswer::Blank => Ok(()),
        }
    }
}

// ============================================================================
// Question Type
// ============================================================================

/// How a question must be coded, decided from the mix of its answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    /// No answers at all
    Empty,
    /// Only numeric codes; already coded, echoed unchanged
    Closed,
    /// Numeric codes mixed with text; only the text is coded
    SemiOpen,
    /// Text only; everything is coded
    Open,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Empty => "empty",
            QuestionType::Closed => "closed",
            QuestionType::SemiOpen => "semi-open",
            QuestionType::Open => "open",
        }
    }

    /// Whether answers of this question go through category discovery
    pub fn needs_discovery(&self) -> bool {
        matches!(self, QuestionType::SemiOpen | QuestionType::Open)
    }
}

/// Classify a question by counting numeric and non-empty text answers
pub fn classify_question(answers: &[RawAnswer]) -> QuestionType {
    if answers.is_empty() {
        return QuestionType::Empty;
    }

    let numeric = answers.iter().filter(|a| matches!(a, RawAnswer::Number(_))).count();
    let text = answers.iter().filter(|a| a.text().is_some_and(|t| !t.is_empty())).count();

    match (numeric, text) {
        (n, 0) if n > 0 => QuestionType::Closed,
        (n, t) if n > 0 && t > 0 => QuestionType::SemiOpen,
        _ => QuestionType::Open,
    }
}

/// Distinct trimmed text answers in sorted order; what discovery is asked to code
pub fn unique_text_items(answers: &[RawAnswer]) -> Vec<String> {
    answers
        .iter()
        .filter_map(RawAnswer::text)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
