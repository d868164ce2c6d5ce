//! Tolerant decoding of discovery responses.
//!
//! Models wrap JSON in prose, markdown fences or an enclosing object, and
//! sometimes return one group instead of a list. `decode` finds the first
//! fragment that parses and says which shape it had; `candidate_groups`
//! turns any shape into groups.

use super::CandidateGroup;
use crate::canon::correct;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

lazy_static! {
    static ref RE_FENCE: Regex = Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").unwrap();
}

const TITLE_KEYS: &[&str] = &["title", "titulo", "título", "description", "descricao", "descrição"];
const CODE_KEYS: &[&str] = &["code", "codigo", "código"];
const MEMBER_KEYS: &[&str] = &["members", "respostas", "responses", "answers"];

/// Preferred wrapper key when an object holds several arrays
const GROUPS_KEY: &str = "groups";

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    /// A bare JSON array of groups
    List(Vec<Value>),
    /// An object holding the array under `key`
    Wrapped { key: String, items: Vec<Value> },
    /// A single group object
    Singleton(Map<String, Value>),
    /// Nothing in the text parsed as a usable shape
    Unparseable,
}

impl DecodedResponse {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, DecodedResponse::Unparseable)
    }
}

/// Decode a raw completion. Tries, in order: the whole text with markdown
/// fences removed, then every span from an opening bracket to the last
/// matching closing bracket after it. The first of those spans is the
/// outermost fragment.
pub fn decode(text: &str) -> DecodedResponse {
    let stripped = strip_fences(text.trim());
    let mut tried: Vec<&str> = Vec::new();

    for candidate in std::iter::once(stripped).chain(bracket_spans(stripped)) {
        if tried.contains(&candidate) {
            continue;
        }
        tried.push(candidate);

        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if let Some(decoded) = classify_value(value) {
            return decoded;
        }
    }

    debug!("No JSON fragment parsed in {} tried candidates", tried.len());
    DecodedResponse::Unparseable
}

/// Groups contained in a decoded response. Entries without a usable title are
/// dropped.
pub fn candidate_groups(decoded: DecodedResponse) -> Vec<CandidateGroup> {
    let values = match decoded {
        DecodedResponse::List(items) => items,
        DecodedResponse::Wrapped { items, .. } => items,
        DecodedResponse::Singleton(map) => vec![Value::Object(map)],
        DecodedResponse::Unparseable => Vec::new(),
    };

    values
        .iter()
        .filter_map(Value::as_object)
        .filter_map(group_from_object)
        .collect()
}

fn strip_fences(text: &str) -> &str {
    match RE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text,
    }
}

fn bracket_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices().filter_map(move |(start, c)| {
        let closer = match c {
            '{' => '}',
            '[' => ']',
            _ => return None,
        };
        let end = text.rfind(closer)?;
        (end > start).then(|| &text[start..=end])
    })
}

fn classify_value(value: Value) -> Option<DecodedResponse> {
    match value {
        Value::Array(items) => Some(DecodedResponse::List(items)),
        Value::Object(map) => {
            let wrapper_key = if matches!(map.get(GROUPS_KEY), Some(Value::Array(_))) {
                Some(GROUPS_KEY.to_string())
            } else {
                map.iter()
                    .find(|(_, v)| v.is_array() && !is_group_object(&map))
                    .map(|(k, _)| k.clone())
            };

            match wrapper_key {
                Some(key) => {
                    let mut map = map;
                    match map.remove(&key) {
                        Some(Value::Array(items)) => Some(DecodedResponse::Wrapped { key, items }),
                        _ => None,
                    }
                }
                None if is_group_object(&map) => Some(DecodedResponse::Singleton(map)),
                None => None,
            }
        }
        _ => None,
    }
}

fn is_group_object(map: &Map<String, Value>) -> bool {
    TITLE_KEYS.iter().any(|k| map.contains_key(*k))
}

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn group_from_object(map: &Map<String, Value>) -> Option<CandidateGroup> {
    let title = field(map, TITLE_KEYS)
        .and_then(Value::as_str)
        .map(correct)
        .filter(|t| !t.is_empty())?;

    let code = field(map, CODE_KEYS).and_then(parse_code);

    let members = match field(map, MEMBER_KEYS) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    Some(CandidateGroup { title, code, members })
}

fn parse_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
