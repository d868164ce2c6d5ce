//! End-to-end coding scenarios against a scripted completion service.

use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use survey_coder::cache::{CachedService, MemoryCache};
use survey_coder::{
    Assignment, Codebook, CodingEngine, CompletionRequest, CompletionService, EngineConfig, QuestionOutcome,
    QuestionType, RawAnswer, Result,
};

/// Replies with the queued texts in order, then with an empty list
struct Scripted {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(replies: &[Value]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(Value::to_string).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionService for Scripted {
    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "[]".to_string()))
    }
}

fn answers(values: Value) -> Vec<RawAnswer> {
    serde_json::from_value(values).unwrap()
}

fn code_with(replies: &[Value], input: Value, codebook: &Codebook) -> (QuestionOutcome, usize) {
    let engine = CodingEngine::new(Scripted::new(replies), EngineConfig::default());
    let outcome = engine.code_answers("q", &answers(input), codebook).unwrap();
    let calls = engine.service().calls();
    (outcome, calls)
}

fn codes(outcome: &QuestionOutcome) -> Vec<Option<i64>> {
    outcome.assignments.iter().map(Assignment::code).collect()
}

fn assert_codes_unique(outcome: &QuestionOutcome) {
    let mut seen = HashSet::new();
    for group in &outcome.codebook {
        assert!(seen.insert(group.code), "code {} issued twice", group.code);
    }
}

/// Every unique text answer sits in exactly one group
fn assert_full_coverage(outcome: &QuestionOutcome, input: &[RawAnswer]) {
    let items: HashSet<&str> = input.iter().filter_map(RawAnswer::text).filter(|t| !t.is_empty()).collect();
    for item in items {
        let holders = outcome
            .codebook
            .iter()
            .filter(|g| g.members.iter().any(|m| m == item))
            .count();
        assert_eq!(holders, 1, "{:?} is in {} groups", item, holders);
    }
    assert_eq!(outcome.statistics.unmatched, 0);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_a_health_and_sewage() {
    let codebook = Codebook::from_pairs([("Saúde", 1)]);
    let input = json!(["Melhorou a saude", "saude", "esgoto", "esgotos"]);
    let reply = json!([
        {"code": 1, "title": "Saúde", "members": ["Melhorou a saude", "saude"]},
        {"code": 10, "title": "Esgoto", "members": ["esgoto", "esgotos"]}
    ]);

    let (outcome, calls) = code_with(&[reply], input.clone(), &codebook);
    let codes = codes(&outcome);

    assert_eq!(calls, 1);
    assert_eq!(outcome.question_type, QuestionType::Open);
    assert_eq!(codes[0], Some(1));
    assert_eq!(codes[1], Some(1));
    let sewage = codes[2].unwrap();
    assert!(sewage >= 10);
    assert_eq!(codes[3], Some(sewage));
    assert_full_coverage(&outcome, &answers(input));
    assert_codes_unique(&outcome);
}

#[test]
fn test_scenario_a_with_loose_model_phrasing() {
    // model renames the health group, proposes a wrong code for it and splits
    // the sewage answers over two groups
    let codebook = Codebook::from_pairs([("Saúde", 1)]);
    let input = json!(["Melhorou a saude", "saude", "esgoto", "esgotos"]);
    let reply = json!({"groups": [
        {"code": 14, "title": "Melhoria na saúde", "members": ["Melhorou a saude", "saude"]},
        {"code": 12, "title": "esgoto", "members": ["esgoto"]},
        {"code": 13, "title": "Esgotos", "members": ["esgotos"]}
    ]});

    let (outcome, _) = code_with(&[reply], input, &codebook);
    let codes = codes(&outcome);

    assert_eq!(&codes[..2], &[Some(1), Some(1)]);
    assert_eq!(codes[2], Some(12));
    assert_eq!(codes[3], Some(12));
    assert_eq!(outcome.new_codes.len(), 1);
    assert_eq!(outcome.new_codes[0].description, "Esgoto");
}

#[test]
fn test_codebook_answer_under_new_title_keeps_code() {
    let codebook = Codebook::from_pairs([("Saúde", 1)]);
    let input = json!(["saude", "escola"]);
    let reply = json!([{"code": 10, "title": "Melhorias gerais", "members": ["saude", "escola"]}]);

    let (outcome, _) = code_with(&[reply], input.clone(), &codebook);
    let codes = codes(&outcome);

    assert_eq!(codes[0], Some(1));
    assert_eq!(codes[1], Some(10));
    let health = outcome.codebook.iter().find(|g| g.code == 1).unwrap();
    assert_eq!(health.members, vec!["saude"]);
    assert_full_coverage(&outcome, &answers(input));
    assert_codes_unique(&outcome);
}

#[test]
fn test_merge_into_codebook_category_keeps_code() {
    let codebook = Codebook::from_pairs([("Iluminação", 1)]);
    let input = json!(["poste novo", "iluminacao"]);
    let reply = json!([
        {"code": 10, "title": "Iluminação pública nova", "members": ["poste novo"]},
        {"code": 1, "title": "Iluminação", "members": ["iluminacao"]}
    ]);

    let (outcome, _) = code_with(&[reply], input.clone(), &codebook);
    let codes = codes(&outcome);

    assert_eq!(codes[1], Some(1));
    let lighting = outcome.codebook.iter().find(|g| g.code == 1).unwrap();
    assert_eq!(lighting.description, "Iluminação");
    assert!(lighting.members.iter().any(|m| m == "iluminacao"));
    assert_full_coverage(&outcome, &answers(input));
    assert_codes_unique(&outcome);
}

#[test]
fn test_scenario_b_semi_open() {
    let codebook = Codebook::from_pairs([("A", 1), ("B", 2)]);
    let reply = json!([{"code": 3, "title": "Nova categoria", "members": ["nova categoria"]}]);

    let (outcome, _) = code_with(&[reply], json!([1, 2, "nova categoria"]), &codebook);
    let codes = codes(&outcome);

    assert_eq!(outcome.question_type, QuestionType::SemiOpen);
    assert_eq!(codes[0], Some(1));
    assert_eq!(codes[1], Some(2));
    assert!(codes[2].unwrap() >= 10);
    assert_codes_unique(&outcome);
}

#[test]
fn test_scenario_c_retry_recovers_missing_item() {
    let first = json!([{"code": 10, "title": "Esgoto", "members": ["esgoto"]}]);
    let retry = json!([{"code": 11, "title": "Escola", "members": ["escola nova no bairro"]}]);
    let input = json!(["esgoto", "escola nova no bairro"]);

    let (outcome, calls) = code_with(&[first, retry], input.clone(), &Codebook::default());

    assert_eq!(calls, 2);
    assert!(outcome.discovery.retried);
    assert_eq!(outcome.discovery.auto_coded, 0);
    assert_eq!(codes(&outcome), vec![Some(10), Some(11)]);
    assert_full_coverage(&outcome, &answers(input));
}

#[test]
fn test_scenario_c_auto_codes_when_retry_fails() {
    let first = json!([{"code": 10, "title": "Esgoto", "members": ["esgoto"]}]);
    let input = json!(["esgoto", "praça abandonada", "esgoto"]);

    let (outcome, calls) = code_with(&[first, json!("no idea")], input.clone(), &Codebook::default());

    assert_eq!(calls, 2);
    assert_eq!(outcome.discovery.auto_coded, 1);
    let codes = codes(&outcome);
    assert_eq!(codes[0], Some(10));
    assert_eq!(codes[1], Some(11));
    assert_eq!(codes[2], Some(10));
    assert!(outcome.codebook.iter().any(|g| g.code == 11 && g.description == "Praça abandonada"));
    assert_full_coverage(&outcome, &answers(input));
}

#[test]
fn test_scenario_d_conflicting_code_is_reminted() {
    let codebook = Codebook::from_pairs([("Saúde", 1)]);
    let reply = json!([{"code": 1, "title": "Feiras livres", "members": ["quero mais feiras livres"]}]);

    let (outcome, _) = code_with(&[reply], json!(["quero mais feiras livres"]), &codebook);

    let new_code = codes(&outcome)[0].unwrap();
    assert_ne!(new_code, 1);
    assert!(new_code >= 10);

    let health = outcome.codebook.iter().find(|g| g.code == 1).unwrap();
    assert_eq!(health.description, "Saúde");
    assert_codes_unique(&outcome);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_closed_question_passthrough() {
    let codebook = Codebook::from_pairs([("A", 1), ("B", 2), ("Não sabe", 99)]);
    let (outcome, calls) = code_with(&[], json!([2, 1, 99, "7", 2]), &codebook);

    assert_eq!(calls, 0);
    assert_eq!(outcome.question_type, QuestionType::Closed);
    assert_eq!(codes(&outcome), vec![Some(2), Some(1), Some(99), Some(7), Some(2)]);
}

#[test]
fn test_reserved_codes_untouched_in_semi_open() {
    let reply = json!([{"code": 77, "title": "Esgoto", "members": ["esgoto"]}]);
    let (outcome, _) = code_with(&[reply], json!([77, "esgoto", 88, 99]), &Codebook::default());

    let codes = codes(&outcome);
    assert_eq!(codes[0], Some(77));
    assert_eq!(codes[2], Some(88));
    assert_eq!(codes[3], Some(99));
    assert!(codes[1].unwrap() >= 10);
    assert_ne!(codes[1], Some(77));
}

#[test]
fn test_order_and_count_preserved_with_blanks() {
    let reply = json!([
        {"code": 10, "title": "Esgoto", "members": ["esgoto"]},
        {"code": 11, "title": "Escola", "members": ["escola"]}
    ]);
    let input = json!(["escola", "", "esgoto", null, "escola", "esgoto"]);

    let (outcome, _) = code_with(&[reply], input, &Codebook::default());

    assert_eq!(outcome.assignments.len(), 6);
    assert_eq!(
        codes(&outcome),
        vec![Some(11), None, Some(10), None, Some(11), Some(10)]
    );
    assert_eq!(outcome.assignments[1], Assignment::Blank);
    assert_eq!(outcome.assignments[3], Assignment::Blank);
}

#[test]
fn test_unparseable_first_reply_still_covers_everything() {
    let input = json!(["ponte caiu", "falta luz", "ponte caiu"]);
    let (outcome, calls) = code_with(&[json!("???"), json!("still nothing")], input.clone(), &Codebook::default());

    assert_eq!(calls, 2);
    assert_eq!(outcome.discovery.unparseable, 2);
    assert_eq!(outcome.discovery.auto_coded, 2);
    assert_full_coverage(&outcome, &answers(input));
    assert_codes_unique(&outcome);
}

#[test]
fn test_cached_rerun_gives_same_outcome_without_calls() {
    let reply = json!([{"code": 10, "title": "Esgoto", "members": ["esgoto", "esgotos"]}]);
    let service = CachedService::new(Scripted::new(&[reply]), MemoryCache::new());
    let engine = CodingEngine::new(service, EngineConfig::default());
    let input = answers(json!(["esgoto", "esgotos"]));

    let first = engine.code_answers("q", &input, &Codebook::default()).unwrap();
    let second = engine.code_answers("q", &input, &Codebook::default()).unwrap();

    assert_eq!(engine.service().hits(), 1);
    assert_eq!(first.assignments, second.assignments);
    assert_eq!(first.codebook, second.codebook);
}
