//! Per-question coding pipeline and batch orchestration.
//!
//! question type -> unique text -> discovery -> merge -> code resolution ->
//! classification of every original answer.

use crate::classify::{Assignment, ResponseClassifier};
use crate::codebook::Codebook;
use crate::codes::CodeAllocator;
use crate::config::EngineConfig;
use crate::discovery::{DiscoveryClient, DiscoveryReport};
use crate::error::Result;
use crate::question::{classify_question, unique_text_items, QuestionType, RawAnswer};
use crate::resolve::{merge_groups, resolve_codes, CodedGroup};
use crate::service::CompletionService;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// One question of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionInput {
    pub name: String,
    pub answers: Vec<RawAnswer>,
    /// `"<code> | <description>"` lines
    #[serde(default)]
    pub codebook: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_codes: usize,
    pub new_codes: usize,
    /// Codes given to more than one answer
    pub groups_with_multiple: usize,
    /// Answers under the most frequent code
    pub largest_group: usize,
    pub unmatched: usize,
    /// Answers per code
    pub frequencies: BTreeMap<i64, usize>,
}

impl Statistics {
    fn compute(assignments: &[Assignment], codebook: &[CodedGroup], new_codes: &[CodedGroup]) -> Self {
        let mut frequencies = BTreeMap::new();
        for code in assignments.iter().filter_map(Assignment::code) {
            *frequencies.entry(code).or_insert(0) += 1;
        }

        Self {
            total_codes: codebook.len(),
            new_codes: new_codes.len(),
            groups_with_multiple: frequencies.values().filter(|n| **n > 1).count(),
            largest_group: frequencies.values().copied().max().unwrap_or(0),
            unmatched: assignments.iter().filter(|a| a.is_unmatched()).count(),
            frequencies,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub name: String,
    pub question_type: QuestionType,
    /// One entry per input answer, same order
    pub assignments: Vec<Assignment>,
    /// Final codebook: the input codebook plus every new category
    pub codebook: Vec<CodedGroup>,
    /// Categories whose code was not in the input codebook
    pub new_codes: Vec<CodedGroup>,
    pub statistics: Statistics,
    pub discovery: DiscoveryReport,
}

// ============================================================================
// Engine
// ============================================================================

pub struct CodingEngine<S> {
    service: S,
    config: EngineConfig,
}

impl<S: CompletionService> CodingEngine<S> {
    pub fn new(service: S, config: EngineConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn code_question(&self, input: &QuestionInput) -> Result<QuestionOutcome> {
        let codebook = Codebook::parse_lines(&input.codebook);
        self.code_answers(&input.name, &input.answers, &codebook)
    }

    /// Code one question. Only completion service failures are errors.
    pub fn code_answers(&self, name: &str, answers: &[RawAnswer], codebook: &Codebook) -> Result<QuestionOutcome> {
        let question_type = classify_question(answers);
        info!("{}: {} answers, {} question", name, answers.len(), question_type.as_str());

        let (groups, discovery) = if question_type.needs_discovery() {
            self.discover_groups(answers, codebook)?
        } else {
            (codebook_groups(codebook), DiscoveryReport::default())
        };

        let classifier = ResponseClassifier::new(&groups, &self.config.thresholds);
        let assignments: Vec<Assignment> = answers.iter().map(|a| classifier.classify(a)).collect();

        for (idx, (answer, assignment)) in answers.iter().zip(&assignments).enumerate() {
            if assignment.is_unmatched() {
                warn!("{}: answer {} ({:?}) matched no category", name, idx + 1, answer.to_string());
            }
        }

        let codebook_out = rebuild_members(groups, answers, &assignments);
        let new_codes: Vec<CodedGroup> = codebook_out
            .iter()
            .filter(|g| !codebook.contains_code(g.code))
            .cloned()
            .collect();
        let statistics = Statistics::compute(&assignments, &codebook_out, &new_codes);

        debug!(
            "{}: {} codes ({} new), {} unmatched",
            name, statistics.total_codes, statistics.new_codes, statistics.unmatched
        );

        Ok(QuestionOutcome {
            name: name.to_string(),
            question_type,
            assignments,
            codebook: codebook_out,
            new_codes,
            statistics,
            discovery,
        })
    }

    /// Code every question in parallel. Each question seeds its own code
    /// allocator, so results do not depend on scheduling.
    pub fn code_batch(&self, inputs: &[QuestionInput]) -> Vec<Result<QuestionOutcome>> {
        inputs.par_iter().map(|input| self.code_question(input)).collect()
    }

    fn discover_groups(&self, answers: &[RawAnswer], codebook: &Codebook) -> Result<(Vec<CodedGroup>, DiscoveryReport)> {
        let thresholds = &self.config.thresholds;
        let allocator = CodeAllocator::seeded(codebook, thresholds.new_code_floor);
        let items = unique_text_items(answers);
        debug!("{} unique text answers", items.len());

        let discovery = DiscoveryClient::new(&self.service, &self.config).discover(&items, codebook, &allocator)?;
        let merged = merge_groups(discovery.groups, codebook, thresholds);
        let resolution = resolve_codes(merged, codebook, allocator);

        Ok((resolution.groups, discovery.report))
    }
}

fn codebook_groups(codebook: &Codebook) -> Vec<CodedGroup> {
    codebook
        .entries()
        .iter()
        .map(|e| CodedGroup {
            description: e.description.clone(),
            code: e.code,
            members: Vec::new(),
        })
        .collect()
}

/// Replace group members with the text answers actually classified under
/// each code, in first-seen order, so every covered answer sits in exactly
/// one group.
fn rebuild_members(mut groups: Vec<CodedGroup>, answers: &[RawAnswer], assignments: &[Assignment]) -> Vec<CodedGroup> {
    let mut by_code: HashMap<i64, Vec<String>> = HashMap::new();
    for (answer, assignment) in answers.iter().zip(assignments) {
        let (Some(text), Some(code)) = (answer.text(), assignment.code()) else {
            continue;
        };
        let members = by_code.entry(code).or_default();
        if !members.iter().any(|m| m == text) {
            members.push(text.to_string());
        }
    }

    for group in &mut groups {
        group.members = by_code.remove(&group.code).unwrap_or_default();
    }
    groups
}
