//! Category discovery: ask the completion service to group the unique text
//! answers of a question, then make sure every answer ended up somewhere.
//!
//! The coverage protocol is fixed: one request, one narrower retry for what
//! the first reply missed, then deterministic auto-coding of anything still
//! missing. Parse problems never fail a question; service errors do.

pub mod decode;
pub mod prompt;

use crate::canon::{canonicalize, capitalize, normalize};
use crate::codebook::Codebook;
use crate::codes::CodeAllocator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::service::CompletionService;
use decode::{candidate_groups, decode};
use prompt::{render_request, Pass};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A proposed category before merging and code resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateGroup {
    pub title: String,
    /// Code proposed by the model; `None` when it gave none or the group was
    /// created locally
    pub code: Option<i64>,
    pub members: Vec<String>,
}

impl CandidateGroup {
    pub fn singleton(title: String, member: String) -> Self {
        Self {
            title,
            code: None,
            members: vec![member],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Completion requests issued for this question
    pub requests: usize,
    pub retried: bool,
    /// Items neither reply covered, given their own category
    pub auto_coded: usize,
    /// Replies in which no JSON fragment could be decoded
    pub unparseable: usize,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub groups: Vec<CandidateGroup>,
    pub report: DiscoveryReport,
}

// ============================================================================
// Coverage
// ============================================================================

/// Every form under which an answer counts as already placed: raw, normalized
/// and canonical forms of group members and codebook descriptions.
#[derive(Debug, Default)]
pub struct Coverage {
    forms: HashSet<String>,
}

impl Coverage {
    pub fn build(groups: &[CandidateGroup], codebook: &Codebook) -> Self {
        let mut coverage = Coverage::default();
        for member in groups.iter().flat_map(|g| g.members.iter()) {
            coverage.insert(member);
        }
        for entry in codebook.entries() {
            coverage.insert(&entry.description);
        }
        coverage
    }

    fn insert(&mut self, text: &str) {
        for form in forms_of(text) {
            self.forms.insert(form);
        }
    }

    pub fn covers(&self, item: &str) -> bool {
        forms_of(item).into_iter().any(|f| self.forms.contains(&f))
    }

    /// Items not covered, in input order
    pub fn missing(&self, items: &[String]) -> Vec<String> {
        items.iter().filter(|i| !self.covers(i)).cloned().collect()
    }
}

fn forms_of(text: &str) -> Vec<String> {
    [text.trim().to_string(), normalize(text), canonicalize(text)]
        .into_iter()
        .filter(|f| !f.is_empty())
        .collect()
}

// ============================================================================
// Client
// ============================================================================

pub struct DiscoveryClient<'a, S: ?Sized> {
    service: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: CompletionService + ?Sized> DiscoveryClient<'a, S> {
    pub fn new(service: &'a S, config: &'a EngineConfig) -> Self {
        Self { service, config }
    }

    /// Produce candidate groups covering every item in `items`.
    ///
    /// `items` are the unique, trimmed, non-empty text answers. The allocator
    /// is only read here, to tell the model where new codes start.
    pub fn discover(
        &self,
        items: &[String],
        codebook: &Codebook,
        allocator: &CodeAllocator,
    ) -> Result<Discovery> {
        let mut report = DiscoveryReport::default();
        if items.is_empty() {
            return Ok(Discovery {
                groups: Vec::new(),
                report,
            });
        }

        info!("Discovering categories for {} unique answers", items.len());
        let mut groups = self.request(items, codebook, allocator, Pass::First, &mut report)?;
        debug!("First pass returned {} groups", groups.len());

        let missing = Coverage::build(&groups, codebook).missing(items);
        if !missing.is_empty() {
            info!("{} answers missing after first pass, retrying", missing.len());
            report.retried = true;
            let extra = self.request(&missing, codebook, allocator, Pass::Retry, &mut report)?;
            absorb(&mut groups, extra);
        }

        let still_missing = Coverage::build(&groups, codebook).missing(items);
        if !still_missing.is_empty() {
            warn!("Auto-coding {} answers the model did not group", still_missing.len());
            report.auto_coded = still_missing.len();
            groups.extend(
                still_missing
                    .into_iter()
                    .map(|item| CandidateGroup::singleton(capitalize(&item), item)),
            );
        }

        Ok(Discovery { groups, report })
    }

    fn request(
        &self,
        items: &[String],
        codebook: &Codebook,
        allocator: &CodeAllocator,
        pass: Pass,
        report: &mut DiscoveryReport,
    ) -> Result<Vec<CandidateGroup>> {
        let request = render_request(self.config, items, codebook, allocator, pass);
        report.requests += 1;
        let text = self.service.complete(&request)?;

        let decoded = decode(&text);
        if decoded.is_unparseable() {
            warn!("Could not decode the {:?} discovery reply ({} chars)", pass, text.len());
            report.unparseable += 1;
        }
        Ok(candidate_groups(decoded))
    }
}

/// Fold retry groups into the first-pass groups: a retry group whose title
/// matches an existing title adds its members there, anything else is
/// appended as a new group. Code collisions are left to the resolver.
fn absorb(groups: &mut Vec<CandidateGroup>, extra: Vec<CandidateGroup>) {
    for group in extra {
        let norm = normalize(&group.title);
        match groups.iter_mut().find(|g| normalize(&g.title) == norm) {
            Some(existing) => {
                for member in group.members {
                    if !existing.members.contains(&member) {
                        existing.members.push(member);
                    }
                }
            }
            None => groups.push(group),
        }
    }
}
