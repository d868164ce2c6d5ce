//! Request rendering for category discovery.

use crate::codebook::Codebook;
use crate::codes::CodeAllocator;
use crate::config::EngineConfig;
use crate::service::CompletionRequest;

const RULES: &str = "\
You code open-ended survey answers into categories for an opinion research institute.

Rules:
1. Group answers only when their meaning is the same or equivalent.
2. Never give two codes to the same meaning, and never give one code to two different meanings.
3. Never create catch-all categories such as \"Others\" or \"Miscellaneous\".
4. When an answer matches a codebook category, use that category's code and its exact description as the title.
5. Codes 55, 66, 77, 88, 98 and 99 mean non-response; never use them for a category.
6. New categories get new codes, starting at the first new code given below and counting up.
7. Titles are short, spelled correctly and capitalized.
8. Every answer in the list must appear in exactly one group, copied exactly as written.
9. Reply with JSON only, no commentary.";

const FORMAT: &str = "\
Return a JSON array where each element is an object with the fields:
  \"code\": integer,
  \"title\": string,
  \"members\": array of the answers in this group, copied exactly";

/// Which pass of the discovery protocol a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    /// Narrow follow-up for items the first response left out
    Retry,
}

pub fn render_request(
    config: &EngineConfig,
    items: &[String],
    codebook: &Codebook,
    allocator: &CodeAllocator,
    pass: Pass,
) -> CompletionRequest {
    CompletionRequest {
        model: config.model.clone(),
        system: RULES.to_string(),
        user: render_user(items, codebook, allocator, pass),
        temperature: config.temperature,
    }
}

fn render_user(items: &[String], codebook: &Codebook, allocator: &CodeAllocator, pass: Pass) -> String {
    let mut out = String::new();

    if codebook.is_empty() {
        out.push_str("Codebook: (empty)\n");
    } else {
        out.push_str("Codebook (code | description):\n");
        for line in codebook.render_lines() {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str(&format!("\nFirst new code: {}\n", allocator.first_new_code()));

    if pass == Pass::Retry {
        out.push_str(
            "\nThese answers were missing from your previous reply. \
             Every one of them must be placed in a group.\n",
        );
    }

    out.push_str("\nAnswers:\n");
    for (idx, item) in items.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", idx + 1, item));
    }

    out.push('\n');
    out.push_str(FORMAT);
    out.push('\n');
    out
}
