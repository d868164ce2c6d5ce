//! Group merging and code conflict resolution.
//!
//! Turns candidate groups into the final coded categories: near-duplicate
//! titles are merged, titles and members matching the codebook take the
//! codebook's code, and every other group gets a unique new code.

use crate::canon::{canonicalize, contains_phrase, normalize};
use crate::codebook::{is_reserved, Codebook, CodebookEntry};
use crate::codes::CodeAllocator;
use crate::config::Thresholds;
use crate::discovery::CandidateGroup;
use crate::similarity::token_set_ratio;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A final category. The union of all coded groups is the output codebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodedGroup {
    pub description: String,
    pub code: i64,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    /// Sorted by code, reserved codes last
    pub groups: Vec<CodedGroup>,
    pub allocator: CodeAllocator,
}

// ============================================================================
// Merging
// ============================================================================

struct TitleKey<'a> {
    normalized: String,
    canonical: String,
    anchor: Option<&'a CodebookEntry>,
}

impl<'a> TitleKey<'a> {
    fn of(title: &str, codebook: &'a Codebook) -> Self {
        Self {
            normalized: normalize(title),
            canonical: canonicalize(title),
            anchor: codebook.find_match(title),
        }
    }

    fn same_category(&self, other: &TitleKey, thresholds: &Thresholds) -> bool {
        if let (Some(a), Some(b)) = (self.anchor, other.anchor) {
            if a.code != b.code {
                return false;
            }
        }
        if self.canonical.is_empty() || other.canonical.is_empty() {
            return false;
        }

        self.canonical == other.canonical
            || contains_phrase(&self.canonical, &other.canonical)
            || contains_phrase(&other.canonical, &self.canonical)
            || token_set_ratio(&self.normalized, &other.normalized) >= thresholds.merge_token_set
    }
}

/// Merge groups whose titles name the same category.
///
/// Each group absorbs every later group matching its title. The merged group
/// keeps the first title and the first proposed code; members are unioned in
/// first-seen order. Groups anchored to different codebook entries never merge,
/// and an unanchored group absorbing an anchored one takes the codebook
/// description as its title.
pub fn merge_groups(
    groups: Vec<CandidateGroup>,
    codebook: &Codebook,
    thresholds: &Thresholds,
) -> Vec<CandidateGroup> {
    let mut keys: Vec<TitleKey> = groups.iter().map(|g| TitleKey::of(&g.title, codebook)).collect();
    let mut slots: Vec<Option<CandidateGroup>> = groups.into_iter().map(Some).collect();
    let mut merged = Vec::new();

    for i in 0..slots.len() {
        let Some(mut base) = slots[i].take() else {
            continue;
        };

        for j in (i + 1)..slots.len() {
            if slots[j].is_none() || !keys[i].same_category(&keys[j], thresholds) {
                continue;
            }
            if let Some(other) = slots[j].take() {
                debug!("Merging group {:?} into {:?}", other.title, base.title);
                if let (None, Some(entry)) = (keys[i].anchor, keys[j].anchor) {
                    keys[i].anchor = Some(entry);
                    base.title = entry.description.clone();
                }
                if base.code.is_none() {
                    base.code = other.code;
                }
                for member in other.members {
                    if !base.members.contains(&member) {
                        base.members.push(member);
                    }
                }
            }
        }

        merged.push(base);
    }

    merged
}

// ============================================================================
// Code resolution
// ============================================================================

/// Assign final codes.
///
/// In group order: a member matching a codebook description goes to that
/// entry whatever group listed it. A title matching a codebook description
/// adopts that entry for the remaining members (a later group matching the
/// same entry adds its members); otherwise the proposed code is kept if the
/// allocator grants it. Groups left without a code then receive freshly
/// minted ones, still in group order. Members already placed in an earlier
/// group are dropped from later ones, and a new group left with no members is
/// discarded. Codebook entries nobody matched are added back as empty groups.
pub fn resolve_codes(
    candidates: Vec<CandidateGroup>,
    codebook: &Codebook,
    mut allocator: CodeAllocator,
) -> Resolution {
    let mut groups: Vec<CodedGroup> = Vec::new();
    let mut pending: Vec<usize> = Vec::new();
    let mut placed: HashSet<String> = HashSet::new();

    for group in candidates {
        let mut members = Vec::new();
        for member in group.members {
            if !placed.insert(member.trim().to_string()) {
                continue;
            }
            match codebook.find_match(&member) {
                Some(entry) => {
                    debug!("Member {:?} of {:?} matches codebook code {}", member, group.title, entry.code);
                    adopt(&mut groups, &pending, entry, vec![member]);
                }
                None => members.push(member),
            }
        }

        if let Some(entry) = codebook.find_match(&group.title) {
            adopt(&mut groups, &pending, entry, members);
            continue;
        }

        if members.is_empty() {
            debug!("Dropping group {:?}: no members left", group.title);
            continue;
        }

        let granted = group.code.filter(|c| allocator.claim(*c));
        if granted.is_none() {
            if let Some(code) = group.code {
                debug!("Proposed code {} for {:?} rejected", code, group.title);
            }
            pending.push(groups.len());
        }
        groups.push(CodedGroup {
            description: group.title,
            code: granted.unwrap_or_default(),
            members,
        });
    }

    for idx in pending {
        groups[idx].code = allocator.mint();
    }

    for entry in codebook.entries() {
        if !groups.iter().any(|g| g.code == entry.code) {
            groups.push(CodedGroup {
                description: entry.description.clone(),
                code: entry.code,
                members: Vec::new(),
            });
        }
    }

    groups.sort_by_key(|g| (is_reserved(g.code), g.code));
    Resolution { groups, allocator }
}

/// Add members to the group holding a codebook entry, creating it on first use.
/// Groups still waiting for a minted code are skipped.
fn adopt(groups: &mut Vec<CodedGroup>, pending: &[usize], entry: &CodebookEntry, members: Vec<String>) {
    let existing = groups
        .iter_mut()
        .enumerate()
        .find(|(idx, g)| g.code == entry.code && !pending.contains(idx));
    match existing {
        Some((_, existing)) => existing.members.extend(members),
        None => groups.push(CodedGroup {
            description: entry.description.clone(),
            code: entry.code,
            members,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(title: &str, code: Option<i64>, members: &[&str]) -> CandidateGroup {
        CandidateGroup {
            title: title.to_string(),
            code,
            members: members.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn codes(resolution: &Resolution) -> Vec<(i64, &str)> {
        resolution
            .groups
            .iter()
            .map(|g| (g.code, g.description.as_str()))
            .collect()
    }

    #[test]
    fn test_merge_equal_and_contained_titles() {
        let merged = merge_groups(
            vec![
                group("Esgoto", Some(10), &["esgoto"]),
                group("Esgotos", Some(11), &["esgotos", "esgoto"]),
                group("Escola", Some(12), &["escola"]),
            ],
            &Codebook::default(),
            &Thresholds::default(),
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "Esgoto");
        assert_eq!(merged[0].code, Some(10));
        assert_eq!(merged[0].members, vec!["esgoto", "esgotos"]);
    }

    #[test]
    fn test_merge_token_set_similarity() {
        let merged = merge_groups(
            vec![
                group("Praça central reformada", None, &["a"]),
                group("Reformada praça central", Some(14), &["b"]),
            ],
            &Codebook::default(),
            &Thresholds::default(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].code, Some(14));
    }

    #[test]
    fn test_no_merge_across_codebook_anchors() {
        let codebook = Codebook::from_pairs([("Posto", 1), ("Posto de saúde", 2)]);
        let merged = merge_groups(
            vec![group("Posto", None, &["a"]), group("Posto de saúde", None, &["b"])],
            &codebook,
            &Thresholds::default(),
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_unanchored_title_takes_absorbed_anchor() {
        let codebook = Codebook::from_pairs([("Iluminação", 1)]);
        let merged = merge_groups(
            vec![
                group("Iluminação pública nova", Some(10), &["poste novo"]),
                group("Iluminação", Some(1), &["iluminacao"]),
            ],
            &codebook,
            &Thresholds::default(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Iluminação");
        assert_eq!(merged[0].members, vec!["poste novo", "iluminacao"]);

        let resolution = resolve_codes(merged, &codebook, CodeAllocator::seeded(&codebook, 10));
        assert_eq!(codes(&resolution), vec![(1, "Iluminação")]);
        assert!(!resolution.allocator.is_used(10));
    }

    #[test]
    fn test_codebook_member_leaves_new_group() {
        let codebook = Codebook::from_pairs([("Saúde", 1)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(
            vec![group("Melhorias gerais", Some(10), &["saude", "escola"])],
            &codebook,
            alloc,
        );
        assert_eq!(codes(&resolution), vec![(1, "Saúde"), (10, "Melhorias gerais")]);
        assert_eq!(resolution.groups[0].members, vec!["saude"]);
        assert_eq!(resolution.groups[1].members, vec!["escola"]);
    }

    #[test]
    fn test_group_of_codebook_members_only_is_dropped() {
        let codebook = Codebook::from_pairs([("Saúde", 1)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(vec![group("Coisas boas", Some(10), &["saude"])], &codebook, alloc);
        assert_eq!(codes(&resolution), vec![(1, "Saúde")]);
        assert_eq!(resolution.groups[0].members, vec!["saude"]);
        assert!(!resolution.allocator.is_used(10));
    }

    #[test]
    fn test_codebook_code_zero_not_confused_with_unminted_group() {
        let codebook = Codebook::from_pairs([("Nenhuma melhoria", 0)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(
            vec![
                group("Esgoto", None, &["esgoto"]),
                group("Nenhuma melhoria", None, &["nada melhorou"]),
            ],
            &codebook,
            alloc,
        );
        assert_eq!(codes(&resolution), vec![(0, "Nenhuma melhoria"), (10, "Esgoto")]);
        assert_eq!(resolution.groups[0].members, vec!["nada melhorou"]);
        assert_eq!(resolution.groups[1].members, vec!["esgoto"]);
    }

    #[test]
    fn test_codebook_title_keeps_code() {
        let codebook = Codebook::from_pairs([("Saúde", 1)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(
            vec![
                group("saude", Some(7), &["saude"]),
                group("Melhorou a saúde", Some(12), &["Melhorou a saude"]),
            ],
            &codebook,
            alloc,
        );
        assert_eq!(codes(&resolution), vec![(1, "Saúde")]);
        assert_eq!(resolution.groups[0].members, vec!["saude", "Melhorou a saude"]);
    }

    #[test]
    fn test_conflicting_code_is_reminted() {
        let codebook = Codebook::from_pairs([("Saúde", 1)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(vec![group("Nova categoria", Some(1), &["nova"])], &codebook, alloc);
        assert_eq!(codes(&resolution), vec![(1, "Saúde"), (10, "Nova categoria")]);
        assert!(resolution.groups[0].members.is_empty());
    }

    #[test]
    fn test_earlier_group_wins_contested_code() {
        let alloc = CodeAllocator::seeded(&Codebook::default(), 10);
        let resolution = resolve_codes(
            vec![
                group("Esgoto", Some(11), &["esgoto"]),
                group("Escola", Some(11), &["escola"]),
                group("Ponte", None, &["ponte"]),
            ],
            &Codebook::default(),
            alloc,
        );
        assert_eq!(
            codes(&resolution),
            vec![(10, "Escola"), (11, "Esgoto"), (12, "Ponte")]
        );
    }

    #[test]
    fn test_reserved_and_low_codes_are_never_accepted() {
        let alloc = CodeAllocator::seeded(&Codebook::default(), 10);
        let resolution = resolve_codes(
            vec![group("Esgoto", Some(99), &["esgoto"]), group("Escola", Some(3), &["escola"])],
            &Codebook::default(),
            alloc,
        );
        assert_eq!(codes(&resolution), vec![(10, "Esgoto"), (11, "Escola")]);
    }

    #[test]
    fn test_members_belong_to_first_group() {
        let alloc = CodeAllocator::seeded(&Codebook::default(), 10);
        let resolution = resolve_codes(
            vec![
                group("Esgoto", Some(10), &["esgoto", "fossa"]),
                group("Fossa", Some(11), &["fossa"]),
            ],
            &Codebook::default(),
            alloc,
        );
        assert_eq!(codes(&resolution), vec![(10, "Esgoto")]);
        assert!(!resolution.allocator.is_used(11));
    }

    #[test]
    fn test_reserved_codebook_entries_sort_last() {
        let codebook = Codebook::from_pairs([("Não sabe", 99), ("Saúde", 1)]);
        let alloc = CodeAllocator::seeded(&codebook, 10);
        let resolution = resolve_codes(vec![group("Esgoto", None, &["esgoto"])], &codebook, alloc);
        assert_eq!(
            codes(&resolution),
            vec![(1, "Saúde"), (10, "Esgoto"), (99, "Não sabe")]
        );
    }
}
