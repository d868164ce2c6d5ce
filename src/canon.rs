//! Text canonicalization: spelling correction, accent/punctuation
//! normalization and synonym/topic folding.
//!
//! Three views of the same answer are used throughout the engine:
//! - [`correct`]: display form, dictionary-corrected and capitalized
//! - [`normalize`]: comparison form, ASCII lowercase words only
//! - [`canonicalize`]: meaning form, normalized and folded onto a topic key
//!
//! All three are total, deterministic functions of their input.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Upper bound on folding passes; every dictionary below settles in two
const MAX_FOLD_PASSES: usize = 4;

// ============================================================================
// Dictionaries
// ============================================================================

lazy_static! {
    static ref RE_NON_WORD: Regex = Regex::new(r"[^\w]").unwrap();

    /// Known misspellings, keyed by the lowercase token without punctuation
    static ref CORRECTIONS: HashMap<&'static str, &'static str> = [
        // missing accents
        ("nao", "não"),
        ("sao", "são"),
        ("voce", "você"),
        ("saude", "saúde"),
        ("educacao", "educação"),
        ("administracao", "administração"),
        ("pavimentacao", "pavimentação"),
        ("iluminacao", "iluminação"),
        ("seguranca", "segurança"),
        ("transito", "trânsito"),
        ("otimo", "ótimo"),
        ("pessimo", "péssimo"),
        ("tambem", "também"),
        ("calcamento", "calçamento"),
        ("calcadas", "calçadas"),
        ("onibus", "ônibus"),
        ("medico", "médico"),
        ("medicos", "médicos"),
        ("agua", "água"),
        // misspellings
        ("onibis", "ônibus"),
        ("polisia", "polícia"),
        ("egotos", "esgotos"),
        ("emtupidos", "entupidos"),
        ("asfaltmento", "asfaltamento"),
        ("iluminasao", "iluminação"),
        ("enchentis", "enchentes"),
        // proper names and acronyms
        ("cemai", "Cemai"),
        ("semae", "Semae"),
        ("upa", "UPA"),
    ]
    .into_iter()
    .collect();

    /// Whole normalized answers that mean the same as a shorter form
    static ref SYNONYMS: HashMap<&'static str, &'static str> = [
        ("onibis", "onibus"),
        ("asfaltmento", "asfalto"),
        ("pavimentacao", "asfalto"),
        ("pavimentacao asfalto", "asfalto"),
        ("posto de saude", "posto saude"),
        ("posto medico", "posto saude"),
        ("muito medico", "medico"),
        ("mais medicos", "medico"),
        ("medicos no posto", "medico"),
        ("polisia", "policia"),
        ("policiamento nas ruas", "policiamento"),
        ("policiamento melhor", "policiamento"),
        ("seguranca nas ruas", "seguranca"),
        ("seguranca publica", "seguranca"),
        ("mais seguranca", "seguranca"),
        ("egotos", "esgoto"),
        ("esgotos emtupidos", "esgoto"),
        ("esgotos entupidos", "esgoto"),
        ("saneamento basico", "saneamento"),
        ("more buses", "bus"),
        ("better transit", "transit"),
    ]
    .into_iter()
    .collect();

    /// Topic clusters: an answer containing any keyword (as whole words)
    /// folds to the cluster key. Checked in order, first hit wins.
    static ref TOPIC_CLUSTERS: Vec<(&'static str, Vec<&'static str>)> = vec![
        ("saude", vec![
            "saude", "posto", "posto saude", "medico", "medicos", "hospital",
            "atendimento medico", "consulta", "consultas", "upa",
        ]),
        ("asfalto", vec![
            "asfalto", "pavimentacao", "pavimentar", "rua", "ruas", "estrada",
            "estradas", "asfaltamento",
        ]),
        ("educacao", vec![
            "educacao", "escola", "escolas", "ensino", "curso", "cursos",
            "qualificacao", "instituto",
        ]),
        ("enchente", vec![
            "enchente", "enchentes", "alagamento", "alagamentos", "agua", "inundacao",
        ]),
        ("esgoto", vec!["esgoto", "esgotos", "saneamento"]),
        ("habitacao", vec![
            "habitacao", "casa", "casas", "moradia", "lote", "lotes", "apartamento",
            "albergue",
        ]),
        ("infraestrutura", vec![
            "infraestrutura", "calcada", "calcadas", "calcamento", "ponte", "obra",
            "obras", "construcao",
        ]),
        ("seguranca", vec!["seguranca", "policia", "policiamento"]),
        ("transporte", vec![
            "transporte", "onibus", "bus", "buses", "transit",
        ]),
        ("esporte", vec!["esporte", "esportes", "projeto", "lazer", "recreacao"]),
        ("empresa", vec![
            "empresa", "empresas", "fabrica", "emprego", "empregos", "trabalho",
            "desenvolvimento",
        ]),
        ("nada", vec!["nada", "nenhum", "nao fez", "nao tem", "ruim"]),
    ];
}

// ============================================================================
// Public API
// ============================================================================

/// Dictionary-correct `text` for display.
///
/// Lowercases, fixes known misspellings token by token (keeping punctuation
/// attached to the token), capitalizes the first letter and collapses
/// whitespace.
pub fn correct(text: &str) -> String {
    let lowered = text.trim().to_lowercase();

    let words: Vec<String> = lowered
        .split_whitespace()
        .map(|word| {
            let clean = RE_NON_WORD.replace_all(word, "");
            match CORRECTIONS.get(&*clean) {
                Some(fixed) if !clean.is_empty() => word.replacen(&*clean, fixed, 1),
                _ => word.to_string(),
            }
        })
        .collect();

    capitalize_first(&words.join(" "))
}

/// Comparison form: accents stripped, lowercase, every character outside
/// `[a-z0-9]` turned into a space, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Meaning form used for equality between answers, titles and codebook
/// descriptions.
///
/// `correct`, then `normalize`, then synonym and topic folding, repeated
/// until nothing changes so that the result is its own canonical form.
pub fn canonicalize(text: &str) -> String {
    let mut current = fold_step(text);
    for _ in 0..MAX_FOLD_PASSES {
        let next = fold_step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Whether `needle` occurs in `haystack` as a run of whole words.
/// Both sides are expected in [`normalize`]d form.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

/// Title form for auto-created categories: first letter upper, rest lower
pub fn capitalize(text: &str) -> String {
    capitalize_first(&text.trim().to_lowercase())
}

// ============================================================================
// Folding
// ============================================================================

fn fold_step(text: &str) -> String {
    fold(&normalize(&correct(text)))
}

fn fold(norm: &str) -> String {
    if norm.is_empty() {
        return String::new();
    }

    let folded = match SYNONYMS.get(norm) {
        Some(target) => *target,
        None => norm,
    };

    for (key, keywords) in TOPIC_CLUSTERS.iter() {
        if keywords.iter().any(|kw| contains_phrase(folded, kw)) {
            return key.to_string();
        }
    }

    folded.to_string()
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
