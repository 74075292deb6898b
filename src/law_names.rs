//! Law-name registry build (§4.1), grounded in
//! `original_source/common.py::stem_law_name`/`clean_name` and
//! `statutes_pipeline_steps/de_law_names.py::get_stemmed_law_names_for_filename`/
//! `compile_law_names`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Inflectional suffixes stripped from each word, tried in this order —
/// mirrors the alternation order of the source's
/// `(?<!\b)(er|en|es|s|e)(?=\b)` regex (the engine commits to the first
/// alternative that matches, so order encodes precedence).
const SUFFIXES: [&str; 5] = ["er", "en", "es", "s", "e"];

static WORD_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());
static WHITESPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strips a trailing suffix from one `\w+` run, mirroring the source's
/// `(?<!\b)(er|en|es|s|e)(?=\b)`: the suffix must end the run (the `(?=\b)`
/// lookahead — word-char runs are exactly what `\b` delimits) but must not
/// consume the run's first character (the `(?<!\b)` lookbehind). Crucially
/// this operates on *word-character runs*, not whitespace-delimited words:
/// trailing punctuation attached to a word (e.g. "Grundgesetzes.") doesn't
/// block stripping, because the run is "Grundgesetzes", not
/// "Grundgesetzes.".
fn stem_word_run(word: &str) -> &str {
    let lower = word.to_lowercase();
    for suffix in SUFFIXES {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            return &word[..word.len() - suffix.len()];
        }
    }
    word
}

/// Full name stemming pipeline (§4.1): per-word-run suffix strip, whitespace
/// collapse, lower-case, German character folding. Bit-stable by contract.
pub fn stem(input: &str) -> String {
    let trimmed = input.trim();
    let mut result = String::with_capacity(trimmed.len());
    let mut last_end = 0;
    for m in WORD_RUN_RE.find_iter(trimmed) {
        result.push_str(&trimmed[last_end..m.start()]);
        result.push_str(stem_word_run(m.as_str()));
        last_end = m.end();
    }
    result.push_str(&trimmed[last_end..]);

    let collapsed = WHITESPACE_RUN_RE.replace_all(&result, " ");
    let lower = collapsed.to_lowercase();
    fold_german_chars(&lower)
}

fn fold_german_chars(s: &str) -> String {
    s.replace('ß', "ss")
        .replace('ä', "ae")
        .replace('ü', "ue")
        .replace('ö', "oe")
}

static BASE_YEAR_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)\s\d{4}[-\d]*$").unwrap());

/// A single law-name/law-id pair with its validity window, before
/// registry compilation (§3: "Law-name entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LawNameAlias {
    pub law_id: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// An immutable, `Arc`-shareable, sorted lookup from stemmed name to law id
/// (§9: "a natural language-neutral layout is ... a sorted-vector lookup
/// loaded once per worker").
#[derive(Debug, Clone, Default)]
pub struct LawNameRegistry {
    /// Sorted by key, so `longest_prefix_match` can binary-search.
    entries: Vec<(String, String)>,
}

impl LawNameRegistry {
    /// Builds the registry active at `date` from the full alias list
    /// (§4.1: selection by validity window, then `<base> <year>`
    /// disambiguation, then the hard-coded `grundgesetz` entry).
    pub fn build(aliases: &[LawNameAlias], date: NaiveDate) -> Arc<Self> {
        let mut map: HashMap<String, String> = HashMap::new();
        for alias in aliases {
            if alias.start <= date && date <= alias.end {
                map.entry(stem(&alias.name))
                    .or_insert_with(|| alias.law_id.clone());
            }
        }

        let mut shortened: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
        for (key, value) in &map {
            if let Some(caps) = BASE_YEAR_KEY.captures(key) {
                shortened
                    .entry(caps[1].to_string())
                    .or_default()
                    .insert(value.clone());
            }
        }
        for (base, values) in shortened {
            if values.len() == 1 && !map.contains_key(&base) {
                map.insert(base, values.into_iter().next().unwrap());
            }
        }

        map.insert("grundgesetz".to_string(), "GG".to_string());

        let mut entries: Vec<(String, String)> = map.into_iter().collect();
        entries.sort();
        Arc::new(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| self.entries[i].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prefix match of the stemmed candidate text against the registry
    /// (§4.2's `dict` classification, grounded in
    /// `de_reference_areas.py::match_law_name`: keys are walked in reverse
    /// alphabetical order and the first one that is a literal prefix of the
    /// candidate wins — since a key that is itself an extension of another
    /// key sorts before it in that order, this has the practical effect of
    /// preferring the longer of two prefix-related keys without needing a
    /// trie or true longest-match search).
    pub fn match_prefix<'a>(&self, candidate_stem: &'a str) -> Option<(&'a str, &str)> {
        for (key, law_id) in self.entries.iter().rev() {
            if candidate_stem.len() >= key.len() && &candidate_stem[..key.len()] == key.as_str() {
                return Some((&candidate_stem[..key.len()], law_id.as_str()));
            }
        }
        None
    }

    /// All keys, sorted in reverse alphabetical order — the iteration order
    /// `match_prefix` uses (exposed for callers that re-derive candidate
    /// lengths, e.g. the reference-area word-boundary check in §4.2).
    pub fn keys_reverse_sorted(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(|(k, _)| k.as_str())
    }
}

/// Batches registry compilation across a whole research window instead of
/// one date at a time (§2 MODULE law_names: `compile_law_names`), since
/// distinct alias validity windows only partition a research window into a
/// handful of distinct live sets.
pub fn compile_law_names(
    aliases: &[LawNameAlias],
    dates: &[NaiveDate],
) -> HashMap<NaiveDate, Arc<LawNameRegistry>> {
    dates
        .iter()
        .map(|&date| (date, LawNameRegistry::build(aliases, date)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn stemming_folds_german_characters_and_strips_suffixes() {
        assert_eq!(stem("Bürgerliches Gesetzbuch"), "buergerlich gesetzbuch");
        assert_eq!(stem("Straßenverkehrsgesetz"), "strassenverkehrsgesetz");
    }

    #[test]
    fn stemming_is_idempotent_for_representative_names() {
        for name in ["Gesetzbuch", "Strafgesetzbuch", "Abgabenordnung", "Grundgesetz"] {
            let once = stem(name);
            let twice = stem(&once);
            assert_eq!(once, twice, "not idempotent for {name}");
        }
    }

    #[test]
    fn registry_applies_base_year_disambiguation() {
        let d = date("2020-01-01");
        let aliases = vec![
            LawNameAlias {
                law_id: "EGBGB".into(),
                name: "Einführungsgesetz 1896".into(),
                start: date("1900-01-01"),
                end: date("2099-01-01"),
            },
            LawNameAlias {
                law_id: "EGBGB".into(),
                name: "EGBGB".into(),
                start: date("1900-01-01"),
                end: date("2099-01-01"),
            },
        ];
        let registry = LawNameRegistry::build(&aliases, d);
        assert_eq!(registry.get("einfuehrungsgesetz"), Some("EGBGB"));
        assert_eq!(registry.get("grundgesetz"), Some("GG"));
    }

    #[test]
    fn registry_respects_validity_window() {
        let aliases = vec![LawNameAlias {
            law_id: "X".into(),
            name: "Testgesetz".into(),
            start: date("2000-01-01"),
            end: date("2010-01-01"),
        }];
        let before_window = LawNameRegistry::build(&aliases, date("1999-01-01"));
        assert_eq!(before_window.get("testgesetz"), None);
        assert_eq!(before_window.get("grundgesetz"), Some("GG"));

        let within_window = LawNameRegistry::build(&aliases, date("2005-01-01"));
        assert_eq!(within_window.get("testgesetz"), Some("X"));

        let after_window = LawNameRegistry::build(&aliases, date("2020-01-01"));
        assert_eq!(after_window.get("testgesetz"), None);
    }

    #[test]
    fn match_prefix_prefers_the_longer_of_two_prefix_related_keys() {
        let aliases = vec![
            LawNameAlias {
                law_id: "BGB".into(),
                name: "Bürgerliches Gesetzbuch".into(),
                start: date("1900-01-01"),
                end: date("2099-01-01"),
            },
            LawNameAlias {
                law_id: "GB".into(),
                name: "Gesetzbuch".into(),
                start: date("1900-01-01"),
                end: date("2099-01-01"),
            },
        ];
        let reg = LawNameRegistry::build(&aliases, date("2020-01-01"));
        let candidate = stem("Bürgerlichen Gesetzbuches");
        let (_, law_id) = reg.match_prefix(&candidate).unwrap();
        assert_eq!(law_id, "BGB");
    }
}
