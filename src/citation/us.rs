//! US citation parsing (§4.3), grounded in
//! `original_source/statutes_pipeline_steps/us_reference_parse.py`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::hierarchy::{CitationPath, ParsedDocument, PatternClass, ReferenceMarker};
use crate::stage_log::Log;

static SPLIT_SHORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*U\.?S\.?C\.?\s*").unwrap());

/// `split_pattern_inline` drives a split on the zero-width lookahead
/// "`of` followed by `(this )?title`"; `regex` has no lookahead, so this is
/// a find-then-check instead: every "of " run is a split candidate, and it
/// only counts if the text right after it is a title phrase.
static OF_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*of\s+").unwrap());
static TITLE_PHRASE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:this\s+)?title\s*").unwrap());

static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+[a-z]{0,3})[\-\u{2013}\u{2014}.](\d+[a-z]{0,3})").unwrap());

static SUB_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*,?\s*(?:and|or|,|;|throu?g?h?|to)\s+").unwrap());

static FULLMATCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:§|sec\.|section\b)?\s*(\d+[a-z]{0,3}(?:[\-\u{2013}\u{2014}.]\d+[a-z]{0,3})?)?\s?((?:\(\d*[a-z]{0,3}\))*)( et\.?\sseq\.?| and following)?$",
    )
    .unwrap()
});

static PAREN_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[()]+").unwrap());

static INLINE_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:(this)\stitle|title\s(\d+))$").unwrap());

static LOWER_LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]$").unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static UPPER_LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]$").unwrap());
static LOWER_ROMAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[xvi]x{0,4}v?i{0,4}$").unwrap());
static UPPER_ROMAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[XVI]X{0,4}V?I{0,4}$").unwrap());

/// `sortable_paragraph_number`: left-pads the leading digit run to 4 digits
/// so two paragraph numbers compare correctly as strings.
fn sortable_paragraph_number(s: &str) -> String {
    const MIN_DIGITS: usize = 4;
    let digit_len = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digit_len == 0 {
        return s.to_string();
    }
    format!("{}{}", "0 ".repeat(MIN_DIGITS.saturating_sub(digit_len)), s)
}

/// `get_enum_types`: the regex module's `([a-z])\1` backreference has no
/// `regex`-crate equivalent, so the doubled-letter check is a plain
/// character comparison instead.
fn is_doubled_letter(s: &str) -> bool {
    let mut chars = s.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(a), Some(b), None) => a == b && a.is_ascii_lowercase(),
        _ => false,
    }
}

fn enum_types(s: &str) -> [bool; 6] {
    [
        LOWER_LETTER_RE.is_match(s),
        DIGITS_RE.is_match(s),
        UPPER_LETTER_RE.is_match(s),
        LOWER_ROMAN_RE.is_match(s),
        UPPER_ROMAN_RE.is_match(s),
        is_doubled_letter(s),
    ]
}

fn enum_types_match(a: &[bool; 6], b: &[bool; 6]) -> bool {
    a.iter().zip(b.iter()).any(|(x, y)| *x && *y)
}

/// `split_pattern_short`: one `U.S.C.` marker splits title from the rest of
/// a block citation. A doubled marker (e.g. "31 U.S.C. 3801-U.S.C. 3831")
/// splits into more than two parts; the parts after the title pair up
/// consecutively as (start, end) of a range, the same shape a dash range
/// already produces, so they're joined with "through" and handed to the
/// same downstream splitting/parsing as an ordinary range.
fn split_block(text: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = SPLIT_SHORT_RE.split(text).collect();
    if parts.len() < 2 {
        return None;
    }
    let title = parts[0].to_string();
    if parts.len() == 2 {
        return Some((title, parts[1].to_string()));
    }
    let rest = &parts[1..];
    if rest.len() % 2 != 0 {
        return None;
    }
    let sub_text = rest
        .chunks(2)
        .map(|pair| {
            format!(
                "{} through {}",
                pair[0].trim().trim_end_matches('-').trim(),
                pair[1].trim()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some((title, sub_text))
}

/// `split_pattern_inline`: exactly one "of (this )?title..." run splits the
/// sub-text from the title phrase of an inline citation.
fn split_inline(text: &str) -> Option<(String, String)> {
    let matches: Vec<_> = OF_RUN_RE
        .find_iter(text)
        .filter(|m| TITLE_PHRASE_RE.is_match(&text[m.end()..]))
        .collect();
    if matches.len() != 1 {
        return None;
    }
    let m = &matches[0];
    Some((text[..m.start()].to_string(), text[m.end()..].to_string()))
}

fn extract_title_inline(text: &str, this_title: u32) -> Option<u32> {
    let caps = INLINE_TITLE_RE.captures(text)?;
    if caps.get(1).is_some() {
        Some(this_title)
    } else {
        caps.get(2)?.as_str().parse().ok()
    }
}

/// Replaces every dash/en-dash/em-dash/period-joined numeric range whose
/// endpoints sort in order with "`N` through `M`" — preformatting so the
/// connector splitter below treats a range the same as an explicit
/// enumeration. Faithfully reproduces the source's quirk of computing
/// match offsets against the *original* text but splicing them into the
/// progressively-rewritten one (harmless unless a leaf has more than one
/// range, since only then do earlier replacements shift later offsets).
fn preformat_ranges(sub_text: &str) -> String {
    let mut result = sub_text.to_string();
    for caps in RANGE_RE.captures_iter(sub_text) {
        let whole = caps.get(0).unwrap();
        let left = caps.get(1).unwrap().as_str();
        let right = caps.get(2).unwrap().as_str();
        if sortable_paragraph_number(left) > sortable_paragraph_number(right) {
            continue;
        }
        let (start, end) = (whole.start(), whole.end());
        if end > result.len() || !result.is_char_boundary(start) || !result.is_char_boundary(end) {
            continue;
        }
        result = format!("{}{} through {}{}", &result[..start], left, right, &result[end..]);
    }
    result
}

/// `regex.fullmatch` against the per-sub-part grammar: an optional
/// `§`/`sec.`/`section` head, an optional main number (possibly itself a
/// dash range left over from a connector that wasn't preformatted), any
/// number of parenthesized subsections, and an optional et-seq/following
/// tail (consumed only to let the match succeed, never stored).
fn parse_sub_part(text: &str) -> Option<(Option<String>, Vec<String>)> {
    let caps = FULLMATCH_RE.captures(text)?;
    let main = caps.get(1).map(|m| m.as_str().to_string());
    let paren_blob = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let sub_sections = PAREN_SPLIT_RE
        .split(paren_blob)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    Some((main, sub_sections))
}

/// `parse_references`' per-reference body: split title from sub-text,
/// preformat ranges, split on enumeration connectors, parse each part, and
/// resolve bare `(x)`-only continuations against the immediately preceding
/// reference before prepending the title to every result.
fn parse_one_reference(marker: &ReferenceMarker, this_title: u32) -> Result<Vec<CitationPath>, String> {
    let (title, sub_text) = match marker.pattern {
        PatternClass::Block => {
            let (t, s) = split_block(&marker.main)
                .ok_or_else(|| format!("could not split block citation '{}'", marker.main))?;
            let title: u32 = t
                .trim()
                .parse()
                .map_err(|_| format!("invalid title in block citation '{}'", marker.main))?;
            (title, s)
        }
        PatternClass::Inline => {
            let (s, t) = split_inline(&marker.main)
                .ok_or_else(|| format!("could not split inline citation '{}'", marker.main))?;
            let title = extract_title_inline(t.trim(), this_title)
                .ok_or_else(|| format!("could not extract title from '{}'", marker.main))?;
            (title, s)
        }
        PatternClass::Generic => {
            return Err(format!("generic pattern has no US parser: '{}'", marker.main));
        }
    };

    let formatted = preformat_ranges(&sub_text).replace(" and following", " et. seq.");

    let mut references: Vec<Vec<String>> = Vec::new();
    for part in SUB_SPLIT_RE.split(&formatted) {
        let Some((main, sub_sections)) = parse_sub_part(part) else {
            continue;
        };
        match main {
            Some(m) => {
                let mut sections = vec![m];
                sections.extend(sub_sections);
                references.push(sections);
            }
            None => {
                let Some(first) = sub_sections.first() else {
                    continue;
                };
                let Some(last) = references.last() else {
                    continue;
                };
                let current_types = enum_types(first);
                let mut new_reference = None;
                for old_part in last[1..].iter().rev() {
                    if enum_types_match(&current_types, &enum_types(old_part)) {
                        let idx = last.iter().position(|p| p == old_part).unwrap();
                        new_reference = Some(last[..idx].to_vec());
                        break;
                    }
                }
                let mut nr = new_reference.unwrap_or_else(|| last.clone());
                nr.extend(sub_sections);
                references.push(nr);
            }
        }
    }

    Ok(references
        .into_iter()
        .map(|mut sections| {
            sections.insert(0, title.to_string());
            CitationPath::new(sections.into_iter().map(|v| (None, v)).collect())
        })
        .collect())
}

/// Runs [`parse_one_reference`] over every reference marker in a document.
pub fn parse_references(doc: &mut ParsedDocument, this_title: u32) -> Log {
    let mut log = Log::new();
    for node in doc.nodes.iter_mut() {
        let key = node.key.clone();
        for text in node.texts.iter_mut() {
            for marker in text.references_mut() {
                match parse_one_reference(marker, this_title) {
                    Ok(paths) => marker.parsed_verbose = Some(paths),
                    Err(msg) => log.warn(&key, msg),
                }
            }
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(pattern: PatternClass, main: &str) -> ReferenceMarker {
        ReferenceMarker {
            origin: "n1".to_string(),
            pattern,
            main: main.to_string(),
            suffix: None,
            lawname: None,
            law_match_type: None,
            parsed_verbose: None,
        }
    }

    #[test]
    fn dash_range_preformats_to_through_and_splits_into_two_references() {
        let m = marker(PatternClass::Block, "31 U.S.C. 3801-3831");
        let paths = parse_one_reference(&m, 0).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].simple(), vec!["31".to_string(), "3801".to_string()]);
        assert_eq!(paths[1].simple(), vec!["31".to_string(), "3831".to_string()]);
    }

    #[test]
    fn doubled_usc_marker_pairs_into_two_references() {
        let m = marker(PatternClass::Block, "31 U.S.C. 3801-U.S.C. 3831");
        let paths = parse_one_reference(&m, 0).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].simple(), vec!["31".to_string(), "3801".to_string()]);
        assert_eq!(paths[1].simple(), vec!["31".to_string(), "3831".to_string()]);
    }

    #[test]
    fn parses_inline_citation_of_this_title() {
        let m = marker(PatternClass::Inline, "Section 2(a) of this title");
        let paths = parse_one_reference(&m, 5).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[0].simple(),
            vec!["5".to_string(), "2".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn parses_inline_citation_of_named_title() {
        let m = marker(PatternClass::Inline, "section 101 of title 42");
        let paths = parse_one_reference(&m, 5).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].simple(), vec!["42".to_string(), "101".to_string()]);
    }

    #[test]
    fn resolves_bare_subsection_continuation_against_previous_reference() {
        let m = marker(PatternClass::Block, "16 U.S.C. 1531(a) and (b)");
        let paths = parse_one_reference(&m, 0).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(
            paths[0].simple(),
            vec!["16".to_string(), "1531".to_string(), "a".to_string()]
        );
        assert_eq!(
            paths[1].simple(),
            vec!["16".to_string(), "1531".to_string(), "b".to_string()]
        );
    }
}
