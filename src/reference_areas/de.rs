//! German reference-area detection, grounded in
//! `original_source/statutes_pipeline_steps/de_reference_areas.py`.
//!
//! The original recognizes a trigger-plus-range expression with a single
//! `regex` crate `(?(DEFINE)...)` grammar that relies on recursive named
//! groups Rust's `regex` crate cannot express. Per SPEC_FULL §3 this is
//! reimplemented as an explicit scanner over the same token classes
//! (`numb`, `wordnumb`, `unit`, `conn`), each recognized by a small
//! `^`-anchored regex tried at the current cursor position.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::hierarchy::{
    LawMatchType, LeafText, NodeRecord, ParsedDocument, PatternClass, ReferenceMarker, TextSegment,
};
use crate::law_names::stem;
use crate::stage_log::Log;

use super::DetectionContext;

static TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(§{1,2}|\bArt\b\.?|Artikels?n?)\s*").unwrap());

static NUMB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\d+(?:\.\d+)*[a-z]?|[ivx]+|[a-z]\)?)(?:\s?ff?\.?)?").unwrap()
});

static WORDNUMB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:erste|zweite|dritte|letzte)r?s?").unwrap());

static UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:Art\.?|Artikeln?s?|§{1,2}|Nrn?\.?|Nummer|Abs\.?|Absatz|Abs(?:ä|ae)tze|Unterabsatz|Unterabs\.?|S\.?|Satz|S(?:ä|ae)tze|Ziffern?|Ziffn?\.?|Buchstaben?|Buchst\.?|Halbsatz|Teilsatz|Abschnitte?|Abschn\.?|Alternativen?|Alt\.?|Anhang|Anh(?:ä|ae)nge)",
    )
    .unwrap()
});

static CONN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^,?(?:,\s*|\s+und\s+|\s+sowie\s+|\s+bis\s+|\s+oder\s+|(?:\s+jeweils)?(?:\s+auch)?\s+(?:in\s+Verbindung\s+mit|i\.?\s?v\.?\s?m\.?)\s+)(?:nach\s+)?(?:(?:der|des|den|die)\s+)?",
    )
    .unwrap()
});

static LAW_SUFFIX_WITH_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^,?\s+?de[sr]\s+").unwrap());

static LAW_SUFFIX_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\n]+").unwrap());

static WORD_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+|[\W']+").unwrap());

static EU_LAW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:Delegierten )?(?:Durchführungs)?(?:Verordnung|Richtlinie)\s?\((?:EU|EWG|EG|Euratom)\)\s+(?:Nr\.\s+)?\d+/\d+|(?:Durchführungs)?(?:Richtlinie|Entscheidung)\s+\d+/\d+/(?:EWG|EG|EU)\b|(?:Rahmen)?beschlusses\s\d+/\d+/\w\w\b)",
    )
    .unwrap()
});

static SGB_LAW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:erst|zweit|dritt|viert|fünft|sechst|siebt|acht|neunt|zehnt|elft|zwölft|\d{1,2}\.)e(?:n|s)?\s?buche?s?(?:(?:\s?des)?\s?sozialgesetzbuche?s?)?|SGB(?:\s|\-)(?:(?:I|II|III|IV|V|VI|VII|VIII|IX|X|XI|XII)\b|\d{1,2}))",
    )
    .unwrap()
});

static IGNORE_NO_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:dieser Verordnung|(?:G|AnO)\s?[i\d\-/]*\s?v(?:om)?\.?\s?\d+\.\s?\d+\.\s?\d+(?:\s+I+)?\s+[\d\-]+)").unwrap()
});

static IGNORE_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:Gesetzes|Anordnung)\svom\s\d+\.\s\w+\s\d+\s\(BGBl\.\sI\sS\.\s\d+\)|(?:[\w\-äöüÄÖÜß]{1,60}\s|\d+\.\s|Nr\.\s){0,8}[\w\-äöüÄÖÜß]{3,60}(?:ordnung|gesetz|gesetzbuch|gesetzesbuch|übereinkommen|statut|vertrag)(?:er|en|es|s)?(?:\s\(?.{0,50})?|Anlage\b)",
    )
    .unwrap()
});

fn try_match(re: &Regex, text: &str, pos: usize) -> Option<usize> {
    re.find(&text[pos..]).map(|m| pos + m.end())
}

/// Largest byte index `<= max_bytes` that lands on a char boundary of `s`,
/// so the UTF-8 multi-byte German characters in law names (ä/ö/ü/ß) never
/// split a code point when the law-name lookahead window is capped.
fn safe_byte_cap(s: &str, max_bytes: usize) -> usize {
    let mut cap = max_bytes.min(s.len());
    while !s.is_char_boundary(cap) {
        cap -= 1;
    }
    cap
}

fn skip_spaces(text: &str, pos: usize) -> usize {
    let mut p = pos;
    while text[p..].starts_with(' ') {
        p += 1;
    }
    p
}

fn skip_one_space(text: &str, pos: usize) -> Option<usize> {
    let c = text[pos..].chars().next()?;
    c.is_whitespace().then(|| pos + c.len_utf8())
}

fn skip_one_or_more_spaces(text: &str, pos: usize) -> Option<usize> {
    let after_one = skip_one_space(text, pos)?;
    Some(skip_spaces(text, after_one))
}

/// Attempts one more "range extension" step at `pos` per the original's
/// `(main)` repetition group, returning the new position if one of the four
/// alternatives (conn+unit+numb | conn+numb | unit+numb | conn?+wordnumb+unit)
/// matched. Unlike the PCRE-style original, this does not backtrack a
/// shared leading `\s*` across alternatives; each alternative instead
/// consumes exactly the whitespace it needs, which is equivalent for
/// well-formed legal text (the only text this grammar is meant to match).
fn extend_range(text: &str, pos: usize) -> Option<usize> {
    if let Some(after_conn) = try_match(&CONN_RE, text, pos) {
        if let Some(after_unit) = try_match(&UNIT_RE, text, after_conn) {
            if let Some(ws_end) = skip_one_space(text, after_unit) {
                if let Some(after_numb) = try_match(&NUMB_RE, text, ws_end) {
                    if after_numb > ws_end {
                        return Some(after_numb);
                    }
                }
            }
        }
        if let Some(after_numb) = try_match(&NUMB_RE, text, after_conn) {
            if after_numb > after_conn {
                return Some(after_numb);
            }
        }
    }

    let unit_start = skip_spaces(text, pos);
    if let Some(after_unit) = try_match(&UNIT_RE, text, unit_start) {
        if let Some(ws_end) = skip_one_space(text, after_unit) {
            if let Some(after_numb) = try_match(&NUMB_RE, text, ws_end) {
                if after_numb > ws_end {
                    return Some(after_numb);
                }
            }
        }
    }

    let wordnumb_start = try_match(&CONN_RE, text, pos).unwrap_or_else(|| skip_spaces(text, pos));
    if let Some(after_wordnumb) = try_match(&WORDNUMB_RE, text, wordnumb_start) {
        if let Some(ws_end) = skip_one_or_more_spaces(text, after_wordnumb) {
            if let Some(after_unit) = try_match(&UNIT_RE, text, ws_end) {
                if after_unit > ws_end {
                    return Some(after_unit);
                }
            }
        }
    }
    None
}

/// Scans the "main" range expression starting exactly at `start` (the
/// position right after the trigger). Returns `start` unchanged if no
/// `numb` token is found there (an empty/absent main group, per the
/// original's optional `(?P<main>...)?`).
fn scan_main(text: &str, start: usize) -> usize {
    let mut pos = match try_match(&NUMB_RE, text, start) {
        Some(end) if end > start => end,
        _ => return start,
    };
    while let Some(next) = extend_range(text, pos) {
        if next <= pos {
            break;
        }
        pos = next;
    }
    pos
}

struct SuffixResult {
    suffix_len: usize,
    law_len: usize,
    law_match_type: LawMatchType,
}

fn classify_suffix(
    remaining: &str,
    registry: &crate::law_names::LawNameRegistry,
) -> SuffixResult {
    if let Some(m) = LAW_SUFFIX_WITH_ARTICLE.find(remaining) {
        let suffix_len = m.end();
        let law_test = &remaining[suffix_len..safe_byte_cap(remaining, suffix_len + 1000)];

        if let Some(len) = dict_law_name_len(law_test, registry) {
            return SuffixResult {
                suffix_len,
                law_len: len,
                law_match_type: LawMatchType::Dict,
            };
        }
        if let Some(m) = SGB_LAW_RE.find(law_test) {
            return SuffixResult {
                suffix_len,
                law_len: m.end(),
                law_match_type: LawMatchType::Sgb,
            };
        }
        if let Some(m) = EU_LAW_RE.find(law_test) {
            return SuffixResult {
                suffix_len,
                law_len: m.end(),
                law_match_type: LawMatchType::Eu,
            };
        }
        if let Some(m) = IGNORE_SUFFIX_RE.find(law_test) {
            return SuffixResult {
                suffix_len,
                law_len: m.end(),
                law_match_type: LawMatchType::Ignore,
            };
        }
        return SuffixResult {
            suffix_len,
            law_len: 0,
            law_match_type: LawMatchType::Unknown,
        };
    }

    let bare_window = safe_byte_cap(remaining, 1000);
    if let Some(m) = LAW_SUFFIX_BARE.find(&remaining[..bare_window]) {
        let suffix_len = m.end();
        let law_test = &remaining[suffix_len..bare_window];

        if let Some(len) = dict_law_name_len(law_test, registry) {
            return SuffixResult {
                suffix_len,
                law_len: len,
                law_match_type: LawMatchType::Dict,
            };
        }
        if let Some(m) = SGB_LAW_RE.find(law_test) {
            return SuffixResult {
                suffix_len,
                law_len: m.end(),
                law_match_type: LawMatchType::Sgb,
            };
        }
        if let Some(m) = IGNORE_NO_SUFFIX_RE.find(law_test) {
            return SuffixResult {
                suffix_len,
                law_len: m.end(),
                law_match_type: LawMatchType::Ignore,
            };
        }
    }

    // No law name recognized after the trigger: the citation refers to the
    // document being parsed (§4.2's `internal` classification). The
    // candidate whitespace consumed while looking for one is not kept —
    // there is no law-name suffix to separate it from.
    SuffixResult {
        suffix_len: 0,
        law_len: 0,
        law_match_type: LawMatchType::Internal,
    }
}

/// `get_dict_law_name_len`: the law-name prefix, stemmed, must match a
/// registry key (`LawNameRegistry::match_prefix`) *and* the last matched
/// word, re-stemmed, must equal the registry key's last word — this is the
/// "ends on a token boundary" requirement of §4.2.
fn dict_law_name_len(test_str: &str, registry: &crate::law_names::LawNameRegistry) -> Option<usize> {
    let test_stem = stem(test_str);
    let (matched_key, _law_id) = registry.match_prefix(&test_stem)?;

    let test_tokens: Vec<&str> = WORD_TOKEN_RE.find_iter(test_str).map(|m| m.as_str()).collect();
    let match_tokens: Vec<&str> = WORD_TOKEN_RE.find_iter(matched_key).map(|m| m.as_str()).collect();
    if match_tokens.is_empty() || match_tokens.len() > test_tokens.len() {
        return None;
    }
    let match_raw: String = test_tokens[..match_tokens.len()].concat();

    let last_word_test_stemmed = stem(test_tokens[match_tokens.len() - 1]);
    let last_word_match = match_tokens[match_tokens.len() - 1];
    if last_word_match != last_word_test_stemmed {
        return None;
    }
    Some(match_raw.len())
}

/// Walks every leaf `<text>` node of a document and wraps citation spans
/// (`find_references_in_soup`/`find_references_in_section`).
pub fn detect(doc: &mut ParsedDocument, ctx: &DetectionContext) -> Log {
    let mut log = Log::new();
    let (para, art, _misc) = doc.analyze_heading_units();
    for node in doc.nodes.iter_mut() {
        detect_in_node(node, ctx, para, art, &mut log);
    }
    log
}

fn detect_in_node(node: &mut NodeRecord, ctx: &DetectionContext, para: usize, art: usize, log: &mut Log) {
    let key = node.key.clone();
    for text in node.texts.iter_mut() {
        detect_in_leaf_text(text, ctx, para, art, &key, log);
    }
}

fn detect_in_leaf_text(
    text: &mut LeafText,
    ctx: &DetectionContext,
    para: usize,
    art: usize,
    origin: &str,
    log: &mut Log,
) {
    let original = text.plain_text();
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    loop {
        let Some(trigger) = TRIGGER_RE.find(&original[cursor..]) else {
            break;
        };
        let trigger_start = cursor + trigger.start();
        let trigger_end = cursor + trigger.end();

        let main_end = scan_main(&original, trigger_end);
        if main_end == trigger_end {
            // No range expression followed the trigger; not a citation.
            cursor = trigger_end.max(trigger_start + 1);
            continue;
        }

        let mut classification = classify_suffix(&original[main_end..], ctx.registry);
        if matches!(classification.law_match_type, LawMatchType::Internal) {
            let leading = &original[trigger_start..];
            let is_section_sign = leading.starts_with('§');
            let is_art = leading.to_lowercase().starts_with("art");
            if (is_section_sign && para == 0) || (is_art && art == 0) {
                classification.law_match_type = LawMatchType::Ignore;
            }
        }

        let suffix_start = main_end;
        let law_start = main_end + classification.suffix_len;
        let law_end = law_start + classification.law_len;

        if trigger_start > cursor {
            segments.push(TextSegment::Plain(original[cursor..trigger_start].to_string()));
        }

        let main = original[trigger_start..main_end].to_string();
        let suffix = original[suffix_start..law_start].to_string();
        let lawname = original[law_start..law_end].to_string();

        if matches!(classification.law_match_type, LawMatchType::Unknown) {
            log.warn(origin, format!("unrecognized law suffix after '{main}'"));
        }

        segments.push(TextSegment::Reference(ReferenceMarker {
            origin: origin.to_string(),
            pattern: PatternClass::Inline,
            main,
            suffix: Some(suffix),
            lawname: Some(lawname),
            law_match_type: Some(classification.law_match_type),
            parsed_verbose: None,
        }));

        cursor = law_end;
    }

    if cursor < original.len() {
        segments.push(TextSegment::Plain(original[cursor..].to_string()));
    }
    if segments.is_empty() {
        segments.push(TextSegment::Plain(original));
    }
    text.segments = segments;
}

/// The "references without a preceding trigger" path the original leaves
/// commented out in `de_reference_areas` (`law_keys_to_regex` /
/// `find_law_references_in_section`, never wired into `de_reference_areas`'s
/// call site). Rather than the original's "stem the whole leaf text, match a
/// big keys alternation against the stemmed copy, then map positions back
/// into the original" indirection, this scans the original text's word runs
/// directly and reuses `dict_law_name_len`'s token-based matcher at each
/// candidate start — equivalent in result, without a separate
/// stemmed-to-original position map.
pub fn detect_generic(doc: &mut ParsedDocument, ctx: &DetectionContext) -> Log {
    let log = Log::new();
    for node in doc.nodes.iter_mut() {
        for text in node.texts.iter_mut() {
            let mut rebuilt = Vec::with_capacity(text.segments.len());
            for seg in std::mem::take(&mut text.segments) {
                match seg {
                    TextSegment::Plain(s) => {
                        rebuilt.extend(scan_generic(&s, ctx.registry, &node.key));
                    }
                    reference => rebuilt.push(reference),
                }
            }
            text.segments = rebuilt;
        }
    }
    log
}

fn scan_generic(text: &str, registry: &crate::law_names::LawNameRegistry, origin: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut last_end = 0usize;

    for word_start in WORD_RUN_STARTS_RE.find_iter(text) {
        let pos = word_start.start();
        if pos < last_end {
            continue;
        }
        let Some(len) = dict_law_name_len(&text[pos..], registry) else {
            continue;
        };
        if len == 0 {
            continue;
        }
        let end = pos + len;

        if pos > last_end {
            segments.push(TextSegment::Plain(text[last_end..pos].to_string()));
        }
        segments.push(TextSegment::Reference(ReferenceMarker {
            origin: origin.to_string(),
            pattern: PatternClass::Generic,
            main: text[pos..end].to_string(),
            suffix: None,
            lawname: None,
            law_match_type: None,
            parsed_verbose: None,
        }));
        last_end = end;
    }

    if last_end < text.len() {
        segments.push(TextSegment::Plain(text[last_end..].to_string()));
    }
    if segments.is_empty() {
        segments.push(TextSegment::Plain(text.to_string()));
    }
    segments
}

static WORD_RUN_STARTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{DocumentType, NodeType};
    use crate::law_names::{LawNameAlias, LawNameRegistry};
    use chrono::NaiveDate;

    fn registry_with_gg() -> std::sync::Arc<LawNameRegistry> {
        let d = NaiveDate::parse_from_str("2020-01-01", "%Y-%m-%d").unwrap();
        LawNameRegistry::build(
            &[LawNameAlias {
                law_id: "GG".into(),
                name: "Grundgesetz".into(),
                start: NaiveDate::parse_from_str("1949-01-01", "%Y-%m-%d").unwrap(),
                end: NaiveDate::parse_from_str("2099-01-01", "%Y-%m-%d").unwrap(),
            }],
            d,
        )
    }

    fn leaf_node(key: &str, heading: &str, text: &str) -> NodeRecord {
        NodeRecord {
            key: key.into(),
            level: 1,
            node_type: NodeType::Seqitem,
            heading: Some(heading.into()),
            heading_short: None,
            abbr_1: None,
            abbr_2: None,
            document_type: None,
            citekey: Some(format!("test_{key}")),
            parent: Some("root".into()),
            texts: vec![LeafText::from_plain(text)],
        }
    }

    fn doc_with(text: &str, heading: &str) -> ParsedDocument {
        ParsedDocument {
            source_path: "t.xml".into(),
            nodes: vec![
                NodeRecord {
                    key: "root".into(),
                    level: 0,
                    node_type: NodeType::Document,
                    heading: Some("Test".into()),
                    heading_short: None,
                    abbr_1: Some("TST".into()),
                    abbr_2: None,
                    document_type: Some(DocumentType::Statute),
                    citekey: None,
                    parent: None,
                    texts: vec![],
                },
                leaf_node("root_1", heading, text),
            ],
        }
    }

    #[test]
    fn wraps_internal_paragraph_reference() {
        let registry = registry_with_gg();
        let ctx = DetectionContext {
            registry: registry.as_ref(),
            document_law_id: "TST",
        };
        let mut doc = doc_with("Nach § 6 Absatz 1 ist das zulässig.", "§ 1");
        let log = detect(&mut doc, &ctx);
        assert!(log.entries().is_empty());
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].main, "§ 6 Absatz 1");
        assert_eq!(refs[0].law_match_type, Some(LawMatchType::Internal));
    }

    #[test]
    fn wraps_dict_law_reference() {
        let registry = registry_with_gg();
        let ctx = DetectionContext {
            registry: registry.as_ref(),
            document_law_id: "TST",
        };
        let mut doc = doc_with("Siehe Art. 1 Abs. 1 des Grundgesetzes.", "Art. 1");
        let log = detect(&mut doc, &ctx);
        assert!(log.entries().is_empty());
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].law_match_type, Some(LawMatchType::Dict));
    }

    #[test]
    fn wrapping_preserves_full_text() {
        let registry = registry_with_gg();
        let ctx = DetectionContext {
            registry: registry.as_ref(),
            document_law_id: "TST",
        };
        let original = "Nach § 6 Absatz 1 Nummer 2 ist das der Fall, siehe auch § 7.";
        let mut doc = doc_with(original, "§ 1");
        detect(&mut doc, &ctx);
        assert_eq!(doc.nodes[1].texts[0].plain_text(), original);
    }
}
