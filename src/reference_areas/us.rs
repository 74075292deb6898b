//! US reference-area detection, grounded in
//! `original_source/statutes_pipeline_steps/us_reference_areas.py`.
//!
//! The original recognizes two grammars, `usc_pattern` (block citations like
//! "16 U.S.C. 1531 et seq.") and `inline_pattern` ("Section 2 of this
//! title"), sharing a `(?(DEFINE)...)` set of `sec`/`numb`/`conn` named
//! groups. As in `de`, Rust's `regex` crate has neither recursive named
//! groups nor lookaround, so each shared group becomes a small `^`-anchored
//! regex tried at a cursor, and the trailing negative lookahead of
//! `usc_pattern` becomes a manual post-match check.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::hierarchy::{NodeRecord, ParsedDocument, PatternClass, ReferenceMarker, TextSegment};
use crate::stage_log::Log;

static SEC_HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+[\da-zA-Z\-–—.]*").unwrap());
/// A repeated trigger phrase (e.g. the second "U.S.C." in
/// "3801-U.S.C. 3831") swallowed into `SEC_HEAD_RE`'s continuation class —
/// it doesn't belong to this section number, it reintroduces the same
/// citation, so `parse_sec` clips it off and bridges straight through to
/// whatever section number follows it.
static EMBEDDED_TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-?U\.?S\.?C\.?\s*").unwrap());
static SEC_PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\(\d*[a-z]{0,3}i*\)").unwrap());
static SEC_ET_SEQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s+et\.?\s+seq\.?").unwrap());
static SEC_AND_FOLLOWING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s+and\sfollowing").unwrap());

static NUMB_PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\(\d*[a-z]{0,2}i?\)").unwrap());

static CONN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:,?\s+(?:and|or|to|through)\s+|[,;]\s+)").unwrap()
});

static SEC_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:Sec(?:tion|\.)?|§)").unwrap());

static USC_TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*U\.?S\.?C\.?\s*(?:Sec(?:tion|\.)?|§)?\s*").unwrap());

static INLINE_TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Sec(?:tion|\.)?|§)\s*").unwrap());

static INLINE_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:of\s+this\s+title|of\s+title\s+\d+)").unwrap());

/// The original's trailing `(?!\w*(\sApp\.)?\s(U\.?S\.?C\.?|C\.?F\.?R\.?|Stat\.))`:
/// a block citation immediately followed by another title marker is not two
/// citations, it's one citation's boundary having been mis-split, so the
/// whole match is discarded instead of emitted.
static FOLLOWED_BY_TITLE_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\w*(?:\sApp\.)?\s(?:U\.?S\.?C\.?|C\.?F\.?R\.?|Stat\.)").unwrap()
});

fn try_match(re: &Regex, text: &str, pos: usize) -> Option<usize> {
    re.find(&text[pos..]).map(|m| pos + m.end())
}

/// `sec`: a digit run with trailing alnum/dash/dot filler (the `(?<!\.)`
/// lookbehind becomes trimming trailing dots back off the match, which can
/// never eat into the mandatory leading `\d+` since that run has no dots in
/// it), then zero or more `(x)`-style subsections, then optional `et seq.`
/// and `and following` tails.
fn parse_sec(text: &str, pos: usize) -> Option<usize> {
    let head_end = try_match(&SEC_HEAD_RE, text, pos)?;
    let mut end = head_end;
    while end > pos && text[..end].ends_with('.') {
        end -= 1;
    }
    if end == pos {
        return None;
    }

    // If the continuation class swallowed a second trigger phrase, it isn't
    // part of this section number — clip the match back to before it and
    // bridge through to the section number that follows, rather than
    // truncating the citation at an arbitrary point mid-phrase.
    if let Some(m) = EMBEDDED_TRIGGER_RE.find(&text[pos..]) {
        let abs_start = pos + m.start();
        let abs_end = pos + m.end();
        if abs_start > pos && abs_start < head_end {
            end = abs_start;
            if let Some(bridged) = parse_sec(text, abs_end) {
                end = bridged;
            }
        }
    }

    let mut cursor = end;
    while let Some(next) = try_match(&SEC_PAREN_RE, text, cursor) {
        if next <= cursor {
            break;
        }
        cursor = next;
    }
    if let Some(next) = try_match(&SEC_ET_SEQ_RE, text, cursor) {
        cursor = next;
    }
    if let Some(next) = try_match(&SEC_AND_FOLLOWING_RE, text, cursor) {
        cursor = next;
    }
    Some(cursor)
}

/// `numb`: one or more `(x)`-style subsections (no law/section number of its
/// own — used only for a bare continuation like ", (b) and (c)"), then an
/// optional `et seq.` tail.
fn parse_numb(text: &str, pos: usize) -> Option<usize> {
    let mut cursor = try_match(&NUMB_PAREN_RE, text, pos)?;
    while let Some(next) = try_match(&NUMB_PAREN_RE, text, cursor) {
        if next <= cursor {
            break;
        }
        cursor = next;
    }
    if let Some(next) = try_match(&SEC_ET_SEQ_RE, text, cursor) {
        cursor = next;
    }
    Some(cursor)
}

/// One repetition step of `((?&conn)(Sec...)?\s*(?&sec)|(?&conn)(?&numb))*`:
/// a connector followed by either another full section or a bare
/// subsection continuation.
fn extend_citation(text: &str, pos: usize) -> Option<usize> {
    let after_conn = try_match(&CONN_RE, text, pos)?;

    let after_marker = try_match(&SEC_MARKER_RE, text, after_conn).unwrap_or(after_conn);
    let mut ws_end = after_marker;
    while text[ws_end..].starts_with(' ') {
        ws_end += 1;
    }
    if let Some(after_sec) = parse_sec(text, ws_end) {
        if after_sec > pos {
            return Some(after_sec);
        }
    }

    if let Some(after_numb) = parse_numb(text, after_conn) {
        if after_numb > pos {
            return Some(after_numb);
        }
    }
    None
}

fn scan_repetition(text: &str, start: usize) -> usize {
    let mut pos = start;
    while let Some(next) = extend_citation(text, pos) {
        pos = next;
    }
    pos
}

/// Walks `usc_pattern`: "`<title>` U.S.C. `<sec>` (`<conn>` `<sec>`|`<numb>`)*",
/// rejecting a match immediately followed by another title marker.
fn scan_usc(text: &str, origin: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut last_end = 0usize;
    let mut cursor = 0usize;

    loop {
        let Some(trigger) = USC_TRIGGER_RE.find(&text[cursor..]) else {
            break;
        };
        let trigger_start = cursor + trigger.start();
        let after_trigger = cursor + trigger.end();

        let Some(after_sec) = parse_sec(text, after_trigger) else {
            cursor = after_trigger;
            continue;
        };
        let end = scan_repetition(text, after_sec);

        if FOLLOWED_BY_TITLE_MARKER_RE.is_match(&text[end..]) {
            cursor = after_trigger;
            continue;
        }

        if trigger_start > last_end {
            segments.push(TextSegment::Plain(text[last_end..trigger_start].to_string()));
        }
        segments.push(TextSegment::Reference(ReferenceMarker {
            origin: origin.to_string(),
            pattern: PatternClass::Block,
            main: text[trigger_start..end].to_string(),
            suffix: None,
            lawname: None,
            law_match_type: None,
            parsed_verbose: None,
        }));
        last_end = end;
        cursor = end;
    }

    if last_end < text.len() {
        segments.push(TextSegment::Plain(text[last_end..].to_string()));
    }
    if segments.is_empty() {
        segments.push(TextSegment::Plain(text.to_string()));
    }
    segments
}

/// Walks `inline_pattern`: "Section `<sec>` (`<conn>` `<sec>`|`<numb>`)*
/// of this title|of title `<n>`" — the trailing "of ..." suffix is
/// mandatory, unlike `usc_pattern`'s trailing check.
fn scan_inline(text: &str, origin: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut last_end = 0usize;
    let mut cursor = 0usize;

    loop {
        let Some(trigger) = INLINE_TRIGGER_RE.find(&text[cursor..]) else {
            break;
        };
        let trigger_start = cursor + trigger.start();
        let after_trigger = cursor + trigger.end();

        let Some(after_sec) = parse_sec(text, after_trigger) else {
            cursor = after_trigger;
            continue;
        };
        let after_rep = scan_repetition(text, after_sec);

        let Some(end) = try_match(&INLINE_SUFFIX_RE, text, after_rep) else {
            cursor = after_trigger;
            continue;
        };

        if trigger_start > last_end {
            segments.push(TextSegment::Plain(text[last_end..trigger_start].to_string()));
        }
        segments.push(TextSegment::Reference(ReferenceMarker {
            origin: origin.to_string(),
            pattern: PatternClass::Inline,
            main: text[trigger_start..end].to_string(),
            suffix: None,
            lawname: None,
            law_match_type: None,
            parsed_verbose: None,
        }));
        last_end = end;
        cursor = end;
    }

    if last_end < text.len() {
        segments.push(TextSegment::Plain(text[last_end..].to_string()));
    }
    if segments.is_empty() {
        segments.push(TextSegment::Plain(text.to_string()));
    }
    segments
}

/// Runs the block pass over a whole leaf text, then the inline pass over
/// whatever plain text the block pass left behind — mirroring the
/// original's two separate `find_references` calls, where the second only
/// ever sees the `NavigableString` siblings the first pass didn't already
/// replace with `<reference>` tags.
pub fn detect(doc: &mut ParsedDocument) -> Log {
    let log = Log::new();
    for node in doc.nodes.iter_mut() {
        detect_in_node(node);
    }
    log
}

fn detect_in_node(node: &mut NodeRecord) {
    let key = node.key.clone();
    for text in node.texts.iter_mut() {
        let original = text.plain_text();
        let block_segments = scan_usc(&original, &key);

        let mut final_segments = Vec::new();
        for seg in block_segments {
            match seg {
                TextSegment::Plain(s) if !s.is_empty() => {
                    final_segments.extend(scan_inline(&s, &key));
                }
                TextSegment::Plain(_) => {}
                reference => final_segments.push(reference),
            }
        }
        if final_segments.is_empty() {
            final_segments.push(TextSegment::Plain(String::new()));
        }
        text.segments = final_segments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{DocumentType, LeafText, NodeType};

    fn doc_with(text: &str) -> ParsedDocument {
        ParsedDocument {
            source_path: "t.xml".into(),
            nodes: vec![
                NodeRecord {
                    key: "root".into(),
                    level: 0,
                    node_type: NodeType::Document,
                    heading: Some("Test".into()),
                    heading_short: None,
                    abbr_1: Some("usc26".into()),
                    abbr_2: None,
                    document_type: Some(DocumentType::Statute),
                    citekey: None,
                    parent: None,
                    texts: vec![],
                },
                NodeRecord {
                    key: "root_1".into(),
                    level: 1,
                    node_type: NodeType::Seqitem,
                    heading: Some("1".into()),
                    heading_short: None,
                    abbr_1: None,
                    abbr_2: None,
                    document_type: None,
                    citekey: Some("test_root_1".into()),
                    parent: Some("root".into()),
                    texts: vec![LeafText::from_plain(text)],
                },
            ],
        }
    }

    #[test]
    fn wraps_block_citation_with_dash_range() {
        let mut doc = doc_with("See 31 U.S.C. 3801-3831 for the relevant definitions.");
        detect(&mut doc);
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].main, "31 U.S.C. 3801-3831");
        assert_eq!(refs[0].pattern, PatternClass::Block);
    }

    #[test]
    fn wraps_block_citation_with_connector_chain() {
        let mut doc = doc_with("As provided in 16 U.S.C. 1531 and 1532, the term applies.");
        detect(&mut doc);
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].main, "16 U.S.C. 1531 and 1532");
    }

    #[test]
    fn wraps_inline_citation_of_this_title() {
        let mut doc = doc_with("Notwithstanding Section 2(a) of this title, the rule holds.");
        detect(&mut doc);
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].main, "Section 2(a) of this title");
        assert_eq!(refs[0].pattern, PatternClass::Inline);
    }

    #[test]
    fn discards_block_citation_immediately_followed_by_another_title_marker() {
        let mut doc = doc_with("5 U.S.C. 101 U.S.C.");
        detect(&mut doc);
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert!(refs.is_empty());
    }

    #[test]
    fn wraps_doubled_usc_marker_as_one_block_reference() {
        let mut doc = doc_with("See 31 U.S.C. 3801-U.S.C. 3831 for the relevant definitions.");
        detect(&mut doc);
        let refs: Vec<_> = doc.nodes[1].texts[0].references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].main, "31 U.S.C. 3801-U.S.C. 3831");
    }

    #[test]
    fn wrapping_preserves_full_text() {
        let original = "See 31 U.S.C. 3801-3831 and Section 2 of this title for details.";
        let mut doc = doc_with(original);
        detect(&mut doc);
        assert_eq!(doc.nodes[1].texts[0].plain_text(), original);
    }
}
