//! The hierarchy data model shared by every stage (§3, §6).
//!
//! A document is read once from Hierarchy XML (input of §4.2) as a flat,
//! document-order list of [`NodeRecord`]s — the forest is represented with
//! parent pointers (§3: "Nodes form a forest rooted at documents") rather
//! than child lists, which keeps leaf iteration, citekey lookup, and
//! §5's ordering rule ("within a document, in leaf-text order") a single
//! linear pass. Reference-annotated XML (output of §4.2/§4.3) is the same
//! tree with `<text>` leaves carrying `<reference>` segments.

use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Document,
    Item,
    Seqitem,
    Subseqitem,
}

impl NodeType {
    fn as_tag(&self) -> &'static str {
        match self {
            NodeType::Document => "document",
            NodeType::Item => "item",
            NodeType::Seqitem => "seqitem",
            NodeType::Subseqitem => "subseqitem",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"document" => Some(NodeType::Document),
            b"item" => Some(NodeType::Item),
            b"seqitem" => Some(NodeType::Seqitem),
            b"subseqitem" => Some(NodeType::Subseqitem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Statute,
    Regulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternClass {
    Block,
    Inline,
    Generic,
}

impl PatternClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternClass::Block => "block",
            PatternClass::Inline => "inline",
            PatternClass::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LawMatchType {
    Dict,
    Sgb,
    Internal,
    Eu,
    Ignore,
    Unknown,
}

impl LawMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LawMatchType::Dict => "dict",
            LawMatchType::Sgb => "sgb",
            LawMatchType::Internal => "internal",
            LawMatchType::Eu => "eu",
            LawMatchType::Ignore => "ignore",
            LawMatchType::Unknown => "unknown",
        }
    }

    pub fn resolves_to_edge(&self) -> bool {
        matches!(
            self,
            LawMatchType::Dict | LawMatchType::Sgb | LawMatchType::Internal
        )
    }
}

/// One `(unit, value)` pair of a citation path (§3, §4.3).
pub type PathElement = (Option<String>, String);

/// An ordered, non-empty list of `(unit, value)` pairs; first element is
/// always a law identifier once §4.3's attachment step has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationPath(pub Vec<PathElement>);

impl CitationPath {
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// The "simple" serialization (§4.3): only the value of each pair.
    pub fn simple(&self) -> Vec<String> {
        self.0.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn prepend(&mut self, unit: impl Into<String>, value: impl Into<String>) {
        self.0.insert(0, (Some(unit.into()), value.into()));
    }
}

/// The in-text wrapper produced by §4.2 and filled in by §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMarker {
    pub origin: String,
    pub pattern: PatternClass,
    /// The citation text itself (DE: the `<main>` span; US: the whole match).
    pub main: String,
    /// DE only: the consumed `", (der|des|den|die)? "` connector text.
    pub suffix: Option<String>,
    /// DE only: the law-name suffix text (may be empty for `internal`).
    pub lawname: Option<String>,
    pub law_match_type: Option<LawMatchType>,
    pub parsed_verbose: Option<Vec<CitationPath>>,
}

impl ReferenceMarker {
    pub fn parsed_simple(&self) -> Option<Vec<Vec<String>>> {
        self.parsed_verbose
            .as_ref()
            .map(|paths| paths.iter().map(CitationPath::simple).collect())
    }

    /// Full text this marker spans, including suffix/lawname — used by
    /// property 2 (wrapping preserves text).
    pub fn full_text(&self) -> String {
        let mut s = self.main.clone();
        if let Some(suffix) = &self.suffix {
            s.push_str(suffix);
        }
        if let Some(lawname) = &self.lawname {
            s.push_str(lawname);
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSegment {
    Plain(String),
    Reference(ReferenceMarker),
}

/// The contents of one `<text>` leaf child, after wrapping (§4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafText {
    pub segments: Vec<TextSegment>,
}

impl LeafText {
    pub fn from_plain(s: impl Into<String>) -> Self {
        Self {
            segments: vec![TextSegment::Plain(s.into())],
        }
    }

    /// Concatenation of all text, including inside reference markers —
    /// must equal the pre-wrapping text (§8 property 2).
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                TextSegment::Plain(s) => out.push_str(s),
                TextSegment::Reference(r) => out.push_str(&r.full_text()),
            }
        }
        out
    }

    pub fn references(&self) -> impl Iterator<Item = &ReferenceMarker> {
        self.segments.iter().filter_map(|seg| match seg {
            TextSegment::Reference(r) => Some(r),
            TextSegment::Plain(_) => None,
        })
    }

    pub fn references_mut(&mut self) -> impl Iterator<Item = &mut ReferenceMarker> {
        self.segments.iter_mut().filter_map(|seg| match seg {
            TextSegment::Reference(r) => Some(r),
            TextSegment::Plain(_) => None,
        })
    }

    /// Normalized text used for snapshot mapping (§4.6): lower-case,
    /// whitespace-collapsed.
    pub fn normalized(&self) -> String {
        let raw = self.plain_text();
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.to_lowercase()
    }
}

/// A single node in the hierarchy forest (§3). Document-level metadata
/// (heading_short, abbreviations, document type) is only meaningful on the
/// root node (`node_type == Document`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: String,
    pub level: u32,
    pub node_type: NodeType,
    pub heading: Option<String>,
    pub heading_short: Option<String>,
    pub abbr_1: Option<String>,
    pub abbr_2: Option<String>,
    pub document_type: Option<DocumentType>,
    pub citekey: Option<String>,
    pub parent: Option<String>,
    pub texts: Vec<LeafText>,
}

impl NodeRecord {
    pub fn is_citekeyed(&self) -> bool {
        self.citekey.is_some()
    }
}

/// One parsed document: a forest node list in document order (pre-order
/// depth-first, matching §5's "within a document, in leaf-text order").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub source_path: String,
    pub nodes: Vec<NodeRecord>,
}

impl ParsedDocument {
    pub fn root(&self) -> &NodeRecord {
        &self.nodes[0]
    }

    /// Leaves: seqitem/subseqitem nodes that no other node names as parent.
    pub fn leaves(&self) -> Vec<&NodeRecord> {
        let parents: std::collections::HashSet<&str> = self
            .nodes
            .iter()
            .filter_map(|n| n.parent.as_deref())
            .collect();
        self.nodes
            .iter()
            .filter(|n| {
                matches!(n.node_type, NodeType::Seqitem | NodeType::Subseqitem)
                    && !parents.contains(n.key.as_str())
            })
            .collect()
    }

    pub fn leaves_mut(&mut self) -> impl Iterator<Item = &mut NodeRecord> {
        self.nodes.iter_mut().filter(|n| {
            matches!(n.node_type, NodeType::Seqitem | NodeType::Subseqitem)
        })
    }

    /// Heuristic used by §4.2's German internal/ignore demotion: the
    /// dominant unit for this document's seqitem headings.
    pub fn analyze_heading_units(&self) -> (usize, usize, usize) {
        let (mut para, mut art, mut misc) = (0, 0, 0);
        for node in &self.nodes {
            if node.node_type != NodeType::Seqitem {
                continue;
            }
            match &node.heading {
                None => misc += 1,
                Some(h) => {
                    let h = h.replace('\n', "");
                    if h.starts_with('§') {
                        para += 1;
                    } else if h.to_lowercase().starts_with("art") {
                        art += 1;
                    } else {
                        misc += 1;
                    }
                }
            }
        }
        (para, art, misc)
    }
}

/// Reads a Hierarchy XML document (§6) into a flat, document-order node list.
pub fn read_hierarchy_xml(path: impl AsRef<Path>) -> Result<ParsedDocument> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_hierarchy_xml_str(&String::from_utf8_lossy(&bytes), path.display().to_string())
}

pub fn read_hierarchy_xml_str(xml: &str, source_path: String) -> Result<ParsedDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut nodes: Vec<NodeRecord> = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current_text: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        let ev = reader
            .read_event_into(&mut buf)
            .map_err(|source| PipelineError::MalformedXml {
                path: source_path.clone(),
                source,
            })?;
        match ev {
            Event::Start(tag) if NodeType::from_tag(tag.name().as_ref()).is_some() => {
                let node_type = NodeType::from_tag(tag.name().as_ref()).unwrap();
                let attrs = read_attrs(&tag)?;
                let key = attrs.get("key").cloned().unwrap_or_default();
                let level = attrs
                    .get("level")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let document_type = attrs.get("document_type").map(|v| {
                    if v.eq_ignore_ascii_case("regulation") {
                        DocumentType::Regulation
                    } else {
                        DocumentType::Statute
                    }
                });
                nodes.push(NodeRecord {
                    key: key.clone(),
                    level,
                    node_type,
                    heading: attrs.get("heading").cloned(),
                    heading_short: attrs.get("heading_short").cloned(),
                    abbr_1: attrs.get("abbr_1").cloned(),
                    abbr_2: attrs.get("abbr_2").cloned(),
                    document_type,
                    citekey: attrs.get("citekey").cloned(),
                    parent: stack.last().cloned(),
                    texts: Vec::new(),
                });
                stack.push(key);
            }
            Event::Start(tag) if tag.name().as_ref() == b"text" => {
                current_text = Some(String::new());
            }
            Event::Text(text) => {
                if let Some(buf) = current_text.as_mut() {
                    buf.push_str(&text.unescape().unwrap_or_default());
                }
            }
            Event::End(tag) if tag.name().as_ref() == b"text" => {
                if let Some(content) = current_text.take() {
                    if let Some(parent) = nodes.last_mut() {
                        parent.texts.push(LeafText::from_plain(content));
                    }
                }
            }
            Event::End(tag) if NodeType::from_tag(tag.name().as_ref()).is_some() => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(ParsedDocument { source_path, nodes })
}

fn read_attrs(tag: &BytesStart) -> Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| PipelineError::MalformedXml {
            path: String::new(),
            source: quick_xml::Error::InvalidAttr(e),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .decode_and_unescape_value(&Default::default())
            .unwrap_or_default()
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

/// Writes a reference-annotated document (output of §4.2/§4.3) back to XML.
/// Reconstructs nesting from the flat, level-tagged node list.
pub fn write_reference_annotated_xml(doc: &ParsedDocument, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_nodes(&mut writer, &doc.nodes, 0, &mut 0)?;
    let bytes = writer.into_inner();
    std::fs::write(path.as_ref(), bytes).map_err(|source| PipelineError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })
}

fn write_nodes(
    writer: &mut Writer<Vec<u8>>,
    nodes: &[NodeRecord],
    start: usize,
    cursor: &mut usize,
) -> Result<()> {
    *cursor = start;
    while *cursor < nodes.len() {
        let node = &nodes[*cursor];
        let own_level = node.level;
        let mut start_tag = BytesStart::new(node.node_type.as_tag());
        start_tag.push_attribute(("key", node.key.as_str()));
        start_tag.push_attribute(("level", node.level.to_string().as_str()));
        if let Some(h) = &node.heading {
            start_tag.push_attribute(("heading", h.as_str()));
        }
        if let Some(h) = &node.heading_short {
            start_tag.push_attribute(("heading_short", h.as_str()));
        }
        if let Some(a) = &node.abbr_1 {
            start_tag.push_attribute(("abbr_1", a.as_str()));
        }
        if let Some(a) = &node.abbr_2 {
            start_tag.push_attribute(("abbr_2", a.as_str()));
        }
        if let Some(c) = &node.citekey {
            start_tag.push_attribute(("citekey", c.as_str()));
        }
        writer
            .write_event(Event::Start(start_tag.clone()))
            .map_err(map_write_err)?;

        for text in &node.texts {
            write_text_element(writer, text)?;
        }

        *cursor += 1;
        while *cursor < nodes.len() && nodes[*cursor].level > own_level {
            write_nodes(writer, nodes, *cursor, cursor)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(node.node_type.as_tag())))
            .map_err(map_write_err)?;
    }
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, text: &LeafText) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("text")))
        .map_err(map_write_err)?;
    for seg in &text.segments {
        match seg {
            TextSegment::Plain(s) => {
                writer
                    .write_event(Event::Text(BytesText::new(s)))
                    .map_err(map_write_err)?;
            }
            TextSegment::Reference(r) => write_reference_element(writer, r)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("text")))
        .map_err(map_write_err)
}

fn write_reference_element(writer: &mut Writer<Vec<u8>>, r: &ReferenceMarker) -> Result<()> {
    let mut tag = BytesStart::new("reference");
    tag.push_attribute(("pattern", r.pattern.as_str()));
    if let Some(paths) = &r.parsed_verbose {
        let verbose = serde_json::to_string(
            &paths
                .iter()
                .map(|p| &p.0)
                .collect::<Vec<_>>(),
        )?;
        tag.push_attribute(("parsed_verbose", verbose.as_str()));
        let simple = serde_json::to_string(
            &paths.iter().map(CitationPath::simple).collect::<Vec<_>>(),
        )?;
        tag.push_attribute(("parsed", simple.as_str()));
    }
    writer
        .write_event(Event::Start(tag.clone()))
        .map_err(map_write_err)?;

    if r.suffix.is_some() || r.lawname.is_some() {
        // German shape: <main>/<suffix>/<lawname>
        writer
            .write_event(Event::Start(BytesStart::new("main")))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(&r.main)))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("main")))
            .map_err(map_write_err)?;

        writer
            .write_event(Event::Start(BytesStart::new("suffix")))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(
                r.suffix.as_deref().unwrap_or(""),
            )))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("suffix")))
            .map_err(map_write_err)?;

        let mut lawname_tag = BytesStart::new("lawname");
        if let Some(t) = r.law_match_type {
            lawname_tag.push_attribute(("type", t.as_str()));
        }
        writer
            .write_event(Event::Start(lawname_tag))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(
                r.lawname.as_deref().unwrap_or(""),
            )))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("lawname")))
            .map_err(map_write_err)?;
    } else {
        // US shape: raw textual content
        writer
            .write_event(Event::Text(BytesText::new(&r.main)))
            .map_err(map_write_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("reference")))
        .map_err(map_write_err)
}

fn map_write_err(source: quick_xml::Error) -> PipelineError {
    PipelineError::MalformedXml {
        path: String::new(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<document key="BGB_1" level="0" heading="Bürgerliches Gesetzbuch" abbr_1="BGB">
<seqitem level="1" heading="§ 1" citekey="bgb_1">
<text>Die Rechtsfähigkeit des Menschen beginnt mit der Vollendung der Geburt.</text>
</seqitem>
<seqitem level="1" heading="§ 2" citekey="bgb_2">
<text>Die Volljährigkeit tritt mit der Vollendung des achtzehnten Lebensjahres ein.</text>
</seqitem>
</document>"#;

    #[test]
    fn parses_flat_forest_in_document_order() {
        let doc = read_hierarchy_xml_str(SAMPLE_XML, "test.xml".into()).unwrap();
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.root().key, "BGB_1");
        assert_eq!(doc.root().abbr_1.as_deref(), Some("BGB"));
        let leaves = doc.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].citekey.as_deref(), Some("bgb_1"));
        assert_eq!(leaves[0].parent.as_deref(), Some("BGB_1"));
    }

    #[test]
    fn leaf_text_round_trips_plain_content() {
        let doc = read_hierarchy_xml_str(SAMPLE_XML, "test.xml".into()).unwrap();
        let leaves = doc.leaves();
        assert!(leaves[0].texts[0]
            .plain_text()
            .contains("Rechtsfähigkeit"));
    }
}
