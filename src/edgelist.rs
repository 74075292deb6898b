//! Edge list materialization (§4.5), grounded in
//! `original_source/statutes_pipeline_steps/{de,us}_crossreference_edgelist.py`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hierarchy::{CitationPath, ParsedDocument};
use crate::lookup::CitekeyLookup;

/// `EdgeListMode::Simple` is the literal source behavior (`"_".join(ref[:2])`,
/// a single two-element key); `EdgeListMode::Detailed` is spec.md §4.5 point
/// 1's additional deeper walk, not present in `original_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeListMode {
    Simple,
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub out_node: String,
    pub in_node: String,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeListResult {
    pub edges: Vec<Edge>,
    /// Candidate keys that matched no lookup entry (§4.5 point 2, §7
    /// "missing target in lookup" — counted, not fatal).
    pub problem_keys: HashSet<String>,
}

/// Builds the ordered candidate key list for one simple citation path.
/// Simple mode tries only `"<law-id>_<v1>"`; detailed mode tries
/// `"<law-id>_<v1>_..._<v_{j-1}>"` for `j` from the full path length down
/// to 2, longest first.
fn candidate_keys(simple_path: &[String], mode: EdgeListMode) -> Vec<String> {
    let k = simple_path.len();
    if k < 2 {
        return Vec::new();
    }
    match mode {
        EdgeListMode::Simple => vec![simple_path[..2].join("_")],
        EdgeListMode::Detailed => (2..=k).rev().map(|j| simple_path[..j].join("_")).collect(),
    }
}

/// Joins a reference marker's parsed simple paths against a citekey
/// lookup, in document/file/leaf-text/byte order (§5 "Ordering"). Only
/// markers whose law-match-type resolves to an edge (dict/sgb/internal)
/// are considered.
pub fn materialize(docs: &[ParsedDocument], lookup: &CitekeyLookup, mode: EdgeListMode) -> EdgeListResult {
    let mut result = EdgeListResult::default();
    for doc in docs {
        for node in &doc.nodes {
            for text in &node.texts {
                for marker in text.references() {
                    let Some(law_match_type) = marker.law_match_type else {
                        continue;
                    };
                    if !law_match_type.resolves_to_edge() {
                        continue;
                    }
                    let Some(paths) = marker.parsed_simple() else {
                        continue;
                    };
                    for simple_path in paths {
                        if simple_path.len() <= 1 {
                            continue;
                        }
                        resolve_one(&marker.origin, &simple_path, lookup, mode, &mut result);
                    }
                }
            }
        }
    }
    result
}

fn resolve_one(
    out_node: &str,
    simple_path: &[String],
    lookup: &CitekeyLookup,
    mode: EdgeListMode,
    result: &mut EdgeListResult,
) {
    let keys = candidate_keys(simple_path, mode);
    for key in &keys {
        if let Some(target) = lookup.get(key) {
            result.edges.push(Edge {
                out_node: out_node.to_string(),
                in_node: target.to_string(),
            });
            return;
        }
    }
    if let Some(key) = keys.first() {
        result.problem_keys.insert(key.clone());
    }
}

/// Writes the `out_node,in_node` CSV for one snapshot (§6 external
/// interfaces).
pub fn write_csv(edges: &[Edge], path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["out_node", "in_node"])?;
    for edge in edges {
        writer.write_record([&edge.out_node, &edge.in_node])?;
    }
    writer.flush().map_err(|source| crate::error::PipelineError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    Ok(())
}

/// Authority edges (§6a, supplemented from
/// `original_source/statutes_pipeline_steps/{de,us}_authority_edgelist.py`):
/// a regulation's enabling-statute chain, keyed the same way as reference
/// edges but sourced from a document-level parsed reference list
/// (`auth_text_parsed` in the source) rather than from in-text markers.
pub mod authority {
    use super::*;

    /// One document's authority chain: its own node key and the parsed
    /// citation paths naming the law(s) that authorize it.
    pub fn materialize(
        authority_refs: &[(String, Vec<CitationPath>)],
        lookup: &CitekeyLookup,
        mode: EdgeListMode,
    ) -> EdgeListResult {
        let mut result = EdgeListResult::default();
        for (out_node, paths) in authority_refs {
            for path in paths {
                let simple_path = path.simple();
                if simple_path.len() <= 1 {
                    continue;
                }
                resolve_one(out_node, &simple_path, lookup, mode, &mut result);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{LawMatchType, LeafText, NodeRecord, NodeType, PatternClass, ReferenceMarker, TextSegment};

    fn lookup_with(entries: &[(&str, &str)]) -> CitekeyLookup {
        let docs: Vec<ParsedDocument> = entries
            .iter()
            .map(|(citekey, key)| ParsedDocument {
                source_path: "x".to_string(),
                nodes: vec![NodeRecord {
                    key: key.to_string(),
                    level: 1,
                    node_type: NodeType::Seqitem,
                    heading: None,
                    heading_short: None,
                    abbr_1: None,
                    abbr_2: None,
                    document_type: None,
                    citekey: Some(citekey.to_string()),
                    parent: None,
                    texts: vec![],
                }],
            })
            .collect();
        CitekeyLookup::build(&docs).0
    }

    fn doc_with_marker(origin: &str, simple_path: Vec<&str>) -> ParsedDocument {
        let marker = ReferenceMarker {
            origin: origin.to_string(),
            pattern: PatternClass::Inline,
            main: "ignored".to_string(),
            suffix: None,
            lawname: None,
            law_match_type: Some(LawMatchType::Dict),
            parsed_verbose: Some(vec![CitationPath::new(
                simple_path.into_iter().map(|v| (None, v.to_string())).collect(),
            )]),
        };
        ParsedDocument {
            source_path: "x".to_string(),
            nodes: vec![NodeRecord {
                key: origin.to_string(),
                level: 2,
                node_type: NodeType::Seqitem,
                heading: None,
                heading_short: None,
                abbr_1: None,
                abbr_2: None,
                document_type: None,
                citekey: None,
                parent: None,
                texts: vec![LeafText {
                    segments: vec![TextSegment::Reference(marker)],
                }],
            }],
        }
    }

    #[test]
    fn simple_mode_only_tries_the_two_element_key() {
        let lookup = lookup_with(&[("42_101", "target_000001")]);
        let doc = doc_with_marker("source_000001", vec!["42", "101", "a"]);
        let result = materialize(&[doc], &lookup, EdgeListMode::Simple);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].in_node, "target_000001");
    }

    #[test]
    fn detailed_mode_falls_back_to_shorter_keys() {
        let lookup = lookup_with(&[("42_101", "target_000001")]);
        let doc = doc_with_marker("source_000001", vec!["42", "101", "a"]);
        let result = materialize(&[doc], &lookup, EdgeListMode::Detailed);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].in_node, "target_000001");
    }

    #[test]
    fn missing_lookup_target_is_counted_not_fatal() {
        let lookup = lookup_with(&[]);
        let doc = doc_with_marker("source_000001", vec!["42", "999"]);
        let result = materialize(&[doc], &lookup, EdgeListMode::Simple);
        assert!(result.edges.is_empty());
        assert_eq!(result.problem_keys.len(), 1);
        assert!(result.problem_keys.contains("42_999"));
    }
}
