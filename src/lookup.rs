//! Citekey lookup build (§4.4), grounded in
//! `original_source/statutes_pipeline_steps/{de,us}_crossreference_lookup.py`,
//! both of which scan every citekeyed node of a snapshot and write a
//! `key,citekey` CSV with nothing fancier than a linear pass.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hierarchy::ParsedDocument;
use crate::stage_log::Log;

/// `citekey -> node key` for one snapshot, first-seen wins (§4.4: "the
/// *first* node-id wins on ambiguous resolution").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitekeyLookup {
    map: HashMap<String, String>,
}

impl CitekeyLookup {
    /// Builds the lookup across every document of a snapshot, in file
    /// iteration order (§5 "Ordering"). Duplicate citekeys are recorded in
    /// `log` rather than silently dropped.
    pub fn build(docs: &[ParsedDocument]) -> (Self, Log) {
        let mut map = HashMap::new();
        let mut log = Log::new();
        for doc in docs {
            for node in &doc.nodes {
                let Some(citekey) = &node.citekey else {
                    continue;
                };
                if map.contains_key(citekey) {
                    log.warn(
                        &node.key,
                        format!("duplicate citekey '{citekey}', keeping first-seen node"),
                    );
                    continue;
                }
                map.insert(citekey.clone(), node.key.clone());
            }
        }
        (Self { map }, log)
    }

    pub fn get(&self, citekey: &str) -> Option<&str> {
        self.map.get(citekey).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Writes the `key,citekey` CSV for one snapshot (§6 external
    /// interfaces). Column order is `key,citekey`, one row per citekeyed
    /// node — the inverse of this struct's own key/value orientation.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(["key", "citekey"])?;
        let mut rows: Vec<(&String, &String)> = self.map.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        for (citekey, key) in rows {
            writer.write_record([key, citekey])?;
        }
        writer.flush().map_err(|source| crate::error::PipelineError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{NodeRecord, NodeType};

    fn node(key: &str, citekey: Option<&str>) -> NodeRecord {
        NodeRecord {
            key: key.to_string(),
            level: 1,
            node_type: NodeType::Seqitem,
            heading: None,
            heading_short: None,
            abbr_1: None,
            abbr_2: None,
            document_type: None,
            citekey: citekey.map(|s| s.to_string()),
            parent: None,
            texts: vec![],
        }
    }

    #[test]
    fn write_csv_orders_rows_by_citekey() {
        let doc = ParsedDocument {
            source_path: "a.xml".to_string(),
            nodes: vec![
                node("a_000003", Some("42_999")),
                node("a_000001", Some("42_101")),
                node("a_000002", Some("42_500")),
            ],
        };
        let (lookup, _) = CitekeyLookup::build(&[doc]);
        let path = std::env::temp_dir().join("statute_graph_pipeline_test_lookup_csv_order.csv");
        lookup.write_csv(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let citekeys: Vec<&str> = written
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(citekeys, vec!["42_101", "42_500", "42_999"]);
    }

    #[test]
    fn first_seen_citekey_wins_on_duplicate() {
        let doc = ParsedDocument {
            source_path: "a.xml".to_string(),
            nodes: vec![
                node("a_000001", Some("42_1983")),
                node("a_000002", Some("42_1983")),
            ],
        };
        let (lookup, log) = CitekeyLookup::build(&[doc]);
        assert_eq!(lookup.get("42_1983"), Some("a_000001"));
        assert_eq!(log.entries().len(), 1);
    }
}
