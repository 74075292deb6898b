//! Snapshot mapping (§4.6), grounded in
//! `original_source/statutes_pipeline_steps/snapshot_mapping_edgelist.py`.
//!
//! Four phases run in order, each narrowing the "remaining" unmapped key
//! sets on both sides (§4.6): unique text, text+citekey, containment, and
//! neighborhood similarity. Phase 4 keeps the source's two-pass shape (a
//! "dry run" that only enumerates which text pairs need a distance, then a
//! batch score, then a resolve pass) so the expensive Jaro–Winkler scoring
//! runs once per distinct pair under `rayon` instead of inline per step.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::path::Path;

use rayon::prelude::*;

use crate::error::Result;
use crate::hierarchy::ParsedDocument;

/// One snapshot's leaves, in document/leaf order (§5 "Ordering"): parallel
/// arrays mirroring the source's `data["keys"]`/`["texts"]`/`["citekeys"]`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLeaves {
    pub keys: Vec<String>,
    pub texts: Vec<String>,
    pub citekeys: Vec<Option<String>>,
}

impl SnapshotLeaves {
    pub fn from_documents(docs: &[ParsedDocument]) -> Self {
        let mut keys = Vec::new();
        let mut texts = Vec::new();
        let mut citekeys = Vec::new();
        for doc in docs {
            for leaf in doc.leaves() {
                keys.push(leaf.key.clone());
                let combined = leaf
                    .texts
                    .iter()
                    .map(|t| t.plain_text())
                    .collect::<Vec<_>>()
                    .join(" ");
                texts.push(combined.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase());
                citekeys.push(leaf.citekey.clone());
            }
        }
        Self { keys, texts, citekeys }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MappingParams {
    pub min_text_length: usize,
    pub radius: usize,
    pub distance_threshold: f64,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            radius: 5,
            distance_threshold: 0.9,
        }
    }
}

/// `invert_dict_mapping_unique`: inverts `k -> v` into `v -> k`, dropping
/// every `v` that more than one `k` mapped to.
fn invert_unique<K, V>(pairs: impl Iterator<Item = (K, V)>) -> HashMap<V, K>
where
    K: Clone + Eq + Hash,
    V: Clone + Eq + Hash,
{
    let mut by_value: HashMap<V, Vec<K>> = HashMap::new();
    for (k, v) in pairs {
        by_value.entry(v).or_default().push(k);
    }
    by_value
        .into_iter()
        .filter(|(_, ks)| ks.len() == 1)
        .map(|(v, mut ks)| (v, ks.pop().unwrap()))
        .collect()
}

/// Phase 1 — `map_unique_texts`: texts that occur exactly once on each
/// side, long enough to be meaningful, map their owners.
pub fn phase1_unique_texts(a: &SnapshotLeaves, b: &SnapshotLeaves, min_text_length: usize) -> HashMap<String, String> {
    let inv_a = invert_unique(a.keys.iter().cloned().zip(a.texts.iter().cloned()));
    let inv_b = invert_unique(b.keys.iter().cloned().zip(b.texts.iter().cloned()));

    let mut mappings = HashMap::new();
    for (text, key_a) in &inv_a {
        if text.len() < min_text_length {
            continue;
        }
        if let Some(key_b) = inv_b.get(text) {
            mappings.insert(key_a.clone(), key_b.clone());
        }
    }
    mappings
}

/// Phase 2 — `map_same_citekey_same_text`, restricted to the remaining
/// (still unmapped) keys on both sides.
pub fn phase2_same_citekey_same_text(
    a: &SnapshotLeaves,
    b: &SnapshotLeaves,
    remaining1: &HashSet<String>,
    remaining2: &HashSet<String>,
) -> HashMap<String, String> {
    let pairs_a = a
        .keys
        .iter()
        .zip(a.texts.iter())
        .zip(a.citekeys.iter())
        .filter_map(|((k, t), c)| {
            let c = c.as_ref()?;
            if !remaining1.contains(k) {
                return None;
            }
            Some((k.clone(), (c.to_lowercase(), t.clone())))
        });
    let pairs_b = b
        .keys
        .iter()
        .zip(b.texts.iter())
        .zip(b.citekeys.iter())
        .filter_map(|((k, t), c)| {
            let c = c.as_ref()?;
            if !remaining2.contains(k) {
                return None;
            }
            Some((k.clone(), (c.to_lowercase(), t.clone())))
        });

    let inv_a = invert_unique(pairs_a);
    let inv_b = invert_unique(pairs_b);

    let mut mappings = HashMap::new();
    for (text_and_citekey, key_a) in &inv_a {
        if let Some(key_b) = inv_b.get(text_and_citekey) {
            mappings.insert(key_a.clone(), key_b.clone());
        }
    }
    mappings
}

/// `clip_text_for_containment_matching`: drops the leading
/// whitespace-delimited token (a German paragraph number like "(1)").
fn clip_text(text: &str) -> &str {
    match text.find(' ') {
        Some(idx) => &text[idx + 1..],
        None => text,
    }
}

/// Phase 3 — `map_text_containment`: after clipping, mark pairs where one
/// side's text contains the other; commit only pairs unique on both sides.
pub fn phase3_text_containment(
    a: &SnapshotLeaves,
    b: &SnapshotLeaves,
    remaining1: &HashSet<String>,
    remaining2: &HashSet<String>,
    min_text_length: usize,
) -> HashMap<String, String> {
    let map1: HashMap<&str, &str> = a.keys.iter().map(|k| k.as_str()).zip(a.texts.iter().map(|t| t.as_str())).collect();
    let map2: HashMap<&str, &str> = b.keys.iter().map(|k| k.as_str()).zip(b.texts.iter().map(|t| t.as_str())).collect();

    let keys1: Vec<&String> = {
        let mut v: Vec<&String> = remaining1.iter().collect();
        v.sort();
        v
    };
    let keys2: Vec<&String> = {
        let mut v: Vec<&String> = remaining2.iter().collect();
        v.sort();
        v
    };

    let clipped1: Vec<String> = keys1.iter().map(|k| clip_text(map1[k.as_str()]).to_string()).collect();
    let clipped2: Vec<String> = keys2.iter().map(|k| clip_text(map2[k.as_str()]).to_string()).collect();

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for (i, t1) in clipped1.iter().enumerate() {
        if t1.len() < min_text_length {
            continue;
        }
        for (j, t2) in clipped2.iter().enumerate() {
            if t2.len() < min_text_length {
                continue;
            }
            if t1.contains(t2.as_str()) || t2.contains(t1.as_str()) {
                pairs.push((i, j));
            }
        }
    }

    let mut count1: HashMap<usize, usize> = HashMap::new();
    let mut count2: HashMap<usize, usize> = HashMap::new();
    for &(i, j) in &pairs {
        *count1.entry(i).or_insert(0) += 1;
        *count2.entry(j).or_insert(0) += 1;
    }

    let mut mappings = HashMap::new();
    for (i, j) in pairs {
        if count1[&i] == 1 && count2[&j] == 1 {
            mappings.insert(keys1[i].clone(), keys2[j].clone());
        }
    }
    mappings
}

/// `get_neighborhood`: the positional window of radius `r` around `node`,
/// restricted to keys sharing `node`'s `<law-id>_` prefix (order within a
/// law/title is meaningful; order across laws mostly isn't).
fn neighborhood(keys: &[String], index_of: &HashMap<&str, usize>, node: &str, radius: usize) -> Vec<String> {
    let Some(&idx) = index_of.get(node) else {
        return Vec::new();
    };
    let lower = idx.saturating_sub(radius);
    let upper = (idx + radius).min(keys.len().saturating_sub(1));
    let prefix = node.split('_').next().unwrap_or("");
    keys[lower..=upper]
        .iter()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect()
}

/// Phase 4, pass 1 (`dry_run=True` in the source): walks every remaining
/// A-leaf once and enumerates the `(text1, text2)` pairs a real resolve
/// pass would need a distance for, without committing anything (mirrors
/// the source calling the same function twice, once to populate the
/// cache's keys and once to consume it).
pub fn phase4_collect_pairs(
    new_mappings: &HashMap<String, String>,
    a: &SnapshotLeaves,
    b: &SnapshotLeaves,
    remaining1: &BTreeSet<String>,
    remaining2: &HashSet<String>,
    radius: usize,
) -> HashSet<(String, String)> {
    let index1: HashMap<&str, usize> = a.keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let index2: HashMap<&str, usize> = b.keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let text1: HashMap<&str, &str> = a.keys.iter().zip(a.texts.iter()).map(|(k, t)| (k.as_str(), t.as_str())).collect();
    let text2: HashMap<&str, &str> = b.keys.iter().zip(b.texts.iter()).map(|(k, t)| (k.as_str(), t.as_str())).collect();

    let mut pairs = HashSet::new();
    for key1 in remaining1 {
        let Some(&t1) = text1.get(key1.as_str()) else {
            continue;
        };
        let nbh1 = neighborhood(&a.keys, &index1, key1, radius);
        let mut nbh2: HashSet<String> = HashSet::new();
        for n1 in &nbh1 {
            if let Some(mapped) = new_mappings.get(n1) {
                nbh2.extend(neighborhood(&b.keys, &index2, mapped, radius));
            }
        }
        for cand in nbh2 {
            if !remaining2.contains(&cand) {
                continue;
            }
            if let Some(&t2) = text2.get(cand.as_str()) {
                pairs.insert((t1.to_string(), t2.to_string()));
            }
        }
    }
    pairs
}

/// Phase 4, batch scoring step (supplemented: the source's
/// `multiprocessing.Pool` + `tqdm` batch, reproduced with `rayon`).
pub fn phase4_score_pairs(pairs: HashSet<(String, String)>) -> HashMap<(String, String), f64> {
    pairs
        .into_par_iter()
        .map(|(s1, s2)| {
            let score = strsim::jaro_winkler(&s1, &s2);
            ((s1, s2), score)
        })
        .collect()
}

/// Phase 4, pass 2: FIFO worklist over remaining A-leaves, each resolved
/// against its common-neighborhood candidates in B using the precomputed
/// cache; a commit removes both sides from "remaining" and re-queues every
/// still-unmapped neighbor of the committed A-leaf.
pub fn phase4_resolve(
    new_mappings: &mut HashMap<String, String>,
    a: &SnapshotLeaves,
    b: &SnapshotLeaves,
    remaining1: &mut BTreeSet<String>,
    remaining2: &mut HashSet<String>,
    radius: usize,
    distance_threshold: f64,
    cache: &HashMap<(String, String), f64>,
) {
    let index1: HashMap<&str, usize> = a.keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let index2: HashMap<&str, usize> = b.keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let text1: HashMap<&str, &str> = a.keys.iter().zip(a.texts.iter()).map(|(k, t)| (k.as_str(), t.as_str())).collect();
    let text2: HashMap<&str, &str> = b.keys.iter().zip(b.texts.iter()).map(|(k, t)| (k.as_str(), t.as_str())).collect();

    let mut queue: VecDeque<String> = remaining1.iter().cloned().collect();
    let mut queue_set: HashSet<String> = queue.iter().cloned().collect();

    while let Some(key1) = queue.pop_front() {
        queue_set.remove(&key1);
        if !remaining1.contains(&key1) {
            continue;
        }
        let Some(&t1) = text1.get(key1.as_str()) else {
            continue;
        };

        let nbh1 = neighborhood(&a.keys, &index1, &key1, radius);
        let mut nbh2: HashSet<String> = HashSet::new();
        for n1 in &nbh1 {
            if let Some(mapped) = new_mappings.get(n1) {
                nbh2.extend(neighborhood(&b.keys, &index2, mapped, radius));
            }
        }
        let candidates: Vec<String> = nbh2.into_iter().filter(|k| remaining2.contains(k)).collect();

        let mut best: Option<(f64, String)> = None;
        for cand in &candidates {
            let t2 = text2.get(cand.as_str()).copied().unwrap_or("");
            let score = cache.get(&(t1.to_string(), t2.to_string())).copied().unwrap_or(0.0);
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((score, cand.clone()));
            }
        }

        if let Some((score, cand)) = best {
            if score > distance_threshold {
                new_mappings.insert(key1.clone(), cand.clone());
                remaining1.remove(&key1);
                remaining2.remove(&cand);

                for n in nbh1.iter().filter(|n| remaining1.contains(*n) && !queue_set.contains(*n)) {
                    queue.push_back(n.clone());
                    queue_set.insert(n.clone());
                }
            }
        }
    }
}

fn remaining(a: &SnapshotLeaves, b: &SnapshotLeaves, mappings: &HashMap<String, String>) -> (HashSet<String>, HashSet<String>) {
    let mapped_keys: HashSet<&str> = mappings.keys().map(|s| s.as_str()).collect();
    let mapped_vals: HashSet<&str> = mappings.values().map(|s| s.as_str()).collect();
    let r1 = a.keys.iter().filter(|k| !mapped_keys.contains(k.as_str())).cloned().collect();
    let r2 = b.keys.iter().filter(|k| !mapped_vals.contains(k.as_str())).cloned().collect();
    (r1, r2)
}

/// Runs all four phases in order and returns the committed leaf mapping.
pub fn map_leaves(a: &SnapshotLeaves, b: &SnapshotLeaves, params: MappingParams) -> HashMap<String, String> {
    let mut mappings = phase1_unique_texts(a, b, params.min_text_length);
    let (remaining1, remaining2) = remaining(a, b, &mappings);

    mappings.extend(phase2_same_citekey_same_text(a, b, &remaining1, &remaining2));
    let (remaining1, remaining2) = remaining(a, b, &mappings);

    mappings.extend(phase3_text_containment(a, b, &remaining1, &remaining2, params.min_text_length));
    let (remaining1, mut remaining2) = remaining(a, b, &mappings);
    let mut remaining1: BTreeSet<String> = remaining1.into_iter().collect();

    let pairs = phase4_collect_pairs(&mappings, a, b, &remaining1, &remaining2, params.radius);
    let cache = phase4_score_pairs(pairs);
    phase4_resolve(
        &mut mappings,
        a,
        b,
        &mut remaining1,
        &mut remaining2,
        params.radius,
        params.distance_threshold,
        &cache,
    );

    mappings
}

/// Writes the mapping JSON (§6: `{ "<A-leaf-key>": "<B-leaf-key>", ... }`).
pub fn write_json(mappings: &HashMap<String, String>, path: impl AsRef<Path>) -> Result<()> {
    let body = serde_json::to_string(mappings)?;
    std::fs::write(path.as_ref(), body).map_err(|source| crate::error::PipelineError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(pairs: &[(&str, &str)]) -> SnapshotLeaves {
        SnapshotLeaves {
            keys: pairs.iter().map(|(k, _)| k.to_string()).collect(),
            texts: pairs.iter().map(|(_, t)| t.to_string()).collect(),
            citekeys: vec![None; pairs.len()],
        }
    }

    #[test]
    fn phase1_maps_texts_unique_on_both_sides() {
        let a = leaves(&[("a1", &"x".repeat(60)), ("a2", &"y".repeat(60))]);
        let b = leaves(&[("b1", &"x".repeat(60)), ("b2", &"z".repeat(60))]);
        let mappings = phase1_unique_texts(&a, &b, 50);
        assert_eq!(mappings.get("a1"), Some(&"b1".to_string()));
        assert!(!mappings.contains_key("a2"));
    }

    #[test]
    fn phase1_ignores_texts_shorter_than_minimum() {
        let a = leaves(&[("a1", "short")]);
        let b = leaves(&[("b1", "short")]);
        let mappings = phase1_unique_texts(&a, &b, 50);
        assert!(mappings.is_empty());
    }

    #[test]
    fn phase3_commits_only_mutually_unique_containment() {
        let long_text = "x".repeat(60);
        let a = leaves(&[("a1", &format!("(1) {long_text} suffix"))]);
        let b = leaves(&[("b1", &format!("(2) {long_text} suffix tail"))]);
        let remaining1: HashSet<String> = a.keys.iter().cloned().collect();
        let remaining2: HashSet<String> = b.keys.iter().cloned().collect();
        let mappings = phase3_text_containment(&a, &b, &remaining1, &remaining2, 50);
        assert_eq!(mappings.get("a1"), Some(&"b1".to_string()));
    }

    #[test]
    fn full_pipeline_maps_unique_texts_without_touching_ambiguous_ones() {
        let a = leaves(&[("42_101", &"x".repeat(60)), ("42_102", &"ambiguous".repeat(10))]);
        let b = leaves(&[("42_101", &"x".repeat(60)), ("42_102", &"ambiguous".repeat(10))]);
        let mappings = map_leaves(&a, &b, MappingParams::default());
        assert_eq!(mappings.get("42_101"), Some(&"42_101".to_string()));
    }
}
