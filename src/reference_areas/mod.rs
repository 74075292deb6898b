//! Reference-area detection (§4.2), grounded in
//! `original_source/statutes_pipeline_steps/de_reference_areas.py` and
//! `us_reference_areas.py`. Both submodules walk every `<text>` leaf of a
//! document and wrap matched citation spans in place, per the wrapping
//! contract of §4.2 ("replace that substring of the leaf text with a
//! three-child marker").

pub mod de;
pub mod us;

use crate::hierarchy::ParsedDocument;
use crate::law_names::LawNameRegistry;
use crate::stage_log::Log;

/// Shared read-only context a detector needs for one document (§5: "pure
/// with respect to the shared read-only registries").
pub struct DetectionContext<'a> {
    pub registry: &'a LawNameRegistry,
    pub document_law_id: &'a str,
}

/// Runs both sub-grammars over a document's leaf texts ("two sub-grammars
/// run in order" — §4.2). The US pass is a no-op on a German document's
/// text and vice versa in practice, but nothing prevents running both; the
/// pipeline driver picks one per dataset (§9 MODULE cli).
pub fn detect_de(doc: &mut ParsedDocument, ctx: &DetectionContext) -> Log {
    let mut log = de::detect(doc, ctx);
    log.extend(de::detect_generic(doc, ctx).entries().to_vec());
    log
}

pub fn detect_us(doc: &mut ParsedDocument) -> Log {
    us::detect(doc)
}
