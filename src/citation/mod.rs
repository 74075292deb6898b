//! Citation parsing (§4.3), grounded in
//! `original_source/statutes_pipeline_steps/de_reference_parse.py` and
//! `us_reference_parse.py`. Walks the reference markers `reference_areas`
//! already wrapped and fills in `parsed_verbose` (§3).

pub mod de;
pub mod us;

use crate::hierarchy::ParsedDocument;
use crate::law_names::LawNameRegistry;
use crate::stage_log::Log;

/// Runs the full German citation pipeline over one document: content
/// parsing, then law-name/citekey attachment for both trigger-based and
/// generic markers (`de_reference_parse`'s three-step call site).
pub fn parse_de(doc: &mut ParsedDocument, registry: &LawNameRegistry, current_law_id: &str) -> Log {
    let mut log = de::parse_reference_content_in_doc(doc);
    log.extend(
        de::identify_reference_law_name_in_doc(doc, registry, current_law_id)
            .entries()
            .to_vec(),
    );
    log.extend(de::resolve_generic(doc, registry).entries().to_vec());
    log
}

/// Runs the US citation pipeline over one document (`us_reference_parse`'s
/// single `parse_references` call, parameterized by the title this
/// document's own statute belongs to, for "of this title" inline refs).
pub fn parse_us(doc: &mut ParsedDocument, this_title: u32) -> Log {
    us::parse_references(doc, this_title)
}
