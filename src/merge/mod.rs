//! Mail merge: reloads the original document, resolves every mapped position through the same
//! addressing pass the flattener uses, and writes values into run text. Only the main document
//! part is re-serialized; every other package entry is copied through.

mod splice;
mod values;

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::docx::xml::{verify_structure_unchanged, write_xml_part};
use crate::docx::DocxDocument;
use crate::error::{EngineError, Result};
use crate::flatten::{layout, Layout};
use crate::mapping::{check_address, ensure_current_schema, MappingDefinition, PositionIssue};

use splice::{apply_insertions, Insertion};

pub use values::{resolve_values, FieldValues, ResolvedValues};

#[derive(Clone, Debug)]
pub struct MergeRequest {
    pub document_bytes: Vec<u8>,
    pub mapping: MappingDefinition,
    pub values: FieldValues,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeOptions {
    /// Reject a position whose stored element id no longer matches the run.
    pub verify_element_ids: bool,
    /// Refuse output whose main part changed anywhere but run text.
    pub verify_structure: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            verify_element_ids: true,
            verify_structure: true,
        }
    }
}

/// Soft problems that never stop a merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MergeWarning {
    RequiredValueEmpty { field_name: String },
    UnknownExpressionReference { field_name: String, reference: String },
    UnmappedValue { field_name: String },
    /// Characters XML cannot carry were dropped from the value.
    InvalidCharactersRemoved { field_name: String, count: usize },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredValueEmpty { field_name } => {
                write!(f, "required field {field_name} is empty")
            }
            Self::UnknownExpressionReference {
                field_name,
                reference,
            } => write!(f, "{field_name}: expression references unknown field {reference}"),
            Self::UnmappedValue { field_name } => {
                write!(f, "value for {field_name} has no mapped field")
            }
            Self::InvalidCharactersRemoved { field_name, count } => {
                write!(f, "{field_name}: removed {count} characters not allowed in XML")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Positions that resolved and received their value.
    pub applied: usize,
    /// Stale positions, skipped.
    pub skipped: Vec<PositionIssue>,
    /// Fields that had positions but none of them resolved.
    pub unresolved_fields: Vec<String>,
    pub warnings: Vec<MergeWarning>,
}

#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub document_bytes: Vec<u8>,
    pub report: MergeReport,
}

pub type MergeResult = Result<MergeOutcome>;

pub fn merge(request: &MergeRequest) -> MergeResult {
    merge_with(
        &request.document_bytes,
        &request.mapping,
        &request.values,
        &MergeOptions::default(),
    )
}

pub fn merge_with(
    document_bytes: &[u8],
    mapping: &MappingDefinition,
    values: &FieldValues,
    options: &MergeOptions,
) -> MergeResult {
    let t0 = Instant::now();
    let prepared = Prepared::new(document_bytes, mapping, options)?;
    let out = prepared.render(document_bytes, mapping, values, options)?;
    log::info!(
        "Merge: {} applied, {} skipped, {} warnings in {:.1}ms",
        out.report.applied,
        out.report.skipped.len(),
        out.report.warnings.len(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(out)
}

/// Merges one template against many value sets. The document is parsed and every position
/// resolved once; rows are rendered in parallel and fail independently.
pub fn merge_batch(
    document_bytes: &[u8],
    mapping: &MappingDefinition,
    rows: &[FieldValues],
    options: &MergeOptions,
) -> Result<Vec<MergeResult>> {
    let t0 = Instant::now();
    let prepared = Prepared::new(document_bytes, mapping, options)?;
    let results: Vec<MergeResult> = rows
        .par_iter()
        .map(|values| prepared.render(document_bytes, mapping, values, options))
        .collect();
    log::info!(
        "Merge batch: {} rows ({} failed) in {:.1}ms",
        results.len(),
        results.iter().filter(|r| r.is_err()).count(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(results)
}

/// A resolved position: which field it feeds and where it lands.
struct Target {
    field: usize,
    paragraph_index: usize,
    run_index: usize,
    char_offset: usize,
}

/// Value-independent half of a merge.
struct Prepared {
    /// `None` when the mapping has no positions at all.
    doc: Option<(DocxDocument, Layout)>,
    targets: Vec<Target>,
    skipped: Vec<PositionIssue>,
    unresolved_fields: Vec<String>,
}

impl Prepared {
    fn new(document_bytes: &[u8], mapping: &MappingDefinition, options: &MergeOptions) -> Result<Self> {
        ensure_current_schema(mapping)?;
        if mapping.position_count() == 0 {
            log::debug!("mapping has no positions, document passes through");
            return Ok(Self {
                doc: None,
                targets: Vec::new(),
                skipped: Vec::new(),
                unresolved_fields: Vec::new(),
            });
        }

        let doc = DocxDocument::load(document_bytes)?;
        let doc_layout = layout(&doc, None);

        let mut targets = Vec::new();
        let mut skipped = Vec::new();
        let mut unresolved_fields = Vec::new();
        for (field_idx, field) in mapping.fields.iter().enumerate() {
            let mut resolved = 0usize;
            for (position_index, address) in field.positions.iter().enumerate() {
                match check_address(address, &doc_layout.index, options.verify_element_ids) {
                    Ok(_) => {
                        resolved += 1;
                        targets.push(Target {
                            field: field_idx,
                            paragraph_index: address.paragraph_index,
                            run_index: address.run_index,
                            char_offset: address.char_offset,
                        });
                    }
                    Err(reason) => {
                        log::warn!("{}[{position_index}] at {address}: {reason}", field.name);
                        skipped.push(PositionIssue {
                            field_name: field.name.clone(),
                            position_index,
                            reason,
                        });
                    }
                }
            }
            if !field.positions.is_empty() && resolved == 0 {
                unresolved_fields.push(field.name.clone());
            }
        }

        if targets.is_empty() {
            return Err(EngineError::TotalMergeFailure { issues: skipped });
        }
        Ok(Self {
            doc: Some((doc, doc_layout)),
            targets,
            skipped,
            unresolved_fields,
        })
    }

    fn render(
        &self,
        document_bytes: &[u8],
        mapping: &MappingDefinition,
        values: &FieldValues,
        options: &MergeOptions,
    ) -> MergeResult {
        let resolved = resolve_values(mapping, values);
        let report = MergeReport {
            applied: self.targets.len(),
            skipped: self.skipped.clone(),
            unresolved_fields: self.unresolved_fields.clone(),
            warnings: resolved.warnings,
        };
        let Some((template, template_layout)) = &self.doc else {
            return Ok(MergeOutcome {
                document_bytes: document_bytes.to_vec(),
                report,
            });
        };

        let insertions: Vec<Insertion> = self
            .targets
            .iter()
            .enumerate()
            .map(|(seq, t)| Insertion {
                paragraph_index: t.paragraph_index,
                run_index: t.run_index,
                char_offset: t.char_offset,
                seq,
                value: resolved.values[t.field].clone(),
            })
            .collect();

        let mut doc = template.clone();
        if apply_insertions(&mut doc.part, &doc.tree, template_layout, insertions) == 0 {
            return Ok(MergeOutcome {
                document_bytes: document_bytes.to_vec(),
                report,
            });
        }
        doc.rebuild_tree()?;
        if options.verify_structure {
            verify_structure_unchanged(&doc.part)?;
        }

        let xml = write_xml_part(&doc.part)?;
        let mut replacements = HashMap::new();
        replacements.insert(doc.part.name.clone(), xml);
        Ok(MergeOutcome {
            document_bytes: doc.package.to_bytes_with_replacements(&replacements)?,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{merge, merge_batch, merge_with, FieldValues, MergeOptions, MergeRequest};
    use crate::docx::DocxDocument;
    use crate::error::EngineError;
    use crate::flatten::address_index;
    use crate::mapping::{FieldDefinition, MappingDefinition, StructuralAddress};
    use crate::testutil::{docx_from_body, paragraph};

    fn values(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    fn run_text(bytes: &[u8], p: usize, r: usize) -> String {
        let index = address_index(bytes).expect("index");
        index.run(p, r).expect("run").text.clone()
    }

    #[test]
    fn fills_every_position_of_a_field() {
        let bytes = docx_from_body(&format!(
            "{}{}",
            paragraph(&["Dear , welcome."]),
            paragraph(&["Signed: "])
        ));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("Name")
                .at(StructuralAddress::new(0, 0, 5))
                .at(StructuralAddress::new(1, 0, 8))],
        );
        let out = merge(&MergeRequest {
            document_bytes: bytes,
            mapping,
            values: values(&[("Name", "Ada")]),
        })
        .expect("merge");
        assert_eq!(out.report.applied, 2);
        assert_eq!(run_text(&out.document_bytes, 0, 0), "Dear Ada, welcome.");
        assert_eq!(run_text(&out.document_bytes, 1, 0), "Signed: Ada");
    }

    #[test]
    fn stale_positions_are_skipped_and_reported() {
        let bytes = docx_from_body(&paragraph(&["Total: "]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![
                FieldDefinition::new("Total").at(StructuralAddress::new(0, 0, 7)),
                FieldDefinition::new("Gone").at(StructuralAddress::new(9, 0, 0)),
            ],
        );
        let out = merge_with(&bytes, &mapping, &values(&[("Total", "42")]), &MergeOptions::default())
            .expect("merge");
        assert_eq!(out.report.applied, 1);
        assert_eq!(out.report.skipped.len(), 1);
        assert_eq!(out.report.unresolved_fields, vec!["Gone".to_string()]);
        assert_eq!(run_text(&out.document_bytes, 0, 0), "Total: 42");
    }

    #[test]
    fn all_positions_stale_is_total_failure() {
        let bytes = docx_from_body(&paragraph(&["x"]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("A").at(StructuralAddress::new(0, 3, 0))],
        );
        let err = merge_with(&bytes, &mapping, &FieldValues::new(), &MergeOptions::default())
            .err()
            .expect("failure");
        match err {
            EngineError::TotalMergeFailure { issues } => assert_eq!(issues.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn element_id_mismatch_respects_option() {
        let bytes = docx_from_body(&paragraph(&["abc"]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("A")
                .at(StructuralAddress::new(0, 0, 1).with_element_id("r-000000000000"))],
        );
        let strict = merge_with(&bytes, &mapping, &values(&[("A", "X")]), &MergeOptions::default());
        assert!(matches!(strict, Err(EngineError::TotalMergeFailure { .. })));

        let relaxed = MergeOptions {
            verify_element_ids: false,
            ..MergeOptions::default()
        };
        let out = merge_with(&bytes, &mapping, &values(&[("A", "X")]), &relaxed).expect("merge");
        assert_eq!(run_text(&out.document_bytes, 0, 0), "aXbc");
    }

    #[test]
    fn legacy_schema_version_is_rejected() {
        let bytes = docx_from_body(&paragraph(&["x"]));
        let mut mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("A").at(StructuralAddress::new(0, 0, 0))],
        );
        mapping.schema_version = "1".to_string();
        let err = merge_with(&bytes, &mapping, &FieldValues::new(), &MergeOptions::default());
        assert!(matches!(err, Err(EngineError::IncompatibleMappingSchema { .. })));
    }

    #[test]
    fn batch_rows_are_independent() {
        let bytes = docx_from_body(&paragraph(&["Hi "]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("Name").at(StructuralAddress::new(0, 0, 3))],
        );
        let rows = vec![values(&[("Name", "Ann")]), values(&[("Name", "Bo")])];
        let results = merge_batch(&bytes, &mapping, &rows, &MergeOptions::default()).expect("batch");
        let texts: Vec<String> = results
            .iter()
            .map(|r| run_text(&r.as_ref().expect("row").document_bytes, 0, 0))
            .collect();
        assert_eq!(texts, vec!["Hi Ann", "Hi Bo"]);
    }

    #[test]
    fn merged_part_keeps_run_properties() {
        let bytes = docx_from_body(&paragraph(&["Amount: "]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("Amount").at(StructuralAddress::new(0, 0, 8))],
        );
        let out = merge_with(&bytes, &mapping, &values(&[("Amount", "10")]), &MergeOptions::default())
            .expect("merge");
        let doc = DocxDocument::load(&out.document_bytes).expect("reload");
        let run = doc.tree.find_first("w:r").expect("run");
        assert!(doc.tree.child_named(run, "w:rPr").is_some());
    }
}
