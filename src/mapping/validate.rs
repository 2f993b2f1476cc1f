use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flatten::{AddressIndex, RunEntry};

use super::model::{MappingDefinition, StructuralAddress};

/// Why a stored position no longer resolves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StaleReason {
    ParagraphOutOfRange {
        paragraph_index: usize,
        paragraph_count: usize,
    },
    RunOutOfRange {
        paragraph_index: usize,
        run_index: usize,
        run_count: usize,
    },
    OffsetOutOfRange {
        char_offset: usize,
        text_length: usize,
    },
    ElementIdMismatch {
        expected: String,
        found: String,
    },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParagraphOutOfRange {
                paragraph_index,
                paragraph_count,
            } => write!(
                f,
                "paragraph {paragraph_index} out of range (document has {paragraph_count})"
            ),
            Self::RunOutOfRange {
                paragraph_index,
                run_index,
                run_count,
            } => write!(
                f,
                "run {run_index} out of range (paragraph {paragraph_index} has {run_count})"
            ),
            Self::OffsetOutOfRange {
                char_offset,
                text_length,
            } => write!(f, "offset {char_offset} beyond run length {text_length}"),
            Self::ElementIdMismatch { expected, found } => {
                write!(f, "element id {expected} does not match {found}")
            }
        }
    }
}

/// A stale position: one entry of a field's position list that failed to resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionIssue {
    pub field_name: String,
    pub position_index: usize,
    pub reason: StaleReason,
}

impl fmt::Display for PositionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {}",
            self.field_name, self.position_index, self.reason
        )
    }
}

/// Resolves one address against a flatten pass.
pub fn check_address<'a>(
    address: &StructuralAddress,
    index: &'a AddressIndex,
    verify_element_ids: bool,
) -> Result<&'a RunEntry, StaleReason> {
    let para = index
        .paragraph(address.paragraph_index)
        .ok_or(StaleReason::ParagraphOutOfRange {
            paragraph_index: address.paragraph_index,
            paragraph_count: index.paragraph_count(),
        })?;
    let run = para
        .runs
        .get(address.run_index)
        .ok_or(StaleReason::RunOutOfRange {
            paragraph_index: address.paragraph_index,
            run_index: address.run_index,
            run_count: para.runs.len(),
        })?;
    if address.char_offset > run.text_length {
        return Err(StaleReason::OffsetOutOfRange {
            char_offset: address.char_offset,
            text_length: run.text_length,
        });
    }
    if verify_element_ids {
        if let Some(expected) = address.element_id.as_deref().filter(|id| !id.is_empty()) {
            if expected != run.element_id {
                return Err(StaleReason::ElementIdMismatch {
                    expected: expected.to_string(),
                    found: run.element_id.clone(),
                });
            }
        }
    }
    Ok(run)
}

pub fn validate_positions_with(
    mapping: &MappingDefinition,
    index: &AddressIndex,
    verify_element_ids: bool,
) -> Vec<PositionIssue> {
    let mut issues = Vec::new();
    for field in &mapping.fields {
        for (position_index, address) in field.positions.iter().enumerate() {
            if let Err(reason) = check_address(address, index, verify_element_ids) {
                issues.push(PositionIssue {
                    field_name: field.name.clone(),
                    position_index,
                    reason,
                });
            }
        }
    }
    issues
}

/// Every failing position, in mapping order.
pub fn validate_positions(mapping: &MappingDefinition, index: &AddressIndex) -> Vec<PositionIssue> {
    validate_positions_with(mapping, index, true)
}

/// `Ok` when every position resolves, otherwise the names of fields with at least one stale
/// position (mapping order, no repeats).
pub fn validate(mapping: &MappingDefinition, index: &AddressIndex) -> Result<(), Vec<String>> {
    let mut invalid: Vec<String> = Vec::new();
    for issue in validate_positions(mapping, index) {
        if !invalid.contains(&issue.field_name) {
            invalid.push(issue.field_name);
        }
    }
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::{check_address, validate, StaleReason};
    use crate::flatten::{AddressIndex, ParagraphEntry, RunEntry};
    use crate::mapping::{FieldDefinition, MappingDefinition, StructuralAddress};

    fn index() -> AddressIndex {
        let run = |i: usize, id: &str, text: &str| RunEntry {
            run_index: i,
            element_id: id.to_string(),
            text_length: text.chars().count(),
            text: text.to_string(),
            document_path: String::new(),
        };
        AddressIndex {
            part_name: "word/document.xml".to_string(),
            table_count: 0,
            paragraphs: vec![
                ParagraphEntry {
                    paragraph_index: 0,
                    runs: vec![run(0, "r-a", "Hello"), run(1, "r-b", "")],
                    ..Default::default()
                },
                ParagraphEntry {
                    paragraph_index: 1,
                    runs: vec![],
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn offset_at_run_end_is_valid() {
        let idx = index();
        assert!(check_address(&StructuralAddress::new(0, 0, 5), &idx, true).is_ok());
        assert!(check_address(&StructuralAddress::new(0, 1, 0), &idx, true).is_ok());
        assert_eq!(
            check_address(&StructuralAddress::new(0, 0, 6), &idx, true),
            Err(StaleReason::OffsetOutOfRange {
                char_offset: 6,
                text_length: 5
            })
        );
    }

    #[test]
    fn reports_each_kind_of_staleness() {
        let idx = index();
        assert!(matches!(
            check_address(&StructuralAddress::new(7, 0, 0), &idx, true),
            Err(StaleReason::ParagraphOutOfRange { paragraph_count: 2, .. })
        ));
        assert!(matches!(
            check_address(&StructuralAddress::new(1, 0, 0), &idx, true),
            Err(StaleReason::RunOutOfRange { run_count: 0, .. })
        ));
        let drifted = StructuralAddress::new(0, 0, 1).with_element_id("r-zzz");
        assert!(matches!(
            check_address(&drifted, &idx, true),
            Err(StaleReason::ElementIdMismatch { .. })
        ));
        assert!(check_address(&drifted, &idx, false).is_ok());
    }

    #[test]
    fn validate_lists_invalid_field_names_once() {
        let mapping = MappingDefinition::new(
            "t",
            vec![
                FieldDefinition::new("Good").at(StructuralAddress::new(0, 0, 0)),
                FieldDefinition::new("Bad")
                    .at(StructuralAddress::new(9, 0, 0))
                    .at(StructuralAddress::new(0, 4, 0)),
            ],
        );
        assert_eq!(validate(&mapping, &index()), Err(vec!["Bad".to_string()]));
    }
}
