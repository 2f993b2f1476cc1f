//! Consistency checking: which stored positions no longer resolve against a document.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::flatten::address_index;
use crate::mapping::{
    is_current_schema, validate_positions_with, DefinitionIssue, LegacyPosition, MappingDefinition,
    PositionIssue, VersionedMapping,
};

/// Every stale position of `mapping` against `document_bytes`, in mapping order.
pub fn check(mapping: &MappingDefinition, document_bytes: &[u8]) -> Result<Vec<PositionIssue>> {
    check_with(mapping, document_bytes, true)
}

pub fn check_with(
    mapping: &MappingDefinition,
    document_bytes: &[u8],
    verify_element_ids: bool,
) -> Result<Vec<PositionIssue>> {
    let index = address_index(document_bytes)?;
    let issues = validate_positions_with(mapping, &index, verify_element_ids);
    log::info!(
        "Check: {} of {} positions stale across {} fields",
        issues.len(),
        mapping.position_count(),
        mapping.fields.len()
    );
    Ok(issues)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub schema_version_found: String,
    /// True when the stored mapping was a legacy shape and was migrated for this check.
    pub migrated: bool,
    pub lint: Vec<DefinitionIssue>,
    pub stale: Vec<PositionIssue>,
    pub orphaned_positions: Vec<LegacyPosition>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.lint.is_empty() && self.stale.is_empty() && self.orphaned_positions.is_empty()
    }
}

/// Checks a persisted mapping of any supported schema version.
pub fn check_json(
    mapping_json: &str,
    document_bytes: &[u8],
    verify_element_ids: bool,
) -> Result<CheckReport> {
    let versioned = VersionedMapping::from_json(mapping_json)?;
    let schema_version_found = versioned.schema_version().to_string();
    let migrated = versioned.into_current();
    let stale = check_with(&migrated.mapping, document_bytes, verify_element_ids)?;
    Ok(CheckReport {
        migrated: !is_current_schema(&schema_version_found),
        schema_version_found,
        lint: migrated.mapping.lint(),
        stale,
        orphaned_positions: migrated.orphaned,
    })
}

#[cfg(test)]
mod tests {
    use super::{check, check_json};
    use crate::flatten::address_index;
    use crate::mapping::{
        FieldDefinition, LegacyPosition, MappingDefinition, StaleReason, StructuralAddress,
    };
    use crate::testutil::{docx_from_body, paragraph};

    #[test]
    fn reports_each_stale_position() {
        let bytes = docx_from_body(&paragraph(&["short"]));
        let mapping = MappingDefinition::new(
            "tester",
            vec![FieldDefinition::new("A")
                .at(StructuralAddress::new(0, 0, 5))
                .at(StructuralAddress::new(0, 0, 6))
                .at(StructuralAddress::new(3, 0, 0))],
        );
        let issues = check(&mapping, &bytes).expect("check");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].position_index, 1);
        assert_eq!(
            issues[0].reason,
            StaleReason::OffsetOutOfRange {
                char_offset: 6,
                text_length: 5
            }
        );
        assert!(matches!(
            issues[1].reason,
            StaleReason::ParagraphOutOfRange { paragraph_index: 3, .. }
        ));
    }

    #[test]
    fn legacy_json_is_migrated_before_checking() {
        let bytes = docx_from_body(&paragraph(&["Hello"]));
        let id = address_index(&bytes).expect("index").paragraphs[0].runs[0]
            .element_id
            .clone();
        let legacy = format!(
            r#"{{"schemaVersion":"1","mappedBy":"old-ui","mapping":{{
                "fields":[{{"name":"Greeting"}},{{"name":"bad name"}}],
                "positions":[
                    {{"fieldName":"Greeting","paragraphIndex":0,"runIndex":0,"charOffset":5,"elementId":"{id}"}},
                    {{"fieldName":"Nobody","paragraphIndex":0,"runIndex":0,"charOffset":0}}
                ]}}}}"#
        );
        let report = check_json(&legacy, &bytes, true).expect("check");
        assert!(report.migrated);
        assert_eq!(report.schema_version_found, "1");
        assert!(report.stale.is_empty());
        assert_eq!(report.orphaned_positions.len(), 1);
        assert_eq!(report.lint.len(), 1);
        assert!(!report.is_clean());
    }

    fn assert_eq_impl<T: Eq>(_: &T) {}

    #[test]
    fn reports_compare_by_value() {
        let bytes = docx_from_body(&paragraph(&["Hello"]));
        let legacy = r#"{"schemaVersion":"1","mapping":{"fields":[],"positions":[
            {"fieldName":"Gone","paragraphIndex":0,"runIndex":0,"charOffset":2}]}}"#;
        let first = check_json(legacy, &bytes, false).expect("first");
        let second = check_json(legacy, &bytes, false).expect("second");
        assert_eq_impl(&first);
        assert_eq!(first, second);
        assert_eq!(
            first.orphaned_positions,
            vec![LegacyPosition {
                field_name: "Gone".to_string(),
                address: StructuralAddress::new(0, 0, 2),
            }]
        );
    }
}
