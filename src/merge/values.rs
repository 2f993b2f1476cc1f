use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::docx::xml::is_xml_char;
use crate::mapping::{MappingDefinition, SourceKind};

use super::MergeWarning;

/// Submitted form values: field name to string, `None` when the caller sent null.
pub type FieldValues = HashMap<String, Option<String>>;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex")
});

/// Final value per field, parallel to `mapping.fields`.
#[derive(Clone, Debug, Default)]
pub struct ResolvedValues {
    pub values: Vec<String>,
    pub warnings: Vec<MergeWarning>,
}

/// Submitted non-null value, else the field default, else empty. A computed field without a
/// submitted value evaluates its expression instead of falling back to the default; references
/// inside the expression see the first-pass value of the referenced field.
pub fn resolve_values(mapping: &MappingDefinition, submitted: &FieldValues) -> ResolvedValues {
    let mut warnings = Vec::new();

    let first_pass: Vec<String> = mapping
        .fields
        .iter()
        .map(|f| {
            submitted
                .get(&f.name)
                .and_then(|v| v.clone())
                .or_else(|| f.default_value.clone())
                .unwrap_or_default()
        })
        .collect();
    let by_name: HashMap<&str, &str> = mapping
        .fields
        .iter()
        .zip(first_pass.iter())
        .map(|(f, v)| (f.name.as_str(), v.as_str()))
        .collect();

    let mut values = Vec::with_capacity(mapping.fields.len());
    for (field, first) in mapping.fields.iter().zip(first_pass.iter()) {
        let was_submitted = submitted.get(&field.name).is_some_and(|v| v.is_some());
        let value = match (&field.source_kind, field.computation_expression.as_deref()) {
            (SourceKind::Computed, Some(expr)) if !was_submitted => {
                evaluate_expression(&field.name, expr, &by_name, &mut warnings)
            }
            _ => first.clone(),
        };
        let value = strip_non_xml_chars(&field.name, value, &mut warnings);
        if field.required && value.is_empty() {
            log::warn!("required field {} resolved to an empty value", field.name);
            warnings.push(MergeWarning::RequiredValueEmpty {
                field_name: field.name.clone(),
            });
        }
        values.push(value);
    }

    let mut unknown: Vec<&String> = submitted
        .keys()
        .filter(|k| mapping.field(k).is_none())
        .collect();
    unknown.sort();
    for name in unknown {
        log::debug!("submitted value for unmapped field {name} ignored");
        warnings.push(MergeWarning::UnmappedValue {
            field_name: name.clone(),
        });
    }

    ResolvedValues { values, warnings }
}

fn strip_non_xml_chars(field_name: &str, value: String, warnings: &mut Vec<MergeWarning>) -> String {
    let count = value.chars().filter(|c| !is_xml_char(*c)).count();
    if count == 0 {
        return value;
    }
    log::warn!("{field_name}: dropping {count} characters not allowed in XML");
    warnings.push(MergeWarning::InvalidCharactersRemoved {
        field_name: field_name.to_string(),
        count,
    });
    value.chars().filter(|c| is_xml_char(*c)).collect()
}

fn evaluate_expression(
    field_name: &str,
    expr: &str,
    by_name: &HashMap<&str, &str>,
    warnings: &mut Vec<MergeWarning>,
) -> String {
    PLACEHOLDER_RE
        .replace_all(expr, |caps: &Captures<'_>| {
            let reference = &caps[1];
            match by_name.get(reference) {
                Some(v) => v.to_string(),
                None => {
                    warnings.push(MergeWarning::UnknownExpressionReference {
                        field_name: field_name.to_string(),
                        reference: reference.to_string(),
                    });
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{resolve_values, FieldValues};
    use crate::mapping::{FieldDefinition, MappingDefinition, SourceKind};
    use crate::merge::MergeWarning;

    fn values(pairs: &[(&str, Option<&str>)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    #[test]
    fn submitted_then_default_then_empty() {
        let mut city = FieldDefinition::new("City");
        city.default_value = Some("Oslo".to_string());
        let mut zip = FieldDefinition::new("Zip");
        zip.required = true;
        let mapping = MappingDefinition::new(
            "t",
            vec![FieldDefinition::new("Name"), city, zip],
        );
        let resolved = resolve_values(&mapping, &values(&[("Name", Some("Ada")), ("City", None)]));
        assert_eq!(resolved.values, vec!["Ada", "Oslo", ""]);
        assert_eq!(
            resolved.warnings,
            vec![MergeWarning::RequiredValueEmpty {
                field_name: "Zip".to_string()
            }]
        );
    }

    #[test]
    fn computed_fields_expand_placeholders() {
        let mut full = FieldDefinition::new("FullName");
        full.source_kind = SourceKind::Computed;
        full.computation_expression = Some("{{ First }} {{Last}}{{Missing}}".to_string());
        let mapping = MappingDefinition::new(
            "t",
            vec![FieldDefinition::new("First"), FieldDefinition::new("Last"), full],
        );
        let resolved = resolve_values(
            &mapping,
            &values(&[("First", Some("Grace")), ("Last", Some("Hopper")), ("Extra", Some("x"))]),
        );
        assert_eq!(resolved.values[2], "Grace Hopper");
        assert!(resolved.warnings.contains(&MergeWarning::UnknownExpressionReference {
            field_name: "FullName".to_string(),
            reference: "Missing".to_string(),
        }));
        assert!(resolved.warnings.contains(&MergeWarning::UnmappedValue {
            field_name: "Extra".to_string()
        }));
    }

    #[test]
    fn characters_xml_cannot_carry_are_dropped() {
        let mapping = MappingDefinition::new("t", vec![FieldDefinition::new("Note")]);
        let resolved = resolve_values(
            &mapping,
            &values(&[("Note", Some("line1\u{0B}line2\u{01}\ttab\r\n\u{FFFE}é"))]),
        );
        assert_eq!(resolved.values, vec!["line1line2\ttab\r\né"]);
        assert_eq!(
            resolved.warnings,
            vec![MergeWarning::InvalidCharactersRemoved {
                field_name: "Note".to_string(),
                count: 3
            }]
        );
    }

    #[test]
    fn submitted_value_overrides_computation() {
        let mut total = FieldDefinition::new("Total");
        total.source_kind = SourceKind::Computed;
        total.computation_expression = Some("{{Net}}".to_string());
        let mapping = MappingDefinition::new("t", vec![FieldDefinition::new("Net"), total]);
        let resolved = resolve_values(&mapping, &values(&[("Net", Some("1")), ("Total", Some("99"))]));
        assert_eq!(resolved.values, vec!["1", "99"]);
    }
}
