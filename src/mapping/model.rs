use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::schema::CURRENT_SCHEMA_VERSION;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

pub fn is_identifier_safe(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// One physical insertion point, valid only against the byte-identical document it was
/// computed from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralAddress {
    pub paragraph_index: usize,
    pub run_index: usize,
    pub char_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<String>,
    #[serde(default)]
    pub is_in_nested_table: bool,
    #[serde(default)]
    pub nested_depth: usize,
}

impl StructuralAddress {
    pub fn new(paragraph_index: usize, run_index: usize, char_offset: usize) -> Self {
        Self {
            paragraph_index,
            run_index,
            char_offset,
            ..Default::default()
        }
    }

    pub fn with_element_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }
}

impl fmt::Display for StructuralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p={} r={} c={}",
            self.paragraph_index, self.run_index, self.char_offset
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    External,
    #[default]
    UserInput,
    Computed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computation_expression: Option<String>,
    #[serde(default)]
    pub positions: Vec<StructuralAddress>,
}

fn default_data_type() -> String {
    "text".to_string()
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            data_type: default_data_type(),
            required: false,
            default_value: None,
            source_kind: SourceKind::UserInput,
            computation_expression: None,
            positions: Vec::new(),
        }
    }

    pub fn at(mut self, address: StructuralAddress) -> Self {
        self.positions.push(address);
        self
    }
}

/// The field-to-position association for one template document. Replaced wholesale at the end
/// of every mapping session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDefinition {
    pub schema_version: String,
    pub mapped_at: DateTime<Utc>,
    pub mapped_by: String,
    pub fields: Vec<FieldDefinition>,
}

impl MappingDefinition {
    pub fn new(mapped_by: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            mapped_at: Utc::now(),
            mapped_by: mapped_by.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position_count(&self) -> usize {
        self.fields.iter().map(|f| f.positions.len()).sum()
    }

    /// Definition-level problems that do not depend on any document.
    pub fn lint(&self) -> Vec<DefinitionIssue> {
        let mut issues = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for f in &self.fields {
            if f.name.is_empty() {
                issues.push(DefinitionIssue::new(&f.name, DefinitionProblem::EmptyName));
                continue;
            }
            if !is_identifier_safe(&f.name) {
                issues.push(DefinitionIssue::new(&f.name, DefinitionProblem::NotIdentifierSafe));
            }
            if !seen.insert(f.name.as_str()) {
                issues.push(DefinitionIssue::new(&f.name, DefinitionProblem::DuplicateName));
            }
            let has_expr = f
                .computation_expression
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty());
            match (f.source_kind, has_expr) {
                (SourceKind::Computed, false) => {
                    issues.push(DefinitionIssue::new(&f.name, DefinitionProblem::MissingExpression))
                }
                (SourceKind::External | SourceKind::UserInput, true) => issues.push(
                    DefinitionIssue::new(&f.name, DefinitionProblem::UnexpectedExpression),
                ),
                _ => {}
            }
        }
        issues
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefinitionProblem {
    EmptyName,
    NotIdentifierSafe,
    DuplicateName,
    MissingExpression,
    UnexpectedExpression,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionIssue {
    pub field_name: String,
    pub problem: DefinitionProblem,
}

impl DefinitionIssue {
    fn new(field_name: &str, problem: DefinitionProblem) -> Self {
        Self {
            field_name: field_name.to_string(),
            problem,
        }
    }
}

impl fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.problem {
            DefinitionProblem::EmptyName => "field name is empty",
            DefinitionProblem::NotIdentifierSafe => "field name is not identifier-safe",
            DefinitionProblem::DuplicateName => "field name is used more than once",
            DefinitionProblem::MissingExpression => "computed field has no expression",
            DefinitionProblem::UnexpectedExpression => "expression on a non-computed field",
        };
        write!(f, "{}: {what}", self.field_name)
    }
}
