//! Persisted mapping formats.
//!
//! Two shapes have existed. Version 1 stored one consolidated blob per template: the field
//! list and, separately, one flat position list whose entries name their field. Version 2
//! (current) stores positions inside each field. The `schemaVersion` tag selects the shape;
//! only the major component is significant (`"2"` and `"2.0"` are the same schema).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

use super::model::{FieldDefinition, MappingDefinition, StructuralAddress};

pub const CURRENT_SCHEMA_VERSION: &str = "2";
const LEGACY_SCHEMA_MAJOR: u32 = 1;
const CURRENT_SCHEMA_MAJOR: u32 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMapping {
    pub schema_version: String,
    #[serde(default)]
    pub mapped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mapped_by: String,
    pub mapping: LegacyBlob,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyBlob {
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub positions: Vec<LegacyPosition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPosition {
    pub field_name: String,
    #[serde(flatten)]
    pub address: StructuralAddress,
}

/// A persisted mapping of any supported schema version.
#[derive(Clone, Debug, PartialEq)]
pub enum VersionedMapping {
    Legacy(LegacyMapping),
    Current(MappingDefinition),
}

/// Result of bringing a mapping to the current schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Migrated {
    pub mapping: MappingDefinition,
    /// Legacy positions whose `fieldName` matched no field.
    pub orphaned: Vec<LegacyPosition>,
    pub from_version: String,
}

impl VersionedMapping {
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let found = schema_version_of(&value);
        match schema_major(&found) {
            Some(LEGACY_SCHEMA_MAJOR) => Ok(Self::Legacy(serde_json::from_value(value)?)),
            Some(CURRENT_SCHEMA_MAJOR) => Ok(Self::Current(serde_json::from_value(value)?)),
            _ => Err(EngineError::IncompatibleMappingSchema {
                found,
                supported: format!("{LEGACY_SCHEMA_MAJOR}, {CURRENT_SCHEMA_MAJOR}"),
            }),
        }
    }

    pub fn schema_version(&self) -> &str {
        match self {
            Self::Legacy(m) => &m.schema_version,
            Self::Current(m) => &m.schema_version,
        }
    }

    pub fn into_current(self) -> Migrated {
        match self {
            Self::Legacy(m) => migrate_v1(m),
            Self::Current(m) => Migrated {
                from_version: m.schema_version.clone(),
                mapping: m,
                orphaned: Vec::new(),
            },
        }
    }
}

fn schema_version_of(value: &Value) -> String {
    match value.get("schemaVersion") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn schema_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// True when the mapping carries the schema the merge engine accepts.
pub fn is_current_schema(version: &str) -> bool {
    schema_major(version) == Some(CURRENT_SCHEMA_MAJOR)
}

pub fn ensure_current_schema(mapping: &MappingDefinition) -> Result<()> {
    if is_current_schema(&mapping.schema_version) {
        return Ok(());
    }
    Err(EngineError::IncompatibleMappingSchema {
        found: mapping.schema_version.clone(),
        supported: CURRENT_SCHEMA_VERSION.to_string(),
    })
}

/// Pure conversion of a consolidated v1 blob into per-field position lists. Position order
/// within a field follows the order of the legacy list.
pub fn migrate_v1(legacy: LegacyMapping) -> Migrated {
    let from_version = legacy.schema_version.clone();
    let mut fields = legacy.mapping.fields;
    for f in fields.iter_mut() {
        f.positions.clear();
    }
    let mut orphaned = Vec::new();
    for pos in legacy.mapping.positions {
        match fields.iter_mut().find(|f| f.name == pos.field_name) {
            Some(f) => f.positions.push(pos.address),
            None => orphaned.push(pos),
        }
    }
    Migrated {
        mapping: MappingDefinition {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            mapped_at: legacy.mapped_at.unwrap_or_default(),
            mapped_by: legacy.mapped_by,
            fields,
        },
        orphaned,
        from_version,
    }
}

/// Parses a persisted mapping of any supported version into the current shape.
pub fn parse_mapping_json(text: &str) -> Result<MappingDefinition> {
    let migrated = VersionedMapping::from_json(text)?.into_current();
    if !migrated.orphaned.is_empty() {
        log::warn!(
            "dropped {} legacy positions without a matching field while migrating schema {}",
            migrated.orphaned.len(),
            migrated.from_version
        );
    }
    Ok(migrated.mapping)
}

pub fn mapping_to_json(mapping: &MappingDefinition) -> Result<String> {
    Ok(serde_json::to_string_pretty(mapping)?)
}
