mod model;
mod schema;
mod validate;

pub use model::{
    is_identifier_safe, DefinitionIssue, DefinitionProblem, FieldDefinition, MappingDefinition,
    SourceKind, StructuralAddress,
};
pub use schema::{
    ensure_current_schema, is_current_schema, mapping_to_json, migrate_v1, parse_mapping_json,
    LegacyBlob, LegacyMapping, LegacyPosition, Migrated, VersionedMapping, CURRENT_SCHEMA_VERSION,
};
pub use validate::{
    check_address, validate, validate_positions, validate_positions_with, PositionIssue,
    StaleReason,
};
