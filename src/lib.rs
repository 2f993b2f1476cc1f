//! Structural field mapping and mail merge for OOXML word-processing documents.
//!
//! [`flatten`] turns an uploaded document into an addressed HTML projection, a mapping UI
//! returns [`MappingDefinition`]s pointing at runs and character offsets, and [`merge`] later
//! writes field values into the original document at those coordinates.

pub mod check;
pub mod config;
pub mod docx;
pub mod error;
pub mod flatten;
pub mod mapping;
pub mod merge;
pub mod store;

#[cfg(test)]
mod testutil;

pub use check::{check, check_json, check_with, CheckReport};
pub use error::{EngineError, Result};
pub use flatten::{address_index, flatten, flatten_with, AddressIndex, FlattenOptions, Flattened};
pub use mapping::{
    migrate_v1, parse_mapping_json, validate, FieldDefinition, MappingDefinition, PositionIssue,
    SourceKind, StaleReason, StructuralAddress,
};
pub use merge::{
    merge, merge_batch, merge_with, FieldValues, MergeOptions, MergeOutcome, MergeReport,
    MergeRequest, MergeResult, MergeWarning,
};
pub use store::{
    merge_template, merge_template_batch, FsTemplateStore, MemoryTemplateStore, TemplateStore,
};
