//! Storage collaborators for templates, mappings and merged output. The engine itself does no
//! I/O; callers move bytes through one of these.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context};

use crate::mapping::{mapping_to_json, parse_mapping_json, MappingDefinition};
use crate::merge::{merge_batch, merge_with, FieldValues, MergeOptions, MergeReport};

const ORIGINAL_FILE: &str = "original.docx";
const MAPPING_FILE: &str = "mapping.json";
const MERGED_DIR: &str = "merged";

/// Letters, digits, `-` and `_`; never empty.
pub fn is_valid_template_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn ensure_id(kind: &str, id: &str) -> anyhow::Result<()> {
    if is_valid_template_id(id) {
        Ok(())
    } else {
        bail!("invalid {kind}: {id:?}")
    }
}

pub trait TemplateStore: Send + Sync {
    fn save_original(&self, template_id: &str, bytes: &[u8]) -> anyhow::Result<()>;
    fn load_original(&self, template_id: &str) -> anyhow::Result<Vec<u8>>;
    /// Replaces any previous mapping for the template.
    fn save_mapping(&self, template_id: &str, mapping: &MappingDefinition) -> anyhow::Result<()>;
    /// Stored mapping in the current schema; legacy mappings are migrated on read.
    fn load_mapping(&self, template_id: &str) -> anyhow::Result<Option<MappingDefinition>>;
    fn save_merged(&self, template_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()>;
}

/// `<root>/<templateId>/original.docx`, `mapping.json` and `merged/<name>.docx`.
#[derive(Clone, Debug)]
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template_dir(&self, template_id: &str) -> anyhow::Result<PathBuf> {
        ensure_id("template id", template_id)?;
        Ok(self.root.join(template_id))
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write: {}", path.display()))
}

impl TemplateStore for FsTemplateStore {
    fn save_original(&self, template_id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.template_dir(template_id)?.join(ORIGINAL_FILE);
        write_file(&path, bytes)
    }

    fn load_original(&self, template_id: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.template_dir(template_id)?.join(ORIGINAL_FILE);
        std::fs::read(&path).with_context(|| format!("read template: {}", path.display()))
    }

    fn save_mapping(&self, template_id: &str, mapping: &MappingDefinition) -> anyhow::Result<()> {
        let path = self.template_dir(template_id)?.join(MAPPING_FILE);
        let json = mapping_to_json(mapping).context("serialize mapping")?;
        write_file(&path, json.as_bytes())
    }

    fn load_mapping(&self, template_id: &str) -> anyhow::Result<Option<MappingDefinition>> {
        let path = self.template_dir(template_id)?.join(MAPPING_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read mapping: {}", path.display()))?;
        let mapping =
            parse_mapping_json(&text).with_context(|| format!("parse mapping: {}", path.display()))?;
        Ok(Some(mapping))
    }

    fn save_merged(&self, template_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        ensure_id("merged document name", name)?;
        let path = self
            .template_dir(template_id)?
            .join(MERGED_DIR)
            .join(format!("{name}.docx"));
        write_file(&path, bytes)
    }
}

fn load_template(
    store: &dyn TemplateStore,
    template_id: &str,
) -> anyhow::Result<(Vec<u8>, MappingDefinition)> {
    let original = store.load_original(template_id)?;
    let mapping = store
        .load_mapping(template_id)?
        .with_context(|| format!("template {template_id} has no mapping"))?;
    Ok((original, mapping))
}

/// Merges a stored template with `values` and stores the result as `name`.
pub fn merge_template(
    store: &dyn TemplateStore,
    template_id: &str,
    name: &str,
    values: &FieldValues,
    options: &MergeOptions,
) -> anyhow::Result<MergeReport> {
    ensure_id("merged document name", name)?;
    let (original, mapping) = load_template(store, template_id)?;
    let out = merge_with(&original, &mapping, values, options)
        .with_context(|| format!("merge template {template_id}"))?;
    store.save_merged(template_id, name, &out.document_bytes)?;
    Ok(out.report)
}

/// One merged document per row, stored as `row_0000`, `row_0001`, ...; rows fail independently.
pub fn merge_template_batch(
    store: &dyn TemplateStore,
    template_id: &str,
    rows: &[FieldValues],
    options: &MergeOptions,
) -> anyhow::Result<Vec<anyhow::Result<MergeReport>>> {
    let (original, mapping) = load_template(store, template_id)?;
    let results = merge_batch(&original, &mapping, rows, options)
        .with_context(|| format!("merge template {template_id}"))?;
    Ok(results
        .into_iter()
        .enumerate()
        .map(|(i, result)| {
            let out = result.with_context(|| format!("row {i}"))?;
            store.save_merged(template_id, &format!("row_{i:04}"), &out.document_bytes)?;
            Ok(out.report)
        })
        .collect())
}

#[derive(Default)]
struct MemoryTemplate {
    original: Option<Vec<u8>>,
    mapping: Option<MappingDefinition>,
    merged: HashMap<String, Vec<u8>>,
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, MemoryTemplate>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merged(&self, template_id: &str, name: &str) -> Option<Vec<u8>> {
        let guard = self.templates.read().ok()?;
        guard.get(template_id)?.merged.get(name).cloned()
    }

    fn with_template<R>(
        &self,
        template_id: &str,
        f: impl FnOnce(&mut MemoryTemplate) -> R,
    ) -> anyhow::Result<R> {
        ensure_id("template id", template_id)?;
        let mut guard = self
            .templates
            .write()
            .map_err(|_| anyhow!("template store lock poisoned"))?;
        Ok(f(guard.entry(template_id.to_string()).or_default()))
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn save_original(&self, template_id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.with_template(template_id, |t| t.original = Some(bytes.to_vec()))
    }

    fn load_original(&self, template_id: &str) -> anyhow::Result<Vec<u8>> {
        self.with_template(template_id, |t| t.original.clone())?
            .with_context(|| format!("no original document for template {template_id}"))
    }

    fn save_mapping(&self, template_id: &str, mapping: &MappingDefinition) -> anyhow::Result<()> {
        self.with_template(template_id, |t| t.mapping = Some(mapping.clone()))
    }

    fn load_mapping(&self, template_id: &str) -> anyhow::Result<Option<MappingDefinition>> {
        self.with_template(template_id, |t| t.mapping.clone())
    }

    fn save_merged(&self, template_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        ensure_id("merged document name", name)?;
        self.with_template(template_id, |t| {
            t.merged.insert(name.to_string(), bytes.to_vec());
        })
    }
}
