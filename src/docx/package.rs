use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EngineError, Result};

use super::xml::{find_attr, parse_xml_part, XmlEvent};

pub const DEFAULT_MAIN_PART: &str = "word/document.xml";
const PACKAGE_RELS: &str = "_rels/.rels";
const OFFICE_DOCUMENT_REL_SUFFIX: &str = "/officeDocument";
/// Upper bound on the buffer reserved up front for one entry; the declared size is untrusted.
const MAX_ENTRY_PREALLOC: u64 = 1 << 20;

/// An OOXML container held fully in memory, entries kept in archive order.
#[derive(Clone)]
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
    /// Archive the entries were read from; untouched entries are copied from it compressed.
    source: Vec<u8>,
}

#[derive(Clone)]
pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
    /// Position in the source archive.
    pub(crate) source_index: Option<usize>,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| EngineError::malformed(format!("not a zip container: {e}")))?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| EngineError::malformed(format!("zip entry {i}: {e}")))?;
            let mut data = Vec::with_capacity(prealloc_hint(file.size()));
            file.read_to_end(&mut data)
                .map_err(|e| EngineError::malformed(format!("read zip entry {}: {e}", file.name())))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
                source_index: Some(i),
            });
        }
        Ok(Self {
            entries,
            source: bytes.to_vec(),
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn entry(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Name of the main document part, resolved through the package relationships.
    pub fn main_document_part(&self) -> Result<String> {
        let from_rels = match self.entry(PACKAGE_RELS) {
            Some(rels) if !rels.data.is_empty() => {
                let part = parse_xml_part(PACKAGE_RELS, &rels.data)?;
                office_document_target(&part.events)
            }
            _ => None,
        };
        let name = from_rels.unwrap_or_else(|| DEFAULT_MAIN_PART.to_string());
        if self.entry(&name).is_none() {
            return Err(EngineError::malformed(format!("missing main document part: {name}")));
        }
        Ok(name)
    }

    pub fn main_document_bytes(&self) -> Result<(String, &[u8])> {
        let name = self.main_document_part()?;
        let entry = self
            .entry(&name)
            .ok_or_else(|| EngineError::malformed(format!("missing part: {name}")))?;
        Ok((name, entry.data.as_slice()))
    }

    /// Re-emits the container in original entry order. Entries absent from `replacements` are
    /// copied without recompression, so their stored bytes stay identical.
    pub fn to_bytes_with_replacements(&self, replacements: &HashMap<String, Vec<u8>>) -> Result<Vec<u8>> {
        let mut source = ZipArchive::new(Cursor::new(self.source.as_slice()))?;
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for ent in &self.entries {
            let replaced = replacements.get(&ent.name);
            if let (None, Some(idx)) = (replaced, ent.source_index) {
                zout.raw_copy_file(source.by_index_raw(idx)?)?;
                continue;
            }
            let data = replaced.unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(ent.name.as_str(), opts)?;
            } else {
                zout.start_file(ent.name.as_str(), opts)?;
                zout.write_all(data)?;
            }
        }
        let cursor = zout.finish()?;
        Ok(cursor.into_inner())
    }

    pub fn write_with_replacements(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        let bytes = self.to_bytes_with_replacements(replacements)?;
        std::fs::write(output_path, bytes)?;
        Ok(())
    }
}

fn office_document_target(events: &[XmlEvent]) -> Option<String> {
    for ev in events {
        if let XmlEvent::Empty { name, attrs } | XmlEvent::Start { name, attrs } = ev {
            if name != "Relationship" {
                continue;
            }
            let typ = find_attr(attrs, "Type").unwrap_or("");
            if !typ.ends_with(OFFICE_DOCUMENT_REL_SUFFIX) {
                continue;
            }
            let target = find_attr(attrs, "Target")?.trim().replace('\\', "/");
            return normalize_part_name(&target);
        }
    }
    None
}

/// Resolves a package-root relative target: leading `/`, `.` and `..` segments are folded away.
fn normalize_part_name(target: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn prealloc_hint(declared: u64) -> usize {
    declared.min(MAX_ENTRY_PREALLOC) as usize
}
