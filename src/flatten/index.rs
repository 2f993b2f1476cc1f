use serde::{Deserialize, Serialize};

use crate::mapping::StructuralAddress;

/// Value-addressable view of one flatten pass: every paragraph in document order with its
/// runs. `validate` works against this alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressIndex {
    pub part_name: String,
    pub table_count: usize,
    pub paragraphs: Vec<ParagraphEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphEntry {
    pub paragraph_index: usize,
    pub nested_depth: usize,
    pub is_in_nested_table: bool,
    pub document_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub runs: Vec<RunEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub run_index: usize,
    pub element_id: String,
    /// Length of `text` in characters (Unicode scalar values).
    pub text_length: usize,
    pub text: String,
    pub document_path: String,
}

impl AddressIndex {
    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn paragraph(&self, paragraph_index: usize) -> Option<&ParagraphEntry> {
        self.paragraphs.get(paragraph_index)
    }

    pub fn run(&self, paragraph_index: usize, run_index: usize) -> Option<&RunEntry> {
        self.paragraphs.get(paragraph_index)?.runs.get(run_index)
    }

    pub fn run_count(&self) -> usize {
        self.paragraphs.iter().map(|p| p.runs.len()).sum()
    }

    /// The full address the UI would report for a character position, if it exists.
    pub fn address_of(
        &self,
        paragraph_index: usize,
        run_index: usize,
        char_offset: usize,
    ) -> Option<StructuralAddress> {
        let para = self.paragraphs.get(paragraph_index)?;
        let run = para.runs.get(run_index)?;
        if char_offset > run.text_length {
            return None;
        }
        Some(StructuralAddress {
            paragraph_index,
            run_index,
            char_offset,
            element_id: Some(run.element_id.clone()),
            document_path: Some(run.document_path.clone()),
            is_in_nested_table: para.is_in_nested_table,
            nested_depth: para.nested_depth,
        })
    }

    /// Depth/index triples in document order; equal across passes over the same document.
    pub fn shape(&self) -> Vec<(usize, usize, usize)> {
        self.paragraphs
            .iter()
            .flat_map(|p| {
                let runs: Vec<(usize, usize, usize)> = if p.runs.is_empty() {
                    vec![(p.paragraph_index, usize::MAX, p.nested_depth)]
                } else {
                    p.runs
                        .iter()
                        .map(|r| (p.paragraph_index, r.run_index, p.nested_depth))
                        .collect()
                };
                runs
            })
            .collect()
    }
}
