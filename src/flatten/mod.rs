//! Structural flattening: walks the main document body in document order and gives every
//! paragraph and run a coordinate that the mapping UI can report back.
//!
//! Paragraph and run numbering is one document-order sequence regardless of table nesting; a
//! paragraph inside a table inside a table continues the same counter as the body paragraphs
//! around it. `nestedDepth` carries the nesting instead.

mod html;
mod index;

use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::docx::style::RunStyle;
use crate::docx::tree::{DocTree, NodeId};
use crate::docx::xml::{find_attr, XmlEvent, XmlPart, TEXT_TAG};
use crate::docx::DocxDocument;
use crate::error::Result;

pub use html::{HtmlWriter, RunPiece};
pub use index::{AddressIndex, ParagraphEntry, RunEntry};

/// Containers whose children are read as if they were children of the enclosing block.
const BLOCK_WRAPPERS: &[&str] = &["w:sdt", "w:sdtContent", "w:customXml"];
/// Inline containers whose runs belong to the enclosing paragraph.
const INLINE_WRAPPERS: &[&str] = &[
    "w:hyperlink",
    "w:ins",
    "w:smartTag",
    "w:fldSimple",
    "w:sdt",
    "w:sdtContent",
    "w:customXml",
    "w:moveTo",
];

#[derive(Clone, Copy, Debug)]
pub struct FlattenOptions {
    pub inline_styles: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            inline_styles: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Flattened {
    pub html: String,
    pub index: AddressIndex,
}

/// Where one addressed run lives in the event list.
#[derive(Clone, Debug)]
pub(crate) struct RunSlot {
    pub node: NodeId,
    /// `w:t` children in order; their concatenated text is the run text.
    pub segments: Vec<NodeId>,
}

#[derive(Clone, Debug)]
pub(crate) struct Layout {
    /// `runs[p][r]`, parallel to `index.paragraphs[p].runs[r]`.
    pub runs: Vec<Vec<RunSlot>>,
    pub index: AddressIndex,
}

impl Layout {
    pub fn slot(&self, paragraph_index: usize, run_index: usize) -> Option<&RunSlot> {
        self.runs.get(paragraph_index)?.get(run_index)
    }
}

pub fn flatten(document_bytes: &[u8]) -> Result<Flattened> {
    flatten_with(document_bytes, &FlattenOptions::default())
}

pub fn flatten_with(document_bytes: &[u8], options: &FlattenOptions) -> Result<Flattened> {
    let t0 = Instant::now();
    let doc = DocxDocument::load(document_bytes)?;
    let t_load = t0.elapsed();

    let mut html = HtmlWriter::new(options.inline_styles);
    let layout = layout(&doc, Some(&mut html));
    let html = html.finish();

    log::info!(
        "Flatten: {} paragraphs, {} runs, {} tables in {} (load={:.1}ms, walk={:.1}ms, html {} bytes)",
        layout.index.paragraph_count(),
        layout.index.run_count(),
        layout.index.table_count,
        layout.index.part_name,
        t_load.as_secs_f64() * 1000.0,
        (t0.elapsed() - t_load).as_secs_f64() * 1000.0,
        html.len(),
    );
    Ok(Flattened {
        html,
        index: layout.index,
    })
}

/// Index only, without building the projection.
pub fn address_index(document_bytes: &[u8]) -> Result<AddressIndex> {
    let doc = DocxDocument::load(document_bytes)?;
    Ok(layout(&doc, None).index)
}

pub(crate) fn layout(doc: &DocxDocument, html: Option<&mut HtmlWriter>) -> Layout {
    let mut walker = Walker {
        part: &doc.part,
        tree: &doc.tree,
        html,
        depth: 0,
        table_count: 0,
        path: Vec::new(),
        runs: Vec::new(),
        paragraphs: Vec::new(),
    };
    match doc.tree.find_first("w:body") {
        Some(body) => {
            walker.path.push("body".to_string());
            walker.walk_block(body);
        }
        None => log::debug!("{}: no w:body, nothing to address", doc.part.name),
    }
    Layout {
        runs: walker.runs,
        index: AddressIndex {
            part_name: doc.part.name.clone(),
            table_count: walker.table_count,
            paragraphs: walker.paragraphs,
        },
    }
}

struct Walker<'a, 'h> {
    part: &'a XmlPart,
    tree: &'a DocTree,
    html: Option<&'h mut HtmlWriter>,
    depth: usize,
    table_count: usize,
    path: Vec<String>,
    runs: Vec<Vec<RunSlot>>,
    paragraphs: Vec<ParagraphEntry>,
}

#[derive(Default)]
struct BlockCounters {
    paragraphs: usize,
    tables: usize,
}

impl Walker<'_, '_> {
    fn walk_block(&mut self, container: NodeId) {
        let mut counters = BlockCounters::default();
        self.walk_block_children(container, &mut counters);
    }

    fn walk_block_children(&mut self, container: NodeId, counters: &mut BlockCounters) {
        let tree = self.tree;
        for &child in tree.children(container) {
            match tree.node(child).name.as_str() {
                "w:p" => {
                    self.visit_paragraph(child, counters.paragraphs);
                    counters.paragraphs += 1;
                }
                "w:tbl" => {
                    self.visit_table(child, counters.tables);
                    counters.tables += 1;
                }
                name if BLOCK_WRAPPERS.contains(&name) => self.walk_block_children(child, counters),
                _ => {}
            }
        }
    }

    fn visit_table(&mut self, tbl: NodeId, local_index: usize) {
        let tree = self.tree;
        self.depth += 1;
        let table_index = self.table_count;
        self.table_count += 1;
        self.path.push(format!("tbl[{local_index}]"));
        let path = self.path.join("/");
        if let Some(h) = self.html.as_deref_mut() {
            h.open_table(table_index, self.depth, &path);
        }

        let mut rows = Vec::new();
        collect_through_wrappers(tree, tbl, "w:tr", &mut rows);
        for (ri, row) in rows.into_iter().enumerate() {
            self.path.push(format!("tr[{ri}]"));
            if let Some(h) = self.html.as_deref_mut() {
                h.open_row();
            }
            let mut cells = Vec::new();
            collect_through_wrappers(tree, row, "w:tc", &mut cells);
            for (ci, cell) in cells.into_iter().enumerate() {
                self.path.push(format!("tc[{ci}]"));
                if let Some(h) = self.html.as_deref_mut() {
                    h.open_cell(grid_span(tree, self.part, cell));
                }
                self.walk_block(cell);
                if let Some(h) = self.html.as_deref_mut() {
                    h.close_cell();
                }
                self.path.pop();
            }
            if let Some(h) = self.html.as_deref_mut() {
                h.close_row();
            }
            self.path.pop();
        }

        if let Some(h) = self.html.as_deref_mut() {
            h.close_table();
        }
        self.path.pop();
        self.depth -= 1;
    }

    fn visit_paragraph(&mut self, p: NodeId, local_index: usize) {
        let tree = self.tree;
        let part = self.part;
        let paragraph_index = self.paragraphs.len();
        self.path.push(format!("p[{local_index}]"));
        let document_path = self.path.join("/");

        let mut run_nodes = Vec::new();
        collect_runs(tree, p, &mut run_nodes);

        let mut slots = Vec::with_capacity(run_nodes.len());
        let mut entries = Vec::with_capacity(run_nodes.len());
        for (run_index, run) in run_nodes.into_iter().enumerate() {
            let mut segments = Vec::new();
            let mut pieces = Vec::new();
            let mut text = String::new();
            for &child in tree.children(run) {
                match tree.node(child).name.as_str() {
                    TEXT_TAG => {
                        let t = tree.direct_text(part, child);
                        text.push_str(&t);
                        pieces.push(RunPiece::Text(t));
                        segments.push(child);
                    }
                    "w:tab" | "w:ptab" => pieces.push(RunPiece::Tab),
                    "w:br" | "w:cr" => pieces.push(RunPiece::Break),
                    _ => {}
                }
            }
            let style = RunStyle::from_run(tree, part, run);
            let element_id = element_id(tree, part, run, paragraph_index, run_index, self.depth, &text);
            entries.push((
                RunEntry {
                    run_index,
                    element_id,
                    text_length: text.chars().count(),
                    text,
                    document_path: format!("{document_path}/r[{run_index}]"),
                },
                pieces,
                style.css(),
            ));
            slots.push(RunSlot { node: run, segments });
        }

        let entry = ParagraphEntry {
            paragraph_index,
            nested_depth: self.depth,
            is_in_nested_table: self.depth > 1,
            document_path,
            style: paragraph_style(tree, part, p),
            runs: entries.iter().map(|(r, _, _)| r.clone()).collect(),
        };
        if let Some(h) = self.html.as_deref_mut() {
            h.paragraph(&entry, &entries);
        }
        self.paragraphs.push(entry);
        self.runs.push(slots);
        self.path.pop();
    }
}

fn collect_through_wrappers(tree: &DocTree, parent: NodeId, wanted: &str, out: &mut Vec<NodeId>) {
    for &child in tree.children(parent) {
        let name = tree.node(child).name.as_str();
        if name == wanted {
            out.push(child);
        } else if BLOCK_WRAPPERS.contains(&name) {
            collect_through_wrappers(tree, child, wanted, out);
        }
    }
}

fn collect_runs(tree: &DocTree, parent: NodeId, out: &mut Vec<NodeId>) {
    for &child in tree.children(parent) {
        let name = tree.node(child).name.as_str();
        if name == "w:r" {
            out.push(child);
        } else if INLINE_WRAPPERS.contains(&name) {
            collect_runs(tree, child, out);
        }
    }
}

fn start_attrs<'p>(part: &'p XmlPart, tree: &DocTree, id: NodeId) -> &'p [(String, String)] {
    match &part.events[tree.node(id).start] {
        XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => attrs,
        _ => &[],
    }
}

fn paragraph_style(tree: &DocTree, part: &XmlPart, p: NodeId) -> Option<String> {
    let ppr = tree.child_named(p, "w:pPr")?;
    let style = tree.child_named(ppr, "w:pStyle")?;
    find_attr(start_attrs(part, tree, style), "w:val")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn grid_span(tree: &DocTree, part: &XmlPart, cell: NodeId) -> Option<u32> {
    let tcpr = tree.child_named(cell, "w:tcPr")?;
    let span = tree.child_named(tcpr, "w:gridSpan")?;
    find_attr(start_attrs(part, tree, span), "w:val").and_then(|v| v.trim().parse().ok())
}

/// Digest of the run's coordinates, depth, text and direct formatting. Recomputed on every
/// pass; equal across passes over identical bytes and different once the run drifts.
fn element_id(
    tree: &DocTree,
    part: &XmlPart,
    run: NodeId,
    paragraph_index: usize,
    run_index: usize,
    depth: usize,
    text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{paragraph_index}|{run_index}|{depth}|").as_bytes());
    hasher.update(text.as_bytes());
    if let Some(rpr) = tree.child_named(run, "w:rPr") {
        let n = tree.node(rpr);
        hasher.update(format!("|{:?}", &part.events[n.start..=n.end]).as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("r-{}", &digest[..12])
}
