use quick_xml::escape::escape;

use super::index::{ParagraphEntry, RunEntry};

/// Piece of run content as it appears in the projection. Only `Text` contributes characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunPiece {
    Text(String),
    Tab,
    Break,
}

/// Builds the HTML fragment consumed by the mapping UI. Every paragraph and run element carries
/// its structural coordinates as `data-*` attributes.
pub struct HtmlWriter {
    out: String,
    inline_styles: bool,
}

impl HtmlWriter {
    pub fn new(inline_styles: bool) -> Self {
        let mut out = String::with_capacity(4096);
        out.push_str(r#"<div class="docx-body">"#);
        Self { out, inline_styles }
    }

    pub fn finish(mut self) -> String {
        self.out.push_str("</div>");
        self.out
    }

    pub fn open_table(&mut self, table_index: usize, nested_depth: usize, path: &str) {
        self.out.push_str(&format!(
            r#"<table class="docx-table" data-table-index="{table_index}" data-nested-depth="{nested_depth}" data-document-path="{}">"#,
            escape(path)
        ));
    }

    pub fn close_table(&mut self) {
        self.out.push_str("</table>");
    }

    pub fn open_row(&mut self) {
        self.out.push_str("<tr>");
    }

    pub fn close_row(&mut self) {
        self.out.push_str("</tr>");
    }

    pub fn open_cell(&mut self, colspan: Option<u32>) {
        match colspan.filter(|c| *c > 1) {
            Some(c) => self.out.push_str(&format!(r#"<td colspan="{c}">"#)),
            None => self.out.push_str("<td>"),
        }
    }

    pub fn close_cell(&mut self) {
        self.out.push_str("</td>");
    }

    pub fn paragraph(&mut self, para: &ParagraphEntry, runs: &[(RunEntry, Vec<RunPiece>, String)]) {
        self.out.push_str(&format!(
            r#"<p data-paragraph-index="{}" data-nested-depth="{}" data-in-nested-table="{}" data-document-path="{}""#,
            para.paragraph_index,
            para.nested_depth,
            para.is_in_nested_table,
            escape(para.document_path.as_str())
        ));
        if let Some(style) = para.style.as_deref() {
            self.out
                .push_str(&format!(r#" data-style="{}""#, escape(style)));
        }
        self.out.push('>');
        for (run, pieces, css) in runs {
            self.run(para, run, pieces, css);
        }
        self.out.push_str("</p>");
    }

    fn run(&mut self, para: &ParagraphEntry, run: &RunEntry, pieces: &[RunPiece], css: &str) {
        self.out.push_str(&format!(
            r#"<span class="docx-run" data-paragraph-index="{}" data-run-index="{}" data-element-id="{}" data-char-length="{}" data-nested-depth="{}" data-in-nested-table="{}""#,
            para.paragraph_index,
            run.run_index,
            escape(run.element_id.as_str()),
            run.text_length,
            para.nested_depth,
            para.is_in_nested_table
        ));
        if self.inline_styles && !css.is_empty() {
            self.out.push_str(&format!(r#" style="{}""#, escape(css)));
        }
        self.out.push('>');
        for piece in pieces {
            match piece {
                RunPiece::Text(t) => self.out.push_str(&escape(t.as_str())),
                RunPiece::Tab => self.out.push_str(r#"<span class="docx-tab"></span>"#),
                RunPiece::Break => self.out.push_str("<br>"),
            }
        }
        self.out.push_str("</span>");
    }
}
