pub mod package;
pub mod style;
pub mod tree;
pub mod xml;

use crate::error::Result;

use package::DocxPackage;
use tree::DocTree;
use xml::{parse_xml_part, XmlPart};

/// A loaded package with its main document part parsed into an editable event list and an
/// element arena over it.
#[derive(Clone)]
pub struct DocxDocument {
    pub package: DocxPackage,
    pub part: XmlPart,
    pub tree: DocTree,
}

impl DocxDocument {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let package = DocxPackage::from_bytes(bytes)?;
        let (name, data) = package.main_document_bytes()?;
        let part = parse_xml_part(&name, data)?;
        let tree = DocTree::build(&part)?;
        Ok(Self {
            package,
            part,
            tree,
        })
    }

    /// Rebuilds the arena after the event list was edited.
    pub fn rebuild_tree(&mut self) -> Result<()> {
        self.tree = DocTree::build(&self.part)?;
        Ok(())
    }
}
