use super::tree::{DocTree, NodeId};
use super::xml::{find_attr, XmlEvent, XmlPart};

/// Direct run formatting (`w:rPr`) as far as the HTML projection needs it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStyle {
    pub b: Option<bool>,
    pub i: Option<bool>,
    pub u: Option<String>,
    pub strike: Option<bool>,
    pub color: Option<String>,
    pub highlight: Option<String>,
    pub sz: Option<String>,
    pub font: Option<String>,
}

impl RunStyle {
    pub fn from_run(tree: &DocTree, part: &XmlPart, run: NodeId) -> Self {
        let mut style = RunStyle::default();
        let Some(rpr) = tree.child_named(run, "w:rPr") else {
            return style;
        };
        for &prop in tree.children(rpr) {
            let node = tree.node(prop);
            if let XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } =
                &part.events[node.start]
            {
                parse_w_rpr_property(&mut style, &node.name, attrs);
            }
        }
        style
    }

    /// Inline CSS for the projection. Empty when the run carries no direct formatting.
    pub fn css(&self) -> String {
        let mut decls: Vec<String> = Vec::new();
        if self.b == Some(true) {
            decls.push("font-weight:bold".to_string());
        }
        if self.i == Some(true) {
            decls.push("font-style:italic".to_string());
        }
        let underline = self.u.as_deref().is_some_and(|u| u != "none");
        let strike = self.strike == Some(true);
        match (underline, strike) {
            (true, true) => decls.push("text-decoration:underline line-through".to_string()),
            (true, false) => decls.push("text-decoration:underline".to_string()),
            (false, true) => decls.push("text-decoration:line-through".to_string()),
            (false, false) => {}
        }
        if let Some(c) = self.color.as_deref().filter(|c| is_hex_color(c)) {
            decls.push(format!("color:#{c}"));
        }
        if let Some(h) = self.highlight.as_deref().filter(|h| *h != "none") {
            decls.push(format!("background-color:{}", h.to_ascii_lowercase()));
        }
        // w:sz is in half-points.
        if let Some(half_points) = self.sz.as_deref().and_then(|s| s.trim().parse::<u32>().ok()) {
            let pt = half_points as f32 / 2.0;
            decls.push(format!("font-size:{pt}pt"));
        }
        if let Some(f) = self.font.as_deref() {
            decls.push(format!("font-family:'{}'", f.replace('\'', "")));
        }
        decls.join(";")
    }
}

fn is_hex_color(v: &str) -> bool {
    v.len() == 6 && v.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_w_rpr_property(style: &mut RunStyle, name: &str, attrs: &[(String, String)]) {
    match name {
        "w:b" => style.b = Some(parse_w_bool(attrs)),
        "w:i" => style.i = Some(parse_w_bool(attrs)),
        "w:strike" => style.strike = Some(parse_w_bool(attrs)),
        "w:u" => style.u = find_attr(attrs, "w:val").map(|v| v.to_string()),
        "w:color" => style.color = find_attr(attrs, "w:val").map(|v| v.to_string()),
        "w:highlight" => style.highlight = find_attr(attrs, "w:val").map(|v| v.to_string()),
        "w:sz" => style.sz = find_attr(attrs, "w:val").map(|v| v.to_string()),
        "w:rFonts" => {
            style.font = find_attr(attrs, "w:ascii")
                .or_else(|| find_attr(attrs, "w:hAnsi"))
                .map(|v| v.to_string());
        }
        _ => {}
    }
}

fn parse_w_bool(attrs: &[(String, String)]) -> bool {
    if let Some(v) = find_attr(attrs, "w:val") {
        let s = v.trim().to_ascii_lowercase();
        return !(s == "0" || s == "false" || s == "off" || s == "none");
    }
    true
}
