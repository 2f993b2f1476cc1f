use std::collections::BTreeMap;
use std::ops::Range;

use crate::docx::tree::DocTree;
use crate::docx::xml::{set_attr_value, XmlEvent, XmlPart, TEXT_TAG};
use crate::flatten::Layout;

/// One value to place inside one run. `seq` is the position's rank in mapping order.
#[derive(Clone, Debug)]
pub(crate) struct Insertion {
    pub paragraph_index: usize,
    pub run_index: usize,
    pub char_offset: usize,
    pub seq: usize,
    pub value: String,
}

/// Event range to replace and what replaces it.
struct Splice {
    range: Range<usize>,
    events: Vec<XmlEvent>,
}

/// Writes every insertion into the run text of `part`. Positions must already be validated
/// against `layout`. Returns how many runs changed.
pub(crate) fn apply_insertions(
    part: &mut XmlPart,
    tree: &DocTree,
    layout: &Layout,
    insertions: Vec<Insertion>,
) -> usize {
    let mut by_run: BTreeMap<(usize, usize), Vec<Insertion>> = BTreeMap::new();
    for ins in insertions {
        by_run
            .entry((ins.paragraph_index, ins.run_index))
            .or_default()
            .push(ins);
    }

    let mut splices: Vec<Splice> = Vec::new();
    let mut changed_runs = 0usize;
    for ((p, r), mut group) in by_run {
        if group.iter().all(|i| i.value.is_empty()) {
            continue;
        }
        let Some(slot) = layout.slot(p, r) else {
            log::debug!("no run at p={p} r={r}, {} insertions dropped", group.len());
            continue;
        };
        // Descending offset; equal offsets descending seq so the earliest lands first.
        group.sort_by(|a, b| {
            b.char_offset
                .cmp(&a.char_offset)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        if slot.segments.is_empty() {
            let mut texts = vec![String::new()];
            for ins in &group {
                insert_into_segments(&mut texts, ins.char_offset, &ins.value);
            }
            splices.push(new_carrier_splice(part, tree, slot.node, &texts[0]));
        } else {
            let mut texts: Vec<String> = slot
                .segments
                .iter()
                .map(|&s| tree.direct_text(part, s))
                .collect();
            let mut touched = vec![false; texts.len()];
            for ins in &group {
                let i = insert_into_segments(&mut texts, ins.char_offset, &ins.value);
                touched[i] |= !ins.value.is_empty();
            }
            for (i, &seg) in slot.segments.iter().enumerate() {
                if !touched[i] {
                    continue;
                }
                let node = tree.node(seg);
                splices.push(Splice {
                    range: node.start..node.end + 1,
                    events: text_carrier(carrier_attrs(&part.events[node.start]), &texts[i]),
                });
            }
        }
        changed_runs += 1;
    }

    splices.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    for s in splices {
        part.events.splice(s.range, s.events);
    }
    changed_runs
}

/// Inserts `value` at char `offset` of the concatenated segment texts. An offset on a boundary
/// goes to the earlier segment. Returns the index of the segment that received the value.
fn insert_into_segments(texts: &mut [String], offset: usize, value: &str) -> usize {
    let mut start = 0usize;
    let last = texts.len().saturating_sub(1);
    for (i, text) in texts.iter_mut().enumerate() {
        let len = text.chars().count();
        if offset <= start + len || i == last {
            let at = byte_index(text, offset.saturating_sub(start).min(len));
            text.insert_str(at, value);
            return i;
        }
        start += len;
    }
    last
}

fn byte_index(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

fn carrier_attrs(ev: &XmlEvent) -> Vec<(String, String)> {
    match ev {
        XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => attrs.clone(),
        _ => Vec::new(),
    }
}

fn text_carrier(attrs: Vec<(String, String)>, text: &str) -> Vec<XmlEvent> {
    let mut start = XmlEvent::Start {
        name: TEXT_TAG.to_string(),
        attrs,
    };
    if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        set_attr_value(&mut start, "xml:space", "preserve");
    }
    vec![
        start,
        XmlEvent::Text {
            text: text.to_string(),
        },
        XmlEvent::End {
            name: TEXT_TAG.to_string(),
        },
    ]
}

/// A run without text carriers gets one appended after its existing children.
fn new_carrier_splice(part: &XmlPart, tree: &DocTree, run: usize, text: &str) -> Splice {
    let node = tree.node(run);
    let carrier = text_carrier(Vec::new(), text);
    if node.is_empty_element() {
        let mut events = Vec::with_capacity(carrier.len() + 2);
        events.push(XmlEvent::Start {
            name: node.name.clone(),
            attrs: carrier_attrs(&part.events[node.start]),
        });
        events.extend(carrier);
        events.push(XmlEvent::End {
            name: node.name.clone(),
        });
        Splice {
            range: node.start..node.start + 1,
            events,
        }
    } else {
        Splice {
            range: node.end..node.end,
            events: carrier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_insertions, insert_into_segments, Insertion};
    use crate::docx::xml::{structure_fingerprint, write_xml_part};
    use crate::docx::DocxDocument;
    use crate::flatten::layout;
    use crate::testutil::docx_from_body;

    fn ins(p: usize, r: usize, c: usize, seq: usize, value: &str) -> Insertion {
        Insertion {
            paragraph_index: p,
            run_index: r,
            char_offset: c,
            seq,
            value: value.to_string(),
        }
    }

    fn merged_body(body: &str, insertions: Vec<Insertion>) -> (String, bool) {
        let mut doc = DocxDocument::load(&docx_from_body(body)).expect("load");
        let lay = layout(&doc, None);
        let before = structure_fingerprint(&doc.part.events);
        apply_insertions(&mut doc.part, &doc.tree, &lay, insertions);
        let same = before == structure_fingerprint(&doc.part.events);
        let xml = String::from_utf8(write_xml_part(&doc.part).expect("write")).expect("utf8");
        let body = xml
            .split("<w:body>")
            .nth(1)
            .and_then(|s| s.split("<w:sectPr/>").next())
            .unwrap_or_default()
            .to_string();
        (body, same)
    }

    #[test]
    fn boundary_offset_goes_to_earlier_segment() {
        let mut texts = vec!["ab".to_string(), "cd".to_string()];
        assert_eq!(insert_into_segments(&mut texts, 2, "X"), 0);
        assert_eq!(texts, vec!["abX", "cd"]);
        assert_eq!(insert_into_segments(&mut texts, 4, "Y"), 1);
        assert_eq!(texts, vec!["abX", "cYd"]);
    }

    #[test]
    fn offsets_count_chars_not_bytes() {
        let mut texts = vec!["héllo".to_string()];
        insert_into_segments(&mut texts, 2, "-");
        assert_eq!(texts[0], "hé-llo");
    }

    #[test]
    fn descending_offsets_keep_earlier_coordinates_valid() {
        let (body, same) = merged_body(
            "<w:p><w:r><w:t>0123456789</w:t></w:r></w:p>",
            vec![ins(0, 0, 3, 0, "A"), ins(0, 0, 7, 1, "B")],
        );
        assert_eq!(body, "<w:p><w:r><w:t>012A3456B789</w:t></w:r></w:p>");
        assert!(same);
    }

    #[test]
    fn equal_offsets_follow_mapping_order() {
        let (body, _) = merged_body(
            "<w:p><w:r><w:t>ab</w:t></w:r></w:p>",
            vec![ins(0, 0, 1, 0, "1"), ins(0, 0, 1, 1, "2")],
        );
        assert_eq!(body, "<w:p><w:r><w:t>a12b</w:t></w:r></w:p>");
    }

    #[test]
    fn run_without_text_gets_a_carrier() {
        let (body, same) = merged_body(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr></w:r><w:r/></w:p>"#,
            vec![ins(0, 0, 0, 0, " x"), ins(0, 1, 0, 1, "y")],
        );
        assert_eq!(
            body,
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve"> x</w:t></w:r><w:r><w:t>y</w:t></w:r></w:p>"#
        );
        assert!(same);
    }

    #[test]
    fn empty_carrier_is_filled() {
        let (body, same) = merged_body(
            "<w:p><w:r><w:t/></w:r></w:p>",
            vec![ins(0, 0, 0, 0, "filled ")],
        );
        assert_eq!(
            body,
            r#"<w:p><w:r><w:t xml:space="preserve">filled </w:t></w:r></w:p>"#
        );
        assert!(same);
    }

    #[test]
    fn empty_values_change_nothing() {
        let mut doc =
            DocxDocument::load(&docx_from_body("<w:p><w:r><w:t>x</w:t></w:r></w:p>")).expect("load");
        let lay = layout(&doc, None);
        let before = doc.part.events.clone();
        let changed = apply_insertions(&mut doc.part, &doc.tree, &lay, vec![ins(0, 0, 1, 0, "")]);
        assert_eq!(changed, 0);
        assert_eq!(doc.part.events, before);
    }
}
