use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

pub const TEXT_TAG: &str = "w:t";
const XML_SPACE: &str = "xml:space";

#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

/// One XML part as a flat, lossless event list.
#[derive(Clone)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
    /// Fingerprint of everything except run text, taken at load time.
    pub baseline_fingerprint: String,
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> Result<XmlPart> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = true;

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed_at(name, reader.buffer_position(), e))?;
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = bytes_to_string(d.version()?);
                let encoding = d
                    .encoding()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                events.push(XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                });
            }
            Event::Start(s) => {
                let tag = bytes_to_string(s.name().as_ref());
                open.push(tag.clone());
                events.push(XmlEvent::Start {
                    name: tag,
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::End(e) => {
                let _ = open.pop();
                events.push(XmlEvent::End {
                    name: bytes_to_string(e.name().as_ref()),
                });
            }
            Event::Empty(s) => {
                events.push(XmlEvent::Empty {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::Text(t) => {
                let txt = t
                    .unescape()
                    .map_err(|e| malformed_at(name, reader.buffer_position(), e))?
                    .into_owned();
                events.push(XmlEvent::Text { text: txt });
            }
            Event::CData(t) => {
                events.push(XmlEvent::CData {
                    text: bytes_to_string(t.into_inner()),
                });
            }
            Event::Comment(t) => {
                events.push(XmlEvent::Comment {
                    text: bytes_to_string(t.into_inner()),
                });
            }
            Event::PI(t) => {
                let target = bytes_to_string(t.target());
                let content = bytes_to_string(t.content());
                events.push(XmlEvent::PI {
                    content: format!("{target}{content}"),
                });
            }
            Event::DocType(t) => {
                events.push(XmlEvent::DocType {
                    text: bytes_to_string(t.into_inner()),
                });
            }
        }
    }

    if let Some(unclosed) = open.last() {
        return Err(EngineError::malformed(format!(
            "{name}: unclosed element <{unclosed}> at end of part"
        )));
    }

    let baseline_fingerprint = structure_fingerprint(&events);
    Ok(XmlPart {
        name: name.to_string(),
        events,
        baseline_fingerprint,
    })
}

fn malformed_at(part: &str, pos: impl std::fmt::Display, e: impl std::fmt::Display) -> EngineError {
    EngineError::malformed(format!("{part} at byte {pos}: {e}"))
}

fn collect_attrs(s: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a?;
        let key = bytes_to_string(a.key.as_ref());
        // Raw (still escaped) bytes: character references inside attribute values must
        // survive a round trip untouched.
        let val = bytes_to_string(a.value.as_ref());
        attrs.push((key, val));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn set_attr_value(ev: &mut XmlEvent, key: &str, value: &str) {
    if let XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } = ev {
        for (k, v) in attrs.iter_mut() {
            if k == key {
                *v = value.to_string();
                return;
            }
        }
        attrs.push((key.to_string(), value.to_string()));
    }
}

/// The XML 1.0 `Char` production. Anything else cannot appear in a part, escaped or not.
pub fn is_xml_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{9}' | '\u{A}' | '\u{D}'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

pub fn write_xml_part(part: &XmlPart) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();

    fn escape_text_into(out: &mut Vec<u8>, text: &str) {
        for ch in text.chars() {
            match ch {
                '&' => out.extend_from_slice(b"&amp;"),
                '<' => out.extend_from_slice(b"&lt;"),
                '>' => out.extend_from_slice(b"&gt;"),
                _ => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn write_start_like(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
        out.extend_from_slice(b"<");
        out.extend_from_slice(name.as_bytes());
        for (k, v) in attrs {
            out.extend_from_slice(b" ");
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\"");
        }
        if empty {
            out.extend_from_slice(b"/>");
        } else {
            out.extend_from_slice(b">");
        }
    }

    for ev in &part.events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                let d =
                    BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                let mut writer = quick_xml::Writer::new(Vec::new());
                writer.write_event(Event::Decl(d))?;
                out.extend_from_slice(&writer.into_inner());
            }
            XmlEvent::Start { name, attrs } => write_start_like(&mut out, name, attrs, false),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b">");
            }
            XmlEvent::Empty { name, attrs } => write_start_like(&mut out, name, attrs, true),
            XmlEvent::Text { text } => escape_text_into(&mut out, text),
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b">");
            }
        }
    }

    Ok(out)
}

/// Fails when anything other than `w:t` content changed since the part was loaded.
pub fn verify_structure_unchanged(part: &XmlPart) -> Result<()> {
    let cur = structure_fingerprint(&part.events);
    if cur != part.baseline_fingerprint {
        log::warn!(
            "structure fingerprint drift in {} (baseline={} current={})",
            part.name,
            part.baseline_fingerprint,
            cur
        );
        return Err(EngineError::StructureDrift {
            part: part.name.clone(),
        });
    }
    Ok(())
}

/// SHA-256 over the part with every `w:t` element (tag, attributes, text) left out, so adding,
/// filling or rewriting text carriers inside runs does not move it.
pub fn structure_fingerprint(events: &[XmlEvent]) -> String {
    let mut hasher = Sha256::new();
    let mut text_depth = 0usize;

    for ev in events {
        match ev {
            XmlEvent::Start { name, attrs } => {
                if name == TEXT_TAG || text_depth > 0 {
                    text_depth += 1;
                    continue;
                }
                hash_start_like(&mut hasher, name, attrs);
            }
            XmlEvent::Empty { name, attrs } => {
                if name == TEXT_TAG || text_depth > 0 {
                    continue;
                }
                hash_start_like(&mut hasher, name, attrs);
                hash_end_like(&mut hasher, name);
            }
            XmlEvent::End { name } => {
                if text_depth > 0 {
                    text_depth -= 1;
                    continue;
                }
                hash_end_like(&mut hasher, name);
            }
            XmlEvent::Text { text } => {
                if text_depth > 0 {
                    continue;
                }
                hasher.update(b"T:");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                hasher.update(b"D:");
                hasher.update(version.as_bytes());
                hasher.update(b"|");
                if let Some(e) = encoding.as_ref() {
                    hasher.update(e.as_bytes());
                }
                hasher.update(b"|");
                if let Some(s) = standalone.as_ref() {
                    hasher.update(s.as_bytes());
                }
                hasher.update(b"\n");
            }
            XmlEvent::CData { text } => hash_tagged(&mut hasher, b"C:", text),
            XmlEvent::Comment { text } => hash_tagged(&mut hasher, b"M:", text),
            XmlEvent::PI { content } => hash_tagged(&mut hasher, b"P:", content),
            XmlEvent::DocType { text } => hash_tagged(&mut hasher, b"Y:", text),
        }
    }
    hex::encode(hasher.finalize())
}

fn hash_tagged(hasher: &mut Sha256, tag: &[u8], text: &str) {
    hasher.update(tag);
    hasher.update(text.as_bytes());
    hasher.update(b"\n");
}

fn hash_start_like(hasher: &mut Sha256, name: &str, attrs: &[(String, String)]) {
    hasher.update(b"S:");
    hasher.update(name.as_bytes());
    hasher.update(b"|");

    let map: BTreeMap<&str, &str> = attrs
        .iter()
        .filter(|(k, _)| k != XML_SPACE)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (k, v) in map {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"\n");
}

fn hash_end_like(hasher: &mut Sha256, name: &str) {
    hasher.update(b"E:");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
}

#[cfg(test)]
mod tests {
    use super::{parse_xml_part, structure_fingerprint, write_xml_part, XmlEvent};

    #[test]
    fn write_preserves_attr_entity_refs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let part = parse_xml_part("test.xml", xml).expect("parse xml");
        let out = write_xml_part(&part).expect("write xml");
        let s = String::from_utf8(out).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#xD;&#xA;B""#));
        assert!(!s.contains(r#"o:gfxdata="A&amp;#xD;"#));
    }

    #[test]
    fn text_escapes_round_trip() {
        let xml = br#"<w:r><w:t>a &amp; b &lt; c</w:t></w:r>"#;
        let part = parse_xml_part("t.xml", xml).expect("parse xml");
        assert!(part
            .events
            .iter()
            .any(|e| matches!(e, XmlEvent::Text { text } if text == "a & b < c")));
        let out = write_xml_part(&part).expect("write xml");
        assert_eq!(out, b"<w:r><w:t>a &amp; b &lt; c</w:t></w:r>".to_vec());
    }

    #[test]
    fn mismatched_end_tag_is_malformed() {
        let err = parse_xml_part("bad.xml", b"<w:p><w:r></w:p></w:r>")
            .err()
            .expect("error");
        assert!(err.to_string().starts_with("malformed document"));
    }

    #[test]
    fn unclosed_element_is_malformed() {
        assert!(parse_xml_part("bad.xml", b"<w:body><w:p>").is_err());
    }

    #[test]
    fn fingerprint_ignores_text_carriers_only() {
        let a = parse_xml_part("a", br#"<w:r><w:rPr><w:b/></w:rPr><w:t>one</w:t></w:r>"#)
            .expect("parse a");
        let b = parse_xml_part(
            "b",
            br#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve"> two </w:t><w:t>x</w:t></w:r>"#,
        )
        .expect("parse b");
        let c = parse_xml_part("c", br#"<w:r><w:rPr><w:i/></w:rPr><w:t>one</w:t></w:r>"#)
            .expect("parse c");
        assert_eq!(structure_fingerprint(&a.events), structure_fingerprint(&b.events));
        assert_ne!(structure_fingerprint(&a.events), structure_fingerprint(&c.events));
    }
}
