//! XML annotation payloads.
//!
//! An XML annotation's value is carried as its serialized `<Value>` element.
//! Content that is a single well-formed element is embedded as markup, any
//! other text is embedded escaped; [`value_content`] reverses either form.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::TransferError;

const VALUE_ELEMENT: &[u8] = b"Value";
const TRANSFER_METADATA: &[u8] = b"CLITransferMetadata";
const SERVER_PATH: &[u8] = b"CLITransferServerPath";

/// Wrap raw annotation content into a `<Value>` element.
pub fn value_element(content: &str) -> String {
    if is_well_formed_element(content) {
        format!("<Value>{content}</Value>")
    } else {
        format!("<Value>{}</Value>", escape(content))
    }
}

/// Inner content of the `<Value>` element in `raw`.
///
/// Text directly under `<Value>` is unescaped; nested markup is re-emitted as
/// read, so arbitrary fragments come back byte-for-byte.
pub fn value_content(raw: &str) -> Result<String, TransferError> {
    let mut reader = Reader::from_str(raw);
    reader.trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut inside = false;
    let mut depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        if !inside {
            match event {
                Event::Start(ref e) if e.local_name().as_ref() == VALUE_ELEMENT => {
                    inside = true;
                }
                Event::Empty(ref e) if e.local_name().as_ref() == VALUE_ELEMENT => {
                    return Ok(String::new());
                }
                Event::Eof => {
                    return Err(TransferError::Xml("missing <Value> element".to_string()));
                }
                _ => {}
            }
            continue;
        }
        match event {
            Event::Start(e) => {
                depth += 1;
                writer.write_event(Event::Start(e)).map_err(xml_err)?;
            }
            Event::End(e) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                writer.write_event(Event::End(e)).map_err(xml_err)?;
            }
            Event::Text(e) if depth == 0 => {
                let text = e.unescape().map_err(xml_err)?;
                writer.get_mut().extend_from_slice(text.as_bytes());
            }
            Event::CData(e) if depth == 0 => {
                writer.get_mut().extend_from_slice(&e);
            }
            Event::Eof => {
                return Err(TransferError::Xml("unterminated <Value> element".to_string()));
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

/// True when `content` parses as exactly one root element, optionally
/// surrounded by whitespace.
pub fn is_well_formed_element(content: &str) -> bool {
    let mut reader = Reader::from_str(content);
    reader.trim_text(false);
    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        match reader.read_event() {
            Err(_) => return false,
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::Text(text)) if depth == 0 => {
                if !text.iter().all(|byte| byte.is_ascii_whitespace()) {
                    return false;
                }
            }
            Ok(Event::CData(_)) if depth == 0 => return false,
            Ok(Event::Eof) => break,
            Ok(_) => {}
        }
    }
    roots == 1 && depth == 0
}

/// Child facts of the `CLITransferMetadata` element, in document order.
pub fn transfer_metadata(raw: &str) -> Result<Option<Vec<(String, String)>>, TransferError> {
    child_facts(raw, TRANSFER_METADATA)
}

/// The `Path` fact of a `CLITransferServerPath` element, if present.
pub fn server_path(raw: &str) -> Result<Option<String>, TransferError> {
    let facts = child_facts(raw, SERVER_PATH)?;
    Ok(facts.and_then(|facts| {
        facts
            .into_iter()
            .find(|(name, _)| name == "Path")
            .map(|(_, value)| value)
    }))
}

/// Collects `(local name, text)` for each direct child of the first element
/// named `container`.
fn child_facts(
    raw: &str,
    container: &[u8],
) -> Result<Option<Vec<(String, String)>>, TransferError> {
    let mut reader = Reader::from_str(raw);
    reader.trim_text(true);
    let mut collecting = false;
    let mut facts = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<(String, String)> = None;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        if !collecting {
            match event {
                Event::Start(e) if e.local_name().as_ref() == container => collecting = true,
                Event::Empty(e) if e.local_name().as_ref() == container => {
                    return Ok(Some(facts));
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
            continue;
        }
        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 1 {
                    current = Some((local_name(e.local_name().as_ref()), String::new()));
                }
            }
            Event::Empty(e) if depth == 0 => {
                facts.push((local_name(e.local_name().as_ref()), String::new()));
            }
            Event::Text(e) if depth == 1 => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&e.unescape().map_err(xml_err)?);
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return Ok(Some(facts));
                }
                if depth == 1 {
                    if let Some(fact) = current.take() {
                        facts.push(fact);
                    }
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(TransferError::Xml("unterminated transfer fact".to_string()));
            }
            _ => {}
        }
    }
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn xml_err<E: std::fmt::Display>(err: E) -> TransferError {
    TransferError::Xml(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"<Value><CLITransferMetadata xmlns="https://github.com/TheJacksonLaboratory/omero-cli-transfer"><md5>abc</md5><origin_image_id>12</origin_image_id><software>omero-cli-transfer</software><version>1.0</version></CLITransferMetadata></Value>"#;
    const PATH: &str = r#"<Value><CLITransferServerPath xmlns="https://github.com/TheJacksonLaboratory/omero-cli-transfer"><Path>pixel_images/plate1.zarr</Path></CLITransferServerPath></Value>"#;

    #[test]
    fn reads_transfer_metadata_in_order() {
        let facts = transfer_metadata(METADATA).unwrap().unwrap();
        let names: Vec<_> = facts.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["md5", "origin_image_id", "software", "version"]);
        assert_eq!(facts[1].1, "12");
        assert_eq!(transfer_metadata(PATH).unwrap(), None);
    }

    #[test]
    fn reads_server_path() {
        assert_eq!(
            server_path(PATH).unwrap().as_deref(),
            Some("pixel_images/plate1.zarr")
        );
        assert_eq!(server_path(METADATA).unwrap(), None);
    }

    #[test]
    fn detects_single_root_elements() {
        assert!(is_well_formed_element("<a><b/></a>"));
        assert!(!is_well_formed_element("<a/><b/>"));
        assert!(!is_well_formed_element("text <a/>"));
        assert!(!is_well_formed_element("<a></b>"));
    }

    #[test]
    fn empty_value_has_empty_content() {
        assert_eq!(value_content("<Value/>").unwrap(), "");
        assert_eq!(value_content("<Value></Value>").unwrap(), "");
    }
}
