use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// Read an OPML subscription list from disk. See [`parse_opml`].
pub async fn read_opml(path: &std::path::Path) -> Result<Vec<String>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extract feed URLs from an OPML document.
///
/// Every `<outline>` carrying an `xmlUrl` attribute contributes its URL, at
/// any nesting depth and in document order. Folder outlines without
/// `xmlUrl` are traversed but not returned. URLs that are not http(s) are
/// skipped with a warning, and repeated URLs are kept once.
///
/// quick-xml never expands `<!ENTITY>` declarations; a custom entity
/// reference in an attribute is a parse error rather than an expansion.
pub fn parse_opml(content: &str) -> Result<Vec<String>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut urls: Vec<String> = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                push_outline_url(&e, &reader, &mut urls)?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                push_outline_url(&e, &reader, &mut urls)?;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(urls)
}

fn push_outline_url(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    urls: &mut Vec<String>,
) -> Result<(), OpmlError> {
    let mut xml_url = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        if attr.key.as_ref() == b"xmlUrl" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
            xml_url = Some(value.trim().to_string());
        }
    }

    let Some(url) = xml_url else {
        return Ok(());
    };
    match validate_feed_url(&url) {
        Ok(_) if urls.contains(&url) => {
            tracing::debug!(url = %url, "Duplicate feed URL in OPML");
        }
        Ok(_) => urls.push(url),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        }
    }
    Ok(())
}
