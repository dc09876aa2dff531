use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::model::{Feed, FeedItem};

/// Nesting guard against pathologically deep documents.
const MAX_XML_DEPTH: usize = 256;

/// Reasons a document could not be read. Never surfaced past
/// [`parse_feed`], which degrades every one of them to an empty feed.
#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("document has no root element")]
    NoRoot,
    #[error("document ended with {0} unclosed element(s)")]
    Unclosed(usize),
    #[error("unexpected closing tag")]
    UnbalancedEnd,
    #[error("content after the root element")]
    TrailingElement,
    #[error("text outside the root element")]
    StrayText,
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
    #[error("Atom parse error: {0}")]
    Atom(#[from] feed_rs::parser::ParseFeedError),
}

/// Parse a raw feed document into a [`Feed`].
///
/// Never fails: an empty body, malformed XML or an unreadable Atom document
/// all produce `Feed::empty(url)`.
///
/// For RSS-style documents the feed title is the first `title` element
/// anywhere under the root, and every `item` element becomes a
/// [`FeedItem`] built from its first `title`, `link` and `description`
/// descendants (missing ones stay empty). Atom documents (root `feed`, with
/// `entry` instead of `item`) are read with `feed-rs`.
///
/// # Security
///
/// quick-xml (0.37) does not parse `<!ENTITY>` declarations, so external
/// entities are never expanded; unknown entity references make the
/// document malformed.
pub fn parse_feed(url: &str, body: &str) -> Feed {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        return Feed::empty(url);
    }

    let parsed = scan_document(body).and_then(|doc| {
        if doc.items.is_empty() && doc.root == "feed" {
            parse_atom(url, body)
        } else {
            Ok(Feed {
                url: url.to_string(),
                title: doc.title.unwrap_or_default(),
                items: doc.items,
            })
        }
    });

    match parsed {
        Ok(feed) => feed,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Unreadable feed document, treating as empty");
            Feed::empty(url)
        }
    }
}

// ============================================================================
// RSS-style scan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"description" => Some(Field::Description),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    FeedTitle,
    Item(Field),
}

/// An element whose text is being collected, closed when `depth` ends.
#[derive(Debug, Clone, Copy)]
struct Capture {
    slot: Slot,
    depth: usize,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    depth: usize,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
}

impl ItemBuilder {
    fn field_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Description => &mut self.description,
        }
    }

    fn build(self) -> FeedItem {
        FeedItem {
            title: finish(self.title),
            link: finish(self.link),
            description: finish(self.description),
        }
    }
}

fn finish(text: Option<String>) -> String {
    text.map(|t| t.trim().to_string()).unwrap_or_default()
}

#[derive(Debug, Default)]
struct Scanner {
    root: Option<String>,
    title: Option<String>,
    items: Vec<FeedItem>,
    current: Option<ItemBuilder>,
    captures: Vec<Capture>,
}

struct ScannedDocument {
    /// Local name of the root element.
    root: String,
    title: Option<String>,
    items: Vec<FeedItem>,
}

impl Scanner {
    fn open(&mut self, name: &[u8], local_name: &[u8], depth: usize) {
        if self.root.is_none() {
            self.root = Some(String::from_utf8_lossy(local_name).into_owned());
        }

        if name == b"title" && self.title.is_none() {
            self.title = Some(String::new());
            self.captures.push(Capture {
                slot: Slot::FeedTitle,
                depth,
            });
        }

        if name == b"item" {
            if self.current.is_none() {
                self.current = Some(ItemBuilder {
                    depth,
                    ..ItemBuilder::default()
                });
            }
            return;
        }

        if let (Some(item), Some(field)) = (self.current.as_mut(), Field::from_tag(name)) {
            let slot = item.field_mut(field);
            if slot.is_none() {
                *slot = Some(String::new());
                self.captures.push(Capture {
                    slot: Slot::Item(field),
                    depth,
                });
            }
        }
    }

    fn close(&mut self, depth: usize) {
        self.captures.retain(|c| c.depth != depth);
        if self.current.as_ref().is_some_and(|item| item.depth == depth) {
            if let Some(item) = self.current.take() {
                self.items.push(item.build());
            }
        }
    }

    fn text(&mut self, text: &str) {
        for capture in &self.captures {
            let target = match capture.slot {
                Slot::FeedTitle => self.title.as_mut(),
                Slot::Item(field) => self
                    .current
                    .as_mut()
                    .and_then(|item| item.field_mut(field).as_mut()),
            };
            if let Some(target) = target {
                target.push_str(text);
            }
        }
    }
}

fn scan_document(body: &str) -> Result<ScannedDocument, ParseError> {
    let mut reader = Reader::from_str(body);
    let mut scanner = Scanner::default();
    let mut depth: usize = 0;
    let mut root_closed = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if root_closed {
                    return Err(ParseError::TrailingElement);
                }
                depth += 1;
                if depth > MAX_XML_DEPTH {
                    return Err(ParseError::TooDeep(MAX_XML_DEPTH));
                }
                let name = e.name();
                let local = e.local_name();
                scanner.open(name.as_ref(), local.as_ref(), depth);
            }
            Event::Empty(e) => {
                if root_closed {
                    return Err(ParseError::TrailingElement);
                }
                let name = e.name();
                let local = e.local_name();
                scanner.open(name.as_ref(), local.as_ref(), depth + 1);
                scanner.close(depth + 1);
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::End(_) => {
                scanner.close(depth);
                depth = depth.checked_sub(1).ok_or(ParseError::UnbalancedEnd)?;
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(ParseError::StrayText);
                    }
                } else if !scanner.captures.is_empty() {
                    scanner.text(&text);
                }
            }
            Event::CData(c) => {
                if depth == 0 {
                    return Err(ParseError::StrayText);
                }
                if !scanner.captures.is_empty() {
                    scanner.text(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseError::Unclosed(depth));
    }
    let root = scanner.root.ok_or(ParseError::NoRoot)?;

    Ok(ScannedDocument {
        root,
        title: scanner.title.map(|t| t.trim().to_string()),
        items: scanner.items,
    })
}

// ============================================================================
// Atom
// ============================================================================

fn parse_atom(url: &str, body: &str) -> Result<Feed, ParseError> {
    let feed = feed_rs::parser::parse(body.as_bytes())?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default(),
        })
        .collect();

    Ok(Feed {
        url: url.to_string(),
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        items,
    })
}
