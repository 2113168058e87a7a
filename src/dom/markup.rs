//! Markup fragments - HTML parsing and serialization
//!
//! Parsing goes through the html5gum tokenizer; this module only rebuilds the
//! tree (void elements, implicit closes) on top of its token stream.

use html5gum::{HtmlString, Token, Tokenizer};
use tracing::debug;

use crate::error::{Result, TesseraError};
use crate::util::entities;

/// Elements that never have children or an end tag
const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// A parsed markup node
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Markup>,
    },
    Text(String),
}

impl Markup {
    pub fn element(tag: impl Into<String>) -> Self {
        Markup::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }
}

struct Frame {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Markup>,
}

fn utf8(s: &HtmlString, what: &str) -> Result<String> {
    String::from_utf8(s.to_vec()).map_err(|_| TesseraError::Markup {
        details: format!("{what} is not valid UTF-8"),
    })
}

fn push_node(stack: &mut [Frame], top: &mut Vec<Markup>, node: Markup) {
    match stack.last_mut() {
        Some(frame) => frame.children.push(node),
        None => top.push(node),
    }
}

fn push_text(stack: &mut [Frame], top: &mut Vec<Markup>, text: String) {
    let siblings = match stack.last_mut() {
        Some(frame) => &mut frame.children,
        None => top,
    };
    // The tokenizer may split one run of text into several tokens
    if let Some(Markup::Text(prev)) = siblings.last_mut() {
        prev.push_str(&text);
    } else {
        siblings.push(Markup::Text(text));
    }
}

fn close(frame: Frame) -> Markup {
    Markup::Element {
        tag: frame.tag,
        attrs: frame.attrs,
        children: frame.children,
    }
}

/// Parse an HTML fragment into a forest
///
/// Elements left open at the end are closed implicitly; an end tag that
/// matches no open element is an error.
pub fn parse_fragment(html: &str) -> Result<Vec<Markup>> {
    let mut top = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for token in Tokenizer::new(html).infallible() {
        match token {
            Token::StartTag(tag) => {
                let name = utf8(&tag.name, "tag name")?.to_ascii_lowercase();
                let mut attrs = Vec::with_capacity(tag.attributes.len());
                for (key, value) in &tag.attributes {
                    attrs.push((utf8(key, "attribute name")?, utf8(value, "attribute value")?));
                }
                if tag.self_closing || is_void(&name) {
                    push_node(
                        &mut stack,
                        &mut top,
                        Markup::Element {
                            tag: name,
                            attrs,
                            children: Vec::new(),
                        },
                    );
                } else {
                    stack.push(Frame {
                        tag: name,
                        attrs,
                        children: Vec::new(),
                    });
                }
            }
            Token::EndTag(tag) => {
                let name = utf8(&tag.name, "tag name")?.to_ascii_lowercase();
                if is_void(&name) {
                    continue;
                }
                let Some(open_at) = stack.iter().rposition(|f| f.tag == name) else {
                    return Err(TesseraError::Markup {
                        details: format!("</{name}> closes no open element"),
                    });
                };
                // Implicitly close everything opened after the match
                while stack.len() > open_at {
                    let Some(frame) = stack.pop() else { break };
                    let node = close(frame);
                    push_node(&mut stack, &mut top, node);
                }
            }
            Token::String(text) => {
                push_text(&mut stack, &mut top, utf8(&text, "text")?);
            }
            Token::Comment(_) | Token::Doctype(_) => {}
            Token::Error(err) => {
                debug!(error = %err, "Lenient markup: tokenizer reported an error");
            }
        }
    }

    while let Some(frame) = stack.pop() {
        let node = close(frame);
        push_node(&mut stack, &mut top, node);
    }

    Ok(top)
}

/// Serialize a forest back to HTML
pub fn to_html(nodes: &[Markup]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &Markup) {
    match node {
        Markup::Text(text) => out.push_str(&entities::escape(text, false)),
        Markup::Element {
            tag,
            attrs,
            children,
        } => {
            write_open_tag(out, tag, attrs);
            if is_void(tag) {
                return;
            }
            for child in children {
                write_node(out, child);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

pub(crate) fn write_open_tag(out: &mut String, tag: &str, attrs: &[(String, String)]) {
    out.push('<');
    out.push_str(tag);
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&entities::escape(value, true));
        out.push('"');
    }
    out.push('>');
}
