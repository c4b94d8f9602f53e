//! Externally rendered vector documents.
//!
//! The markup is never rebuilt from a DOM. `roxmltree` locates the root and
//! the paintable elements, and fitting or recolouring splices new attribute
//! values into the original text at the byte ranges it reports. Every other
//! byte is kept verbatim.
//!
//! When a document carries a `<style>` sheet, recoloured paint is also written
//! as an inline `style` declaration, since stylesheet rules outrank
//! presentation attributes. Shapes other than lines and text that are painted
//! only by a stylesheet rule are not detected and keep their colour.

use std::ops::Range;

use log::warn;
use roxmltree::{Document, Node, ParsingOptions};
use thiserror::Error;

use super::painter::{color_to_hex, ColorScheme};

/// Elements whose `stroke` is recoloured.
const STROKED_ELEMENTS: &[&str] = &[
    "path", "line", "polyline", "polygon", "rect", "circle", "ellipse", "g",
];
/// Elements that are always drawn with a stroke, even without the attribute.
const LINE_ELEMENTS: &[&str] = &["line", "polyline"];
/// Elements whose `fill` is recoloured.
const TEXT_ELEMENTS: &[&str] = &["text", "tspan"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("vector document has no <svg> root element")]
    MissingRoot,
    #[error("malformed vector document: {0}")]
    Malformed(#[from] roxmltree::Error),
}

/// Vector-graphics markup supplied from outside, kept verbatim.
#[derive(Debug, Clone)]
pub struct ExternalDocument {
    markup: String,
    intrinsic_size: Option<(f32, f32)>,
    has_view_box: bool,
}

impl ExternalDocument {
    pub fn new(markup: impl Into<String>) -> Result<Self, DocumentError> {
        let mut markup = markup.into();
        // Nothing may precede an XML declaration, not even whitespace.
        let leading = markup.len() - markup.trim_start().len();
        if leading > 0 && markup[leading..].starts_with("<?xml") {
            markup.drain(..leading);
        }

        let (view_box_size, attribute_size) = {
            let document = parse_document(&markup)?;
            let root = document.root_element();
            if !root.has_tag_name("svg") {
                return Err(DocumentError::MissingRoot);
            }
            let view_box_size = root.attribute("viewBox").and_then(parse_view_box_size);
            let attribute_size = root
                .attribute("width")
                .and_then(parse_length)
                .zip(root.attribute("height").and_then(parse_length));
            (view_box_size, attribute_size)
        };

        Ok(Self {
            intrinsic_size: view_box_size.or(attribute_size),
            has_view_box: view_box_size.is_some(),
            markup,
        })
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn intrinsic_size(&self) -> Option<(f32, f32)> {
        self.intrinsic_size
    }

    /// Markup resized to `width` x `height` with the scheme's colour overrides
    /// applied. The default scheme only resizes.
    pub fn fitted(&self, width: f32, height: f32, scheme: ColorScheme) -> String {
        let document = match parse_document(&self.markup) {
            Ok(document) => document,
            Err(err) => {
                warn!("vector document no longer parses ({err}); drawing it unfitted");
                return self.markup.clone();
            }
        };
        let root = document.root_element();
        let mut splice = Splice::new(&self.markup);
        self.fit_root(&mut splice, root, width, height);

        let inline = document.descendants().any(|node| node.has_tag_name("style"));
        let mut ordinal = 0usize;
        for node in root.descendants().skip(1).filter(Node::is_element) {
            let Some(color) = colorable(node).and(scheme.element_color(ordinal)) else {
                continue;
            };
            if recolor(&mut splice, node, &color_to_hex(color), inline) {
                ordinal += 1;
            }
        }

        splice.finish()
    }

    fn fit_root(&self, splice: &mut Splice<'_>, root: Node<'_, '_>, width: f32, height: f32) {
        if !self.has_view_box {
            if let Some((w, h)) = self.intrinsic_size {
                splice.set_attribute(root, "viewBox", format!("0 0 {w} {h}"));
            }
        }
        splice.set_attribute(root, "width", format!("{width}"));
        splice.set_attribute(root, "height", format!("{height}"));
        splice.set_attribute(root, "preserveAspectRatio", "xMidYMid meet".to_string());
    }
}

fn parse_document(markup: &str) -> Result<Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(markup, options)
}

/// Replacements against the original text, applied in one pass.
struct Splice<'a> {
    source: &'a str,
    edits: Vec<(Range<usize>, String)>,
}

impl<'a> Splice<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            edits: Vec::new(),
        }
    }

    fn replace(&mut self, range: Range<usize>, text: String) {
        self.edits.push((range, text));
    }

    /// Overwrite the value of `name`, or append the attribute to the start tag.
    fn set_attribute(&mut self, node: Node<'_, '_>, name: &str, value: String) {
        match node.attribute_node(name) {
            Some(attribute) => self.replace(attribute.range_value(), value),
            None => {
                let at = self.attribute_end(node);
                self.replace(at..at, format!(" {name}=\"{value}\""));
            }
        }
    }

    /// Drop the attribute `name` along with the whitespace before it.
    fn remove_attribute(&mut self, node: Node<'_, '_>, name: &str) {
        let Some(attribute) = node.attribute_node(name) else {
            return;
        };
        let range = attribute.range();
        let before = &self.source[..range.start];
        let start = before.trim_end().len();
        self.replace(start..range.end, String::new());
    }

    /// Raw, still-escaped value of attribute `name`.
    fn raw_value(&self, node: Node<'_, '_>, name: &str) -> Option<&'a str> {
        let source = self.source;
        node.attribute_node(name)
            .map(|attribute| &source[attribute.range_value()])
    }

    /// Offset just past the last attribute of `node`'s start tag, or past its
    /// name when it has none.
    fn attribute_end(&self, node: Node<'_, '_>) -> usize {
        if let Some(end) = node.attributes().map(|attribute| attribute.range().end).max() {
            return end;
        }
        let name_start = node.range().start + 1;
        let name_len = self.source[name_start..]
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(0);
        name_start + name_len
    }

    fn finish(mut self) -> String {
        self.edits.sort_by_key(|(range, _)| range.start);
        let mut out = String::with_capacity(self.source.len() + 128);
        let mut cursor = 0;
        for (range, text) in self.edits {
            if range.start < cursor {
                continue;
            }
            out.push_str(&self.source[cursor..range.start]);
            out.push_str(&text);
            cursor = range.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

enum Paint {
    Stroke,
    Fill,
}

fn colorable(node: Node<'_, '_>) -> Option<Paint> {
    let name = node.tag_name().name();
    if TEXT_ELEMENTS.contains(&name) {
        Some(Paint::Fill)
    } else if STROKED_ELEMENTS.contains(&name) {
        Some(Paint::Stroke)
    } else {
        None
    }
}

/// Rewrite the relevant paint of `node`. Returns false when the element does
/// not paint that channel, so it keeps its original text.
fn recolor(splice: &mut Splice<'_>, node: Node<'_, '_>, hex: &str, inline: bool) -> bool {
    let (property, always) = match colorable(node) {
        Some(Paint::Fill) => ("fill", true),
        Some(Paint::Stroke) => ("stroke", LINE_ELEMENTS.contains(&node.tag_name().name())),
        None => return false,
    };

    let attribute = splice.raw_value(node, property).map(str::trim);
    let style = splice.raw_value(node, "style");
    let styled = style.and_then(|style| style_property(style, property));

    match styled.or(attribute) {
        Some("none") => return false,
        None if !always => return false,
        _ => {}
    }

    if inline {
        let declarations = match style {
            Some(style) => set_style_property(style, property, hex),
            None => format!("{property}: {hex}"),
        };
        splice.set_attribute(node, "style", declarations);
        if attribute.is_some() {
            splice.set_attribute(node, property, hex.to_string());
        }
        return true;
    }

    if let (Some(style), Some(_)) = (style, styled) {
        let remaining = strip_style_property(style, property);
        if remaining.is_empty() {
            splice.remove_attribute(node, "style");
        } else {
            splice.set_attribute(node, "style", remaining);
        }
    }
    splice.set_attribute(node, property, hex.to_string());
    true
}

fn style_property<'a>(style: &'a str, property: &str) -> Option<&'a str> {
    style.split(';').find_map(|declaration| {
        let (name, value) = declaration.split_once(':')?;
        (name.trim() == property).then(|| value.trim())
    })
}

fn strip_style_property(style: &str, property: &str) -> String {
    style
        .split(';')
        .map(str::trim)
        .filter(|declaration| !declaration.is_empty())
        .filter(|declaration| {
            declaration
                .split_once(':')
                .map(|(name, _)| name.trim() != property)
                .unwrap_or(true)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn set_style_property(style: &str, property: &str, value: &str) -> String {
    let remaining = strip_style_property(style, property);
    if remaining.is_empty() {
        format!("{property}: {value}")
    } else {
        format!("{remaining}; {property}: {value}")
    }
}

fn parse_length(raw: &str) -> Option<f32> {
    let trimmed = raw.trim().trim_end_matches("px");
    trimmed.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_view_box_size(raw: &str) -> Option<(f32, f32)> {
    let values: Vec<f32> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(str::parse::<f32>)
        .collect::<Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [_, _, w, h] if *w > 0.0 && *h > 0.0 => Some((*w, *h)),
        _ => None,
    }
}
