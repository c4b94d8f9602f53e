use eframe::egui::{self, Color32};
use svg::node::element::{Group, Line, Path as SvgPath, Rectangle, Text};
use svg::Document;

use crate::tree::painter::color_to_hex;
use crate::tree::scene_graph::{ScenePrimitive, StrokeStyle, TreeSceneGraph, ViewTransform};

/// Serialize a scene to SVG markup.
///
/// Scenes that display an external document already carry fitted markup;
/// that markup is the export, written out as-is.
pub fn scene_to_svg(scene: &TreeSceneGraph) -> String {
    if scene.transform.is_identity() {
        if let Some(markup) = scene.embedded_markup() {
            return markup.to_string();
        }
    }

    let width = scene.size.x;
    let height = scene.size.y;
    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width.ceil() as i32, height.ceil() as i32));

    let mut tree_group = Group::new().set("id", "tree");
    if !scene.transform.is_identity() {
        tree_group = tree_group.set("transform", transform_attribute(&scene.transform));
    }

    for primitive in &scene.primitives {
        tree_group = match primitive {
            ScenePrimitive::FillRect { rect, color } => {
                let mut rectangle = Rectangle::new()
                    .set("x", rect.min.x)
                    .set("y", rect.min.y)
                    .set("width", rect.width())
                    .set("height", rect.height())
                    .set("fill", color_to_hex(*color));
                if let Some(opacity) = opacity(*color) {
                    rectangle = rectangle.set("fill-opacity", opacity);
                }
                tree_group.add(rectangle)
            }
            ScenePrimitive::StrokeLine { from, to, style } => {
                let line = Line::new()
                    .set("x1", from.x)
                    .set("y1", from.y)
                    .set("x2", to.x)
                    .set("y2", to.y);
                tree_group.add(apply_stroke(line, style))
            }
            ScenePrimitive::StrokePolyline { points, style } => {
                if points.len() < 2 {
                    continue;
                }
                let mut path_data = String::new();
                for (i, point) in points.iter().enumerate() {
                    let command = if i == 0 { 'M' } else { 'L' };
                    path_data.push_str(&format!("{command} {} {} ", point.x, point.y));
                }
                let path = SvgPath::new()
                    .set("d", path_data.trim_end())
                    .set("fill", "none")
                    .set("stroke-linejoin", "round");
                tree_group.add(apply_stroke(path, style))
            }
            ScenePrimitive::Text {
                text,
                anchor,
                align,
                size,
                color,
            } => {
                let (text_anchor, baseline) = text_alignment(*align);
                let content = svg::node::Text::new(text.clone());
                let label = Text::new("")
                    .set("x", anchor.x)
                    .set("y", anchor.y)
                    .set("font-family", "sans-serif")
                    .set("font-size", *size)
                    .set("fill", color_to_hex(*color))
                    .set("text-anchor", text_anchor)
                    .set("dominant-baseline", baseline)
                    .add(content);
                tree_group.add(label)
            }
            ScenePrimitive::Embedded { markup, rect } => {
                // Panned external documents are nested as an <image> data URI
                // so the original markup stays opaque.
                let image = svg::node::element::Image::new()
                    .set("x", rect.min.x)
                    .set("y", rect.min.y)
                    .set("width", rect.width())
                    .set("height", rect.height())
                    .set("href", data_uri(markup));
                tree_group.add(image)
            }
        };
    }

    document = document.add(tree_group);
    document.to_string()
}

fn apply_stroke<T>(element: T, style: &StrokeStyle) -> T
where
    T: svg::Node,
{
    let mut element = element;
    element.assign("stroke", color_to_hex(style.color));
    element.assign("stroke-width", style.width);
    if let Some(opacity) = opacity(style.color) {
        element.assign("stroke-opacity", opacity);
    }
    element
}

fn transform_attribute(transform: &ViewTransform) -> String {
    format!(
        "translate({} {}) scale({})",
        transform.offset.x, transform.offset.y, transform.scale
    )
}

fn opacity(color: Color32) -> Option<f32> {
    (color.a() < 255).then(|| color.a() as f32 / 255.0)
}

fn text_alignment(align: egui::Align2) -> (&'static str, &'static str) {
    let anchor = match align.x() {
        egui::Align::Min => "start",
        egui::Align::Center => "middle",
        egui::Align::Max => "end",
    };
    let baseline = match align.y() {
        egui::Align::Min => "hanging",
        egui::Align::Center => "middle",
        egui::Align::Max => "text-after-edge",
    };
    (anchor, baseline)
}

fn data_uri(markup: &str) -> String {
    let mut encoded = String::with_capacity(markup.len() + 32);
    encoded.push_str("data:image/svg+xml;charset=utf-8,");
    for byte in markup.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'
            | b'=' | b':' | b',' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
