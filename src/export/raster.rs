use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use eframe::egui;
use resvg::tiny_skia::{self, Pixmap};
use resvg::usvg::{self, fontdb};

use super::ExportError;
use crate::tree::scene_graph::MAX_SURFACE_EDGE;

/// System fonts are scanned once and shared by every decode.
fn font_database() -> Arc<fontdb::Database> {
    static FONTS: OnceLock<Arc<fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut database = fontdb::Database::new();
            database.load_system_fonts();
            log::debug!("loaded {} font faces for rasterization", database.len());
            Arc::new(database)
        })
        .clone()
}

/// A vector document parsed and ready to rasterize.
pub struct DecodedVector {
    tree: usvg::Tree,
}

impl DecodedVector {
    pub fn size(&self) -> (f32, f32) {
        let size = self.tree.size();
        (size.width(), size.height())
    }
}

pub fn decode(markup: &str) -> Result<DecodedVector, ExportError> {
    let options = usvg::Options {
        fontdb: font_database(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(markup, &options)
        .map_err(|err| ExportError::Decode(err.to_string()))?;
    Ok(DecodedVector { tree })
}

/// Straight-alpha RGBA pixels of `vector` drawn `scale` times its size over
/// a white background.
pub fn rasterize_rgba(
    vector: &DecodedVector,
    scale: f32,
) -> Result<(u32, u32, Vec<u8>), ExportError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ExportError::Surface(format!("invalid raster scale {scale}")));
    }
    let (width, height) = vector.size();
    let width_px = (width * scale).round().max(1.0);
    let height_px = (height * scale).round().max(1.0);
    if width_px > MAX_SURFACE_EDGE || height_px > MAX_SURFACE_EDGE {
        return Err(ExportError::Surface(format!(
            "{width_px}x{height_px} exceeds the {MAX_SURFACE_EDGE} pixel limit"
        )));
    }

    let (width_px, height_px) = (width_px as u32, height_px as u32);
    let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
        ExportError::Surface(format!("failed to allocate a {width_px}x{height_px} pixmap"))
    })?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(
        &vector.tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    Ok((width_px, height_px, premultiplied_rgba_to_unmultiplied(pixmap.data())))
}

/// PNG bytes of `vector` at `scale`.
pub fn encode(vector: &DecodedVector, scale: f32) -> Result<Vec<u8>, ExportError> {
    let (width, height, rgba) = rasterize_rgba(vector, scale)?;
    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| ExportError::Encode("pixel buffer does not match image size".to_string()))?;

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|err| ExportError::Encode(err.to_string()))?;
    Ok(bytes)
}

/// Texture-ready image of `vector`, for drawing external documents on screen.
pub fn color_image(vector: &DecodedVector, scale: f32) -> Result<egui::ColorImage, ExportError> {
    let (width, height, rgba) = rasterize_rgba(vector, scale)?;
    Ok(egui::ColorImage::from_rgba_unmultiplied(
        [width as usize, height as usize],
        &rgba,
    ))
}

fn premultiplied_rgba_to_unmultiplied(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for rgba in data.chunks_exact(4) {
        let a = rgba[3] as u32;
        if a == 0 {
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        for &channel in &rgba[..3] {
            out.push(((channel as u32 * 255 + a / 2) / a).min(255) as u8);
        }
        out.push(a as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED_BOX: &str = concat!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="5">"#,
        r##"<rect x="0" y="0" width="5" height="5" fill="#ff0000"/></svg>"##,
    );

    #[test]
    fn decodes_document_size() {
        let vector = decode(RED_BOX).unwrap();
        assert_eq!(vector.size(), (10.0, 5.0));
    }

    #[test]
    fn malformed_markup_is_a_decode_error() {
        assert!(matches!(decode("<svg"), Err(ExportError::Decode(_))));
    }

    #[test]
    fn raster_scale_multiplies_dimensions() {
        let vector = decode(RED_BOX).unwrap();
        let (width, height, rgba) = rasterize_rgba(&vector, 2.0).unwrap();
        assert_eq!((width, height), (20, 10));
        assert_eq!(rgba.len(), 20 * 10 * 4);
        // Left half is the red box, right half the white background.
        assert_eq!(&rgba[..4], &[255, 0, 0, 255]);
        let last = rgba.len() - 4;
        assert_eq!(&rgba[last..], &[255, 255, 255, 255]);
    }

    #[test]
    fn encode_writes_png() {
        let bytes = encode(&decode(RED_BOX).unwrap(), 1.0).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 5));
    }

    #[test]
    fn oversized_scale_is_a_surface_error() {
        let vector = decode(RED_BOX).unwrap();
        assert!(matches!(encode(&vector, 1.0e6), Err(ExportError::Surface(_))));
        assert!(matches!(encode(&vector, 0.0), Err(ExportError::Surface(_))));
    }

    #[test]
    fn unmultiply_restores_straight_alpha() {
        assert_eq!(
            premultiplied_rgba_to_unmultiplied(&[64, 0, 32, 128, 9, 9, 9, 0]),
            vec![128, 0, 64, 128, 0, 0, 0, 0]
        );
    }
}
