use clap::ValueEnum;
use eframe::egui::{ecolor::Hsva, Color32, Vec2};

/// Stroke/fill palette applied to branches and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorScheme {
    #[default]
    Default,
    Colorful,
    Grayscale,
}

const BASE_COLOR: Color32 = Color32::from_rgb(0x22, 0x22, 0x22);
const MUTED_GRAY: Color32 = Color32::from_rgb(0x80, 0x80, 0x80);

/// Hue span used by the colorful scheme, as a fraction of the colour wheel.
/// Stopping short of 1.0 keeps the deepest leaves from wrapping back to red.
const COLORFUL_HUE_SPAN: f32 = 0.8;
/// Hue step between consecutive elements of an external document.
const ORDINAL_HUE_STEP: f32 = 0.137;

impl ColorScheme {
    pub const ALL: [ColorScheme; 3] = [
        ColorScheme::Default,
        ColorScheme::Colorful,
        ColorScheme::Grayscale,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorScheme::Default => "default",
            ColorScheme::Colorful => "colorful",
            ColorScheme::Grayscale => "grayscale",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Branch colour for a node at `depth_fraction` (`x / max_depth`, 0..=1).
    pub fn branch_color(self, depth_fraction: f32) -> Color32 {
        match self {
            ColorScheme::Default => BASE_COLOR,
            ColorScheme::Grayscale => MUTED_GRAY,
            ColorScheme::Colorful => {
                let hue = depth_fraction.clamp(0.0, 1.0) * COLORFUL_HUE_SPAN;
                Hsva::new(hue, 0.75, 0.8, 1.0).into()
            }
        }
    }

    pub fn label_color(self, depth_fraction: f32) -> Color32 {
        match self {
            ColorScheme::Default => Color32::from_rgb(0x11, 0x11, 0x11),
            _ => self.branch_color(depth_fraction),
        }
    }

    /// Override colour for the `ordinal`-th recoloured element of an external
    /// document; `None` leaves the document untouched.
    pub fn element_color(self, ordinal: usize) -> Option<Color32> {
        match self {
            ColorScheme::Default => None,
            ColorScheme::Grayscale => Some(MUTED_GRAY),
            ColorScheme::Colorful => {
                let hue = (ordinal as f32 * ORDINAL_HUE_STEP).fract();
                Some(Hsva::new(hue, 0.75, 0.8, 1.0).into())
            }
        }
    }
}

impl std::fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Geometry and typography used when turning a layout into a scene.
#[derive(Debug, Clone)]
pub struct TreePainter {
    pub left_margin: f32,
    pub right_margin: f32,
    pub top_margin: f32,
    pub bottom_margin: f32,
    /// Pixels between consecutive leaf slots.
    pub row_height: f32,
    /// Pixels spanned by `max_depth`.
    pub depth_width: f32,
    pub branch_width: f32,
    pub label_font_size: f32,
    pub label_gap: f32,
    pub title: Option<String>,
    pub title_font_size: f32,
    /// Scale bar length as a fraction of `max_depth`.
    pub scale_bar_fraction: f64,
    pub scale_unit: String,
    pub background_color: Color32,
    /// Area an external document is fitted into; falls back to the
    /// document's intrinsic size.
    pub document_area: Option<Vec2>,
}

impl Default for TreePainter {
    fn default() -> Self {
        Self {
            left_margin: 20.0,
            right_margin: 20.0,
            top_margin: 44.0,
            bottom_margin: 56.0,
            row_height: 22.0,
            depth_width: 640.0,
            branch_width: 1.5,
            label_font_size: 12.0,
            label_gap: 6.0,
            title: None,
            title_font_size: 16.0,
            scale_bar_fraction: 0.2,
            scale_unit: "substitutions/site".to_string(),
            background_color: Color32::WHITE,
            document_area: None,
        }
    }
}

impl TreePainter {
    /// Rough label width; the scene is sized before any font is loaded.
    pub fn estimated_label_width(&self, chars: usize) -> f32 {
        chars as f32 * self.label_font_size * 0.6
    }
}

/// `#rrggbb` form of a colour, as used in SVG attributes.
pub fn color_to_hex(color: Color32) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r(), color.g(), color.b())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_names_round_trip() {
        for scheme in ColorScheme::ALL {
            assert_eq!(ColorScheme::from_name(scheme.name()), Some(scheme));
        }
        assert_eq!(ColorScheme::from_name(" Colorful "), Some(ColorScheme::Colorful));
        assert_eq!(ColorScheme::from_name("sepia"), None);
    }

    #[test]
    fn colorful_hue_varies_with_depth() {
        let shallow = ColorScheme::Colorful.branch_color(0.0);
        let deep = ColorScheme::Colorful.branch_color(1.0);
        assert_ne!(shallow, deep);
        assert_eq!(
            ColorScheme::Colorful.branch_color(2.0),
            deep,
            "fractions are clamped"
        );
    }

    #[test]
    fn single_color_schemes_ignore_depth() {
        for scheme in [ColorScheme::Default, ColorScheme::Grayscale] {
            assert_eq!(scheme.branch_color(0.0), scheme.branch_color(0.9));
        }
        assert_ne!(
            ColorScheme::Default.branch_color(0.5),
            ColorScheme::Grayscale.branch_color(0.5)
        );
    }

    #[test]
    fn default_scheme_leaves_documents_alone() {
        assert_eq!(ColorScheme::Default.element_color(3), None);
        assert_eq!(
            ColorScheme::Grayscale.element_color(0),
            ColorScheme::Grayscale.element_color(7)
        );
        assert_ne!(
            ColorScheme::Colorful.element_color(0),
            ColorScheme::Colorful.element_color(1)
        );
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(color_to_hex(Color32::from_rgb(255, 0, 16)), "#ff0010");
    }
}
