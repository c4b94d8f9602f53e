use eframe::egui::{self, Color32, Pos2, Rect, Vec2};
use thiserror::Error;

use super::external::ExternalDocument;
use super::layout::TreeLayout;
use super::painter::{ColorScheme, TreePainter};
use super::viewer::{RenderModeKind, ViewportState};
use super::Tree;

/// Largest pixel surface edge that rasterizing backends will allocate.
/// Scenes themselves are unbounded; only pixel buffers are capped.
pub const MAX_SURFACE_EDGE: f32 = 16_384.0;
const DEFAULT_DOCUMENT_AREA: Vec2 = Vec2::new(960.0, 640.0);
const SCALE_BAR_TICK: f32 = 4.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("drawing surface unavailable: {0}")]
    SurfaceUnavailable(String),
    #[error("nothing to render in {} mode", .0.name())]
    NothingToRender(RenderModeKind),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub width: f32,
    pub color: Color32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScenePrimitive {
    FillRect {
        rect: Rect,
        color: Color32,
    },
    StrokeLine {
        from: Pos2,
        to: Pos2,
        style: StrokeStyle,
    },
    StrokePolyline {
        points: Vec<Pos2>,
        style: StrokeStyle,
    },
    Text {
        text: String,
        anchor: Pos2,
        align: egui::Align2,
        size: f32,
        color: Color32,
    },
    /// Externally rendered markup, already fitted to `rect`.
    Embedded {
        markup: String,
        rect: Rect,
    },
}

/// Pan/zoom applied by backends on top of scene coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    pub offset: Vec2,
}

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform {
        scale: 1.0,
        offset: Vec2::ZERO,
    };

    pub fn apply(&self, point: Pos2) -> Pos2 {
        Pos2::new(
            point.x * self.scale + self.offset.x,
            point.y * self.scale + self.offset.y,
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// What to draw: the tagged variant consumed by [`render`].
#[derive(Clone, Copy, Debug)]
pub enum RenderSource<'a> {
    Computed {
        tree: &'a Tree,
        layout: &'a TreeLayout,
    },
    External(&'a ExternalDocument),
}

#[derive(Clone, Debug)]
pub struct TreeSceneGraph {
    pub size: Vec2,
    pub primitives: Vec<ScenePrimitive>,
    pub transform: ViewTransform,
}

impl TreeSceneGraph {
    /// Fitted markup when this scene displays an external document.
    pub fn embedded_markup(&self) -> Option<&str> {
        self.primitives.iter().find_map(|primitive| match primitive {
            ScenePrimitive::Embedded { markup, .. } => Some(markup.as_str()),
            _ => None,
        })
    }
}

/// Build the display list for `source` under `viewport`.
pub fn render(
    source: RenderSource<'_>,
    viewport: &ViewportState,
    painter: &TreePainter,
) -> Result<TreeSceneGraph, RenderError> {
    let mut scene = match source {
        RenderSource::Computed { tree, layout } => {
            build_tree_scene(tree, layout, viewport, painter)?
        }
        RenderSource::External(document) => {
            build_document_scene(document, viewport, painter)?
        }
    };
    scene.transform = viewport.transform();
    Ok(scene)
}

/// A scene needs a finite, non-empty extent. Pixel limits are enforced by
/// the rasterizer, not here.
fn check_extent(size: Vec2) -> Result<(), RenderError> {
    let valid = |edge: f32| edge.is_finite() && edge >= 1.0;
    if valid(size.x) && valid(size.y) {
        Ok(())
    } else {
        Err(RenderError::SurfaceUnavailable(format!(
            "cannot lay out a {:.0}x{:.0} surface",
            size.x, size.y
        )))
    }
}

fn build_tree_scene(
    tree: &Tree,
    layout: &TreeLayout,
    viewport: &ViewportState,
    painter: &TreePainter,
) -> Result<TreeSceneGraph, RenderError> {
    let scheme = viewport.color_scheme;
    let label_room =
        painter.label_gap * 2.0 + painter.estimated_label_width(tree.max_leaf_label_chars());
    let plot_width = painter.depth_width;
    let plot_height = layout.max_y as f32 * painter.row_height;
    let size = Vec2::new(
        painter.left_margin + plot_width + label_room + painter.right_margin,
        painter.top_margin + plot_height + painter.bottom_margin,
    )
    .ceil();
    check_extent(size)?;

    let has_depth = layout.max_depth > f64::EPSILON;
    let scale_x = if has_depth {
        plot_width as f64 / layout.max_depth
    } else {
        0.0
    };
    let to_px = |x: f64, y: f64| {
        Pos2::new(
            painter.left_margin + (x * scale_x) as f32,
            painter.top_margin + y as f32 * painter.row_height,
        )
    };
    let depth_fraction = |x: f64| {
        if has_depth {
            (x / layout.max_depth) as f32
        } else {
            0.0
        }
    };

    let mut primitives = vec![ScenePrimitive::FillRect {
        rect: Rect::from_min_size(Pos2::ZERO, size),
        color: painter.background_color,
    }];

    if let Some(title) = painter.title.as_ref().or(tree.label.as_ref()) {
        primitives.push(ScenePrimitive::Text {
            text: title.clone(),
            anchor: Pos2::new(size.x * 0.5, painter.top_margin * 0.25),
            align: egui::Align2::CENTER_TOP,
            size: painter.title_font_size,
            color: scheme.label_color(0.0),
        });
    }

    for node_id in tree.preorder() {
        let node = &tree.nodes[node_id];
        let Some(parent_id) = node.parent else {
            continue;
        };
        let parent = &tree.nodes[parent_id];
        // Elbow: vertical at the parent's depth, then horizontal to the node.
        primitives.push(ScenePrimitive::StrokePolyline {
            points: vec![
                to_px(parent.x, parent.y),
                to_px(parent.x, node.y),
                to_px(node.x, node.y),
            ],
            style: StrokeStyle {
                width: painter.branch_width,
                color: scheme.branch_color(depth_fraction(node.x)),
            },
        });
    }

    for leaf in tree.external_nodes() {
        if leaf.name.is_empty() {
            continue;
        }
        let tip = to_px(leaf.x, leaf.y);
        primitives.push(ScenePrimitive::Text {
            text: leaf.name.clone(),
            anchor: Pos2::new(tip.x + painter.label_gap, tip.y),
            align: egui::Align2::LEFT_CENTER,
            size: painter.label_font_size,
            color: scheme.label_color(depth_fraction(leaf.x)),
        });
    }

    if has_depth {
        push_scale_bar(&mut primitives, layout, painter, scheme, scale_x, plot_height);
    }

    Ok(TreeSceneGraph {
        size,
        primitives,
        transform: ViewTransform::IDENTITY,
    })
}

fn push_scale_bar(
    primitives: &mut Vec<ScenePrimitive>,
    layout: &TreeLayout,
    painter: &TreePainter,
    scheme: ColorScheme,
    scale_x: f64,
    plot_height: f32,
) {
    let distance = layout.max_depth * painter.scale_bar_fraction;
    let length = (distance * scale_x) as f32;
    let y = painter.top_margin + plot_height + painter.bottom_margin * 0.4;
    let start = Pos2::new(painter.left_margin, y);
    let end = Pos2::new(painter.left_margin + length, y);
    let style = StrokeStyle {
        width: painter.branch_width,
        color: scheme.label_color(0.0),
    };

    primitives.push(ScenePrimitive::StrokeLine {
        from: start,
        to: end,
        style,
    });
    for x in [start.x, end.x] {
        primitives.push(ScenePrimitive::StrokeLine {
            from: Pos2::new(x, y - SCALE_BAR_TICK),
            to: Pos2::new(x, y + SCALE_BAR_TICK),
            style,
        });
    }
    primitives.push(ScenePrimitive::Text {
        text: format!("{} {}", format_distance(distance), painter.scale_unit),
        anchor: Pos2::new(start.x + length * 0.5, y + SCALE_BAR_TICK + 2.0),
        align: egui::Align2::CENTER_TOP,
        size: painter.label_font_size,
        color: style.color,
    });
}

fn build_document_scene(
    document: &ExternalDocument,
    viewport: &ViewportState,
    painter: &TreePainter,
) -> Result<TreeSceneGraph, RenderError> {
    let size = painter
        .document_area
        .or_else(|| document.intrinsic_size().map(|(w, h)| Vec2::new(w, h)))
        .unwrap_or(DEFAULT_DOCUMENT_AREA);
    check_extent(size)?;

    let markup = document.fitted(size.x, size.y, viewport.color_scheme);
    Ok(TreeSceneGraph {
        size,
        primitives: vec![
            ScenePrimitive::FillRect {
                rect: Rect::from_min_size(Pos2::ZERO, size),
                color: painter.background_color,
            },
            ScenePrimitive::Embedded {
                markup,
                rect: Rect::from_min_size(Pos2::ZERO, size),
            },
        ],
        transform: ViewTransform::IDENTITY,
    })
}

/// Three significant digits, switching to exponent form for tiny values.
pub fn format_distance(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.abs() < 1e-3 {
        return format!("{value:.2e}");
    }
    let digits = (2 - value.abs().log10().floor() as i32).max(0) as usize;
    format!("{value:.digits$}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::viewer::LoadedTree;

    fn scene_for(input: &str, viewport: &ViewportState) -> TreeSceneGraph {
        let loaded = LoadedTree::parse(input).unwrap();
        render(
            RenderSource::Computed {
                tree: &loaded.tree,
                layout: &loaded.layout,
            },
            viewport,
            &TreePainter::default(),
        )
        .unwrap()
    }

    fn polylines(scene: &TreeSceneGraph) -> Vec<&Vec<Pos2>> {
        scene
            .primitives
            .iter()
            .filter_map(|p| match p {
                ScenePrimitive::StrokePolyline { points, .. } => Some(points),
                _ => None,
            })
            .collect()
    }

    fn texts(scene: &TreeSceneGraph) -> Vec<&str> {
        scene
            .primitives
            .iter()
            .filter_map(|p| match p {
                ScenePrimitive::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn one_elbow_per_non_root_node() {
        let scene = scene_for("(A:1,(B:1,C:1):1):0;", &ViewportState::default());
        let elbows = polylines(&scene);
        assert_eq!(elbows.len(), 4);
        for points in elbows {
            assert_eq!(points.len(), 3);
            // Vertical leg at the parent's depth, horizontal leg at the node's slot.
            assert_eq!(points[0].x, points[1].x);
            assert_eq!(points[1].y, points[2].y);
            assert!(points[2].x >= points[1].x);
        }
    }

    #[test]
    fn elbow_geometry_matches_layout() {
        let painter = TreePainter::default();
        let scene = scene_for("(A:1,B:2):0;", &ViewportState::default());
        let elbows = polylines(&scene);
        let px_per_unit = painter.depth_width / 2.0;

        let a = elbows[0];
        assert_eq!(
            a[0],
            Pos2::new(painter.left_margin, painter.top_margin + 0.5 * painter.row_height)
        );
        assert_eq!(a[1], Pos2::new(painter.left_margin, painter.top_margin));
        assert_eq!(a[2], Pos2::new(painter.left_margin + px_per_unit, painter.top_margin));

        let b = elbows[1];
        assert_eq!(
            b[2],
            Pos2::new(
                painter.left_margin + 2.0 * px_per_unit,
                painter.top_margin + painter.row_height
            )
        );
    }

    #[test]
    fn leaves_are_labelled_to_the_right() {
        let painter = TreePainter::default();
        let scene = scene_for("(A:1,B:2)root:0;", &ViewportState::default());
        let labels: Vec<(&str, Pos2, egui::Align2)> = scene
            .primitives
            .iter()
            .filter_map(|p| match p {
                ScenePrimitive::Text {
                    text, anchor, align, ..
                } if !text.contains(&painter.scale_unit) => Some((text.as_str(), *anchor, *align)),
                _ => None,
            })
            .collect();

        assert_eq!(labels.len(), 2, "internal names are not drawn");
        assert_eq!(labels[0].0, "A");
        assert_eq!(labels[0].2, egui::Align2::LEFT_CENTER);
        assert_eq!(
            labels[0].1.x,
            painter.left_margin + painter.depth_width / 2.0 + painter.label_gap
        );
    }

    #[test]
    fn scale_bar_is_a_fifth_of_max_depth() {
        let painter = TreePainter::default();
        let scene = scene_for("(A:1,B:2):0;", &ViewportState::default());
        assert!(texts(&scene).contains(&"0.400 substitutions/site"));

        let bar = scene
            .primitives
            .iter()
            .find_map(|p| match p {
                ScenePrimitive::StrokeLine { from, to, .. } if from.y == to.y => Some((*from, *to)),
                _ => None,
            })
            .unwrap();
        assert!((bar.1.x - bar.0.x - painter.depth_width * 0.2).abs() < 1e-3);
        assert!(bar.0.y > painter.top_margin + painter.row_height);
    }

    #[test]
    fn zero_depth_tree_has_no_scale_bar() {
        let scene = scene_for("(A,B);", &ViewportState::default());
        assert!(!scene
            .primitives
            .iter()
            .any(|p| matches!(p, ScenePrimitive::StrokeLine { .. })));
        assert!(scene.size.x.is_finite() && scene.size.y > 0.0);
    }

    #[test]
    fn title_comes_from_painter() {
        let loaded = LoadedTree::parse("(A:1,B:1);").unwrap();
        let painter = TreePainter {
            title: Some("Kinases".to_string()),
            ..TreePainter::default()
        };
        let scene = render(
            RenderSource::Computed {
                tree: &loaded.tree,
                layout: &loaded.layout,
            },
            &ViewportState::default(),
            &painter,
        )
        .unwrap();
        assert!(texts(&scene).contains(&"Kinases"));
    }

    #[test]
    fn color_scheme_changes_only_colors() {
        let input = "((A:1,B:2):1,C:3);";
        let plain = scene_for(input, &ViewportState::default());
        let colorful = scene_for(
            input,
            &ViewportState {
                color_scheme: ColorScheme::Colorful,
                ..ViewportState::default()
            },
        );
        assert_eq!(polylines(&plain), polylines(&colorful));

        let colors: std::collections::HashSet<[u8; 4]> = colorful
            .primitives
            .iter()
            .filter_map(|p| match p {
                ScenePrimitive::StrokePolyline { style, .. } => Some(style.color.to_array()),
                _ => None,
            })
            .collect();
        assert!(colors.len() > 1);
    }

    #[test]
    fn viewport_transform_is_carried_not_baked() {
        let viewport = ViewportState {
            scale: 2.0,
            offset: Vec2::new(10.0, -5.0),
            ..ViewportState::default()
        };
        let moved = scene_for("(A:1,B:2);", &viewport);
        let still = scene_for("(A:1,B:2);", &ViewportState::default());
        assert_eq!(polylines(&moved), polylines(&still));
        assert_eq!(moved.transform.apply(Pos2::new(1.0, 1.0)), Pos2::new(12.0, -3.0));
        assert!(still.transform.is_identity());
    }

    #[test]
    fn thousands_of_leaves_render_past_the_pixel_limit() {
        let leaves: Vec<String> = (0..1200).map(|i| format!("t{i}:0.1")).collect();
        let scene = scene_for(&format!("({});", leaves.join(",")), &ViewportState::default());
        assert!(scene.size.y > MAX_SURFACE_EDGE);
        assert_eq!(polylines(&scene).len(), 1200);
        assert!(texts(&scene).contains(&"t1199"));
    }

    #[test]
    fn degenerate_extent_reports_surface_failure() {
        let loaded = LoadedTree::parse("(A:1,B:2);").unwrap();
        let painter = TreePainter {
            depth_width: f32::NAN,
            ..TreePainter::default()
        };
        let err = render(
            RenderSource::Computed {
                tree: &loaded.tree,
                layout: &loaded.layout,
            },
            &ViewportState::default(),
            &painter,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::SurfaceUnavailable(_)));
    }

    #[test]
    fn external_document_is_embedded_fitted() {
        let document = ExternalDocument::new(
            "<svg width='200' height='100'><path d='M0 0' stroke='black'/></svg>",
        )
        .unwrap();
        let painter = TreePainter {
            document_area: Some(Vec2::new(400.0, 300.0)),
            ..TreePainter::default()
        };
        let viewport = ViewportState {
            color_scheme: ColorScheme::Grayscale,
            render_mode: RenderModeKind::ExternalVectorDocument,
            ..ViewportState::default()
        };
        let scene = render(RenderSource::External(&document), &viewport, &painter).unwrap();
        assert_eq!(scene.size, Vec2::new(400.0, 300.0));
        let markup = scene.embedded_markup().unwrap();
        assert!(markup.contains("width='400' height='300'"));
        assert!(markup.contains("stroke='#808080'"));
    }

    #[test]
    fn external_document_defaults_to_intrinsic_size() {
        let document = ExternalDocument::new("<svg viewBox='0 0 50 20'></svg>").unwrap();
        let scene = render(
            RenderSource::External(&document),
            &ViewportState::default(),
            &TreePainter::default(),
        )
        .unwrap();
        assert_eq!(scene.size, Vec2::new(50.0, 20.0));
    }

    #[test]
    fn distance_formatting() {
        assert_eq!(format_distance(0.4), "0.400");
        assert_eq!(format_distance(12.5), "12.5");
        assert_eq!(format_distance(250.0), "250");
        assert_eq!(format_distance(0.00012), "1.20e-4");
        assert_eq!(format_distance(0.0), "0");
    }
}
