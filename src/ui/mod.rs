use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::error;

use crate::app::{AppConfig, Session};
use crate::export::{self, ExportKind, ExportPayload};
use crate::tree::scene_graph::{self, ViewTransform};
use crate::tree::viewer::{RenderModeKind, ViewportState, Visualization};

const PREVIEW_TREES: usize = 3;
const PREVIEW_CHARS: usize = 64;

pub fn render_preview(visualization: &Visualization, config: &AppConfig) {
    print!("{}", preview_text(visualization, config));
}

fn preview_text(visualization: &Visualization, config: &AppConfig) -> String {
    let mut out = String::new();
    let trees = visualization.trees();
    out.push_str(&format!("Loaded {} tree(s).\n", trees.len()));

    for (index, loaded) in trees.iter().take(PREVIEW_TREES).enumerate() {
        out.push_str(&format!(
            "- tree #{} => {} leaves, depth {:.4}, {} ({} nodes)\n",
            index + 1,
            loaded.layout.leaf_count,
            loaded.layout.max_depth,
            truncate(loaded.newick.trim(), PREVIEW_CHARS),
            loaded.tree.len()
        ));
        let negative = loaded.tree.negative_length_count();
        if negative > 0 {
            out.push_str(&format!("  ({negative} negative branch length(s))\n"));
        }
    }
    if trees.len() > PREVIEW_TREES {
        out.push_str(&format!(
            "... ({} more tree(s) omitted)\n",
            trees.len() - PREVIEW_TREES
        ));
    }

    if let Some(document) = visualization.document() {
        let size = document
            .intrinsic_size()
            .map(|(w, h)| format!("{w}x{h}"))
            .unwrap_or_else(|| "unsized".to_string());
        out.push_str(&format!(
            "External vector document: {size}, {} bytes.\n",
            document.markup().len()
        ));
    }

    out.push_str(&format!(
        "Colour scheme {}, raster scale {}.\n",
        config.scheme, config.raster_scale
    ));
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Build the requested export for the session's current view.
///
/// Exports keep the colour scheme and render mode but never bake in pan or zoom.
pub fn build_export(
    visualization: &Visualization,
    state: &ViewportState,
    config: &AppConfig,
    kind: ExportKind,
) -> Result<ExportPayload> {
    let vector_kind = match kind {
        ExportKind::Newick => {
            let loaded = visualization
                .current_tree()
                .ok_or_else(|| anyhow!("Newick export needs a loaded tree"))?;
            return Ok(export::export_text(&loaded.newick)?);
        }
        other => other,
    };

    let export_state = ViewportState {
        scale: 1.0,
        offset: ViewTransform::IDENTITY.offset,
        ..*state
    };
    let source = visualization
        .source(export_state.render_mode)
        .ok_or(scene_graph::RenderError::NothingToRender(export_state.render_mode))?;
    let scene = scene_graph::render(source, &export_state, &config.painter())?;
    let vector = export::export_vector(&scene)?;

    if vector_kind == ExportKind::Png {
        Ok(export::export_raster(&vector.bytes, config.raster_scale)?)
    } else {
        Ok(vector)
    }
}

pub fn export(session: &Session, config: &AppConfig, output: &Path) -> Result<()> {
    let kind = config.resolved_export_kind()?;
    let state = session.controller.state();
    let payload = build_export(&session.visualization, state, config, kind)
        .and_then(|payload| {
            export::write_export(&payload, output)?;
            Ok(payload)
        })
        .inspect_err(|err| error!("export to {} failed: {err:#}", output.display()))
        .with_context(|| format!("failed to export {}", kind.label()))?;

    let mode = match state.render_mode {
        RenderModeKind::Computed => "computed tree",
        RenderModeKind::ExternalVectorDocument => "external document",
    };
    println!(
        "Exported {} ({}, {} bytes) to {}.",
        mode,
        payload.kind.mime(),
        payload.bytes.len(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::painter::ColorScheme;
    use clap::Parser;

    fn config() -> AppConfig {
        AppConfig::parse_from(["phylo-view"])
    }

    fn visualization(text: &str) -> Visualization {
        let mut visualization = Visualization::new();
        visualization.set_trees(crate::io::load_trees(text).unwrap());
        visualization
    }

    #[test]
    fn preview_lists_trees() {
        let text = preview_text(&visualization("(A:1,B:2);(C,D,E);"), &config());
        assert!(text.starts_with("Loaded 2 tree(s).\n"));
        assert!(text.contains("- tree #1 => 2 leaves, depth 2.0000, (A:1,B:2); (3 nodes)"));
        assert!(text.contains("- tree #2 => 3 leaves"));
    }

    #[test]
    fn preview_truncates_long_trees() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn exports_ignore_pan_and_zoom() {
        let visualization = visualization("(A:1,B:2);");
        let moved = ViewportState {
            scale: 2.5,
            offset: eframe::egui::vec2(40.0, 12.0),
            color_scheme: ColorScheme::Colorful,
            ..ViewportState::default()
        };
        let still = ViewportState {
            color_scheme: ColorScheme::Colorful,
            ..ViewportState::default()
        };
        let a = build_export(&visualization, &moved, &config(), ExportKind::Svg).unwrap();
        let b = build_export(&visualization, &still, &config(), ExportKind::Svg).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn newick_export_returns_source_text() {
        let visualization = visualization("(A:1, B:2)root;");
        let state = ViewportState::default();
        let payload = build_export(&visualization, &state, &config(), ExportKind::Newick).unwrap();
        assert_eq!(payload.bytes, b"(A:1, B:2)root;");
    }

    #[test]
    fn large_trees_export_as_svg_but_not_as_oversized_png() {
        let leaves: Vec<String> = (0..1000).map(|i| format!("t{i}:0.1")).collect();
        let visualization = visualization(&format!("({});", leaves.join(",")));
        let state = ViewportState::default();

        let svg = build_export(&visualization, &state, &config(), ExportKind::Svg).unwrap();
        assert!(String::from_utf8(svg.bytes).unwrap().contains("t999"));

        let err = build_export(&visualization, &state, &config(), ExportKind::Png).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<export::ExportError>(),
            Some(export::ExportError::Surface(_))
        ));
    }

    #[test]
    fn external_mode_without_document_fails() {
        let state = ViewportState {
            render_mode: RenderModeKind::ExternalVectorDocument,
            ..ViewportState::default()
        };
        let err = build_export(&visualization("(A,B);"), &state, &config(), ExportKind::Svg)
            .unwrap_err();
        assert!(err.downcast_ref::<scene_graph::RenderError>().is_some());
    }
}
