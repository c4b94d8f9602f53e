use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use eframe::{egui, NativeOptions};
use log::{error, info, warn};

use crate::export::ExportKind;
use crate::gui::TreeViewerGui;
use crate::tree::painter::{ColorScheme, TreePainter};
use crate::tree::viewer::{
    RenderModeKind, ViewerConfig, ViewportController, ViewportState, Visualization,
};
use crate::{io, ui};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "phylo-view",
    about = "Phylogenetic tree viewer for Newick trees and pre-rendered SVG figures."
)]
pub struct AppConfig {
    /// Tree file (Newick) or vector document (SVG) to load.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// External SVG rendering of the tree, shown in external mode.
    #[arg(long, value_name = "FILE")]
    pub svg: Option<PathBuf>,

    /// Run without launching the GUI; print a summary to stdout instead.
    #[arg(long)]
    pub headless: bool,

    /// Export path used in headless mode.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Export format; inferred from the output extension when omitted.
    #[arg(long, value_enum)]
    pub export_format: Option<ExportKind>,

    #[arg(long, value_enum, default_value_t = ColorScheme::Default)]
    pub scheme: ColorScheme,

    /// Initial render mode; defaults to computed when a tree is loaded.
    #[arg(long, value_enum)]
    pub mode: Option<RenderModeKind>,

    #[arg(long, default_value_t = 0.5)]
    pub min_zoom: f32,

    #[arg(long, default_value_t = 3.0)]
    pub max_zoom: f32,

    /// Zoom change per toolbar click.
    #[arg(long, default_value_t = 0.25)]
    pub zoom_step: f32,

    /// Upscaling factor for PNG export.
    #[arg(long, default_value_t = 2.0)]
    pub raster_scale: f32,

    /// Scale bar length as a fraction of the tree depth.
    #[arg(long, default_value_t = 0.2)]
    pub scale_bar_fraction: f64,

    #[arg(long, default_value = "substitutions/site")]
    pub scale_unit: String,

    /// Title drawn above the tree.
    #[arg(long)]
    pub title: Option<String>,

    /// Window width in pixels
    #[arg(long, default_value_t = 1100)]
    pub width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 760)]
    pub height: u32,

    /// Viewport settings file (`key=value` lines).
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,
}

impl AppConfig {
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            min_scale: self.min_zoom,
            max_scale: self.max_zoom,
            zoom_step: self.zoom_step,
        }
    }

    pub fn painter(&self) -> TreePainter {
        TreePainter {
            title: self.title.clone(),
            scale_bar_fraction: self.scale_bar_fraction,
            scale_unit: self.scale_unit.clone(),
            ..TreePainter::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let zoom_values = [self.min_zoom, self.max_zoom, self.zoom_step];
        if zoom_values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            bail!("zoom range and step must be positive numbers");
        }
        if self.min_zoom > self.max_zoom {
            bail!(
                "--min-zoom ({}) is larger than --max-zoom ({})",
                self.min_zoom,
                self.max_zoom
            );
        }
        if !self.raster_scale.is_finite() || self.raster_scale <= 0.0 {
            bail!("--raster-scale must be a positive number");
        }
        if !(0.0..=1.0).contains(&self.scale_bar_fraction) {
            bail!("--scale-bar-fraction must lie between 0 and 1");
        }
        if self.output.is_some() && !self.headless {
            warn!("--output is only used in headless mode");
        }
        Ok(())
    }

    /// Export format for `--output`: explicit flag first, then the extension.
    pub fn resolved_export_kind(&self) -> Result<ExportKind> {
        if let Some(kind) = self.export_format {
            return Ok(kind);
        }
        let output = self
            .output
            .as_deref()
            .ok_or_else(|| anyhow!("no output path given"))?;
        ExportKind::from_path(output).ok_or_else(|| {
            anyhow!(
                "cannot infer export format from {}; pass --export-format",
                output.display()
            )
        })
    }
}

/// Inputs and initial viewport assembled from the command line.
pub struct Session {
    pub visualization: Visualization,
    pub controller: ViewportController,
}

impl Session {
    pub fn load(config: &AppConfig) -> Result<Self> {
        let mut visualization = Visualization::new();

        if let Some(path) = &config.input {
            match io::load_input(path)? {
                io::LoadedInput::Trees(trees) => visualization.set_trees(trees),
                io::LoadedInput::Document(document) => visualization.set_document(document),
            }
        }
        if let Some(path) = &config.svg {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read vector document: {}", path.display()))?;
            let document = io::load_document(&raw)
                .with_context(|| format!("failed to load vector document {}", path.display()))?;
            visualization.set_document(document);
        }

        let mut state = ViewportState {
            color_scheme: config.scheme,
            ..ViewportState::default()
        };
        if let Some(path) = config.settings.as_deref().filter(|path| path.exists()) {
            state.apply_settings(&io::read_settings(path)?);
        }

        let mut controller = ViewportController::with_state(config.viewer_config(), state);
        let requested = config.mode.unwrap_or(controller.state().render_mode);
        if !controller.set_render_mode(requested, &visualization) {
            if config.mode.is_some() {
                bail!("render mode {} needs an input that was not loaded", requested.name());
            }
            if !visualization.is_empty() {
                controller.set_render_mode(visualization.preferred_mode(), &visualization);
            }
        }

        Ok(Self {
            visualization,
            controller,
        })
    }
}

pub struct PhyloViewApp;

impl PhyloViewApp {
    pub fn run(config: &AppConfig) -> Result<()> {
        config.validate()?;
        let session = Session::load(config)?;

        if config.headless {
            return Self::run_headless(config, &session);
        }

        if !Self::display_available() {
            warn!("GUI requested but no display was detected; falling back to headless mode.");
            return Self::run_headless(config, &session);
        }

        let mut native_options = NativeOptions::default();
        info!("Launching egui window ({}x{}).", config.width, config.height);
        native_options.viewport = egui::ViewportBuilder::default()
            .with_title("phylo-view")
            .with_inner_size(egui::vec2(config.width as f32, config.height as f32));

        let gui_config = config.clone();
        let fallback = Session {
            visualization: session.visualization.clone(),
            controller: session.controller.clone(),
        };
        match eframe::run_native(
            "phylo-view",
            native_options,
            Box::new(move |_cc| Ok(Box::new(TreeViewerGui::new(gui_config, session)))),
        ) {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("Failed to launch egui window: {}", err);
                if fallback.visualization.is_empty() {
                    Err(anyhow!(err.to_string()))
                } else {
                    warn!("Falling back to headless mode.");
                    Self::run_headless(config, &fallback)
                }
            }
        }
    }

    fn display_available() -> bool {
        #[cfg(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        {
            std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "openbsd"
        )))]
        {
            true
        }
    }

    fn run_headless(config: &AppConfig, session: &Session) -> Result<()> {
        if session.visualization.is_empty() {
            bail!("headless mode requires an INPUT tree file or --svg document");
        }
        ui::render_preview(&session.visualization, config);

        if let Some(dest) = &config.output {
            ui::export(session, config, dest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("phylo-view").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_match_viewer_defaults() {
        let config = config(&[]);
        let viewer = config.viewer_config();
        assert_eq!(viewer.min_scale, 0.5);
        assert_eq!(viewer.max_scale, 3.0);
        assert_eq!(viewer.zoom_step, 0.25);
        assert_eq!(config.raster_scale, 2.0);
        let painter = config.painter();
        assert_eq!(painter.scale_bar_fraction, 0.2);
        assert_eq!(painter.scale_unit, "substitutions/site");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_enums_and_paths() {
        let config = config(&[
            "tree.nwk",
            "--svg",
            "fig.svg",
            "--scheme",
            "colorful",
            "--mode",
            "external",
            "--export-format",
            "newick",
            "--title",
            "Kinases",
        ]);
        assert_eq!(config.input.as_deref(), Some(std::path::Path::new("tree.nwk")));
        assert_eq!(config.scheme, ColorScheme::Colorful);
        assert_eq!(config.mode, Some(RenderModeKind::ExternalVectorDocument));
        assert_eq!(config.export_format, Some(ExportKind::Newick));
        assert_eq!(config.painter().title.as_deref(), Some("Kinases"));
    }

    #[test]
    fn rejects_inverted_zoom_range() {
        let config = config(&["--min-zoom", "4", "--max-zoom", "2"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn export_kind_falls_back_to_extension() {
        assert_eq!(
            config(&["--output", "out/fig.png"]).resolved_export_kind().unwrap(),
            ExportKind::Png
        );
        assert!(config(&["--output", "out/fig.bin"]).resolved_export_kind().is_err());
    }

    #[test]
    fn session_without_inputs_is_empty() {
        let session = Session::load(&config(&[])).unwrap();
        assert!(session.visualization.is_empty());
        assert_eq!(session.controller.state().render_mode, RenderModeKind::Computed);
    }

    #[test]
    fn session_rejects_mode_without_input() {
        let err = Session::load(&config(&["--mode", "external"])).err().unwrap();
        assert!(err.to_string().contains("external"));
    }
}
