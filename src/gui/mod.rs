use std::path::{Path, PathBuf};

use eframe::egui::{self, Color32, FontId, Pos2, Rect, Stroke, Vec2};
use log::{error, info, warn};
use rfd::FileDialog;

use crate::app::{AppConfig, Session};
use crate::export::{self, raster, ExportKind};
use crate::io;
use crate::tree::painter::{ColorScheme, TreePainter};
use crate::tree::scene_graph::{
    self, RenderError, ScenePrimitive, TreeSceneGraph, MAX_SURFACE_EDGE,
};
use crate::tree::viewer::{RenderModeKind, ViewportController, Visualization};
use crate::ui;

/// Inputs that force the scene to be rebuilt. Pan and zoom are not part of
/// it; they only change the transform applied while drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SceneSignature {
    scheme: ColorScheme,
    mode: RenderModeKind,
    tree_index: usize,
    input_generation: u64,
    document_area: Option<[u32; 2]>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct DocumentTextureKey {
    scheme: ColorScheme,
    size_px: [u32; 2],
    input_generation: u64,
}

enum StatusMessage {
    Info(String),
    Error(String),
}

pub struct TreeViewerGui {
    config: AppConfig,
    visualization: Visualization,
    controller: ViewportController,
    painter: TreePainter,
    input_path: Option<PathBuf>,
    input_generation: u64,
    scene: Option<TreeSceneGraph>,
    scene_signature: Option<SceneSignature>,
    document_texture: Option<(DocumentTextureKey, egui::TextureHandle)>,
    failed_texture: Option<DocumentTextureKey>,
    status: Option<StatusMessage>,
    surface_error: Option<String>,
}

impl TreeViewerGui {
    pub fn new(config: AppConfig, session: Session) -> Self {
        let painter = config.painter();
        let input_path = config.input.clone();
        Self {
            config,
            visualization: session.visualization,
            controller: session.controller,
            painter,
            input_path,
            input_generation: 0,
            scene: None,
            scene_signature: None,
            document_texture: None,
            failed_texture: None,
            status: None,
            surface_error: None,
        }
    }

    fn inputs_changed(&mut self) {
        self.input_generation += 1;
        self.scene = None;
        self.scene_signature = None;
        self.document_texture = None;
        self.failed_texture = None;
        let mode = self.controller.state().render_mode;
        if !self.visualization.supports(mode) {
            let preferred = self.visualization.preferred_mode();
            self.controller.set_render_mode(preferred, &self.visualization);
        }
    }

    fn load_from_path(&mut self, path: PathBuf) {
        match io::load_input(&path) {
            Ok(io::LoadedInput::Trees(trees)) => {
                let count = trees.len();
                self.visualization.set_trees(trees);
                self.status = Some(StatusMessage::Info(format!(
                    "Loaded {count} tree(s) from {}",
                    path.display()
                )));
            }
            Ok(io::LoadedInput::Document(document)) => {
                self.visualization.set_document(document);
                self.status = Some(StatusMessage::Info(format!(
                    "Loaded vector document {}",
                    path.display()
                )));
            }
            Err(err) => {
                warn!("{err:#}");
                // The previous inputs stay on screen.
                self.status = Some(StatusMessage::Error(format!("{err:#}")));
                return;
            }
        }
        self.input_path = Some(path);
        self.inputs_changed();
    }

    fn open_file_dialog(&mut self) {
        if let Some(path) = FileDialog::new()
            .add_filter("Tree or SVG", &["nwk", "newick", "tre", "tree", "txt", "svg"])
            .pick_file()
        {
            self.load_from_path(path);
        }
    }

    fn consume_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<PathBuf> = ctx.input(|input| {
            input
                .raw
                .dropped_files
                .iter()
                .filter_map(|file| file.path.clone())
                .collect()
        });
        for path in dropped {
            self.load_from_path(path);
        }
    }

    fn export_dialog(&mut self, kind: ExportKind) {
        if let Some(path) = FileDialog::new()
            .add_filter(kind.label(), &[kind.extension()])
            .set_file_name(kind.default_file_name())
            .save_file()
        {
            self.export_to_path(kind, &path);
        }
    }

    fn export_to_path(&mut self, kind: ExportKind, path: &Path) {
        let result = ui::build_export(
            &self.visualization,
            self.controller.state(),
            &self.config,
            kind,
        )
        .and_then(|payload| {
            export::write_export(&payload, path)?;
            Ok(payload)
        });

        self.status = Some(match result {
            Ok(payload) => StatusMessage::Info(format!(
                "Exported {} ({} bytes) to {}",
                kind.label(),
                payload.bytes.len(),
                path.display()
            )),
            Err(err) => {
                error!("export to {} failed: {err:#}", path.display());
                StatusMessage::Error(format!("Export failed: {err:#}"))
            }
        });
    }

    fn save_view(&mut self) {
        let Some(path) = self.config.settings.clone() else {
            return;
        };
        let settings = self.controller.state().to_settings();
        self.status = Some(match io::write_settings(&path, &settings) {
            Ok(()) => StatusMessage::Info(format!("Saved view to {}", path.display())),
            Err(err) => StatusMessage::Error(format!("{err:#}")),
        });
    }

    fn draw_toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            if ui.button("Open…").clicked() {
                self.open_file_dialog();
            }
            ui.separator();

            if ui.button("−").on_hover_text("Zoom out").clicked() {
                self.controller.zoom_out();
            }
            let config = *self.controller.config();
            let mut scale = self.controller.state().scale;
            if ui
                .add(
                    egui::Slider::new(&mut scale, config.min_scale..=config.max_scale)
                        .text("Zoom")
                        .fixed_decimals(2),
                )
                .changed()
            {
                self.controller.set_scale(scale);
            }
            if ui.button("+").on_hover_text("Zoom in").clicked() {
                self.controller.zoom_in();
            }
            if ui.button("Reset").clicked() {
                self.controller.reset();
            }
            ui.separator();

            let current_scheme = self.controller.state().color_scheme;
            egui::ComboBox::from_id_salt("color_scheme")
                .selected_text(current_scheme.name())
                .show_ui(ui, |ui| {
                    for scheme in ColorScheme::ALL {
                        if ui
                            .selectable_label(scheme == current_scheme, scheme.name())
                            .clicked()
                        {
                            self.controller.set_color_scheme(scheme);
                        }
                    }
                });

            let both_inputs = self.visualization.supports(RenderModeKind::Computed)
                && self.visualization.supports(RenderModeKind::ExternalVectorDocument);
            if both_inputs {
                let current_mode = self.controller.state().render_mode;
                egui::ComboBox::from_id_salt("render_mode")
                    .selected_text(current_mode.name())
                    .show_ui(ui, |ui| {
                        for mode in
                            [RenderModeKind::Computed, RenderModeKind::ExternalVectorDocument]
                        {
                            if ui.selectable_label(mode == current_mode, mode.name()).clicked() {
                                self.controller.set_render_mode(mode, &self.visualization);
                            }
                        }
                    });
            }

            let tree_count = self.visualization.tree_count();
            if tree_count > 1 {
                ui.separator();
                let index = self.visualization.current_tree_index();
                if ui.add_enabled(index > 0, egui::Button::new("◀")).clicked() {
                    self.visualization.show_previous_tree();
                }
                ui.label(format!("Tree {}/{}", index + 1, tree_count));
                if ui
                    .add_enabled(index + 1 < tree_count, egui::Button::new("▶"))
                    .clicked()
                {
                    self.visualization.show_next_tree();
                }
            }
            ui.separator();

            for kind in ExportKind::ALL {
                let available = match kind {
                    ExportKind::Newick => self.visualization.current_tree().is_some(),
                    _ => !self.visualization.is_empty(),
                };
                let label = format!("Export {}", kind.extension().to_ascii_uppercase());
                if ui.add_enabled(available, egui::Button::new(label)).clicked() {
                    self.export_dialog(kind);
                }
            }
            if self.config.settings.is_some() && ui.button("Save view").clicked() {
                self.save_view();
            }
        });
    }

    fn current_signature(&self, canvas: Vec2) -> SceneSignature {
        let mode = self.controller.state().render_mode;
        SceneSignature {
            scheme: self.controller.state().color_scheme,
            mode,
            tree_index: self.visualization.current_tree_index(),
            input_generation: self.input_generation,
            document_area: (mode == RenderModeKind::ExternalVectorDocument)
                .then(|| [canvas.x.round() as u32, canvas.y.round() as u32]),
        }
    }

    fn ensure_scene(&mut self, canvas: Vec2) {
        let signature = self.current_signature(canvas);
        if self.scene_signature == Some(signature) {
            return;
        }
        self.scene_signature = Some(signature);

        let state = *self.controller.state();
        let Some(source) = self.visualization.source(state.render_mode) else {
            self.scene = None;
            return;
        };
        let mut painter = self.painter.clone();
        painter.document_area = signature
            .document_area
            .map(|[w, h]| Vec2::new(w.max(1) as f32, h.max(1) as f32));

        match scene_graph::render(source, &state, &painter) {
            Ok(scene) => {
                info!(
                    "rebuilt {} scene ({} primitives)",
                    state.render_mode.name(),
                    scene.primitives.len()
                );
                self.scene = Some(scene);
            }
            Err(err) => {
                self.scene = None;
                self.report_render_error(err);
            }
        }
    }

    fn report_render_error(&mut self, err: RenderError) {
        error!("{err}");
        match err {
            RenderError::SurfaceUnavailable(message) => self.surface_error = Some(message),
            other => self.status = Some(StatusMessage::Error(other.to_string())),
        }
    }

    fn document_texture(
        &mut self,
        ctx: &egui::Context,
        markup: &str,
        size: Vec2,
    ) -> Option<egui::TextureId> {
        let pixels_per_point = ctx.pixels_per_point();
        let max_edge = (ctx.input(|input| input.max_texture_side) as f32).min(MAX_SURFACE_EDGE);
        let key = DocumentTextureKey {
            scheme: self.controller.state().color_scheme,
            size_px: texture_size_px(size, pixels_per_point, max_edge),
            input_generation: self.input_generation,
        };
        if let Some((cached, texture)) = &self.document_texture {
            if *cached == key {
                return Some(texture.id());
            }
        }
        // A texture that failed once is not retried until the view changes.
        if self.failed_texture == Some(key) {
            return None;
        }

        let image = raster::decode(markup).and_then(|vector| {
            let (width, _) = vector.size();
            let scale = if width > 0.0 {
                key.size_px[0] as f32 / width
            } else {
                pixels_per_point
            };
            raster::color_image(&vector, scale)
        });
        match image {
            Ok(image) => {
                let texture =
                    ctx.load_texture("external_document", image, egui::TextureOptions::LINEAR);
                let id = texture.id();
                self.document_texture = Some((key, texture));
                Some(id)
            }
            Err(err) => {
                error!("failed to rasterize external document: {err}");
                self.failed_texture = Some(key);
                self.surface_error = Some(err.to_string());
                None
            }
        }
    }

    fn draw_canvas(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::drag());
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, Color32::from_gray(245));

        let to_canvas = |pos: Pos2| (pos - rect.min).to_pos2();
        if response.drag_started() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.controller.pointer_down(to_canvas(pos));
            }
        }
        if response.dragged() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.controller.pointer_move(to_canvas(pos));
            }
        }
        if response.drag_stopped() {
            self.controller.pointer_up();
        } else if self.controller.is_dragging() && !response.contains_pointer() {
            self.controller.pointer_leave();
        }

        if self.visualization.is_empty() {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Open a Newick tree or SVG document to begin",
                FontId::proportional(16.0),
                Color32::GRAY,
            );
            return;
        }

        self.ensure_scene(rect.size());
        let Some(scene) = self.scene.take() else {
            return;
        };
        // Pan and zoom come from the live viewport; the scene is not rebuilt for them.
        let transform = self.controller.state().transform();
        let to_screen = |pos: Pos2| rect.min + transform.apply(pos).to_vec2();
        let scale = transform.scale;

        for primitive in &scene.primitives {
            match primitive {
                ScenePrimitive::FillRect { rect: area, color } => {
                    let screen = Rect::from_min_max(to_screen(area.min), to_screen(area.max));
                    painter.rect_filled(screen, 0.0, *color);
                }
                ScenePrimitive::StrokeLine { from, to, style } => {
                    painter.line_segment(
                        [to_screen(*from), to_screen(*to)],
                        Stroke::new(style.width * scale, style.color),
                    );
                }
                ScenePrimitive::StrokePolyline { points, style } => {
                    let points: Vec<Pos2> = points.iter().map(|p| to_screen(*p)).collect();
                    painter.add(egui::Shape::line(
                        points,
                        Stroke::new(style.width * scale, style.color),
                    ));
                }
                ScenePrimitive::Text {
                    text,
                    anchor,
                    align,
                    size,
                    color,
                } => {
                    painter.text(
                        to_screen(*anchor),
                        *align,
                        text,
                        FontId::proportional(size * scale),
                        *color,
                    );
                }
                ScenePrimitive::Embedded {
                    markup,
                    rect: area,
                } => {
                    let screen = Rect::from_min_max(to_screen(area.min), to_screen(area.max));
                    if let Some(texture) = self.document_texture(ui.ctx(), markup, screen.size()) {
                        painter.image(
                            texture,
                            screen,
                            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                            Color32::WHITE,
                        );
                    }
                }
            }
        }
        self.scene = Some(scene);
    }

    fn draw_status(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if let Some(path) = &self.input_path {
                ui.label(format!("Current file: {}", path.display()));
                ui.separator();
            }
            if let Some(loaded) = self.visualization.current_tree() {
                ui.label(format!(
                    "{} leaves, depth {:.4}",
                    loaded.layout.leaf_count, loaded.layout.max_depth
                ));
                ui.separator();
            }
            let state = self.controller.state();
            ui.label(format!(
                "{} | {} | zoom {:.2}",
                state.render_mode.name(),
                state.color_scheme,
                state.scale
            ));
            match &self.status {
                Some(StatusMessage::Info(message)) => {
                    ui.separator();
                    ui.label(message);
                }
                Some(StatusMessage::Error(message)) => {
                    ui.separator();
                    ui.colored_label(Color32::from_rgb(200, 0, 0), message);
                }
                None => {}
            }
        });
    }

    fn draw_surface_error(&mut self, ctx: &egui::Context) {
        let Some(message) = self.surface_error.clone() else {
            return;
        };
        let mut acknowledged = false;
        egui::Window::new("Drawing surface unavailable")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(8.0);
                ui.label("Try a smaller tree, a lower zoom or a smaller window.");
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    acknowledged = true;
                }
            });
        if acknowledged {
            self.surface_error = None;
            self.controller.reset();
        }
    }
}

/// Pixel size of a texture covering `size` points, shrunk uniformly so that
/// neither edge exceeds `max_edge`.
fn texture_size_px(size: Vec2, pixels_per_point: f32, max_edge: f32) -> [u32; 2] {
    let wanted = size * pixels_per_point;
    let longest = wanted.x.max(wanted.y);
    let shrink = if longest > max_edge {
        max_edge / longest
    } else {
        1.0
    };
    [
        (wanted.x * shrink).round().max(1.0) as u32,
        (wanted.y * shrink).round().max(1.0) as u32,
    ]
}

impl eframe::App for TreeViewerGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.consume_dropped_files(ctx);
        let blocked = self.surface_error.is_some();

        egui::TopBottomPanel::top("viewer_toolbar").show(ctx, |ui| {
            ui.add_enabled_ui(!blocked, |ui| self.draw_toolbar(ui));
        });

        egui::TopBottomPanel::bottom("viewer_status").show(ctx, |ui| {
            self.draw_status(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if blocked {
                ui.disable();
            }
            self.draw_canvas(ui);
        });

        self.draw_surface_error(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_size_follows_pixels_per_point() {
        assert_eq!(texture_size_px(Vec2::new(400.0, 300.0), 2.0, 8192.0), [800, 600]);
    }

    #[test]
    fn zoomed_document_texture_stays_within_the_limit() {
        let size = texture_size_px(Vec2::new(9000.0, 3000.0), 2.0, MAX_SURFACE_EDGE);
        assert_eq!(size, [16384, 5461]);
        assert_eq!(texture_size_px(Vec2::new(0.2, 0.2), 1.0, 64.0), [1, 1]);
    }
}
