use std::collections::BTreeMap;

use clap::ValueEnum;
use eframe::egui::{Pos2, Vec2};
use log::{debug, warn};

use super::external::ExternalDocument;
use super::layout::TreeLayout;
use super::painter::ColorScheme;
use super::scene_graph::{RenderSource, ViewTransform};
use super::Tree;

/// Which visual representation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RenderModeKind {
    /// Drawn from the parsed tree.
    #[default]
    Computed,
    /// The externally supplied vector document.
    #[value(name = "external")]
    ExternalVectorDocument,
}

impl RenderModeKind {
    pub fn name(self) -> &'static str {
        match self {
            RenderModeKind::Computed => "computed",
            RenderModeKind::ExternalVectorDocument => "external",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "computed" => Some(RenderModeKind::Computed),
            "external" => Some(RenderModeKind::ExternalVectorDocument),
            _ => None,
        }
    }
}

/// A parsed and laid-out tree with the text it was parsed from.
#[derive(Debug, Clone)]
pub struct LoadedTree {
    pub tree: Tree,
    pub layout: TreeLayout,
    pub newick: String,
}

impl LoadedTree {
    pub fn from_parsed(mut tree: Tree, newick: String) -> Self {
        let layout = TreeLayout::compute(&mut tree);
        Self {
            tree,
            layout,
            newick,
        }
    }

    #[cfg(test)]
    pub fn parse(text: &str) -> Result<Self, super::newick::ParseError> {
        let tree = super::newick::parse(text)?;
        Ok(Self::from_parsed(tree, text.to_string()))
    }
}

/// The inputs of one viewing session.
#[derive(Debug, Clone, Default)]
pub struct Visualization {
    trees: Vec<LoadedTree>,
    current_tree_index: usize,
    document: Option<ExternalDocument>,
}

impl Visualization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trees(&mut self, trees: Vec<LoadedTree>) {
        debug!("replacing {} tree(s) with {}", self.trees.len(), trees.len());
        self.trees = trees;
        self.current_tree_index = 0;
    }

    pub fn set_document(&mut self, document: ExternalDocument) {
        self.document = Some(document);
    }

    pub fn trees(&self) -> &[LoadedTree] {
        &self.trees
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn current_tree(&self) -> Option<&LoadedTree> {
        self.trees.get(self.current_tree_index)
    }

    pub fn current_tree_index(&self) -> usize {
        self.current_tree_index
    }

    pub fn show_next_tree(&mut self) {
        if self.current_tree_index + 1 < self.trees.len() {
            self.current_tree_index += 1;
        }
    }

    pub fn show_previous_tree(&mut self) {
        self.current_tree_index = self.current_tree_index.saturating_sub(1);
    }

    pub fn document(&self) -> Option<&ExternalDocument> {
        self.document.as_ref()
    }

    pub fn supports(&self, mode: RenderModeKind) -> bool {
        match mode {
            RenderModeKind::Computed => self.current_tree().is_some(),
            RenderModeKind::ExternalVectorDocument => self.document.is_some(),
        }
    }

    /// Computed when a tree exists, otherwise the external document.
    pub fn preferred_mode(&self) -> RenderModeKind {
        if self.supports(RenderModeKind::Computed) {
            RenderModeKind::Computed
        } else {
            RenderModeKind::ExternalVectorDocument
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.document.is_none()
    }

    pub fn source(&self, mode: RenderModeKind) -> Option<RenderSource<'_>> {
        match mode {
            RenderModeKind::Computed => self.current_tree().map(|loaded| RenderSource::Computed {
                tree: &loaded.tree,
                layout: &loaded.layout,
            }),
            RenderModeKind::ExternalVectorDocument => {
                self.document.as_ref().map(RenderSource::External)
            }
        }
    }
}

/// Zoom range and button step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerConfig {
    pub min_scale: f32,
    pub max_scale: f32,
    pub zoom_step: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.5,
            max_scale: 3.0,
            zoom_step: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub scale: f32,
    pub offset: Vec2,
    pub color_scheme: ColorScheme,
    pub render_mode: RenderModeKind,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
            color_scheme: ColorScheme::Default,
            render_mode: RenderModeKind::Computed,
        }
    }
}

impl ViewportState {
    pub fn transform(&self) -> ViewTransform {
        ViewTransform {
            scale: self.scale,
            offset: self.offset,
        }
    }

    pub fn to_settings(&self) -> BTreeMap<String, String> {
        let mut settings = BTreeMap::new();
        settings.insert("viewer.scale".to_string(), format!("{:.6}", self.scale));
        settings.insert("viewer.offsetX".to_string(), format!("{:.3}", self.offset.x));
        settings.insert("viewer.offsetY".to_string(), format!("{:.3}", self.offset.y));
        settings.insert(
            "viewer.colorScheme".to_string(),
            self.color_scheme.name().to_string(),
        );
        settings.insert(
            "viewer.renderMode".to_string(),
            self.render_mode.name().to_string(),
        );
        settings
    }

    /// Apply known keys; unknown keys are ignored and malformed values are
    /// skipped with a warning.
    pub fn apply_settings(&mut self, settings: &BTreeMap<String, String>) {
        fn number(settings: &BTreeMap<String, String>, key: &str) -> Option<f32> {
            let raw = settings.get(key)?;
            match raw.trim().parse::<f32>() {
                Ok(value) if value.is_finite() => Some(value),
                _ => {
                    warn!("ignoring malformed setting {key}={raw}");
                    None
                }
            }
        }

        if let Some(v) = number(settings, "viewer.scale") {
            self.scale = v;
        }
        if let Some(v) = number(settings, "viewer.offsetX") {
            self.offset.x = v;
        }
        if let Some(v) = number(settings, "viewer.offsetY") {
            self.offset.y = v;
        }
        if let Some(raw) = settings.get("viewer.colorScheme") {
            match ColorScheme::from_name(raw) {
                Some(scheme) => self.color_scheme = scheme,
                None => warn!("ignoring malformed setting viewer.colorScheme={raw}"),
            }
        }
        if let Some(raw) = settings.get("viewer.renderMode") {
            match RenderModeKind::from_name(raw) {
                Some(mode) => self.render_mode = mode,
                None => warn!("ignoring malformed setting viewer.renderMode={raw}"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragState {
    Idle,
    /// `grab` is the pointer position minus the offset at pointer-down.
    Dragging { grab: Vec2 },
}

/// Sole writer of [`ViewportState`]: turns pointer and control events into
/// pan, zoom, colour-scheme and render-mode changes.
#[derive(Debug, Clone)]
pub struct ViewportController {
    state: ViewportState,
    config: ViewerConfig,
    drag: DragState,
}

impl ViewportController {
    pub fn with_state(config: ViewerConfig, mut state: ViewportState) -> Self {
        state.scale = state.scale.clamp(config.min_scale, config.max_scale);
        Self {
            state,
            config,
            drag: DragState::Idle,
        }
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging { .. })
    }

    pub fn pointer_down(&mut self, position: Pos2) {
        self.drag = DragState::Dragging {
            grab: position.to_vec2() - self.state.offset,
        };
    }

    pub fn pointer_move(&mut self, position: Pos2) {
        if let DragState::Dragging { grab } = self.drag {
            self.state.offset = position.to_vec2() - grab;
        }
    }

    pub fn pointer_up(&mut self) {
        self.drag = DragState::Idle;
    }

    pub fn pointer_leave(&mut self) {
        self.drag = DragState::Idle;
    }

    pub fn zoom_in(&mut self) {
        self.set_scale(self.state.scale + self.config.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.set_scale(self.state.scale - self.config.zoom_step);
    }

    pub fn set_scale(&mut self, scale: f32) {
        if scale.is_finite() {
            self.state.scale = scale.clamp(self.config.min_scale, self.config.max_scale);
        }
    }

    pub fn reset(&mut self) {
        self.set_scale(1.0);
        self.state.offset = Vec2::ZERO;
    }

    pub fn set_color_scheme(&mut self, scheme: ColorScheme) {
        self.state.color_scheme = scheme;
    }

    /// Switch representation when the session can provide it. Scale and
    /// offset are preserved.
    pub fn set_render_mode(&mut self, mode: RenderModeKind, visualization: &Visualization) -> bool {
        if !visualization.supports(mode) {
            return false;
        }
        self.state.render_mode = mode;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVG: &str = "<svg width='10' height='10'><line x1='0' y1='0' x2='1' y2='1'/></svg>";

    fn controller() -> ViewportController {
        ViewportController::with_state(ViewerConfig::default(), ViewportState::default())
    }

    fn with_trees(text: &str) -> Visualization {
        let mut visualization = Visualization::new();
        visualization.set_trees(crate::io::load_trees(text).unwrap());
        visualization
    }

    #[test]
    fn drag_updates_offset_relative_to_grab_point() {
        let mut c = controller();
        c.pointer_down(Pos2::new(100.0, 50.0));
        assert!(c.is_dragging());
        c.pointer_move(Pos2::new(130.0, 40.0));
        assert_eq!(c.state().offset, Vec2::new(30.0, -10.0));
        c.pointer_up();
        assert!(!c.is_dragging());

        // A second drag continues from the current offset.
        c.pointer_down(Pos2::new(0.0, 0.0));
        c.pointer_move(Pos2::new(5.0, 5.0));
        assert_eq!(c.state().offset, Vec2::new(35.0, -5.0));
        c.pointer_leave();
        assert!(!c.is_dragging());
    }

    #[test]
    fn moves_while_idle_are_ignored() {
        let mut c = controller();
        c.pointer_move(Pos2::new(40.0, 40.0));
        assert_eq!(c.state().offset, Vec2::ZERO);
    }

    #[test]
    fn last_move_wins() {
        let mut c = controller();
        c.pointer_down(Pos2::new(10.0, 10.0));
        for step in 0..20 {
            c.pointer_move(Pos2::new(10.0 + step as f32, 10.0));
        }
        assert_eq!(c.state().offset, Vec2::new(19.0, 0.0));
    }

    #[test]
    fn reset_after_drag_returns_to_origin() {
        for (dx, dy) in [(3.0, 4.0), (-250.0, 17.5), (0.0, 0.0)] {
            let mut c = controller();
            c.zoom_in();
            c.pointer_down(Pos2::new(0.0, 0.0));
            c.pointer_move(Pos2::new(dx, dy));
            c.pointer_up();
            c.reset();
            assert_eq!(c.state().offset, Vec2::ZERO);
            assert_eq!(c.state().scale, 1.0);
        }
    }

    #[test]
    fn zoom_is_clamped() {
        let mut c = controller();
        for _ in 0..50 {
            c.zoom_in();
        }
        assert_eq!(c.state().scale, 3.0);
        for _ in 0..50 {
            c.zoom_out();
        }
        assert_eq!(c.state().scale, 0.5);
        c.set_scale(1.75);
        assert_eq!(c.state().scale, 1.75);
        c.set_scale(f32::NAN);
        assert_eq!(c.state().scale, 1.75);
    }

    #[test]
    fn render_mode_requires_matching_input() {
        let mut visualization = with_trees("(A:1,B:2);");

        let mut c = controller();
        c.set_scale(2.0);
        assert!(!c.set_render_mode(RenderModeKind::ExternalVectorDocument, &visualization));
        assert_eq!(c.state().render_mode, RenderModeKind::Computed);

        visualization.set_document(ExternalDocument::new(SVG).unwrap());
        c.pointer_down(Pos2::ZERO);
        c.pointer_move(Pos2::new(7.0, 8.0));
        assert!(c.set_render_mode(RenderModeKind::ExternalVectorDocument, &visualization));
        assert_eq!(c.state().render_mode, RenderModeKind::ExternalVectorDocument);
        assert_eq!(c.state().scale, 2.0);
        assert_eq!(c.state().offset, Vec2::new(7.0, 8.0));
    }

    #[test]
    fn replacing_trees_rewinds_to_the_first() {
        let mut visualization = with_trees("(A:1,B:2);(C,D);");
        visualization.show_next_tree();
        assert_eq!(visualization.current_tree_index(), 1);
        visualization.set_trees(crate::io::load_trees("(E,F);(G,H);(I,J);").unwrap());
        assert_eq!(visualization.tree_count(), 3);
        assert_eq!(visualization.current_tree_index(), 0);
        assert_eq!(visualization.current_tree().unwrap().newick, "(E,F);");
    }

    #[test]
    fn tree_navigation_stays_in_bounds() {
        let mut visualization = with_trees("(A,B);(C,D);");
        visualization.show_previous_tree();
        assert_eq!(visualization.current_tree_index(), 0);
        visualization.show_next_tree();
        visualization.show_next_tree();
        assert_eq!(visualization.current_tree_index(), 1);
    }

    #[test]
    fn source_matches_mode() {
        let mut visualization = Visualization::new();
        assert!(visualization.source(RenderModeKind::Computed).is_none());
        assert_eq!(
            visualization.preferred_mode(),
            RenderModeKind::ExternalVectorDocument
        );
        visualization.set_trees(crate::io::load_trees("(A,B);").unwrap());
        assert!(matches!(
            visualization.source(RenderModeKind::Computed),
            Some(RenderSource::Computed { .. })
        ));
        assert!(visualization
            .source(RenderModeKind::ExternalVectorDocument)
            .is_none());
    }

    #[test]
    fn settings_round_trip() {
        let state = ViewportState {
            scale: 1.5,
            offset: Vec2::new(-12.0, 30.5),
            color_scheme: ColorScheme::Grayscale,
            render_mode: RenderModeKind::ExternalVectorDocument,
        };
        let mut restored = ViewportState::default();
        restored.apply_settings(&state.to_settings());
        assert_eq!(restored, state);
    }

    #[test]
    fn malformed_settings_are_ignored() {
        let mut settings = BTreeMap::new();
        settings.insert("viewer.scale".to_string(), "huge".to_string());
        settings.insert("viewer.colorScheme".to_string(), "sepia".to_string());
        settings.insert("viewer.unknown".to_string(), "1".to_string());
        settings.insert("viewer.offsetY".to_string(), "4".to_string());

        let mut state = ViewportState::default();
        state.apply_settings(&settings);
        assert_eq!(state.scale, 1.0);
        assert_eq!(state.color_scheme, ColorScheme::Default);
        assert_eq!(state.offset, Vec2::new(0.0, 4.0));
    }

    #[test]
    fn restored_scale_is_clamped() {
        let mut settings = BTreeMap::new();
        settings.insert("viewer.scale".to_string(), "12".to_string());
        let mut state = ViewportState::default();
        state.apply_settings(&settings);
        let c = ViewportController::with_state(ViewerConfig::default(), state);
        assert_eq!(c.state().scale, 3.0);
    }
}
