//! Export of the current view as vector markup, raster image or Newick text.
//!
//! Every format first produces an [`ExportPayload`]; [`write_export`] is the
//! only place that touches the filesystem.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tree::scene_graph::TreeSceneGraph;

pub mod raster;
pub mod svg;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize vector document: {0}")]
    Serialize(String),
    #[error("failed to decode vector document: {0}")]
    Decode(String),
    #[error("raster surface unavailable: {0}")]
    Surface(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("nothing to export")]
    NothingToExport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportKind {
    Svg,
    Png,
    Newick,
}

impl ExportKind {
    pub const ALL: [ExportKind; 3] = [ExportKind::Svg, ExportKind::Png, ExportKind::Newick];

    pub fn extension(self) -> &'static str {
        match self {
            ExportKind::Svg => "svg",
            ExportKind::Png => "png",
            ExportKind::Newick => "nwk",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportKind::Svg => "image/svg+xml",
            ExportKind::Png => "image/png",
            ExportKind::Newick => "text/plain",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportKind::Svg => "SVG image",
            ExportKind::Png => "PNG image",
            ExportKind::Newick => "Newick tree",
        }
    }

    pub fn default_file_name(self) -> String {
        format!("tree.{}", self.extension())
    }

    /// Guess the format from a file name's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "svg" => Some(ExportKind::Svg),
            "png" => Some(ExportKind::Png),
            "nwk" | "newick" | "tree" | "tre" | "txt" => Some(ExportKind::Newick),
            _ => None,
        }
    }
}

/// Encoded bytes ready to be written or handed to a download.
#[derive(Debug, Clone)]
pub struct ExportPayload {
    pub kind: ExportKind,
    pub bytes: Vec<u8>,
}

pub fn export_vector(scene: &TreeSceneGraph) -> Result<ExportPayload, ExportError> {
    if scene.primitives.is_empty() {
        return Err(ExportError::NothingToExport);
    }
    let markup = svg::scene_to_svg(scene);
    if markup.is_empty() {
        return Err(ExportError::Serialize("empty document".to_string()));
    }
    Ok(ExportPayload {
        kind: ExportKind::Svg,
        bytes: markup.into_bytes(),
    })
}

/// Rasterize `vector` (SVG markup) at `scale` device pixels per unit.
///
/// Decoding and encoding are separate steps so a decode failure is never
/// reported as an empty image.
pub fn export_raster(vector: &[u8], scale: f32) -> Result<ExportPayload, ExportError> {
    let markup = std::str::from_utf8(vector).map_err(|err| ExportError::Decode(err.to_string()))?;
    let decoded = raster::decode(markup)?;
    let bytes = raster::encode(&decoded, scale)?;
    log::debug!("encoded {} byte PNG at scale {scale}", bytes.len());
    Ok(ExportPayload {
        kind: ExportKind::Png,
        bytes,
    })
}

/// The tree's source text, byte for byte.
pub fn export_text(newick: &str) -> Result<ExportPayload, ExportError> {
    if newick.trim().is_empty() {
        return Err(ExportError::NothingToExport);
    }
    Ok(ExportPayload {
        kind: ExportKind::Newick,
        bytes: newick.as_bytes().to_vec(),
    })
}

/// Sibling file that is removed unless the write completes.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Write `payload` to `path`, replacing it only once every byte is on disk.
pub fn write_export(payload: &ExportPayload, path: &Path) -> Result<(), ExportError> {
    let io_error = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut partial_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    partial_name.push(".part");
    let mut partial = PartialFile {
        path: path.with_file_name(partial_name),
        committed: false,
    };

    let mut file = fs::File::create(&partial.path).map_err(io_error)?;
    file.write_all(&payload.bytes).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);

    fs::rename(&partial.path, path).map_err(io_error)?;
    partial.committed = true;

    log::info!(
        "exported {} ({} bytes) to {}",
        payload.kind.label(),
        payload.bytes.len(),
        path.display()
    );
    Ok(())
}
