use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::links::Link;
use crate::text::PageText;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c1f6e-5d0b-5b7e-9a43-1f6a0d9c2e71").expect("valid namespace UUID")
});

/// Where a document comes from. Two equal sources refer to the same document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentSource {
    File(PathBuf),
    Memory { name: String, bytes: Arc<[u8]> },
}

impl DocumentSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DocumentSource::File(path.into())
    }

    /// Stable identifier, used to key persisted view state.
    pub fn id(&self) -> DocumentId {
        match self {
            DocumentSource::File(path) => document_id_for_path(path),
            DocumentSource::Memory { name, .. } => {
                Uuid::new_v5(&*DOCUMENT_NAMESPACE, format!("memory:{name}").as_bytes())
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            DocumentSource::Memory { name, .. } => name.clone(),
        }
    }
}

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// Intrinsic size of a page in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-based.
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
}

impl PageInfo {
    pub const fn new(page_number: u32, width: f64, height: f64) -> Self {
        Self {
            page_number,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentPermissions {
    pub allows_copying: bool,
}

impl Default for DocumentPermissions {
    fn default() -> Self {
        Self {
            allows_copying: true,
        }
    }
}

/// RGBA8 bitmap produced by the rendering service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Bytes accounted against the cache budget.
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    None,
    #[default]
    Annotations,
    AnnotationsAndForms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderFlags {
    pub grayscale: bool,
    pub dark_mode: bool,
}

/// One call into the rendering service: the `(x, y, width, height)` pixel region of
/// the page rendered as if the whole page were `full_width` x `full_height` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRenderRequest {
    pub page_number: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub full_width: u32,
    pub full_height: u32,
    pub background: [u8; 4],
    pub annotation_mode: AnnotationMode,
    pub flags: RenderFlags,
}

/// Opaque document collaborator: page geometry, rendering and text/link extraction.
#[async_trait]
pub trait DocumentService: Send + Sync {
    fn page_count(&self) -> u32;

    /// 1-based page lookup.
    fn page(&self, page_number: u32) -> Option<PageInfo>;

    fn permissions(&self) -> DocumentPermissions {
        DocumentPermissions::default()
    }

    fn pages(&self) -> Vec<PageInfo> {
        (1..=self.page_count())
            .filter_map(|number| self.page(number))
            .collect()
    }

    /// Returns `Ok(None)` when the render was canceled through `token`.
    async fn render_region(
        &self,
        request: RegionRenderRequest,
        token: &CancellationToken,
    ) -> Result<Option<RenderImage>>;

    async fn load_text(&self, page_number: u32) -> Result<PageText>;

    async fn load_links(&self, page_number: u32) -> Result<Vec<Link>>;
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentService>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn document_id_is_stable_for_same_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();

        let first = DocumentSource::file(&file_path).id();
        let second = document_id_for_path(&file_path);

        assert_eq!(first, second);
    }

    #[test]
    fn memory_sources_compare_by_value() {
        let bytes: Arc<[u8]> = Arc::from(&b"%PDF"[..]);
        let a = DocumentSource::Memory {
            name: "a.pdf".into(),
            bytes: Arc::clone(&bytes),
        };
        let b = DocumentSource::Memory {
            name: "a.pdf".into(),
            bytes: Arc::from(&b"%PDF"[..]),
        };
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.display_name(), "a.pdf");
    }

    #[test]
    fn image_byte_size_counts_rgba() {
        let image = RenderImage::filled(3, 2, [1, 2, 3, 4]);
        assert_eq!(image.byte_size(), 24);
        assert_eq!(image.pixels.len(), 24);
        assert_eq!(&image.pixels[4..8], &[1, 2, 3, 4]);
    }
}
