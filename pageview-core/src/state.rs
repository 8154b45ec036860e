//! Reading position kept across runs, keyed by document id.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::DocumentId;
use crate::geometry::{Point, Size};
use crate::layout::PageLayout;

/// Record format written by [`FileStateStore`]. Files without a version predate the
/// offset and layout fields.
const STATE_VERSION: u32 = 2;

/// Geometry of the layout a position was saved under. An exact offset is only
/// meaningful when the document is laid out the same way again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedLayout {
    pub page_count: u32,
    pub document_size: Size,
}

impl SavedLayout {
    pub fn of(layout: &PageLayout) -> Self {
        Self {
            page_count: layout.page_count(),
            document_size: layout.document_size,
        }
    }

    pub fn matches(&self, layout: &PageLayout) -> bool {
        let size = layout.document_size;
        self.page_count == layout.page_count()
            && (self.document_size.width - size.width).abs() < 0.5
            && (self.document_size.height - size.height).abs() < 0.5
    }
}

/// Position restored when a document is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedViewState {
    pub page_number: u32,
    pub zoom: f64,
    /// Page-local point shown at the viewport's top-left corner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<SavedLayout>,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            page_number: 1,
            zoom: 1.0,
            offset: None,
            layout: None,
        }
    }
}

impl PersistedViewState {
    pub fn at_page(page_number: u32, zoom: f64) -> Self {
        Self {
            page_number,
            zoom,
            ..Self::default()
        }
    }

    /// The exact offset, when it was saved under a layout equal to `layout`.
    pub fn offset_for(&self, layout: &PageLayout) -> Option<Point> {
        self.offset
            .filter(|_| self.layout.is_some_and(|saved| saved.matches(layout)))
    }

    /// Replaces values a hand-edited or damaged file could carry.
    fn sanitized(mut self) -> Self {
        self.page_number = self.page_number.max(1);
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            self.zoom = 1.0;
        }
        if self
            .offset
            .is_some_and(|offset| !offset.x.is_finite() || !offset.y.is_finite())
        {
            self.offset = None;
        }
        self
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>>;
    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct StateRecord {
    #[serde(default = "first_version")]
    version: u32,
    #[serde(flatten)]
    view: PersistedViewState,
}

fn first_version() -> u32 {
    1
}

/// One JSON record per document, named by its id and replaced atomically.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>> {
        let path = self.state_path(id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open state file {:?}", path))
            }
        };
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let record: StateRecord = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        if record.version > STATE_VERSION {
            warn!(
                version = record.version,
                ?path,
                "state file written by a newer version, ignored"
            );
            return Ok(None);
        }
        Ok(Some(record.view.sanitized()))
    }

    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()> {
        let path = self.state_path(id);
        let tmp = path.with_extension("json.tmp");
        let record = StateRecord {
            version: STATE_VERSION,
            view: *state,
        };
        let payload = serde_json::to_string_pretty(&record)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace state file {:?}", path))?;
        debug!(%id, page = state.page_number, zoom = state.zoom, "view state saved");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(id).copied())
    }

    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(*id, *state);
        Ok(())
    }
}
