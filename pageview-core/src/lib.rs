//! Document viewing core: layout, zoom and pan, tiled page rendering, text
//! selection and navigation, independent of any particular document backend or
//! display surface.

pub mod cancel;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod geometry;
pub mod image_cache;
pub mod layout;
pub mod lazy;
pub mod links;
pub mod navigation;
pub mod registry;
pub mod selection;
pub mod state;
pub mod text;
pub mod transform;
pub mod viewer;

#[cfg(test)]
mod testing;

pub use cancel::CancellationToken;
pub use command::Command;
pub use config::{Color, ViewerConfig};
pub use document::{
    document_id_for_path, AnnotationMode, DocumentId, DocumentPermissions, DocumentProvider,
    DocumentService, DocumentSource, PageInfo, RegionRenderRequest, RenderFlags, RenderImage,
};
pub use error::{DocumentFailure, ViewerError};
pub use events::{EventQueue, ViewerEvent};
pub use geometry::{Point, Rect, Size, Transform};
pub use image_cache::{PartialImage, PreviewImage};
pub use layout::{HorizontalLayout, PageLayout, PageLayoutStrategy, VerticalLayout};
pub use links::{Link, LinkTarget};
pub use navigation::{Destination, DestinationCommand, PageAnchor};
pub use registry::DocumentRegistry;
pub use selection::{ClipboardSink, TextPosition, TextSelection};
pub use state::{FileStateStore, MemoryStateStore, PersistedViewState, SavedLayout, StateStore};
pub use text::{PageText, TextChar, TextDirection, TextFragment};
pub use transform::{ClampToDocument, NormalizeContext, TransformNormalizer, ZoomStops};
pub use viewer::{FrameSnapshot, GotoOutcome, Viewer, ViewerBuilder, VisiblePage};
