//! The viewer: one owner for the transform, layout, image cache, text and link caches
//! and the selection of a single view onto a document.
//!
//! Lock order is view state first, image cache second; the state lock is always
//! released before calling into the image cache and never held across `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::command::Command;
use crate::config::ViewerConfig;
use crate::document::{DocumentProvider, DocumentService, DocumentSource, PageInfo};
use crate::error::{DocumentFailure, ViewerError};
use crate::events::{EventQueue, ViewerEvent};
use crate::geometry::{ease_in_out, Point, Rect, Size, Transform};
use crate::image_cache::{CacheSettings, PageImageCache, PartialImage, PreviewImage};
use crate::layout::{PageLayout, PageLayoutStrategy, VerticalLayout};
use crate::lazy::LazyPageCache;
use crate::links::{self, Link, LinkTarget};
use crate::navigation::{
    self, clamp_page_target, transform_for_area, transform_for_destination, Destination,
    PageAnchor,
};
use crate::selection::{ClipboardSink, TextPosition, TextSelection};
use crate::state::{PersistedViewState, SavedLayout};
use crate::text::PageText;
use crate::transform::{
    alternative_fit_scale, clamp_zoom, cover_scale, minimum_scale, ClampToDocument,
    NormalizeContext, TransformNormalizer, ZoomStops,
};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// How an animated transition ended. Being superseded by a newer one is normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoOutcome {
    Completed,
    Superseded,
}

/// A page intersecting the visible rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisiblePage {
    pub page_number: u32,
    /// Document-space placement.
    pub rect: Rect,
    pub info: PageInfo,
}

/// Everything the compositor needs besides the bitmaps themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub viewport: Size,
    pub transform: Transform,
    pub background: [u8; 4],
    pub pages: Vec<VisiblePage>,
    /// Document-space selection highlights.
    pub highlights: Vec<Rect>,
    pub failure: Option<DocumentFailure>,
}

/// Layout rectangle of a page together with its intrinsic size.
#[derive(Debug, Clone, Copy)]
struct PageFrame {
    rect: Rect,
    info: PageInfo,
}

impl PageFrame {
    /// Document units per page unit.
    fn ratio(&self) -> f64 {
        if self.info.width > 0.0 {
            self.rect.width() / self.info.width
        } else {
            1.0
        }
    }

    fn point_to_page(&self, point: Point) -> Point {
        let ratio = self.ratio();
        Point::new(
            (point.x - self.rect.left) / ratio,
            (point.y - self.rect.top) / ratio,
        )
    }

    fn rect_to_page(&self, rect: &Rect) -> Rect {
        rect.to_page_local(&self.rect).scale(1.0 / self.ratio())
    }

    fn rect_to_document(&self, rect: &Rect) -> Rect {
        rect.scale(self.ratio()).from_page_local(&self.rect)
    }
}

struct ViewState {
    document: Option<Arc<dyn DocumentService>>,
    source: Option<DocumentSource>,
    pages: Vec<PageInfo>,
    epoch: u64,
    failure: Option<DocumentFailure>,
    viewport: Size,
    layout: Option<Arc<PageLayout>>,
    transform: Transform,
    min_scale: f64,
    zoom_stops: ZoomStops,
    goto_target: Option<u32>,
    /// True from an explicit navigation until the view reaches `goto_target`.
    navigating: bool,
    current_page: Option<u32>,
    ready: bool,
    selection: TextSelection,
    disposed: bool,
}

impl ViewState {
    fn layout(&self) -> Result<&PageLayout, ViewerError> {
        match (&self.document, &self.layout) {
            (None, _) => Err(ViewerError::NoDocument),
            (Some(_), None) => Err(ViewerError::NotReady),
            (Some(_), Some(layout)) => Ok(layout.as_ref()),
        }
    }

    fn page_frame(&self, page_number: u32) -> Option<PageFrame> {
        let rect = self.layout.as_ref()?.page_rect(page_number)?;
        let info = *self.pages.get(page_number.checked_sub(1)? as usize)?;
        Some(PageFrame { rect, info })
    }

    fn visible_rect(&self) -> Rect {
        self.transform.visible_rect(self.viewport)
    }
}

struct RefreshPlan {
    layout: Arc<PageLayout>,
    retained: Vec<u32>,
    previews: Vec<(PageInfo, f64)>,
    partials: Vec<(PageInfo, f64, Rect)>,
    idle_partials: Vec<u32>,
    center: Point,
}

struct ViewerInner {
    config: ViewerConfig,
    layout_strategy: Arc<dyn PageLayoutStrategy>,
    normalizer: Arc<dyn TransformNormalizer>,
    state: Mutex<ViewState>,
    images: PageImageCache,
    texts: LazyPageCache<PageText>,
    links: LazyPageCache<Vec<Link>>,
    events: Arc<EventQueue>,
    animation: AtomicU64,
}

pub struct ViewerBuilder {
    config: ViewerConfig,
    layout_strategy: Arc<dyn PageLayoutStrategy>,
    normalizer: Arc<dyn TransformNormalizer>,
}

impl ViewerBuilder {
    pub fn layout(mut self, strategy: impl PageLayoutStrategy + 'static) -> Self {
        self.layout_strategy = Arc::new(strategy);
        self
    }

    pub fn normalizer(mut self, normalizer: impl TransformNormalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Must run inside a tokio runtime for page renders to be scheduled.
    pub fn build(self) -> Viewer {
        let events = Arc::new(EventQueue::new());
        let images = PageImageCache::new(
            CacheSettings::from_config(&self.config),
            Arc::clone(&events),
        );
        let state = ViewState {
            document: None,
            source: None,
            pages: Vec::new(),
            epoch: 0,
            failure: None,
            viewport: Size::default(),
            layout: None,
            transform: Transform::IDENTITY,
            min_scale: self.config.min_scale,
            zoom_stops: ZoomStops::default(),
            goto_target: None,
            navigating: false,
            current_page: None,
            ready: false,
            selection: TextSelection::new(),
            disposed: false,
        };
        Viewer {
            inner: Arc::new(ViewerInner {
                config: self.config,
                layout_strategy: self.layout_strategy,
                normalizer: self.normalizer,
                state: Mutex::new(state),
                images,
                texts: LazyPageCache::new(),
                links: LazyPageCache::new(),
                events,
                animation: AtomicU64::new(0),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Viewer {
    inner: Arc<ViewerInner>,
}

impl Viewer {
    pub fn builder(config: ViewerConfig) -> ViewerBuilder {
        ViewerBuilder {
            config,
            layout_strategy: Arc::new(VerticalLayout),
            normalizer: Arc::new(ClampToDocument),
        }
    }

    pub fn new(config: ViewerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> Arc<EventQueue> {
        Arc::clone(&self.inner.events)
    }

    // Document lifecycle

    /// Replaces the document. Every cache is flushed and the selection cleared.
    pub fn set_document(
        &self,
        document: Option<Arc<dyn DocumentService>>,
        source: Option<DocumentSource>,
    ) {
        self.cancel_animation();
        let pages = document.as_ref().map(|d| d.pages()).unwrap_or_default();
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.epoch += 1;
            state.document = document.clone();
            state.source = source;
            state.pages = pages;
            state.failure = None;
            state.layout = None;
            state.ready = false;
            state.goto_target = None;
            state.navigating = false;
            state.current_page = None;
            state.selection.clear();
            state.zoom_stops = ZoomStops::default();
            state.min_scale = self.inner.config.min_scale;
            // same critical section as the epoch bump, so no load can pair the old
            // document with the new cells
            self.inner.texts.reset(state.epoch);
            self.inner.links.reset(state.epoch);
        }
        self.inner.images.set_document(document);
        self.inner.events.push(ViewerEvent::DocumentChanged);
        self.relayout();
    }

    /// Opens `source` through `provider`. A failure is kept as the document error
    /// until a later load succeeds.
    #[instrument(skip_all, fields(document = %source.display_name()))]
    pub async fn load_document(
        &self,
        provider: &dyn DocumentProvider,
        source: DocumentSource,
    ) -> Result<(), ViewerError> {
        match provider.open(&source).await {
            Ok(document) => {
                info!(pages = document.page_count(), "document loaded");
                self.set_document(Some(document), Some(source));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "document failed to load");
                let failure = DocumentFailure::from_error(&err);
                self.set_document(None, Some(source));
                self.inner.state.lock().failure = Some(failure.clone());
                self.inner.events.push(ViewerEvent::Invalidated);
                Err(ViewerError::DocumentLoad(failure.message))
            }
        }
    }

    pub fn close_document(&self) {
        self.set_document(None, None);
    }

    pub fn document(&self) -> Option<Arc<dyn DocumentService>> {
        self.inner.state.lock().document.clone()
    }

    pub fn source(&self) -> Option<DocumentSource> {
        self.inner.state.lock().source.clone()
    }

    pub fn document_error(&self) -> Option<DocumentFailure> {
        self.inner.state.lock().failure.clone()
    }

    pub fn page_count(&self) -> u32 {
        self.inner.state.lock().pages.len() as u32
    }

    // Viewport and transform

    pub fn set_viewport_size(&self, size: Size) {
        let old = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.viewport, size)
        };
        if old != size {
            self.inner
                .events
                .push(ViewerEvent::ViewSizeChanged { new: size, old });
        }
        self.relayout();
    }

    pub fn viewport_size(&self) -> Size {
        self.inner.state.lock().viewport
    }

    pub fn transform(&self) -> Transform {
        self.inner.state.lock().transform
    }

    pub fn layout(&self) -> Option<Arc<PageLayout>> {
        self.inner.state.lock().layout.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    pub fn min_scale(&self) -> f64 {
        self.inner.state.lock().min_scale
    }

    pub fn zoom_stops(&self) -> ZoomStops {
        self.inner.state.lock().zoom_stops.clone()
    }

    pub fn visible_rect(&self) -> Rect {
        self.inner.state.lock().visible_rect()
    }

    /// Visible rectangle grown by the configured pre-fetch ratios.
    pub fn cache_extent_rect(&self) -> Rect {
        let visible = self.visible_rect();
        self.cache_extent(&visible)
    }

    pub fn viewport_to_document(&self, point: Point) -> Point {
        self.inner.state.lock().transform.to_document(point)
    }

    pub fn current_page(&self) -> Option<u32> {
        self.inner.state.lock().current_page
    }

    /// Commits `transform` after normalization, interrupting any animation.
    pub fn set_transform(&self, transform: Transform) {
        self.cancel_animation();
        self.update_transform(|_| transform);
    }

    /// Pans by a viewport-pixel delta. Ignored when panning is disabled.
    pub fn scroll_by(&self, dx: f64, dy: f64) {
        if !self.inner.config.pan_enabled {
            return;
        }
        self.cancel_animation();
        self.update_transform(|current| {
            Transform::new(
                current.scale,
                current.translate_x - dx,
                current.translate_y - dy,
            )
        });
    }

    /// Multiplies the zoom by `factor`, keeping the document point under the viewport
    /// point `focus` in place. Ignored when zooming is disabled.
    pub fn zoom_at(&self, focus: Point, factor: f64) {
        if !self.inner.config.scale_enabled {
            return;
        }
        self.cancel_animation();
        self.update_transform(|current| {
            Transform::anchored(current.to_document(focus), focus, current.scale * factor)
        });
    }

    // Animated navigation

    /// Animates to `target` over `duration` with an ease-in-out curve. A newer call
    /// supersedes this one. Every frame is normalized before it is applied.
    pub async fn goto(&self, target: Transform, duration: Duration) -> GotoOutcome {
        let generation = self.inner.animation.fetch_add(1, Ordering::SeqCst) + 1;
        let (start, target) = {
            let state = self.inner.state.lock();
            (state.transform, self.normalize(&state, target))
        };

        if duration.is_zero() {
            self.update_transform(|_| target);
            return GotoOutcome::Completed;
        }

        let started = Instant::now();
        let mut frames = tokio::time::interval(FRAME_INTERVAL);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            frames.tick().await;
            if self.inner.animation.load(Ordering::SeqCst) != generation {
                trace!("transform animation superseded");
                return GotoOutcome::Superseded;
            }
            let progress = (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0);
            let frame = start.lerp(&target, ease_in_out(progress));
            self.update_transform(|_| frame);
            if progress >= 1.0 {
                return GotoOutcome::Completed;
            }
        }
    }

    /// Out-of-range pages are clamped; at or past the last page the end anchor is used.
    pub async fn go_to_page(
        &self,
        page_number: u32,
        anchor: PageAnchor,
        duration: Duration,
    ) -> Result<GotoOutcome, ViewerError> {
        let target = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let count = state.layout()?.page_count();
            let (page, anchor) =
                clamp_page_target(page_number, anchor, self.inner.config.end_anchor, count)
                    .ok_or(ViewerError::NoDocument)?;
            let zoom = self.retarget(state, page);
            let layout = state.layout()?;
            self.page_transform(layout, page, anchor, zoom, state.viewport)
                .ok_or(ViewerError::PageOutOfRange { page, count })?
        };
        debug!(page_number, ?anchor, "go to page");
        Ok(self.goto(target, duration).await)
    }

    /// Shows the page-local `area` of a page.
    pub async fn go_to_area(
        &self,
        page_number: u32,
        area: Rect,
        anchor: PageAnchor,
        duration: Duration,
    ) -> Result<GotoOutcome, ViewerError> {
        let target = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let count = state.layout()?.page_count();
            let page = page_number.clamp(1, count.max(1));
            let frame = state.page_frame(page).ok_or(ViewerError::PageOutOfRange {
                page: page_number,
                count,
            })?;
            let zoom = self.retarget(state, page);
            transform_for_area(&frame.rect_to_document(&area), anchor, zoom, state.viewport)
        };
        Ok(self.goto(target, duration).await)
    }

    pub async fn go_to_dest(
        &self,
        destination: Destination,
        duration: Duration,
    ) -> Result<GotoOutcome, ViewerError> {
        let target = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let count = state.layout()?.page_count();
            let page = destination.page_number.clamp(1, count.max(1));
            let frame = state.page_frame(page).ok_or(ViewerError::PageOutOfRange {
                page: destination.page_number,
                count,
            })?;
            let zoom = self.retarget(state, page);
            transform_for_destination(&destination.command, &frame.rect, zoom, state.viewport)
        };
        debug!(?destination, "go to destination");
        Ok(self.goto(target, duration).await)
    }

    /// Animates to the next zoom stop around the viewport center.
    pub async fn zoom_up(&self, wrap: bool) -> GotoOutcome {
        self.zoom_step(true, wrap).await
    }

    pub async fn zoom_down(&self, wrap: bool) -> GotoOutcome {
        self.zoom_step(false, wrap).await
    }

    async fn zoom_step(&self, up: bool, wrap: bool) -> GotoOutcome {
        if !self.inner.config.scale_enabled {
            return GotoOutcome::Completed;
        }
        let target = {
            let mut state = self.inner.state.lock();
            state.navigating = false;
            let current = state.transform.scale;
            let next = if up {
                state.zoom_stops.next(current, wrap)
            } else {
                state.zoom_stops.previous(current, wrap)
            };
            let Some(next) = next else {
                return GotoOutcome::Completed;
            };
            let center = state.transform.center_point(state.viewport);
            Transform::centered_on(center, next, state.viewport)
        };
        self.goto(target, self.inner.config.animation_duration).await
    }

    // Text and selection

    /// Loads a page's text once; concurrent callers share the load.
    pub async fn load_page_text(&self, page_number: u32) -> Result<Arc<PageText>, ViewerError> {
        if let Some(text) = self.inner.texts.cached(page_number) {
            return Ok(text);
        }
        let (document, epoch) = self.document_for_page(page_number)?;
        let text = self
            .inner
            .texts
            .load(epoch, page_number, move || async move {
                document.load_text(page_number).await
            })
            .await?
            .ok_or(ViewerError::DocumentChanged)?;
        self.ensure_epoch(epoch)?;
        trace!(page_number, chars = text.len(), "page text loaded");
        self.inner.events.push(ViewerEvent::Invalidated);
        Ok(text)
    }

    /// Character under (or within the hit margin of) a document-space point, on the
    /// page under the point or the nearest page.
    pub async fn hit_test_text(&self, point: Point) -> Result<Option<TextPosition>, ViewerError> {
        let (page_number, frame) = {
            let state = self.inner.state.lock();
            let layout = state.layout()?;
            let Some(page) = layout.page_at(point).or_else(|| layout.nearest_page(point)) else {
                return Ok(None);
            };
            match state.page_frame(page) {
                Some(frame) => (page, frame),
                None => return Ok(None),
            }
        };
        let text = self.load_page_text(page_number).await?;
        let local = frame.point_to_page(point);
        Ok(text
            .hit_test_char(local, self.inner.config.hit_margin)
            .map(|index| TextPosition::new(page_number, index)))
    }

    /// Starts a new selection at a document-space point. Returns false when no
    /// character is near the point.
    pub async fn begin_selection(&self, point: Point) -> Result<bool, ViewerError> {
        self.inner.state.lock().selection.clear();
        let Some(position) = self.hit_test_text(point).await? else {
            self.inner.events.push(ViewerEvent::SelectionChanged);
            return Ok(false);
        };
        self.inner
            .state
            .lock()
            .selection
            .set_anchors(position, position);
        self.recompute_selection().await?;
        Ok(true)
    }

    /// Moves the second anchor to a document-space point.
    pub async fn extend_selection(&self, point: Point) -> Result<bool, ViewerError> {
        if self.inner.state.lock().selection.a().is_none() {
            return Ok(false);
        }
        let Some(position) = self.hit_test_text(point).await? else {
            return Ok(false);
        };
        self.inner.state.lock().selection.set_b(position);
        self.recompute_selection().await?;
        Ok(true)
    }

    /// Selects the word under a document-space point.
    pub async fn select_word(&self, point: Point) -> Result<bool, ViewerError> {
        let (page_number, frame) = {
            let state = self.inner.state.lock();
            let layout = state.layout()?;
            let Some(page) = layout.page_at(point) else {
                return Ok(false);
            };
            match state.page_frame(page) {
                Some(frame) => (page, frame),
                None => return Ok(false),
            }
        };
        let text = self.load_page_text(page_number).await?;
        let Some(fragment) = text.hit_test_fragment(frame.point_to_page(point)).copied() else {
            return Ok(false);
        };
        if fragment.is_empty() {
            return Ok(false);
        }
        {
            let mut state = self.inner.state.lock();
            state.selection.clear();
            state.selection.set_anchors(
                TextPosition::new(page_number, fragment.start),
                TextPosition::new(page_number, fragment.end - 1),
            );
        }
        self.rebuild_selection();
        Ok(true)
    }

    /// Loads every page's text, then selects from the first character of page 1 to
    /// the last character of the last page.
    pub async fn select_all(&self) -> Result<(), ViewerError> {
        let count = {
            let state = self.inner.state.lock();
            if state.document.is_none() {
                return Err(ViewerError::NoDocument);
            }
            state.pages.len() as u32
        };
        if count == 0 {
            return Ok(());
        }
        let mut last_len = 0;
        for page_number in 1..=count {
            last_len = self.load_page_text(page_number).await?.len();
        }
        self.inner.state.lock().selection.set_anchors(
            TextPosition::new(1, 0),
            TextPosition::new(count, last_len.saturating_sub(1)),
        );
        self.rebuild_selection();
        Ok(())
    }

    pub fn clear_selection(&self) {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = state.selection.a().is_some();
            state.selection.clear();
            changed
        };
        if changed {
            self.inner.events.push(ViewerEvent::SelectionChanged);
        }
    }

    pub fn selection(&self) -> TextSelection {
        self.inner.state.lock().selection.clone()
    }

    pub fn selected_text(&self) -> String {
        let texts = &self.inner.texts;
        self.inner
            .state
            .lock()
            .selection
            .selected_text(|page| texts.cached(page))
    }

    /// Writes the selected text to `sink`. Returns false, leaving the selection as it
    /// is, when the document forbids copying or nothing is selected.
    pub fn copy_selection(&self, sink: &mut dyn ClipboardSink) -> bool {
        let allowed = self
            .document()
            .is_some_and(|document| document.permissions().allows_copying);
        if !allowed {
            debug!("copy refused: document does not allow copying");
            return false;
        }
        let text = self.selected_text();
        if text.is_empty() {
            return false;
        }
        match sink.set_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to write selection to clipboard");
                false
            }
        }
    }

    /// Document-space highlight rectangles of the current selection.
    pub fn selection_highlights(&self) -> Vec<Rect> {
        let state = self.inner.state.lock();
        self.highlights(&state)
    }

    // Links

    pub async fn load_page_links(&self, page_number: u32) -> Result<Arc<Vec<Link>>, ViewerError> {
        if let Some(links) = self.inner.links.cached(page_number) {
            return Ok(links);
        }
        let (document, epoch) = self.document_for_page(page_number)?;
        let links = self
            .inner
            .links
            .load(epoch, page_number, move || async move {
                document.load_links(page_number).await
            })
            .await?
            .ok_or(ViewerError::DocumentChanged)?;
        self.ensure_epoch(epoch)?;
        self.inner.events.push(ViewerEvent::Invalidated);
        Ok(links)
    }

    /// Link under a document-space point.
    pub async fn link_at(&self, point: Point) -> Result<Option<Link>, ViewerError> {
        let (page_number, frame) = {
            let state = self.inner.state.lock();
            let Some(page) = state.layout()?.page_at(point) else {
                return Ok(None);
            };
            match state.page_frame(page) {
                Some(frame) => (page, frame),
                None => return Ok(None),
            }
        };
        let links = self.load_page_links(page_number).await?;
        Ok(links::hit_test(&links, frame.point_to_page(point)).cloned())
    }

    /// Navigates to in-document link targets. The target is returned so the caller
    /// can open URIs.
    pub async fn follow_link(&self, point: Point) -> Result<Option<LinkTarget>, ViewerError> {
        let Some(link) = self.link_at(point).await? else {
            return Ok(None);
        };
        if let LinkTarget::Destination(destination) = &link.target {
            self.go_to_dest(*destination, self.inner.config.animation_duration)
                .await?;
        }
        Ok(Some(link.target))
    }

    // Commands

    pub async fn apply(&self, command: Command) -> Result<(), ViewerError> {
        let anchor = self.inner.config.page_anchor;
        let duration = self.inner.config.animation_duration;
        let current = self.current_page().unwrap_or(1);
        match command {
            Command::ScrollBy { dx, dy } => self.scroll_by(dx, dy),
            Command::ZoomAt { focus, factor } => self.zoom_at(focus, factor),
            Command::ZoomIn { wrap } => {
                self.zoom_up(wrap).await;
            }
            Command::ZoomOut { wrap } => {
                self.zoom_down(wrap).await;
            }
            Command::FitPage => {
                self.go_to_page(current, PageAnchor::All, duration).await?;
            }
            Command::NextPage { count } => {
                self.go_to_page(current.saturating_add(count), anchor, duration)
                    .await?;
            }
            Command::PrevPage { count } => {
                self.go_to_page(current.saturating_sub(count), anchor, duration)
                    .await?;
            }
            Command::GotoPage { page } => {
                self.go_to_page(page, anchor, duration).await?;
            }
            Command::FirstPage => {
                self.go_to_page(1, anchor, duration).await?;
            }
            Command::LastPage => {
                self.go_to_page(self.page_count(), anchor, duration).await?;
            }
            Command::SelectAll => self.select_all().await?,
            Command::ClearSelection => self.clear_selection(),
        }
        Ok(())
    }

    // Drawing

    /// Snapshot of what is currently on screen.
    pub fn frame(&self) -> FrameSnapshot {
        let state = self.inner.state.lock();
        let visible = state.visible_rect();
        let pages = state
            .layout
            .as_ref()
            .map(|layout| layout.pages_intersecting(&visible))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|page_number| {
                state.page_frame(page_number).map(|frame| VisiblePage {
                    page_number,
                    rect: frame.rect,
                    info: frame.info,
                })
            })
            .collect();
        FrameSnapshot {
            viewport: state.viewport,
            transform: state.transform,
            background: self.inner.config.background.rgba(),
            pages,
            highlights: self.highlights(&state),
            failure: state.failure.clone(),
        }
    }

    /// Runs `f` with the bitmaps cached for a page right now.
    pub fn with_page_images<R>(
        &self,
        page_number: u32,
        f: impl FnOnce(Option<&PreviewImage>, Option<&PartialImage>) -> R,
    ) -> R {
        self.inner.images.with_page_images(page_number, f)
    }

    pub fn cached_image_bytes(&self) -> usize {
        self.inner.images.total_bytes()
    }

    // Persistence

    /// Current page and zoom, plus the exact page-local offset under this layout.
    pub fn view_state(&self) -> Option<PersistedViewState> {
        let state = self.inner.state.lock();
        let page_number = state.current_page?;
        let layout = state.layout.as_ref()?;
        let page = layout.page_rect(page_number)?;
        let visible = state.visible_rect();
        Some(PersistedViewState {
            page_number,
            zoom: state.transform.scale,
            offset: Some(Point::new(visible.left - page.left, visible.top - page.top)),
            layout: Some(SavedLayout::of(layout)),
        })
    }

    /// Jumps straight to a saved position. The saved offset is used when the layout
    /// is unchanged; otherwise the page is shown at the configured anchor.
    pub fn restore_view_state(&self, saved: &PersistedViewState) -> Result<(), ViewerError> {
        self.cancel_animation();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let count = state.layout()?.page_count();
            let anchor = self.inner.config.page_anchor;
            let (page, anchor) = clamp_page_target(saved.page_number, anchor, anchor, count)
                .ok_or(ViewerError::NoDocument)?;
            self.retarget(state, page);
            let zoom = clamp_zoom(saved.zoom, state.min_scale, self.inner.config.max_scale);
            let Some(layout) = state.layout.clone() else {
                return Ok(());
            };
            let exact = saved.offset_for(&layout).and_then(|offset| {
                let rect = layout.page_rect(page)?;
                let corner = Point::new(rect.left + offset.x, rect.top + offset.y);
                Some(Transform::anchored(corner, Point::new(0.0, 0.0), zoom))
            });
            let Some(target) = exact
                .or_else(|| self.page_transform(&layout, page, anchor, zoom, state.viewport))
            else {
                return Ok(());
            };
            self.commit(state, target);
        }
        self.refresh_images();
        Ok(())
    }

    /// Cancels animations, renders and timers and releases every cached bitmap. The
    /// viewer ignores further input.
    pub fn dispose(&self) {
        self.cancel_animation();
        {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            state.document = None;
            state.layout = None;
            state.selection.clear();
            state.epoch += 1;
            self.inner.texts.reset(state.epoch);
            self.inner.links.reset(state.epoch);
        }
        self.inner.images.dispose();
        debug!("viewer disposed");
    }

    // Internals

    fn cancel_animation(&self) {
        self.inner.animation.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().navigating = false;
    }

    /// Records an explicit navigation to `page`. When it leaves the current page the
    /// zoom bounds switch to the target first. Returns the current zoom clamped to
    /// those bounds, the zoom the target transform should be built at.
    fn retarget(&self, state: &mut ViewState, page: u32) -> f64 {
        state.goto_target = Some(page);
        state.navigating = state.current_page != Some(page);
        if state.navigating {
            self.update_zoom_bounds(state);
        }
        clamp_zoom(state.transform.scale, state.min_scale, self.inner.config.max_scale)
    }

    fn document_for_page(
        &self,
        page_number: u32,
    ) -> Result<(Arc<dyn DocumentService>, u64), ViewerError> {
        let state = self.inner.state.lock();
        let document = state.document.clone().ok_or(ViewerError::NoDocument)?;
        let count = document.page_count();
        if page_number == 0 || page_number > count {
            return Err(ViewerError::PageOutOfRange {
                page: page_number,
                count,
            });
        }
        Ok((document, state.epoch))
    }

    fn ensure_epoch(&self, epoch: u64) -> Result<(), ViewerError> {
        if self.inner.state.lock().epoch == epoch {
            Ok(())
        } else {
            Err(ViewerError::DocumentChanged)
        }
    }

    fn normalize(&self, state: &ViewState, proposed: Transform) -> Transform {
        match &state.layout {
            Some(layout) => self.inner.normalizer.normalize(
                proposed,
                &NormalizeContext {
                    viewport: state.viewport,
                    layout,
                    min_scale: state.min_scale,
                    max_scale: self.inner.config.max_scale,
                },
            ),
            None => proposed,
        }
    }

    fn commit(&self, state: &mut ViewState, proposed: Transform) {
        state.transform = self.normalize(state, proposed);
        self.track_current_page(state);
    }

    fn update_transform(&self, propose: impl FnOnce(Transform) -> Transform) {
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.disposed || state.layout.is_none() {
                return;
            }
            let proposed = propose(state.transform);
            self.commit(state, proposed);
        }
        self.refresh_images();
    }

    fn track_current_page(&self, state: &mut ViewState) {
        let Some(layout) = state.layout.as_ref() else {
            return;
        };
        let page = navigation::current_page(
            &state.visible_rect(),
            layout,
            state.goto_target,
            self.inner.config.page_hysteresis,
        );
        if page != state.current_page {
            state.current_page = page;
            if state.navigating && page == state.goto_target {
                state.navigating = false;
            }
            if let Some(page) = page {
                trace!(page, "current page changed");
                self.inner.events.push(ViewerEvent::PageChanged(page));
            }
            self.update_zoom_bounds(state);
        }
    }

    fn update_zoom_bounds(&self, state: &mut ViewState) {
        let Some(layout) = state.layout.as_ref() else {
            return;
        };
        let config = &self.inner.config;
        let cover = cover_scale(state.viewport, layout);
        let page = state
            .goto_target
            .filter(|_| state.navigating)
            .or(state.current_page)
            .or(state.goto_target)
            .unwrap_or(config.initial_page);
        let alternative = layout
            .page_rect(page)
            .and_then(|rect| alternative_fit_scale(state.viewport, &rect, config.margin));
        state.min_scale = minimum_scale(
            config.min_scale,
            config.pin_min_scale_to_fit,
            cover,
            alternative,
        )
        .min(config.max_scale);
        state.zoom_stops = ZoomStops::compute(
            cover,
            alternative,
            config.min_scale,
            config.max_scale,
            config.pin_min_scale_to_fit,
        );
    }

    fn page_transform(
        &self,
        layout: &PageLayout,
        page_number: u32,
        anchor: PageAnchor,
        zoom: f64,
        viewport: Size,
    ) -> Option<Transform> {
        let rect = layout.page_rect(page_number)?;
        let area = if anchor == PageAnchor::All {
            let margin = self.inner.config.margin;
            rect.inflate(margin, margin)
        } else {
            rect
        };
        Some(transform_for_area(&area, anchor, zoom, viewport))
    }

    /// Layout pass: recomputes the layout, the zoom bounds and, the first time, the
    /// initial navigation.
    fn relayout(&self) {
        let became_ready = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.disposed || state.document.is_none() || state.viewport.is_empty() {
                return;
            }
            let layout = self
                .inner
                .layout_strategy
                .layout(&state.pages, self.inner.config.margin);
            if state.layout.as_deref() != Some(&layout) {
                debug!(
                    pages = layout.page_count(),
                    width = layout.document_size.width,
                    height = layout.document_size.height,
                    "layout updated"
                );
                state.layout = Some(Arc::new(layout));
            }
            self.update_zoom_bounds(state);

            if state.ready {
                let current = state.transform;
                self.commit(state, current);
                false
            } else {
                let Some(layout) = state.layout.clone() else {
                    return;
                };
                let config = &self.inner.config;
                let zoom = clamp_zoom(
                    cover_scale(state.viewport, &layout),
                    state.min_scale,
                    config.max_scale,
                );
                let target = clamp_page_target(
                    config.initial_page,
                    config.page_anchor,
                    config.page_anchor,
                    layout.page_count(),
                )
                .and_then(|(page, anchor)| {
                    state.goto_target = Some(page);
                    self.page_transform(&layout, page, anchor, zoom, state.viewport)
                });
                self.commit(state, target.unwrap_or(Transform::new(zoom, 0.0, 0.0)));
                state.ready = true;
                true
            }
        };
        if became_ready {
            info!("view ready");
            self.inner.events.push(ViewerEvent::ViewReady);
        }
        self.refresh_images();
    }

    fn cache_extent(&self, visible: &Rect) -> Rect {
        let config = &self.inner.config;
        visible.inflate(
            visible.width() * config.cache_extent_horizontal,
            visible.height() * config.cache_extent_vertical,
        )
    }

    /// Brings the image cache in line with the current view: previews for every page
    /// in the cache extent, partials for visible pages above the one-pass threshold,
    /// then eviction.
    fn refresh_images(&self) {
        let plan = {
            let state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            let Some(layout) = state.layout.clone() else {
                return;
            };
            let config = &self.inner.config;
            let visible = state.visible_rect();
            let extent = self.cache_extent(&visible);
            let mut plan = RefreshPlan {
                layout: Arc::clone(&layout),
                retained: Vec::new(),
                previews: Vec::new(),
                partials: Vec::new(),
                idle_partials: Vec::new(),
                center: visible.center(),
            };

            for page_number in layout.pages_intersecting(&extent) {
                let Some(frame) = state.page_frame(page_number) else {
                    continue;
                };
                let effective = state.transform.scale * config.device_pixel_ratio * frame.ratio();
                plan.retained.push(page_number);
                plan.previews
                    .push((frame.info, effective.min(config.one_pass_threshold)));
                match frame.rect.intersection(&visible) {
                    Some(shown) if effective > config.one_pass_threshold => {
                        plan.partials
                            .push((frame.info, effective, frame.rect_to_page(&shown)));
                    }
                    _ => plan.idle_partials.push(page_number),
                }
            }
            if let Some(rect) = state.current_page.and_then(|page| layout.page_rect(page)) {
                plan.center = rect.center();
            }
            plan
        };

        let images = &self.inner.images;
        images.set_retained_pages(plan.retained.iter().copied());
        for (info, scale) in plan.previews {
            images.request_preview(info, scale);
        }
        for page_number in plan.idle_partials {
            images.cancel_partial(page_number);
        }
        for (info, scale, rect) in plan.partials {
            images.request_partial(info, scale, rect);
        }
        images.evict(plan.center, &plan.layout);
    }

    fn rebuild_selection(&self) -> Vec<u32> {
        let texts = &self.inner.texts;
        let missing = self
            .inner
            .state
            .lock()
            .selection
            .recompute(|page| texts.cached(page));
        self.inner.events.push(ViewerEvent::SelectionChanged);
        missing
    }

    /// Recomputes the selection, loading pages between the anchors on demand and
    /// recomputing once they arrive.
    async fn recompute_selection(&self) -> Result<(), ViewerError> {
        let missing = self.rebuild_selection();
        if missing.is_empty() {
            return Ok(());
        }
        for page_number in missing {
            self.load_page_text(page_number).await?;
        }
        self.rebuild_selection();
        Ok(())
    }

    fn highlights(&self, state: &ViewState) -> Vec<Rect> {
        let texts = &self.inner.texts;
        state
            .selection
            .highlight_rects(|page| texts.cached(page))
            .into_iter()
            .filter_map(|(page, rect)| {
                state
                    .page_frame(page)
                    .map(|frame| frame.rect_to_document(&rect))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentPermissions;
    use crate::geometry::zooms_almost_equal;
    use crate::navigation::DestinationCommand;
    use crate::testing::{FakeDocument, FakeProvider, TEXT_ORIGIN};

    const VIEWPORT: Size = Size::new(800.0, 600.0);

    fn test_config() -> ViewerConfig {
        ViewerConfig {
            animation_duration: Duration::ZERO,
            ..ViewerConfig::default()
        }
    }

    fn open(viewer: &Viewer, document: &Arc<FakeDocument>) {
        viewer.set_document(
            Some(Arc::clone(document) as Arc<dyn DocumentService>),
            None,
        );
        viewer.set_viewport_size(VIEWPORT);
    }

    fn reference_viewer(pages: u32) -> (Viewer, Arc<FakeDocument>) {
        let document = Arc::new(FakeDocument::uniform(pages, 600.0, 800.0));
        let viewer = Viewer::new(test_config());
        open(&viewer, &document);
        (viewer, document)
    }

    /// Document-space center of character `index` of the fake text line on a page of
    /// the reference layout.
    fn char_point(page_number: u32, index: usize) -> Point {
        let page_top = 8.0 + (page_number - 1) as f64 * 808.0;
        let (x, y) = TEXT_ORIGIN;
        Point::new(8.0 + x + index as f64 * 10.0 + 5.0, page_top + y + 6.0)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reference_document_goes_to_page_two_top() {
        let (viewer, _) = reference_viewer(3);
        let layout = viewer.layout().unwrap();
        assert_eq!(layout.document_size, Size::new(616.0, 2432.0));
        assert!(zooms_almost_equal(viewer.transform().scale, 800.0 / 616.0));
        assert_eq!(viewer.current_page(), Some(1));

        let outcome = viewer
            .go_to_page(2, PageAnchor::Top, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, GotoOutcome::Completed);
        assert!((viewer.visible_rect().top - 816.0).abs() < 1e-6);
        assert_eq!(viewer.current_page(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn first_layout_emits_lifecycle_events() {
        let (viewer, _) = reference_viewer(3);
        let events = viewer.events().drain();
        assert!(events.contains(&ViewerEvent::DocumentChanged));
        assert!(events.contains(&ViewerEvent::ViewReady));
        assert!(events.contains(&ViewerEvent::ViewSizeChanged {
            new: VIEWPORT,
            old: Size::default()
        }));
        assert_eq!(
            events
                .iter()
                .filter(|event| **event == ViewerEvent::ViewReady)
                .count(),
            1
        );
        assert!(viewer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn go_to_page_then_current_page_round_trips() {
        let (viewer, _) = reference_viewer(5);
        for page in [3, 1, 5, 2, 4] {
            viewer
                .go_to_page(page, PageAnchor::Top, Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(viewer.current_page(), Some(page));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_pages_are_clamped() {
        let (viewer, _) = reference_viewer(3);
        viewer
            .go_to_page(0, PageAnchor::Top, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(viewer.current_page(), Some(1));

        viewer
            .go_to_page(42, PageAnchor::Top, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(viewer.current_page(), Some(3));
        assert!((viewer.visible_rect().bottom - 2424.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_goto_supersedes_running_animation() {
        let (viewer, _) = reference_viewer(3);
        let first = viewer.clone();
        let running = tokio::spawn(async move {
            first
                .go_to_page(3, PageAnchor::Top, Duration::from_millis(200))
                .await
        });
        settle(50).await;

        let second = viewer
            .go_to_page(1, PageAnchor::Top, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(second, GotoOutcome::Completed);
        assert_eq!(running.await.unwrap().unwrap(), GotoOutcome::Superseded);
        assert!((viewer.visible_rect().top - 8.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn animation_frames_stay_normalized() {
        let (viewer, _) = reference_viewer(3);
        let animator = viewer.clone();
        let running = tokio::spawn(async move {
            animator
                .goto(Transform::new(50.0, 1.0e5, 1.0e5), Duration::from_millis(160))
                .await
        });
        for _ in 0..12 {
            settle(16).await;
            let transform = viewer.transform();
            assert!(transform.scale <= 8.0 + 1e-9);
            let visible = viewer.visible_rect();
            assert!(visible.left >= -1e-6 && visible.top >= -1e-6);
        }
        assert_eq!(running.await.unwrap(), GotoOutcome::Completed);
        assert!((viewer.transform().scale - 8.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn jump_to_a_page_of_another_size_uses_its_zoom_floor() {
        let document = Arc::new(FakeDocument::sized(&[(600.0, 800.0), (600.0, 200.0)]));
        let viewer = Viewer::new(test_config());
        open(&viewer, &document);
        viewer.set_transform(Transform::new(0.1, 0.0, 0.0));
        assert!(zooms_almost_equal(viewer.min_scale(), 600.0 / 816.0));
        assert!(zooms_almost_equal(viewer.transform().scale, 600.0 / 816.0));
        assert_eq!(viewer.current_page(), Some(1));

        viewer
            .go_to_page(2, PageAnchor::Top, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(viewer.current_page(), Some(2));
        assert!(zooms_almost_equal(viewer.min_scale(), 800.0 / 616.0));
        assert!(zooms_almost_equal(viewer.transform().scale, 800.0 / 616.0));
    }

    #[tokio::test(start_paused = true)]
    async fn zoom_stops_step_up_from_cover() {
        let (viewer, _) = reference_viewer(3);
        let cover = 800.0 / 616.0;
        viewer.zoom_up(false).await;
        assert!(zooms_almost_equal(viewer.transform().scale, cover * 2.0));
        viewer.zoom_down(false).await;
        viewer.zoom_down(false).await;
        assert!(zooms_almost_equal(viewer.transform().scale, 600.0 / 816.0));
        assert!(zooms_almost_equal(viewer.min_scale(), 600.0 / 816.0));
    }

    #[tokio::test(start_paused = true)]
    async fn visible_pages_get_previews() {
        let (viewer, document) = reference_viewer(3);
        settle(1).await;
        let scale = viewer.with_page_images(1, |preview, partial| {
            assert!(partial.is_none());
            preview.map(|p| p.scale)
        });
        assert!(zooms_almost_equal(scale.unwrap(), 800.0 / 616.0));
        assert!(viewer.with_page_images(2, |preview, _| preview.is_some()));
        assert!(viewer.with_page_images(3, |preview, _| preview.is_none()));
        assert_eq!(document.renders(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deep_zoom_adds_partial_for_visible_region() {
        let (viewer, _) = reference_viewer(3);
        settle(1).await;
        viewer.zoom_at(Point::new(400.0, 300.0), 4.0);
        settle(300).await;
        let page = viewer.current_page().unwrap();
        let partial = viewer.with_page_images(page, |_, partial| partial.map(|p| p.page_rect()));
        let partial = partial.expect("partial render");
        let visible = viewer.visible_rect();
        let page_rect = viewer.layout().unwrap().page_rect(page).unwrap();
        let shown = visible.intersection(&page_rect).unwrap().to_page_local(&page_rect);
        assert!(partial.left <= shown.left + 1e-6 && partial.right >= shown.right - 1e-6);
        assert!(partial.top <= shown.top + 1e-6 && partial.bottom >= shown.bottom - 1e-6);
        let preview_scale = viewer.with_page_images(page, |preview, _| preview.map(|p| p.scale));
        assert!(zooms_almost_equal(preview_scale.unwrap(), 200.0 / 72.0));
    }

    #[tokio::test(start_paused = true)]
    async fn pan_can_be_disabled() {
        let document = Arc::new(FakeDocument::uniform(3, 600.0, 800.0));
        let viewer = Viewer::new(ViewerConfig {
            pan_enabled: false,
            ..test_config()
        });
        open(&viewer, &document);
        let before = viewer.transform();
        viewer.scroll_by(0.0, 300.0);
        assert_eq!(viewer.transform(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn scrolling_moves_the_visible_rect() {
        let (viewer, _) = reference_viewer(3);
        let before = viewer.visible_rect();
        viewer.scroll_by(0.0, 130.0);
        let after = viewer.visible_rect();
        let moved = 130.0 / viewer.transform().scale;
        assert!((after.top - before.top - moved).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_normalizer_overrides_clamping() {
        fn pinned(proposed: Transform, _: &NormalizeContext<'_>) -> Transform {
            Transform::new(1.0, proposed.translate_x, proposed.translate_y)
        }
        let document = Arc::new(FakeDocument::uniform(2, 600.0, 800.0));
        let viewer = Viewer::builder(test_config()).normalizer(pinned).build();
        open(&viewer, &document);
        viewer.zoom_at(Point::new(0.0, 0.0), 3.0);
        assert_eq!(viewer.transform().scale, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn word_selection_round_trips_fragment_text() {
        let (viewer, _) = reference_viewer(3);
        assert!(viewer.select_word(char_point(1, 8)).await.unwrap());
        assert_eq!(viewer.selected_text(), "alpha");
        assert_eq!(viewer.selection_highlights().len(), 1);
        assert!(viewer.events().drain().contains(&ViewerEvent::SelectionChanged));
    }

    #[tokio::test(start_paused = true)]
    async fn drag_selection_spans_pages_two_to_five() {
        let (viewer, document) = reference_viewer(5);
        assert!(viewer.begin_selection(char_point(2, 3)).await.unwrap());
        assert!(viewer.extend_selection(char_point(5, 2)).await.unwrap());

        let selection = viewer.selection();
        let ranges = selection.ranges();
        assert_eq!(ranges.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!((ranges[&2].start, ranges[&2].end), (3, 16));
        assert_eq!((ranges[&3].start, ranges[&3].end), (0, 16));
        assert_eq!((ranges[&4].start, ranges[&4].end), (0, 16));
        assert_eq!((ranges[&5].start, ranges[&5].end), (0, 3));
        assert_eq!(
            viewer.selected_text(),
            "e2 alpha betapage3 alpha betapage4 alpha betapag"
        );
        assert_eq!(document.text_loads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backward_drag_selects_the_same_range() {
        let (viewer, _) = reference_viewer(3);
        viewer.begin_selection(char_point(1, 10)).await.unwrap();
        viewer.extend_selection(char_point(1, 6)).await.unwrap();
        assert_eq!(viewer.selected_text(), "alpha");
    }

    #[tokio::test(start_paused = true)]
    async fn select_all_loads_every_page() {
        let document = Arc::new(
            FakeDocument::uniform(3, 600.0, 800.0).with_lines(&["one ", "two ", "three"]),
        );
        let viewer = Viewer::new(test_config());
        open(&viewer, &document);
        viewer.apply(Command::SelectAll).await.unwrap();
        assert_eq!(viewer.selected_text(), "one two three");
        viewer.apply(Command::ClearSelection).await.unwrap();
        assert!(viewer.selection().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn copy_is_refused_when_document_forbids_it() {
        let document = Arc::new(FakeDocument::uniform(1, 600.0, 800.0).with_permissions(
            DocumentPermissions {
                allows_copying: false,
            },
        ));
        let viewer = Viewer::new(test_config());
        open(&viewer, &document);
        viewer.select_word(char_point(1, 8)).await.unwrap();
        let before = viewer.selection();

        let mut clipboard = String::new();
        assert!(!viewer.copy_selection(&mut clipboard));
        assert!(clipboard.is_empty());
        assert_eq!(viewer.selection(), before);
        assert_eq!(viewer.selected_text(), "alpha");
    }

    #[tokio::test(start_paused = true)]
    async fn copy_writes_selected_text() {
        let (viewer, _) = reference_viewer(1);
        viewer.select_word(char_point(1, 13)).await.unwrap();
        let mut clipboard = String::new();
        assert!(viewer.copy_selection(&mut clipboard));
        assert_eq!(clipboard, "beta");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_text_loads_hit_the_service_once() {
        let (viewer, document) = reference_viewer(2);
        let (a, b) = tokio::join!(viewer.load_page_text(2), viewer.load_page_text(2));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(document.text_loads(), 1);
        assert!(matches!(
            viewer.load_page_text(9).await,
            Err(ViewerError::PageOutOfRange { page: 9, count: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_is_reported_until_a_retry_succeeds() {
        let viewer = Viewer::new(test_config());
        viewer.set_viewport_size(VIEWPORT);
        let provider = FakeProvider { pages: 2 };

        let err = viewer
            .load_document(&provider, DocumentSource::file("/tmp/broken.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::DocumentLoad(_)));
        let failure = viewer.document_error().unwrap();
        assert!(failure.message.contains("broken.pdf"));
        assert!(viewer.frame().failure.is_some());

        viewer
            .load_document(&provider, DocumentSource::file("/tmp/fine.pdf"))
            .await
            .unwrap();
        assert!(viewer.document_error().is_none());
        assert_eq!(viewer.page_count(), 2);
        assert!(viewer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn links_navigate_or_return_uris() {
        let document = Arc::new(
            FakeDocument::uniform(3, 600.0, 800.0)
                .with_link(
                    1,
                    Link::new(
                        vec![Rect::from_xywh(0.0, 0.0, 100.0, 50.0)],
                        LinkTarget::Destination(Destination {
                            page_number: 3,
                            command: DestinationCommand::Xyz {
                                left: None,
                                top: Some(0.0),
                                zoom: None,
                            },
                        }),
                    ),
                )
                .with_link(
                    1,
                    Link::new(
                        vec![Rect::from_xywh(0.0, 100.0, 100.0, 50.0)],
                        LinkTarget::Uri("https://example.org".into()),
                    ),
                ),
        );
        let viewer = Viewer::new(test_config());
        open(&viewer, &document);

        let target = viewer.follow_link(Point::new(58.0, 128.0)).await.unwrap();
        assert_eq!(target, Some(LinkTarget::Uri("https://example.org".into())));
        assert_eq!(viewer.current_page(), Some(1));

        let target = viewer.follow_link(Point::new(50.0, 30.0)).await.unwrap();
        assert!(matches!(target, Some(LinkTarget::Destination(_))));
        assert_eq!(viewer.current_page(), Some(3));

        assert!(viewer.link_at(Point::new(500.0, 500.0)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn view_state_round_trips() {
        let (viewer, _) = reference_viewer(4);
        viewer
            .restore_view_state(&PersistedViewState::at_page(3, 2.0))
            .unwrap();
        let saved = viewer.view_state().unwrap();
        assert_eq!(saved.page_number, 3);
        assert_eq!(saved.zoom, 2.0);
        assert_eq!(saved.layout, Some(SavedLayout::of(&viewer.layout().unwrap())));
    }

    #[tokio::test(start_paused = true)]
    async fn saved_offset_restores_the_exact_position() {
        let (viewer, _) = reference_viewer(4);
        viewer.set_transform(Transform::new(2.0, -100.0, -3300.0));
        let saved = viewer.view_state().unwrap();
        let before = viewer.visible_rect();

        let (reopened, _) = reference_viewer(4);
        reopened.restore_view_state(&saved).unwrap();
        assert_eq!(reopened.current_page(), Some(saved.page_number));
        let after = reopened.visible_rect();
        assert!((after.left - before.left).abs() < 1e-6);
        assert!((after.top - before.top).abs() < 1e-6);

        // a different layout falls back to the page anchor
        let (other, _) = reference_viewer(5);
        other.restore_view_state(&saved).unwrap();
        let page = other.layout().unwrap().page_rect(saved.page_number).unwrap();
        assert!((other.visible_rect().top - page.top).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn page_commands_move_between_pages() {
        let (viewer, _) = reference_viewer(4);
        viewer.apply(Command::NextPage { count: 2 }).await.unwrap();
        assert_eq!(viewer.current_page(), Some(3));
        viewer.apply(Command::PrevPage { count: 1 }).await.unwrap();
        assert_eq!(viewer.current_page(), Some(2));
        viewer.apply(Command::LastPage).await.unwrap();
        assert_eq!(viewer.current_page(), Some(4));
        viewer.apply(Command::FirstPage).await.unwrap();
        assert_eq!(viewer.current_page(), Some(1));
        viewer.apply(Command::FitPage).await.unwrap();
        assert!(zooms_almost_equal(viewer.transform().scale, 600.0 / 816.0));
    }

    #[tokio::test(start_paused = true)]
    async fn document_change_flushes_caches_and_selection() {
        let (viewer, _) = reference_viewer(3);
        settle(1).await;
        viewer.select_word(char_point(1, 8)).await.unwrap();
        assert!(viewer.cached_image_bytes() > 0);

        let other = Arc::new(FakeDocument::uniform(2, 300.0, 300.0));
        viewer.set_document(Some(other as Arc<dyn DocumentService>), None);
        assert!(viewer.selection().is_empty());
        assert_eq!(viewer.page_count(), 2);
        assert!(viewer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn text_in_flight_across_document_change_is_not_reused() {
        let (viewer, _) = reference_viewer(2);
        let replacement = Arc::new(
            FakeDocument::uniform(2, 600.0, 800.0).with_lines(&["fresh words", "more words"]),
        );

        // the first branch parks inside the service call before the swap runs
        let (old_load, _) = tokio::join!(viewer.load_page_text(1), async {
            viewer.set_document(
                Some(Arc::clone(&replacement) as Arc<dyn DocumentService>),
                None,
            );
        });
        assert!(matches!(old_load, Err(ViewerError::DocumentChanged)));

        let text = viewer.load_page_text(1).await.unwrap();
        assert_eq!(text.full_text(), "fresh words");
        assert_eq!(replacement.text_loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_releases_everything() {
        let (viewer, document) = reference_viewer(3);
        settle(1).await;
        assert!(viewer.cached_image_bytes() > 0);
        viewer.dispose();
        assert_eq!(viewer.cached_image_bytes(), 0);
        assert!(viewer.document().is_none());
        viewer.scroll_by(0.0, 100.0);
        settle(200).await;
        assert_eq!(viewer.cached_image_bytes(), 0);
        assert_eq!(document.renders(), 2);
    }
}
