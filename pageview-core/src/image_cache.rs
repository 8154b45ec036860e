//! Tiered per-page bitmap cache.
//!
//! Each page holds at most one low-resolution preview of the whole page and at most
//! one high-resolution partial covering the visible part of the page. Renders run as
//! tokio tasks; every request carries a [`CancellationToken`] and a ticket id, and a
//! finished render only lands in the cache when its ticket is still the live one for
//! that page and kind.
//!
//! Canceling a request aborts its task only while it waits out the debounce. Once the
//! backend call is issued the token is the only signal, and a result that arrives
//! anyway is released without touching the slot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::config::ViewerConfig;
use crate::document::{
    AnnotationMode, DocumentService, PageInfo, RegionRenderRequest, RenderFlags, RenderImage,
};
use crate::events::{EventQueue, ViewerEvent};
use crate::geometry::{zooms_almost_equal, Point, Rect};
use crate::layout::PageLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Preview,
    Partial,
}

/// Integer pixel region of a page rendered at some scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    /// Smallest pixel region covering the page-local `rect` at `scale`.
    pub fn covering(rect: &Rect, scale: f64) -> Self {
        let left = (rect.left * scale).floor();
        let top = (rect.top * scale).floor();
        let right = (rect.right * scale).ceil();
        let bottom = (rect.bottom * scale).ceil();
        Self {
            x: left as i32,
            y: top as i32,
            width: (right - left).max(0.0) as u32,
            height: (bottom - top).max(0.0) as u32,
        }
    }

    /// Page-local rectangle, in document units, covered by this region.
    pub fn page_rect(&self, scale: f64) -> Rect {
        Rect::from_xywh(
            self.x as f64 / scale,
            self.y as f64 / scale,
            self.width as f64 / scale,
            self.height as f64 / scale,
        )
    }

    pub fn is_renderable(&self) -> bool {
        self.width >= 1 && self.height >= 1
    }
}

#[derive(Debug)]
pub struct PreviewImage {
    pub image: RenderImage,
    /// Pixels per document unit.
    pub scale: f64,
}

#[derive(Debug)]
pub struct PartialImage {
    pub image: RenderImage,
    pub scale: f64,
    pub region: PixelRegion,
}

impl PartialImage {
    pub fn page_rect(&self) -> Rect {
        self.region.page_rect(self.scale)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub max_bytes: usize,
    pub preview_delay: Duration,
    pub partial_delay: Duration,
    pub background: [u8; 4],
    pub annotation_mode: AnnotationMode,
    pub flags: RenderFlags,
}

impl CacheSettings {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            max_bytes: config.max_cache_bytes,
            preview_delay: config.preview_delay,
            partial_delay: config.partial_delay,
            background: config.background.rgba(),
            annotation_mode: config.annotation_mode,
            flags: config.render_flags(),
        }
    }
}

struct RenderTicket {
    id: u64,
    token: CancellationToken,
    scale: f64,
    region: PixelRegion,
    /// Set once the backend call has been issued.
    rendering: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RenderTicket {
    fn cancel(self) {
        self.token.cancel();
        if !self.rendering.load(Ordering::Acquire) {
            self.task.abort();
        }
    }
}

#[derive(Default)]
struct PageSlots {
    preview: Option<PreviewImage>,
    partial: Option<PartialImage>,
    preview_request: Option<RenderTicket>,
    partial_request: Option<RenderTicket>,
}

impl PageSlots {
    fn request_mut(&mut self, kind: ImageKind) -> &mut Option<RenderTicket> {
        match kind {
            ImageKind::Preview => &mut self.preview_request,
            ImageKind::Partial => &mut self.partial_request,
        }
    }

    fn byte_size(&self) -> usize {
        self.preview.as_ref().map_or(0, |p| p.image.byte_size())
            + self.partial.as_ref().map_or(0, |p| p.image.byte_size())
    }

    fn is_empty(&self) -> bool {
        self.preview.is_none()
            && self.partial.is_none()
            && self.preview_request.is_none()
            && self.partial_request.is_none()
    }

    fn cancel_requests(&mut self) {
        if let Some(ticket) = self.preview_request.take() {
            ticket.cancel();
        }
        if let Some(ticket) = self.partial_request.take() {
            ticket.cancel();
        }
    }

    fn release(&mut self) {
        self.cancel_requests();
        if let Some(preview) = self.preview.take() {
            dispose_image(preview.image);
        }
        if let Some(partial) = self.partial.take() {
            dispose_image(partial.image);
        }
    }
}

/// View center and layout of the last eviction pass, reused when a late render
/// pushes the cache over budget.
struct EvictionFocus {
    center: Point,
    layout: Arc<PageLayout>,
}

struct CacheState {
    document: Option<Arc<dyn DocumentService>>,
    epoch: u64,
    last_ticket: u64,
    slots: HashMap<u32, PageSlots>,
    retained: HashSet<u32>,
    focus: Option<EvictionFocus>,
    discarded: u64,
    disposed: bool,
}

impl CacheState {
    fn next_ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    fn total_bytes(&self) -> usize {
        self.slots.values().map(PageSlots::byte_size).sum()
    }

    fn flush(&mut self) {
        for (_, mut slot) in self.slots.drain() {
            slot.release();
        }
        self.retained.clear();
        self.focus = None;
    }

    /// Drops pages with neither bitmaps nor pending work, then releases pages outside
    /// the retained set, farthest from the focus first, until `budget` is met.
    fn evict_to(&mut self, budget: usize) -> usize {
        self.slots.retain(|_, slot| !slot.is_empty());
        let before = self.total_bytes();
        if before <= budget {
            return 0;
        }
        let Some(focus) = &self.focus else {
            return 0;
        };

        let mut candidates: Vec<(u32, f64)> = self
            .slots
            .keys()
            .filter(|page| !self.retained.contains(page))
            .map(|&page| {
                let distance = focus
                    .layout
                    .page_rect(page)
                    .map_or(f64::INFINITY, |rect| rect.center().distance_squared(focus.center));
                (page, distance)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut total = before;
        for (page, _) in candidates {
            if total <= budget {
                break;
            }
            if let Some(mut slot) = self.slots.remove(&page) {
                let bytes = slot.byte_size();
                slot.release();
                total -= bytes;
                debug!(page, bytes, "evicted page images");
            }
        }

        if total > budget {
            warn!(
                total,
                budget, "image cache still over budget; every remaining page is inside the cache extent"
            );
        }
        before - total
    }
}

fn dispose_image(image: RenderImage) {
    trace!(
        width = image.width,
        height = image.height,
        "releasing page bitmap"
    );
    drop(image);
}

pub struct PageImageCache {
    state: Arc<Mutex<CacheState>>,
    events: Arc<EventQueue>,
    settings: CacheSettings,
    runtime: Option<Handle>,
}

impl PageImageCache {
    /// Captures the current tokio runtime, if any, for spawning render tasks.
    pub fn new(settings: CacheSettings, events: Arc<EventQueue>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                document: None,
                epoch: 0,
                last_ticket: 0,
                slots: HashMap::new(),
                retained: HashSet::new(),
                focus: None,
                discarded: 0,
                disposed: false,
            })),
            events,
            settings,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Flushes every page and starts serving `document`.
    pub fn set_document(&self, document: Option<Arc<dyn DocumentService>>) {
        let mut state = self.state.lock();
        state.flush();
        state.epoch += 1;
        state.document = if state.disposed { None } else { document };
        debug!(epoch = state.epoch, "image cache reset for new document");
    }

    /// Pages inside the cache-extent rectangle. Pending renders of pages leaving the
    /// set are canceled.
    pub fn set_retained_pages(&self, pages: impl IntoIterator<Item = u32>) {
        let retained: HashSet<u32> = pages.into_iter().collect();
        let mut state = self.state.lock();
        for (page, slot) in state.slots.iter_mut() {
            if !retained.contains(page) {
                slot.cancel_requests();
            }
        }
        state.retained = retained;
    }

    /// Ensures a whole-page bitmap at `scale` pixels per document unit. The first
    /// preview of a page renders at once; rescales are debounced.
    pub fn request_preview(&self, page: PageInfo, scale: f64) {
        let full_width = (page.width * scale).round();
        let full_height = (page.height * scale).round();
        if full_width < 1.0 || full_height < 1.0 {
            trace!(page = page.page_number, scale, "preview below one pixel, skipped");
            return;
        }
        let region = PixelRegion {
            x: 0,
            y: 0,
            width: full_width as u32,
            height: full_height as u32,
        };

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let Some(document) = state.document.clone() else {
            return;
        };
        let epoch = state.epoch;
        let id = state.next_ticket();
        let slot = state.slots.entry(page.page_number).or_default();

        if slot
            .preview
            .as_ref()
            .is_some_and(|preview| zooms_almost_equal(preview.scale, scale))
        {
            if let Some(stale) = slot.preview_request.take() {
                stale.cancel();
            }
            return;
        }
        if slot
            .preview_request
            .as_ref()
            .is_some_and(|ticket| zooms_almost_equal(ticket.scale, scale))
        {
            return;
        }

        let delay = if slot.preview.is_none() {
            Duration::ZERO
        } else {
            self.settings.preview_delay
        };
        if let Some(previous) = slot.preview_request.take() {
            previous.cancel();
        }
        let request = self.render_request(page.page_number, region, region.width, region.height);
        slot.preview_request = self.spawn(RenderJob {
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            document,
            kind: ImageKind::Preview,
            page_number: page.page_number,
            ticket: id,
            epoch,
            token: CancellationToken::new(),
            delay,
            scale,
            request,
            max_bytes: self.settings.max_bytes,
            rendering: Arc::new(AtomicBool::new(false)),
        });
        trace!(page = page.page_number, scale, ?delay, "preview requested");
    }

    /// Ensures a high-resolution bitmap of the page-local `rect` at `scale`. Skipped
    /// when the cached or pending partial already covers the same region.
    pub fn request_partial(&self, page: PageInfo, scale: f64, rect: Rect) {
        let bounds = Rect::new(0.0, 0.0, page.width, page.height);
        let Some(rect) = rect.intersection(&bounds) else {
            return;
        };
        let region = PixelRegion::covering(&rect, scale);
        if !region.is_renderable() {
            trace!(page = page.page_number, "partial region below one pixel, skipped");
            return;
        }
        let full_width = (page.width * scale).round() as u32;
        let full_height = (page.height * scale).round() as u32;

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let Some(document) = state.document.clone() else {
            return;
        };
        let epoch = state.epoch;
        let id = state.next_ticket();
        let slot = state.slots.entry(page.page_number).or_default();

        if slot.partial.as_ref().is_some_and(|partial| {
            partial.region == region && zooms_almost_equal(partial.scale, scale)
        }) {
            if let Some(stale) = slot.partial_request.take() {
                stale.cancel();
            }
            return;
        }
        if slot.partial_request.as_ref().is_some_and(|ticket| {
            ticket.region == region && zooms_almost_equal(ticket.scale, scale)
        }) {
            return;
        }

        if let Some(previous) = slot.partial_request.take() {
            previous.cancel();
        }
        let request = self.render_request(page.page_number, region, full_width, full_height);
        slot.partial_request = self.spawn(RenderJob {
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            document,
            kind: ImageKind::Partial,
            page_number: page.page_number,
            ticket: id,
            epoch,
            token: CancellationToken::new(),
            delay: self.settings.partial_delay,
            scale,
            request,
            max_bytes: self.settings.max_bytes,
            rendering: Arc::new(AtomicBool::new(false)),
        });
        trace!(page = page.page_number, scale, ?region, "partial requested");
    }

    /// Cancels a pending partial render without touching cached bitmaps.
    pub fn cancel_partial(&self, page_number: u32) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(&page_number) {
            if let Some(ticket) = slot.partial_request.take() {
                ticket.cancel();
            }
        }
    }

    /// Releases pages outside the retained set, farthest from `center` first, until
    /// the cache fits its byte budget. Returns the number of bytes released. The
    /// center and layout are kept for renders that land later.
    pub fn evict(&self, center: Point, layout: &Arc<PageLayout>) -> usize {
        let mut state = self.state.lock();
        state.focus = Some(EvictionFocus {
            center,
            layout: Arc::clone(layout),
        });
        state.evict_to(self.settings.max_bytes)
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes()
    }

    pub fn cached_pages(&self) -> Vec<u32> {
        let state = self.state.lock();
        let mut pages: Vec<u32> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.preview.is_some() || slot.partial.is_some())
            .map(|(page, _)| *page)
            .collect();
        pages.sort_unstable();
        pages
    }

    pub fn preview_scale(&self, page_number: u32) -> Option<f64> {
        let state = self.state.lock();
        state
            .slots
            .get(&page_number)
            .and_then(|slot| slot.preview.as_ref())
            .map(|preview| preview.scale)
    }

    pub fn partial_region(&self, page_number: u32) -> Option<(f64, PixelRegion)> {
        let state = self.state.lock();
        state
            .slots
            .get(&page_number)
            .and_then(|slot| slot.partial.as_ref())
            .map(|partial| (partial.scale, partial.region))
    }

    /// Pages with any slot state, bitmaps or pending requests.
    pub fn tracked_pages(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Renders that finished after being canceled or superseded and were released
    /// unused.
    pub fn discarded_renders(&self) -> u64 {
        self.state.lock().discarded
    }

    pub fn is_pending(&self, page_number: u32, kind: ImageKind) -> bool {
        let mut state = self.state.lock();
        state
            .slots
            .get_mut(&page_number)
            .is_some_and(|slot| slot.request_mut(kind).is_some())
    }

    /// Runs `f` with the bitmaps currently cached for a page. The cache stays locked
    /// for the duration of the call.
    pub fn with_page_images<R>(
        &self,
        page_number: u32,
        f: impl FnOnce(Option<&PreviewImage>, Option<&PartialImage>) -> R,
    ) -> R {
        let state = self.state.lock();
        match state.slots.get(&page_number) {
            Some(slot) => f(slot.preview.as_ref(), slot.partial.as_ref()),
            None => f(None, None),
        }
    }

    /// Cancels every timer and render and releases every bitmap. Later requests are
    /// ignored.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.flush();
        state.epoch += 1;
        state.document = None;
        state.disposed = true;
        debug!("image cache disposed");
    }

    fn render_request(
        &self,
        page_number: u32,
        region: PixelRegion,
        full_width: u32,
        full_height: u32,
    ) -> RegionRenderRequest {
        RegionRenderRequest {
            page_number,
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            full_width,
            full_height,
            background: self.settings.background,
            annotation_mode: self.settings.annotation_mode,
            flags: self.settings.flags,
        }
    }

    fn spawn(&self, job: RenderJob) -> Option<RenderTicket> {
        let Some(runtime) = &self.runtime else {
            warn!(page = job.page_number, "no async runtime available, render skipped");
            return None;
        };
        let id = job.ticket;
        let token = job.token.clone();
        let scale = job.scale;
        let region = PixelRegion {
            x: job.request.x,
            y: job.request.y,
            width: job.request.width,
            height: job.request.height,
        };
        let rendering = Arc::clone(&job.rendering);
        let task = runtime.spawn(job.run());
        Some(RenderTicket {
            id,
            token,
            scale,
            region,
            rendering,
            task,
        })
    }
}

impl Drop for PageImageCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct RenderJob {
    state: Arc<Mutex<CacheState>>,
    events: Arc<EventQueue>,
    document: Arc<dyn DocumentService>,
    kind: ImageKind,
    page_number: u32,
    ticket: u64,
    epoch: u64,
    token: CancellationToken,
    delay: Duration,
    scale: f64,
    request: RegionRenderRequest,
    max_bytes: usize,
    rendering: Arc<AtomicBool>,
}

impl RenderJob {
    async fn run(self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.token.is_canceled() {
            return;
        }
        if self.kind == ImageKind::Partial && !self.page_still_retained() {
            trace!(page = self.page_number, "page left the cache extent before partial render");
            self.abandon();
            return;
        }

        self.rendering.store(true, Ordering::Release);
        match self.document.render_region(self.request, &self.token).await {
            Ok(Some(image)) => self.commit(image),
            Ok(None) => {
                trace!(page = self.page_number, kind = ?self.kind, "render canceled");
                self.abandon();
            }
            Err(err) => {
                debug!(page = self.page_number, kind = ?self.kind, error = %err, "render failed");
                self.abandon();
            }
        }
    }

    fn page_still_retained(&self) -> bool {
        let state = self.state.lock();
        state.epoch == self.epoch && state.retained.contains(&self.page_number)
    }

    fn is_live(&self, state: &mut CacheState) -> bool {
        if state.disposed || state.epoch != self.epoch || self.token.is_canceled() {
            return false;
        }
        state
            .slots
            .get_mut(&self.page_number)
            .and_then(|slot| slot.request_mut(self.kind).as_ref())
            .is_some_and(|ticket| ticket.id == self.ticket)
    }

    /// Clears this job's ticket so the slot can be requested again.
    fn abandon(&self) {
        let mut state = self.state.lock();
        if !self.is_live(&mut state) {
            return;
        }
        if let Some(slot) = state.slots.get_mut(&self.page_number) {
            slot.request_mut(self.kind).take();
        }
    }

    fn commit(&self, image: RenderImage) {
        let mut state = self.state.lock();
        if !self.is_live(&mut state) {
            state.discarded += 1;
            trace!(page = self.page_number, kind = ?self.kind, "discarding stale render");
            dispose_image(image);
            return;
        }
        let Some(slot) = state.slots.get_mut(&self.page_number) else {
            dispose_image(image);
            return;
        };
        // The ticket holds this task's own handle; dropping it detaches the task.
        slot.request_mut(self.kind).take();
        match self.kind {
            ImageKind::Preview => {
                if let Some(old) = slot.preview.take() {
                    dispose_image(old.image);
                }
                slot.preview = Some(PreviewImage {
                    image,
                    scale: self.scale,
                });
            }
            ImageKind::Partial => {
                if let Some(old) = slot.partial.take() {
                    dispose_image(old.image);
                }
                slot.partial = Some(PartialImage {
                    image,
                    scale: self.scale,
                    region: PixelRegion {
                        x: self.request.x,
                        y: self.request.y,
                        width: self.request.width,
                        height: self.request.height,
                    },
                });
            }
        }
        if state.total_bytes() > self.max_bytes {
            state.evict_to(self.max_bytes);
        }
        drop(state);
        debug!(page = self.page_number, kind = ?self.kind, scale = self.scale, "page image ready");
        self.events.push(ViewerEvent::Invalidated);
    }
}
