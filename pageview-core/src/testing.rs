//! In-memory document used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::document::{
    DocumentPermissions, DocumentProvider, DocumentService, DocumentSource, PageInfo,
    RegionRenderRequest, RenderImage,
};
use crate::links::Link;
use crate::text::tests::line_chars;
use crate::text::PageText;

/// Page-local origin of the fake text line on every page.
pub(crate) const TEXT_ORIGIN: (f64, f64) = (20.0, 20.0);

pub(crate) struct FakeDocument {
    pages: Vec<PageInfo>,
    lines: Vec<String>,
    links: HashMap<u32, Vec<Link>>,
    permissions: DocumentPermissions,
    render_delay: Duration,
    ignores_cancellation: bool,
    renders: AtomicUsize,
    text_loads: AtomicUsize,
}

impl FakeDocument {
    pub(crate) fn uniform(count: u32, width: f64, height: f64) -> Self {
        Self {
            pages: (1..=count)
                .map(|number| PageInfo::new(number, width, height))
                .collect(),
            lines: (1..=count).map(|number| format!("page{number} alpha beta")).collect(),
            links: HashMap::new(),
            permissions: DocumentPermissions::default(),
            render_delay: Duration::ZERO,
            ignores_cancellation: false,
            renders: AtomicUsize::new(0),
            text_loads: AtomicUsize::new(0),
        }
    }

    /// One page per `(width, height)` pair, in order.
    pub(crate) fn sized(sizes: &[(f64, f64)]) -> Self {
        let mut document = Self::uniform(sizes.len() as u32, 0.0, 0.0);
        document.pages = sizes
            .iter()
            .zip(1..)
            .map(|(&(width, height), number)| PageInfo::new(number, width, height))
            .collect();
        document
    }

    pub(crate) fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// Finishes every render even after its token is canceled.
    pub(crate) fn ignoring_cancellation(mut self) -> Self {
        self.ignores_cancellation = true;
        self
    }

    pub(crate) fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub(crate) fn with_permissions(mut self, permissions: DocumentPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub(crate) fn with_link(mut self, page_number: u32, link: Link) -> Self {
        self.links.entry(page_number).or_default().push(link);
        self
    }

    pub(crate) fn page_infos(&self) -> Vec<PageInfo> {
        self.pages.clone()
    }

    pub(crate) fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub(crate) fn text_loads(&self) -> usize {
        self.text_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentService for FakeDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page(&self, page_number: u32) -> Option<PageInfo> {
        let index = page_number.checked_sub(1)? as usize;
        self.pages.get(index).copied()
    }

    fn permissions(&self) -> DocumentPermissions {
        self.permissions
    }

    async fn render_region(
        &self,
        request: RegionRenderRequest,
        token: &CancellationToken,
    ) -> Result<Option<RenderImage>> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }
        if token.is_canceled() && !self.ignores_cancellation {
            return Ok(None);
        }
        let shade = request.page_number as u8;
        Ok(Some(RenderImage::filled(
            request.width,
            request.height,
            [shade, shade, shade, 255],
        )))
    }

    async fn load_text(&self, page_number: u32) -> Result<PageText> {
        self.text_loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let line = page_number
            .checked_sub(1)
            .and_then(|index| self.lines.get(index as usize))
            .ok_or_else(|| anyhow!("no text for page {page_number}"))?;
        let (x, y) = TEXT_ORIGIN;
        Ok(PageText::from_chars(page_number, line_chars(line, x, y)))
    }

    async fn load_links(&self, page_number: u32) -> Result<Vec<Link>> {
        Ok(self.links.get(&page_number).cloned().unwrap_or_default())
    }
}

/// Opens any source as a fresh uniform document, or fails for sources named "broken".
pub(crate) struct FakeProvider {
    pub(crate) pages: u32,
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentService>> {
        if source.display_name().contains("broken") {
            return Err(anyhow!("cannot decode {}", source.display_name()));
        }
        Ok(Arc::new(FakeDocument::uniform(self.pages, 600.0, 800.0)))
    }
}
