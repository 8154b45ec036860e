//! Pdfium-backed document service.

use std::convert::TryFrom;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pageview_core::{
    AnnotationMode, CancellationToken, Destination, DocumentPermissions, DocumentProvider,
    DocumentService, DocumentSource, Link, LinkTarget, PageInfo, PageText, Rect,
    RegionRenderRequest, RenderImage, TextChar,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::pixels::{crop_region, invert_pixels, region_matrix};

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    #[instrument(skip_all, fields(document = %source.display_name()))]
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentService>> {
        let pdfium = Arc::clone(&self.pdfium);
        let source = source.clone();
        let inner = tokio::task::spawn_blocking(move || PdfiumInner::open(pdfium, &source))
            .await
            .context("document open task failed")??;
        debug!(pages = inner.pages.len(), "pdf opened");
        Ok(Arc::new(PdfiumDocument {
            inner: Arc::new(inner),
        }))
    }
}

/// Pdfium is not re-entrant for a single document, so every call runs on the
/// blocking pool behind the document mutex.
struct PdfiumDocument {
    inner: Arc<PdfiumInner>,
}

struct PdfiumInner {
    document: Mutex<PdfDocument<'static>>,
    name: String,
    pages: Vec<PageInfo>,
    permissions: DocumentPermissions,
    /// Owns the bindings `document` borrows.
    #[allow(dead_code)]
    pdfium: Arc<Pdfium>,
}

impl PdfiumInner {
    fn open(pdfium: Arc<Pdfium>, source: &DocumentSource) -> Result<Self> {
        let name = source.display_name();
        let document = match source {
            DocumentSource::File(path) => {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve path for {:?}", path))?;
                pdfium
                    .load_pdf_from_file(&absolute, None)
                    .with_context(|| format!("failed to open {:?}", absolute))?
            }
            DocumentSource::Memory { bytes, .. } => pdfium
                .load_pdf_from_byte_vec(bytes.to_vec(), None)
                .with_context(|| format!("failed to open {name}"))?,
        };
        // SAFETY: the document borrows the bindings owned by `pdfium`. It is stored in
        // `self.document`, which is declared before `self.pdfium` and therefore dropped
        // first, so the borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let pages = document
            .pages()
            .iter()
            .enumerate()
            .map(|(index, page)| {
                PageInfo::new(
                    index as u32 + 1,
                    page.width().value as f64,
                    page.height().value as f64,
                )
            })
            .collect();
        let permissions = DocumentPermissions {
            allows_copying: document
                .permissions()
                .can_extract_text_and_graphics()
                .unwrap_or(true),
        };

        Ok(Self {
            document: Mutex::new(document),
            name,
            pages,
            permissions,
            pdfium,
        })
    }

    fn page_height(&self, page_number: u32) -> f64 {
        self.pages
            .get(page_number.saturating_sub(1) as usize)
            .map_or(0.0, |info| info.height)
    }

    fn render(
        &self,
        request: &RegionRenderRequest,
        token: &CancellationToken,
    ) -> Result<Option<RenderImage>> {
        if token.is_canceled() {
            return Ok(None);
        }
        let document = self.document.lock();
        let page = page_at(&document, request.page_number)?;

        let clipped = self
            .pages
            .get(request.page_number.saturating_sub(1) as usize)
            .and_then(|info| region_matrix(request, info))
            .map(|matrix| self.render_clipped(&page, request, matrix));
        let mut image = match clipped {
            Some(Ok(image)) => image,
            Some(Err(err)) => {
                debug!(page = request.page_number, error = %err, "region render failed, cropping a full render");
                self.render_cropped(&page, request)?
            }
            None => self.render_cropped(&page, request)?,
        };
        if token.is_canceled() {
            return Ok(None);
        }
        if request.flags.dark_mode {
            invert_pixels(&mut image.pixels);
        }
        Ok(Some(image))
    }

    /// Renders only the requested window: the bitmap is the region's size and the
    /// page is mapped onto it by `matrix`.
    fn render_clipped(
        &self,
        page: &PdfPage<'_>,
        request: &RegionRenderRequest,
        matrix: [f32; 6],
    ) -> Result<RenderImage> {
        let width = i32::try_from(request.width).context("region width out of range")?;
        let height = i32::try_from(request.height).context("region height out of range")?;
        let [a, b, c, d, e, f] = matrix;
        let config = render_config(request)
            .set_fixed_size(width, height)
            .transform(a, b, c, d, e, f)
            .map_err(|err| anyhow!("invalid region transform: {err:?}"))?
            .clip(0, 0, width, height);
        let bitmap = page.render_with_config(&config).with_context(|| {
            format!("failed to render page {} of {}", request.page_number, self.name)
        })?;
        let rgba = bitmap.as_image().to_rgba8();
        if rgba.width() != request.width || rgba.height() != request.height {
            return Err(anyhow!(
                "region bitmap is {}x{}, expected {}x{}",
                rgba.width(),
                rgba.height(),
                request.width,
                request.height
            ));
        }
        Ok(RenderImage {
            width: request.width,
            height: request.height,
            pixels: rgba.into_raw(),
        })
    }

    /// Renders the whole page at full size and copies the region out of it.
    fn render_cropped(&self, page: &PdfPage<'_>, request: &RegionRenderRequest) -> Result<RenderImage> {
        let width = i32::try_from(request.full_width).context("render width out of range")?;
        let height = i32::try_from(request.full_height).context("render height out of range")?;
        let config = render_config(request).set_target_size(width, height);
        let bitmap = page.render_with_config(&config).with_context(|| {
            format!("failed to render page {} of {}", request.page_number, self.name)
        })?;
        Ok(crop_region(
            &bitmap.as_image().to_rgba8(),
            request.x,
            request.y,
            request.width,
            request.height,
            request.background,
        ))
    }

    fn text(&self, page_number: u32) -> Result<PageText> {
        let document = self.document.lock();
        let page = page_at(&document, page_number)?;
        let height = self.page_height(page_number);
        let text = page
            .text()
            .with_context(|| format!("failed to extract text for page {page_number}"))?;

        let chars = text
            .chars()
            .iter()
            .filter_map(|ch| {
                let value = ch.unicode_char()?;
                if value.is_control() {
                    return None;
                }
                let bounds = ch.loose_bounds().ok()?;
                Some(TextChar::new(
                    value,
                    Rect::new(
                        bounds.left().value as f64,
                        height - bounds.top().value as f64,
                        bounds.right().value as f64,
                        height - bounds.bottom().value as f64,
                    ),
                ))
            })
            .collect();
        Ok(PageText::from_chars(page_number, chars))
    }

    fn links(&self, page_number: u32) -> Result<Vec<Link>> {
        let document = self.document.lock();
        let page = page_at(&document, page_number)?;
        let height = self.page_height(page_number);

        let mut links = Vec::new();
        for link in page.links().iter() {
            let rect = match link.rect() {
                Ok(rect) => rect,
                Err(err) => {
                    warn!(?err, page = page_number, document = %self.name, "failed to resolve link rectangle");
                    continue;
                }
            };
            let rect = Rect::new(
                rect.left().value as f64,
                height - rect.top().value as f64,
                rect.right().value as f64,
                height - rect.bottom().value as f64,
            );
            if rect.is_empty() {
                continue;
            }
            let Some(target) = link_target(&link) else {
                continue;
            };
            links.push(Link::new(vec![rect], target));
        }
        Ok(links)
    }
}

fn render_config(request: &RegionRenderRequest) -> PdfRenderConfig {
    let [red, green, blue, alpha] = request.background;
    PdfRenderConfig::new()
        .set_clear_color(PdfColor::new(red, green, blue, alpha))
        .render_annotations(request.annotation_mode != AnnotationMode::None)
        .render_form_data(request.annotation_mode == AnnotationMode::AnnotationsAndForms)
        .use_grayscale_rendering(request.flags.grayscale)
}

fn page_at(document: &PdfDocument<'static>, page_number: u32) -> Result<PdfPage<'static>> {
    let index: PdfPageIndex = page_number
        .checked_sub(1)
        .ok_or_else(|| anyhow!("page numbers start at 1"))?
        .try_into()
        .map_err(|_| anyhow!("page {} is out of supported range", page_number))?;
    document
        .pages()
        .get(index)
        .with_context(|| format!("page {} out of range", page_number))
}

fn destination_page(destination: &PdfDestination<'_>) -> Option<Destination> {
    let index = destination.page_index().ok()?;
    let index = u32::try_from(index).ok()?;
    Some(Destination::page(index + 1))
}

fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                if let Some(local) = action.as_local_destination_action() {
                    if let Some(destination) = local
                        .destination()
                        .ok()
                        .and_then(|destination| destination_page(&destination))
                    {
                        return Some(LinkTarget::Destination(destination));
                    }
                }
            }
            PdfActionType::Uri => {
                if let Some(uri_action) = action.as_uri_action() {
                    if let Ok(uri) = uri_action.uri() {
                        if !uri.is_empty() {
                            return Some(LinkTarget::Uri(uri));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    link.destination()
        .as_ref()
        .and_then(destination_page)
        .map(LinkTarget::Destination)
}

#[async_trait]
impl DocumentService for PdfiumDocument {
    fn page_count(&self) -> u32 {
        self.inner.pages.len() as u32
    }

    fn page(&self, page_number: u32) -> Option<PageInfo> {
        let index = page_number.checked_sub(1)? as usize;
        self.inner.pages.get(index).copied()
    }

    fn permissions(&self) -> DocumentPermissions {
        self.inner.permissions
    }

    async fn render_region(
        &self,
        request: RegionRenderRequest,
        token: &CancellationToken,
    ) -> Result<Option<RenderImage>> {
        let inner = Arc::clone(&self.inner);
        let token = token.clone();
        tokio::task::spawn_blocking(move || inner.render(&request, &token))
            .await
            .context("render task failed")?
    }

    async fn load_text(&self, page_number: u32) -> Result<PageText> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.text(page_number))
            .await
            .context("text extraction task failed")?
    }

    async fn load_links(&self, page_number: u32) -> Result<Vec<Link>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.links(page_number))
            .await
            .context("link extraction task failed")?
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var("PAGEVIEW_PDFIUM_LIBRARY_PATH").ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {}: {}", path, err);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set PAGEVIEW_PDFIUM_LIBRARY_PATH or install it ({})",
                errors.join(", ")
            ))
        }
    }
}
