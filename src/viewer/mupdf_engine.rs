//! MuPDF-backed engine
//!
//! MuPDF reports page geometry top-down (origin at the top-left of the page
//! box). Text runs are converted back to bottom-up user space before they
//! go through the flipped viewport; link rectangles go through the
//! unflipped one as they are.

use log::{debug, info};
use mupdf::text_page::TextBlockType;
use mupdf::{Colorspace, Document, Matrix, Page, Pixmap, TextPageFlags};

use super::engine::{
    AnnotationElement, AnnotationKind, DocumentSource, EngineConfig, LinkService, LinkTarget,
    OpenOptions, PdfDocument, PdfEngine, PdfPage, RenderTarget, TextSpan,
};
use super::error::EngineError;
use super::viewport::{ViewBox, Viewport};

/// MIME hint used when opening in-memory documents
const PDF_MAGIC: &str = "application/pdf";

#[derive(Debug, Default)]
pub struct MupdfEngine;

impl MupdfEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PdfEngine for MupdfEngine {
    type Document = MupdfDocument;

    fn configure(&mut self, config: &EngineConfig) {
        if config.worker_src.is_some() {
            debug!("MuPDF renders in-process; worker_src ignored");
        }
    }

    fn open(
        &mut self,
        source: &DocumentSource,
        options: &OpenOptions,
    ) -> Result<Self::Document, EngineError> {
        if let Some(cmap_url) = &options.cmap_url {
            // MuPDF ships its CJK cMaps built in
            debug!("Using built-in cMaps instead of {cmap_url:?}");
        }

        let doc = match source {
            DocumentSource::Path(path) => Document::open(path.to_string_lossy().as_ref())?,
            DocumentSource::Bytes(bytes) => Document::from_bytes(&bytes[..], PDF_MAGIC)?,
            DocumentSource::Url(url) => {
                return Err(EngineError::UnsupportedSource(format!(
                    "{url} (fetch the bytes and open them as DocumentSource::Bytes)"
                )));
            }
        };

        let page_count = doc.page_count()?;
        let page_count = u32::try_from(page_count)
            .map_err(|_| EngineError::generic(format!("Invalid page count {page_count}")))?;
        info!("Opened {} ({page_count} pages)", source.describe());

        Ok(MupdfDocument { doc, page_count })
    }
}

pub struct MupdfDocument {
    doc: Document,
    page_count: u32,
}

impl PdfDocument for MupdfDocument {
    type Page = MupdfPage;

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page(&self, index: u32) -> Result<Self::Page, EngineError> {
        if index == 0 || index > self.page_count {
            return Err(EngineError::PageOutOfRange {
                page: index,
                page_count: self.page_count,
            });
        }
        let page = self.doc.load_page((index - 1) as i32)?;
        let bounds = page.bounds()?;
        let view_box = ViewBox::new(
            f64::from(bounds.x0),
            f64::from(bounds.y0),
            f64::from(bounds.x1),
            f64::from(bounds.y1),
        );
        Ok(MupdfPage { page, view_box })
    }

    fn title(&self) -> Option<String> {
        self.doc
            .metadata(mupdf::MetadataName::Title)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

pub struct MupdfPage {
    page: Page,
    view_box: ViewBox,
}

impl MupdfPage {
    /// Bottom-up user-space y for a top-down MuPDF y
    fn user_y(&self, y: f32) -> f64 {
        self.view_box.y0 + self.view_box.y1 - f64::from(y)
    }
}

impl PdfPage for MupdfPage {
    fn view_box(&self) -> ViewBox {
        self.view_box
    }

    // Page bounds already account for /Rotate

    fn render(
        &self,
        target: &mut RenderTarget<'_>,
        viewport: &Viewport,
    ) -> Result<(), EngineError> {
        let scale = target.raster_scale(viewport) as f32;
        let pixmap = self.page.to_pixmap(
            &Matrix::new_scale(scale, scale),
            &Colorspace::device_rgb(),
            false,
            false,
        )?;
        blit_pixmap(&pixmap, target)
    }

    fn render_text_layer(&self, viewport: &Viewport) -> Result<Vec<TextSpan>, EngineError> {
        let text_page = self.page.to_text_page(TextPageFlags::empty())?;
        let mut spans = Vec::new();

        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let text: String = line.chars().filter_map(|ch| ch.char()).collect();
                if text.trim().is_empty() {
                    continue;
                }
                let bbox = line.bounds();
                let rect = viewport.to_viewport_rect(
                    f64::from(bbox.x0),
                    self.user_y(bbox.y1),
                    f64::from(bbox.x1),
                    self.user_y(bbox.y0),
                );
                spans.push(TextSpan {
                    font_size: rect.height,
                    text,
                    rect,
                });
            }
        }
        Ok(spans)
    }

    fn render_annotation_layer(
        &self,
        links: &dyn LinkService,
        viewport: &Viewport,
    ) -> Result<Vec<AnnotationElement>, EngineError> {
        let elements = self
            .page
            .links()?
            .filter_map(|link| {
                let kind = if let Some(dest) = link.dest {
                    AnnotationKind::Link {
                        href: links.page_href(dest.loc.page_number as u32 + 1),
                        target: LinkTarget::SelfFrame,
                    }
                } else if !link.uri.is_empty() {
                    let (href, target) = links.external_link(&link.uri);
                    AnnotationKind::Link { href, target }
                } else {
                    return None;
                };

                let rect = link.bounds;
                if rect.is_empty() {
                    return None;
                }
                Some(AnnotationElement {
                    rect: viewport.to_viewport_rect(
                        f64::from(rect.x0),
                        f64::from(rect.y0),
                        f64::from(rect.x1),
                        f64::from(rect.y1),
                    ),
                    kind,
                })
            })
            .collect();
        Ok(elements)
    }
}

/// Copy an RGB(A) pixmap into the canvas backing store. The pixmap may be a
/// pixel off the backing size after rounding; only the overlap is copied.
fn blit_pixmap(pixmap: &Pixmap, target: &mut RenderTarget<'_>) -> Result<(), EngineError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(EngineError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < stride.saturating_mul(height) || width * n > stride {
        return Err(EngineError::generic("Pixmap buffer size mismatch"));
    }

    let pixels = &mut *target.pixels;
    let copy_w = width.min(pixels.width() as usize);
    let copy_h = height.min(pixels.height() as usize);
    if copy_w != pixels.width() as usize || copy_h != pixels.height() as usize {
        debug!(
            "Pixmap {width}x{height} does not match canvas {}x{}",
            pixels.width(),
            pixels.height()
        );
    }

    for y in 0..copy_h {
        let row = &samples[y * stride..y * stride + copy_w * n];
        for (x, px) in row.chunks_exact(n).enumerate() {
            pixels.put_pixel(x as u32, y as u32, image::Rgba([px[0], px[1], px[2], 255]));
        }
    }
    Ok(())
}
