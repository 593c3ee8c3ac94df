//! PDF engine collaborator contract
//!
//! The viewer never parses or rasterizes PDF content itself. It sequences
//! calls into an engine implementing these traits and places whatever the
//! engine produces into the canvas and layer regions.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::error::EngineError;
use super::viewport::{CssRect, ViewBox, Viewport};

/// Engine resource locations, handed to the engine once at construction
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Location of the engine's worker script, for engines that use one
    pub worker_src: Option<String>,
    /// Directory holding character-map (cMap) resources
    pub cmap_url: Option<String>,
    /// Whether the cMap resources are packed (binary)
    pub cmap_packed: bool,
}

impl EngineConfig {
    /// Per-document open options derived from this configuration
    #[must_use]
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            cmap_url: self.cmap_url.clone(),
            cmap_packed: self.cmap_packed,
        }
    }
}

/// Options forwarded to `PdfEngine::open`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub cmap_url: Option<String>,
    pub cmap_packed: bool,
}

/// Where a document comes from
#[derive(Clone, Debug)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    Url(String),
}

impl DocumentSource {
    /// Short human-readable description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            Self::Url(url) => url.clone(),
        }
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

/// Document metadata reported after a successful load
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub title: Option<String>,
}

/// Raster destination handed to `PdfPage::render`
pub struct RenderTarget<'a> {
    /// Canvas backing store, already sized to the device-scaled viewport
    pub pixels: &'a mut RgbaImage,
    /// Device pixel ratio applied on top of the viewport scale
    pub device_pixel_ratio: f64,
}

impl RenderTarget<'_> {
    /// Effective rasterization scale (viewport scale times device pixel ratio)
    #[must_use]
    pub fn raster_scale(&self, viewport: &Viewport) -> f64 {
        viewport.scale * self.device_pixel_ratio
    }
}

/// One positioned run of text in the text layer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextSpan {
    pub text: String,
    #[serde(flatten)]
    pub rect: CssRect,
    pub font_size: f64,
}

/// Where an activated link should open
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTarget {
    #[default]
    SelfFrame,
    Blank,
    Parent,
    Top,
}

/// Kind of a positioned annotation element
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationKind {
    Link { href: String, target: LinkTarget },
    Other { subtype: String },
}

/// One positioned element of the annotation layer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnnotationElement {
    #[serde(flatten)]
    pub rect: CssRect,
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

/// Resolves link destinations for the annotation layer
pub trait LinkService {
    /// Href for an internal destination (1-based page)
    fn page_href(&self, page: u32) -> String;

    /// Href and target for an external URI
    fn external_link(&self, uri: &str) -> (String, LinkTarget);
}

/// Link service without navigation history: internal links become
/// `#page=N` fragments, external links keep their URI
#[derive(Clone, Debug, Default)]
pub struct SimpleLinkService {
    pub external_target: LinkTarget,
}

impl LinkService for SimpleLinkService {
    fn page_href(&self, page: u32) -> String {
        format!("#page={page}")
    }

    fn external_link(&self, uri: &str) -> (String, LinkTarget) {
        (uri.to_string(), self.external_target)
    }
}

/// Opens documents. Lives on the render worker thread.
pub trait PdfEngine: Send + 'static {
    type Document: PdfDocument + 'static;

    /// Receive resource locations once, before any document is opened
    fn configure(&mut self, _config: &EngineConfig) {}

    fn open(
        &mut self,
        source: &DocumentSource,
        options: &OpenOptions,
    ) -> Result<Self::Document, EngineError>;
}

/// An opened document
pub trait PdfDocument {
    type Page: PdfPage;

    fn page_count(&self) -> u32;

    /// Fetch a page by 1-based index
    fn page(&self, index: u32) -> Result<Self::Page, EngineError>;

    fn title(&self) -> Option<String> {
        None
    }
}

/// A fetched page
pub trait PdfPage {
    /// Intrinsic page box in PDF user space
    fn view_box(&self) -> ViewBox;

    /// Intrinsic page rotation in degrees
    fn rotation(&self) -> i32 {
        0
    }

    fn viewport(&self, scale: f64) -> Viewport {
        Viewport::new(self.view_box(), scale, self.rotation())
    }

    /// Rasterize into the canvas backing store
    fn render(&self, target: &mut RenderTarget<'_>, viewport: &Viewport)
    -> Result<(), EngineError>;

    /// Build the positioned text runs for `viewport`
    fn render_text_layer(&self, viewport: &Viewport) -> Result<Vec<TextSpan>, EngineError>;

    /// Build the positioned annotation elements. `viewport` has its
    /// vertical flip disabled.
    fn render_annotation_layer(
        &self,
        links: &dyn LinkService,
        viewport: &Viewport,
    ) -> Result<Vec<AnnotationElement>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_options_forward_cmap_settings() {
        let config = EngineConfig {
            worker_src: Some("pdf.worker.js".into()),
            cmap_url: Some("/cmaps/".into()),
            cmap_packed: true,
        };
        assert_eq!(
            config.open_options(),
            OpenOptions {
                cmap_url: Some("/cmaps/".into()),
                cmap_packed: true,
            }
        );
    }

    #[test]
    fn simple_link_service_builds_page_fragments() {
        let links = SimpleLinkService {
            external_target: LinkTarget::Blank,
        };
        assert_eq!(links.page_href(7), "#page=7");
        assert_eq!(
            links.external_link("https://example.com"),
            ("https://example.com".to_string(), LinkTarget::Blank)
        );
    }

    #[test]
    fn annotation_serializes_flat() {
        let element = AnnotationElement {
            rect: CssRect {
                left: 1.0,
                top: 2.0,
                width: 3.0,
                height: 4.0,
            },
            kind: AnnotationKind::Link {
                href: "#page=2".into(),
                target: LinkTarget::SelfFrame,
            },
        };
        let json = serde_json::to_value(&element).expect("serialize");
        assert_eq!(json["kind"], "link");
        assert_eq!(json["href"], "#page=2");
        assert_eq!(json["target"], "self_frame");
        assert_eq!(json["left"], 1.0);
    }
}
