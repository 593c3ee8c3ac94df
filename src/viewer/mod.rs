//! PDF page viewer infrastructure

mod controller;
mod engine;
mod error;
mod events;
#[cfg(feature = "pdf")]
mod mupdf_engine;
mod queue;
mod surface;
mod template;
mod viewport;

pub use controller::{
    PageController, Phase, RENDER_THREAD_NAME, ViewState, ViewerOptions, progress_percent,
};
pub use engine::{
    AnnotationElement, AnnotationKind, DocumentInfo, DocumentSource, EngineConfig, LinkService,
    LinkTarget, OpenOptions, PdfDocument, PdfEngine, PdfPage, RenderTarget, SimpleLinkService,
    TextSpan,
};
pub use error::{EngineError, ViewerError};
pub use events::{
    AFTER_RENDER, BEFORE_RENDER, EventBus, LifecycleEvent, ListenerId, RenderEvent, ViewerHandle,
};
#[cfg(feature = "pdf")]
pub use mupdf_engine::{MupdfDocument, MupdfEngine, MupdfPage};
pub use queue::{RenderQueue, Ticket};
pub use surface::{
    Bounds, CanvasState, Container, DrawingContext, Element, ElementInfo, FixedContainer,
    IndicatorState, LayerState, ProgressState, Regions,
};
pub use template::{DEFAULT_TEMPLATE, RegionSelectors, bind_regions};
pub use viewport::{CssRect, ViewBox, Viewport, backing_size, fit_scale};
