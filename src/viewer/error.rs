//! Viewer and engine error types

/// Errors reported by the PDF engine collaborator
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("unsupported document source: {0}")]
    UnsupportedSource(String),

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("{detail}")]
    Generic { detail: String },
}

impl EngineError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Errors surfaced by the page controller and its render queue
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("2D drawing context unavailable: `{selector}` is a <{tag}>, not a <canvas>")]
    ContextUnavailable { selector: String, tag: String },

    #[error("required region `{region}` not found (selector `{selector}`)")]
    MissingRegion {
        region: &'static str,
        selector: String,
    },

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),

    #[error("template: {0}")]
    Template(String),

    #[error("failed to start render worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to open document: {0}")]
    Open(#[source] EngineError),

    #[error("render of page {page} failed: {source}")]
    Render {
        page: u32,
        #[source]
        source: EngineError,
    },

    #[error("render task panicked: {message}")]
    Panicked { message: String },

    #[error("no document loaded")]
    NoDocument,

    #[error("render queue is closed")]
    QueueClosed,
}

impl ViewerError {
    pub fn render(page: u32, source: EngineError) -> Self {
        Self::Render { page, source }
    }
}
