// Export modules for use in tests
pub mod panic_handler;
pub mod settings;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export main viewer components
pub use viewer::{
    Container, DocumentInfo, DocumentSource, EngineConfig, FixedContainer, LifecycleEvent,
    PageController, Phase, RenderEvent, Ticket, ViewerError, ViewerHandle, ViewerOptions,
};
