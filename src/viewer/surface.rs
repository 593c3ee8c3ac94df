//! Viewer regions: canvas, text layer, annotation layer and indicators
//!
//! Each region is an `Element` carrying the markup it was bound from plus
//! mutable state behind its own lock. The render worker writes into the
//! regions; the host reads them through the controller accessors.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use image::{Rgba, RgbaImage};

use super::engine::{AnnotationElement, TextSpan};
use super::error::ViewerError;

/// Pixel bounding box, like a DOM rect
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    #[must_use]
    pub const fn sized(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// Host element the viewer is laid out in
pub trait Container: Send + Sync {
    /// Current pixel bounding box
    fn bounding_box(&self) -> Bounds;

    fn device_pixel_ratio(&self) -> f64 {
        1.0
    }
}

/// Resizable in-memory container
#[derive(Debug)]
pub struct FixedContainer {
    bounds: RwLock<Bounds>,
    device_pixel_ratio: f64,
}

impl FixedContainer {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self::with_device_pixel_ratio(width, height, 1.0)
    }

    #[must_use]
    pub fn with_device_pixel_ratio(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            bounds: RwLock::new(Bounds::sized(width, height)),
            device_pixel_ratio,
        }
    }

    pub fn resize(&self, width: f64, height: f64) {
        let mut bounds = self.bounds.write().unwrap_or_else(PoisonError::into_inner);
        bounds.width = width;
        bounds.height = height;
    }
}

impl Container for FixedContainer {
    fn bounding_box(&self) -> Bounds {
        *self.bounds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }
}

/// Markup identity of a bound region
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementInfo {
    /// Selector the region was resolved with
    pub selector: String,
    /// Lowercase tag name
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

/// A bound region with its mutable state
#[derive(Debug)]
pub struct Element<T> {
    info: ElementInfo,
    state: Mutex<T>,
}

impl<T> Element<T> {
    pub fn new(info: ElementInfo, state: T) -> Self {
        Self {
            info,
            state: Mutex::new(state),
        }
    }

    pub fn info(&self) -> &ElementInfo {
        &self.info
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Canvas backing store plus its CSS-visible size
#[derive(Debug)]
pub struct CanvasState {
    pub backing: RgbaImage,
    pub css_width: f64,
    pub css_height: f64,
}

impl CanvasState {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            backing: RgbaImage::new(width, height),
            css_width: f64::from(width),
            css_height: f64::from(height),
        }
    }

    /// Replace the backing store; like assigning canvas width/height,
    /// this clears the content even when the size is unchanged
    pub fn resize_backing(&mut self, width: u32, height: u32) {
        self.backing = RgbaImage::new(width, height);
    }
}

/// Text or annotation layer contents
#[derive(Debug)]
pub struct LayerState<T> {
    pub css_width: f64,
    pub css_height: f64,
    pub children: Vec<T>,
}

impl<T> Default for LayerState<T> {
    fn default() -> Self {
        Self {
            css_width: 0.0,
            css_height: 0.0,
            children: Vec::new(),
        }
    }
}

impl<T> LayerState<T> {
    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.css_width = width;
        self.css_height = height;
    }
}

/// Progress bar fill
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressState {
    pub percent: f64,
}

/// Visibility of an indicator such as the loading spinner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorState {
    pub visible: bool,
}

/// All regions bound from the skeleton template
#[derive(Debug)]
pub struct Regions {
    pub canvas: Element<CanvasState>,
    pub text_layer: Element<LayerState<TextSpan>>,
    pub annotation_layer: Element<LayerState<AnnotationElement>>,
    pub progress: Element<ProgressState>,
    pub loading: Element<IndicatorState>,
}

impl Regions {
    /// Acquire the canvas 2D drawing context.
    ///
    /// Fails when the element bound as the canvas region is not a `<canvas>`.
    pub fn context_2d(self: &Arc<Self>) -> Result<DrawingContext, ViewerError> {
        let info = self.canvas.info();
        if info.tag != "canvas" {
            return Err(ViewerError::ContextUnavailable {
                selector: info.selector.clone(),
                tag: info.tag.clone(),
            });
        }
        Ok(DrawingContext {
            regions: Arc::clone(self),
        })
    }

    pub fn hide_loading(&self) {
        self.loading.lock().visible = false;
    }

    pub fn show_loading(&self) {
        self.loading.lock().visible = true;
    }
}

/// Read access to the canvas pixels
#[derive(Clone, Debug)]
pub struct DrawingContext {
    regions: Arc<Regions>,
}

impl DrawingContext {
    /// Backing store size in device pixels
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.regions.canvas.lock().backing.dimensions()
    }

    /// CSS-visible canvas size
    #[must_use]
    pub fn css_size(&self) -> (f64, f64) {
        let canvas = self.regions.canvas.lock();
        (canvas.css_width, canvas.css_height)
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let canvas = self.regions.canvas.lock();
        let Rgba(px) = canvas.backing.get_pixel_checked(x, y)?;
        Some(*px)
    }

    /// Copy of the current canvas content
    #[must_use]
    pub fn snapshot(&self) -> RgbaImage {
        self.regions.canvas.lock().backing.clone()
    }
}
