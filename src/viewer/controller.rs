//! Page controller
//!
//! Binds the viewer regions, owns the page index and routes every engine
//! call through the render queue. The document handle lives on the render
//! worker; the controller only sees its page count through `ViewState`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use super::engine::{
    DocumentInfo, DocumentSource, EngineConfig, LinkTarget, OpenOptions, PdfDocument, PdfEngine,
    PdfPage, RenderTarget, SimpleLinkService,
};
use super::error::{EngineError, ViewerError};
use super::events::{EventBus, LifecycleEvent, ListenerId, RenderEvent, ViewerHandle};
use super::queue::{RenderQueue, Ticket};
use super::surface::{Container, DrawingContext, Regions};
use super::template::{DEFAULT_TEMPLATE, RegionSelectors, bind_regions};
use super::viewport::{backing_size, fit_scale};

/// Name of the render worker thread
pub const RENDER_THREAD_NAME: &str = "pdfpane-render";

/// Controller lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Regions bound, no document loaded yet
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Rendering,
    /// The last load failed; no document is held
    LoadFailed,
}

/// Page index and document presence, shared with the render worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewState {
    pub phase: Phase,
    /// 1-based current page
    pub page: u32,
    /// `None` until a document is loaded
    pub page_count: Option<u32>,
}

impl ViewState {
    #[must_use]
    pub fn new(initial_page: u32) -> Self {
        Self {
            phase: Phase::Uninitialized,
            page: initial_page.max(1),
            page_count: None,
        }
    }

    #[must_use]
    pub fn has_document(&self) -> bool {
        self.page_count.is_some()
    }
}

/// Construction options
#[derive(Clone, Debug)]
pub struct ViewerOptions {
    /// Skeleton markup; `DEFAULT_TEMPLATE` when `None`
    pub template: Option<String>,
    pub selectors: RegionSelectors,
    /// 1-based page shown after the first load
    pub initial_page: u32,
    pub engine: EngineConfig,
    /// Target for external links in the annotation layer
    pub external_link_target: LinkTarget,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            template: None,
            selectors: RegionSelectors::default(),
            initial_page: 1,
            engine: EngineConfig::default(),
            external_link_target: LinkTarget::default(),
        }
    }
}

/// Progress bar fill for a 1-based page: 0% on the first page, 100% on the
/// last, and 100% for single-page documents
#[must_use]
pub fn progress_percent(page: u32, page_count: u32) -> f64 {
    if page_count <= 1 {
        return 100.0;
    }
    let position = page.clamp(1, page_count) - 1;
    100.0 * f64::from(position) / f64::from(page_count - 1)
}

fn lock_state(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives an external PDF engine into the bound viewer regions
pub struct PageController<E: PdfEngine> {
    container: Arc<dyn Container>,
    regions: Arc<Regions>,
    context: DrawingContext,
    events: Arc<EventBus>,
    state: Arc<Mutex<ViewState>>,
    handle: ViewerHandle,
    open_options: OpenOptions,
    queue: RenderQueue<RenderWorker<E>>,
}

impl<E: PdfEngine> PageController<E> {
    /// Bind the skeleton inside `container`, acquire the drawing context and
    /// start the render worker. Ends with an initial fit, which renders
    /// nothing because no document is loaded yet.
    pub fn new(
        mut engine: E,
        container: Arc<dyn Container>,
        options: ViewerOptions,
    ) -> Result<Self, ViewerError> {
        let template = options.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let regions = Arc::new(bind_regions(template, &options.selectors)?);
        let context = regions.context_2d()?;

        engine.configure(&options.engine);

        let events = Arc::new(EventBus::new());
        let state = Arc::new(Mutex::new(ViewState::new(options.initial_page)));
        let handle = ViewerHandle::new(Arc::clone(&regions), context.clone(), Arc::clone(&state));

        let queue = {
            let container = Arc::clone(&container);
            let regions = Arc::clone(&regions);
            let events = Arc::clone(&events);
            let state = Arc::clone(&state);
            let handle = handle.clone();
            let links = SimpleLinkService {
                external_target: options.external_link_target,
            };
            RenderQueue::spawn(RENDER_THREAD_NAME, move || RenderWorker {
                engine,
                document: None,
                container,
                regions,
                events,
                state,
                handle,
                links,
            })?
        };

        let controller = Self {
            container,
            regions,
            context,
            events,
            state,
            handle,
            open_options: options.engine.open_options(),
            queue,
        };
        // Resolves immediately: there is no document to render yet
        let _ = controller.fit_to_container();
        Ok(controller)
    }

    /// Open a document and render the current page.
    ///
    /// The ticket resolves after that first render. The loading indicator
    /// is hidden by the first `before-render` of this load.
    pub fn load_document(&self, source: impl Into<DocumentSource>) -> Ticket<DocumentInfo> {
        let source = source.into();
        let options = self.open_options.clone();

        self.queue
            .submit(move |worker: &mut RenderWorker<E>| worker.load(&source, &options))
    }

    /// Match the canvas backing store to the container box and re-render
    pub fn fit_to_container(&self) -> Ticket<()> {
        let bounds = self.container.bounding_box();
        let to_px = |v: f64| {
            if v.is_finite() && v > 0.0 {
                v.floor().min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        };
        self.regions
            .canvas
            .lock()
            .resize_backing(to_px(bounds.width), to_px(bounds.height));

        self.enqueue_render(self.page())
    }

    pub fn previous_page(&self) -> Ticket<()> {
        self.navigate(|page, _| page.checked_sub(1).filter(|&p| p >= 1))
    }

    pub fn next_page(&self) -> Ticket<()> {
        self.navigate(|page, page_count| page.checked_add(1).filter(|&p| p <= page_count))
    }

    /// Jump to a 1-based page, clamped to the document
    pub fn go_to_page(&self, page: u32) -> Ticket<()> {
        self.navigate(move |current, page_count| {
            let target = page.clamp(1, page_count);
            (target != current).then_some(target)
        })
    }

    /// Resolves once everything queued so far has finished
    pub fn flush(&self) -> Ticket<()> {
        self.queue.flush()
    }

    /// Queue a render of `page`. Without a document this resolves
    /// immediately and never joins the queue.
    pub fn enqueue_render(&self, page: u32) -> Ticket<()> {
        if !self.view_state().has_document() {
            debug!("No document loaded; render of page {page} skipped");
            return Ticket::ready(Ok(()));
        }
        self.queue
            .submit(move |worker: &mut RenderWorker<E>| worker.render_queued(page))
    }

    fn navigate(&self, step: impl FnOnce(u32, u32) -> Option<u32>) -> Ticket<()> {
        let target = {
            let mut state = lock_state(&self.state);
            let Some(page_count) = state.page_count else {
                return Ticket::ready(Ok(()));
            };
            let Some(target) = step(state.page, page_count) else {
                return Ticket::ready(Ok(()));
            };
            state.page = target;
            target
        };
        self.enqueue_render(target)
    }

    pub fn add_event_listener<F>(&self, kind: LifecycleEvent, listener: F) -> ListenerId
    where
        F: Fn(&RenderEvent<'_>) + Send + Sync + 'static,
    {
        self.events.add_listener(kind, listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn context(&self) -> &DrawingContext {
        &self.context
    }

    pub fn regions(&self) -> &Regions {
        &self.regions
    }

    pub fn handle(&self) -> &ViewerHandle {
        &self.handle
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    pub fn view_state(&self) -> ViewState {
        *lock_state(&self.state)
    }

    pub fn page(&self) -> u32 {
        self.view_state().page
    }

    pub fn page_count(&self) -> Option<u32> {
        self.view_state().page_count
    }

    pub fn phase(&self) -> Phase {
        self.view_state().phase
    }

    /// Finish queued work and stop the render worker
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
    }
}

impl<E: PdfEngine> std::fmt::Debug for PageController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageController")
            .field("state", &self.view_state())
            .field("events", &self.events)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// State owned by the render worker thread
struct RenderWorker<E: PdfEngine> {
    engine: E,
    document: Option<E::Document>,
    container: Arc<dyn Container>,
    regions: Arc<Regions>,
    events: Arc<EventBus>,
    state: Arc<Mutex<ViewState>>,
    handle: ViewerHandle,
    links: SimpleLinkService,
}

impl<E: PdfEngine> RenderWorker<E> {
    fn load(
        &mut self,
        source: &DocumentSource,
        options: &OpenOptions,
    ) -> Result<DocumentInfo, ViewerError> {
        self.update_state(|state| state.phase = Phase::Loading);
        self.regions.show_loading();

        let regions = Arc::clone(&self.regions);
        let _hide_loading = ScopedListener::add(
            Arc::clone(&self.events),
            LifecycleEvent::BeforeRender,
            move |_| regions.hide_loading(),
        );

        self.open_and_render(source, options)
    }

    fn open_and_render(
        &mut self,
        source: &DocumentSource,
        options: &OpenOptions,
    ) -> Result<DocumentInfo, ViewerError> {
        info!("Opening document {}", source.describe());

        let opened = self.engine.open(source, options).and_then(|document| {
            if document.page_count() == 0 {
                Err(EngineError::generic("document has no pages"))
            } else {
                Ok(document)
            }
        });

        let document = match opened {
            Ok(document) => document,
            Err(e) => {
                error!("Failed to open {}: {e}", source.describe());
                self.document = None;
                self.update_state(|state| {
                    state.page_count = None;
                    state.phase = Phase::LoadFailed;
                });
                return Err(ViewerError::Open(e));
            }
        };

        let info = DocumentInfo {
            page_count: document.page_count(),
            title: document.title(),
        };
        self.document = Some(document);

        let page = self.update_state(|state| {
            state.page_count = Some(info.page_count);
            state.page = state.page.clamp(1, info.page_count);
            state.phase = Phase::Ready;
            state.page
        });
        info!(
            "Loaded {} ({} pages), showing page {page}",
            source.describe(),
            info.page_count
        );

        self.render_page(page)?;
        Ok(info)
    }

    /// A load that failed after this render was queued leaves nothing to draw
    fn render_queued(&self, page: u32) -> Result<(), ViewerError> {
        if self.document.is_none() {
            debug!("Document gone; queued render of page {page} dropped");
            return Ok(());
        }
        self.render_page(page)
    }

    fn render_page(&self, page: u32) -> Result<(), ViewerError> {
        let mut after_render = AfterRender {
            events: &self.events,
            viewer: &self.handle,
            state: &self.state,
            page,
            completed: false,
        };

        self.update_state(|state| state.phase = Phase::Rendering);
        self.events.dispatch(&RenderEvent {
            kind: LifecycleEvent::BeforeRender,
            page,
            failed: false,
            viewer: &self.handle,
        });

        let result = self.draw_page(page);
        if let Err(e) = &result {
            warn!("Render of page {page} failed: {e}");
        }
        after_render.completed = result.is_ok();
        result
    }

    fn draw_page(&self, page_index: u32) -> Result<(), ViewerError> {
        let document = self.document.as_ref().ok_or(ViewerError::NoDocument)?;
        let page = document
            .page(page_index)
            .map_err(|e| ViewerError::render(page_index, e))?;

        self.regions.text_layer.lock().clear();
        self.regions.annotation_layer.lock().clear();

        let intrinsic = page.viewport(1.0);
        let container_width = self.container.bounding_box().width;
        let canvas_width = self.regions.canvas.lock().css_width;
        let scale = fit_scale(container_width, canvas_width, intrinsic.width);
        let viewport = page.viewport(scale);

        let device_pixel_ratio = self.container.device_pixel_ratio();
        let (backing_width, backing_height) = backing_size(&viewport, device_pixel_ratio);
        debug!(
            "Page {page_index}: scale {scale:.3}, css {:.1}x{:.1}, backing {backing_width}x{backing_height}",
            viewport.width, viewport.height
        );

        self.regions
            .text_layer
            .lock()
            .set_size(viewport.width, viewport.height);
        self.regions
            .annotation_layer
            .lock()
            .set_size(viewport.width, viewport.height);

        let raster = {
            let mut canvas = self.regions.canvas.lock();
            canvas.resize_backing(backing_width, backing_height);
            canvas.css_width = viewport.width;
            canvas.css_height = viewport.height;
            let mut target = RenderTarget {
                pixels: &mut canvas.backing,
                device_pixel_ratio: device_pixel_ratio_or_one(device_pixel_ratio),
            };
            page.render(&mut target, &viewport)
        };
        let text = page.render_text_layer(&viewport);

        // Annotations only go in once both the raster and the text have settled
        let spans = match (raster, text) {
            (Ok(()), Ok(spans)) => spans,
            (Err(e), _) | (_, Err(e)) => return Err(ViewerError::render(page_index, e)),
        };
        self.regions.text_layer.lock().children.extend(spans);

        let annotations = page
            .render_annotation_layer(&self.links, &viewport.clone_unflipped())
            .map_err(|e| ViewerError::render(page_index, e))?;
        self.regions
            .annotation_layer
            .lock()
            .children
            .extend(annotations);

        self.regions.progress.lock().percent =
            progress_percent(page_index, document.page_count());
        Ok(())
    }

    fn update_state<T>(&self, f: impl FnOnce(&mut ViewState) -> T) -> T {
        f(&mut lock_state(&self.state))
    }
}

fn device_pixel_ratio_or_one(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}

/// Listener registration that lasts until dropped
struct ScopedListener {
    events: Arc<EventBus>,
    id: ListenerId,
}

impl ScopedListener {
    fn add<F>(events: Arc<EventBus>, kind: LifecycleEvent, listener: F) -> Self
    where
        F: Fn(&RenderEvent<'_>) + Send + Sync + 'static,
    {
        let id = events.add_listener(kind, listener);
        Self { events, id }
    }
}

impl Drop for ScopedListener {
    fn drop(&mut self) {
        self.events.remove_listener(self.id);
    }
}

/// Dispatches `after-render` when dropped, on every exit path of a render
struct AfterRender<'a> {
    events: &'a EventBus,
    viewer: &'a ViewerHandle,
    state: &'a Mutex<ViewState>,
    page: u32,
    completed: bool,
}

impl Drop for AfterRender<'_> {
    fn drop(&mut self) {
        {
            let mut state = lock_state(self.state);
            if state.phase == Phase::Rendering {
                state.phase = Phase::Ready;
            }
        }
        self.events.dispatch(&RenderEvent {
            kind: LifecycleEvent::AfterRender,
            page: self.page,
            failed: !self.completed,
            viewer: self.viewer,
        });
    }
}
