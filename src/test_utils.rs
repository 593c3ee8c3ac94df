pub mod test_helpers {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use std::time::Duration;

    use image::Rgba;

    use crate::viewer::{
        AnnotationElement, AnnotationKind, DocumentSource, EngineConfig, EngineError,
        FixedContainer, LifecycleEvent, LinkService, LinkTarget, OpenOptions, PageController,
        PdfDocument, PdfEngine, PdfPage, RenderTarget, TextSpan, ViewBox, ViewerError,
        ViewerOptions, Viewport,
    };

    /// US Letter in PDF points
    pub const LETTER: (f64, f64) = (612.0, 792.0);

    /// One engine call seen by the stub
    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        Configure(EngineConfig),
        Open(String),
        Render { page: u32, scale: f64, dpr: f64 },
        Text { page: u32 },
        Annotations { page: u32, flipped: bool },
    }

    /// Shared record of engine calls, plus overlap detection for renders
    #[derive(Clone, Debug, Default)]
    pub struct Probe {
        calls: Arc<Mutex<Vec<Call>>>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    impl Probe {
        fn record(&self, call: Call) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }

        fn enter(&self) -> InFlight<'_> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            InFlight(self)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Pages passed to `render`, in call order
        pub fn rendered_pages(&self) -> Vec<u32> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Render { page, .. } => Some(page),
                    _ => None,
                })
                .collect()
        }

        pub fn render_scales(&self) -> Vec<f64> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Render { scale, .. } => Some(scale),
                    _ => None,
                })
                .collect()
        }

        /// True if two engine page calls were ever in flight at once
        pub fn overlapped(&self) -> bool {
            self.overlapped.load(Ordering::SeqCst)
        }

        pub fn clear(&self) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    struct InFlight<'a>(&'a Probe);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.in_flight.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct Faults {
        open: bool,
        render: HashSet<u32>,
        panic: HashSet<u32>,
        text: HashSet<u32>,
    }

    #[derive(Debug)]
    struct Script {
        page_count: u32,
        page_size: (f64, f64),
        title: Option<String>,
        delay: Duration,
        faults: Mutex<Faults>,
        probe: Probe,
    }

    impl Script {
        fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
            self.faults.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Scripted in-memory engine. Every page is filled with `page_color`,
    /// carries one text run and links to the next page.
    #[derive(Clone, Debug)]
    pub struct StubEngine {
        script: Arc<Script>,
    }

    impl StubEngine {
        pub fn new(page_count: u32) -> Self {
            Self::builder(page_count).build()
        }

        pub fn builder(page_count: u32) -> StubEngineBuilder {
            StubEngineBuilder {
                page_count,
                page_size: LETTER,
                title: None,
                delay: Duration::ZERO,
                faults: Faults::default(),
            }
        }

        pub fn probe(&self) -> Probe {
            self.script.probe.clone()
        }

        /// Make the raster step of `page` fail from now on
        pub fn fail_render_on(&self, page: u32) {
            self.script.faults().render.insert(page);
        }

        /// Make every later `open` fail
        pub fn fail_open(&self) {
            self.script.faults().open = true;
        }

        pub fn heal(&self) {
            let mut faults = self.script.faults();
            faults.open = false;
            faults.render.clear();
            faults.panic.clear();
            faults.text.clear();
        }
    }

    pub struct StubEngineBuilder {
        page_count: u32,
        page_size: (f64, f64),
        title: Option<String>,
        delay: Duration,
        faults: Faults,
    }

    impl StubEngineBuilder {
        pub fn page_size(mut self, width: f64, height: f64) -> Self {
            self.page_size = (width, height);
            self
        }

        pub fn title(mut self, title: &str) -> Self {
            self.title = Some(title.to_string());
            self
        }

        /// Sleep inside every raster call
        pub fn render_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn fail_open(mut self) -> Self {
            self.faults.open = true;
            self
        }

        pub fn fail_render_on(mut self, page: u32) -> Self {
            self.faults.render.insert(page);
            self
        }

        pub fn panic_render_on(mut self, page: u32) -> Self {
            self.faults.panic.insert(page);
            self
        }

        pub fn fail_text_on(mut self, page: u32) -> Self {
            self.faults.text.insert(page);
            self
        }

        pub fn build(self) -> StubEngine {
            StubEngine {
                script: Arc::new(Script {
                    page_count: self.page_count,
                    page_size: self.page_size,
                    title: self.title,
                    delay: self.delay,
                    faults: Mutex::new(self.faults),
                    probe: Probe::default(),
                }),
            }
        }
    }

    /// Fill colour of a stub page
    pub fn page_color(page: u32) -> [u8; 4] {
        [(page * 40 % 256) as u8, 100, 200, 255]
    }

    impl PdfEngine for StubEngine {
        type Document = StubDocument;

        fn configure(&mut self, config: &EngineConfig) {
            self.script.probe.record(Call::Configure(config.clone()));
        }

        fn open(
            &mut self,
            source: &DocumentSource,
            _options: &OpenOptions,
        ) -> Result<Self::Document, EngineError> {
            self.script.probe.record(Call::Open(source.describe()));
            if self.script.faults().open {
                return Err(EngineError::generic("stub: corrupt document"));
            }
            Ok(StubDocument {
                script: Arc::clone(&self.script),
            })
        }
    }

    pub struct StubDocument {
        script: Arc<Script>,
    }

    impl PdfDocument for StubDocument {
        type Page = StubPage;

        fn page_count(&self) -> u32 {
            self.script.page_count
        }

        fn page(&self, index: u32) -> Result<Self::Page, EngineError> {
            if index == 0 || index > self.script.page_count {
                return Err(EngineError::PageOutOfRange {
                    page: index,
                    page_count: self.script.page_count,
                });
            }
            Ok(StubPage {
                index,
                script: Arc::clone(&self.script),
            })
        }

        fn title(&self) -> Option<String> {
            self.script.title.clone()
        }
    }

    pub struct StubPage {
        index: u32,
        script: Arc<Script>,
    }

    impl PdfPage for StubPage {
        fn view_box(&self) -> ViewBox {
            let (width, height) = self.script.page_size;
            ViewBox::sized(width, height)
        }

        fn render(
            &self,
            target: &mut RenderTarget<'_>,
            viewport: &Viewport,
        ) -> Result<(), EngineError> {
            let probe = &self.script.probe;
            let _busy = probe.enter();
            probe.record(Call::Render {
                page: self.index,
                scale: viewport.scale,
                dpr: target.device_pixel_ratio,
            });
            if !self.script.delay.is_zero() {
                thread::sleep(self.script.delay);
            }

            let (fail, panic) = {
                let faults = self.script.faults();
                (
                    faults.render.contains(&self.index),
                    faults.panic.contains(&self.index),
                )
            };
            if panic {
                panic!("stub: raster of page {} exploded", self.index);
            }
            if fail {
                return Err(EngineError::generic(format!(
                    "stub: raster of page {} failed",
                    self.index
                )));
            }

            let color = Rgba(page_color(self.index));
            for pixel in target.pixels.pixels_mut() {
                *pixel = color;
            }
            Ok(())
        }

        fn render_text_layer(&self, viewport: &Viewport) -> Result<Vec<TextSpan>, EngineError> {
            let probe = &self.script.probe;
            let _busy = probe.enter();
            probe.record(Call::Text { page: self.index });
            if self.script.faults().text.contains(&self.index) {
                return Err(EngineError::generic("stub: text extraction failed"));
            }

            // Baseline one inch below the top edge, 12pt high
            let top = self.view_box().y1 - 72.0;
            let rect = viewport.to_viewport_rect(72.0, top - 12.0, 272.0, top);
            Ok(vec![TextSpan {
                text: format!("Page {}", self.index),
                font_size: rect.height,
                rect,
            }])
        }

        fn render_annotation_layer(
            &self,
            links: &dyn LinkService,
            viewport: &Viewport,
        ) -> Result<Vec<AnnotationElement>, EngineError> {
            let probe = &self.script.probe;
            let _busy = probe.enter();
            probe.record(Call::Annotations {
                page: self.index,
                flipped: viewport.flipped,
            });

            let mut elements = Vec::new();
            if self.index < self.script.page_count {
                elements.push(AnnotationElement {
                    rect: viewport.to_viewport_rect(72.0, 100.0, 172.0, 120.0),
                    kind: AnnotationKind::Link {
                        href: links.page_href(self.index + 1),
                        target: LinkTarget::SelfFrame,
                    },
                });
            }
            let (href, target) = links.external_link("https://example.com/");
            elements.push(AnnotationElement {
                rect: viewport.to_viewport_rect(72.0, 140.0, 172.0, 160.0),
                kind: AnnotationKind::Link { href, target },
            });
            Ok(elements)
        }
    }

    /// Lifecycle events seen by a listener: kind, page, failed
    pub type EventLog = Arc<Mutex<Vec<(LifecycleEvent, u32, bool)>>>;

    /// Register listeners for both lifecycle events that append to a log
    pub fn record_events<E: PdfEngine>(controller: &PageController<E>) -> EventLog {
        let log: EventLog = Arc::default();
        for kind in [LifecycleEvent::BeforeRender, LifecycleEvent::AfterRender] {
            let log = Arc::clone(&log);
            controller.add_event_listener(kind, move |event| {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((event.kind, event.page, event.failed));
            });
        }
        log
    }

    /// Controller over `engine` in a fixed container of the given CSS size
    pub fn stub_controller(
        engine: StubEngine,
        width: f64,
        height: f64,
    ) -> Result<(PageController<StubEngine>, Arc<FixedContainer>), ViewerError> {
        stub_controller_with(
            engine,
            Arc::new(FixedContainer::new(width, height)),
            ViewerOptions::default(),
        )
    }

    pub fn stub_controller_with(
        engine: StubEngine,
        container: Arc<FixedContainer>,
        options: ViewerOptions,
    ) -> Result<(PageController<StubEngine>, Arc<FixedContainer>), ViewerError> {
        let controller = PageController::new(engine, container.clone(), options)?;
        Ok((controller, container))
    }

    /// Placeholder source for stub documents
    pub fn stub_source() -> DocumentSource {
        DocumentSource::Bytes(Arc::from(&b"%PDF-1.7 stub"[..]))
    }
}
