//! Render lifecycle events
//!
//! Two events bracket every render attempt: `before-render` fires before
//! the page is fetched and the layers are cleared, `after-render` fires
//! once the attempt is over, whether it succeeded or not. Listeners run on
//! the render worker and receive a `ViewerHandle` for reading the canvas.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::error;

use super::controller::{Phase, ViewState};
use super::surface::{DrawingContext, Regions};

pub const BEFORE_RENDER: &str = "before-render";
pub const AFTER_RENDER: &str = "after-render";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BeforeRender,
    AfterRender,
}

impl LifecycleEvent {
    /// Well-known event name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BeforeRender => BEFORE_RENDER,
            Self::AfterRender => AFTER_RENDER,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            BEFORE_RENDER => Some(Self::BeforeRender),
            AFTER_RENDER => Some(Self::AfterRender),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload delivered to lifecycle listeners
#[derive(Debug)]
pub struct RenderEvent<'a> {
    pub kind: LifecycleEvent,
    /// 1-based page the render was requested for
    pub page: u32,
    /// Set on `after-render` when the attempt did not complete
    pub failed: bool,
    pub viewer: &'a ViewerHandle,
}

/// Read-only view of a page controller, shareable across threads
#[derive(Clone, Debug)]
pub struct ViewerHandle {
    regions: Arc<Regions>,
    context: DrawingContext,
    state: Arc<Mutex<ViewState>>,
}

impl ViewerHandle {
    pub(crate) fn new(
        regions: Arc<Regions>,
        context: DrawingContext,
        state: Arc<Mutex<ViewState>>,
    ) -> Self {
        Self {
            regions,
            context,
            state,
        }
    }

    pub fn context(&self) -> &DrawingContext {
        &self.context
    }

    pub fn regions(&self) -> &Regions {
        &self.regions
    }

    pub fn view_state(&self) -> ViewState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
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
}

/// Identifies a registered listener for later removal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

type Listener = Arc<dyn Fn(&RenderEvent<'_>) + Send + Sync>;

/// Listener registry for lifecycle events
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, LifecycleEvent, Listener)>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, kind: LifecycleEvent, listener: F) -> ListenerId
    where
        F: Fn(&RenderEvent<'_>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _, _)| *registered != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn listener_count(&self, kind: LifecycleEvent) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .count()
    }

    /// Invoke every listener for `event.kind` in registration order.
    ///
    /// The registry lock is released before listeners run, so a listener
    /// may add or remove listeners. A panicking listener is logged and the
    /// remaining listeners still run.
    pub fn dispatch(&self, event: &RenderEvent<'_>) {
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(
                    "{} listener for page {} panicked: {}",
                    event.kind,
                    event.page,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("before_render", &self.listener_count(LifecycleEvent::BeforeRender))
            .field("after_render", &self.listener_count(LifecycleEvent::AfterRender))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::viewer::template::{DEFAULT_TEMPLATE, RegionSelectors, bind_regions};

    fn handle() -> ViewerHandle {
        let regions = Arc::new(
            bind_regions(DEFAULT_TEMPLATE, &RegionSelectors::default()).expect("default template"),
        );
        let context = regions.context_2d().expect("canvas");
        ViewerHandle::new(regions, context, Arc::new(Mutex::new(ViewState::new(1))))
    }

    #[test]
    fn event_names_round_trip() {
        assert_eq!(LifecycleEvent::BeforeRender.name(), "before-render");
        assert_eq!(LifecycleEvent::AfterRender.to_string(), "after-render");
        assert_eq!(
            LifecycleEvent::from_name("after-render"),
            Some(LifecycleEvent::AfterRender)
        );
        assert_eq!(LifecycleEvent::from_name("render"), None);
    }

    #[test]
    fn dispatch_only_reaches_matching_listeners() {
        let bus = EventBus::new();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&before);
        bus.add_listener(LifecycleEvent::BeforeRender, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&after);
        bus.add_listener(LifecycleEvent::AfterRender, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let viewer = handle();
        bus.dispatch(&RenderEvent {
            kind: LifecycleEvent::BeforeRender,
            page: 1,
            failed: false,
            viewer: &viewer,
        });

        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = bus.add_listener(LifecycleEvent::AfterRender, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));

        let viewer = handle();
        bus.dispatch(&RenderEvent {
            kind: LifecycleEvent::AfterRender,
            page: 1,
            failed: false,
            viewer: &viewer,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(LifecycleEvent::AfterRender), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.add_listener(LifecycleEvent::AfterRender, |_| panic!("listener failed"));
        let counter = Arc::clone(&calls);
        bus.add_listener(LifecycleEvent::AfterRender, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let viewer = handle();
        bus.dispatch(&RenderEvent {
            kind: LifecycleEvent::AfterRender,
            page: 1,
            failed: false,
            viewer: &viewer,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_read_canvas_through_handle() {
        let bus = EventBus::new();
        let sampled = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&sampled);
        bus.add_listener(LifecycleEvent::AfterRender, move |event| {
            *slot.lock().unwrap() = event.viewer.context().pixel(0, 0);
        });

        let viewer = handle();
        viewer
            .regions()
            .canvas
            .lock()
            .backing
            .put_pixel(0, 0, image::Rgba([1, 2, 3, 255]));
        bus.dispatch(&RenderEvent {
            kind: LifecycleEvent::AfterRender,
            page: 1,
            failed: false,
            viewer: &viewer,
        });

        assert_eq!(*sampled.lock().unwrap(), Some([1, 2, 3, 255]));
    }
}
