use std::sync::{Arc, Mutex};

use pdfpane::test_utils::test_helpers::*;
use pdfpane::viewer::{LifecycleEvent, Phase, ViewerError};

use LifecycleEvent::{AfterRender, BeforeRender};

#[test]
fn events_bracket_every_render() {
    let engine = StubEngine::new(3);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let events = record_events(&controller);

    controller.load_document(stub_source()).wait().unwrap();
    controller.next_page().wait().unwrap();
    controller.fit_to_container().wait().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (BeforeRender, 1, false),
            (AfterRender, 1, false),
            (BeforeRender, 2, false),
            (AfterRender, 2, false),
            (BeforeRender, 2, false),
            (AfterRender, 2, false),
        ]
    );
}

#[test]
fn failed_raster_still_fires_after_render() {
    let engine = StubEngine::builder(3).fail_render_on(2).build();
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let events = record_events(&controller);

    controller.load_document(stub_source()).wait().unwrap();
    let err = controller.next_page().wait().unwrap_err();
    assert!(matches!(err, ViewerError::Render { page: 2, .. }), "{err}");

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (BeforeRender, 1, false),
            (AfterRender, 1, false),
            (BeforeRender, 2, false),
            (AfterRender, 2, true),
        ]
    );
    assert_eq!(controller.phase(), Phase::Ready);
}

#[test]
fn queue_recovers_after_failed_render() {
    let engine = StubEngine::builder(3).fail_render_on(2).build();
    let probe = engine.probe();
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    controller.load_document(stub_source()).wait().unwrap();

    let failing = controller.next_page();
    let following = controller.next_page();

    assert!(failing.wait().is_err());
    following.wait().unwrap();
    assert_eq!(controller.page(), 3);
    assert_eq!(probe.rendered_pages(), vec![1, 2, 3]);
    assert_eq!(controller.context().pixel(0, 0), Some(page_color(3)));
}

#[test]
fn queue_recovers_after_panicking_render() {
    let engine = StubEngine::builder(3).panic_render_on(2).build();
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let events = record_events(&controller);
    controller.load_document(stub_source()).wait().unwrap();

    match controller.next_page().wait() {
        Err(ViewerError::Panicked { message }) => assert!(message.contains("page 2")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    controller.next_page().wait().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events[3], (AfterRender, 2, true));
    assert_eq!(events[5], (AfterRender, 3, false));
}

#[test]
fn failed_text_layer_skips_annotations() {
    let engine = StubEngine::builder(2).fail_text_on(2).build();
    let probe = engine.probe();
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let events = record_events(&controller);
    controller.load_document(stub_source()).wait().unwrap();
    probe.clear();

    assert!(controller.next_page().wait().is_err());

    // The raster still ran and settled before the failure was reported
    assert_eq!(probe.rendered_pages(), vec![2]);
    assert!(
        !probe
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Annotations { .. }))
    );
    assert!(controller.regions().annotation_layer.lock().children.is_empty());
    assert_eq!(events.lock().unwrap().last(), Some(&(AfterRender, 2, true)));
}

#[test]
fn failure_in_first_render_fails_the_load() {
    let engine = StubEngine::builder(2).fail_render_on(1).build();
    let (controller, _) = stub_controller(engine.clone(), 306.0, 400.0).unwrap();

    let err = controller.load_document(stub_source()).wait().unwrap_err();
    assert!(matches!(err, ViewerError::Render { page: 1, .. }));

    // The document itself is open; a later render succeeds
    assert_eq!(controller.page_count(), Some(2));
    engine.heal();
    controller.fit_to_container().wait().unwrap();
    assert_eq!(controller.context().pixel(0, 0), Some(page_color(1)));
}

#[test]
fn loading_indicator_hidden_by_first_render_only() {
    let engine = StubEngine::new(3);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let regions = controller.regions();
    assert!(regions.loading.lock().visible);

    controller.load_document(stub_source()).wait().unwrap();
    assert!(!regions.loading.lock().visible);

    regions.show_loading();
    controller.next_page().wait().unwrap();
    assert!(regions.loading.lock().visible);
}

#[test]
fn before_render_fires_ahead_of_layer_reset() {
    let engine = StubEngine::new(2);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    controller.load_document(stub_source()).wait().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&seen);
    controller.add_event_listener(BeforeRender, move |event| {
        let viewer = event.viewer;
        slot.lock().unwrap().push((
            viewer.phase(),
            viewer.page(),
            viewer.regions().text_layer.lock().children.len(),
        ));
    });
    let slot = Arc::clone(&seen);
    controller.add_event_listener(AfterRender, move |event| {
        let viewer = event.viewer;
        slot.lock().unwrap().push((
            viewer.phase(),
            viewer.page(),
            viewer.regions().text_layer.lock().children.len(),
        ));
    });

    controller.next_page().wait().unwrap();

    // Layers still hold page 1 when before-render fires
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Phase::Rendering, 2, 1), (Phase::Ready, 2, 1)]
    );
}

#[test]
fn after_render_listener_can_sample_canvas() {
    let engine = StubEngine::new(2);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&samples);
    controller.add_event_listener(AfterRender, move |event| {
        slot.lock()
            .unwrap()
            .push(event.viewer.context().pixel(10, 10));
    });

    controller.load_document(stub_source()).wait().unwrap();
    controller.next_page().wait().unwrap();

    assert_eq!(
        *samples.lock().unwrap(),
        vec![Some(page_color(1)), Some(page_color(2))]
    );
}

#[test]
fn removed_listener_stops_receiving_events() {
    let engine = StubEngine::new(3);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    let count = Arc::new(Mutex::new(0));
    let slot = Arc::clone(&count);
    let id = controller.add_event_listener(AfterRender, move |_| {
        *slot.lock().unwrap() += 1;
    });

    controller.load_document(stub_source()).wait().unwrap();
    assert!(controller.remove_event_listener(id));
    controller.next_page().wait().unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn panicking_after_render_listener_during_engine_panic_is_contained() {
    let engine = StubEngine::builder(3).panic_render_on(2).build();
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    controller.add_event_listener(AfterRender, |event| {
        if event.failed {
            panic!("listener failed on page {}", event.page);
        }
    });
    let events = record_events(&controller);
    controller.load_document(stub_source()).wait().unwrap();

    assert!(matches!(
        controller.next_page().wait(),
        Err(ViewerError::Panicked { .. })
    ));
    controller.next_page().wait().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events[3], (AfterRender, 2, true));
    assert_eq!(events[5], (AfterRender, 3, false));
}

#[test]
fn panicking_before_render_listener_does_not_skip_the_render() {
    let engine = StubEngine::new(3);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    controller.add_event_listener(BeforeRender, |event| {
        if event.page == 2 {
            panic!("listener failed");
        }
    });
    let events = record_events(&controller);
    controller.load_document(stub_source()).wait().unwrap();

    controller.next_page().wait().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (BeforeRender, 1, false),
            (AfterRender, 1, false),
            (BeforeRender, 2, false),
            (AfterRender, 2, false),
        ]
    );
    assert_eq!(controller.phase(), Phase::Ready);
    assert_eq!(controller.context().pixel(0, 0), Some(page_color(2)));
}

#[test]
fn panicking_listener_does_not_keep_loading_indicator_up() {
    let engine = StubEngine::new(2);
    let (controller, _) = stub_controller(engine, 306.0, 400.0).unwrap();
    controller.add_event_listener(BeforeRender, |_| panic!("listener failed"));

    controller.load_document(stub_source()).wait().unwrap();

    assert!(!controller.regions().loading.lock().visible);
}
