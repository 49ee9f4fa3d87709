//! Scoped resources and adaptive consumers under one root

use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::{Element, InputEvent, PointerEvent, ReactiveGraph, Size};
use orrery_fiber::{
    Background, BufferAttribute, Color, Geometry, HeadlessRenderer, Object3D, Root, RootConfig,
    RootDescriptor,
};
use orrery_helpers::{
    adaptive_dpr, adaptive_events, computed_attribute, cube_camera, orbit_controls,
    wobble_material, ControlsProps, CubeCameraOptions, Frames, OrbitOptions, WobbleOptions,
};

const CONFIG: &str = r#"
frameloop = "demand"
device_pixel_ratio = 2.0

[dpr]
min = 0.5
max = 2.0

[performance]
min = 0.5
debounce_ms = 100
"#;

fn root(graph: &ReactiveGraph) -> (Root, Element, Rc<RefCell<HeadlessRenderer>>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let element = Element::with_size("canvas", Size::new(640.0, 480.0));
    let (renderer, handle) = HeadlessRenderer::shared(element.clone());
    let config = RootConfig::from_toml_str(CONFIG).unwrap();
    let root = Root::create(graph, RootDescriptor::new(handle).with_config(config)).unwrap();
    (root, element, renderer)
}

fn drag(element: &Element) {
    element.dispatch(&InputEvent::PointerDown(PointerEvent::at(100.0, 100.0)));
    element.dispatch(&InputEvent::PointerMove(PointerEvent::at(160.0, 120.0)));
    element.dispatch(&InputEvent::PointerUp(PointerEvent::at(160.0, 120.0)));
}

#[test]
fn interaction_regresses_adaptive_consumers_until_recovered() {
    let graph = ReactiveGraph::new();
    let (root, element, renderer) = root(&graph);
    let ctx = root.context().clone();

    let adaptive = root.mount();
    adaptive_dpr(&adaptive).unwrap();
    adaptive_events(&adaptive).unwrap();
    orbit_controls(
        &root.mount(),
        ControlsProps::new().make_default(true).regress(true),
        OrbitOptions {
            enable_damping: false,
            ..OrbitOptions::default()
        },
    )
    .unwrap();
    root.advance(0.0);
    assert_eq!(renderer.borrow().pixel_ratio, 2.0);

    drag(&element);
    assert_eq!(ctx.dpr().unwrap(), 1.0);
    assert!(!ctx.events().unwrap().enabled);
    root.advance(0.05);
    assert_eq!(renderer.borrow().pixel_ratio, 1.0);

    let mut now = 0.05;
    while ctx.performance().unwrap().is_regressed() && now < 5.0 {
        now += 1.0 / 60.0;
        root.advance(now);
    }
    assert!(now < 5.0, "performance never recovered");
    assert_eq!(ctx.dpr().unwrap(), 2.0);
    assert!(ctx.events().unwrap().enabled);
}

#[test]
fn unmounting_adaptive_consumers_restores_while_regressed() {
    let graph = ReactiveGraph::new();
    let (root, _element, _renderer) = root(&graph);
    let ctx = root.context().clone();

    let adaptive = root.mount();
    adaptive_dpr(&adaptive).unwrap();
    adaptive_events(&adaptive).unwrap();
    ctx.regress();
    assert_eq!(ctx.dpr().unwrap(), 1.0);

    adaptive.dispose();
    assert!(ctx.performance().unwrap().is_regressed());
    assert_eq!(ctx.dpr().unwrap(), 2.0);
    assert!(ctx.events().unwrap().enabled);
}

#[test]
fn destroying_the_root_releases_every_resource() {
    let graph = ReactiveGraph::new();
    let (root, element, renderer) = root(&graph);
    let scene = root.context().scene().unwrap();
    scene.borrow_mut().background = Some(Background::Color(Color::WHITE));

    let geometry = Geometry::new()
        .with_attribute("position", BufferAttribute::new(vec![0.0; 9], 3))
        .into_handle();
    let group = Object3D::new("reflective").into_handle();

    let component = root.mount();
    let capture = cube_camera(
        &component,
        group.clone(),
        CubeCameraOptions {
            frames: Frames::Count(1),
            background: Some(Background::Color(Color::BLACK)),
            ..CubeCameraOptions::default()
        },
    )
    .unwrap();
    computed_attribute(&component, geometry.clone(), "weight", |g| {
        BufferAttribute::new(vec![1.0; g.vertex_count()], 1)
    });
    let wobble = wobble_material(&component, WobbleOptions::default()).unwrap();
    let orbit = orbit_controls(
        &component,
        ControlsProps::new().make_default(true),
        OrbitOptions::default(),
    )
    .unwrap();

    root.force_frame(0.0);
    root.force_frame(0.5);
    assert_eq!(capture.captures(), 1);
    {
        let renderer = renderer.borrow();
        assert_eq!(
            renderer.cube_captures[0].background,
            Some(Background::Color(Color::BLACK))
        );
        assert_eq!(
            renderer.renders.last().map(|r| r.background.clone()),
            Some(Some(Background::Color(Color::WHITE)))
        );
    }
    assert!(group.borrow().visible);
    assert!(geometry.borrow().has_attribute("weight"));
    assert!(wobble.time() > 0.0);
    assert!(element.listener_count() > 0);

    root.destroy();
    assert!(!geometry.borrow().has_attribute("weight"));
    assert_eq!(element.listener_count(), 0);
    assert!(orbit.controls().get_untracked().is_none());
    assert!(renderer.borrow().disposed);
    assert!(root.scheduler().is_empty());
}
