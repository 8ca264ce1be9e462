use petalsonic_bridge::backend::{
    BackendCall, BakedDataIdentifier, BakedDataVariation, HandleKind, SimulationFlags,
};
use petalsonic_bridge::bake::{BakeOutcome, BakeTaskKind};
use petalsonic_bridge::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn save_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "petalsonic-scenario-{}-{}.json",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn probes() -> Vec<f32> {
    vec![0.0, 1.5, 0.0, 3.0, 6.0, 1.5, 0.0, 3.0, 0.0, 1.5, 6.0, 3.0]
}

fn pushes_for(journal: &[BackendCall], source: RawHandle) -> Vec<SimulationFlags> {
    journal
        .iter()
        .filter_map(|c| match c {
            BackendCall::SetSourceInputs { source: s, flags, .. } if *s == source => Some(*flags),
            _ => None,
        })
        .collect()
}

fn spawn(bridge: &PetalSonicBridge, middleware: &InMemoryMiddleware, at: Vec3) -> EventId {
    let event = middleware.spawn_event(Guid::default(), EventAttributes::at(at), true);
    bridge
        .command_sender()
        .send(BridgeCommand::EventCreated(event))
        .unwrap();
    event
}

#[test]
fn test_source_lifecycle_across_cycles() {
    init_logging();
    let backend = Arc::new(InMemoryBackend::new());
    let middleware = Arc::new(InMemoryMiddleware::new());
    let mut bridge = PetalSonicBridge::new(
        PetalSonicBridgeDesc::default(),
        backend.clone(),
        middleware.clone(),
    )
    .unwrap();

    let event = spawn(&bridge, &middleware, Vec3::new(1.0, 0.0, 0.0));
    bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
    let a = bridge
        .registry()
        .with_event_source(event, |s| s.raw())
        .expect("source for event");

    backend.clear_journal();
    assert!(bridge.step_simulation());
    assert_eq!(
        pushes_for(&backend.journal(), a),
        vec![SimulationFlags::DIRECT, SimulationFlags::REFLECTIONS]
    );

    bridge
        .command_sender()
        .send(BridgeCommand::EventRemoved(event))
        .unwrap();
    bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);

    backend.clear_journal();
    assert!(bridge.step_simulation());
    assert!(pushes_for(&backend.journal(), a).is_empty());
    assert!(!backend.is_live(a));
    assert_eq!(backend.release_count(a), 1);
}

#[test]
fn test_simulation_thread_sees_sources_added_between_frames() {
    init_logging();
    let backend = Arc::new(InMemoryBackend::new().without_journal());
    let middleware = Arc::new(InMemoryMiddleware::new());
    let mut bridge = PetalSonicBridge::new(
        PetalSonicBridgeDesc::default(),
        backend.clone(),
        middleware.clone(),
    )
    .unwrap();
    bridge.start_simulation().unwrap();

    let mut events = Vec::new();
    for i in 0..16 {
        events.push(spawn(&bridge, &middleware, Vec3::new(i as f32, 0.0, 0.0)));
        bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
        if i % 3 == 0 {
            let gone = events.remove(0);
            bridge
                .command_sender()
                .send(BridgeCommand::EventRemoved(gone))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);

    let start = bridge.simulation_cycles();
    while bridge.simulation_cycles() < start + 2 {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(bridge.registry().len(), events.len());

    bridge.shutdown();
    assert!(backend.live_handles(HandleKind::Source).is_empty());
}

#[test]
fn test_bake_queue_order_and_cancel_after_two_tasks() {
    init_logging();
    let backend = Arc::new(InMemoryBackend::new().with_bake_gate(2));
    let baker = PetalSonicBaker::new(backend.clone());
    let events = baker.events();
    let path = save_path("cancel");
    let desc = BakeDesc::new(&path, probes())
        .with_static_sources(vec![Vec3::new(2.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0)]);

    baker.bake(desc).unwrap();

    let mut started = Vec::new();
    let mut tasks = 0;
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            BakeEvent::Started { tasks: n } => tasks = n,
            BakeEvent::TaskStarted { index, kind } => {
                started.push(kind);
                if index == 2 {
                    break;
                }
            }
            _ => {}
        }
    }
    assert_eq!(tasks, 4);
    assert_eq!(
        started,
        vec![
            BakeTaskKind::Reverb,
            BakeTaskKind::StaticSource,
            BakeTaskKind::StaticSource,
        ]
    );

    assert!(baker.cancel());
    assert_eq!(baker.wait(), Some(BakeOutcome::Cancelled));
    assert!(!path.exists());
    assert_eq!(baker.progress(), 0.0);
    assert!(backend.live_handles(HandleKind::ProbeBatch).is_empty());
    assert!(backend.live_handles(HandleKind::Context).is_empty());
}

#[test]
fn test_baked_static_source_reaches_runtime() {
    init_logging();
    let backend = Arc::new(InMemoryBackend::new());
    let middleware = Arc::new(InMemoryMiddleware::new());
    let mut bridge = PetalSonicBridge::new(
        PetalSonicBridgeDesc::default().with_simulate_pathing(true),
        backend.clone(),
        middleware.clone(),
    )
    .unwrap();

    let fountain = Vec3::new(4.0, 0.0, -3.0);
    bridge.add_static_marker(Transform::from_origin(fountain));

    let path = save_path("runtime");
    let baker = PetalSonicBaker::new(backend.clone());
    let probe_data = baker
        .generate_probes(
            &ProbeGenerationDesc::default().with_area(Vec3::ZERO, Vec3::splat(6.0)),
        )
        .unwrap();
    assert!(!probe_data.is_empty());
    baker
        .bake(BakeDesc::new(&path, probe_data).with_static_sources(bridge.static_marker_positions()))
        .unwrap();
    assert!(matches!(
        baker.wait(),
        Some(BakeOutcome::Completed { layers: 3, .. })
    ));

    assert_eq!(bridge.load_baked_data(&path).unwrap(), 3);
    let at_marker = spawn(&bridge, &middleware, fountain);
    let elsewhere = spawn(&bridge, &middleware, Vec3::new(-8.0, 0.0, 0.0));
    bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
    let raw = |event| {
        bridge
            .registry()
            .with_event_source(event, |s| s.raw())
            .unwrap()
    };
    let (at_marker, elsewhere) = (raw(at_marker), raw(elsewhere));

    backend.clear_journal();
    assert!(bridge.step_simulation());
    let journal = backend.journal();
    let variation = |source: RawHandle| {
        journal.iter().find_map(|c| match c {
            BackendCall::SetSourceInputs {
                source: s,
                flags,
                baked: true,
                variation,
            } if *s == source && *flags == SimulationFlags::REFLECTIONS => Some(*variation),
            _ => None,
        })
    };
    assert_eq!(variation(at_marker), Some(BakedDataVariation::StaticSource));
    assert_eq!(variation(elsewhere), Some(BakedDataVariation::Reverb));

    let results = BakeResults::load(&path).unwrap();
    assert_eq!(results.identifiers()[2], BakedDataIdentifier::pathing());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_drop_releases_every_native_handle() {
    init_logging();
    let backend = Arc::new(InMemoryBackend::new());
    let middleware = Arc::new(InMemoryMiddleware::new());
    {
        let mut bridge = PetalSonicBridge::new(
            PetalSonicBridgeDesc::default(),
            backend.clone(),
            middleware.clone(),
        )
        .unwrap();
        spawn(&bridge, &middleware, Vec3::Z);
        bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
        bridge.start_simulation().unwrap();
    }

    for kind in [
        HandleKind::Context,
        HandleKind::Scene,
        HandleKind::Simulator,
        HandleKind::Source,
    ] {
        assert!(backend.live_handles(kind).is_empty(), "{} leaked", kind);
    }
}
