mod cli;

use anyhow::{Context, Result};
use petalsonic_bridge::bake::BakeOutcome;
use petalsonic_bridge::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PHYSICS_TICK: Duration = Duration::from_millis(16);
const EVENT_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let Some(options) = cli::parse(std::env::args().skip(1))? else {
        println!("{}", cli::USAGE);
        return Ok(());
    };

    env_logger::Builder::from_default_env()
        .filter_level(if options.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let backend = create_backend();
    log::info!("Using the {} backend", backend.name());
    let middleware = Arc::new(InMemoryMiddleware::new());

    let mut bridge = PetalSonicBridge::new(
        PetalSonicBridgeDesc::default(),
        Arc::clone(&backend),
        middleware.clone(),
    )
    .context("Failed to create bridge")?;

    // A fountain the level designer marked as a static source.
    let fountain = Vec3::new(4.0, 0.0, -6.0);
    bridge.add_static_marker(Transform::from_origin(fountain));

    let _floor = match bridge.add_static_geometry(&Transform::IDENTITY, &[floor(20.0)]) {
        Ok(geometry) => Some(geometry),
        Err(e) => {
            log::warn!("Running without geometry: {}", e);
            None
        }
    };

    if !options.bake_only {
        run_session(&mut bridge, &middleware, fountain, options.seconds)?;
    }

    let layers = bake(&backend, &bridge, &options)?;
    if layers > 0 {
        let loaded = bridge
            .load_baked_data(&options.save_path)
            .context("Failed to load bake results")?;
        log::info!("Loaded {} baked layers", loaded);

        if !options.bake_only {
            run_session(&mut bridge, &middleware, fountain, options.seconds)?;
        }
    }

    bridge.shutdown();
    Ok(())
}

#[cfg(feature = "steam-audio")]
fn create_backend() -> Arc<dyn AcousticBackend> {
    Arc::new(petalsonic_bridge::backend::SteamAudioBackend::new())
}

#[cfg(not(feature = "steam-audio"))]
fn create_backend() -> Arc<dyn AcousticBackend> {
    Arc::new(InMemoryBackend::new().without_journal())
}

/// Spawns two emitters, one on the fountain and one orbiting the listener,
/// and ticks physics for `seconds` while the simulation thread runs.
fn run_session(
    bridge: &mut PetalSonicBridge,
    middleware: &InMemoryMiddleware,
    fountain: Vec3,
    seconds: f32,
) -> Result<()> {
    let events = bridge.events();
    let commands = bridge.command_sender();

    let fixed = middleware.spawn_event(Guid::default(), EventAttributes::at(fountain), true);
    let orbiting = middleware.spawn_event(Guid::default(), EventAttributes::at(Vec3::X), true);
    commands.send(BridgeCommand::EventCreated(fixed))?;
    commands.send(BridgeCommand::EventCreated(orbiting))?;

    bridge.start_simulation()?;
    let start = Instant::now();
    let duration = Duration::from_secs_f32(seconds);

    while start.elapsed() < duration {
        let angle = start.elapsed().as_secs_f32();
        let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * 3.0;
        middleware.move_event(orbiting, EventAttributes::at(position));

        bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
        for event in events.try_iter() {
            if event.is_error() {
                log::warn!("{:?}", event);
            } else {
                log::debug!("{:?}", event);
            }
        }
        std::thread::sleep(PHYSICS_TICK);
    }

    bridge.stop_simulation();
    log::info!(
        "Session finished after {} simulation cycles",
        bridge.simulation_cycles()
    );

    for event in [fixed, orbiting] {
        commands.send(BridgeCommand::EventRemoved(event))?;
        middleware.release_event(event);
    }
    bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
    Ok(())
}

/// Bakes probes around the listener and every static marker. Returns the
/// number of layers written, zero when the bake did not complete.
fn bake(
    backend: &Arc<dyn AcousticBackend>,
    bridge: &PetalSonicBridge,
    options: &cli::Options,
) -> Result<usize> {
    let baker = PetalSonicBaker::new(Arc::clone(backend));
    let probes = match baker.generate_probes(
        &ProbeGenerationDesc::default().with_area(Vec3::ZERO, Vec3::new(10.0, 2.0, 10.0)),
    ) {
        Ok(probes) => probes,
        Err(e) => {
            log::warn!("Skipping bake: {}", e);
            return Ok(0);
        }
    };
    log::info!("Generated {} probes", probes.len() / 4);

    let events = baker.events();
    baker.bake(
        BakeDesc::new(&options.save_path, probes)
            .with_static_sources(bridge.static_marker_positions()),
    )?;

    loop {
        let event = match events.recv_timeout(EVENT_POLL) {
            Ok(event) => event,
            Err(_) if baker.is_bake_running() => continue,
            Err(_) => break,
        };
        match &event {
            BakeEvent::Started { tasks } => log::info!("Baking {} tasks", tasks),
            BakeEvent::TaskStarted { index, kind } => log::info!("Task {}: {}", index, kind),
            BakeEvent::Progress { overall } => log::debug!("{:5.1}%", overall * 100.0),
            BakeEvent::TaskFinished { index, overall } => {
                log::info!("Task {} done, {:.0}% overall", index, overall * 100.0);
                if options.cancel_after == Some(index + 1) {
                    baker.cancel();
                }
            }
            _ => {}
        }
        if event.is_terminal() {
            break;
        }
    }

    match baker.wait() {
        Some(BakeOutcome::Completed { path, layers }) => {
            log::info!("Wrote {} layers to {}", layers, path.display());
            Ok(layers)
        }
        Some(BakeOutcome::Cancelled) => {
            log::info!("Bake cancelled");
            Ok(0)
        }
        Some(BakeOutcome::Failed(error)) => {
            log::error!("Bake failed: {}", error);
            Ok(0)
        }
        None => Ok(0),
    }
}

fn floor(half_size: f32) -> MeshSurface {
    let s = half_size;
    MeshSurface {
        vertices: vec![
            Vec3::new(-s, 0.0, -s),
            Vec3::new(s, 0.0, -s),
            Vec3::new(s, 0.0, s),
            Vec3::new(-s, 0.0, s),
        ],
        indices: vec![0, 2, 1, 0, 3, 2],
        material: Some(AudioMaterial::CONCRETE),
    }
}
