//! Balls Playground - headless demo scene
//!
//! Drops a batch of random balls into a walled box and logs where they are
//! while a dedicated thread keeps the scene updating in real time.
//!
//! Usage: `balls-playground [settings.json] [seed]`

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use balls_physics::{
    Aabb, EntitySpawnRequest, Material, Rectangle, Scene, SceneQuery, SceneSettings,
    TilePlaceRequest,
};
use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

const BALL_COUNT: usize = 25;
const BOX_SIZE: f64 = 4.0;
const RUN_TIME: Duration = Duration::from_secs(5);
const REPORT_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_SEED: u64 = 42;

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Balls playground starting...");

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => match SceneSettings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => SceneSettings::default(),
    };
    let seed = args
        .next()
        .and_then(|seed| seed.parse().ok())
        .unwrap_or(DEFAULT_SEED);

    let scene = match Scene::new(settings) {
        Ok(scene) => Arc::new(scene),
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    build_box(&scene);
    spawn_balls(&scene, seed);
    log::info!("Scene populated with seed: {}", seed);

    let running = Arc::new(AtomicBool::new(true));
    let updater = {
        let scene = Arc::clone(&scene);
        let running = Arc::clone(&running);
        thread::spawn(move || update_loop(&scene, &running))
    };

    let bounds = Aabb::new(DVec3::splat(-2.0 * BOX_SIZE), DVec3::splat(2.0 * BOX_SIZE));
    let mut query = SceneQuery::new();
    let start = Instant::now();
    while start.elapsed() < RUN_TIME && !scene.is_halted() {
        thread::sleep(REPORT_INTERVAL);
        scene.read(&mut query, bounds);
        query.interpolate(Instant::now());
        report(&query);
    }

    running.store(false, Ordering::Release);
    if updater.join().is_err() {
        log::error!("Update thread panicked");
        return ExitCode::FAILURE;
    }
    if scene.is_halted() {
        return ExitCode::FAILURE;
    }

    log::info!("Balls playground finished");
    ExitCode::SUCCESS
}

fn update_loop(scene: &Scene, running: &AtomicBool) {
    let mut last = Instant::now();
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if let Err(e) = scene.update(now - last) {
            log::error!("Update failed: {e}");
            return;
        }
        last = now;
        thread::sleep(Duration::from_millis(1));
    }
}

/// Floor and four walls of an open box centred on the origin
fn build_box(scene: &Scene) {
    let half = BOX_SIZE / 2.0;
    let rectangles = [
        (DVec3::new(-half, 0.0, -half), DVec3::X * BOX_SIZE, DVec3::Z * BOX_SIZE),
        (DVec3::new(-half, 0.0, -half), DVec3::Y * BOX_SIZE, DVec3::Z * BOX_SIZE),
        (DVec3::new(half, 0.0, -half), DVec3::Y * BOX_SIZE, DVec3::Z * BOX_SIZE),
        (DVec3::new(-half, 0.0, -half), DVec3::X * BOX_SIZE, DVec3::Y * BOX_SIZE),
        (DVec3::new(-half, 0.0, half), DVec3::X * BOX_SIZE, DVec3::Y * BOX_SIZE),
    ];

    for (start, length1, length2) in rectangles {
        match Rectangle::new(start, length1, length2) {
            Ok(collider) => {
                scene.add_tile(TilePlaceRequest::new(collider));
            }
            Err(e) => log::warn!("Skipped wall: {e}"),
        }
    }
}

fn spawn_balls(scene: &Scene, seed: u64) {
    let mut rng = Pcg32::seed_from_u64(seed);
    let materials = [Material::IRON, Material::RUBBER, Material::ICE];
    let extent = BOX_SIZE / 2.0 - 0.5;

    for _ in 0..BALL_COUNT {
        let position = DVec3::new(
            rng.random_range(-extent..extent),
            rng.random_range(1.0..BOX_SIZE),
            rng.random_range(-extent..extent),
        );
        let velocity = DVec3::new(rng.random_range(-2.0..2.0), 0.0, rng.random_range(-2.0..2.0));
        let material = materials[rng.random_range(0..materials.len())];
        let radius = rng.random_range(0.1..0.3);

        scene.spawn_entity(
            EntitySpawnRequest::new(position, radius)
                .with_material(material)
                .with_velocity(velocity),
        );
    }
}

fn report(query: &SceneQuery) {
    let entities = query.entities();
    if entities.is_empty() {
        log::info!("No balls in view");
        return;
    }

    let lowest = entities
        .iter()
        .map(|entity| entity.position.y - entity.radius)
        .fold(f64::INFINITY, f64::min);
    let fastest = entities
        .iter()
        .map(|entity| entity.velocity.length())
        .fold(0.0, f64::max);
    log::info!(
        "{} balls, lowest surface at {:.4} m, fastest at {:.3} m/s",
        entities.len(),
        lowest,
        fastest
    );
    for entity in entities {
        log::debug!("{} at {:.3} moving {:.3}", entity.id, entity.position, entity.velocity);
    }
}
