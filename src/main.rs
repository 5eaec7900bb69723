use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use siege_sim::config::SimConfig;
use siege_sim::game::constants::physics::TICK_DURATION_MS;
use siege_sim::game::context::{pools, InMemoryPool};
use siege_sim::game::performance::TickMonitor;
use siege_sim::game::spawn::{BossSpec, SpawnPoint, SpawnTable, WaveSpawner};
use siege_sim::game::state::{AgentSpec, Faction, Obstacle, Shape};
use siege_sim::game::simulation::Simulation;
use siege_sim::util::vec2::Vec2;

/// Runner options, read from the environment next to `SimConfig`
struct RunOptions {
    duration: f32,
    realtime: bool,
    spawn_table: Option<String>,
}

impl RunOptions {
    fn from_env() -> Self {
        let duration = std::env::var("SIM_DURATION")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .filter(|d| *d > 0.0)
            .unwrap_or(60.0);
        let realtime = std::env::var("SIM_REALTIME")
            .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let spawn_table = std::env::var("SIM_SPAWN_TABLE").ok();

        Self {
            duration,
            realtime,
            spawn_table,
        }
    }
}

async fn load_spawn_table(path: Option<&str>) -> anyhow::Result<Option<SpawnTable>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading spawn table {}", path))?;
    let table = SpawnTable::from_json(&json).with_context(|| format!("parsing spawn table {}", path))?;
    info!("Spawn table loaded: {} levels, {}s each", table.entries.len(), table.level_time);
    Ok(Some(table))
}

/// Ally squad on the left with a tower and a wall, enemy spawn points on the right
fn build_skirmish(config: SimConfig, table: Option<SpawnTable>) -> Simulation {
    let pool = InMemoryPool::new()
        .with_capacity(pools::UNIT, 48)
        .with_capacity(pools::BULLET, 128);
    let mut sim = Simulation::with_spawn_service(config, Box::new(pool));

    sim.add_obstacle(Obstacle::new(Faction::Ally, Vec2::new(-4.0, 3.0), Shape::Aabb { half_extents: Vec2::new(0.5, 2.0) }));
    sim.add_obstacle(Obstacle::new(Faction::Enemy, Vec2::new(2.0, 0.0), Shape::Circle { radius: 1.5 }));

    sim.spawn_agent(&AgentSpec::tower(Faction::Ally, Vec2::new(-10.0, 0.0), 8.0));

    let squad: Vec<_> = (0..6)
        .map(|i| {
            let y = -2.5 + i as f32;
            sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::new(-8.0, y)))
        })
        .collect();
    for (i, id) in squad.iter().enumerate() {
        let y = -2.5 + i as f32;
        sim.issue_move_via(*id, vec![Vec2::new(-2.0, y * 1.5), Vec2::new(6.0, y)]);
    }

    let template = AgentSpec::new(Faction::Enemy, Vec2::ZERO).with_drop(pools::EXP_GEM);
    let mut spawner = WaveSpawner::new(template, table);
    for (y, boss) in [(4.0, false), (-4.0, true)] {
        let position = Vec2::new(12.0, y);
        let obstacle = sim.add_obstacle(
            Obstacle::new(Faction::Enemy, position, Shape::Circle { radius: 1.0 }).destructible(30.0),
        );
        let mut point = SpawnPoint::new(obstacle, position).with_offset(Vec2::new(-2.0, 0.0));
        if boss {
            point = point.with_boss(BossSpec::default());
        }
        spawner.add_point(point);
    }
    sim.set_spawner(spawner);

    sim.register_death_hook(Box::new(|event| {
        debug!("{:?} ({:?}) died at {:?}", event.body, event.faction, event.position);
    }));

    sim
}

async fn run(sim: &mut Simulation, options: &RunOptions) {
    let tick_rate = sim.config().tick_rate;
    let total_ticks = (options.duration * tick_rate as f32).round() as u64;
    let mut monitor = TickMonitor::new(tick_rate);
    let mut interval = tokio::time::interval(Duration::from_secs_f32(sim.config().dt()));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    for _ in 0..total_ticks {
        if options.realtime {
            interval.tick().await;
        } else if sim.clock().tick % tick_rate as u64 == 0 {
            // Let the Ctrl-C branch run between simulated seconds
            tokio::task::yield_now().await;
        }

        monitor.tick_start();
        let report = sim.tick();
        monitor.tick_end(sim.state().agent_count());

        if report.tick % tick_rate as u64 == 0 {
            debug!(
                "t={:.0}s allies={} enemies={} contacts={} {}",
                sim.clock().elapsed,
                sim.state().live_count(Faction::Ally),
                sim.state().live_count(Faction::Enemy),
                report.contacts,
                monitor.status_message()
            );
            if monitor.status().is_overrunning() {
                warn!("Tick budget overrun: {}", monitor.status_message());
            }
        }

        if sim.state().live_count(Faction::Ally) == 0 {
            info!("All allies down at t={:.1}s", sim.clock().elapsed);
            break;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Siege Sim v{}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;
    info!(
        "Configuration loaded: tick_rate={}Hz ({}ms default step), seed={}",
        config.tick_rate, TICK_DURATION_MS, config.seed
    );

    let options = RunOptions::from_env();
    let table = load_spawn_table(options.spawn_table.as_deref()).await?;
    let mut sim = build_skirmish(config, table);

    info!(
        "Running {:.0}s {}",
        options.duration,
        if options.realtime { "in real time" } else { "headless" }
    );

    tokio::select! {
        _ = run(&mut sim, &options) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let stats = sim.stats();
    info!(
        "Done after {} ticks ({:.1}s): kills={} deaths={} drops={} structures_destroyed={} shots={}",
        sim.clock().tick,
        sim.clock().elapsed,
        stats.kills,
        stats.deaths,
        stats.drops,
        stats.structures_destroyed,
        stats.shots_fired
    );
    info!(
        "Survivors: allies={} enemies={}",
        sim.state().live_count(Faction::Ally),
        sim.state().live_count(Faction::Enemy)
    );

    Ok(())
}
