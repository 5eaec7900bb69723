//! Fixed-step simulation driver
//!
//! Owns the state and the context and runs the systems in a fixed order each
//! tick: spawn, scan, gate, drive, fire, integrate, resolve, contacts,
//! projectiles, timers, cleanup. Target scans and position integration
//! run on rayon; everything else mutates sequentially.

use rand::Rng;

use crate::config::SimConfig;
use crate::game::context::{DeathHook, PoolId, SimClock, SimContext, SimStats, SpawnService};
use crate::game::spatial::PhysicsWorld;
use crate::game::spawn::WaveSpawner;
use crate::game::state::{Agent, AgentId, AgentSpec, BodyRef, GameState, MotionState, MoveCommand, Obstacle, ObstacleId};
use crate::game::systems::combat::{self, DamageOutcome};
use crate::game::systems::{controller, faction_gate, physics, targeting};
use crate::util::vec2::Vec2;

#[cfg(feature = "projectiles")]
use crate::game::systems::projectile::{self, ProjectileReport};

/// What happened during one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub spawned: usize,
    pub scans: usize,
    pub contacts: usize,
    pub attacks: usize,
    pub shots: usize,
    pub removed: usize,
    #[cfg(feature = "projectiles")]
    pub projectiles: ProjectileReport,
}

pub struct Simulation {
    state: GameState,
    ctx: SimContext,
    spawner: Option<WaveSpawner>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: GameState::new(),
            ctx: SimContext::new(config),
            spawner: None,
        }
    }

    pub fn with_spawn_service(config: SimConfig, spawn: Box<dyn SpawnService + Send>) -> Self {
        Self {
            state: GameState::new(),
            ctx: SimContext::with_spawn_service(config, spawn),
            spawner: None,
        }
    }

    pub fn set_spawner(&mut self, spawner: WaveSpawner) {
        self.spawner = Some(spawner);
    }

    pub fn spawner(&self) -> Option<&WaveSpawner> {
        self.spawner.as_ref()
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &SimConfig {
        &self.ctx.config
    }

    pub fn stats(&self) -> &SimStats {
        &self.ctx.stats
    }

    pub fn clock(&self) -> SimClock {
        self.ctx.clock
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.state.agent(id)
    }

    /// Create an agent. Scan timers are staggered so scans spread over ticks.
    pub fn spawn_agent(&mut self, spec: &AgentSpec) -> AgentId {
        let interval = self.ctx.config.scan_interval;
        let stagger = if interval > 0.0 {
            self.ctx.rng.gen_range(0.0..interval)
        } else {
            0.0
        };
        self.state.insert_agent(spec, stagger)
    }

    /// Create an agent backed by a handle from `pool`; `None` when exhausted
    pub fn spawn_pooled(&mut self, pool: PoolId, spec: &AgentSpec) -> Option<AgentId> {
        let handle = self.ctx.spawn.acquire(pool)?;
        let id = self.spawn_agent(spec);
        if let Some(agent) = self.state.agent_mut(id) {
            agent.pool_handle = Some(handle);
        }
        Some(id)
    }

    pub fn add_obstacle(&mut self, obstacle: Obstacle) -> ObstacleId {
        self.state.add_obstacle(obstacle)
    }

    pub fn issue_move(&mut self, id: AgentId, goal: Vec2) -> bool {
        self.issue_move_via(id, vec![goal])
    }

    /// Replace the agent's command. The gate refreshes on the next tick.
    pub fn issue_move_via(&mut self, id: AgentId, waypoints: Vec<Vec2>) -> bool {
        if waypoints.is_empty() || waypoints.iter().any(|w| !w.is_finite()) {
            return false;
        }
        let Some(agent) = self.state.agent_mut(id).filter(|a| a.is_live()) else {
            return false;
        };
        agent.command = Some(MoveCommand::via(waypoints));
        agent.motion = MotionState::Direct;
        agent.avoid = None;
        agent.gate.refresh_timer = 0.0;
        true
    }

    /// Drop the command and collide with friendlies again right away
    pub fn cancel_move(&mut self, id: AgentId) -> bool {
        let Some(agent) = self.state.agent_mut(id) else {
            return false;
        };
        let had_command = agent.command.take().is_some();
        agent.motion = MotionState::Direct;
        agent.velocity = Vec2::ZERO;
        faction_gate::restore_all(&mut self.state, id);
        had_command
    }

    pub fn register_death_hook(&mut self, hook: DeathHook) {
        self.ctx.hooks.register(hook);
    }

    pub fn apply_damage(&mut self, target: BodyRef, attacker: Option<Vec2>, amount: f32) -> DamageOutcome {
        combat::damage_body(&mut self.state, &mut self.ctx, target, attacker, amount)
    }

    pub fn apply_slow(&mut self, id: AgentId, factor: f32, duration: f32) -> bool {
        match self.state.agent_mut(id).filter(|a| a.is_live()) {
            Some(agent) => {
                agent.apply_slow(factor, duration);
                true
            }
            None => false,
        }
    }

    fn run_spawner(&mut self, dt: f32) -> usize {
        let Some(spawner) = self.spawner.as_mut() else {
            return 0;
        };
        let orders = spawner.poll(&self.state, self.ctx.clock.elapsed, dt);

        let mut spawned = 0;
        for order in orders {
            let Some(id) = self.spawn_pooled(order.pool, &order.spec) else {
                tracing::debug!("Pool {:?} exhausted, spawn skipped", order.pool);
                continue;
            };
            if let (Some(data), Some(agent)) = (order.data, self.state.agent_mut(id)) {
                agent.init_from_spawn_data(&data);
            }
            spawned += 1;
        }
        spawned
    }

    /// Advance one fixed step
    pub fn tick(&mut self) -> TickReport {
        let dt = self.ctx.dt();
        self.ctx.clock.advance(dt);
        let layers = self.ctx.config.layers;

        let spawned = self.run_spawner(dt);

        let world = PhysicsWorld::build(&self.state, &layers);
        let scans = targeting::update(&mut self.state, &world, &self.ctx.config, dt);
        faction_gate::update(&mut self.state, &world, &self.ctx.config.gate, &layers, dt);

        let drive = controller::drive_agents(&mut self.state, &world, &mut self.ctx);
        let shots = controller::apply_fire_requests(&mut self.state, &mut self.ctx, &drive.fire);

        physics::integrate(&mut self.state, dt);
        let contacts = physics::resolve(&mut self.state);

        let world = PhysicsWorld::build(&self.state, &layers);
        let attacks = controller::dispatch_contacts(&mut self.state, &world, &mut self.ctx, &contacts);

        #[cfg(feature = "projectiles")]
        let projectiles = projectile::update(&mut self.state, &mut self.ctx, &layers, dt);

        combat::tick_timers(&mut self.state, dt);
        let removed = combat::cleanup(&mut self.state, &mut self.ctx);

        TickReport {
            tick: self.ctx.clock.tick,
            spawned,
            scans,
            contacts: contacts.len(),
            attacks,
            shots,
            removed,
            #[cfg(feature = "projectiles")]
            projectiles,
        }
    }

    /// Run whole ticks covering `seconds`. Returns the number of ticks.
    pub fn run_for(&mut self, seconds: f32) -> u64 {
        let ticks = (seconds.max(0.0) * self.ctx.config.tick_rate as f32).round() as u64;
        for _ in 0..ticks {
            self.tick();
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::context::{pools, InMemoryPool};
    use crate::game::spawn::{SpawnPoint, SpawnTable};
    use crate::game::state::{Faction, Shape};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const EPSILON: f32 = 1e-4;

    fn sim() -> Simulation {
        Simulation::new(SimConfig::default())
    }

    #[test]
    fn test_circle_detour_reaches_goal() {
        let mut sim = sim();
        let center = Vec2::new(5.0, 0.0);
        sim.add_obstacle(Obstacle::new(Faction::Ally, center, Shape::Circle { radius: 1.0 }));
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        assert!(sim.issue_move(id, Vec2::new(10.0, 0.0)));

        let mut min_distance = f32::MAX;
        let mut ticks = 0;
        while sim.agent(id).unwrap().command.is_some() && ticks < 1000 {
            sim.tick();
            min_distance = min_distance.min(sim.agent(id).unwrap().position.distance_to(center));
            ticks += 1;
        }

        let agent = sim.agent(id).unwrap();
        assert!(agent.command.is_none());
        assert!(agent.position.distance_to(Vec2::new(10.0, 0.0)) <= 0.15 + EPSILON);
        assert!(min_distance >= 1.28, "came within {}", min_distance);
    }

    #[test]
    fn test_second_hit_inside_invincibility_is_ignored() {
        let mut sim = sim();
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::ZERO).with_health(10.0));
        let body = BodyRef::Agent(id);

        assert_eq!(sim.apply_damage(body, None, 4.0), DamageOutcome::Damaged);
        for _ in 0..5 {
            sim.tick();
        }
        assert_eq!(sim.apply_damage(body, None, 4.0), DamageOutcome::Ignored);
        assert!((sim.agent(id).unwrap().vitals.health - 6.0).abs() < EPSILON);
    }

    #[test]
    fn test_death_fires_hook_once_and_frees_slot() {
        let mut sim = sim();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        sim.register_death_hook(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let id = sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::ZERO).with_health(5.0));
        assert_eq!(sim.apply_damage(BodyRef::Agent(id), None, 6.0), DamageOutcome::Killed);
        assert_eq!(sim.apply_damage(BodyRef::Agent(id), None, 6.0), DamageOutcome::Ignored);

        let report = sim.tick();
        assert_eq!(report.removed, 1);
        assert!(sim.agent(id).is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sim.stats().kills, 1);

        // Slot reuse never resurrects the old handle
        let next = sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::ZERO));
        assert_eq!(next.index, id.index);
        assert!(sim.agent(id).is_none());
        assert_eq!(sim.apply_damage(BodyRef::Agent(id), None, 1.0), DamageOutcome::Ignored);
    }

    #[test]
    fn test_knockback_line_holds_against_overlapping_agent() {
        let mut sim = sim();
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        let other = sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::new(0.3, 0.4)));
        sim.apply_damage(BodyRef::Agent(id), Some(Vec2::new(-1.0, 0.0)), 1.0);

        let mut ticks = 0;
        while sim.agent(id).unwrap().is_knocked_back() {
            sim.tick();
            ticks += 1;
            assert_eq!(sim.agent(id).unwrap().position.y, 0.0);
        }
        assert!(ticks >= 10);
        assert!(sim.agent(id).unwrap().position.x > 0.3);
        assert_ne!(sim.agent(other).unwrap().position, Vec2::new(0.3, 0.4));
    }

    #[test]
    fn test_knockback_suspends_command() {
        let mut sim = sim();
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        sim.issue_move(id, Vec2::new(0.0, 10.0));
        sim.apply_damage(BodyRef::Agent(id), Some(Vec2::new(-1.0, 0.0)), 1.0);

        let mut last_x = 0.0;
        while sim.agent(id).unwrap().is_knocked_back() {
            sim.tick();
            let p = sim.agent(id).unwrap().position;
            assert!(p.y.abs() < EPSILON);
            assert!(p.x >= last_x);
            last_x = p.x;
        }
        assert!(last_x > 0.3);

        // The command resumes afterwards
        sim.tick();
        assert!(sim.agent(id).unwrap().position.y > 0.0);
    }

    #[test]
    fn test_squad_passes_through_friendly_then_collides_again() {
        let mut sim = sim();
        let mover = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        let standing = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::new(2.0, 0.0)));
        sim.issue_move(mover, Vec2::new(4.0, 0.0));

        let mut ticks = 0;
        while sim.agent(mover).unwrap().command.is_some() && ticks < 500 {
            sim.tick();
            assert!(sim.agent(standing).unwrap().position.approx_eq(Vec2::new(2.0, 0.0), EPSILON));
            ticks += 1;
        }
        assert!(sim.agent(mover).unwrap().position.x > 3.8);
        assert!(sim.state().filter.is_empty());
    }

    #[test]
    fn test_cancel_move_restores_collision() {
        let mut sim = sim();
        let a = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        let b = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::new(0.5, 0.0)));
        sim.issue_move(a, Vec2::new(5.0, 0.0));
        sim.tick();
        assert!(sim.state().filter.is_ignored(a, b));

        assert!(sim.cancel_move(a));
        assert!(sim.state().filter.is_empty());
        assert!(!sim.cancel_move(a));
    }

    #[test]
    fn test_issue_move_rejects_bad_input() {
        let mut sim = sim();
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        assert!(!sim.issue_move_via(id, Vec::new()));
        assert!(!sim.issue_move(id, Vec2::new(f32::NAN, 0.0)));

        sim.apply_damage(BodyRef::Agent(id), None, 100.0);
        assert!(!sim.issue_move(id, Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn test_tower_shoots_down_attacker() {
        let mut sim = sim();
        let tower = sim.spawn_agent(&AgentSpec::tower(Faction::Ally, Vec2::ZERO, 8.0));
        let raider = sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::new(6.0, 0.0)));

        sim.run_for(5.0);
        assert!(sim.agent(raider).is_none());
        assert_eq!(sim.stats().kills, 1);
        assert!(sim.stats().shots_fired >= 2);
        assert!(sim.agent(tower).is_some());
    }

    #[test]
    fn test_skirmish_keeps_vitals_in_bounds() {
        let mut sim = sim();
        for i in 0..3 {
            let y = i as f32 * 1.5;
            sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::new(0.0, y)));
            sim.spawn_agent(&AgentSpec::new(Faction::Enemy, Vec2::new(5.0, y)));
        }

        for _ in 0..1000 {
            sim.tick();
            for agent in sim.state().agents() {
                assert!(agent.vitals.health >= 0.0);
                assert!(agent.vitals.health <= agent.vitals.max_health);
                assert!(agent.position.is_finite());
            }
        }
        assert!(sim.stats().deaths > 0);
    }

    #[test]
    fn test_slow_reduces_speed_for_duration() {
        let mut sim = sim();
        let id = sim.spawn_agent(&AgentSpec::new(Faction::Ally, Vec2::ZERO));
        sim.issue_move(id, Vec2::new(100.0, 0.0));
        assert!(sim.apply_slow(id, 0.5, 0.1));

        sim.tick();
        assert!((sim.agent(id).unwrap().velocity.x - 1.75).abs() < 1e-3);
        for _ in 0..6 {
            sim.tick();
        }
        assert!((sim.agent(id).unwrap().velocity.x - 3.5).abs() < 1e-3);
    }

    #[test]
    fn test_spawner_feeds_pooled_agents() {
        let pool = InMemoryPool::new().with_capacity(pools::UNIT, 2);
        let mut sim = Simulation::with_spawn_service(SimConfig::default(), Box::new(pool));
        let pos = Vec2::new(0.0, 10.0);
        let point = sim.add_obstacle(
            Obstacle::new(Faction::Enemy, pos, Shape::Circle { radius: 1.0 }).destructible(50.0),
        );
        let table = SpawnTable::from_json(
            r#"{ "level_time": 30.0, "entries": [ { "spawn_interval": 0.5, "sprite_variant": 2, "health": 4.0, "speed": 1.0 } ] }"#,
        )
        .unwrap();
        let mut spawner = WaveSpawner::new(AgentSpec::new(Faction::Enemy, Vec2::ZERO), Some(table));
        spawner.add_point(SpawnPoint::new(point, pos).with_offset(Vec2::new(0.0, -2.0)));
        sim.set_spawner(spawner);

        sim.run_for(2.0);
        // Capped by the pool
        assert_eq!(sim.state().live_count(Faction::Enemy), 2);
        let agent = sim.state().agents().next().unwrap();
        assert_eq!(agent.vitals.max_health, 4.0);
        assert_eq!(agent.sprite_variant, 2);
        assert!(agent.pool_handle.is_some());
    }

    #[test]
    fn test_run_for_counts_ticks() {
        let mut sim = sim();
        assert_eq!(sim.run_for(1.0), 50);
        assert_eq!(sim.clock().tick, 50);
        assert!((sim.clock().elapsed - 1.0).abs() < 1e-3);
    }
}
