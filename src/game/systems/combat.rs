//! Damage, invincibility, knockback and death
//!
//! The resolver only talks to the `Damageable` and `Movable` capabilities, so
//! agents and destructible structures go through the same code path. Dead
//! agents are deactivated immediately and removed by `cleanup` at the end of
//! the tick, after every system has had a chance to see them.

use smallvec::SmallVec;

use crate::game::context::{DeathEvent, SimContext};
use crate::game::spatial::{PhysicsWorld, SpatialQuery};
use crate::game::state::{Agent, AgentId, BodyRef, Faction, GameState, Knockback, MotionState, Obstacle, ObstacleId, Vitals};
use crate::game::systems::faction_gate;
use crate::util::vec2::Vec2;

/// Result of one damage application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Dead, invincible, indestructible or a non-positive amount
    Ignored,
    Damaged,
    /// Health reached zero on this hit
    Killed,
}

/// Anything with health
pub trait Damageable {
    fn position(&self) -> Vec2;

    /// `None` for bodies that cannot be hurt
    fn vitals(&self) -> Option<&Vitals>;

    fn vitals_mut(&mut self) -> Option<&mut Vitals>;

    /// The knockback capability, when the body has one
    fn movable(&mut self) -> Option<&mut dyn Movable> {
        None
    }
}

/// Anything that can be pushed by a hit
pub trait Movable {
    fn apply_knockback(&mut self, direction: Vec2, power: f32, duration: f32);

    fn is_knocked_back(&self) -> bool;
}

impl Damageable for Agent {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn vitals(&self) -> Option<&Vitals> {
        Some(&self.vitals)
    }

    fn vitals_mut(&mut self) -> Option<&mut Vitals> {
        Some(&mut self.vitals)
    }

    fn movable(&mut self) -> Option<&mut dyn Movable> {
        Some(self)
    }
}

impl Movable for Agent {
    fn apply_knockback(&mut self, direction: Vec2, power: f32, duration: f32) {
        if self.knockback.is_some() || power <= 0.0 || duration <= 0.0 || self.is_anchored() {
            return;
        }
        self.knockback = Some(Knockback {
            direction,
            power,
            duration,
            remaining: duration,
        });
        self.avoid = None;
    }

    fn is_knocked_back(&self) -> bool {
        self.knockback.is_some()
    }
}

impl Damageable for Obstacle {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn vitals(&self) -> Option<&Vitals> {
        self.vitals.as_ref()
    }

    fn vitals_mut(&mut self) -> Option<&mut Vitals> {
        self.vitals.as_mut()
    }
}

/// Apply one hit to `target`.
///
/// Starts the invincibility window, and a knockback away from `attacker`
/// when the target can move and isn't already being knocked back. Marks the
/// target dead exactly once; the caller handles the consequences of a kill.
pub fn apply_damage<T: Damageable + ?Sized>(target: &mut T, attacker: Option<Vec2>, amount: f32) -> DamageOutcome {
    // NaN and non-positive amounts never reach the vitals
    if !(amount > 0.0) {
        return DamageOutcome::Ignored;
    }
    let position = target.position();
    let Some(vitals) = target.vitals_mut() else {
        return DamageOutcome::Ignored;
    };
    if vitals.is_dead || vitals.is_invincible() {
        return DamageOutcome::Ignored;
    }

    vitals.health -= amount;
    vitals.invincible_remaining = vitals.invincibility_duration;
    if vitals.health <= 0.0 {
        vitals.health = 0.0;
        vitals.is_dead = true;
        return DamageOutcome::Killed;
    }

    let (power, duration) = (vitals.knockback_power, vitals.knockback_duration);
    if power > 0.0 {
        if let (Some(from), Some(movable)) = (attacker, target.movable()) {
            if !movable.is_knocked_back() {
                let direction = (position - from).normalize_or(Vec2::UP);
                movable.apply_knockback(direction, power, duration);
            }
        }
    }
    DamageOutcome::Damaged
}

/// Damage a body by reference and run the death consequences on a kill
pub fn damage_body(
    state: &mut GameState,
    ctx: &mut SimContext,
    body: BodyRef,
    attacker: Option<Vec2>,
    amount: f32,
) -> DamageOutcome {
    let outcome = match body {
        BodyRef::Agent(id) => match state.agent_mut(id) {
            Some(agent) if agent.active => apply_damage(agent, attacker, amount),
            _ => DamageOutcome::Ignored,
        },
        BodyRef::Obstacle(id) => match state.obstacle_mut(id) {
            Some(obstacle) => apply_damage(obstacle, attacker, amount),
            None => DamageOutcome::Ignored,
        },
    };

    if outcome == DamageOutcome::Killed {
        on_death(state, ctx, body);
    }
    outcome
}

/// Damage every body inside `radius` matching `mask`. Returns the number hit.
pub fn area_damage(
    state: &mut GameState,
    ctx: &mut SimContext,
    world: &PhysicsWorld,
    center: Vec2,
    radius: f32,
    mask: u32,
    amount: f32,
) -> usize {
    let bodies = match world.overlap_circle(center, radius, mask) {
        Ok(bodies) => bodies,
        Err(e) => {
            tracing::debug!("Area attack skipped: {}", e);
            return 0;
        }
    };
    bodies
        .into_iter()
        .filter(|&body| damage_body(state, ctx, body, Some(center), amount) != DamageOutcome::Ignored)
        .count()
}

fn on_death(state: &mut GameState, ctx: &mut SimContext, body: BodyRef) {
    let (faction, position, drop_item) = match body {
        BodyRef::Agent(id) => {
            let Some(agent) = state.agent_mut(id) else {
                return;
            };
            agent.active = false;
            agent.velocity = Vec2::ZERO;
            agent.knockback = None;
            agent.command = None;
            agent.motion = MotionState::Direct;
            agent.avoid = None;
            (agent.faction, agent.position, agent.drop_item)
        }
        BodyRef::Obstacle(id) => {
            let Some(obstacle) = state.obstacle(id) else {
                return;
            };
            (obstacle.faction, obstacle.position, obstacle.drop_item)
        }
    };

    let drop = drop_item.and_then(|pool| {
        let handle = ctx.spawn.acquire(pool);
        if handle.is_none() {
            tracing::debug!("Drop pool {:?} exhausted", pool);
        }
        handle
    });
    if drop.is_some() {
        ctx.stats.drops += 1;
    }

    ctx.stats.deaths += 1;
    match body {
        BodyRef::Agent(_) if faction == Faction::Enemy => ctx.stats.kills += 1,
        BodyRef::Obstacle(id) => {
            ctx.stats.structures_destroyed += 1;
            tracing::info!("Structure {:?} destroyed at ({:.1}, {:.1})", id, position.x, position.y);
        }
        _ => {}
    }
    if let BodyRef::Agent(id) = body {
        tracing::info!("{:?} agent {:?} died at ({:.1}, {:.1})", faction, id, position.x, position.y);
    }

    let event = DeathEvent {
        body,
        faction,
        position,
        tick: ctx.clock.tick,
        drop,
    };
    ctx.hooks.notify(&event);
}

/// Displacement owed to an active knockback this tick; clears it when spent
pub fn integrate_knockback(agent: &mut Agent, dt: f32) -> Option<Vec2> {
    let knockback = agent.knockback.as_mut()?;
    if knockback.remaining <= 0.0 {
        agent.knockback = None;
        return None;
    }
    let disp = knockback.velocity() * dt;
    knockback.remaining -= dt;
    Some(disp)
}

/// Count down the per-agent combat timers and structure invincibility
pub fn tick_timers(state: &mut GameState, dt: f32) {
    for agent in state.agents_mut().filter(|a| a.active) {
        agent.attack_cooldown = (agent.attack_cooldown - dt).max(0.0);
        agent.vitals.invincible_remaining = (agent.vitals.invincible_remaining - dt).max(0.0);
        agent.spawn_grace = (agent.spawn_grace - dt).max(0.0);
        // Spent knockback stays on through the tick's physics so it is not deflected
        if agent.knockback.is_some_and(|k| k.remaining <= 0.0) {
            agent.knockback = None;
        }
        if let Some(slow) = agent.slow.as_mut() {
            slow.remaining -= dt;
            if slow.remaining <= 0.0 {
                agent.slow = None;
            }
        }
    }
    for vitals in state.obstacles.iter_mut().flatten().filter_map(|o| o.vitals.as_mut()) {
        vitals.invincible_remaining = (vitals.invincible_remaining - dt).max(0.0);
    }
}

/// End-of-tick removal of deactivated agents and destroyed structures.
///
/// Every collision suppression involving a removed agent is reverted before
/// its slot can be recycled. Returns the number of agents removed.
pub fn cleanup(state: &mut GameState, ctx: &mut SimContext) -> usize {
    let inactive: SmallVec<[AgentId; 16]> = state.agents().filter(|a| !a.active).map(|a| a.id).collect();

    for &id in &inactive {
        faction_gate::restore_all(state, id);
        let purged = state.filter.purge(id);
        if purged > 0 {
            tracing::debug!("Purged {} suppressions held against {:?}", purged, id);
        }
        if let Some(handle) = state.remove_agent(id).and_then(|agent| agent.pool_handle) {
            ctx.spawn.release(handle);
        }
    }

    let destroyed: SmallVec<[ObstacleId; 4]> = state.obstacles().filter(|o| o.is_destroyed()).map(|o| o.id).collect();
    for id in destroyed {
        state.remove_obstacle(id);
    }

    inactive.len()
}
