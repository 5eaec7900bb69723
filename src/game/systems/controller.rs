//! Per-agent orchestration
//!
//! Turns each agent's state into this tick's velocity: knockback first, then
//! the move command, then an avoidance episode, then pursuit of the current
//! target. Contacts reported by physics are routed back here to trigger
//! melee attacks and avoidance.

use crate::game::context::SimContext;
use crate::game::spatial::PhysicsWorld;
use crate::game::state::{Agent, AgentId, AttackKind, BodyRef, GameState, ProjectileKind};
use crate::game::systems::avoidance;
use crate::game::systems::combat::{self, DamageOutcome};
use crate::game::systems::faction_gate;
use crate::game::systems::motion::{self, MotionOutcome};
use crate::game::systems::physics::Contact;
use crate::util::vec2::Vec2;

/// A ranged attack decided during the drive pass, applied after it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireRequest {
    pub shooter: AgentId,
    pub target: BodyRef,
    pub aim: Vec2,
    pub kind: ProjectileKind,
    pub damage: f32,
}

#[derive(Debug, Default)]
pub struct DriveReport {
    pub knocked_back: usize,
    pub commanded: usize,
    pub completed: usize,
    pub fire: Vec<FireRequest>,
}

/// Where the agent's target is, and how far its surface is, if still valid
fn locate_target(world: &PhysicsWorld, agent: &Agent) -> Option<(BodyRef, Vec2, f32)> {
    let target = agent.target.filter(|&t| world.is_targetable(t))?;
    let position = world.position_of(target)?;
    let gap = world.nearest_on_body(target, agent.position)?.distance - agent.radius;
    Some((target, position, gap))
}

fn set_velocity(agent: &mut Agent, disp: Vec2, dt: f32) {
    agent.velocity = disp * (1.0 / dt);
    if !disp.is_zero(1e-6) {
        agent.facing = disp.normalize_or(agent.facing);
    }
}

/// Decide every live agent's velocity for this tick
pub fn drive_agents(state: &mut GameState, world: &PhysicsWorld, ctx: &mut SimContext) -> DriveReport {
    let dt = ctx.dt();
    let config = &ctx.config;
    let mut report = DriveReport::default();
    let mut finished: Vec<AgentId> = Vec::new();

    for agent in state.agents_mut().filter(|a| a.is_live()) {
        if let Some(disp) = combat::integrate_knockback(agent, dt) {
            set_velocity(agent, disp, dt);
            report.knocked_back += 1;
            continue;
        }

        let target = locate_target(world, agent);

        match motion::step(agent, world, &config.motion, &config.layers, dt) {
            MotionOutcome::Moved(disp) => {
                set_velocity(agent, disp, dt);
                report.commanded += 1;
            }
            MotionOutcome::Completed => {
                agent.velocity = Vec2::ZERO;
                finished.push(agent.id);
            }
            MotionOutcome::Suppressed => agent.velocity = Vec2::ZERO,
            MotionOutcome::Idle => {
                if let Some(disp) = avoidance::step(agent, dt) {
                    set_velocity(agent, disp, dt);
                } else {
                    pursue(agent, target, dt);
                }
            }
        }

        if let (AttackKind::Ranged { range, projectile }, Some((body, aim, gap))) = (agent.attack.kind, target) {
            if gap <= range && agent.attack_cooldown <= 0.0 {
                agent.attack_cooldown = agent.attack.cooldown;
                agent.facing = (aim - agent.position).normalize_or(agent.facing);
                report.fire.push(FireRequest {
                    shooter: agent.id,
                    target: body,
                    aim,
                    kind: projectile,
                    damage: agent.attack.damage,
                });
            }
        }
    }

    report.completed = finished.len();
    for id in finished {
        faction_gate::restore_all(state, id);
    }
    report
}

/// Head for the target; ranged agents hold position once in range
fn pursue(agent: &mut Agent, target: Option<(BodyRef, Vec2, f32)>, dt: f32) {
    let Some((_, position, gap)) = target else {
        agent.velocity = Vec2::ZERO;
        return;
    };
    let in_range = match agent.attack.kind {
        AttackKind::Ranged { range, .. } => gap <= range,
        AttackKind::Melee | AttackKind::Area { .. } => false,
    };
    if agent.is_anchored() || in_range {
        agent.velocity = Vec2::ZERO;
        agent.facing = (position - agent.position).normalize_or(agent.facing);
        return;
    }
    let dir = (position - agent.position).normalize_or(agent.facing);
    set_velocity(agent, dir * (agent.effective_speed() * dt), dt);
}

/// Apply the ranged attacks decided this tick. Returns the number fired.
pub fn apply_fire_requests(state: &mut GameState, ctx: &mut SimContext, requests: &[FireRequest]) -> usize {
    let mut fired = 0;
    for request in requests {
        #[cfg(feature = "projectiles")]
        {
            if crate::game::systems::projectile::fire(
                state,
                ctx,
                request.shooter,
                request.aim,
                request.kind,
                request.damage,
            ) {
                fired += 1;
            }
        }

        // Without projectiles every shot lands instantly
        #[cfg(not(feature = "projectiles"))]
        {
            let origin = state.agent(request.shooter).map(|a| a.position);
            ctx.stats.shots_fired += 1;
            combat::damage_body(state, ctx, request.target, origin, request.damage);
            fired += 1;
        }
    }
    fired
}

/// Route physics contacts to melee attacks and roaming avoidance
pub fn dispatch_contacts(state: &mut GameState, world: &PhysicsWorld, ctx: &mut SimContext, contacts: &[Contact]) -> usize {
    let mut attacks = 0;

    for contact in contacts {
        let Some(agent) = state.agent(contact.agent).filter(|a| a.is_live()) else {
            continue;
        };
        let position = agent.position;
        let faction = agent.faction;
        let attack = agent.attack;

        let melee_ready = agent.target == Some(contact.other)
            && agent.attack_cooldown <= 0.0
            && !matches!(attack.kind, AttackKind::Ranged { .. });
        if melee_ready {
            if let Some(agent) = state.agent_mut(contact.agent) {
                agent.attack_cooldown = attack.cooldown;
            }
            match attack.kind {
                AttackKind::Area { radius } => {
                    let mask = ctx.config.layers.hostile(faction);
                    combat::area_damage(state, ctx, world, position, radius, mask, attack.damage);
                }
                _ => {
                    let outcome = combat::damage_body(state, ctx, contact.other, Some(position), attack.damage);
                    if outcome == DamageOutcome::Killed {
                        tracing::debug!("{:?} finished off {:?}", contact.agent, contact.other);
                    }
                }
            }
            attacks += 1;
            continue;
        }

        let BodyRef::Obstacle(obstacle) = contact.other else {
            continue;
        };
        if state.obstacle(obstacle).map(|o| o.faction) != Some(faction) {
            continue;
        }
        let target = state.agent(contact.agent).and_then(|a| locate_target(world, a)).map(|(_, p, _)| p);
        if let Some(agent) = state.agent_mut(contact.agent) {
            avoidance::on_structure_contact(agent, contact.normal, target, &mut ctx.rng);
        }
    }

    attacks
}
