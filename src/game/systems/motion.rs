//! Local motion planner
//!
//! Converts an agent's move command into one displacement per tick. Purely
//! reactive: `Direct` heads straight for the current waypoint until a swept
//! cast (or a blocked line of sight with a structure close by) says a
//! friendly structure is in the way, then `WallFollow` slides around that
//! structure until the goal is visible again.
//!
//! Only own-faction structures are circumvented. Hostile structures are
//! targets and are left to physics.

use crate::config::{CategoryLayers, MotionConfig};
use crate::game::spatial::{PhysicsWorld, SpatialQuery, SweepHit};
use crate::game::state::{Agent, BodyRef, MotionState, ObstacleId, WallFollow, WallSide};
use crate::util::vec2::{Vec2, DEGENERATE_EPSILON};

/// What the planner produced for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionOutcome {
    /// No command
    Idle,
    /// Knocked back; the impulse owns the displacement
    Suppressed,
    Moved(Vec2),
    /// Last waypoint reached; the command has been cleared
    Completed,
}

enum Heading {
    NoCommand,
    Arrived,
    Toward { waypoint: Vec2, goal: Vec2 },
}

/// Pop every waypoint within `stop_distance`
fn consume_arrived(agent: &mut Agent, stop_distance: f32) -> Heading {
    loop {
        let Some(command) = agent.command.as_mut() else {
            return Heading::NoCommand;
        };
        let Some(waypoint) = command.current() else {
            agent.command = None;
            return Heading::Arrived;
        };
        if agent.position.distance_to(waypoint) > stop_distance {
            let goal = command.goal().unwrap_or(waypoint);
            return Heading::Toward { waypoint, goal };
        }

        command.waypoints.pop_front();
        let finished = command.waypoints.is_empty();
        agent.motion = MotionState::Direct;
        if finished {
            agent.command = None;
            agent.velocity = Vec2::ZERO;
            return Heading::Arrived;
        }
    }
}

fn cast(world: &PhysicsWorld, agent: &Agent, dir: Vec2, distance: f32, mask: u32) -> Option<SweepHit> {
    match world.sweep_circle(agent.position, agent.radius, dir, distance, mask) {
        Ok(hit) => hit,
        Err(e) => {
            tracing::debug!("Motion cast for {:?} rejected: {}", agent.id, e);
            None
        }
    }
}

/// Can the agent's body travel straight to `goal` without touching a structure?
pub fn line_of_sight(world: &PhysicsWorld, agent: &Agent, goal: Vec2, mask: u32) -> bool {
    let (dir, len) = (goal - agent.position).normalize_with_length();
    if len <= DEGENERATE_EPSILON {
        return true;
    }
    cast(world, agent, dir, len, mask).is_none()
}

/// Tangent side better aligned with the goal; exact ties go counter-clockwise
pub fn choose_side(normal: Vec2, goal_dir: Vec2) -> WallSide {
    let ccw = goal_dir.dot(WallSide::CounterClockwise.tangent(normal));
    let cw = goal_dir.dot(WallSide::Clockwise.tangent(normal));
    if ccw >= cw {
        WallSide::CounterClockwise
    } else {
        WallSide::Clockwise
    }
}

/// Closest structure whose surface is within `radius` of the agent's center
fn nearest_structure(world: &PhysicsWorld, agent: &Agent, radius: f32, mask: u32) -> Option<(ObstacleId, Vec2)> {
    let bodies = world.overlap_circle(agent.position, radius, mask).ok()?;
    bodies
        .into_iter()
        .filter_map(|body| match body {
            BodyRef::Obstacle(id) => world
                .nearest_on_body(body, agent.position)
                .map(|surface| (id, surface)),
            BodyRef::Agent(_) => None,
        })
        .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
        .map(|(id, surface)| (id, surface.normal))
}

/// Re-project a displacement that would re-enter a structure, up to
/// `max_corrections` times. A hit on a different structure becomes the
/// current wall (corner transition).
fn correct(agent: &mut Agent, world: &PhysicsWorld, config: &MotionConfig, mask: u32, displacement: Vec2) -> Vec2 {
    let mut disp = displacement;
    for _ in 0..config.max_corrections {
        let (dir, len) = disp.normalize_with_length();
        if len <= DEGENERATE_EPSILON {
            break;
        }
        let Some(hit) = cast(world, agent, dir, len, mask) else {
            break;
        };

        if let (BodyRef::Obstacle(hit_id), MotionState::WallFollow(wf)) = (hit.body, &mut agent.motion) {
            if wf.obstacle != hit_id {
                tracing::debug!("Agent {:?} corner transition {:?} -> {:?}", agent.id, wf.obstacle, hit_id);
                wf.obstacle = hit_id;
            }
        }

        if disp.dot(hit.normal) >= 0.0 {
            break;
        }
        disp = disp.reject(hit.normal);
    }
    disp
}

fn enter_wall_follow(
    agent: &mut Agent,
    world: &PhysicsWorld,
    config: &MotionConfig,
    mask: u32,
    obstacle: ObstacleId,
    normal: Vec2,
    goal: Vec2,
    step: f32,
) -> MotionOutcome {
    let goal_dir = (goal - agent.position).normalize_or(Vec2::UP);
    let side = match agent.side_memory {
        Some((remembered, side)) if remembered == obstacle => {
            agent.side_memory = None;
            side
        }
        _ => choose_side(normal, goal_dir),
    };

    tracing::debug!("Agent {:?} Direct -> WallFollow on {:?} ({:?})", agent.id, obstacle, side);
    agent.motion = MotionState::WallFollow(WallFollow {
        obstacle,
        side,
        elapsed: 0.0,
        exit_check: config.exit_check_interval,
    });

    let disp = side.tangent(normal) * step + normal * config.normal_bias;
    MotionOutcome::Moved(correct(agent, world, config, mask, disp))
}

fn direct(
    agent: &mut Agent,
    world: &PhysicsWorld,
    config: &MotionConfig,
    mask: u32,
    waypoint: Vec2,
    goal: Vec2,
    step: f32,
) -> MotionOutcome {
    let dir = (waypoint - agent.position).normalize_or(Vec2::UP);
    let reach = step.max(agent.radius + config.clearance);

    if let Some(hit) = cast(world, agent, dir, reach, mask) {
        if let BodyRef::Obstacle(obstacle) = hit.body {
            return enter_wall_follow(agent, world, config, mask, obstacle, hit.normal, goal, step);
        }
    }

    if !line_of_sight(world, agent, goal, mask) {
        if let Some((obstacle, normal)) = nearest_structure(world, agent, config.wide_search_radius, mask) {
            return enter_wall_follow(agent, world, config, mask, obstacle, normal, goal, step);
        }
    }

    MotionOutcome::Moved(dir * step)
}

fn wall_follow(
    agent: &mut Agent,
    world: &PhysicsWorld,
    config: &MotionConfig,
    mask: u32,
    mut wf: WallFollow,
    waypoint: Vec2,
    goal: Vec2,
    step: f32,
    dt: f32,
) -> MotionOutcome {
    wf.elapsed += dt;
    if wf.elapsed > config.max_wall_follow_time {
        tracing::warn!(
            "Agent {:?} stuck wall-following {:?} for {:.2}s, forcing Direct",
            agent.id,
            wf.obstacle,
            wf.elapsed
        );
        agent.side_memory = Some((wf.obstacle, wf.side.opposite()));
        agent.motion = MotionState::Direct;
        return direct(agent, world, config, mask, waypoint, goal, step);
    }

    wf.exit_check -= dt;
    if wf.exit_check <= 0.0 {
        wf.exit_check = config.exit_check_interval;
        if line_of_sight(world, agent, goal, mask) {
            tracing::debug!("Agent {:?} WallFollow -> Direct after {:.2}s", agent.id, wf.elapsed);
            agent.motion = MotionState::Direct;
            return direct(agent, world, config, mask, waypoint, goal, step);
        }
    }

    let Some(surface) = world.nearest_on_body(BodyRef::Obstacle(wf.obstacle), agent.position) else {
        tracing::debug!("Agent {:?} lost wall {:?}", agent.id, wf.obstacle);
        agent.motion = MotionState::Direct;
        return direct(agent, world, config, mask, waypoint, goal, step);
    };

    let normal = surface.normal;
    let tangent = wf.side.tangent(normal);
    let standoff = agent.radius + config.clearance;
    let correction = (standoff - surface.distance).clamp(-step, step);
    let disp = tangent * step + normal * (correction + config.normal_bias);

    agent.motion = MotionState::WallFollow(wf);
    MotionOutcome::Moved(correct(agent, world, config, mask, disp))
}

/// Plan this tick's displacement for `agent`. Does not move the agent.
pub fn step(
    agent: &mut Agent,
    world: &PhysicsWorld,
    config: &MotionConfig,
    layers: &CategoryLayers,
    dt: f32,
) -> MotionOutcome {
    if agent.is_knocked_back() {
        return MotionOutcome::Suppressed;
    }

    let (waypoint, goal) = match consume_arrived(agent, config.stop_distance) {
        Heading::NoCommand => return MotionOutcome::Idle,
        Heading::Arrived => {
            tracing::debug!("Agent {:?} command complete", agent.id);
            return MotionOutcome::Completed;
        }
        Heading::Toward { waypoint, goal } => (waypoint, goal),
    };

    let step = (agent.effective_speed() * dt).min(agent.position.distance_to(waypoint));
    if step <= 0.0 {
        return MotionOutcome::Moved(Vec2::ZERO);
    }

    let mask = layers.structure(agent.faction);
    match agent.motion {
        MotionState::Direct => direct(agent, world, config, mask, waypoint, goal, step),
        MotionState::WallFollow(wf) => wall_follow(agent, world, config, mask, wf, waypoint, goal, step, dt),
    }
}
