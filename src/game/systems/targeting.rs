//! Nearest-target acquisition
//!
//! Scans run on each agent's own cadence, not every tick. All due scans are
//! computed in parallel against the read-only snapshot and applied afterwards.

use rayon::prelude::*;

use crate::config::SimConfig;
use crate::game::spatial::{PhysicsWorld, SpatialQuery};
use crate::game::state::{AgentId, BodyRef, GameState};
use crate::util::vec2::Vec2;

/// Nearest body within `radius` whose category is in `mask`.
///
/// Candidates are visited in ascending `BodyRef` order and only a strictly
/// closer one replaces the current best, so exact ties go to the lowest handle.
pub fn select_nearest(
    world: &PhysicsWorld,
    origin: Vec2,
    radius: f32,
    mask: u32,
    exclude: Option<BodyRef>,
    exclude_dead: bool,
) -> Option<BodyRef> {
    let candidates = match world.overlap_circle(origin, radius, mask) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::debug!("Target scan skipped: {}", e);
            return None;
        }
    };

    let mut best: Option<(BodyRef, f32)> = None;
    for body in candidates {
        if Some(body) == exclude {
            continue;
        }
        let Some(entry) = world.entry(body) else {
            continue;
        };
        if exclude_dead && !entry.targetable {
            continue;
        }
        let dist_sq = origin.distance_sq_to(entry.position);
        if best.map_or(true, |(_, d)| dist_sq < d) {
            best = Some((body, dist_sq));
        }
    }
    best.map(|(body, _)| body)
}

/// Advance scan countdowns and rescan every due agent. Returns the number of scans.
pub fn update(state: &mut GameState, world: &PhysicsWorld, config: &SimConfig, dt: f32) -> usize {
    let layers = config.layers;
    let mut due: Vec<(AgentId, Vec2, f32, u32)> = Vec::new();

    for agent in state.agents_mut().filter(|a| a.is_live()) {
        // A target that died or vanished is dropped and replaced right away
        if let Some(target) = agent.target {
            if !world.is_targetable(target) {
                agent.target = None;
                agent.scan_countdown = 0.0;
            }
        }

        agent.scan_countdown -= dt;
        if agent.scan_countdown > 0.0 {
            continue;
        }
        agent.scan_countdown += config.scan_interval;
        if agent.scan_countdown <= 0.0 {
            agent.scan_countdown = config.scan_interval;
        }

        if agent.is_knocked_back() {
            continue;
        }
        due.push((
            agent.id,
            agent.position,
            agent.detection_radius,
            layers.hostile(agent.faction),
        ));
    }

    let scans = due.len();
    let results: Vec<(AgentId, Option<BodyRef>)> = due
        .into_par_iter()
        .map(|(id, origin, radius, mask)| {
            let target = select_nearest(world, origin, radius, mask, Some(BodyRef::Agent(id)), true);
            (id, target)
        })
        .collect();

    for (id, target) in results {
        if let Some(agent) = state.agent_mut(id) {
            if agent.target != target {
                tracing::trace!("Agent {:?} target {:?} -> {:?}", id, agent.target, target);
            }
            agent.target = target;
        }
    }

    scans
}
