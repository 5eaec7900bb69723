//! Roaming avoidance for agents without a move command
//!
//! An autonomous agent pushed against a friendly structure while its desired
//! direction points into it slides along the structure for a short while,
//! then resumes its pursuit.

use rand::Rng;

use crate::game::state::{Agent, AvoidEpisode};
use crate::util::vec2::Vec2;

/// React to a contact with an own-faction structure.
///
/// `normal` points out of the structure toward the agent. Returns true when a
/// new avoidance episode started.
pub fn on_structure_contact<R: Rng>(agent: &mut Agent, normal: Vec2, target: Option<Vec2>, rng: &mut R) -> bool {
    let params = agent.avoidance;
    if !params.enabled
        || agent.command.is_some()
        || agent.avoid.is_some()
        || agent.is_knocked_back()
        || agent.spawn_grace > 0.0
    {
        return false;
    }

    let desired = match target {
        Some(target) => (target - agent.position).normalize(),
        None => {
            if agent.velocity.length() < params.min_speed {
                return false;
            }
            agent.velocity.normalize()
        }
    };
    if desired.is_zero(1e-6) {
        return false;
    }

    let blocked = desired.dot(-normal);
    if blocked < params.min_dot {
        return false;
    }

    let ccw = normal.perpendicular();
    let cw = normal.perpendicular_cw();
    let direction = if params.randomize_side {
        if rng.gen_bool(0.5) {
            ccw
        } else {
            cw
        }
    } else if desired.dot(ccw) >= desired.dot(cw) {
        ccw
    } else {
        cw
    };

    tracing::debug!("Agent {:?} avoiding structure (block {:.2})", agent.id, blocked);
    agent.avoid = Some(AvoidEpisode {
        direction,
        remaining: params.duration,
    });
    true
}

/// Displacement for an active episode; ends the episode when it runs out
pub fn step(agent: &mut Agent, dt: f32) -> Option<Vec2> {
    let speed = agent.effective_speed() * agent.avoidance.speed_mul;
    let episode = agent.avoid.as_mut()?;
    let disp = episode.direction * (speed * dt);
    episode.remaining -= dt;
    if episode.remaining <= 0.0 {
        agent.avoid = None;
    }
    Some(disp)
}
