//! Position integration and contact resolution
//!
//! Agents move by their velocity, overlapping agent pairs are pushed apart,
//! then agents are pushed fully out of structures. Every touching pair is
//! reported as a contact for the controller to act on in the same tick.

use rayon::prelude::*;

use crate::game::constants::physics::{CONTACT_SLOP, SEPARATION_SHARE};
use crate::game::spatial::{nearest_on_shape, SpatialGrid};
use crate::game::state::{AgentId, BodyRef, GameState, ObstacleId, Shape};
use crate::util::vec2::{Vec2, DEGENERATE_EPSILON};

/// One agent touching another body.
///
/// `normal` points from `other` toward the agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub agent: AgentId,
    pub other: BodyRef,
    pub normal: Vec2,
}

/// Move every live agent by its velocity
/// Uses rayon; each agent only touches its own fields
pub fn integrate(state: &mut GameState, dt: f32) {
    state.par_agents_mut().for_each(|agent| {
        if !agent.is_live() {
            return;
        }
        if !agent.velocity.is_finite() {
            agent.velocity = Vec2::ZERO;
            return;
        }
        agent.position += agent.velocity * dt;
    });
}

/// Resolve overlaps and collect this tick's contacts
pub fn resolve(state: &mut GameState) -> Vec<Contact> {
    let mut contacts = Vec::new();
    separate_agents(state, &mut contacts);
    push_out_of_structures(state, &mut contacts);
    contacts
}

#[derive(Clone, Copy)]
struct Body {
    id: AgentId,
    position: Vec2,
    radius: f32,
    anchored: bool,
}

fn separate_agents(state: &mut GameState, contacts: &mut Vec<Contact>) {
    let mut bodies: Vec<Body> = state
        .agents()
        .filter(|a| a.is_live())
        .map(|a| Body {
            id: a.id,
            position: a.position,
            radius: a.radius,
            // Knocked-back agents keep to their knockback line
            anchored: a.is_anchored() || a.is_knocked_back(),
        })
        .collect();

    let mut grid = SpatialGrid::default();
    for (i, body) in bodies.iter().enumerate() {
        grid.insert(i as u32, body.position);
    }

    // Grid iteration order is not stable; sort for a reproducible push order
    let mut pairs: Vec<(u32, u32)> = Vec::new();
    grid.for_each_potential_pair(|a, b| pairs.push((a.min(b), a.max(b))));
    pairs.sort_unstable();

    for (i, j) in pairs {
        let (a, b) = (bodies[i as usize], bodies[j as usize]);
        if state.filter.is_ignored(a.id, b.id) {
            continue;
        }

        let (dir, dist) = (a.position - b.position).normalize_with_length();
        let normal = if dist > DEGENERATE_EPSILON { dir } else { Vec2::UP };
        let gap = dist - (a.radius + b.radius);
        if gap > CONTACT_SLOP {
            continue;
        }

        contacts.push(Contact {
            agent: a.id,
            other: BodyRef::Agent(b.id),
            normal,
        });
        contacts.push(Contact {
            agent: b.id,
            other: BodyRef::Agent(a.id),
            normal: -normal,
        });

        if gap < 0.0 {
            let overlap = -gap;
            let (share_a, share_b) = match (a.anchored, b.anchored) {
                (false, false) => (SEPARATION_SHARE, 1.0 - SEPARATION_SHARE),
                (true, false) => (0.0, 1.0),
                (false, true) => (1.0, 0.0),
                (true, true) => (0.0, 0.0),
            };
            bodies[i as usize].position += normal * (overlap * share_a);
            bodies[j as usize].position -= normal * (overlap * share_b);
        }
    }

    for body in &bodies {
        if let Some(agent) = state.agent_mut(body.id) {
            agent.position = body.position;
        }
    }
}

fn push_out_of_structures(state: &mut GameState, contacts: &mut Vec<Contact>) {
    let structures: Vec<(ObstacleId, Vec2, Shape)> = state
        .obstacles()
        .filter(|o| !o.is_destroyed())
        .map(|o| (o.id, o.position, o.shape))
        .collect();
    if structures.is_empty() {
        return;
    }

    for agent in state.agents_mut().filter(|a| a.is_live()) {
        for &(id, center, shape) in &structures {
            let reach = shape.bounding_radius() + agent.radius + CONTACT_SLOP;
            if agent.position.distance_sq_to(center) > reach * reach {
                continue;
            }

            let surface = nearest_on_shape(agent.position, center, &shape);
            let gap = surface.distance - agent.radius;
            if gap > CONTACT_SLOP {
                continue;
            }
            if gap < 0.0 && !agent.is_anchored() {
                let push = surface.normal * -gap;
                agent.position += match agent.knockback {
                    Some(knockback) => knockback.direction * push.dot(knockback.direction),
                    None => push,
                };
            }
            contacts.push(Contact {
                agent: agent.id,
                other: BodyRef::Obstacle(id),
                normal: surface.normal,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{AgentSpec, Faction, Knockback, Obstacle};

    const EPSILON: f32 = 1e-4;

    fn spawn(state: &mut GameState, faction: Faction, pos: Vec2) -> AgentId {
        state.insert_agent(&AgentSpec::new(faction, pos), 0.0)
    }

    fn pos(state: &GameState, id: AgentId) -> Vec2 {
        state.agent(id).unwrap().position
    }

    #[test]
    fn test_integrate_skips_dead() {
        let mut state = GameState::new();
        let alive = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        let dead = spawn(&mut state, Faction::Ally, Vec2::new(5.0, 0.0));
        state.agent_mut(alive).unwrap().velocity = Vec2::new(3.0, 0.0);
        {
            let agent = state.agent_mut(dead).unwrap();
            agent.velocity = Vec2::new(3.0, 0.0);
            agent.vitals.is_dead = true;
        }

        integrate(&mut state, 0.02);
        assert!(pos(&state, alive).approx_eq(Vec2::new(0.06, 0.0), EPSILON));
        assert_eq!(pos(&state, dead), Vec2::new(5.0, 0.0));
    }

    #[test]
    fn test_integrate_discards_non_finite_velocity() {
        let mut state = GameState::new();
        let id = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        state.agent_mut(id).unwrap().velocity = Vec2::new(f32::NAN, 0.0);
        integrate(&mut state, 0.02);
        assert_eq!(pos(&state, id), Vec2::ZERO);
        assert_eq!(state.agent(id).unwrap().velocity, Vec2::ZERO);
    }

    #[test]
    fn test_overlapping_agents_split_evenly() {
        let mut state = GameState::new();
        let a = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        let b = spawn(&mut state, Faction::Enemy, Vec2::new(0.4, 0.0));

        let contacts = resolve(&mut state);
        // 0.2 overlap, 0.1 each
        assert!(pos(&state, a).approx_eq(Vec2::new(-0.1, 0.0), EPSILON));
        assert!(pos(&state, b).approx_eq(Vec2::new(0.5, 0.0), EPSILON));

        assert_eq!(contacts.len(), 2);
        let of_a = contacts.iter().find(|c| c.agent == a).unwrap();
        let of_b = contacts.iter().find(|c| c.agent == b).unwrap();
        assert_eq!(of_a.other, BodyRef::Agent(b));
        assert!(of_a.normal.approx_eq(Vec2::LEFT, EPSILON));
        assert!(of_b.normal.approx_eq(Vec2::RIGHT, EPSILON));
    }

    #[test]
    fn test_anchored_agent_holds_position() {
        let mut state = GameState::new();
        let tower = state.insert_agent(&AgentSpec::tower(Faction::Ally, Vec2::ZERO, 8.0), 0.0);
        let unit = spawn(&mut state, Faction::Enemy, Vec2::new(0.6, 0.0));

        resolve(&mut state);
        assert_eq!(pos(&state, tower), Vec2::ZERO);
        assert!(pos(&state, unit).approx_eq(Vec2::new(0.8, 0.0), EPSILON));
    }

    #[test]
    fn test_suppressed_pair_passes_through() {
        let mut state = GameState::new();
        let a = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        let b = spawn(&mut state, Faction::Ally, Vec2::new(0.2, 0.0));
        state.filter.suppress(a, b);

        let contacts = resolve(&mut state);
        assert!(contacts.is_empty());
        assert_eq!(pos(&state, a), Vec2::ZERO);
        assert_eq!(pos(&state, b), Vec2::new(0.2, 0.0));
    }

    #[test]
    fn test_coincident_agents_use_up_normal() {
        let mut state = GameState::new();
        let a = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        let b = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        resolve(&mut state);
        assert!(pos(&state, a).approx_eq(Vec2::new(0.0, 0.3), EPSILON));
        assert!(pos(&state, b).approx_eq(Vec2::new(0.0, -0.3), EPSILON));
    }

    #[test]
    fn test_pushed_out_of_circle_structure() {
        let mut state = GameState::new();
        let wall = state.add_obstacle(Obstacle::new(Faction::Ally, Vec2::new(5.0, 0.0), Shape::Circle { radius: 1.0 }));
        let id = spawn(&mut state, Faction::Ally, Vec2::new(3.9, 0.0));

        let contacts = resolve(&mut state);
        assert!(pos(&state, id).approx_eq(Vec2::new(3.7, 0.0), EPSILON));
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].other, BodyRef::Obstacle(wall));
        assert!(contacts[0].normal.approx_eq(Vec2::LEFT, EPSILON));
    }

    #[test]
    fn test_contact_within_slop_without_push() {
        let mut state = GameState::new();
        state.add_obstacle(Obstacle::new(Faction::Enemy, Vec2::ZERO, Shape::Aabb { half_extents: Vec2::new(1.0, 1.0) }));
        let touching = spawn(&mut state, Faction::Ally, Vec2::new(0.0, 1.31));
        let clear = spawn(&mut state, Faction::Ally, Vec2::new(-1.5, 0.0));

        let contacts = resolve(&mut state);
        assert_eq!(pos(&state, touching), Vec2::new(0.0, 1.31));
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].agent, touching);
        assert!(contacts[0].normal.approx_eq(Vec2::UP, EPSILON));
        assert!(!contacts.iter().any(|c| c.agent == clear));
    }

    #[test]
    fn test_pushed_out_of_box_through_nearest_face() {
        let mut state = GameState::new();
        state.add_obstacle(Obstacle::new(Faction::Ally, Vec2::ZERO, Shape::Aabb { half_extents: Vec2::new(2.0, 1.0) }));
        let id = spawn(&mut state, Faction::Ally, Vec2::new(0.5, 0.8));
        resolve(&mut state);
        assert!(pos(&state, id).approx_eq(Vec2::new(0.5, 1.3), EPSILON));
    }

    fn knock(state: &mut GameState, id: AgentId, direction: Vec2) {
        state.agent_mut(id).unwrap().knockback = Some(Knockback {
            direction,
            power: 4.0,
            duration: 0.2,
            remaining: 0.2,
        });
    }

    #[test]
    fn test_knocked_back_agent_not_pushed_by_agents() {
        let mut state = GameState::new();
        let a = spawn(&mut state, Faction::Ally, Vec2::ZERO);
        let b = spawn(&mut state, Faction::Enemy, Vec2::new(0.3, 0.4));
        knock(&mut state, a, Vec2::RIGHT);

        let contacts = resolve(&mut state);
        assert_eq!(pos(&state, a), Vec2::ZERO);
        // Partner takes the whole 0.1 overlap along (0.6, 0.8)
        assert!(pos(&state, b).approx_eq(Vec2::new(0.36, 0.48), EPSILON));
        assert_eq!(contacts.len(), 2);
    }

    #[test]
    fn test_knocked_back_push_out_follows_knockback_line() {
        let mut state = GameState::new();
        state.add_obstacle(Obstacle::new(Faction::Ally, Vec2::new(0.0, -1.1), Shape::Aabb { half_extents: Vec2::new(1.0, 1.0) }));
        let id = spawn(&mut state, Faction::Ally, Vec2::new(0.0, 0.1));
        knock(&mut state, id, Vec2::new(0.6, 0.8));

        let contacts = resolve(&mut state);
        // 0.1 upward push projected onto the knockback direction
        assert!(pos(&state, id).approx_eq(Vec2::new(0.048, 0.164), EPSILON));
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn test_destroyed_structure_ignored() {
        let mut state = GameState::new();
        let tower = state.add_obstacle(
            Obstacle::new(Faction::Ally, Vec2::ZERO, Shape::Circle { radius: 1.0 }).destructible(5.0),
        );
        state.obstacle_mut(tower).unwrap().vitals.as_mut().unwrap().is_dead = true;
        let id = spawn(&mut state, Faction::Enemy, Vec2::new(0.5, 0.0));
        assert!(resolve(&mut state).is_empty());
        assert_eq!(pos(&state, id), Vec2::new(0.5, 0.0));
    }
}
