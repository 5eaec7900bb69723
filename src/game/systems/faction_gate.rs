//! Same-faction pass-through while a move command is active
//!
//! A commanded agent suppresses collision with nearby friendly units so a
//! squad can walk through itself. Structures are never suppressed. Every
//! suppression is restored once the bodies drift apart or the command ends.

use smallvec::SmallVec;

use crate::config::{CategoryLayers, GateConfig};
use crate::game::spatial::{PhysicsWorld, SpatialQuery};
use crate::game::state::{AgentId, BodyRef, GameState};

/// Suppress newly nearby friendlies and restore the ones that left.
/// Returns `(suppressed, restored)`.
pub fn refresh(
    state: &mut GameState,
    world: &PhysicsWorld,
    id: AgentId,
    config: &GateConfig,
    layers: &CategoryLayers,
) -> (usize, usize) {
    let Some(agent) = state.agent(id) else {
        return (0, 0);
    };
    let position = agent.position;

    let nearby = match world.overlap_circle(position, config.ignore_radius, layers.unit(agent.faction)) {
        Ok(nearby) => nearby,
        Err(e) => {
            tracing::debug!("Gate refresh skipped for {:?}: {}", id, e);
            return (0, 0);
        }
    };

    let fresh: SmallVec<[AgentId; 8]> = nearby
        .into_iter()
        .filter_map(|body| match body {
            BodyRef::Agent(other) if other != id && !agent.gate.ignored.contains(&other) => Some(other),
            _ => None,
        })
        .collect();

    let restore_radius = config.restore_radius();
    let stale: SmallVec<[AgentId; 8]> = agent
        .gate
        .ignored
        .iter()
        .copied()
        .filter(|&other| match world.position_of(BodyRef::Agent(other)) {
            Some(p) => p.distance_to(position) > restore_radius,
            None => true,
        })
        .collect();

    for &other in &fresh {
        state.filter.suppress(id, other);
    }
    for &other in &stale {
        state.filter.restore(id, other);
    }

    if let Some(agent) = state.agent_mut(id) {
        agent.gate.ignored.extend(fresh.iter().copied());
        for other in &stale {
            agent.gate.ignored.remove(other);
        }
    }

    if !fresh.is_empty() || !stale.is_empty() {
        tracing::debug!(
            "Gate {:?}: suppressed {}, restored {}",
            id,
            fresh.len(),
            stale.len()
        );
    }
    (fresh.len(), stale.len())
}

/// Unconditionally restore everything `id` suppressed
pub fn restore_all(state: &mut GameState, id: AgentId) -> usize {
    let ignored = match state.agent_mut(id) {
        Some(agent) => std::mem::take(&mut agent.gate.ignored),
        None => return 0,
    };
    for &other in &ignored {
        state.filter.restore(id, other);
    }
    if !ignored.is_empty() {
        tracing::debug!("Gate {:?}: restored all {}", id, ignored.len());
    }
    ignored.len()
}

/// Per-tick refresh for commanded agents; agents without a command hold nothing
pub fn update(
    state: &mut GameState,
    world: &PhysicsWorld,
    config: &GateConfig,
    layers: &CategoryLayers,
    dt: f32,
) {
    let mut due: SmallVec<[AgentId; 16]> = SmallVec::new();
    let mut release: SmallVec<[AgentId; 16]> = SmallVec::new();

    for agent in state.agents_mut().filter(|a| a.is_live()) {
        if agent.command.is_none() {
            if !agent.gate.ignored.is_empty() {
                release.push(agent.id);
            }
            continue;
        }
        agent.gate.refresh_timer -= dt;
        if agent.gate.refresh_timer <= 0.0 {
            agent.gate.refresh_timer = config.refresh_interval;
            due.push(agent.id);
        }
    }

    for id in release {
        restore_all(state, id);
    }
    for id in due {
        refresh(state, world, id, config, layers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{AgentSpec, Faction, MoveCommand, Obstacle, Shape};
    use crate::util::vec2::Vec2;

    fn setup(positions: &[(Faction, Vec2)]) -> (GameState, Vec<AgentId>) {
        let mut state = GameState::new();
        let ids = positions
            .iter()
            .map(|(f, p)| state.insert_agent(&AgentSpec::new(*f, *p), 0.0))
            .collect();
        (state, ids)
    }

    #[test]
    fn test_suppresses_nearby_friendlies_only() {
        let (mut state, ids) = setup(&[
            (Faction::Ally, Vec2::ZERO),
            (Faction::Ally, Vec2::new(0.8, 0.0)),
            (Faction::Enemy, Vec2::new(0.0, 0.8)),
            (Faction::Ally, Vec2::new(5.0, 0.0)),
        ]);
        state.add_obstacle(Obstacle::new(Faction::Ally, Vec2::new(-0.8, 0.0), Shape::Circle { radius: 0.5 }));
        let layers = CategoryLayers::default();
        let world = PhysicsWorld::build(&state, &layers);

        let (suppressed, restored) = refresh(&mut state, &world, ids[0], &GateConfig::default(), &layers);
        assert_eq!((suppressed, restored), (1, 0));
        assert!(state.filter.is_ignored(ids[0], ids[1]));
        assert!(!state.filter.is_ignored(ids[0], ids[2]));
        assert!(!state.filter.is_ignored(ids[0], ids[3]));
        assert_eq!(state.filter.len(), 1);
    }

    #[test]
    fn test_restores_beyond_twice_radius() {
        let (mut state, ids) = setup(&[(Faction::Ally, Vec2::ZERO), (Faction::Ally, Vec2::new(0.5, 0.0))]);
        let layers = CategoryLayers::default();
        let config = GateConfig::default();
        let world = PhysicsWorld::build(&state, &layers);
        refresh(&mut state, &world, ids[0], &config, &layers);
        assert!(state.filter.is_ignored(ids[0], ids[1]));

        // Between 1x and 2x the radius: still suppressed
        state.agent_mut(ids[1]).unwrap().position = Vec2::new(1.8, 0.0);
        let world = PhysicsWorld::build(&state, &layers);
        refresh(&mut state, &world, ids[0], &config, &layers);
        assert!(state.filter.is_ignored(ids[0], ids[1]));

        state.agent_mut(ids[1]).unwrap().position = Vec2::new(2.5, 0.0);
        let world = PhysicsWorld::build(&state, &layers);
        let (_, restored) = refresh(&mut state, &world, ids[0], &config, &layers);
        assert_eq!(restored, 1);
        assert!(!state.filter.is_ignored(ids[0], ids[1]));
        assert!(state.agent(ids[0]).unwrap().gate.ignored.is_empty());
    }

    #[test]
    fn test_mutual_suppression_needs_both_restores() {
        let (mut state, ids) = setup(&[(Faction::Ally, Vec2::ZERO), (Faction::Ally, Vec2::new(0.5, 0.0))]);
        let layers = CategoryLayers::default();
        let config = GateConfig::default();
        let world = PhysicsWorld::build(&state, &layers);
        refresh(&mut state, &world, ids[0], &config, &layers);
        refresh(&mut state, &world, ids[1], &config, &layers);

        restore_all(&mut state, ids[0]);
        assert!(state.filter.is_ignored(ids[0], ids[1]));
        restore_all(&mut state, ids[1]);
        assert!(state.filter.is_empty());
    }

    #[test]
    fn test_update_releases_when_command_ends() {
        let (mut state, ids) = setup(&[(Faction::Ally, Vec2::ZERO), (Faction::Ally, Vec2::new(0.5, 0.0))]);
        let layers = CategoryLayers::default();
        let config = GateConfig::default();
        state.agent_mut(ids[0]).unwrap().command = Some(MoveCommand::to(Vec2::new(10.0, 0.0)));

        let world = PhysicsWorld::build(&state, &layers);
        update(&mut state, &world, &config, &layers, 0.02);
        assert!(state.filter.is_ignored(ids[0], ids[1]));

        state.agent_mut(ids[0]).unwrap().command = None;
        update(&mut state, &world, &config, &layers, 0.02);
        assert!(state.filter.is_empty());
    }

    #[test]
    fn test_update_refresh_cadence() {
        let (mut state, ids) = setup(&[(Faction::Ally, Vec2::ZERO)]);
        let layers = CategoryLayers::default();
        let config = GateConfig::default();
        state.agent_mut(ids[0]).unwrap().command = Some(MoveCommand::to(Vec2::new(10.0, 0.0)));
        let world = PhysicsWorld::build(&state, &layers);

        update(&mut state, &world, &config, &layers, 0.02);
        let timer = state.agent(ids[0]).unwrap().gate.refresh_timer;
        assert!((timer - config.refresh_interval).abs() < 1e-6);
        update(&mut state, &world, &config, &layers, 0.02);
        let timer = state.agent(ids[0]).unwrap().gate.refresh_timer;
        assert!((timer - (config.refresh_interval - 0.02)).abs() < 1e-6);
    }
}
