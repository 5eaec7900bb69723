//! Simulation state definitions
//!
//! Agents live in generational slots so that a handle to a dead and recycled
//! agent stops resolving. Obstacles (structures) live in a plain slot vector
//! and are only ever found through spatial queries.

use std::collections::VecDeque;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::game::constants::{avoidance, combat, motion, targeting};
use crate::game::context::{PoolHandle, PoolId};
use crate::game::filter::CollisionFilter;
use crate::util::vec2::Vec2;

#[cfg(feature = "projectiles")]
use crate::game::systems::projectile::{Projectile, Zone};

/// Side of the battlefield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    Ally,
    Enemy,
}

impl Faction {
    #[inline]
    pub fn opponent(self) -> Self {
        match self {
            Faction::Ally => Faction::Enemy,
            Faction::Enemy => Faction::Ally,
        }
    }
}

/// Generational agent handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    pub index: u32,
    pub generation: u32,
}

/// Obstacle slot index. Slots are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObstacleId(pub u32);

/// Weak reference to anything that can be hit or targeted.
///
/// Orders agents before obstacles, then by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BodyRef {
    Agent(AgentId),
    Obstacle(ObstacleId),
}

/// Collision shape, centered on the owner's position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Circle { radius: f32 },
    /// Axis-aligned box
    Aabb { half_extents: Vec2 },
}

impl Shape {
    /// Radius of the smallest enclosing circle
    pub fn bounding_radius(&self) -> f32 {
        match *self {
            Shape::Circle { radius } => radius,
            Shape::Aabb { half_extents } => half_extents.length(),
        }
    }
}

/// Health, invincibility and knockback tuning of a damageable body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vitals {
    pub max_health: f32,
    pub health: f32,
    pub is_dead: bool,
    pub invincibility_duration: f32,
    pub invincible_remaining: f32,
    /// Zero disables knockback
    pub knockback_power: f32,
    pub knockback_duration: f32,
}

impl Vitals {
    pub fn new(max_health: f32) -> Self {
        Self {
            max_health,
            health: max_health,
            is_dead: false,
            invincibility_duration: combat::INVINCIBILITY_DURATION,
            invincible_remaining: 0.0,
            knockback_power: combat::KNOCKBACK_POWER,
            knockback_duration: combat::KNOCKBACK_DURATION,
        }
    }

    #[inline]
    pub fn is_invincible(&self) -> bool {
        self.invincible_remaining > 0.0
    }
}

/// Active knockback impulse, decaying linearly to zero
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Knockback {
    pub direction: Vec2,
    pub power: f32,
    pub duration: f32,
    pub remaining: f32,
}

impl Knockback {
    pub fn velocity(&self) -> Vec2 {
        if self.duration <= 0.0 {
            return Vec2::ZERO;
        }
        self.direction * (self.power * (self.remaining / self.duration).clamp(0.0, 1.0))
    }
}

/// Temporary speed multiplier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Slow {
    pub factor: f32,
    pub remaining: f32,
}

/// Static structure or tower
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub position: Vec2,
    pub shape: Shape,
    pub faction: Faction,
    /// Only destructible structures carry vitals
    pub vitals: Option<Vitals>,
    pub drop_item: Option<PoolId>,
}

impl Obstacle {
    pub fn new(faction: Faction, position: Vec2, shape: Shape) -> Self {
        Self {
            id: ObstacleId(u32::MAX),
            position,
            shape,
            faction,
            vitals: None,
            drop_item: None,
        }
    }

    /// Make the structure destructible. Structures never get knocked back.
    pub fn destructible(mut self, max_health: f32) -> Self {
        let mut vitals = Vitals::new(max_health);
        vitals.knockback_power = 0.0;
        self.vitals = Some(vitals);
        self
    }

    pub fn is_destroyed(&self) -> bool {
        self.vitals.as_ref().map(|v| v.is_dead).unwrap_or(false)
    }
}

/// FIFO waypoint queue; the last element is the goal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveCommand {
    pub waypoints: VecDeque<Vec2>,
}

impl MoveCommand {
    pub fn to(goal: Vec2) -> Self {
        Self::via(vec![goal])
    }

    pub fn via(waypoints: Vec<Vec2>) -> Self {
        Self {
            waypoints: waypoints.into(),
        }
    }

    #[inline]
    pub fn current(&self) -> Option<Vec2> {
        self.waypoints.front().copied()
    }

    #[inline]
    pub fn goal(&self) -> Option<Vec2> {
        self.waypoints.back().copied()
    }
}

/// Which way a wall-follow episode circles the obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallSide {
    Clockwise,
    CounterClockwise,
}

impl WallSide {
    /// Tangent for this side given the outward normal
    #[inline]
    pub fn tangent(self, normal: Vec2) -> Vec2 {
        match self {
            WallSide::CounterClockwise => normal.perpendicular(),
            WallSide::Clockwise => normal.perpendicular_cw(),
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            WallSide::Clockwise => WallSide::CounterClockwise,
            WallSide::CounterClockwise => WallSide::Clockwise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallFollow {
    pub obstacle: ObstacleId,
    pub side: WallSide,
    pub elapsed: f32,
    /// Countdown to the next line-of-sight exit check
    pub exit_check: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum MotionState {
    #[default]
    Direct,
    WallFollow(WallFollow),
}

/// How an agent hurts things
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AttackKind {
    /// Hits the current target on contact
    Melee,
    /// Hits everything hostile within `radius` on contact with the target
    Area { radius: f32 },
    /// Fires a projectile when the target is within `range`
    Ranged { range: f32, projectile: ProjectileKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProjectileKind {
    /// Straight shot that may pass through `pierce` extra bodies
    Bullet { speed: f32, pierce: u32 },
    /// Lobbed shell that lands on the target point and leaves a damage zone
    Shell { speed: f32, zone_radius: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackProfile {
    pub kind: AttackKind,
    pub damage: f32,
    pub cooldown: f32,
}

impl Default for AttackProfile {
    fn default() -> Self {
        Self {
            kind: AttackKind::Melee,
            damage: combat::ATTACK_DAMAGE,
            cooldown: combat::ATTACK_COOLDOWN,
        }
    }
}

/// Roaming avoidance tuning for agents without a move command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvoidanceParams {
    pub enabled: bool,
    pub duration: f32,
    pub speed_mul: f32,
    pub spawn_grace: f32,
    pub min_speed: f32,
    pub min_dot: f32,
    /// Pick the side at random instead of the better-aligned tangent
    pub randomize_side: bool,
}

impl Default for AvoidanceParams {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: avoidance::AVOID_DURATION,
            speed_mul: avoidance::AVOID_SPEED_MUL,
            spawn_grace: avoidance::SPAWN_GRACE,
            min_speed: avoidance::MIN_SPEED_TO_AVOID,
            min_dot: avoidance::MIN_DOT_BLOCK,
            randomize_side: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvoidEpisode {
    pub direction: Vec2,
    pub remaining: f32,
}

/// Same-faction pass-through bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateState {
    pub ignored: FxHashSet<AgentId>,
    pub refresh_timer: f32,
}

/// Everything needed to create an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub faction: Faction,
    pub position: Vec2,
    pub radius: f32,
    pub speed: f32,
    pub max_health: f32,
    pub attack: AttackProfile,
    pub detection_radius: f32,
    pub invincibility_duration: f32,
    pub knockback_power: f32,
    pub knockback_duration: f32,
    pub avoidance: AvoidanceParams,
    pub drop_item: Option<PoolId>,
    pub sprite_variant: u32,
}

impl AgentSpec {
    pub fn new(faction: Faction, position: Vec2) -> Self {
        Self {
            faction,
            position,
            radius: 0.3,
            speed: motion::MOVE_SPEED,
            max_health: combat::MAX_HEALTH,
            attack: AttackProfile::default(),
            detection_radius: targeting::DETECTION_RADIUS,
            invincibility_duration: combat::INVINCIBILITY_DURATION,
            knockback_power: combat::KNOCKBACK_POWER,
            knockback_duration: combat::KNOCKBACK_DURATION,
            avoidance: AvoidanceParams::default(),
            drop_item: None,
            sprite_variant: 0,
        }
    }

    /// Stationary shooter
    pub fn tower(faction: Faction, position: Vec2, range: f32) -> Self {
        Self {
            speed: 0.0,
            radius: 0.5,
            knockback_power: 0.0,
            detection_radius: range,
            attack: AttackProfile {
                kind: AttackKind::Ranged {
                    range,
                    projectile: ProjectileKind::Bullet {
                        speed: crate::game::constants::projectile::BULLET_SPEED,
                        pierce: 0,
                    },
                },
                damage: combat::ATTACK_DAMAGE,
                cooldown: combat::ATTACK_COOLDOWN,
            },
            avoidance: AvoidanceParams {
                enabled: false,
                ..AvoidanceParams::default()
            },
            ..Self::new(faction, position)
        }
    }

    pub fn with_health(mut self, max_health: f32) -> Self {
        self.max_health = max_health;
        self
    }

    pub fn with_attack(mut self, attack: AttackProfile) -> Self {
        self.attack = attack;
        self
    }

    pub fn with_drop(mut self, pool: PoolId) -> Self {
        self.drop_item = Some(pool);
        self
    }
}

/// Autonomous combat unit
///
/// Fields are grouped by how often the tick touches them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    // === HOT FIELDS (every tick) ===
    pub position: Vec2,
    /// Displacement of the last tick divided by dt
    pub velocity: Vec2,
    pub radius: f32,
    pub speed: f32,
    pub faction: Faction,
    /// False once dead or deactivated; the slot is freed at the end of the tick
    pub active: bool,
    pub vitals: Vitals,
    pub knockback: Option<Knockback>,
    pub facing: Vec2,

    // === WARM FIELDS (decisions, timers) ===
    pub target: Option<BodyRef>,
    pub command: Option<MoveCommand>,
    pub motion: MotionState,
    /// Side to prefer next time a wall-follow starts on this obstacle
    pub side_memory: Option<(ObstacleId, WallSide)>,
    pub avoid: Option<AvoidEpisode>,
    pub gate: GateState,
    pub slow: Option<Slow>,
    pub attack_cooldown: f32,
    pub spawn_grace: f32,
    pub scan_countdown: f32,

    // === COLD FIELDS ===
    pub id: AgentId,
    pub attack: AttackProfile,
    pub detection_radius: f32,
    pub avoidance: AvoidanceParams,
    pub drop_item: Option<PoolId>,
    pub sprite_variant: u32,
    pub pool_handle: Option<PoolHandle>,
}

impl Agent {
    pub fn new(id: AgentId, spec: &AgentSpec, scan_countdown: f32) -> Self {
        let mut vitals = Vitals::new(spec.max_health);
        vitals.invincibility_duration = spec.invincibility_duration;
        vitals.knockback_power = spec.knockback_power;
        vitals.knockback_duration = spec.knockback_duration;

        Self {
            position: spec.position,
            velocity: Vec2::ZERO,
            radius: spec.radius,
            speed: spec.speed,
            faction: spec.faction,
            active: true,
            vitals,
            knockback: None,
            facing: Vec2::UP,
            target: None,
            command: None,
            motion: MotionState::Direct,
            side_memory: None,
            avoid: None,
            gate: GateState::default(),
            slow: None,
            attack_cooldown: 0.0,
            spawn_grace: spec.avoidance.spawn_grace,
            scan_countdown,
            id,
            attack: spec.attack,
            detection_radius: spec.detection_radius,
            avoidance: spec.avoidance,
            drop_item: spec.drop_item,
            sprite_variant: spec.sprite_variant,
            pool_handle: None,
        }
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.vitals.is_dead
    }

    #[inline]
    pub fn is_invincible(&self) -> bool {
        self.vitals.is_invincible()
    }

    #[inline]
    pub fn is_knocked_back(&self) -> bool {
        self.knockback.is_some()
    }

    /// Alive and still part of the simulation
    #[inline]
    pub fn is_live(&self) -> bool {
        self.active && !self.vitals.is_dead
    }

    /// Base speed scaled by any slow
    pub fn effective_speed(&self) -> f32 {
        match self.slow {
            Some(slow) => self.speed * slow.factor,
            None => self.speed,
        }
    }

    /// Speed-zero agents (towers) are never pushed around
    #[inline]
    pub fn is_anchored(&self) -> bool {
        self.speed <= 0.0
    }

    pub fn apply_slow(&mut self, factor: f32, duration: f32) {
        if duration <= 0.0 {
            return;
        }
        self.slow = Some(Slow {
            factor: factor.clamp(0.0, 1.0),
            remaining: duration,
        });
    }
}

#[derive(Debug, Clone, Default)]
struct AgentSlot {
    generation: u32,
    agent: Option<Agent>,
}

/// Complete simulation state
#[derive(Debug, Default)]
pub struct GameState {
    slots: Vec<AgentSlot>,
    free_slots: Vec<u32>,
    pub obstacles: Vec<Option<Obstacle>>,
    /// Suppressed agent pairs
    pub filter: CollisionFilter,
    #[cfg(feature = "projectiles")]
    pub projectiles: Vec<Projectile>,
    #[cfg(feature = "projectiles")]
    pub zones: Vec<Zone>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an agent, reusing a freed slot when one is available
    pub fn insert_agent(&mut self, spec: &AgentSpec, scan_countdown: f32) -> AgentId {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(AgentSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = AgentId {
            index,
            generation: slot.generation,
        };
        slot.agent = Some(Agent::new(id, spec, scan_countdown));
        id
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.agent.as_ref())
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.agent.as_mut())
    }

    /// Free the slot and invalidate every outstanding handle to it
    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let agent = slot.agent.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        Some(agent)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.slots.iter().filter_map(|slot| slot.agent.as_ref())
    }

    pub fn agents_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.slots.iter_mut().filter_map(|slot| slot.agent.as_mut())
    }

    /// Agents for rayon, used by per-agent passes that touch nothing else
    pub fn par_agents_mut(&mut self) -> impl ParallelIterator<Item = &mut Agent> {
        self.slots.par_iter_mut().filter_map(|slot| slot.agent.as_mut())
    }

    pub fn agent_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.agent.is_some()).count()
    }

    pub fn live_count(&self, faction: Faction) -> usize {
        self.agents()
            .filter(|a| a.is_live() && a.faction == faction)
            .count()
    }

    pub fn add_obstacle(&mut self, mut obstacle: Obstacle) -> ObstacleId {
        let id = ObstacleId(self.obstacles.len() as u32);
        obstacle.id = id;
        self.obstacles.push(Some(obstacle));
        id
    }

    pub fn obstacle(&self, id: ObstacleId) -> Option<&Obstacle> {
        self.obstacles.get(id.0 as usize).and_then(|o| o.as_ref())
    }

    pub fn obstacle_mut(&mut self, id: ObstacleId) -> Option<&mut Obstacle> {
        self.obstacles.get_mut(id.0 as usize).and_then(|o| o.as_mut())
    }

    pub fn remove_obstacle(&mut self, id: ObstacleId) -> Option<Obstacle> {
        self.obstacles.get_mut(id.0 as usize).and_then(|o| o.take())
    }

    pub fn obstacles(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.iter().filter_map(|o| o.as_ref())
    }
}
