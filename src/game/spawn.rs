//! Wave data, boss overrides and timed spawn points
//!
//! Spawn points are structures that periodically emit units once activated.
//! Points come online one at a time on a fixed cadence; a destroyed point goes
//! permanently silent and may release a boss. The spawner only issues
//! `SpawnOrder`s; the simulation turns them into agents.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::context::{pools, PoolId};
use crate::game::state::{Agent, AgentSpec, AttackKind, GameState, ObstacleId};
use crate::util::vec2::Vec2;

/// Per-level unit tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnData {
    pub spawn_interval: f32,
    pub sprite_variant: u32,
    pub health: f32,
    pub speed: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnTableError {
    #[error("malformed spawn table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("spawn table has no entries")]
    Empty,
    #[error("level_time must be positive, got {0}")]
    InvalidLevelTime(f32),
}

/// Difficulty levels indexed by elapsed time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnTable {
    /// Seconds per level
    pub level_time: f32,
    pub entries: Vec<SpawnData>,
}

impl SpawnTable {
    pub fn new(level_time: f32, entries: Vec<SpawnData>) -> Result<Self, SpawnTableError> {
        let table = Self { level_time, entries };
        table.validate()?;
        Ok(table)
    }

    pub fn from_json(json: &str) -> Result<Self, SpawnTableError> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), SpawnTableError> {
        if !(self.level_time > 0.0) {
            return Err(SpawnTableError::InvalidLevelTime(self.level_time));
        }
        if self.entries.is_empty() {
            return Err(SpawnTableError::Empty);
        }
        Ok(())
    }

    /// Level for `elapsed` seconds, clamped to the last entry
    pub fn level_at(&self, elapsed: f32) -> usize {
        let level = (elapsed.max(0.0) / self.level_time).floor() as usize;
        level.min(self.entries.len().saturating_sub(1))
    }

    pub fn data_at(&self, elapsed: f32) -> Option<&SpawnData> {
        self.entries.get(self.level_at(elapsed))
    }
}

/// Stat overrides for a boss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BossSpec {
    pub damage: f32,
    pub cooldown: f32,
    pub detection_radius: f32,
    pub speed: f32,
    pub health: f32,
    /// Area attack radius; `None` keeps the base attack kind
    pub area_radius: Option<f32>,
}

impl Default for BossSpec {
    fn default() -> Self {
        Self {
            damage: 12.0,
            cooldown: 1.0,
            detection_radius: 15.0,
            speed: 2.0,
            health: 300.0,
            area_radius: None,
        }
    }
}

impl BossSpec {
    pub fn apply(&self, spec: &mut AgentSpec) {
        spec.attack.damage = self.damage;
        spec.attack.cooldown = self.cooldown;
        spec.detection_radius = self.detection_radius;
        spec.speed = self.speed;
        spec.max_health = self.health;
        if let Some(radius) = self.area_radius {
            spec.attack.kind = AttackKind::Area { radius };
        }
    }
}

impl Agent {
    /// Take health, speed and sprite variant from wave data; nothing else
    pub fn init_from_spawn_data(&mut self, data: &SpawnData) {
        self.speed = data.speed;
        self.vitals.max_health = data.health;
        self.vitals.health = data.health;
        self.sprite_variant = data.sprite_variant;
    }
}

/// What the spawner wants created this tick
#[derive(Debug, Clone)]
pub struct SpawnOrder {
    pub pool: PoolId,
    pub spec: AgentSpec,
    /// Wave data to apply after creation
    pub data: Option<SpawnData>,
}

/// A structure that emits units while enabled
#[derive(Debug, Clone)]
pub struct SpawnPoint {
    pub obstacle: ObstacleId,
    pub position: Vec2,
    /// Units appear here relative to the structure
    pub offset: Vec2,
    pub pool: PoolId,
    /// Used when there is no wave table
    pub fixed_interval: f32,
    pub boss: Option<BossSpec>,
    enabled: bool,
    permanently_off: bool,
    ever_activated: bool,
    countdown: f32,
    boss_spawned: bool,
}

impl SpawnPoint {
    pub fn new(obstacle: ObstacleId, position: Vec2) -> Self {
        Self {
            obstacle,
            position,
            offset: Vec2::ZERO,
            pool: pools::UNIT,
            fixed_interval: 2.0,
            boss: None,
            enabled: false,
            permanently_off: false,
            ever_activated: false,
            countdown: 0.0,
            boss_spawned: false,
        }
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_boss(mut self, boss: BossSpec) -> Self {
        self.boss = Some(boss);
        self
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn is_permanently_off(&self) -> bool {
        self.permanently_off
    }

    fn activate(&mut self) -> bool {
        if self.permanently_off || self.ever_activated {
            return false;
        }
        self.ever_activated = true;
        self.enabled = true;
        true
    }
}

/// Timed spawn points driven by an optional wave table
#[derive(Debug, Clone)]
pub struct WaveSpawner {
    pub table: Option<SpawnTable>,
    pub points: Vec<SpawnPoint>,
    /// Base stats for every spawned unit
    pub template: AgentSpec,
    /// Seconds between point activations
    pub activate_interval: f32,
    activate_timer: f32,
    started: bool,
}

impl WaveSpawner {
    pub fn new(template: AgentSpec, table: Option<SpawnTable>) -> Self {
        Self {
            table,
            points: Vec::new(),
            template,
            activate_interval: 10.0,
            activate_timer: 0.0,
            started: false,
        }
    }

    pub fn add_point(&mut self, point: SpawnPoint) {
        self.points.push(point);
    }

    /// Current level, 0 without a table
    pub fn level(&self, elapsed: f32) -> usize {
        self.table.as_ref().map(|t| t.level_at(elapsed)).unwrap_or(0)
    }

    fn activate_next(&mut self) {
        if let Some(point) = self.points.iter_mut().find(|p| !p.permanently_off && !p.ever_activated) {
            point.activate();
            tracing::info!("Spawn point {:?} activated", point.obstacle);
        }
    }

    /// Advance timers and collect this tick's spawn orders
    pub fn poll(&mut self, state: &GameState, elapsed: f32, dt: f32) -> SmallVec<[SpawnOrder; 4]> {
        let mut orders = SmallVec::new();

        if !self.started {
            self.started = true;
            self.activate_next();
        } else {
            self.activate_timer += dt;
            if self.activate_timer >= self.activate_interval {
                self.activate_timer = 0.0;
                self.activate_next();
            }
        }

        let data = self.table.as_ref().and_then(|t| t.data_at(elapsed)).copied();

        for point in self.points.iter_mut() {
            let standing = state.obstacle(point.obstacle).map(|o| !o.is_destroyed()).unwrap_or(false);
            if !standing && !point.permanently_off {
                point.permanently_off = true;
                point.enabled = false;
                tracing::info!("Spawn point {:?} destroyed", point.obstacle);

                if let (Some(boss), false) = (point.boss, point.boss_spawned) {
                    point.boss_spawned = true;
                    let mut spec = self.template.clone();
                    spec.position = point.position + Vec2::new(0.0, 1.5);
                    boss.apply(&mut spec);
                    orders.push(SpawnOrder {
                        pool: pools::BOSS,
                        spec,
                        data: None,
                    });
                }
                continue;
            }
            if !point.enabled {
                continue;
            }

            point.countdown -= dt;
            if point.countdown > 0.0 {
                continue;
            }
            let interval = data.map(|d| d.spawn_interval).unwrap_or(point.fixed_interval);
            point.countdown = interval.max(dt);

            let mut spec = self.template.clone();
            spec.position = point.position + point.offset;
            orders.push(SpawnOrder {
                pool: point.pool,
                spec,
                data,
            });
        }

        orders
    }
}
