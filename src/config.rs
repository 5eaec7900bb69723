use std::str::FromStr;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::{gate, layers, motion, physics, targeting};
use crate::game::state::Faction;

/// Layer-map errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing layer name: {0}")]
    MissingLayer(&'static str),
    #[error("Layer '{name}' index {index} is out of range (0-31)")]
    LayerOutOfRange { name: &'static str, index: u32 },
    #[error("Layers '{0}' and '{1}' share the same bit")]
    DuplicateLayer(&'static str, &'static str),
}

/// Collision category bits, one per faction/body class
///
/// Systems only ever see the resulting masks, never the names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLayers {
    pub ally_unit: u32,
    pub enemy_unit: u32,
    pub ally_structure: u32,
    pub enemy_structure: u32,
}

impl Default for CategoryLayers {
    fn default() -> Self {
        Self {
            ally_unit: layers::ALLY_UNIT,
            enemy_unit: layers::ENEMY_UNIT,
            ally_structure: layers::ALLY_STRUCTURE,
            enemy_structure: layers::ENEMY_STRUCTURE,
        }
    }
}

impl CategoryLayers {
    pub const ALLY_UNIT_NAME: &'static str = "AllyUnit";
    pub const ENEMY_UNIT_NAME: &'static str = "EnemyUnit";
    pub const ALLY_STRUCTURE_NAME: &'static str = "AllyStructure";
    pub const ENEMY_STRUCTURE_NAME: &'static str = "EnemyStructure";

    /// Build from an external `name -> layer index` table
    pub fn from_names(names: &HashMap<String, u32>) -> Result<Self, ConfigError> {
        let bit = |name: &'static str| -> Result<u32, ConfigError> {
            let index = *names.get(name).ok_or(ConfigError::MissingLayer(name))?;
            if index >= 32 {
                return Err(ConfigError::LayerOutOfRange { name, index });
            }
            Ok(1u32 << index)
        };

        let layers = Self {
            ally_unit: bit(Self::ALLY_UNIT_NAME)?,
            enemy_unit: bit(Self::ENEMY_UNIT_NAME)?,
            ally_structure: bit(Self::ALLY_STRUCTURE_NAME)?,
            enemy_structure: bit(Self::ENEMY_STRUCTURE_NAME)?,
        };
        layers.check_distinct()?;
        Ok(layers)
    }

    fn named(&self) -> [(&'static str, u32); 4] {
        [
            (Self::ALLY_UNIT_NAME, self.ally_unit),
            (Self::ENEMY_UNIT_NAME, self.enemy_unit),
            (Self::ALLY_STRUCTURE_NAME, self.ally_structure),
            (Self::ENEMY_STRUCTURE_NAME, self.enemy_structure),
        ]
    }

    fn check_distinct(&self) -> Result<(), ConfigError> {
        let named = self.named();
        for (i, (name_a, bits_a)) in named.iter().enumerate() {
            for (name_b, bits_b) in named.iter().skip(i + 1) {
                if bits_a & bits_b != 0 {
                    return Err(ConfigError::DuplicateLayer(name_a, name_b));
                }
            }
        }
        Ok(())
    }

    /// Category bit of a faction's mobile units
    #[inline]
    pub fn unit(&self, faction: Faction) -> u32 {
        match faction {
            Faction::Ally => self.ally_unit,
            Faction::Enemy => self.enemy_unit,
        }
    }

    /// Category bit of a faction's structures
    #[inline]
    pub fn structure(&self, faction: Faction) -> u32 {
        match faction {
            Faction::Ally => self.ally_structure,
            Faction::Enemy => self.enemy_structure,
        }
    }

    /// Everything a faction may attack
    #[inline]
    pub fn hostile(&self, faction: Faction) -> u32 {
        let other = faction.opponent();
        self.unit(other) | self.structure(other)
    }
}

/// Motion planner tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    pub stop_distance: f32,
    pub clearance: f32,
    pub normal_bias: f32,
    pub exit_check_interval: f32,
    pub max_wall_follow_time: f32,
    pub max_corrections: u32,
    pub wide_search_radius: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            stop_distance: motion::STOP_DISTANCE,
            clearance: motion::CLEARANCE,
            normal_bias: motion::NORMAL_BIAS,
            exit_check_interval: motion::EXIT_CHECK_INTERVAL,
            max_wall_follow_time: motion::MAX_WALL_FOLLOW_TIME,
            max_corrections: motion::MAX_CORRECTIONS,
            wide_search_radius: motion::WIDE_SEARCH_RADIUS,
        }
    }
}

/// Same-faction pass-through tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub ignore_radius: f32,
    pub refresh_interval: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ignore_radius: gate::IGNORE_RADIUS,
            refresh_interval: gate::REFRESH_INTERVAL,
        }
    }
}

impl GateConfig {
    /// Distance beyond which a suppression is released
    #[inline]
    pub fn restore_radius(&self) -> f32 {
        self.ignore_radius * gate::RESTORE_RADIUS_FACTOR
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Fixed ticks per second
    pub tick_rate: u32,
    /// Seed for the simulation RNG
    pub seed: u64,
    /// Seconds between target scans for one agent
    pub scan_interval: f32,
    pub layers: CategoryLayers,
    pub motion: MotionConfig,
    pub gate: GateConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: physics::TICK_RATE,
            seed: 42,
            scan_interval: targeting::SCAN_INTERVAL,
            layers: CategoryLayers::default(),
            motion: MotionConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

/// Read and parse an env var, keeping the default (with a warning) when the
/// value does not parse or fails `accept`
fn env_override<T>(key: &str, accept: impl Fn(&T) -> bool) -> Option<T>
where
    T: FromStr,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(parsed) if accept(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} '{}' is out of range, using default", key, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(rate) = env_override::<u32>("SIM_TICK_RATE", |v| (1..=1000).contains(v)) {
            config.tick_rate = rate;
        }
        if let Some(seed) = env_override::<u64>("SIM_SEED", |_| true) {
            config.seed = seed;
        }
        if let Some(interval) = env_override::<f32>("SIM_SCAN_INTERVAL", |v| *v > 0.0) {
            config.scan_interval = interval;
        }
        if let Some(stop) = env_override::<f32>("SIM_STOP_DISTANCE", |v| *v > 0.0) {
            config.motion.stop_distance = stop;
        }
        if let Some(clearance) = env_override::<f32>("SIM_CLEARANCE", |v| *v >= 0.0) {
            config.motion.clearance = clearance;
        }
        if let Some(max_time) = env_override::<f32>("SIM_MAX_WALL_FOLLOW_TIME", |v| *v > 0.0) {
            config.motion.max_wall_follow_time = max_time;
        }
        if let Some(radius) = env_override::<f32>("SIM_IGNORE_RADIUS", |v| *v > 0.0) {
            config.gate.ignore_radius = radius;
        }
        if let Some(refresh) = env_override::<f32>("SIM_GATE_REFRESH", |v| *v > 0.0) {
            config.gate.refresh_interval = refresh;
        }

        config
    }

    /// Seconds per tick
    #[inline]
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate cannot be 0".to_string());
        }
        if self.scan_interval <= 0.0 {
            return Err("scan_interval must be positive".to_string());
        }
        if self.motion.stop_distance <= 0.0 {
            return Err("stop_distance must be positive".to_string());
        }
        if self.motion.clearance < 0.0 {
            return Err("clearance cannot be negative".to_string());
        }
        if self.motion.exit_check_interval <= 0.0 {
            return Err("exit_check_interval must be positive".to_string());
        }
        if self.motion.max_wall_follow_time <= self.motion.exit_check_interval {
            return Err("max_wall_follow_time must exceed exit_check_interval".to_string());
        }
        if self.motion.max_corrections == 0 {
            return Err("max_corrections must be at least 1".to_string());
        }
        if self.gate.ignore_radius <= 0.0 || self.gate.refresh_interval <= 0.0 {
            return Err("gate radius and refresh interval must be positive".to_string());
        }
        self.layers.check_distinct().map_err(|e| e.to_string())?;
        if self.layers.named().iter().any(|(_, bits)| *bits == 0) {
            return Err("every category layer needs a bit".to_string());
        }
        Ok(())
    }
}
