//! Tuning constants for the simulation core
//!
//! These are the defaults behind `SimConfig::default()`. Systems read the
//! config, not these constants, so a deployment can override any of them.

/// Fixed-step clock
pub mod physics {
    /// Simulation tick rate in Hz
    pub const TICK_RATE: u32 = 50;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 50.0;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// Extra gap still reported as a contact between two shapes
    pub const CONTACT_SLOP: f32 = 0.02;
    /// Share of an agent/agent overlap each of two free agents takes
    pub const SEPARATION_SHARE: f32 = 0.5;
}

/// Local motion planner
pub mod motion {
    /// Default unit move speed (units/s)
    pub const MOVE_SPEED: f32 = 3.5;
    /// Arrival tolerance around a waypoint
    pub const STOP_DISTANCE: f32 = 0.15;
    /// Gap kept between the agent's surface and an obstacle's surface
    pub const CLEARANCE: f32 = 0.2;
    /// Push along the wall normal applied with every slide step
    pub const NORMAL_BIAS: f32 = 0.02;
    /// Seconds between line-of-sight exit checks while wall-following
    pub const EXIT_CHECK_INTERVAL: f32 = 0.25;
    /// A wall-follow episode longer than this is abandoned
    pub const MAX_WALL_FOLLOW_TIME: f32 = 4.0;
    /// Bounded re-projection passes for corners
    pub const MAX_CORRECTIONS: u32 = 3;
    /// Radius searched for an obstacle when line of sight is blocked
    pub const WIDE_SEARCH_RADIUS: f32 = 1.5;
}

/// Same-faction pass-through while a move command is active
pub mod gate {
    /// Radius scanned for friendly bodies to pass through
    pub const IGNORE_RADIUS: f32 = 1.0;
    /// Seconds between suppression refreshes
    pub const REFRESH_INTERVAL: f32 = 0.15;
    /// Suppressions are released beyond `IGNORE_RADIUS * RESTORE_RADIUS_FACTOR`
    pub const RESTORE_RADIUS_FACTOR: f32 = 2.0;
}

/// Target acquisition
pub mod targeting {
    /// Default scan radius
    pub const DETECTION_RADIUS: f32 = 15.0;
    /// Seconds between scans for one agent
    pub const SCAN_INTERVAL: f32 = 0.5;
}

/// Damage, invincibility and knockback
pub mod combat {
    pub const MAX_HEALTH: f32 = 10.0;
    pub const ATTACK_DAMAGE: f32 = 5.0;
    pub const ATTACK_COOLDOWN: f32 = 1.0;
    pub const INVINCIBILITY_DURATION: f32 = 0.3;
    pub const KNOCKBACK_POWER: f32 = 4.0;
    pub const KNOCKBACK_DURATION: f32 = 0.2;
    /// Default radius for area melee attacks
    pub const AREA_ATTACK_RADIUS: f32 = 3.0;
}

/// Roaming avoidance around friendly structures
pub mod avoidance {
    pub const AVOID_DURATION: f32 = 0.6;
    pub const AVOID_SPEED_MUL: f32 = 1.2;
    /// No avoidance right after spawning
    pub const SPAWN_GRACE: f32 = 0.35;
    pub const MIN_SPEED_TO_AVOID: f32 = 0.1;
    /// How far the desired direction must point into the wall
    pub const MIN_DOT_BLOCK: f32 = 0.25;
}

/// Projectiles and bombard zones
pub mod projectile {
    pub const BULLET_SPEED: f32 = 25.0;
    pub const BULLET_RADIUS: f32 = 0.15;
    pub const BULLET_LIFETIME: f32 = 3.0;
    pub const ZONE_RADIUS: f32 = 1.5;
    /// Zones only hit during this window after landing
    pub const ZONE_ARMED_TIME: f32 = 0.1;
    pub const ZONE_LIFETIME: f32 = 2.0;
}

/// Default collision category bits
pub mod layers {
    pub const ALLY_UNIT: u32 = 1 << 0;
    pub const ENEMY_UNIT: u32 = 1 << 1;
    pub const ALLY_STRUCTURE: u32 = 1 << 2;
    pub const ENEMY_STRUCTURE: u32 = 1 << 3;
}
