pub mod avoidance;
pub mod combat;
pub mod controller;
pub mod faction_gate;
pub mod motion;
pub mod physics;
#[cfg(feature = "projectiles")]
pub mod projectile;
pub mod targeting;
