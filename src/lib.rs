//! Siege Sim Library
//!
//! Fixed-step simulation core for a top-down action/tower-defense game:
//! agents that steer around structures, pick targets, fight, and get pushed
//! apart, with friendly units passing through each other while they follow
//! a move command.
//!
//! # Features
//!
//! - `projectiles` - Simulated bullets and artillery shells (enabled by default).
//!   Without it ranged attacks land instantly.

pub mod config;
pub mod util;
pub mod game;

pub use config::SimConfig;
pub use game::simulation::{Simulation, TickReport};
pub use game::state::{AgentId, AgentSpec, BodyRef, Faction, Obstacle, ObstacleId, Shape};
pub use util::vec2::Vec2;
