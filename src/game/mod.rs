pub mod constants;
pub mod context;
pub mod filter;
pub mod performance;
pub mod simulation;
pub mod spatial;
pub mod spawn;
pub mod state;
pub mod systems;
