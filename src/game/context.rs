//! Shared simulation context
//!
//! Everything a system needs besides the world itself: configuration, the
//! fixed-step clock, the spawn/recycle service, death listeners, counters and
//! the seeded RNG. Passed explicitly to every system that needs it.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::game::state::{BodyRef, Faction};
use crate::util::vec2::Vec2;

/// Pool identifier understood by the spawn service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u32);

/// Well-known pools used by the core
pub mod pools {
    use super::PoolId;

    pub const UNIT: PoolId = PoolId(0);
    pub const BULLET: PoolId = PoolId(1);
    pub const SHELL: PoolId = PoolId(2);
    pub const ZONE: PoolId = PoolId(3);
    pub const EXP_GEM: PoolId = PoolId(4);
    pub const BOSS: PoolId = PoolId(5);
}

/// Opaque handle to a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolHandle {
    pub pool: PoolId,
    pub slot: u32,
}

/// Spawn/recycle collaborator. The core never pools objects itself.
pub trait SpawnService {
    /// Hand out an object from `pool`, or `None` when the pool is exhausted
    fn acquire(&mut self, pool: PoolId) -> Option<PoolHandle>;
    /// Return an object to its pool
    fn release(&mut self, handle: PoolHandle);
}

#[derive(Debug, Default)]
struct PoolSlots {
    capacity: Option<usize>,
    free: Vec<u32>,
    next: u32,
    live: FxHashSet<u32>,
}

/// Free-list pool used by the headless runner and tests
#[derive(Debug, Default)]
pub struct InMemoryPool {
    pools: FxHashMap<PoolId, PoolSlots>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of live objects in `pool`
    pub fn with_capacity(mut self, pool: PoolId, capacity: usize) -> Self {
        self.pools.entry(pool).or_default().capacity = Some(capacity);
        self
    }

    /// Number of objects currently handed out from `pool`
    pub fn live_count(&self, pool: PoolId) -> usize {
        self.pools.get(&pool).map(|p| p.live.len()).unwrap_or(0)
    }
}

impl SpawnService for InMemoryPool {
    fn acquire(&mut self, pool: PoolId) -> Option<PoolHandle> {
        let slots = self.pools.entry(pool).or_default();
        if let Some(cap) = slots.capacity {
            if slots.live.len() >= cap {
                return None;
            }
        }

        let slot = match slots.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = slots.next;
                slots.next += 1;
                slot
            }
        };
        slots.live.insert(slot);
        Some(PoolHandle { pool, slot })
    }

    fn release(&mut self, handle: PoolHandle) {
        let Some(slots) = self.pools.get_mut(&handle.pool) else {
            tracing::warn!("Release into unknown pool {:?}", handle.pool);
            return;
        };
        if slots.live.remove(&handle.slot) {
            slots.free.push(handle.slot);
        } else {
            tracing::warn!("Double release of {:?}", handle);
        }
    }
}

/// Fixed-step simulation clock
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimClock {
    pub tick: u64,
    /// Simulated seconds since start
    pub elapsed: f32,
}

impl SimClock {
    #[inline]
    pub fn advance(&mut self, dt: f32) {
        self.tick += 1;
        self.elapsed += dt;
    }
}

/// What a death listener is told
#[derive(Debug, Clone, Serialize)]
pub struct DeathEvent {
    pub body: BodyRef,
    pub faction: Faction,
    pub position: Vec2,
    pub tick: u64,
    /// Item dropped through the spawn service, if any
    pub drop: Option<PoolHandle>,
}

pub type DeathHook = Box<dyn FnMut(&DeathEvent) + Send>;

/// Registered death listeners, all run synchronously on each death
#[derive(Default)]
pub struct DeathHooks {
    hooks: Vec<DeathHook>,
}

impl DeathHooks {
    pub fn register(&mut self, hook: DeathHook) {
        self.hooks.push(hook);
    }

    pub fn notify(&mut self, event: &DeathEvent) {
        for hook in self.hooks.iter_mut() {
            hook(event);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Running counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimStats {
    /// Enemy units killed
    pub kills: u32,
    /// All deaths, any faction or body kind
    pub deaths: u32,
    pub drops: u32,
    pub structures_destroyed: u32,
    pub shots_fired: u32,
}

/// Context handed to every system
pub struct SimContext {
    pub config: SimConfig,
    pub clock: SimClock,
    pub spawn: Box<dyn SpawnService + Send>,
    pub hooks: DeathHooks,
    pub stats: SimStats,
    pub rng: StdRng,
}

impl SimContext {
    pub fn new(config: SimConfig) -> Self {
        Self::with_spawn_service(config, Box::new(InMemoryPool::new()))
    }

    pub fn with_spawn_service(config: SimConfig, spawn: Box<dyn SpawnService + Send>) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            clock: SimClock::default(),
            spawn,
            hooks: DeathHooks::default(),
            stats: SimStats::default(),
            rng,
        }
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.config.dt()
    }
}
