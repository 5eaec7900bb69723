//! Bullets, shells and bombard zones
//!
//! Bullets fly straight and may pierce, damaging each body at most once.
//! Shells fly to a fixed point and leave a zone that damages whatever enters
//! it during a short arming window. Every object is backed by a handle from
//! the spawn service and released when it expires.

use smallvec::SmallVec;

use crate::config::CategoryLayers;
use crate::game::constants::projectile::{BULLET_LIFETIME, BULLET_RADIUS, ZONE_ARMED_TIME, ZONE_LIFETIME};
use crate::game::context::{pools, PoolHandle, SimContext};
use crate::game::spatial::{sweep_circle_shape, PhysicsWorld, SpatialQuery};
use crate::game::state::{AgentId, BodyRef, Faction, GameState, ProjectileKind};
use crate::game::systems::combat::{self, DamageOutcome};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone)]
pub enum Flight {
    Bullet {
        velocity: Vec2,
        /// Bodies this bullet may still hit
        hits_left: u32,
        hit: SmallVec<[BodyRef; 4]>,
    },
    Shell {
        target_point: Vec2,
        speed: f32,
        zone_radius: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub handle: Option<PoolHandle>,
    pub owner: AgentId,
    pub faction: Faction,
    pub position: Vec2,
    pub damage: f32,
    pub lifetime: f32,
    pub flight: Flight,
}

/// Landed shell area
#[derive(Debug, Clone)]
pub struct Zone {
    pub handle: Option<PoolHandle>,
    pub faction: Faction,
    pub position: Vec2,
    pub radius: f32,
    pub damage: f32,
    /// Remaining time during which entering targets are hit
    pub armed: f32,
    pub lifetime: f32,
    pub hit: SmallVec<[BodyRef; 8]>,
}

/// Per-tick projectile bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectileReport {
    pub hits: u32,
    pub expired: u32,
    pub zones_spawned: u32,
}

/// Fire from `shooter` toward `aim`. Returns false when nothing was fired.
pub fn fire(
    state: &mut GameState,
    ctx: &mut SimContext,
    shooter: AgentId,
    aim: Vec2,
    kind: ProjectileKind,
    damage: f32,
) -> bool {
    let Some(agent) = state.agent(shooter).filter(|a| a.is_live()) else {
        return false;
    };
    let (origin, faction, radius) = (agent.position, agent.faction, agent.radius);
    let dir = (aim - origin).normalize_or(agent.facing);

    let pool = match kind {
        ProjectileKind::Bullet { .. } => pools::BULLET,
        ProjectileKind::Shell { .. } => pools::SHELL,
    };
    let Some(handle) = ctx.spawn.acquire(pool) else {
        tracing::debug!("Pool {:?} exhausted, {:?} holds fire", pool, shooter);
        return false;
    };

    let flight = match kind {
        ProjectileKind::Bullet { speed, pierce } => Flight::Bullet {
            velocity: dir * speed,
            hits_left: pierce.saturating_add(1),
            hit: SmallVec::new(),
        },
        ProjectileKind::Shell { speed, zone_radius } => Flight::Shell {
            target_point: aim,
            speed,
            zone_radius,
        },
    };

    state.projectiles.push(Projectile {
        handle: Some(handle),
        owner: shooter,
        faction,
        position: origin + dir * radius,
        damage,
        lifetime: BULLET_LIFETIME,
        flight,
    });
    ctx.stats.shots_fired += 1;
    true
}

/// Advance projectiles and zones by one tick
pub fn update(state: &mut GameState, ctx: &mut SimContext, layers: &CategoryLayers, dt: f32) -> ProjectileReport {
    let mut report = ProjectileReport::default();
    if state.projectiles.is_empty() && state.zones.is_empty() {
        return report;
    }

    let world = PhysicsWorld::build(state, layers);
    let flying = std::mem::take(&mut state.projectiles);
    let mut survivors = Vec::with_capacity(flying.len());

    for mut projectile in flying {
        projectile.lifetime -= dt;
        let alive = if matches!(projectile.flight, Flight::Bullet { .. }) {
            advance_bullet(state, ctx, &world, layers, &mut projectile, dt, &mut report)
        } else {
            advance_shell(state, ctx, &mut projectile, dt, &mut report)
        };
        if alive && projectile.lifetime > 0.0 {
            survivors.push(projectile);
        } else {
            report.expired += 1;
            if let Some(handle) = projectile.handle {
                ctx.spawn.release(handle);
            }
        }
    }
    state.projectiles = survivors;

    update_zones(state, ctx, &world, layers, dt, &mut report);
    report
}

fn advance_bullet(
    state: &mut GameState,
    ctx: &mut SimContext,
    world: &PhysicsWorld,
    layers: &CategoryLayers,
    projectile: &mut Projectile,
    dt: f32,
    report: &mut ProjectileReport,
) -> bool {
    let Flight::Bullet { velocity, hits_left, hit } = &mut projectile.flight else {
        return false;
    };
    let (dir, speed) = velocity.normalize_with_length();
    let step = speed * dt;
    if step <= 0.0 {
        return false;
    }

    let origin = projectile.position;
    let mid = origin + dir * (step * 0.5);
    let mask = layers.hostile(projectile.faction);
    let candidates = match world.overlap_circle(mid, step * 0.5 + BULLET_RADIUS, mask) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::debug!("Bullet query rejected: {}", e);
            return false;
        }
    };

    let mut struck: SmallVec<[(f32, BodyRef); 4]> = candidates
        .into_iter()
        .filter(|body| !hit.contains(body))
        .filter_map(|body| {
            let entry = world.entry(body)?;
            sweep_circle_shape(origin, BULLET_RADIUS, dir, step, entry.position, &entry.shape)
                .map(|(distance, _)| (distance, body))
        })
        .collect();
    struck.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for (distance, body) in struck {
        if !world.is_targetable(body) {
            // Walls stop bullets
            projectile.position = origin + dir * distance;
            return false;
        }
        hit.push(body);
        if combat::damage_body(state, ctx, body, Some(origin), projectile.damage) != DamageOutcome::Ignored {
            report.hits += 1;
        }
        *hits_left = hits_left.saturating_sub(1);
        if *hits_left == 0 {
            projectile.position = origin + dir * distance;
            return false;
        }
    }

    projectile.position = origin + dir * step;
    true
}

fn advance_shell(
    state: &mut GameState,
    ctx: &mut SimContext,
    projectile: &mut Projectile,
    dt: f32,
    report: &mut ProjectileReport,
) -> bool {
    let Flight::Shell { target_point, speed, zone_radius } = projectile.flight else {
        return false;
    };
    let (dir, remaining) = (target_point - projectile.position).normalize_with_length();
    let step = speed * dt;
    if remaining > step {
        projectile.position += dir * step;
        return true;
    }

    projectile.position = target_point;
    state.zones.push(Zone {
        handle: ctx.spawn.acquire(pools::ZONE),
        faction: projectile.faction,
        position: target_point,
        radius: zone_radius,
        damage: projectile.damage,
        armed: ZONE_ARMED_TIME,
        lifetime: ZONE_LIFETIME,
        hit: SmallVec::new(),
    });
    report.zones_spawned += 1;
    tracing::debug!("Shell from {:?} landed at ({:.1}, {:.1})", projectile.owner, target_point.x, target_point.y);
    false
}

fn update_zones(
    state: &mut GameState,
    ctx: &mut SimContext,
    world: &PhysicsWorld,
    layers: &CategoryLayers,
    dt: f32,
    report: &mut ProjectileReport,
) {
    let mut zones = std::mem::take(&mut state.zones);

    for zone in zones.iter_mut().filter(|z| z.armed > 0.0) {
        let bodies = match world.overlap_circle(zone.position, zone.radius, layers.hostile(zone.faction)) {
            Ok(bodies) => bodies,
            Err(e) => {
                tracing::debug!("Zone query rejected: {}", e);
                continue;
            }
        };
        for body in bodies {
            if zone.hit.contains(&body) || !world.is_targetable(body) {
                continue;
            }
            if combat::damage_body(state, ctx, body, Some(zone.position), zone.damage) != DamageOutcome::Ignored {
                zone.hit.push(body);
                report.hits += 1;
            }
        }
    }

    zones.retain_mut(|zone| {
        zone.armed -= dt;
        zone.lifetime -= dt;
        if zone.lifetime > 0.0 {
            return true;
        }
        if let Some(handle) = zone.handle.take() {
            ctx.spawn.release(handle);
        }
        false
    });

    state.zones = zones;
}
