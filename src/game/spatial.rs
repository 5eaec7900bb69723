//! Spatial queries over a per-tick physics snapshot
//!
//! Agents go into a spatial hash grid (many, small, moving); structures are
//! kept in a flat list (few, large, static). Both are filtered by category
//! bitmask. Results are sorted by `BodyRef` so a fixed snapshot always
//! answers the same way.

use hashbrown::HashMap;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::config::CategoryLayers;
use crate::game::state::{AgentId, BodyRef, GameState, ObstacleId, Shape};
use crate::util::vec2::{Vec2, DEGENERATE_EPSILON};

// ============================================================================
// Agent Spatial Grid
// ============================================================================

/// Default cell size for the agent grid (world units)
/// Should be at least 2x the largest agent radius for pair detection
pub const AGENT_GRID_CELL_SIZE: f32 = 4.0;

/// Initial capacity for grid cells (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 128;

/// Initial capacity for index vectors within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Spatial hash grid storing indices into a caller-owned body list
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Fx hashing keeps iteration order stable between runs
    cells: HashMap<CellKey, Vec<u32>, FxBuildHasher>,
}

impl SpatialGrid {
    /// Create a new spatial grid with the given cell size
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity_and_hasher(GRID_INITIAL_CAPACITY, FxBuildHasher),
        }
    }

    /// Convert world position to cell key
    #[inline]
    fn position_to_cell(&self, position: Vec2) -> CellKey {
        (
            (position.x * self.inv_cell_size).floor() as i32,
            (position.y * self.inv_cell_size).floor() as i32,
        )
    }

    #[inline]
    pub fn insert(&mut self, index: u32, position: Vec2) {
        let cell_key = self.position_to_cell(position);
        self.cells
            .entry(cell_key)
            .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
            .push(index);
    }

    /// Indices in every cell touched by the square around `position` with
    /// half-size `radius`. Callers still do the exact shape test.
    pub fn query_radius(&self, position: Vec2, radius: f32) -> impl Iterator<Item = u32> + '_ {
        let (cx, cy) = self.position_to_cell(position);
        let reach = (radius.max(0.0) * self.inv_cell_size).ceil() as i32;

        (-reach..=reach).flat_map(move |dy| {
            (-reach..=reach).flat_map(move |dx| {
                self.cells
                    .get(&(cx + dx, cy + dy))
                    .into_iter()
                    .flat_map(|cell| cell.iter().copied())
            })
        })
    }

    /// Visit each pair of indices in the same or adjacent cells exactly once
    ///
    /// Only sound when the cell size covers the largest interaction distance.
    pub fn for_each_potential_pair<F>(&self, mut callback: F)
    where
        F: FnMut(u32, u32),
    {
        // Same cell, then right, bottom, bottom-right and bottom-left neighbors
        const HALF_NEIGHBORS: [(i32, i32); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];

        for (&(cx, cy), entries) in &self.cells {
            for i in 0..entries.len() {
                for j in (i + 1)..entries.len() {
                    callback(entries[i], entries[j]);
                }
            }

            for (dx, dy) in HALF_NEIGHBORS {
                if let Some(other_cell) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &a in entries {
                        for &b in other_cell {
                            callback(a, b);
                        }
                    }
                }
            }
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(AGENT_GRID_CELL_SIZE)
    }
}

// ============================================================================
// Shape geometry
// ============================================================================

/// Closest surface point of a shape as seen from some query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub point: Vec2,
    /// Outward unit normal, `Vec2::UP` when degenerate
    pub normal: Vec2,
    /// Signed distance from the query point to the surface (negative inside)
    pub distance: f32,
}

/// Nearest point on `shape` (centered at `center`) to `p`
pub fn nearest_on_shape(p: Vec2, center: Vec2, shape: &Shape) -> SurfacePoint {
    match *shape {
        Shape::Circle { radius } => {
            let (dir, len) = (p - center).normalize_with_length();
            let normal = if len > 0.0 { dir } else { Vec2::UP };
            SurfacePoint {
                point: center + normal * radius,
                normal,
                distance: len - radius,
            }
        }
        Shape::Aabb { half_extents: h } => {
            let local = p - center;
            let inside = local.x.abs() <= h.x && local.y.abs() <= h.y;
            if inside {
                // Leave through the face with the smallest penetration
                let pen_x = h.x - local.x.abs();
                let pen_y = h.y - local.y.abs();
                if pen_x < pen_y {
                    let sx = local.x.signum();
                    SurfacePoint {
                        point: Vec2::new(center.x + sx * h.x, p.y),
                        normal: Vec2::new(sx, 0.0),
                        distance: -pen_x,
                    }
                } else {
                    let sy = local.y.signum();
                    SurfacePoint {
                        point: Vec2::new(p.x, center.y + sy * h.y),
                        normal: Vec2::new(0.0, sy),
                        distance: -pen_y,
                    }
                }
            } else {
                let clamped = local.clamp(-h, h);
                let (normal, len) = (local - clamped).normalize_with_length();
                SurfacePoint {
                    point: center + clamped,
                    normal: if len > 0.0 { normal } else { Vec2::UP },
                    distance: len,
                }
            }
        }
    }
}

/// Does the circle touch the shape?
#[inline]
pub fn circle_overlaps_shape(center: Vec2, radius: f32, shape_center: Vec2, shape: &Shape) -> bool {
    nearest_on_shape(center, shape_center, shape).distance <= radius
}

/// Ray against a circle of radius `r`; returns entry distance and normal
fn ray_circle(origin: Vec2, dir: Vec2, center: Vec2, r: f32, max_distance: f32) -> Option<(f32, Vec2)> {
    let m = origin - center;
    let b = m.dot(dir);
    let c = m.length_sq() - r * r;
    if c > 0.0 && b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()).max(0.0);
    if t > max_distance {
        return None;
    }
    let normal = (origin + dir * t - center).normalize_or(Vec2::UP);
    Some((t, normal))
}

/// Slab test against an axis-aligned box; returns the entry distance (>= 0)
fn ray_aabb(origin: Vec2, dir: Vec2, center: Vec2, half: Vec2) -> Option<f32> {
    let min = center - half;
    let max = center + half;
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;

    for (o, d, lo, hi) in [(origin.x, dir.x, min.x, max.x), (origin.y, dir.y, min.y, max.y)] {
        if d.abs() < DEGENERATE_EPSILON {
            if o < lo || o > hi {
                return None;
            }
        } else {
            let inv = 1.0 / d;
            let (mut t1, mut t2) = ((lo - o) * inv, (hi - o) * inv);
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_enter = t_enter.max(t1);
            t_exit = t_exit.min(t2);
            if t_enter > t_exit {
                return None;
            }
        }
    }

    if t_exit < 0.0 {
        return None;
    }
    Some(t_enter.max(0.0))
}

/// Sweep a circle along unit `dir` against one shape.
///
/// Returns distance travelled before contact and the normal at contact
/// (pointing from the shape toward the swept circle). A circle that already
/// touches the shape hits at distance 0, unless it is moving away from it.
pub fn sweep_circle_shape(
    origin: Vec2,
    radius: f32,
    dir: Vec2,
    max_distance: f32,
    center: Vec2,
    shape: &Shape,
) -> Option<(f32, Vec2)> {
    let surface = nearest_on_shape(origin, center, shape);
    if surface.distance <= radius {
        // Shapes are convex, so a cast separating from one never re-enters it
        if dir.dot(surface.normal) > DEGENERATE_EPSILON {
            return None;
        }
        return Some((0.0, surface.normal));
    }

    let hit = match *shape {
        Shape::Circle { radius: r } => ray_circle(origin, dir, center, r + radius, max_distance),
        Shape::Aabb { half_extents: h } => {
            let t = ray_aabb(origin, dir, center, h + Vec2::new(radius, radius))?;
            if t > max_distance {
                return None;
            }
            let hit_center = origin + dir * t;
            let local = hit_center - center;
            if local.x.abs() > h.x && local.y.abs() > h.y {
                // Rounded corner of the expanded box
                let corner = center + Vec2::new(h.x * local.x.signum(), h.y * local.y.signum());
                ray_circle(origin, dir, corner, radius, max_distance)
            } else {
                Some((t, nearest_on_shape(hit_center, center, shape).normal))
            }
        }
    };
    // A grazing start that rounding kept out of the touch test above
    hit.filter(|(_, normal)| dir.dot(*normal) <= DEGENERATE_EPSILON)
}

// ============================================================================
// Query interface
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid spatial query: {0}")]
    InvalidQuery(&'static str),
}

/// Nearest hit of a swept circle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Contact point on the hit body's surface
    pub point: Vec2,
    /// Surface normal at the contact, pointing out of the hit body
    pub normal: Vec2,
    /// Distance travelled before contact
    pub distance: f32,
    pub body: BodyRef,
}

/// Circle overlap and swept-circle cast filtered by category mask
pub trait SpatialQuery {
    fn overlap_circle(&self, center: Vec2, radius: f32, mask: u32) -> Result<Vec<BodyRef>, QueryError>;

    fn sweep_circle(
        &self,
        origin: Vec2,
        radius: f32,
        direction: Vec2,
        max_distance: f32,
        mask: u32,
    ) -> Result<Option<SweepHit>, QueryError>;
}

fn check_circle(center: Vec2, radius: f32) -> Result<(), QueryError> {
    if !center.is_finite() || !radius.is_finite() {
        return Err(QueryError::InvalidQuery("non-finite input"));
    }
    if radius <= 0.0 {
        return Err(QueryError::InvalidQuery("radius must be positive"));
    }
    Ok(())
}

// ============================================================================
// Physics world snapshot
// ============================================================================

/// One body as captured by the snapshot
#[derive(Debug, Clone, Copy)]
pub struct BodyEntry {
    pub body: BodyRef,
    pub position: Vec2,
    pub shape: Shape,
    pub category: u32,
    /// Damageable and not dead
    pub targetable: bool,
}

/// Read-only view of the world taken at one point in a tick
#[derive(Debug, Clone)]
pub struct PhysicsWorld {
    agents: Vec<BodyEntry>,
    agent_index: FxHashMap<AgentId, usize>,
    grid: SpatialGrid,
    max_agent_radius: f32,
    agent_bits: u32,
    obstacles: Vec<BodyEntry>,
    obstacle_index: FxHashMap<ObstacleId, usize>,
}

impl PhysicsWorld {
    /// Snapshot every live agent and every structure
    pub fn build(state: &GameState, layers: &CategoryLayers) -> Self {
        let mut agents = Vec::with_capacity(state.agent_count());
        let mut agent_index = FxHashMap::default();
        let mut grid = SpatialGrid::default();
        let mut max_agent_radius: f32 = 0.0;

        for agent in state.agents().filter(|a| a.is_live()) {
            let index = agents.len();
            grid.insert(index as u32, agent.position);
            agent_index.insert(agent.id, index);
            max_agent_radius = max_agent_radius.max(agent.radius);
            agents.push(BodyEntry {
                body: BodyRef::Agent(agent.id),
                position: agent.position,
                shape: Shape::Circle { radius: agent.radius },
                category: layers.unit(agent.faction),
                targetable: true,
            });
        }

        let mut obstacles = Vec::new();
        let mut obstacle_index = FxHashMap::default();
        for obstacle in state.obstacles().filter(|o| !o.is_destroyed()) {
            obstacle_index.insert(obstacle.id, obstacles.len());
            obstacles.push(BodyEntry {
                body: BodyRef::Obstacle(obstacle.id),
                position: obstacle.position,
                shape: obstacle.shape,
                category: layers.structure(obstacle.faction),
                targetable: obstacle.vitals.is_some(),
            });
        }

        Self {
            agents,
            agent_index,
            grid,
            max_agent_radius,
            agent_bits: layers.ally_unit | layers.enemy_unit,
            obstacles,
            obstacle_index,
        }
    }

    pub fn entry(&self, body: BodyRef) -> Option<&BodyEntry> {
        match body {
            BodyRef::Agent(id) => self.agent_index.get(&id).map(|&i| &self.agents[i]),
            BodyRef::Obstacle(id) => self.obstacle_index.get(&id).map(|&i| &self.obstacles[i]),
        }
    }

    #[inline]
    pub fn position_of(&self, body: BodyRef) -> Option<Vec2> {
        self.entry(body).map(|e| e.position)
    }

    #[inline]
    pub fn is_targetable(&self, body: BodyRef) -> bool {
        self.entry(body).map(|e| e.targetable).unwrap_or(false)
    }

    /// Nearest surface point of `body` to `p`
    pub fn nearest_on_body(&self, body: BodyRef, p: Vec2) -> Option<SurfacePoint> {
        self.entry(body)
            .map(|e| nearest_on_shape(p, e.position, &e.shape))
    }

    /// Agent entries near `center` plus every obstacle, filtered by mask
    fn candidates(&self, center: Vec2, reach: f32, mask: u32) -> impl Iterator<Item = &BodyEntry> {
        let agents = (mask & self.agent_bits != 0)
            .then(|| {
                self.grid
                    .query_radius(center, reach + self.max_agent_radius)
                    .map(|i| &self.agents[i as usize])
            })
            .into_iter()
            .flatten();
        agents
            .chain(self.obstacles.iter())
            .filter(move |e| e.category & mask != 0)
    }
}

impl SpatialQuery for PhysicsWorld {
    fn overlap_circle(&self, center: Vec2, radius: f32, mask: u32) -> Result<Vec<BodyRef>, QueryError> {
        check_circle(center, radius)?;

        let mut hits: Vec<BodyRef> = self
            .candidates(center, radius, mask)
            .filter(|e| circle_overlaps_shape(center, radius, e.position, &e.shape))
            .map(|e| e.body)
            .collect();
        hits.sort_unstable();
        hits.dedup();
        Ok(hits)
    }

    fn sweep_circle(
        &self,
        origin: Vec2,
        radius: f32,
        direction: Vec2,
        max_distance: f32,
        mask: u32,
    ) -> Result<Option<SweepHit>, QueryError> {
        check_circle(origin, radius)?;
        if !direction.is_finite() || !max_distance.is_finite() {
            return Err(QueryError::InvalidQuery("non-finite input"));
        }
        if max_distance < 0.0 {
            return Err(QueryError::InvalidQuery("negative cast distance"));
        }
        let (dir, len) = direction.normalize_with_length();
        if len <= DEGENERATE_EPSILON {
            return Err(QueryError::InvalidQuery("zero-length direction"));
        }

        let half = max_distance * 0.5;
        let mid = origin + dir * half;
        let mut best: Option<SweepHit> = None;

        for e in self.candidates(mid, half + radius, mask) {
            let Some((distance, normal)) =
                sweep_circle_shape(origin, radius, dir, max_distance, e.position, &e.shape)
            else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(b) => distance < b.distance || (distance == b.distance && e.body < b.body),
            };
            if better {
                let center_at_hit = origin + dir * distance;
                best = Some(SweepHit {
                    point: center_at_hit - normal * radius,
                    normal,
                    distance,
                    body: e.body,
                });
            }
        }

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{AgentSpec, Faction, Obstacle};

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn world_with(agents: &[(Faction, Vec2)], obstacles: &[Obstacle]) -> (GameState, PhysicsWorld) {
        let mut state = GameState::new();
        for (faction, pos) in agents {
            state.insert_agent(&AgentSpec::new(*faction, *pos), 0.0);
        }
        for o in obstacles {
            state.add_obstacle(o.clone());
        }
        let world = PhysicsWorld::build(&state, &CategoryLayers::default());
        (state, world)
    }

    #[test]
    fn test_grid_query_covers_radius() {
        let mut grid = SpatialGrid::new(1.0);
        grid.insert(0, Vec2::new(0.5, 0.5));
        grid.insert(1, Vec2::new(3.5, 0.5));

        let near: Vec<u32> = grid.query_radius(Vec2::new(0.5, 0.5), 0.5).collect();
        assert_eq!(near, vec![0]);

        let mut far: Vec<u32> = grid.query_radius(Vec2::new(0.5, 0.5), 3.0).collect();
        far.sort_unstable();
        assert_eq!(far, vec![0, 1]);
    }

    #[test]
    fn test_grid_pairs_visited_once() {
        let mut grid = SpatialGrid::new(2.0);
        grid.insert(0, Vec2::new(0.5, 0.5));
        grid.insert(1, Vec2::new(1.5, 0.5));
        grid.insert(2, Vec2::new(2.5, 0.5));
        grid.insert(3, Vec2::new(20.0, 20.0));

        let mut pairs = Vec::new();
        grid.for_each_potential_pair(|a, b| pairs.push((a.min(b), a.max(b))));
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_nearest_on_circle() {
        let s = nearest_on_shape(Vec2::new(3.0, 0.0), Vec2::ZERO, &Shape::Circle { radius: 1.0 });
        assert!(s.point.approx_eq(Vec2::new(1.0, 0.0), EPSILON));
        assert!(s.normal.approx_eq(Vec2::RIGHT, EPSILON));
        assert!(approx_eq(s.distance, 2.0));
    }

    #[test]
    fn test_nearest_on_circle_center_falls_back_to_up() {
        let s = nearest_on_shape(Vec2::ZERO, Vec2::ZERO, &Shape::Circle { radius: 1.0 });
        assert_eq!(s.normal, Vec2::UP);
        assert!(s.normal.is_finite());
    }

    #[test]
    fn test_nearest_on_box_inside_and_outside() {
        let shape = Shape::Aabb { half_extents: Vec2::new(2.0, 1.0) };
        let outside = nearest_on_shape(Vec2::new(0.5, 3.0), Vec2::ZERO, &shape);
        assert!(outside.normal.approx_eq(Vec2::UP, EPSILON));
        assert!(approx_eq(outside.distance, 2.0));

        let inside = nearest_on_shape(Vec2::new(1.8, 0.0), Vec2::ZERO, &shape);
        assert!(inside.normal.approx_eq(Vec2::RIGHT, EPSILON));
        assert!(approx_eq(inside.distance, -0.2));
    }

    #[test]
    fn test_overlap_sorted_agents_first() {
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(1.0, 0.0), Shape::Circle { radius: 0.5 })];
        let (_, world) = world_with(
            &[(Faction::Enemy, Vec2::new(0.5, 0.5)), (Faction::Enemy, Vec2::new(-0.5, 0.0))],
            &obstacles,
        );

        let hits = world.overlap_circle(Vec2::ZERO, 1.0, u32::MAX).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(matches!(hits[0], BodyRef::Agent(a) if a.index == 0));
        assert!(matches!(hits[1], BodyRef::Agent(a) if a.index == 1));
        assert!(matches!(hits[2], BodyRef::Obstacle(_)));
    }

    #[test]
    fn test_overlap_respects_mask() {
        let layers = CategoryLayers::default();
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(1.0, 0.0), Shape::Circle { radius: 0.5 })];
        let (_, world) = world_with(&[(Faction::Enemy, Vec2::ZERO)], &obstacles);

        let structures = world.overlap_circle(Vec2::ZERO, 2.0, layers.ally_structure).unwrap();
        assert_eq!(structures.len(), 1);
        assert!(matches!(structures[0], BodyRef::Obstacle(_)));

        let allies = world.overlap_circle(Vec2::ZERO, 2.0, layers.ally_unit).unwrap();
        assert!(allies.is_empty());
    }

    #[test]
    fn test_invalid_queries() {
        let (_, world) = world_with(&[], &[]);
        assert!(matches!(
            world.overlap_circle(Vec2::ZERO, 0.0, u32::MAX),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(world.overlap_circle(Vec2::new(f32::NAN, 0.0), 1.0, u32::MAX).is_err());
        assert!(world.sweep_circle(Vec2::ZERO, 0.5, Vec2::ZERO, 1.0, u32::MAX).is_err());
        assert!(world.sweep_circle(Vec2::ZERO, -1.0, Vec2::RIGHT, 1.0, u32::MAX).is_err());
        assert!(world.sweep_circle(Vec2::ZERO, 0.5, Vec2::RIGHT, -1.0, u32::MAX).is_err());
    }

    #[test]
    fn test_sweep_hits_circle() {
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(5.0, 0.0), Shape::Circle { radius: 1.0 })];
        let (_, world) = world_with(&[], &obstacles);

        let hit = world
            .sweep_circle(Vec2::ZERO, 0.3, Vec2::RIGHT, 10.0, u32::MAX)
            .unwrap()
            .unwrap();
        assert!(approx_eq(hit.distance, 3.7));
        assert!(hit.normal.approx_eq(Vec2::LEFT, EPSILON));
        assert!(hit.point.approx_eq(Vec2::new(4.0, 0.0), EPSILON));

        let short = world.sweep_circle(Vec2::ZERO, 0.3, Vec2::RIGHT, 3.0, u32::MAX).unwrap();
        assert!(short.is_none());

        let away = world.sweep_circle(Vec2::ZERO, 0.3, Vec2::LEFT, 10.0, u32::MAX).unwrap();
        assert!(away.is_none());
    }

    #[test]
    fn test_sweep_already_overlapping_hits_at_zero() {
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(1.0, 0.0), Shape::Circle { radius: 1.0 })];
        let (_, world) = world_with(&[], &obstacles);

        let hit = world
            .sweep_circle(Vec2::new(-0.1, 0.0), 0.3, Vec2::UP, 1.0, u32::MAX)
            .unwrap()
            .unwrap();
        assert_eq!(hit.distance, 0.0);
        assert!(hit.normal.approx_eq(Vec2::LEFT, EPSILON));
    }

    #[test]
    fn test_sweep_touching_and_leaving_is_clear() {
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(5.0, 0.0), Shape::Circle { radius: 1.0 })];
        let (_, world) = world_with(&[], &obstacles);

        let leaving = world.sweep_circle(Vec2::new(3.7, 0.0), 0.3, Vec2::LEFT, 0.5, u32::MAX).unwrap();
        assert!(leaving.is_none());

        let entering = world
            .sweep_circle(Vec2::new(3.7, 0.0), 0.3, Vec2::RIGHT, 0.5, u32::MAX)
            .unwrap()
            .unwrap();
        assert!(entering.distance < 1e-4);
        assert!(entering.normal.approx_eq(Vec2::LEFT, EPSILON));
    }

    #[test]
    fn test_sweep_box_face_and_corner() {
        let shape = Shape::Aabb { half_extents: Vec2::new(1.0, 1.0) };
        let obstacles = [Obstacle::new(Faction::Ally, Vec2::new(5.0, 0.0), shape)];
        let (_, world) = world_with(&[], &obstacles);

        let face = world
            .sweep_circle(Vec2::new(0.0, 0.5), 0.5, Vec2::RIGHT, 10.0, u32::MAX)
            .unwrap()
            .unwrap();
        assert!(approx_eq(face.distance, 3.5));
        assert!(face.normal.approx_eq(Vec2::LEFT, EPSILON));

        // Clips the rounded top-left corner
        let corner = world
            .sweep_circle(Vec2::new(0.0, 1.35), 0.4, Vec2::RIGHT, 10.0, u32::MAX)
            .unwrap()
            .unwrap();
        assert!((corner.distance - (4.0 - 0.0375f32.sqrt())).abs() < 1e-3);
        assert!(corner.normal.y > 0.0 && corner.normal.x < 0.0);

        // Enters the expanded box's corner square but misses the rounding
        let clear = world
            .sweep_circle(Vec2::new(3.0, 0.75), 0.4, Vec2::new(1.0, 1.0), 10.0, u32::MAX)
            .unwrap();
        assert!(clear.is_none());
    }

    #[test]
    fn test_sweep_nearest_wins() {
        let obstacles = [
            Obstacle::new(Faction::Ally, Vec2::new(8.0, 0.0), Shape::Circle { radius: 1.0 }),
            Obstacle::new(Faction::Ally, Vec2::new(4.0, 0.0), Shape::Circle { radius: 1.0 }),
        ];
        let (_, world) = world_with(&[], &obstacles);
        let hit = world
            .sweep_circle(Vec2::ZERO, 0.2, Vec2::RIGHT, 20.0, u32::MAX)
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, BodyRef::Obstacle(ObstacleId(1)));
    }

    #[test]
    fn test_sweep_finds_agents() {
        let (_, world) = world_with(&[(Faction::Enemy, Vec2::new(3.0, 0.0))], &[]);
        let layers = CategoryLayers::default();
        let hit = world
            .sweep_circle(Vec2::ZERO, 0.2, Vec2::RIGHT, 5.0, layers.enemy_unit)
            .unwrap()
            .unwrap();
        assert!(approx_eq(hit.distance, 2.5));
        assert!(matches!(hit.body, BodyRef::Agent(_)));
    }

    #[test]
    fn test_snapshot_skips_dead_agents() {
        let mut state = GameState::new();
        let id = state.insert_agent(&AgentSpec::new(Faction::Enemy, Vec2::ZERO), 0.0);
        if let Some(agent) = state.agent_mut(id) {
            agent.vitals.is_dead = true;
        }
        let world = PhysicsWorld::build(&state, &CategoryLayers::default());
        assert!(world.entry(BodyRef::Agent(id)).is_none());
        assert!(world.position_of(BodyRef::Agent(id)).is_none());
    }
}
