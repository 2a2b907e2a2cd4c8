//! Procedural voxel terrain for the headless host.
//!
//! Rolling Perlin hills quantized to whole blocks, with bottom slabs wherever the continuous height
//! passes the half block. Low ground may hold a shallow pond and scattered stone pillars give the
//! planner something to walk around. Deterministic for a given seed.

use std::collections::HashMap;

use bevy::prelude::*;
use navigator::{Block, TerrainQuery, VoxelWorld};
use noise::{NoiseFn, Perlin};

use crate::config::{SimConfig, WorldConfig};

/// Solid rock below the lowest possible surface.
const BEDROCK_DEPTH: i32 = 3;

/// Free air kept above the highest possible pillar top.
const HEADROOM: i32 = 8;

const POND_SCALE: f64 = 0.06;
const POND_THRESHOLD: f64 = 0.35;
const PILLAR_SCALE: f64 = 0.31;
const PILLAR_THRESHOLD: f64 = 0.55;
const PILLAR_HEIGHT: i32 = 3;

/// Columns searched around a requested spawn when the exact column is unusable.
const SPAWN_SEARCH_RADIUS: i32 = 4;

pub struct TerrainGenerator {
    height_noise: Perlin,
    detail_noise: Perlin,
    pond_noise: Perlin,
    pillar_noise: Perlin,
}

impl TerrainGenerator {
    pub fn new(seed: u32) -> Self {
        Self {
            height_noise: Perlin::new(seed),
            detail_noise: Perlin::new(seed.wrapping_add(1)),
            pond_noise: Perlin::new(seed.wrapping_add(2)),
            pillar_noise: Perlin::new(seed.wrapping_add(3)),
        }
    }

    /// Continuous ground height at a world position.
    pub fn get_height(&self, x: f32, z: f32, config: &WorldConfig) -> f32 {
        let (x, z) = (x as f64, z as f64);
        let scale = config.hill_scale;
        let hills = self.height_noise.get([x * scale, z * scale]);
        let detail = self.detail_noise.get([x * scale * 4.0, z * scale * 4.0]) * 0.15;
        config.base_height as f32 + ((hills + detail) as f32 * config.height_amplitude)
    }

    fn is_pond(&self, x: i32, z: i32, height: f32, config: &WorldConfig) -> bool {
        config.ponds
            && height < config.base_height as f32
            && self.pond_noise.get([x as f64 * POND_SCALE, z as f64 * POND_SCALE]) > POND_THRESHOLD
    }

    fn is_pillar(&self, x: i32, z: i32, config: &WorldConfig) -> bool {
        config.pillars
            && self.pillar_noise.get([x as f64 * PILLAR_SCALE, z as f64 * PILLAR_SCALE]) > PILLAR_THRESHOLD
    }
}

/// Generated terrain plus the surface cell of every column.
#[derive(Resource)]
pub struct SimWorld {
    pub voxels: VoxelWorld,
    surface: HashMap<IVec2, i32>,
}

impl SimWorld {
    pub fn generate(config: &WorldConfig) -> Self {
        let generator = TerrainGenerator::new(config.seed);
        let amplitude = config.height_amplitude.abs().ceil() as i32 + 1;
        let bedrock = config.base_height - amplitude - BEDROCK_DEPTH;
        let extent = config.half_extent;

        let mut voxels = VoxelWorld::new();
        let mut surface = HashMap::new();
        for x in -extent..=extent {
            for z in -extent..=extent {
                let height = generator.get_height(x as f32 + 0.5, z as f32 + 0.5, config);
                let top = height.floor() as i32;
                voxels.fill(IVec3::new(x, bedrock, z), IVec3::new(x, top, z), Block::Solid);

                if generator.is_pond(x, z, height, config) {
                    voxels.set(IVec3::new(x, top, z), Block::Water);
                    continue;
                }
                if generator.is_pillar(x, z, config) {
                    voxels.fill(
                        IVec3::new(x, top + 1, z),
                        IVec3::new(x, top + PILLAR_HEIGHT, z),
                        Block::Solid,
                    );
                    continue;
                }
                if height - top as f32 >= 0.5 {
                    voxels.set(IVec3::new(x, top + 1, z), Block::BottomSlab);
                }
                surface.insert(IVec2::new(x, z), top + 1);
            }
        }

        voxels.set_bounds(
            IVec3::new(-extent, bedrock, -extent),
            IVec3::new(extent, config.base_height + amplitude + PILLAR_HEIGHT + HEADROOM, extent),
        );
        Self { voxels, surface }
    }

    /// Walkable ground cell of a column, if the column has one.
    pub fn surface_cell(&self, column: IVec2) -> Option<IVec3> {
        let y = *self.surface.get(&column)?;
        let cell = IVec3::new(column.x, y, column.y);
        self.voxels.is_standable(cell).then_some(cell)
    }

    /// Nearest walkable ground cell to `column`, searching a small square around it.
    pub fn ground_cell_near(&self, column: IVec2) -> Option<IVec3> {
        self.cell_near(column, |_| true)
    }

    /// Like [`Self::ground_cell_near`], restricted to cells whose floor is the full block below.
    ///
    /// Arrival compares the feet against the goal cell's own height, so a goal on a slab (feet
    /// half a block up) would never count as reached.
    pub fn goal_cell_near(&self, column: IVec2) -> Option<IVec3> {
        self.cell_near(column, |cell| self.voxels.walk_surface_height(cell) == cell.y as f32)
    }

    fn cell_near(&self, column: IVec2, accept: impl Fn(IVec3) -> bool) -> Option<IVec3> {
        let r = SPAWN_SEARCH_RADIUS;
        let mut offsets: Vec<IVec2> = (-r..=r)
            .flat_map(|dx| (-r..=r).map(move |dz| IVec2::new(dx, dz)))
            .collect();
        offsets.sort_by_key(|o| o.length_squared());
        offsets
            .into_iter()
            .filter_map(|o| self.surface_cell(column + o))
            .find(|cell| accept(*cell))
    }

    pub fn column_count(&self) -> usize {
        self.surface.len()
    }
}

pub fn setup_world(mut commands: Commands, config: Res<SimConfig>) {
    let world = SimWorld::generate(&config.world);
    info!(
        "generated world: seed {}, {} blocks, {} walkable columns",
        config.world.seed,
        world.voxels.len(),
        world.column_count()
    );
    commands.insert_resource(world);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> WorldConfig {
        WorldConfig {
            half_extent: 24,
            ..default()
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = SimWorld::generate(&small_config());
        let b = SimWorld::generate(&small_config());
        assert_eq!(a.voxels.len(), b.voxels.len());
        assert_eq!(a.surface, b.surface);

        let other = SimWorld::generate(&WorldConfig {
            seed: 1234,
            ..small_config()
        });
        assert_ne!(a.surface, other.surface);
    }

    #[test]
    fn test_surface_cells_are_standable() {
        let world = SimWorld::generate(&small_config());
        for x in (-24..=24).step_by(3) {
            for z in (-24..=24).step_by(3) {
                if let Some(cell) = world.surface_cell(IVec2::new(x, z)) {
                    assert!(world.voxels.is_standable(cell), "{cell}");
                    assert!(!world.voxels.is_standable(cell + IVec3::Y));
                }
            }
        }
    }

    #[test]
    fn test_ponds_and_pillars_are_not_walkable() {
        let world = SimWorld::generate(&small_config());
        for x in -24..=24 {
            for z in -24..=24 {
                let column = IVec2::new(x, z);
                if world.surface.contains_key(&column) {
                    continue;
                }
                let top = (-10..=90)
                    .rev()
                    .map(|y| IVec3::new(x, y, z))
                    .find(|c| world.voxels.get(*c).is_some());
                let Some(top) = top else { continue };
                match world.voxels.get(top) {
                    Some(Block::Water) => assert!(!world.voxels.is_standable(top + IVec3::Y)),
                    Some(Block::Solid) => assert!(world.surface_cell(column).is_none()),
                    other => panic!("unexpected top block {other:?} at {top}"),
                }
            }
        }
    }

    #[test]
    fn test_ground_search_skips_blocked_columns() {
        let config = WorldConfig {
            pillars: false,
            ponds: false,
            ..small_config()
        };
        let world = SimWorld::generate(&config);
        let cell = world.ground_cell_near(IVec2::new(3, -7)).unwrap();
        assert_eq!((cell.x, cell.z), (3, -7));

        let mut blocked = world;
        let top = cell + IVec3::Y;
        blocked.voxels.fill(top, top + IVec3::Y, Block::Solid);
        let moved = blocked.ground_cell_near(IVec2::new(3, -7)).unwrap();
        assert_ne!((moved.x, moved.z), (3, -7));
        assert!((moved.x - 3).abs() <= 1 && (moved.z + 7).abs() <= 1);
    }

    #[test]
    fn test_goal_search_skips_slab_columns() {
        let world = SimWorld::generate(&small_config());
        let slab_column = (-20..=20)
            .flat_map(|x| (-20..=20).map(move |z| IVec2::new(x, z)))
            .find(|c| {
                world
                    .surface_cell(*c)
                    .is_some_and(|cell| world.voxels.get(cell) == Some(Block::BottomSlab))
            })
            .expect("no slab surface in the test world");

        assert!(world.ground_cell_near(slab_column).is_some());
        let goal = world.goal_cell_near(slab_column).unwrap();
        assert_ne!((goal.x, goal.z), (slab_column.x, slab_column.y));
        assert_eq!(world.voxels.walk_surface_height(goal), goal.y as f32);

        for x in (-20..=20).step_by(5) {
            for z in (-20..=20).step_by(5) {
                if let Some(goal) = world.goal_cell_near(IVec2::new(x, z)) {
                    assert_eq!(world.voxels.walk_surface_height(goal), goal.y as f32, "{goal}");
                }
            }
        }
    }
}
