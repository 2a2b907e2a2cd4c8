//! Sparse in-memory voxel world.
//!
//! Reference [`TerrainQuery`] implementation used by the headless host and by tests. Cells that
//! were never set are air; an optional loaded region makes queries outside it fail like an
//! unloaded chunk would.

use std::collections::HashMap;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;
use crate::terrain::{CollisionExtents, TerrainQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Block {
    Solid,
    BottomSlab,
    TopSlab,
    Carpet,
    Water,
}

impl Block {
    pub fn extents(self) -> Option<CollisionExtents> {
        match self {
            Block::Solid => Some(CollisionExtents::FULL),
            Block::BottomSlab => Some(CollisionExtents::new(0.0, 0.5)),
            Block::TopSlab => Some(CollisionExtents::new(0.5, 1.0)),
            Block::Carpet => Some(CollisionExtents::new(0.0, 0.0625)),
            Block::Water => None,
        }
    }

    #[inline]
    pub fn is_fluid(self) -> bool {
        matches!(self, Block::Water)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoxelWorld {
    blocks: HashMap<IVec3, Block>,
    bounds: Option<(IVec3, IVec3)>,
}

impl VoxelWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solid floor spanning `min..=max` on the XZ plane at height `y`.
    pub fn flat(min: IVec2, max: IVec2, y: i32) -> Self {
        let mut world = Self::new();
        world.fill(IVec3::new(min.x, y, min.y), IVec3::new(max.x, y, max.y), Block::Solid);
        world
    }

    /// Restrict queries to the inclusive box `min..=max`.
    pub fn set_bounds(&mut self, min: IVec3, max: IVec3) {
        self.bounds = Some((min.min(max), min.max(max)));
    }

    pub fn set(&mut self, cell: IVec3, block: Block) {
        self.blocks.insert(cell, block);
    }

    pub fn clear(&mut self, cell: IVec3) {
        self.blocks.remove(&cell);
    }

    /// Fill the inclusive box between two corners.
    pub fn fill(&mut self, a: IVec3, b: IVec3, block: Block) {
        let (lo, hi) = (a.min(b), a.max(b));
        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    self.blocks.insert(IVec3::new(x, y, z), block);
                }
            }
        }
    }

    pub fn get(&self, cell: IVec3) -> Option<Block> {
        self.blocks.get(&cell).copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn loaded(&self, cell: IVec3) -> Result<Option<Block>, TerrainError> {
        if let Some((min, max)) = self.bounds {
            if cell.cmplt(min).any() || cell.cmpgt(max).any() {
                return Err(TerrainError::Unloaded(cell));
            }
        }
        Ok(self.get(cell))
    }
}

impl TerrainQuery for VoxelWorld {
    fn collision_extents(&self, cell: IVec3) -> Result<Option<CollisionExtents>, TerrainError> {
        Ok(self.loaded(cell)?.and_then(Block::extents))
    }

    fn fluid_at(&self, cell: IVec3) -> Result<bool, TerrainError> {
        Ok(self.loaded(cell)?.is_some_and(Block::is_fluid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_inclusive_and_order_free() {
        let mut world = VoxelWorld::new();
        world.fill(IVec3::new(2, 0, 2), IVec3::new(0, 0, 0), Block::Solid);
        assert_eq!(world.len(), 9);
        assert_eq!(world.get(IVec3::new(1, 0, 1)), Some(Block::Solid));
    }

    #[test]
    fn test_bounds_report_unloaded() {
        let mut world = VoxelWorld::flat(IVec2::splat(-2), IVec2::splat(2), 0);
        world.set_bounds(IVec3::new(-2, -1, -2), IVec3::new(2, 4, 2));
        assert_eq!(
            world.collision_extents(IVec3::new(3, 0, 0)),
            Err(TerrainError::Unloaded(IVec3::new(3, 0, 0)))
        );
        assert_eq!(world.collision_extents(IVec3::new(2, 0, 2)), Ok(Some(CollisionExtents::FULL)));
        assert_eq!(world.fluid_at(IVec3::new(0, 1, 0)), Ok(false));
    }
}
