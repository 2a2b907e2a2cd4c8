//! Terrain query contract.
//!
//! The world is a grid of unit cells. A host only answers two raw questions per cell (vertical
//! collision band and fluid presence); standability, walk-surface height and line casts are
//! derived here so every host classifies cells the same way.
//!
//! Raw queries may fail (unloaded chunk, out-of-range cell). The derived predicates never
//! propagate that: a failing cell is treated as blocked and not standable.

use bevy::prelude::*;

use crate::error::TerrainError;

/// Low-profile geometry an agent can stand inside (carpets, bottom slabs).
pub const BODY_CLEARANCE_MIN_Y: f32 = 0.20;
pub const BODY_CLEARANCE_MAX_Y: f32 = 0.60;

/// Sample spacing of [`TerrainQuery::segment_clear`].
pub const SEGMENT_SAMPLE_STEP: f32 = 0.1;

/// Vertical band of blocking geometry inside a cell, as offsets from the cell base (0..=1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionExtents {
    pub min_y: f32,
    pub max_y: f32,
}

impl CollisionExtents {
    pub const FULL: Self = Self { min_y: 0.0, max_y: 1.0 };

    pub const fn new(min_y: f32, max_y: f32) -> Self {
        Self { min_y, max_y }
    }

    /// Low enough to walk through with the feet.
    #[inline]
    pub fn is_low_profile(&self) -> bool {
        self.min_y <= BODY_CLEARANCE_MIN_Y && self.max_y <= BODY_CLEARANCE_MAX_Y
    }
}

/// World collaborator. Implementors provide the two raw queries; everything else has a default.
pub trait TerrainQuery {
    /// Collision band of the cell, `None` when the cell has no collision.
    fn collision_extents(&self, cell: IVec3) -> Result<Option<CollisionExtents>, TerrainError>;

    fn fluid_at(&self, cell: IVec3) -> Result<bool, TerrainError>;

    /// Fluid presence with failures treated as fluid.
    fn has_fluid(&self, cell: IVec3) -> bool {
        self.fluid_at(cell).unwrap_or_else(|err| {
            trace!("fluid query failed: {err}");
            true
        })
    }

    /// Collision band with failures treated as a full block.
    fn extents_or_full(&self, cell: IVec3) -> Option<CollisionExtents> {
        self.collision_extents(cell).unwrap_or_else(|err| {
            trace!("collision query failed: {err}");
            Some(CollisionExtents::FULL)
        })
    }

    /// Any collision at all.
    fn is_blocking(&self, cell: IVec3) -> bool {
        self.extents_or_full(cell).is_some()
    }

    fn is_body_passable(&self, cell: IVec3) -> bool {
        match self.extents_or_full(cell) {
            None => true,
            Some(ext) => ext.is_low_profile(),
        }
    }

    fn is_head_passable(&self, cell: IVec3) -> bool {
        self.extents_or_full(cell).is_none()
    }

    /// Solid support inside the cell or directly below it.
    fn has_floor(&self, cell: IVec3) -> bool {
        let supports = |c: IVec3| {
            matches!(self.collision_extents(c), Ok(Some(_))) && matches!(self.fluid_at(c), Ok(false))
        };
        supports(cell) || supports(cell - IVec3::Y)
    }

    /// An agent's feet can occupy `cell`.
    fn is_standable(&self, cell: IVec3) -> bool {
        let above = cell + IVec3::Y;
        !self.has_fluid(cell)
            && self.is_body_passable(cell)
            && self.is_head_passable(above)
            && !self.has_fluid(above)
            && self.has_floor(cell)
    }

    /// Absolute height the feet rest at when standing in `cell`.
    fn walk_surface_height(&self, cell: IVec3) -> f32 {
        if let Ok(Some(own)) = self.collision_extents(cell) {
            if own.is_low_profile() {
                return cell.y as f32 + own.max_y;
            }
        }
        let below = cell - IVec3::Y;
        match self.collision_extents(below) {
            Ok(Some(ext)) => below.y as f32 + ext.max_y,
            _ => below.y as f32,
        }
    }

    /// True if no sample along `from -> to` lies inside a cell's collision band.
    fn segment_clear(&self, from: Vec3, to: Vec3) -> bool {
        let delta = to - from;
        let steps = (delta.length() / SEGMENT_SAMPLE_STEP).ceil().max(1.0) as usize;
        (0..=steps).all(|i| {
            let p = from + delta * (i as f32 / steps as f32);
            let cell = p.floor().as_ivec3();
            let local_y = p.y - cell.y as f32;
            match self.extents_or_full(cell) {
                Some(ext) => local_y < ext.min_y || local_y >= ext.max_y,
                None => true,
            }
        })
    }
}
