//! Broad phase for moving entities
//!
//! A sparse uniform grid rebuilt every tick. Cells are created on demand, so
//! memory depends only on what was inserted, never on the extent of the world.
//! Entities whose safety box would span too many cells are kept in a flat
//! oversized list instead, which every query scans.

use std::collections::HashMap;

use glam::DVec3;

use crate::geometry::Aabb;

/// Edge length of a grid cell in metres
const CELL_SIZE: f64 = 4.0;

/// Most cells a gridded safety box may span along one axis
const MAX_CELLS_PER_AXIS: i64 = 4;

type CellKey = (i64, i64, i64);

fn cell_key(point: DVec3) -> CellKey {
    let cell = (point / CELL_SIZE).floor();
    (cell.x as i64, cell.y as i64, cell.z as i64)
}

#[derive(Debug, Default)]
struct Slot {
    present: bool,
    bounds: Option<Aabb>,
    cells: Vec<CellKey>,
}

/// Grid of entity slots keyed by their safety boxes
#[derive(Debug, Default)]
pub struct EntityClustering {
    cells: HashMap<CellKey, Vec<usize>>,
    slots: Vec<Slot>,
    oversized: Vec<usize>,
    pool: Vec<Vec<usize>>,
}

impl EntityClustering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register entity `slot` with the box of half-extent `safety_radius`
    /// around `center`. Inserting the same slot twice before a reset does
    /// nothing.
    pub fn insert(&mut self, slot: usize, center: DVec3, safety_radius: f64) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, Slot::default);
        }
        if self.slots[slot].present {
            return;
        }

        let bounds = Aabb::around(center, safety_radius);
        let (low, high) = (cell_key(bounds.min), cell_key(bounds.max));

        let entry = &mut self.slots[slot];
        entry.present = true;
        entry.bounds = Some(bounds);

        let span = (high.0 - low.0).max(high.1 - low.1).max(high.2 - low.2) + 1;
        if span > MAX_CELLS_PER_AXIS {
            self.oversized.push(slot);
            return;
        }

        let pool = &mut self.pool;
        for z in low.2..=high.2 {
            for y in low.1..=high.1 {
                for x in low.0..=high.0 {
                    let key = (x, y, z);
                    self.cells
                        .entry(key)
                        .or_insert_with(|| pool.pop().unwrap_or_default())
                        .push(slot);
                    entry.cells.push(key);
                }
            }
        }
    }

    /// Replace the contents of `out` with every other slot whose safety box
    /// overlaps the one of `slot`, sorted and without duplicates. Slots that
    /// were never inserted have no neighbours.
    pub fn query(&self, slot: usize, out: &mut Vec<usize>) {
        out.clear();

        let Some(entry) = self.slots.get(slot).filter(|entry| entry.present) else {
            return;
        };
        let Some(bounds) = entry.bounds else {
            return;
        };

        if entry.cells.is_empty() {
            // Oversized: compare against every inserted slot
            for other in 0..self.slots.len() {
                if other != slot && self.overlaps(other, &bounds) {
                    out.push(other);
                }
            }
            return;
        }

        for key in &entry.cells {
            let Some(members) = self.cells.get(key) else {
                continue;
            };
            for &other in members {
                if other != slot && self.overlaps(other, &bounds) {
                    out.push(other);
                }
            }
        }
        for &other in &self.oversized {
            if self.overlaps(other, &bounds) {
                out.push(other);
            }
        }

        out.sort_unstable();
        out.dedup();
    }

    fn overlaps(&self, slot: usize, bounds: &Aabb) -> bool {
        self.slots[slot]
            .bounds
            .is_some_and(|other_bounds| other_bounds.overlaps(bounds))
    }

    /// Forget every insertion, keeping the cell buffers for the next tick
    pub fn reset(&mut self) {
        for (_, mut members) in self.cells.drain() {
            members.clear();
            self.pool.push(members);
        }
        self.oversized.clear();
        for slot in &mut self.slots {
            slot.present = false;
            slot.bounds = None;
            slot.cells.clear();
        }
    }
}
