//! Loose octree over static tiles
//!
//! Every node divides its box into `SPLIT_FACTOR`³ cells. Small tiles are
//! pushed down into every cell their (slightly expanded) bounding box touches,
//! so a tile can live in several nodes. Tiles that would cover too many cells
//! stay as leafs of the node itself. The tree only grows.

use std::mem;

use glam::DVec3;

use super::Tile;
use crate::geometry::Aabb;

const SPLIT_FACTOR: usize = 10;
const CHILD_COUNT: usize = SPLIT_FACTOR * SPLIT_FACTOR * SPLIT_FACTOR;
/// A node splits when it would receive more leafs than this
const MAX_LEAFS: usize = 50;
/// Tiles and queries are expanded by this before they are mapped to cells
const MARGIN: f64 = 0.01;
/// Nodes smaller than this (on any axis) never split
const MIN_EXTENT: f64 = 0.1;

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    leafs: Vec<u32>,
    children: Option<Box<[Option<u32>]>>,
}

impl Node {
    fn new(bounds: Aabb) -> Self {
        Self {
            bounds,
            leafs: Vec::new(),
            children: None,
        }
    }

    fn cell(&self, value: f64, axis: usize) -> usize {
        let min = self.bounds.min[axis];
        let extent = self.bounds.max[axis] - min;
        let index = (SPLIT_FACTOR as f64 * (value - min) / extent) as i64;
        index.clamp(0, SPLIT_FACTOR as i64 - 1) as usize
    }

    /// Inclusive cell range touched by `bounds` after expanding it by the margin
    fn cell_range(&self, bounds: &Aabb) -> ([usize; 3], [usize; 3]) {
        let expanded = bounds.expanded(MARGIN);
        let low = [0, 1, 2].map(|axis| self.cell(expanded.min[axis], axis));
        let high = [0, 1, 2].map(|axis| self.cell(expanded.max[axis], axis));
        (low, high)
    }

    fn child_bounds(&self, x: usize, y: usize, z: usize) -> Aabb {
        let size = self.bounds.size() / SPLIT_FACTOR as f64;
        let min = self.bounds.min + size * DVec3::new(x as f64, y as f64, z as f64);
        Aabb::new(min, min + size)
    }

    fn can_split(&self) -> bool {
        self.bounds.size().min_element() >= MIN_EXTENT
    }
}

#[inline]
fn slot(x: usize, y: usize, z: usize) -> usize {
    x + SPLIT_FACTOR * (y + SPLIT_FACTOR * z)
}

/// Spatial index owning every tile of a scene
#[derive(Debug)]
pub struct TileTree {
    tiles: Vec<Tile>,
    tile_bounds: Vec<Aabb>,
    nodes: Vec<Node>,
}

impl TileTree {
    /// Create an empty tree whose root covers `bounds`. Tiles outside the
    /// root are still found, they just end up in the border cells.
    pub fn new(bounds: Aabb) -> Self {
        Self {
            tiles: Vec::new(),
            tile_bounds: Vec::new(),
            nodes: vec![Node::new(bounds)],
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, index: usize) -> &Tile {
        &self.tiles[index]
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Add a tile and return its index
    pub fn insert(&mut self, tile: Tile) -> usize {
        let index = self.tiles.len();
        self.tile_bounds.push(tile.collider.bounds());
        self.tiles.push(tile);
        self.insert_into(0, index as u32);
        index
    }

    fn insert_into(&mut self, node: usize, tile: u32) {
        let current = &self.nodes[node];
        if current.children.is_none() && current.leafs.len() >= MAX_LEAFS && current.can_split() {
            self.split(node);
        }

        if self.nodes[node].children.is_none() {
            self.nodes[node].leafs.push(tile);
        } else {
            self.insert_child(node, tile);
        }
    }

    fn split(&mut self, node: usize) {
        self.nodes[node].children = Some(vec![None; CHILD_COUNT].into_boxed_slice());
        let leafs = mem::take(&mut self.nodes[node].leafs);
        for leaf in leafs {
            self.insert_child(node, leaf);
        }
    }

    fn insert_child(&mut self, node: usize, tile: u32) {
        let (low, high) = self.nodes[node].cell_range(&self.tile_bounds[tile as usize]);
        let cells = (0..3).map(|axis| 1 + high[axis] - low[axis]).product::<usize>();

        // Relatively large tiles stay here instead of being copied into many children
        if cells > SPLIT_FACTOR / 2 {
            self.nodes[node].leafs.push(tile);
            return;
        }

        for z in low[2]..=high[2] {
            for y in low[1]..=high[1] {
                for x in low[0]..=high[0] {
                    let child = self.child_or_create(node, x, y, z);
                    self.insert_into(child, tile);
                }
            }
        }
    }

    fn child_or_create(&mut self, node: usize, x: usize, y: usize, z: usize) -> usize {
        let index = slot(x, y, z);
        if let Some(Some(child)) = self.nodes[node].children.as_ref().map(|c| c[index]) {
            return child as usize;
        }

        let child = self.nodes.len();
        let bounds = self.nodes[node].child_bounds(x, y, z);
        self.nodes.push(Node::new(bounds));
        if let Some(children) = self.nodes[node].children.as_mut() {
            children[index] = Some(child as u32);
        }
        child
    }

    /// Replace the contents of `out` with the indices of all tiles whose
    /// bounding box overlaps `bounds`, in ascending order without duplicates.
    pub fn query(&self, bounds: &Aabb, out: &mut Vec<usize>) {
        out.clear();

        let mut stack = Vec::with_capacity(16);
        stack.push(0usize);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            for &leaf in &node.leafs {
                if self.tile_bounds[leaf as usize].overlaps(bounds) {
                    out.push(leaf as usize);
                }
            }

            if let Some(children) = node.children.as_ref() {
                let (low, high) = node.cell_range(bounds);
                for z in low[2]..=high[2] {
                    for y in low[1]..=high[1] {
                        for x in low[0]..=high[0] {
                            if let Some(child) = children[slot(x, y, z)] {
                                stack.push(child as usize);
                            }
                        }
                    }
                }
            }
        }

        out.sort_unstable();
        out.dedup();
    }
}
