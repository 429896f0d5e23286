//! Point quadtree used as the per-level neighbor index
//!
//! Every level of the [`SpatialIndex`](crate::SpatialIndex) keeps one of these over the
//! unit-space positions of its features. It serves two lookups: radius queries while
//! clustering the next coarser level, and rectangle queries for viewports.

use geo::{Coord, Intersects, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion on co-located points
const MAX_DEPTH: u32 = 24;

/// Number of entries a leaf holds before it is subdivided
const NODE_CAPACITY: usize = 16;

/// A position in unit space tagged with the index of the feature it belongs to
#[derive(Debug, Clone, Copy)]
struct Entry {
    position: Coord<f64>,
    index: u32,
}

/// Root container for the point quadtree
#[derive(Debug, Clone)]
pub(crate) struct PointQuadtree {
    /// Root node covering the whole unit square
    root: QuadtreeNode,
    /// Number of stored entries
    len: usize,
}

/// A single node in the point quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounding box in unit space
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entries stored at this node (only leaves hold entries)
    entries: Vec<Entry>,
    /// Child nodes (top-left, top-right, bottom-left, bottom-right) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl PointQuadtree {
    /// Create a new empty quadtree over the unit square
    pub fn new() -> Self {
        Self {
            root: QuadtreeNode::new(
                Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }),
                0,
            ),
            len: 0,
        }
    }

    /// Build a quadtree from `(position, index)` pairs
    pub fn from_positions(positions: impl IntoIterator<Item = (Coord<f64>, u32)>) -> Self {
        let mut tree = Self::new();
        for (position, index) in positions {
            tree.insert(position, index);
        }
        tree
    }

    /// Insert a position; positions outside the unit square are clamped onto it
    pub fn insert(&mut self, position: Coord<f64>, index: u32) {
        let position = Coord {
            x: position.x.clamp(0.0, 1.0),
            y: position.y.clamp(0.0, 1.0),
        };
        self.root.insert(Entry { position, index });
        self.len += 1;
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Collect the indices of all entries inside `rect` (boundary inclusive)
    pub fn query_rect(&self, rect: Rect<f64>, results: &mut Vec<u32>) {
        self.root.query_rect(rect, results);
    }

    /// Collect the indices of all entries within `radius` of `center`
    pub fn query_radius(&self, center: Coord<f64>, radius: f64, results: &mut Vec<u32>) {
        let rect = Rect::new(
            Coord {
                x: center.x - radius,
                y: center.y - radius,
            },
            Coord {
                x: center.x + radius,
                y: center.y + radius,
            },
        );
        let radius_sq = radius * radius;
        self.root.query_radius(rect, center, radius_sq, results);
    }
}

impl QuadtreeNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    /// Subdivide this node into 4 children and push its entries down
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid = self.bounding_box.center();
        let child_level = self.level + 1;

        let top_left = QuadtreeNode::new(Rect::new(min, mid), child_level);
        let top_right = QuadtreeNode::new(
            Rect::new(Coord { x: mid.x, y: min.y }, Coord { x: max.x, y: mid.y }),
            child_level,
        );
        let bottom_left = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid.y }, Coord { x: mid.x, y: max.y }),
            child_level,
        );
        let bottom_right = QuadtreeNode::new(Rect::new(mid, max), child_level);

        let mut children = Box::new([top_left, top_right, bottom_left, bottom_right]);
        for entry in self.entries.drain(..) {
            children[Self::child_slot(mid, entry.position)].insert(entry);
        }
        self.children = Some(children);
    }

    /// Which child quadrant a position falls into, given the node midpoint
    #[inline]
    fn child_slot(mid: Coord<f64>, position: Coord<f64>) -> usize {
        let is_right = position.x >= mid.x;
        let is_bottom = position.y >= mid.y;
        match (is_right, is_bottom) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }

    fn insert(&mut self, entry: Entry) {
        if let Some(children) = &mut self.children {
            let mid = self.bounding_box.center();
            children[Self::child_slot(mid, entry.position)].insert(entry);
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > NODE_CAPACITY && self.level < MAX_DEPTH {
            self.subdivide();
        }
    }

    fn query_rect(&self, rect: Rect<f64>, results: &mut Vec<u32>) {
        if !self.bounding_box.intersects(&rect) {
            return;
        }

        for entry in &self.entries {
            if rect.intersects(&entry.position) {
                results.push(entry.index);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_rect(rect, results);
            }
        }
    }

    fn query_radius(
        &self,
        rect: Rect<f64>,
        center: Coord<f64>,
        radius_sq: f64,
        results: &mut Vec<u32>,
    ) {
        if !self.bounding_box.intersects(&rect) {
            return;
        }

        for entry in &self.entries {
            let dx = entry.position.x - center.x;
            let dy = entry.position.y - center.y;
            if dx * dx + dy * dy <= radius_sq {
                results.push(entry.index);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_radius(rect, center, radius_sq, results);
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(|c| c.depth()).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}
