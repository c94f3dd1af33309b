// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::geo::Rect;

/// QuadTree implements a fixed-depth [quadtree](https://en.wikipedia.org/wiki/Quadtree)
/// over rectangular elements, used to find streets close to a position without
/// scanning every loaded street.
///
/// The tree only materializes cells on first insertion. Every element is referenced
/// from every leaf its bounding rectangle touches, but a query reports it only from
/// a single leaf - the one owning the lower-left corner of the overlap between the element,
/// the query and the tree area. Cells are half-open (`[left, right)` × `[bottom, top)`),
/// except along the top and right edges of the tree area, so that owner is always unique.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    root: Cell,
    entries: Vec<Option<Entry<T>>>,
    len: usize,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    bounds: Rect,
    element: T,
}

#[derive(Debug, Clone)]
struct Cell {
    area: Rect,
    depth: u32,

    /// Children in order: left-bottom, left-top, right-bottom, right-top.
    children: [Option<Box<Cell>>; 4],

    /// Indices into [QuadTree::entries], only used by leaves (`depth == 0`).
    elements: Vec<usize>,
}

impl<T> QuadTree<T> {
    /// Creates an empty tree covering `area`, with leaves `depth` levels below the root.
    pub fn new(area: Rect, depth: u32) -> Self {
        assert!(area.is_valid(), "invalid quadtree area: {:?}", area);
        Self {
            root: Cell::new(area, depth),
            entries: Vec::default(),
            len: 0,
        }
    }

    /// Creates an empty tree covering `area`, deep enough for leaves to be
    /// roughly `leaf_extent` wide.
    pub fn with_leaf_extent(area: Rect, leaf_extent: f64) -> Self {
        assert!(leaf_extent > 0.0, "leaf extent must be positive");
        let depth = (area.width() / leaf_extent).log2().floor().max(0.0) as u32;
        Self::new(area, depth)
    }

    /// Returns the area covered by the tree.
    pub fn area(&self) -> Rect {
        self.root.area
    }

    /// Returns the depth of leaves below the root.
    pub fn depth(&self) -> u32 {
        self.root.depth
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over all elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().flatten().map(|e| &e.element)
    }

    /// Adds an element with the provided bounding rectangle.
    /// Returns false (and drops the element) if `bounds` doesn't touch the tree area.
    ///
    /// Panics if `bounds` is inverted or contains NaN.
    pub fn insert(&mut self, element: T, bounds: Rect) -> bool {
        assert!(bounds.is_valid(), "invalid element bounds: {:?}", bounds);
        if !bounds.touches(&self.root.area) {
            return false;
        }

        let index = self.entries.len();
        self.entries.push(Some(Entry { bounds, element }));
        self.len += 1;
        self.root.insert(index, &bounds);
        true
    }

    /// Returns all elements whose bounding rectangle touches `area`, each exactly once,
    /// in insertion order.
    ///
    /// Panics if `area` is inverted or contains NaN.
    pub fn query(&self, area: &Rect) -> Vec<&T> {
        assert!(area.is_valid(), "invalid query area: {:?}", area);
        if !area.touches(&self.root.area) {
            return vec![];
        }

        let mut found = Vec::default();
        self.root
            .query(area, &self.root.area, &self.entries, &mut found);
        found.sort_unstable();
        found
            .into_iter()
            .filter_map(|idx| self.entries[idx].as_ref().map(|e| &e.element))
            .collect()
    }

    /// Removes all elements not touching `keep`, returning them.
    /// Subtrees left empty are released.
    pub fn prune(&mut self, keep: &Rect) -> Vec<T> {
        assert!(keep.is_valid(), "invalid area to keep: {:?}", keep);
        let doomed = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| match e {
                Some(e) if !e.bounds.touches(keep) => Some(idx),
                _ => None,
            })
            .collect::<Vec<_>>();

        doomed.into_iter().filter_map(|idx| self.remove(idx)).collect()
    }

    /// Removes all elements, returning them in insertion order.
    pub fn clear(&mut self) -> Vec<T> {
        self.root = Cell::new(self.root.area, self.root.depth);
        self.len = 0;
        std::mem::take(&mut self.entries)
            .into_iter()
            .flatten()
            .map(|e| e.element)
            .collect()
    }

    fn remove(&mut self, idx: usize) -> Option<T> {
        let entry = self.entries.get_mut(idx)?.take()?;
        self.root.remove(idx, &entry.bounds);
        self.len -= 1;
        Some(entry.element)
    }
}

impl Cell {
    fn new(area: Rect, depth: u32) -> Self {
        Self {
            area,
            depth,
            children: [None, None, None, None],
            elements: Vec::default(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.depth == 0
    }

    fn is_empty(&self) -> bool {
        if self.is_leaf() {
            self.elements.is_empty()
        } else {
            self.children.iter().all(|c| c.is_none())
        }
    }

    /// Returns which children a rectangle spans, in the [Cell::children] order.
    fn spanned_children(&self, r: &Rect) -> [bool; 4] {
        let (cx, cy) = self.area.center();
        let left = r.left < cx;
        let right = r.right >= cx;
        let bottom = r.bottom < cy;
        let top = r.top >= cy;
        [left && bottom, left && top, right && bottom, right && top]
    }

    fn child_area(&self, child: usize) -> Rect {
        let (cx, cy) = self.area.center();
        let (left, right) = if child < 2 {
            (self.area.left, cx)
        } else {
            (cx, self.area.right)
        };
        let (bottom, top) = if child % 2 == 0 {
            (self.area.bottom, cy)
        } else {
            (cy, self.area.top)
        };
        Rect::new(left, right, bottom, top)
    }

    fn insert(&mut self, idx: usize, bounds: &Rect) {
        if self.is_leaf() {
            self.elements.push(idx);
            return;
        }

        let spanned = self.spanned_children(bounds);
        for child in 0..4 {
            if spanned[child] {
                let area = self.child_area(child);
                let depth = self.depth - 1;
                self.children[child]
                    .get_or_insert_with(|| Box::new(Cell::new(area, depth)))
                    .insert(idx, bounds);
            }
        }
    }

    fn query<T>(
        &self,
        area: &Rect,
        world: &Rect,
        entries: &[Option<Entry<T>>],
        found: &mut Vec<usize>,
    ) {
        if self.is_leaf() {
            for &idx in &self.elements {
                let Some(entry) = &entries[idx] else { continue };
                if !entry.bounds.touches(area) {
                    continue;
                }

                let x = entry.bounds.left.max(area.left).max(world.left);
                let y = entry.bounds.bottom.max(area.bottom).max(world.bottom);
                if self.owns(x, y, world) {
                    found.push(idx);
                }
            }
            return;
        }

        let spanned = self.spanned_children(area);
        for (child, cell) in self.children.iter().enumerate() {
            if let (true, Some(cell)) = (spanned[child], cell) {
                cell.query(area, world, entries, found);
            }
        }
    }

    fn owns(&self, x: f64, y: f64, world: &Rect) -> bool {
        let in_x = x >= self.area.left && (x < self.area.right || self.area.right >= world.right);
        let in_y = y >= self.area.bottom && (y < self.area.top || self.area.top >= world.top);
        in_x && in_y
    }

    fn remove(&mut self, idx: usize, bounds: &Rect) {
        if self.is_leaf() {
            self.elements.retain(|&i| i != idx);
            return;
        }

        let spanned = self.spanned_children(bounds);
        for child in 0..4 {
            if !spanned[child] {
                continue;
            }
            if let Some(cell) = &mut self.children[child] {
                cell.remove(idx, bounds);
                if cell.is_empty() {
                    self.children[child] = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Rect {
        Rect::new(-180.0, 180.0, -90.0, 90.0)
    }

    #[test]
    fn depth_from_leaf_extent() {
        let tree: QuadTree<i64> = QuadTree::with_leaf_extent(world(), 0.05);
        assert_eq!(tree.depth(), 12);
    }

    #[test]
    fn query_reports_each_element_once() {
        let mut tree = QuadTree::new(world(), 8);
        let mut expected = vec![];

        // A grid of disjoint rectangles, some straddling cell boundaries exactly
        for i in 0..10 {
            for j in 0..10 {
                let left = -10.0 + i as f64 * 2.0;
                let bottom = -10.0 + j as f64 * 2.0;
                let r = Rect::new(left, left + 1.5, bottom, bottom + 1.5);
                assert!(tree.insert((i, j), r));
                expected.push((i, j));
            }
        }

        let mut found = tree
            .query(&Rect::new(-10.0, 9.5, -10.0, 9.5))
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        found.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn query_large_element_spanning_many_cells() {
        let mut tree = QuadTree::new(world(), 6);
        tree.insert("big", Rect::new(-100.0, 100.0, -50.0, 50.0));
        tree.insert("small", Rect::new(0.0, 0.0, 0.0, 0.0));

        assert_eq!(tree.query(&world()), vec![&"big", &"small"]);
        assert_eq!(tree.query(&Rect::new(60.0, 70.0, 10.0, 20.0)), vec![&"big"]);
        assert_eq!(tree.query(&Rect::new(-1.0, 1.0, -1.0, 1.0)), vec![&"big", &"small"]);
    }

    #[test]
    fn query_touching_edges() {
        let mut tree = QuadTree::new(world(), 4);
        tree.insert(1, Rect::new(0.0, 10.0, 0.0, 10.0));

        assert_eq!(tree.query(&Rect::new(10.0, 20.0, 10.0, 20.0)), vec![&1]);
        assert_eq!(tree.query(&Rect::new(-5.0, 0.0, 5.0, 6.0)), vec![&1]);
        assert!(tree.query(&Rect::new(10.1, 20.0, 0.0, 5.0)).is_empty());
    }

    #[test]
    fn query_at_world_edge() {
        let mut tree = QuadTree::new(world(), 5);
        tree.insert(1, Rect::new(179.0, 180.0, 89.0, 90.0));
        assert_eq!(tree.query(&Rect::new(180.0, 180.0, 90.0, 90.0)), vec![&1]);
        assert_eq!(tree.query(&world()), vec![&1]);
    }

    #[test]
    fn insert_outside_area() {
        let mut tree = QuadTree::new(Rect::new(0.0, 1.0, 0.0, 1.0), 3);
        assert!(!tree.insert(1, Rect::new(2.0, 3.0, 2.0, 3.0)));
        assert!(tree.is_empty());
    }

    #[test]
    fn prune_removes_outside_elements() {
        let mut tree = QuadTree::new(world(), 6);
        tree.insert(1, Rect::new(0.0, 1.0, 0.0, 1.0));
        tree.insert(2, Rect::new(50.0, 51.0, 50.0, 51.0));
        tree.insert(3, Rect::new(0.5, 60.0, 0.5, 60.0));

        let removed = tree.prune(&Rect::new(-1.0, 2.0, -1.0, 2.0));
        assert_eq!(removed, vec![2]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.query(&world()), vec![&1, &3]);
        assert!(tree.query(&Rect::new(50.0, 51.0, 50.0, 51.0)).len() == 1);

        let removed = tree.prune(&Rect::new(100.0, 101.0, 0.0, 1.0));
        assert_eq!(removed, vec![1, 3]);
        assert!(tree.is_empty());
        assert!(tree.root.is_empty());
    }

    #[test]
    fn clear_returns_everything() {
        let mut tree = QuadTree::new(world(), 3);
        tree.insert('a', Rect::new(0.0, 1.0, 0.0, 1.0));
        tree.insert('b', Rect::new(-5.0, -4.0, 0.0, 1.0));
        assert_eq!(tree.clear(), vec!['a', 'b']);
        assert!(tree.query(&world()).is_empty());
    }

    #[test]
    #[should_panic]
    fn inverted_query_panics() {
        let tree: QuadTree<i64> = QuadTree::new(world(), 3);
        tree.query(&Rect::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    #[should_panic]
    fn nan_insert_panics() {
        let mut tree = QuadTree::new(world(), 3);
        tree.insert(1, Rect::new(f64::NAN, 0.0, 0.0, 1.0));
    }
}
