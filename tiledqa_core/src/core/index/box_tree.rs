use smallvec::SmallVec;

use crate::MAX_ELEMENTS_PER_NODE;
use crate::core::geometry::envelope::Envelope;

const MAX_DEPTH: u16 = 30;

/// An indexed value together with its bounding envelope.
#[derive(Debug, Clone)]
pub struct TileEntry<T> {
    pub envelope: Envelope,
    pub value: T,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    dim: usize,
    mid: f64,
    /// Lower and upper child node indexes.
    children: [usize; 2],
}

#[derive(Debug)]
struct Node<T> {
    extent: Envelope,
    depth: u16,
    split: Option<Split>,
    entries: Vec<TileEntry<T>>,
}

impl<T> Node<T> {
    fn new(extent: Envelope, depth: u16) -> Self {
        Self {
            extent,
            depth,
            split: None,
            entries: Vec::new(),
        }
    }
}

/// Dynamic binary box tree.
///
/// Leaves are split at the midpoint of their longer side once they hold more
/// than `max_elements` entries. Entries that straddle a split line stay in the
/// inner node. The root grows when an entry falls outside of it, so the tree
/// never has to be rebuilt on insert.
#[derive(Debug)]
pub struct BoxTree<T> {
    nodes: Vec<Node<T>>,
    root: Option<usize>,
    max_elements: usize,
    len: usize,
}

impl<T> Default for BoxTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BoxTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            max_elements: MAX_ELEMENTS_PER_NODE,
            len: 0,
        }
    }

    /// Creates a tree whose root initially covers `extent`.
    pub fn with_extent(extent: Envelope) -> Self {
        let mut tree = Self::new();
        tree.init_size(extent);
        tree
    }

    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements.max(1);
        self
    }

    /// Pre-sizes an empty tree. Ignored once the tree holds a root.
    pub fn init_size(&mut self, extent: Envelope) {
        if self.root.is_none() {
            self.nodes.push(Node::new(extent, 0));
            self.root = Some(self.nodes.len() - 1);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extent of the root node.
    pub fn extent(&self) -> Option<Envelope> {
        self.root.map(|root| self.nodes[root].extent)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.len = 0;
    }

    pub fn insert(&mut self, envelope: Envelope, value: T) {
        let root = match self.root {
            Some(root) => self.enlarge_to(root, &envelope),
            None => {
                self.nodes.push(Node::new(envelope, 0));
                let root = self.nodes.len() - 1;
                self.root = Some(root);
                root
            }
        };

        let mut node = root;
        while let Some(split) = self.nodes[node].split {
            match child_for(&split, &envelope) {
                Some(child) => node = child,
                None => break,
            }
        }

        self.nodes[node].entries.push(TileEntry { envelope, value });
        self.len += 1;

        if self.nodes[node].split.is_none() && self.nodes[node].entries.len() > self.max_elements {
            self.split_leaf(node);
        }
    }

    /// Grows the root until it contains `envelope`; returns the new root.
    fn enlarge_to(&mut self, mut root: usize, envelope: &Envelope) -> usize {
        while !self.nodes[root].extent.contains(envelope) {
            let old = self.nodes[root].extent;

            let dim = if envelope.min_x < old.min_x || envelope.max_x > old.max_x {
                0
            } else {
                1
            };

            let span = old.max(dim) - old.min(dim);
            let mut extent = old;
            let (mid, children) = if envelope.min(dim) < old.min(dim) {
                let grow = span.max(old.min(dim) - envelope.min(dim));
                set_min(&mut extent, dim, old.min(dim) - grow);
                let mut lower = old;
                set_min(&mut lower, dim, old.min(dim) - grow);
                set_max(&mut lower, dim, old.min(dim));
                self.nodes.push(Node::new(lower, 1));
                (old.min(dim), [self.nodes.len() - 1, root])
            } else {
                let grow = span.max(envelope.max(dim) - old.max(dim));
                set_max(&mut extent, dim, old.max(dim) + grow);
                let mut upper = old;
                set_min(&mut upper, dim, old.max(dim));
                set_max(&mut upper, dim, old.max(dim) + grow);
                self.nodes.push(Node::new(upper, 1));
                (old.max(dim), [root, self.nodes.len() - 1])
            };

            let mut new_root = Node::new(extent, 0);
            new_root.split = Some(Split { dim, mid, children });
            self.nodes.push(new_root);
            root = self.nodes.len() - 1;
        }

        self.root = Some(root);
        root
    }

    fn split_leaf(&mut self, node: usize) {
        let extent = self.nodes[node].extent;
        let depth = self.nodes[node].depth;

        if depth >= MAX_DEPTH || (extent.width() <= 0.0 && extent.height() <= 0.0) {
            return;
        }

        let dim = if extent.width() >= extent.height() { 0 } else { 1 };
        let mid = (extent.min(dim) + extent.max(dim)) / 2.0;

        let mut lower = extent;
        set_max(&mut lower, dim, mid);
        let mut upper = extent;
        set_min(&mut upper, dim, mid);

        self.nodes.push(Node::new(lower, depth + 1));
        self.nodes.push(Node::new(upper, depth + 1));
        let children = [self.nodes.len() - 2, self.nodes.len() - 1];
        let split = Split { dim, mid, children };

        let entries = std::mem::take(&mut self.nodes[node].entries);
        let mut remaining = Vec::new();
        for entry in entries {
            match child_for(&split, &entry.envelope) {
                Some(child) => self.nodes[child].entries.push(entry),
                None => remaining.push(entry),
            }
        }

        self.nodes[node].entries = remaining;
        self.nodes[node].split = Some(split);

        for child in children {
            if self.nodes[child].entries.len() > self.max_elements {
                self.split_leaf(child);
            }
        }
    }

    /// Lazily yields every entry whose envelope intersects `envelope`.
    pub fn search<'a>(&'a self, envelope: &Envelope) -> BoxTreeSearch<'a, T> {
        let mut stack = SmallVec::new();
        if let Some(root) = self.root {
            if self.nodes[root].extent.intersects(envelope) {
                stack.push(root);
            }
        }

        BoxTreeSearch {
            tree: self,
            query: *envelope,
            stack,
            node: None,
            position: 0,
        }
    }

    /// All entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &TileEntry<T>> {
        self.nodes.iter().flat_map(|node| node.entries.iter())
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&TileEntry<T>) -> bool,
    {
        let mut len = 0;
        for node in self.nodes.iter_mut() {
            node.entries.retain(|entry| keep(entry));
            len += node.entries.len();
        }
        self.len = len;
    }
}

#[inline]
fn child_for(split: &Split, envelope: &Envelope) -> Option<usize> {
    if envelope.max(split.dim) <= split.mid {
        Some(split.children[0])
    } else if envelope.min(split.dim) >= split.mid {
        Some(split.children[1])
    } else {
        None
    }
}

#[inline]
fn set_min(envelope: &mut Envelope, dim: usize, value: f64) {
    if dim == 0 {
        envelope.min_x = value;
    } else {
        envelope.min_y = value;
    }
}

#[inline]
fn set_max(envelope: &mut Envelope, dim: usize, value: f64) {
    if dim == 0 {
        envelope.max_x = value;
    } else {
        envelope.max_y = value;
    }
}

pub struct BoxTreeSearch<'a, T> {
    tree: &'a BoxTree<T>,
    query: Envelope,
    stack: SmallVec<[usize; 32]>,
    node: Option<usize>,
    position: usize,
}

impl<'a, T> Iterator for BoxTreeSearch<'a, T> {
    type Item = &'a TileEntry<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.node {
                let entries = &self.tree.nodes[node].entries;
                while self.position < entries.len() {
                    let entry = &entries[self.position];
                    self.position += 1;
                    if entry.envelope.intersects(&self.query) {
                        return Some(entry);
                    }
                }
                self.node = None;
            }

            let node = self.stack.pop()?;
            if let Some(split) = self.tree.nodes[node].split {
                for child in split.children {
                    if self.tree.nodes[child].extent.intersects(&self.query) {
                        self.stack.push(child);
                    }
                }
            }

            self.node = Some(node);
            self.position = 0;
        }
    }
}
