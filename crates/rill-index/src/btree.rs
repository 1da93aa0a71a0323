//! Arena-allocated B-tree.
//!
//! Nodes live in a flat arena and point at each other through [`NodeId`]
//! indices, parent links included, so rebalancing never creates reference
//! cycles and the whole tree serializes as plain data.
//!
//! For order `m`, every node holds at most `2m - 1` keys and every non-root
//! node at least `m - 1`. Inserts split full nodes on the way down at the
//! median; deletes refill underfull nodes on the way down by borrowing from
//! the richer sibling, merging when both siblings are at minimum.

use std::ops::Bound;

use serde::{Deserialize, Serialize};

/// Index of a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeId(usize);

/// Comparison operators accepted by [`BTree::search_with_operator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    leaf: bool,
}

impl<K, V> Node<K, V> {
    fn empty_leaf(parent: Option<NodeId>) -> Self {
        Node {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            parent,
            leaf: true,
        }
    }
}

/// An ordered map with duplicate logical keys collapsed by the caller into
/// the value payload (the index layer stores row-id sets as values).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BTree<K, V> {
    order: usize,
    nodes: Vec<Node<K, V>>,
    free: Vec<NodeId>,
    root: NodeId,
    len: usize,
}

/// Default order for persistent indexes. Tests use small orders (3) to force
/// deep trees and exercise rebalancing.
pub const DEFAULT_ORDER: usize = 50;

impl<K: Ord + Clone, V> Default for BTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> BTree<K, V> {
    pub fn new() -> Self {
        Self::with_order(DEFAULT_ORDER)
    }

    /// Creates a tree of the given order. `order` must be at least 2.
    pub fn with_order(order: usize) -> Self {
        assert!(order >= 2, "B-tree order must be at least 2");
        BTree {
            order,
            nodes: vec![Node::empty_leaf(None)],
            free: Vec::new(),
            root: NodeId(0),
            len: 0,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Total number of entries.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels from root to leaf; 0 for an empty tree.
    pub fn height(&self) -> usize {
        if self.len == 0 {
            return 0;
        }
        let mut levels = 1;
        let mut id = self.root;
        while !self.node(id).leaf {
            id = self.node(id).children[0];
            levels += 1;
        }
        levels
    }

    fn max_keys(&self) -> usize {
        2 * self.order - 1
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            id
        } else {
            self.nodes.push(node);
            NodeId(self.nodes.len() - 1)
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = Node::empty_leaf(None);
        self.free.push(id);
    }

    // -- Lookup --------------------------------------------------------------

    pub fn search(&self, key: &K) -> Option<&V> {
        let mut id = self.root;
        loop {
            let node = self.node(id);
            match node.keys.binary_search(key) {
                Ok(pos) => return Some(&node.values[pos]),
                Err(pos) => {
                    if node.leaf {
                        return None;
                    }
                    id = node.children[pos];
                }
            }
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.search(key).is_some()
    }

    /// All entries with `lo <= key <= hi`, ascending.
    pub fn search_range(&self, lo: &K, hi: &K) -> Vec<(&K, &V)> {
        self.range(Bound::Included(lo), Bound::Included(hi))
    }

    /// All entries satisfying `key <op> bound`, always in ascending key
    /// order regardless of the operator's direction.
    pub fn search_with_operator(&self, bound: &K, op: RangeOp) -> Vec<(&K, &V)> {
        match op {
            RangeOp::Gt => self.range(Bound::Excluded(bound), Bound::Unbounded),
            RangeOp::Ge => self.range(Bound::Included(bound), Bound::Unbounded),
            RangeOp::Lt => self.range(Bound::Unbounded, Bound::Excluded(bound)),
            RangeOp::Le => self.range(Bound::Unbounded, Bound::Included(bound)),
        }
    }

    /// In-order traversal of the whole tree.
    pub fn entries(&self) -> Vec<(&K, &V)> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn range(&self, lo: Bound<&K>, hi: Bound<&K>) -> Vec<(&K, &V)> {
        let mut out = Vec::new();
        if self.len > 0 {
            self.walk_range(self.root, &lo, &hi, &mut out);
        }
        out
    }

    fn walk_range<'a>(
        &'a self,
        id: NodeId,
        lo: &Bound<&K>,
        hi: &Bound<&K>,
        out: &mut Vec<(&'a K, &'a V)>,
    ) {
        let node = self.node(id);
        let start = match lo {
            Bound::Unbounded => 0,
            Bound::Included(k) => node.keys.partition_point(|x| x < *k),
            Bound::Excluded(k) => node.keys.partition_point(|x| x <= *k),
        };
        if !node.leaf {
            self.walk_range(node.children[start], lo, hi, out);
        }
        for i in start..node.keys.len() {
            let key = &node.keys[i];
            let past_hi = match hi {
                Bound::Unbounded => false,
                Bound::Included(k) => key > *k,
                Bound::Excluded(k) => key >= *k,
            };
            if past_hi {
                return;
            }
            out.push((key, &node.values[i]));
            if !node.leaf {
                self.walk_range(node.children[i + 1], lo, hi, out);
            }
        }
    }

    pub fn get_min(&self) -> Option<(&K, &V)> {
        if self.len == 0 {
            return None;
        }
        let mut id = self.root;
        while !self.node(id).leaf {
            id = self.node(id).children[0];
        }
        let node = self.node(id);
        Some((&node.keys[0], &node.values[0]))
    }

    pub fn get_max(&self) -> Option<(&K, &V)> {
        if self.len == 0 {
            return None;
        }
        let mut id = self.root;
        while !self.node(id).leaf {
            id = *self.node(id).children.last().expect("internal node");
        }
        let node = self.node(id);
        Some((node.keys.last()?, node.values.last()?))
    }

    // -- Insert --------------------------------------------------------------

    /// Inserts `key -> value`, returning the previous value when the key was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if self.node(self.root).keys.len() == self.max_keys() {
            let old_root = self.root;
            let new_root = self.alloc(Node {
                keys: Vec::new(),
                values: Vec::new(),
                children: vec![old_root],
                parent: None,
                leaf: false,
            });
            self.node_mut(old_root).parent = Some(new_root);
            self.root = new_root;
            self.split_child(new_root, 0);
        }
        let replaced = self.insert_non_full(self.root, key, value);
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    fn insert_non_full(&mut self, mut id: NodeId, key: K, value: V) -> Option<V> {
        loop {
            let pos = match self.node(id).keys.binary_search(&key) {
                Ok(pos) => {
                    return Some(std::mem::replace(&mut self.node_mut(id).values[pos], value));
                }
                Err(pos) => pos,
            };
            if self.node(id).leaf {
                let node = self.node_mut(id);
                node.keys.insert(pos, key);
                node.values.insert(pos, value);
                return None;
            }
            let child = self.node(id).children[pos];
            if self.node(child).keys.len() == self.max_keys() {
                self.split_child(id, pos);
                // The median moved up into this node; search again.
                continue;
            }
            id = child;
        }
    }

    /// Splits the full child at `parent.children[i]`, moving its median key
    /// up into the parent.
    fn split_child(&mut self, parent: NodeId, i: usize) {
        let child_id = self.node(parent).children[i];
        let m = self.order;

        let (mid_key, mid_val, right) = {
            let child = self.node_mut(child_id);
            let right_keys = child.keys.split_off(m);
            let right_vals = child.values.split_off(m);
            let mid_key = child.keys.pop().expect("full node");
            let mid_val = child.values.pop().expect("full node");
            let right_children = if child.leaf {
                Vec::new()
            } else {
                child.children.split_off(m)
            };
            let right = Node {
                keys: right_keys,
                values: right_vals,
                children: right_children,
                parent: Some(parent),
                leaf: child.leaf,
            };
            (mid_key, mid_val, right)
        };

        let moved_children = right.children.clone();
        let right_id = self.alloc(right);
        for c in moved_children {
            self.node_mut(c).parent = Some(right_id);
        }

        let parent_node = self.node_mut(parent);
        parent_node.keys.insert(i, mid_key);
        parent_node.values.insert(i, mid_val);
        parent_node.children.insert(i + 1, right_id);
    }

    // -- Delete --------------------------------------------------------------

    /// Removes `key`, returning its value when present.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let removed = self.delete_from(self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        // An empty internal root collapses into its only child.
        if !self.node(self.root).leaf && self.node(self.root).keys.is_empty() {
            let old_root = self.root;
            self.root = self.node(old_root).children[0];
            self.node_mut(self.root).parent = None;
            self.release(old_root);
        }
        removed
    }

    fn delete_from(&mut self, id: NodeId, key: &K) -> Option<V> {
        let (found, pos) = match self.node(id).keys.binary_search(key) {
            Ok(pos) => (true, pos),
            Err(pos) => (false, pos),
        };

        if self.node(id).leaf {
            if !found {
                return None;
            }
            let node = self.node_mut(id);
            node.keys.remove(pos);
            return Some(node.values.remove(pos));
        }

        if found {
            let left = self.node(id).children[pos];
            let right = self.node(id).children[pos + 1];
            if self.node(left).keys.len() >= self.order {
                // Replace with the in-order predecessor.
                let pred_key = self.max_key_of(left).clone();
                let pred_val = self.delete_from(left, &pred_key).expect("predecessor exists");
                let node = self.node_mut(id);
                node.keys[pos] = pred_key;
                Some(std::mem::replace(&mut node.values[pos], pred_val))
            } else if self.node(right).keys.len() >= self.order {
                let succ_key = self.min_key_of(right).clone();
                let succ_val = self.delete_from(right, &succ_key).expect("successor exists");
                let node = self.node_mut(id);
                node.keys[pos] = succ_key;
                Some(std::mem::replace(&mut node.values[pos], succ_val))
            } else {
                // Both neighbors at minimum: merge around the key, recurse.
                self.merge_children(id, pos);
                self.delete_from(left, key)
            }
        } else {
            let mut child_pos = pos;
            let child = self.node(id).children[child_pos];
            if self.node(child).keys.len() < self.order {
                child_pos = self.refill_child(id, child_pos);
            }
            let child = self.node(id).children[child_pos];
            self.delete_from(child, key)
        }
    }

    fn max_key_of(&self, mut id: NodeId) -> &K {
        while !self.node(id).leaf {
            id = *self.node(id).children.last().expect("internal node");
        }
        self.node(id).keys.last().expect("nonempty leaf")
    }

    fn min_key_of(&self, mut id: NodeId) -> &K {
        while !self.node(id).leaf {
            id = self.node(id).children[0];
        }
        &self.node(id).keys[0]
    }

    /// Brings `parent.children[i]` up to at least `order` keys before a
    /// descent, borrowing from the richer sibling or merging. Returns the
    /// index of the child to descend into (shifts left after a left-merge).
    fn refill_child(&mut self, parent: NodeId, i: usize) -> usize {
        let child_count = self.node(parent).children.len();
        if i > 0 {
            let left = self.node(parent).children[i - 1];
            if self.node(left).keys.len() >= self.order {
                self.borrow_from_left(parent, i);
                return i;
            }
        }
        if i + 1 < child_count {
            let right = self.node(parent).children[i + 1];
            if self.node(right).keys.len() >= self.order {
                self.borrow_from_right(parent, i);
                return i;
            }
        }
        if i > 0 {
            self.merge_children(parent, i - 1);
            i - 1
        } else {
            self.merge_children(parent, i);
            i
        }
    }

    fn borrow_from_left(&mut self, parent: NodeId, i: usize) {
        let left = self.node(parent).children[i - 1];
        let child = self.node(parent).children[i];

        let (lk, lv, lc) = {
            let ln = self.node_mut(left);
            let moved_child = if ln.leaf {
                None
            } else {
                Some(ln.children.pop().expect("internal node"))
            };
            (
                ln.keys.pop().expect("rich sibling"),
                ln.values.pop().expect("rich sibling"),
                moved_child,
            )
        };
        let (pk, pv) = {
            let pn = self.node_mut(parent);
            (
                std::mem::replace(&mut pn.keys[i - 1], lk),
                std::mem::replace(&mut pn.values[i - 1], lv),
            )
        };
        {
            let cn = self.node_mut(child);
            cn.keys.insert(0, pk);
            cn.values.insert(0, pv);
            if let Some(c) = lc {
                cn.children.insert(0, c);
            }
        }
        if let Some(c) = lc {
            self.node_mut(c).parent = Some(child);
        }
    }

    fn borrow_from_right(&mut self, parent: NodeId, i: usize) {
        let child = self.node(parent).children[i];
        let right = self.node(parent).children[i + 1];

        let (rk, rv, rc) = {
            let rn = self.node_mut(right);
            let moved_child = if rn.leaf {
                None
            } else {
                Some(rn.children.remove(0))
            };
            (rn.keys.remove(0), rn.values.remove(0), moved_child)
        };
        let (pk, pv) = {
            let pn = self.node_mut(parent);
            (
                std::mem::replace(&mut pn.keys[i], rk),
                std::mem::replace(&mut pn.values[i], rv),
            )
        };
        {
            let cn = self.node_mut(child);
            cn.keys.push(pk);
            cn.values.push(pv);
            if let Some(c) = rc {
                cn.children.push(c);
            }
        }
        if let Some(c) = rc {
            self.node_mut(c).parent = Some(child);
        }
    }

    /// Merges `children[i]`, the separator at `keys[i]`, and `children[i+1]`
    /// into a single node at `children[i]`.
    fn merge_children(&mut self, parent: NodeId, i: usize) {
        let left = self.node(parent).children[i];
        let right = self.node(parent).children[i + 1];

        let (sep_key, sep_val) = {
            let pn = self.node_mut(parent);
            pn.children.remove(i + 1);
            (pn.keys.remove(i), pn.values.remove(i))
        };
        let (rkeys, rvals, rchildren) = {
            let rn = self.node_mut(right);
            (
                std::mem::take(&mut rn.keys),
                std::mem::take(&mut rn.values),
                std::mem::take(&mut rn.children),
            )
        };
        {
            let ln = self.node_mut(left);
            ln.keys.push(sep_key);
            ln.values.push(sep_val);
            ln.keys.extend(rkeys);
            ln.values.extend(rvals);
            ln.children.extend(rchildren.iter().copied());
        }
        for c in rchildren {
            self.node_mut(c).parent = Some(left);
        }
        self.release(right);
    }

    // -- Structural checks ---------------------------------------------------

    /// Verifies the B-tree invariants: sorted keys, occupancy bounds, equal
    /// leaf depth, separator ordering between a node and its children, and
    /// consistent parent links. Intended for tests and debugging.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.len == 0 {
            return Ok(());
        }
        let mut leaf_depth = None;
        self.check_node(self.root, None, None, None, 1, &mut leaf_depth)
    }

    fn check_node(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<(), String> {
        let node = self.node(id);
        if node.parent != parent {
            return Err(format!("node {:?} has wrong parent link", id));
        }
        let is_root = parent.is_none();
        if !is_root && node.keys.len() < self.order - 1 {
            return Err(format!(
                "node {:?} underfull: {} keys, minimum {}",
                id,
                node.keys.len(),
                self.order - 1
            ));
        }
        if node.keys.len() > self.max_keys() {
            return Err(format!("node {:?} overfull: {} keys", id, node.keys.len()));
        }
        for pair in node.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(format!("node {:?} keys out of order", id));
            }
        }
        if let Some(lo) = lower {
            if node.keys.first().is_some_and(|k| k <= lo) {
                return Err(format!("node {:?} violates lower separator", id));
            }
        }
        if let Some(hi) = upper {
            if node.keys.last().is_some_and(|k| k >= hi) {
                return Err(format!("node {:?} violates upper separator", id));
            }
        }
        if node.leaf {
            if !node.children.is_empty() {
                return Err(format!("leaf {:?} has children", id));
            }
            match leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if *expected != depth => {
                    return Err(format!(
                        "leaf {:?} at depth {} but expected {}",
                        id, depth, expected
                    ));
                }
                _ => {}
            }
            return Ok(());
        }
        if node.children.len() != node.keys.len() + 1 {
            return Err(format!(
                "internal node {:?} has {} keys but {} children",
                id,
                node.keys.len(),
                node.children.len()
            ));
        }
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == node.keys.len() {
                upper
            } else {
                Some(&node.keys[i])
            };
            self.check_node(child, Some(id), lo, hi, depth + 1, leaf_depth)?;
        }
        Ok(())
    }
}
