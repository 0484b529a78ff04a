//! Median-split KD-tree index for euclidean search.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use uuid::Uuid;

use crate::error::Result;
use crate::index::{IndexKind, Neighbor, VectorIndex, check_query};
use crate::metric::{DistanceMetric, euclidean_sq};

/// Node in the tree; leaves are nodes with no children.
#[derive(Debug)]
struct KdNode {
    point: Vec<f32>,
    id: Uuid,
    axis: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

/// A candidate during tree descent, ordered so that "greater" means
/// "worse": larger distance first, then larger id. The max-heap root is
/// therefore the candidate to evict.
#[derive(Debug, Clone, Copy)]
struct KdCandidate {
    dist_sq: f32,
    id: Uuid,
}

impl PartialEq for KdCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KdCandidate {}

impl PartialOrd for KdCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KdCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Balanced KD-tree over the d axes, cycling the split axis by depth.
///
/// Supports the euclidean metric only; scores are negated distances so the
/// ordering contract matches the other indices. Worst-case query cost is
/// O(N) under adversarial distributions.
#[derive(Debug)]
pub struct KdTreeIndex {
    root: Option<Box<KdNode>>,
    dimension: usize,
    size: usize,
}

impl KdTreeIndex {
    /// Build a KD-tree over parallel `vectors` / `ids`.
    pub(crate) fn new(vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Self {
        let dimension = vectors.first().map_or(0, Vec::len);
        let size = vectors.len();
        let pairs: Vec<(Uuid, Vec<f32>)> = ids.into_iter().zip(vectors).collect();
        let root = if dimension == 0 {
            None
        } else {
            build_node(pairs, 0, dimension)
        };
        Self {
            root,
            dimension,
            size,
        }
    }
}

/// Recursively split on the lower median along the current axis. Equal
/// keys sort by id, so the earlier id lands in the left subtree and the
/// layout is deterministic.
fn build_node(mut items: Vec<(Uuid, Vec<f32>)>, depth: usize, dimension: usize) -> Option<Box<KdNode>> {
    if items.is_empty() {
        return None;
    }

    let axis = depth % dimension;
    items.sort_by(|a, b| a.1[axis].total_cmp(&b.1[axis]).then_with(|| a.0.cmp(&b.0)));

    let median = (items.len() - 1) / 2;
    let right_items = items.split_off(median + 1);
    let (id, point) = items.pop().expect("median element present");

    Some(Box::new(KdNode {
        point,
        id,
        axis,
        left: build_node(items, depth + 1, dimension),
        right: build_node(right_items, depth + 1, dimension),
    }))
}

fn search(node: &KdNode, query: &[f32], k: usize, heap: &mut BinaryHeap<KdCandidate>) {
    let candidate = KdCandidate {
        dist_sq: euclidean_sq(query, &node.point),
        id: node.id,
    };
    if heap.len() < k {
        heap.push(candidate);
    } else if let Some(worst) = heap.peek()
        && candidate < *worst
    {
        heap.pop();
        heap.push(candidate);
    }

    let diff = query[node.axis] - node.point[node.axis];
    let (first, second) = if diff < 0.0 {
        (&node.left, &node.right)
    } else {
        (&node.right, &node.left)
    };

    if let Some(child) = first {
        search(child, query, k, heap);
    }

    // The sibling half-space can only contribute if the splitting
    // hyperplane is closer than the current k-th best.
    let visit_sibling = match heap.peek() {
        Some(worst) if heap.len() == k => diff * diff < worst.dist_sq,
        _ => true,
    };
    if visit_sibling && let Some(child) = second {
        search(child, query, k, heap);
    }
}

impl VectorIndex for KdTreeIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::KdTree
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Euclidean
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn size(&self) -> usize {
        self.size
    }

    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if !check_query(self.dimension, self.size, self.metric(), query, k)? {
            return Ok(Vec::new());
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = &self.root {
            search(root, query, k, &mut heap);
        }

        let mut nearest = heap.into_vec();
        nearest.sort_unstable();
        Ok(nearest
            .into_iter()
            .map(|c| Neighbor {
                chunk_id: c.id,
                score: -c.dist_sq.sqrt(),
            })
            .collect())
    }
}
