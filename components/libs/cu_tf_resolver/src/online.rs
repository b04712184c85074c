//! Latest value transform buffer for streaming extraction.
//!
//! Every edge keeps only its most recent observation. Lookups search the edges
//! seen so far in both directions and compose whatever each one holds now, so
//! two edges may contribute samples taken at different instants.

use crate::error::{TransformError, TransformResult};
use crate::lookup::TransformLookup;
use crate::time::RosTime;
use crate::transform::RigidTransform;
use log::debug;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// One edge of a path found by the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnlineStep {
    pub parent: String,
    pub child: String,
    /// Walked from child to parent, the recorded transform gets inverted.
    pub inverse: bool,
}

type CachedPath = Option<Vec<(EdgeIndex, bool)>>;

/// Frames as nodes, `parent -> child` edges weighted by their latest transform.
#[derive(Debug, Default)]
pub struct OnlineTransformBuffer {
    graph: DiGraph<String, RigidTransform>,
    frame_indices: HashMap<String, NodeIndex>,
    edges: HashMap<(NodeIndex, NodeIndex), EdgeIndex>,
    path_cache: HashMap<(String, String), CachedPath>,
}

impl OnlineTransformBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_frame(&mut self, frame: &str) -> NodeIndex {
        if let Some(idx) = self.frame_indices.get(frame) {
            return *idx;
        }
        let idx = self.graph.add_node(frame.to_string());
        self.frame_indices.insert(frame.to_string(), idx);
        idx
    }

    /// Upserts the latest transform of `parent -> child`.
    /// Cached paths are dropped only when the edge is new.
    pub fn observe(
        &mut self,
        parent: &str,
        child: &str,
        translation: [f64; 3],
        rotation: [f64; 4],
    ) {
        self.set_transform(parent, child, RigidTransform::new(translation, rotation));
    }

    pub fn set_transform(&mut self, parent: &str, child: &str, transform: RigidTransform) {
        let parent_idx = self.ensure_frame(parent);
        let child_idx = self.ensure_frame(child);
        match self.edges.get(&(parent_idx, child_idx)) {
            Some(edge) => self.graph[*edge] = transform,
            None => {
                let edge = self.graph.add_edge(parent_idx, child_idx, transform);
                self.edges.insert((parent_idx, child_idx), edge);
                if !self.path_cache.is_empty() {
                    debug!(
                        "New edge {} -> {}, dropping {} cached paths",
                        parent,
                        child,
                        self.path_cache.len()
                    );
                }
                self.path_cache.clear();
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn frame_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn cached_paths(&self) -> usize {
        self.path_cache.len()
    }

    pub fn latest(&self, parent: &str, child: &str) -> Option<&RigidTransform> {
        let parent_idx = self.frame_indices.get(parent)?;
        let child_idx = self.frame_indices.get(child)?;
        let edge = self.edges.get(&(*parent_idx, *child_idx))?;
        Some(&self.graph[*edge])
    }

    /// Breadth first search, so the path has the fewest edges.
    fn search(&self, source: NodeIndex, target: NodeIndex) -> CachedPath {
        let mut frontier = VecDeque::from([source]);
        let mut visited = HashSet::from([source]);
        let mut came_from: HashMap<NodeIndex, (NodeIndex, EdgeIndex, bool)> = HashMap::new();

        while let Some(current) = frontier.pop_front() {
            if current == target {
                break;
            }
            for edge in self.graph.edges_directed(current, Direction::Outgoing) {
                if visited.insert(edge.target()) {
                    came_from.insert(edge.target(), (current, edge.id(), false));
                    frontier.push_back(edge.target());
                }
            }
            for edge in self.graph.edges_directed(current, Direction::Incoming) {
                if visited.insert(edge.source()) {
                    came_from.insert(edge.source(), (current, edge.id(), true));
                    frontier.push_back(edge.source());
                }
            }
        }

        let mut steps = Vec::new();
        let mut node = target;
        while node != source {
            let (previous, edge, inverse) = came_from.get(&node)?;
            steps.push((*edge, *inverse));
            node = *previous;
        }
        steps.reverse();
        Some(steps)
    }

    fn cached_path(&mut self, target: &str, source: &str) -> TransformResult<Vec<(EdgeIndex, bool)>> {
        let unavailable = || TransformError::TransformUnavailable {
            from: source.to_string(),
            to: target.to_string(),
        };
        let key = (source.to_string(), target.to_string());
        if let Some(cached) = self.path_cache.get(&key) {
            return cached.clone().ok_or_else(unavailable);
        }

        let (Some(source_idx), Some(target_idx)) =
            (self.frame_indices.get(source), self.frame_indices.get(target))
        else {
            return Err(unavailable());
        };
        let path = self.search(*source_idx, *target_idx);
        self.path_cache.insert(key, path.clone());
        path.ok_or_else(unavailable)
    }

    /// Edges leading from `source` to `target`.
    pub fn find_path(&mut self, target: &str, source: &str) -> TransformResult<Vec<OnlineStep>> {
        let path = self.cached_path(target, source)?;
        Ok(path
            .into_iter()
            .filter_map(|(edge, inverse)| {
                let (parent, child) = self.graph.edge_endpoints(edge)?;
                Some(OnlineStep {
                    parent: self.graph[parent].clone(),
                    child: self.graph[child].clone(),
                    inverse,
                })
            })
            .collect())
    }

    /// Pose of `target` in `source` from the latest value of every edge on the way.
    pub fn lookup_latest(&mut self, target: &str, source: &str) -> TransformResult<RigidTransform> {
        if target == source {
            return Ok(RigidTransform::identity());
        }
        let path = self.cached_path(target, source)?;
        let mut result = RigidTransform::identity();
        for (edge, inverse) in path {
            let tf = &self.graph[edge];
            let step = if inverse { tf.inverse() } else { *tf };
            result = result * step;
        }
        Ok(result)
    }
}

impl TransformLookup for OnlineTransformBuffer {
    /// `time` is ignored, every edge answers with its latest value.
    fn lookup(
        &mut self,
        target: &str,
        source: &str,
        _time: Option<RosTime>,
    ) -> TransformResult<RigidTransform> {
        self.lookup_latest(target, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IDENTITY: [f64; 4] = RigidTransform::IDENTITY_ROTATION;

    #[test]
    fn test_identity_for_same_frame() {
        let mut buffer = OnlineTransformBuffer::new();
        let tf = buffer.lookup_latest("anything", "anything").unwrap();
        assert_eq!(tf, RigidTransform::identity());
        assert_eq!(buffer.cached_paths(), 0);
    }

    #[test]
    fn test_chain_lookup() {
        let mut buffer = OnlineTransformBuffer::new();
        buffer.observe("root", "a", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("a", "b", [0.0, 2.0, 0.0], IDENTITY);

        assert_eq!(buffer.find_path("b", "root").unwrap().len(), 2);
        let tf = buffer.lookup("b", "root", None).unwrap();
        assert_relative_eq!(tf.translation[0], 1.0);
        assert_relative_eq!(tf.translation[1], 2.0);
        assert_relative_eq!(tf.translation[2], 0.0);

        // Walking the chain upward inverts it.
        let tf = buffer.lookup_latest("root", "b").unwrap();
        assert_relative_eq!(tf.translation[0], -1.0);
        assert_relative_eq!(tf.translation[1], -2.0);
    }

    #[test]
    fn test_latest_value_wins() {
        let mut buffer = OnlineTransformBuffer::new();
        buffer.observe("root", "a", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("root", "a", [3.0, 0.0, 0.0], IDENTITY);
        assert_eq!(buffer.edge_count(), 1);
        let tf = buffer.lookup_latest("a", "root").unwrap();
        assert_relative_eq!(tf.translation[0], 3.0);
    }

    #[test]
    fn test_shortest_path_with_redundant_edges() {
        let mut buffer = OnlineTransformBuffer::new();
        buffer.observe("root", "a", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("a", "b", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("b", "c", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("root", "c", [5.0, 0.0, 0.0], IDENTITY);

        let path = buffer.find_path("c", "root").unwrap();
        assert_eq!(
            path,
            vec![OnlineStep {
                parent: "root".to_string(),
                child: "c".to_string(),
                inverse: false,
            }]
        );
        let tf = buffer.lookup_latest("c", "root").unwrap();
        assert_relative_eq!(tf.translation[0], 5.0);

        // b is two edges away either way round.
        assert_eq!(buffer.find_path("b", "root").unwrap().len(), 2);
    }

    #[test]
    fn test_unavailable_then_connected() {
        let mut buffer = OnlineTransformBuffer::new();
        assert!(matches!(
            buffer.lookup_latest("b", "root"),
            Err(TransformError::TransformUnavailable { .. })
        ));

        buffer.observe("root", "a", [1.0, 0.0, 0.0], IDENTITY);
        buffer.observe("c", "b", [0.0, 1.0, 0.0], IDENTITY);
        assert!(buffer.lookup_latest("b", "root").is_err());
        // The failed search is remembered.
        assert_eq!(buffer.cached_paths(), 1);

        // Updating a known edge keeps the cache.
        buffer.observe("root", "a", [2.0, 0.0, 0.0], IDENTITY);
        assert_eq!(buffer.cached_paths(), 1);
        assert!(buffer.lookup_latest("b", "root").is_err());

        // A new edge drops it and the search runs again.
        buffer.observe("a", "c", [0.0, 0.0, 1.0], IDENTITY);
        assert_eq!(buffer.cached_paths(), 0);
        let tf = buffer.lookup_latest("b", "root").unwrap();
        assert_relative_eq!(tf.translation[0], 2.0);
        assert_relative_eq!(tf.translation[1], 1.0);
        assert_relative_eq!(tf.translation[2], 1.0);
    }

    #[test]
    fn test_inverse_consistency() {
        let half = std::f64::consts::FRAC_PI_4;
        let mut buffer = OnlineTransformBuffer::new();
        buffer.observe("world", "base", [1.0, 2.0, 0.0], [0.0, 0.0, half.sin(), half.cos()]);
        buffer.observe("base", "camera", [0.3, 0.0, 0.5], IDENTITY);
        buffer.observe("world", "map", [-4.0, 0.0, 0.0], IDENTITY);

        let forward = buffer.lookup_latest("camera", "map").unwrap();
        let backward = buffer.lookup_latest("map", "camera").unwrap();
        assert!((forward * backward).abs_diff_eq(&RigidTransform::identity(), 1e-9));
    }
}
