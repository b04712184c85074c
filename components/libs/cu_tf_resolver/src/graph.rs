//! The frame hierarchy.
//!
//! Edges point from child to parent, following the recording convention where
//! the child pose is expressed in its parent frame. A valid graph is a single
//! tree: one root, one parent per other frame, no cycle.

use crate::error::{TransformError, TransformResult};
use crate::observation::EdgeObservation;
use log::info;
use petgraph::algo::{connected_components, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use ron::extensions::Extensions;
use ron::Options;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::read_to_string;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FrameGraph {
    graph: DiGraph<String, ()>,
    frame_indices: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl FrameGraph {
    /// Builds the tree from a `child -> parent` map.
    /// A child mapped to the empty string declares the root explicitly.
    pub fn from_parent_map<'a, I>(entries: I) -> TransformResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut parents_of: BTreeMap<&str, &str> = BTreeMap::new();
        let mut declared_roots: BTreeSet<&str> = BTreeSet::new();
        for (child, parent) in entries {
            if parent.is_empty() {
                declared_roots.insert(child.as_str());
            } else {
                parents_of.insert(child.as_str(), parent.as_str());
            }
        }

        let children: BTreeSet<&str> = parents_of.keys().copied().collect();
        let parents: BTreeSet<&str> = parents_of.values().copied().collect();

        let mut roots: BTreeSet<&str> = parents.difference(&children).copied().collect();
        roots.extend(declared_roots.iter().copied());
        if roots.len() != 1 {
            return Err(TransformError::MalformedTree(format!(
                "expected exactly one root frame, found {}: {:?}",
                roots.len(),
                roots
            )));
        }

        let mut graph = DiGraph::new();
        let mut frame_indices = HashMap::new();
        let mut ensure = |graph: &mut DiGraph<String, ()>, frame: &str| -> NodeIndex {
            *frame_indices
                .entry(frame.to_string())
                .or_insert_with(|| graph.add_node(frame.to_string()))
        };

        let root_name = roots.iter().next().copied().unwrap_or_default();
        let root = ensure(&mut graph, root_name);
        for (child, parent) in &parents_of {
            let child_idx = ensure(&mut graph, child);
            let parent_idx = ensure(&mut graph, parent);
            graph.add_edge(child_idx, parent_idx, ());
        }

        if is_cyclic_directed(&graph) {
            return Err(TransformError::MalformedTree(
                "cycle detected in frame tree".to_string(),
            ));
        }
        if connected_components(&graph) != 1 {
            return Err(TransformError::MalformedTree(
                "frame tree has disconnected components".to_string(),
            ));
        }

        info!(
            "Frame tree built: {} frames rooted at '{}'",
            graph.node_count(),
            root_name
        );

        Ok(Self {
            graph,
            frame_indices,
            root,
        })
    }

    /// Infers the tree from recorded edges.
    pub fn from_observations<'a, I>(observations: I) -> TransformResult<Self>
    where
        I: IntoIterator<Item = &'a EdgeObservation>,
    {
        let mut parent_map: BTreeMap<String, String> = BTreeMap::new();
        for obs in observations {
            match parent_map.get(&obs.child) {
                Some(parent) if parent != &obs.parent => {
                    return Err(TransformError::MalformedTree(format!(
                        "frame '{}' observed under two parents '{}' and '{}'",
                        obs.child, parent, obs.parent
                    )));
                }
                Some(_) => {}
                None => {
                    parent_map.insert(obs.child.clone(), obs.parent.clone());
                }
            }
        }
        Self::from_parent_map(&parent_map)
    }

    /// Parses a RON `child -> parent` map, e.g. `{"base": "world", "world": ""}`.
    pub fn from_ron_str(ron: &str) -> TransformResult<Self> {
        let map: BTreeMap<String, String> = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
            .from_str(ron)
            .map_err(|e| TransformError::MalformedTree(format!("unreadable tree: {e}")))?;
        Self::from_parent_map(&map)
    }

    pub fn read_tree_file(path: &Path) -> TransformResult<Self> {
        let content = read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    pub fn root(&self) -> &str {
        &self.graph[self.root]
    }

    pub fn contains(&self, frame: &str) -> bool {
        self.frame_indices.contains_key(frame)
    }

    pub fn frame_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn frames(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    pub fn parent(&self, frame: &str) -> Option<&str> {
        let idx = self.frame_indices.get(frame)?;
        self.parent_index(*idx).map(|p| self.graph[p].as_str())
    }

    fn parent_index(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Outgoing).next()
    }

    /// Frames from `frame` up to the root, both included.
    pub fn path_to_root(&self, frame: &str) -> TransformResult<Vec<String>> {
        let mut current = *self
            .frame_indices
            .get(frame)
            .ok_or_else(|| TransformError::NoPathFound {
                from: frame.to_string(),
                to: self.root().to_string(),
            })?;

        let mut path = vec![self.graph[current].clone()];
        while let Some(parent) = self.parent_index(current) {
            path.push(self.graph[parent].clone());
            current = parent;
        }
        Ok(path)
    }

    /// Every leaf to root path. Walks the tree with an explicit stack.
    pub fn all_leaf_to_root_paths(&self) -> BTreeSet<Vec<String>> {
        let mut paths = BTreeSet::new();
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(self.root, vec![self.root])];

        while let Some((node, root_to_node)) = stack.pop() {
            let mut children = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .peekable();
            if children.peek().is_none() {
                paths.insert(
                    root_to_node
                        .iter()
                        .rev()
                        .map(|idx| self.graph[*idx].clone())
                        .collect(),
                );
                continue;
            }
            for child in children {
                let mut extended = root_to_node.clone();
                extended.push(child);
                stack.push((child, extended));
            }
        }
        paths
    }

    /// Renders the tree in the Graphviz dot format, edges drawn parent to child.
    pub fn render(&self, output: &mut dyn Write) -> std::io::Result<()> {
        writeln!(output, "digraph frames {{")?;
        let mut names: Vec<&str> = self.frames().collect();
        names.sort_unstable();
        for name in &names {
            writeln!(output, "    \"{name}\";")?;
        }
        for name in &names {
            if let Some(parent) = self.parent(name) {
                writeln!(output, "    \"{parent}\" -> \"{name}\";")?;
            }
        }
        writeln!(output, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{observation, parent_map};

    #[test]
    fn test_build_and_query() {
        let graph =
            FrameGraph::from_parent_map(&parent_map(&[("base", "world"), ("camera", "base")]))
                .unwrap();
        assert_eq!(graph.root(), "world");
        assert_eq!(graph.frame_count(), 3);
        assert_eq!(graph.parent("camera"), Some("base"));
        assert_eq!(graph.parent("world"), None);
        assert_eq!(
            graph.path_to_root("camera").unwrap(),
            vec!["camera", "base", "world"]
        );
        assert_eq!(graph.path_to_root("world").unwrap(), vec!["world"]);
    }

    #[test]
    fn test_unknown_frame() {
        let graph = FrameGraph::from_parent_map(&parent_map(&[("base", "world")])).unwrap();
        assert!(matches!(
            graph.path_to_root("nowhere"),
            Err(TransformError::NoPathFound { .. })
        ));
    }

    #[test]
    fn test_two_roots_is_malformed() {
        let result = FrameGraph::from_parent_map(&parent_map(&[("a", "world"), ("b", "map")]));
        assert!(matches!(result, Err(TransformError::MalformedTree(_))));
    }

    #[test]
    fn test_cycle_is_malformed() {
        let result = FrameGraph::from_parent_map(&parent_map(&[
            ("a", "world"),
            ("b", "c"),
            ("c", "b"),
        ]));
        assert!(matches!(result, Err(TransformError::MalformedTree(_))));

        let self_loop = FrameGraph::from_parent_map(&parent_map(&[("a", "world"), ("b", "b")]));
        assert!(matches!(self_loop, Err(TransformError::MalformedTree(_))));
    }

    #[test]
    fn test_declared_root() {
        let graph = FrameGraph::from_parent_map(&parent_map(&[("world", "")])).unwrap();
        assert_eq!(graph.root(), "world");
        assert_eq!(graph.frame_count(), 1);

        let extra_root = FrameGraph::from_parent_map(&parent_map(&[("odom", ""), ("base", "world")]));
        assert!(matches!(extra_root, Err(TransformError::MalformedTree(_))));
    }

    #[test]
    fn test_leaf_to_root_paths() {
        let graph = FrameGraph::from_parent_map(&parent_map(&[
            ("base", "world"),
            ("camera", "base"),
            ("lidar", "base"),
            ("map", "world"),
        ]))
        .unwrap();
        let paths = graph.all_leaf_to_root_paths();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&vec![
            "camera".to_string(),
            "base".to_string(),
            "world".to_string()
        ]));
        assert!(paths.contains(&vec!["map".to_string(), "world".to_string()]));
    }

    #[test]
    fn test_from_observations() {
        let observations = vec![
            observation(0, "world", "base", [0.0; 3]),
            observation(1, "world", "base", [1.0, 0.0, 0.0]),
            observation(1, "base", "camera", [0.0; 3]),
        ];
        let graph = FrameGraph::from_observations(&observations).unwrap();
        assert_eq!(graph.root(), "world");

        let conflicting = vec![
            observation(0, "world", "base", [0.0; 3]),
            observation(0, "map", "base", [0.0; 3]),
        ];
        assert!(matches!(
            FrameGraph::from_observations(&conflicting),
            Err(TransformError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_ron_tree_and_render() {
        let graph = FrameGraph::from_ron_str(r#"{"base": "world", "camera": "base"}"#).unwrap();
        let mut out = Vec::new();
        graph.render(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.starts_with("digraph frames {"));
        assert!(dot.contains("\"world\" -> \"base\";"));
        assert!(dot.contains("\"base\" -> \"camera\";"));

        assert!(matches!(
            FrameGraph::from_ron_str("not a map"),
            Err(TransformError::MalformedTree(_))
        ));
    }
}
