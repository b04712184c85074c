//! Path resolution through the lowest common ancestor.

use crate::error::{TransformError, TransformResult};
use crate::graph::FrameGraph;
use dashmap::DashMap;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// One edge of a resolved path.
///
/// An edge is named after its child frame. `reversed` is set when the path
/// walks the edge from parent down to child, against its recorded
/// child -> parent direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathStep {
    pub edge: String,
    pub parent: String,
    pub reversed: bool,
}

/// Ordered steps leading from `source` to `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePath {
    pub source: String,
    pub target: String,
    pub steps: Vec<PathStep>,
}

impl FramePath {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The same edges walked from `target` back to `source`.
    pub fn reversed(&self) -> FramePath {
        FramePath {
            source: self.target.clone(),
            target: self.source.clone(),
            steps: self
                .steps
                .iter()
                .rev()
                .map(|step| PathStep {
                    edge: step.edge.clone(),
                    parent: step.parent.clone(),
                    reversed: !step.reversed,
                })
                .collect(),
        }
    }

    /// `<target>_in_<source>`: what composing this path yields.
    pub fn forward_name(&self) -> String {
        format!("{}_in_{}", self.target, self.source)
    }

    /// `<source>_in_<target>`: the inverse of the composed path.
    pub fn reverse_name(&self) -> String {
        format!("{}_in_{}", self.source, self.target)
    }
}

/// Resolves frame pairs against a validated [`FrameGraph`], caching the result
/// per `(source, target)`.
pub struct PathResolver {
    graph: Arc<FrameGraph>,
    cache: DashMap<(String, String), FramePath>,
}

impl PathResolver {
    pub fn new(graph: Arc<FrameGraph>) -> Self {
        Self {
            graph,
            cache: DashMap::new(),
        }
    }

    pub fn graph(&self) -> &FrameGraph {
        &self.graph
    }

    /// Swaps in a graph carrying new edges and drops every cached path.
    pub fn replace_graph(&mut self, graph: Arc<FrameGraph>) {
        self.graph = graph;
        self.clear_cache();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve(&self, source: &str, target: &str) -> TransformResult<FramePath> {
        let key = (source.to_string(), target.to_string());
        if let Some(path) = self.cache.get(&key) {
            return Ok(path.clone());
        }

        let path = self.resolve_uncached(source, target)?;
        debug!(
            "Resolved {} -> {} through {} edges",
            source,
            target,
            path.len()
        );
        self.cache.insert(key, path.clone());
        Ok(path)
    }

    fn resolve_uncached(&self, source: &str, target: &str) -> TransformResult<FramePath> {
        if !self.graph.contains(source) || !self.graph.contains(target) {
            return Err(TransformError::NoPathFound {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        if source == target {
            return Err(TransformError::EmptyPath(source.to_string()));
        }

        let root = self.graph.root();
        let steps = if source == root {
            // Straight down from the root.
            let down = self.graph.path_to_root(target)?;
            Self::downward_steps(&down)
        } else if target == root {
            // Straight up to the root.
            let up = self.graph.path_to_root(source)?;
            Self::upward_steps(&up)
        } else {
            let up = self.graph.path_to_root(source)?;
            let down = self.graph.path_to_root(target)?;
            let target_side: HashSet<&str> = down.iter().map(String::as_str).collect();

            let ancestor = up
                .iter()
                .position(|frame| target_side.contains(frame.as_str()))
                .ok_or_else(|| TransformError::NoPathFound {
                    from: source.to_string(),
                    to: target.to_string(),
                })?;
            let ancestor_name = &up[ancestor];
            let ancestor_in_down = down
                .iter()
                .position(|frame| frame == ancestor_name)
                .ok_or_else(|| TransformError::NoPathFound {
                    from: source.to_string(),
                    to: target.to_string(),
                })?;

            // Either side is empty when one frame is the ancestor of the other.
            let mut steps = Self::upward_steps(&up[..=ancestor]);
            steps.extend(Self::downward_steps(&down[..=ancestor_in_down]));
            steps
        };

        Ok(FramePath {
            source: source.to_string(),
            target: target.to_string(),
            steps,
        })
    }

    /// `frames` runs from a frame up to one of its ancestors (inclusive).
    fn upward_steps(frames: &[String]) -> Vec<PathStep> {
        frames
            .windows(2)
            .map(|pair| PathStep {
                edge: pair[0].clone(),
                parent: pair[1].clone(),
                reversed: false,
            })
            .collect()
    }

    /// `frames` runs from a frame up to one of its ancestors (inclusive);
    /// the steps walk it the other way, from the ancestor down.
    fn downward_steps(frames: &[String]) -> Vec<PathStep> {
        frames
            .windows(2)
            .rev()
            .map(|pair| PathStep {
                edge: pair[0].clone(),
                parent: pair[1].clone(),
                reversed: true,
            })
            .collect()
    }
}
