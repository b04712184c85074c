//! Time aligned composition of recorded edges along a resolved path.

use crate::error::{TransformError, TransformResult};
use crate::graph::FrameGraph;
use crate::lookup::TransformLookup;
use crate::resolver::{FramePath, PathResolver, PathStep};
use crate::series::{EdgeSeriesStore, EdgeTimeSeries, ReferenceTimeline};
use crate::time::RosTime;
use crate::transform::{RigidTransform, StampedTransform};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named, time ordered sequence of composed transforms.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedSeries {
    pub name: String,
    pub samples: Vec<StampedTransform>,
}

impl ComposedSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Forward fills the series onto `timeline`.
    /// Instants before the first record are dropped.
    pub fn resample(&self, timeline: &[RosTime]) -> ComposedSeries {
        let samples = timeline
            .iter()
            .filter_map(|t| {
                let pos = self.samples.partition_point(|s| s.stamp <= *t);
                (pos > 0).then(|| StampedTransform::new(*t, self.samples[pos - 1].transform))
            })
            .collect();
        ComposedSeries {
            name: self.name.clone(),
            samples,
        }
    }
}

/// Both directions of one path, produced in a single pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedPair {
    /// `<target>_in_<source>`
    pub forward: ComposedSeries,
    /// `<source>_in_<target>`, exact matrix inverse of `forward`.
    pub reverse: ComposedSeries,
}

pub struct BatchComposer {
    store: EdgeSeriesStore,
    resolver: PathResolver,
    timeline: ReferenceTimeline,
}

impl BatchComposer {
    /// Selects the reference timeline once for the whole store.
    pub fn new(graph: Arc<FrameGraph>, store: EdgeSeriesStore) -> Self {
        let timeline = ReferenceTimeline::select(&store);
        Self {
            store,
            resolver: PathResolver::new(graph),
            timeline,
        }
    }

    pub fn timeline(&self) -> &ReferenceTimeline {
        &self.timeline
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn store(&self) -> &EdgeSeriesStore {
        &self.store
    }

    /// Recorded series of a step, checked against the parent the tree expects.
    fn recorded_series(&self, step: &PathStep) -> TransformResult<&EdgeTimeSeries> {
        let series = self.store.series(&step.edge)?;
        match self.store.parent_of(&step.edge) {
            Some(parent) if parent == step.parent => Ok(series),
            recorded => Err(TransformError::MalformedTree(format!(
                "edge '{}' is recorded under '{}' but the tree puts it under '{}'",
                step.edge,
                recorded.unwrap_or_default(),
                step.parent
            ))),
        }
    }

    /// Contribution of one step at `time`.
    ///
    /// Edges hold the child pose in the parent frame, so walking an edge down
    /// uses the sample as is and walking it up uses its inverse.
    fn step_transform(&self, step: &PathStep, time: RosTime) -> TransformResult<RigidTransform> {
        self.recorded_series(step)?;
        let sample = self.store.lookup(&step.edge, time)?;
        Ok(if step.reversed {
            *sample
        } else {
            sample.inverse()
        })
    }

    /// Composes `path` at a single instant, left to right in path order.
    pub fn compose_at(&self, path: &FramePath, time: RosTime) -> TransformResult<RigidTransform> {
        if path.is_empty() {
            return Err(TransformError::EmptyPath(path.source.clone()));
        }
        let mut result = RigidTransform::identity();
        for step in &path.steps {
            result = result * self.step_transform(step, time)?;
        }
        Ok(result)
    }

    /// Composes `path` at every instant of `timeline`.
    ///
    /// A path made only of static edges yields a single record stamped with
    /// the earliest of their stamps. Instants where an edge has no sample yet
    /// are skipped.
    pub fn compute(
        &self,
        path: &FramePath,
        timeline: &ReferenceTimeline,
    ) -> TransformResult<ComposedPair> {
        if path.is_empty() {
            return Err(TransformError::EmptyPath(path.source.clone()));
        }

        let mut all_static = true;
        let mut earliest = RosTime::MAX;
        for step in &path.steps {
            let series = self.recorded_series(step)?;
            all_static &= series.is_static();
            earliest = earliest.min(series.first_stamp());
        }

        let stamps: &[RosTime] = if all_static {
            std::slice::from_ref(&earliest)
        } else {
            &timeline.stamps
        };

        let mut forward = Vec::with_capacity(stamps.len());
        let mut reverse = Vec::with_capacity(stamps.len());
        for &stamp in stamps {
            match self.compose_at(path, stamp) {
                Ok(tf) => {
                    forward.push(StampedTransform::new(stamp, tf));
                    reverse.push(StampedTransform::new(stamp, tf.inverse()));
                }
                Err(e @ TransformError::NoSampleAtOrBeforeTime { .. }) => {
                    debug!("Skipping {} at {}: {}", path.forward_name(), stamp, e);
                }
                Err(e) => return Err(e),
            }
        }

        if forward.is_empty() {
            warn!("No composed record for {}", path.forward_name());
        }

        Ok(ComposedPair {
            forward: ComposedSeries {
                name: path.forward_name(),
                samples: forward,
            },
            reverse: ComposedSeries {
                name: path.reverse_name(),
                samples: reverse,
            },
        })
    }

    /// Resolves and composes `source -> target` on the selected timeline.
    pub fn compute_pair(&self, source: &str, target: &str) -> TransformResult<ComposedPair> {
        let path = self.resolver.resolve(source, target)?;
        self.compute(&path, &self.timeline)
    }

    /// Every non root frame composed in the root frame, keyed by frame.
    /// Frames failing with a recoverable error are left out.
    pub fn compute_all_from_root(&self) -> TransformResult<BTreeMap<String, ComposedPair>> {
        let graph = self.resolver.graph();
        let root = graph.root();
        let mut composed = BTreeMap::new();
        for frame in graph.frames().filter(|f| *f != root) {
            let result = self
                .resolver
                .resolve(root, frame)
                .and_then(|path| self.compute(&path, &self.timeline));
            match result {
                Ok(pair) => {
                    composed.insert(frame.to_string(), pair);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping frame '{}': {}", frame, e);
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Composed {} frames in root frame '{}'",
            composed.len(),
            root
        );
        Ok(composed)
    }
}

impl TransformLookup for BatchComposer {
    fn lookup(
        &mut self,
        target: &str,
        source: &str,
        time: Option<RosTime>,
    ) -> TransformResult<RigidTransform> {
        if target == source {
            return Ok(RigidTransform::identity());
        }
        let time = time.ok_or(TransformError::TimeRequired)?;
        let path = self.resolver.resolve(source, target)?;
        self.compose_at(&path, time)
    }
}
