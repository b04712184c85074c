pub mod composer;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod lookup;
pub mod observation;
pub mod online;
pub mod resolver;
pub mod series;
pub mod time;
pub mod transform;

#[cfg(test)]
mod test_utils;

pub use composer::{BatchComposer, ComposedPair, ComposedSeries};
pub use error::{TransformError, TransformResult};
pub use extraction::{
    output_dir_is_occupied, sanitize_frame, streaming_output_name, write_stats_csv,
    CsvResultWriter, ExtractionConfig, ResultWriter, StreamingExtractor,
};
pub use graph::FrameGraph;
pub use lookup::TransformLookup;
pub use observation::{read_observations, EdgeObservation};
pub use online::{OnlineStep, OnlineTransformBuffer};
pub use resolver::{FramePath, PathResolver, PathStep};
pub use series::{
    BatchOptions, EdgeSeriesStore, EdgeStats, EdgeTimeSeries, ReferenceTimeline,
    DEFAULT_STATIC_THRESHOLD,
};
pub use time::RosTime;
pub use transform::{RigidTransform, StampedTransform};
