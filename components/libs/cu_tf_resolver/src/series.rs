//! Per edge recorded time series and the batch reference timeline.

use crate::error::{TransformError, TransformResult};
use crate::observation::EdgeObservation;
use crate::time::RosTime;
use crate::transform::{RigidTransform, StampedTransform};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Edges with fewer samples than this are treated as constant.
pub const DEFAULT_STATIC_THRESHOLD: usize = 5;

fn default_static_threshold() -> usize {
    DEFAULT_STATIC_THRESHOLD
}

/// Knobs of a batch run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default = "default_static_threshold")]
    pub static_threshold: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            static_threshold: DEFAULT_STATIC_THRESHOLD,
        }
    }
}

/// Recorded transforms of a single edge, named after its child frame.
#[derive(Clone, Debug)]
pub enum EdgeTimeSeries {
    /// Constant for all time. Holds the first recorded sample.
    Static(StampedTransform),
    /// Sorted by stamp, never empty.
    Dynamic(Vec<StampedTransform>),
}

impl EdgeTimeSeries {
    /// Classifies `samples` by count. Samples are sorted by stamp first,
    /// keeping arrival order among equal stamps.
    pub fn from_samples(
        mut samples: Vec<StampedTransform>,
        static_threshold: usize,
    ) -> Option<Self> {
        samples.sort_by_key(|s| s.stamp);
        let first = *samples.first()?;
        if samples.len() < static_threshold {
            Some(EdgeTimeSeries::Static(first))
        } else {
            Some(EdgeTimeSeries::Dynamic(samples))
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, EdgeTimeSeries::Static(_))
    }

    pub fn len(&self) -> usize {
        match self {
            EdgeTimeSeries::Static(_) => 1,
            EdgeTimeSeries::Dynamic(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first_stamp(&self) -> RosTime {
        match self {
            EdgeTimeSeries::Static(sample) => sample.stamp,
            EdgeTimeSeries::Dynamic(samples) => samples[0].stamp,
        }
    }

    pub fn last_stamp(&self) -> RosTime {
        match self {
            EdgeTimeSeries::Static(sample) => sample.stamp,
            EdgeTimeSeries::Dynamic(samples) => samples[samples.len() - 1].stamp,
        }
    }

    pub fn stamps(&self) -> Vec<RosTime> {
        match self {
            EdgeTimeSeries::Static(sample) => vec![sample.stamp],
            EdgeTimeSeries::Dynamic(samples) => samples.iter().map(|s| s.stamp).collect(),
        }
    }

    /// Zero order hold: the latest sample stamped at or before `time`.
    /// Static edges answer for any time. `None` when `time` precedes the series.
    pub fn sample_at(&self, time: RosTime) -> Option<&StampedTransform> {
        match self {
            EdgeTimeSeries::Static(sample) => Some(sample),
            EdgeTimeSeries::Dynamic(samples) => {
                let pos = samples.partition_point(|s| s.stamp <= time);
                if pos == 0 {
                    None
                } else {
                    Some(&samples[pos - 1])
                }
            }
        }
    }

    /// Instantaneous rates in Hz between consecutive samples.
    /// Intervals of zero length are left out.
    pub fn instant_rates(&self) -> Vec<f64> {
        match self {
            EdgeTimeSeries::Static(_) => Vec::new(),
            EdgeTimeSeries::Dynamic(samples) => samples
                .windows(2)
                .map(|pair| (pair[1].stamp - pair[0].stamp).as_nanos())
                .filter(|dt| *dt > 0)
                .map(|dt| 1e9 / dt as f64)
                .collect(),
        }
    }

    /// Median of the instantaneous rates, `None` for static edges or when no
    /// two samples have distinct stamps.
    pub fn median_rate(&self) -> Option<f64> {
        let mut rates = self.instant_rates();
        if rates.is_empty() {
            return None;
        }
        rates.sort_by(f64::total_cmp);
        let mid = rates.len() / 2;
        Some(if rates.len() % 2 == 0 {
            (rates[mid - 1] + rates[mid]) / 2.0
        } else {
            rates[mid]
        })
    }
}

/// Publication statistics of one edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeStats {
    pub edge: String,
    pub parent: String,
    pub pub_count: usize,
    pub is_static: bool,
    pub median_rate_hz: Option<f64>,
    pub mean_rate_hz: Option<f64>,
    pub std_rate_hz: Option<f64>,
}

#[derive(Clone, Debug)]
struct RecordedEdge {
    parent: String,
    series: EdgeTimeSeries,
    pub_count: usize,
}

/// Every recorded edge of a log, keyed by child frame.
#[derive(Clone, Debug, Default)]
pub struct EdgeSeriesStore {
    edges: BTreeMap<String, RecordedEdge>,
}

impl EdgeSeriesStore {
    pub fn from_observations<'a, I>(observations: I, static_threshold: usize) -> Self
    where
        I: IntoIterator<Item = &'a EdgeObservation>,
    {
        let mut grouped: BTreeMap<String, (String, Vec<StampedTransform>)> = BTreeMap::new();
        for obs in observations {
            let (parent, samples) = grouped
                .entry(obs.child.clone())
                .or_insert_with(|| (obs.parent.clone(), Vec::new()));
            if *parent != obs.parent {
                warn!(
                    "Edge '{}' recorded under parent '{}' and '{}', keeping '{}'",
                    obs.child, parent, obs.parent, parent
                );
                continue;
            }
            samples.push(obs.stamped());
        }

        let edges = grouped
            .into_iter()
            .filter_map(|(child, (parent, samples))| {
                let pub_count = samples.len();
                EdgeTimeSeries::from_samples(samples, static_threshold).map(|series| {
                    (
                        child,
                        RecordedEdge {
                            parent,
                            series,
                            pub_count,
                        },
                    )
                })
            })
            .collect();
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_names(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn series(&self, edge: &str) -> TransformResult<&EdgeTimeSeries> {
        self.edges
            .get(edge)
            .map(|recorded| &recorded.series)
            .ok_or_else(|| TransformError::EdgeNotRecorded(edge.to_string()))
    }

    pub fn parent_of(&self, edge: &str) -> Option<&str> {
        self.edges.get(edge).map(|recorded| recorded.parent.as_str())
    }

    /// Zero order hold lookup on one edge.
    pub fn lookup(&self, edge: &str, time: RosTime) -> TransformResult<&RigidTransform> {
        self.series(edge)?
            .sample_at(time)
            .map(|sample| &sample.transform)
            .ok_or_else(|| TransformError::NoSampleAtOrBeforeTime {
                edge: edge.to_string(),
                time,
            })
    }

    pub fn dynamic_edges(&self) -> impl Iterator<Item = (&str, &EdgeTimeSeries)> {
        self.edges
            .iter()
            .filter(|(_, recorded)| !recorded.series.is_static())
            .map(|(name, recorded)| (name.as_str(), &recorded.series))
    }

    pub fn stats(&self) -> Vec<EdgeStats> {
        self.edges
            .iter()
            .map(|(name, recorded)| {
                let rates = recorded.series.instant_rates();
                let (mean, std) = if rates.is_empty() {
                    (None, None)
                } else {
                    let n = rates.len() as f64;
                    let mean = rates.iter().sum::<f64>() / n;
                    // Sample standard deviation, undefined for a single interval.
                    let std = (rates.len() > 1).then(|| {
                        (rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
                    });
                    (Some(mean), std)
                };
                EdgeStats {
                    edge: name.clone(),
                    parent: recorded.parent.clone(),
                    pub_count: recorded.pub_count,
                    is_static: recorded.series.is_static(),
                    median_rate_hz: recorded.series.median_rate(),
                    mean_rate_hz: mean,
                    std_rate_hz: std,
                }
            })
            .collect()
    }
}

/// The common sampling instants for a batch run.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTimeline {
    /// Highest median rate dynamic edge, `None` when every edge is static.
    pub reference_edge: Option<String>,
    pub reference_rate_hz: Option<f64>,
    /// Latest first stamp over all dynamic edges.
    pub window_start: RosTime,
    /// Earliest last stamp over all dynamic edges, excluded.
    pub window_end: RosTime,
    pub stamps: Vec<RosTime>,
}

impl ReferenceTimeline {
    /// Picks the fastest dynamic edge and keeps its stamps inside
    /// `[window_start, window_end)`.
    pub fn select(store: &EdgeSeriesStore) -> Self {
        let mut window_start = RosTime::MIN;
        let mut window_end = RosTime::MAX;
        let mut best: Option<(&str, f64, &EdgeTimeSeries)> = None;

        for (name, series) in store.dynamic_edges() {
            window_start = window_start.max(series.first_stamp());
            window_end = window_end.min(series.last_stamp());
            if let Some(rate) = series.median_rate() {
                if best.map_or(true, |(_, best_rate, _)| rate > best_rate) {
                    best = Some((name, rate, series));
                }
            }
        }

        let Some((name, rate, series)) = best else {
            info!("No dynamic edge recorded, the reference timeline is empty");
            return Self {
                reference_edge: None,
                reference_rate_hz: None,
                window_start,
                window_end,
                stamps: Vec::new(),
            };
        };

        let stamps: Vec<RosTime> = series
            .stamps()
            .into_iter()
            .filter(|t| *t >= window_start && *t < window_end)
            .collect();

        if stamps.is_empty() {
            warn!(
                "Dynamic edges share no common time window ({} .. {})",
                window_start.as_nanos(),
                window_end.as_nanos()
            );
        }
        info!(
            "Reference edge '{}' at {:.2} Hz, {} instants in the common window",
            name,
            rate,
            stamps.len()
        );

        Self {
            reference_edge: Some(name.to_string()),
            reference_rate_hz: Some(rate),
            window_start,
            window_end,
            stamps,
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
