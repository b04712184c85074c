use crate::observation::EdgeObservation;
use crate::transform::RigidTransform;
use std::collections::BTreeMap;

pub fn parent_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(child, parent)| (child.to_string(), parent.to_string()))
        .collect()
}

pub fn observation(stamp: i64, parent: &str, child: &str, translation: [f64; 3]) -> EdgeObservation {
    EdgeObservation::new(
        stamp,
        parent,
        child,
        translation,
        RigidTransform::IDENTITY_ROTATION,
    )
}

/// `count` samples every `period_ns` starting at `start_ns`, translated along x
/// by the sample index.
pub fn periodic_observations(
    parent: &str,
    child: &str,
    start_ns: i64,
    period_ns: i64,
    count: usize,
) -> Vec<EdgeObservation> {
    (0..count)
        .map(|i| {
            observation(
                start_ns + period_ns * i as i64,
                parent,
                child,
                [i as f64, 0.0, 0.0],
            )
        })
        .collect()
}
