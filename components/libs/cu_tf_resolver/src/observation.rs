//! Decoded edge observations as handed over by the log decoding side.

use crate::error::{TransformError, TransformResult};
use crate::time::RosTime;
use crate::transform::{RigidTransform, StampedTransform};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One recorded `parent -> child` transform sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeObservation {
    pub stamp: RosTime,
    pub parent: String,
    pub child: String,
    pub transform: RigidTransform,
}

impl EdgeObservation {
    pub fn new(
        stamp: impl Into<RosTime>,
        parent: &str,
        child: &str,
        translation: [f64; 3],
        rotation: [f64; 4],
    ) -> Self {
        Self {
            stamp: stamp.into(),
            parent: parent.to_string(),
            child: child.to_string(),
            transform: RigidTransform::new(translation, rotation),
        }
    }

    pub fn stamped(&self) -> StampedTransform {
        StampedTransform::new(self.stamp, self.transform)
    }

    /// Parses `timestamp_ns,parent,child,x,y,z,qx,qy,qz,qw`.
    pub fn parse_line(line: &str) -> TransformResult<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 10 {
            return Err(TransformError::InvalidObservation(format!(
                "expected 10 fields, got {}",
                fields.len()
            )));
        }

        let stamp = fields[0].parse::<i64>().map_err(|e| {
            TransformError::InvalidObservation(format!("bad timestamp '{}': {e}", fields[0]))
        })?;
        if fields[1].is_empty() || fields[2].is_empty() {
            return Err(TransformError::InvalidObservation(
                "empty frame name".to_string(),
            ));
        }

        let mut values = [0.0f64; 7];
        for (value, field) in values.iter_mut().zip(&fields[3..]) {
            *value = field.parse::<f64>().map_err(|e| {
                TransformError::InvalidObservation(format!("bad number '{field}': {e}"))
            })?;
        }

        Ok(Self::new(
            stamp,
            fields[1],
            fields[2],
            [values[0], values[1], values[2]],
            [values[3], values[4], values[5], values[6]],
        ))
    }
}

/// Reads observations in their tabular text form.
/// Blank lines, `#` comments and a `timestamp...` header line are skipped.
pub fn read_observations(reader: impl BufRead) -> TransformResult<Vec<EdgeObservation>> {
    let mut observations = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("timestamp") {
            continue;
        }
        let observation = EdgeObservation::parse_line(trimmed).map_err(|e| match e {
            TransformError::InvalidObservation(msg) => {
                TransformError::InvalidObservation(format!("line {}: {msg}", index + 1))
            }
            other => other,
        })?;
        observations.push(observation);
    }
    Ok(observations)
}
