//! Extraction configuration, streaming extraction and result persistence.

use crate::error::{TransformError, TransformResult};
use crate::lookup::TransformLookup;
use crate::observation::EdgeObservation;
use crate::online::OnlineTransformBuffer;
use crate::series::EdgeStats;
use crate::time::RosTime;
use crate::transform::StampedTransform;
use log::{debug, info};
use ron::extensions::Extensions;
use ron::Options;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{create_dir_all, read_to_string, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// What to extract, read from a RON file such as:
///
/// ```ron
/// (
///     base_frame: "odom",
///     target_frames: ["base_link", "camera/optical"],
///     use_euler: true,
///     sample_rate_hz: 20.0,
/// )
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub base_frame: String,
    pub target_frames: Vec<String>,
    #[serde(default)]
    pub use_euler: bool,
    #[serde(default)]
    pub sample_rate_hz: Option<f64>,
}

impl ExtractionConfig {
    pub fn from_ron_str(ron: &str) -> TransformResult<Self> {
        let config: ExtractionConfig = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
            .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES)
            .from_str(ron)
            .map_err(|e| TransformError::Config(format!("unreadable configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn read_config_file(path: &Path) -> TransformResult<Self> {
        let content = read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    pub fn validate(&self) -> TransformResult<()> {
        if self.base_frame.is_empty() {
            return Err(TransformError::Config(
                "base_frame must be specified".to_string(),
            ));
        }
        if self.target_frames.is_empty() {
            return Err(TransformError::Config(
                "target_frames must be specified".to_string(),
            ));
        }
        if let Some(rate) = self.sample_rate_hz {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(TransformError::Config(format!(
                    "sample_rate_hz must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }

    /// Minimum spacing between two emissions for the same target.
    pub fn sample_period(&self) -> Option<RosTime> {
        self.sample_rate_hz
            .map(|rate| RosTime::from_nanos((1e9 / rate) as i64))
    }
}

/// Lowercased frame name with path separators replaced, fit for a file name.
pub fn sanitize_frame(frame: &str) -> String {
    frame.replace('/', "_").to_lowercase()
}

/// `<base>_to_<target>`, the name of a streamed result.
pub fn streaming_output_name(base_frame: &str, target_frame: &str) -> String {
    format!(
        "{}_to_{}",
        sanitize_frame(base_frame),
        sanitize_frame(target_frame)
    )
}

/// True when `dir` exists and already holds something.
pub fn output_dir_is_occupied(dir: &Path) -> TransformResult<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    Ok(dir.read_dir()?.next().is_some())
}

/// Feeds an [`OnlineTransformBuffer`] message by message and records the
/// pose of every target frame in the base frame after each one.
pub struct StreamingExtractor {
    config: ExtractionConfig,
    buffer: OnlineTransformBuffer,
    sample_period: Option<RosTime>,
    last_emit: HashMap<String, RosTime>,
    records: BTreeMap<String, Vec<StampedTransform>>,
}

impl StreamingExtractor {
    pub fn new(config: ExtractionConfig) -> TransformResult<Self> {
        config.validate()?;
        let records = config
            .target_frames
            .iter()
            .map(|target| (target.clone(), Vec::new()))
            .collect();
        Ok(Self {
            sample_period: config.sample_period(),
            config,
            buffer: OnlineTransformBuffer::new(),
            last_emit: HashMap::new(),
            records,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn buffer(&self) -> &OnlineTransformBuffer {
        &self.buffer
    }

    /// Static edges go in before anything is looked up.
    pub fn load_static<'a, I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = &'a EdgeObservation>,
    {
        let mut count = 0;
        for obs in observations {
            self.buffer
                .set_transform(&obs.parent, &obs.child, obs.transform);
            count += 1;
        }
        info!("Loaded {} static transforms", count);
    }

    /// Applies every transform of one message, then looks up each target.
    pub fn process_message(&mut self, stamp: RosTime, transforms: &[EdgeObservation]) {
        for obs in transforms {
            self.buffer
                .set_transform(&obs.parent, &obs.child, obs.transform);
        }

        for target in &self.config.target_frames {
            if let (Some(period), Some(last)) = (self.sample_period, self.last_emit.get(target)) {
                if stamp - *last < period {
                    continue;
                }
            }
            // The throttle clock advances whether or not the lookup succeeds.
            self.last_emit.insert(target.clone(), stamp);

            match self.buffer.lookup(target, &self.config.base_frame, None) {
                Ok(tf) => {
                    if let Some(records) = self.records.get_mut(target) {
                        records.push(StampedTransform::new(stamp, tf));
                    }
                }
                Err(e) => debug!("No transform for '{}' at {}: {}", target, stamp, e),
            }
        }
    }

    /// Sorts `observations` by stamp and processes each run of equal stamps
    /// as one message.
    pub fn run(&mut self, mut observations: Vec<EdgeObservation>) {
        observations.sort_by_key(|obs| obs.stamp);
        let messages = observations.chunk_by(|a, b| a.stamp == b.stamp);
        let mut count = 0;
        for message in messages {
            self.process_message(message[0].stamp, message);
            count += 1;
        }
        info!(
            "Processed {} messages for {} target frames",
            count,
            self.config.target_frames.len()
        );
    }

    pub fn records(&self) -> &BTreeMap<String, Vec<StampedTransform>> {
        &self.records
    }

    /// Writes one file per target holding at least one record.
    pub fn write_results(&self, writer: &mut dyn ResultWriter) -> TransformResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (target, records) in &self.records {
            if records.is_empty() {
                continue;
            }
            let name = streaming_output_name(&self.config.base_frame, target);
            written.push(writer.write_series(&name, records)?);
        }
        Ok(written)
    }
}

/// Persists a named series of composed transforms.
pub trait ResultWriter {
    /// Returns where the series went.
    fn write_series(&mut self, name: &str, samples: &[StampedTransform])
        -> TransformResult<PathBuf>;
}

/// One `<name>.csv` file per series inside a directory.
pub struct CsvResultWriter {
    dir: PathBuf,
    use_euler: bool,
}

impl CsvResultWriter {
    pub const QUATERNION_HEADER: &'static str = "timestamp,x,y,z,qx,qy,qz,qw";
    pub const EULER_HEADER: &'static str = "timestamp,x,y,z,roll,pitch,yaw";

    pub fn new(dir: impl Into<PathBuf>, use_euler: bool) -> Self {
        Self {
            dir: dir.into(),
            use_euler,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_to(&self, output: &mut dyn Write, samples: &[StampedTransform]) -> std::io::Result<()> {
        if self.use_euler {
            writeln!(output, "{}", Self::EULER_HEADER)?;
        } else {
            writeln!(output, "{}", Self::QUATERNION_HEADER)?;
        }
        for sample in samples {
            let [x, y, z] = sample.transform.translation;
            write!(output, "{},{},{},{}", sample.stamp.as_nanos(), x, y, z)?;
            if self.use_euler {
                let [roll, pitch, yaw] = sample.transform.euler();
                writeln!(output, ",{roll},{pitch},{yaw}")?;
            } else {
                let [qx, qy, qz, qw] = sample.transform.rotation;
                writeln!(output, ",{qx},{qy},{qz},{qw}")?;
            }
        }
        Ok(())
    }
}

impl ResultWriter for CsvResultWriter {
    fn write_series(
        &mut self,
        name: &str,
        samples: &[StampedTransform],
    ) -> TransformResult<PathBuf> {
        create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.csv", name.replace('/', "_")));
        let mut output = BufWriter::new(File::create(&path)?);
        self.write_to(&mut output, samples)?;
        output.flush()?;
        debug!("Wrote {} records to {}", samples.len(), path.display());
        Ok(path)
    }
}

/// Edge statistics as CSV, missing rates left empty.
pub fn write_stats_csv(output: &mut dyn Write, stats: &[EdgeStats]) -> std::io::Result<()> {
    fn opt(value: Option<f64>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    writeln!(
        output,
        "edge,parent,pub_count,is_static,median_rate_hz,mean_rate_hz,std_rate_hz"
    )?;
    for stat in stats {
        writeln!(
            output,
            "{},{},{},{},{},{},{}",
            stat.edge,
            stat.parent,
            stat.pub_count,
            stat.is_static,
            opt(stat.median_rate_hz),
            opt(stat.mean_rate_hz),
            opt(stat.std_rate_hz)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::observation;
    use crate::transform::RigidTransform;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::tempdir;

    fn config(targets: &[&str], sample_rate_hz: Option<f64>) -> ExtractionConfig {
        ExtractionConfig {
            base_frame: "odom".to_string(),
            target_frames: targets.iter().map(|t| t.to_string()).collect(),
            use_euler: false,
            sample_rate_hz,
        }
    }

    #[test]
    fn test_config_from_ron() {
        let config = ExtractionConfig::from_ron_str(
            r#"(
                base_frame: "odom",
                target_frames: ["base_link", "camera/optical"],
                use_euler: true,
                sample_rate_hz: 20.0,
            )"#,
        )
        .unwrap();
        assert_eq!(config.target_frames.len(), 2);
        assert!(config.use_euler);
        assert_eq!(config.sample_rate_hz, Some(20.0));
        assert_eq!(config.sample_period(), Some(RosTime(50_000_000)));

        let minimal =
            ExtractionConfig::from_ron_str(r#"(base_frame: "odom", target_frames: ["a"])"#)
                .unwrap();
        assert!(!minimal.use_euler);
        assert_eq!(minimal.sample_rate_hz, None);
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            ExtractionConfig::from_ron_str(r#"(base_frame: "", target_frames: ["a"])"#),
            Err(TransformError::Config(_))
        ));
        assert!(matches!(
            ExtractionConfig::from_ron_str(r#"(base_frame: "odom", target_frames: [])"#),
            Err(TransformError::Config(_))
        ));
        assert!(config(&["a"], Some(0.0)).validate().is_err());
        assert!(config(&["a"], Some(-1.0)).validate().is_err());
    }

    #[test]
    fn test_naming() {
        assert_eq!(
            streaming_output_name("Odom", "camera/Optical"),
            "odom_to_camera_optical"
        );
    }

    #[test]
    fn test_streaming_with_static_edges() {
        let mut extractor = StreamingExtractor::new(config(&["camera"], None)).unwrap();
        extractor.load_static(&[observation(0, "base_link", "camera", [0.0, 0.0, 1.0])]);
        extractor.run(vec![
            observation(20, "odom", "base_link", [2.0, 0.0, 0.0]),
            observation(10, "odom", "base_link", [1.0, 0.0, 0.0]),
        ]);

        let records = &extractor.records()["camera"];
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stamp, RosTime(10));
        assert_relative_eq!(records[0].transform.translation[0], 1.0);
        assert_relative_eq!(records[1].transform.translation[0], 2.0);
        assert_relative_eq!(records[1].transform.translation[2], 1.0);
    }

    #[test]
    fn test_failed_lookups_are_dropped() {
        let mut extractor = StreamingExtractor::new(config(&["camera"], None)).unwrap();
        extractor.run(vec![
            observation(10, "odom", "base_link", [1.0, 0.0, 0.0]),
            observation(20, "base_link", "camera", [0.0, 0.0, 1.0]),
            observation(30, "odom", "base_link", [3.0, 0.0, 0.0]),
        ]);
        let stamps: Vec<RosTime> = extractor.records()["camera"]
            .iter()
            .map(|r| r.stamp)
            .collect();
        assert_eq!(stamps, vec![RosTime(20), RosTime(30)]);
    }

    #[test]
    fn test_sample_rate_throttle() {
        // 10 Hz throttle over 20 ms spaced messages.
        let mut extractor = StreamingExtractor::new(config(&["base_link"], Some(10.0))).unwrap();
        let observations = (0..20)
            .map(|i| observation(i * 20_000_000, "odom", "base_link", [i as f64, 0.0, 0.0]))
            .collect();
        extractor.run(observations);
        let stamps: Vec<i64> = extractor.records()["base_link"]
            .iter()
            .map(|r| r.stamp.as_nanos())
            .collect();
        assert_eq!(stamps, vec![0, 100_000_000, 200_000_000, 300_000_000]);
    }

    #[test]
    fn test_throttle_advances_on_failure() {
        let mut extractor = StreamingExtractor::new(config(&["camera"], Some(10.0))).unwrap();
        extractor.run(vec![
            observation(0, "odom", "base_link", [0.0; 3]),
            observation(50_000_000, "base_link", "camera", [0.0; 3]),
            observation(100_000_000, "odom", "base_link", [1.0, 0.0, 0.0]),
        ]);
        // The failed attempt at t=0 still blocks t=50ms.
        let stamps: Vec<i64> = extractor.records()["camera"]
            .iter()
            .map(|r| r.stamp.as_nanos())
            .collect();
        assert_eq!(stamps, vec![100_000_000]);
    }

    #[test]
    fn test_csv_writer() {
        let dir = tempdir().unwrap();
        let mut writer = CsvResultWriter::new(dir.path().join("out"), false);
        let samples = vec![StampedTransform::new(
            RosTime(42),
            RigidTransform::from_translation(1.0, 2.0, 3.0),
        )];
        let path = writer.write_series("camera_in_odom", &samples).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CsvResultWriter::QUATERNION_HEADER));
        assert_eq!(lines.next(), Some("42,1,2,3,0,0,0,1"));
        assert!(output_dir_is_occupied(&dir.path().join("out")).unwrap());
        assert!(!output_dir_is_occupied(&dir.path().join("missing")).unwrap());

        let euler = CsvResultWriter::new(dir.path(), true);
        let mut buffer = Vec::new();
        euler.write_to(&mut buffer, &samples).unwrap();
        let content = String::from_utf8(buffer).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CsvResultWriter::EULER_HEADER));
        let row: Vec<f64> = lines
            .next()
            .unwrap()
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(row.len(), 7);
        assert_eq!(&row[..4], &[42.0, 1.0, 2.0, 3.0]);
        assert!(row[4..].iter().all(|angle| angle.abs() < 1e-12));
    }

    #[test]
    fn test_write_results_skips_empty_targets() {
        let dir = tempdir().unwrap();
        let mut extractor =
            StreamingExtractor::new(config(&["base_link", "nowhere"], None)).unwrap();
        extractor.run(vec![observation(10, "odom", "base_link", [1.0, 0.0, 0.0])]);
        let mut writer = CsvResultWriter::new(dir.path(), false);
        let written = extractor.write_results(&mut writer).unwrap();
        assert_eq!(written, vec![dir.path().join("odom_to_base_link.csv")]);
    }

    #[test]
    fn test_stats_csv() {
        let stats = vec![EdgeStats {
            edge: "camera".to_string(),
            parent: "base".to_string(),
            pub_count: 1,
            is_static: true,
            median_rate_hz: None,
            mean_rate_hz: None,
            std_rate_hz: None,
        }];
        let mut buffer = Vec::new();
        write_stats_csv(&mut buffer, &stats).unwrap();
        let content = String::from_utf8(buffer).unwrap();
        assert_eq!(content.lines().nth(1), Some("camera,base,1,true,,,"));
    }
}
