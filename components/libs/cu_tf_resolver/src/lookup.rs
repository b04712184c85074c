use crate::error::TransformResult;
use crate::time::RosTime;
use crate::transform::RigidTransform;

/// Answers "where is `target` as seen from `source`".
///
/// The two implementations keep different consistency models:
/// [`crate::BatchComposer`] samples every edge at the same instant and needs
/// a time, [`crate::OnlineTransformBuffer`] composes the latest value of each
/// edge and ignores it.
pub trait TransformLookup {
    /// Pose of `target` expressed in `source`. Equal frames give the identity.
    fn lookup(
        &mut self,
        target: &str,
        source: &str,
        time: Option<RosTime>,
    ) -> TransformResult<RigidTransform>;
}
