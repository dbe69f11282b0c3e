//! The atomic request under construction.

use drm::control::atomic::AtomicModeReq;
use drm::control::{property, RawResourceHandle};
use indexmap::IndexMap;

/// A set of atomic property updates under construction.
///
/// [`Device::apply`](crate::Device::apply) stamps plane properties into
/// the request; the caller may pre-populate it with its own connector or
/// crtc updates and, once apply succeeds, submits the result of
/// [`AtomicRequest::build`] through the usual atomic commit path.
///
/// Stamps are keyed by (object, property): writing the same pair twice
/// keeps the last value, which is also what the kernel would do with a
/// duplicated entry.
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    entries: IndexMap<(RawResourceHandle, property::Handle), u64>,
}

impl AtomicRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a raw property value, replacing any previous value for the
    /// same (object, property) pair.
    pub fn set(
        &mut self,
        object: impl Into<RawResourceHandle>,
        property: property::Handle,
        value: u64,
    ) {
        self.entries.insert((object.into(), property), value);
    }

    /// Returns the currently stamped value for a property, if any.
    pub fn get(
        &self,
        object: impl Into<RawResourceHandle>,
        property: property::Handle,
    ) -> Option<u64> {
        self.entries.get(&(object.into(), property)).copied()
    }

    /// Number of stamped properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing has been stamped yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the stamped (object, property, value) triples in
    /// first-stamp order.
    pub fn properties(
        &self,
    ) -> impl Iterator<Item = (RawResourceHandle, property::Handle, u64)> + '_ {
        self.entries
            .iter()
            .map(|(&(object, property), &value)| (object, property, value))
    }

    /// Builds the request to hand to the atomic commit ioctl.
    pub fn build(&self) -> AtomicModeReq {
        let mut req = AtomicModeReq::new();
        for ((object, property), value) in &self.entries {
            req.add_raw_property(*object, *property, *value);
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use drm::control::property;

    use super::AtomicRequest;

    fn prop(id: u32) -> property::Handle {
        property::Handle::from(NonZeroU32::new(id).unwrap())
    }

    fn object(id: u32) -> NonZeroU32 {
        NonZeroU32::new(id).unwrap()
    }

    #[test]
    fn later_stamps_win() {
        let mut req = AtomicRequest::new();
        req.set(object(31), prop(1), 7);
        req.set(object(31), prop(2), 8);
        req.set(object(31), prop(1), 9);

        assert_eq!(req.len(), 2);
        assert_eq!(req.get(object(31), prop(1)), Some(9));
        assert_eq!(req.get(object(31), prop(2)), Some(8));
    }

    #[test]
    fn stamp_order_is_preserved() {
        let mut req = AtomicRequest::new();
        req.set(object(31), prop(2), 1);
        req.set(object(32), prop(1), 2);
        req.set(object(31), prop(2), 3);

        let triples: Vec<_> = req.properties().collect();
        assert_eq!(triples[0], (object(31), prop(2), 3));
        assert_eq!(triples[1], (object(32), prop(1), 2));
    }

    #[test]
    fn snapshots_restore_cleanly() {
        let mut req = AtomicRequest::new();
        req.set(object(31), prop(1), 7);
        let saved = req.clone();
        req.set(object(31), prop(1), 8);
        req.set(object(40), prop(3), 9);

        req = saved;
        assert_eq!(req.len(), 1);
        assert_eq!(req.get(object(31), prop(1)), Some(7));
    }
}
