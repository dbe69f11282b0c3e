//! Hardware plane bookkeeping.

use drm::control::{crtc, plane, property, PlaneType};
use tracing::trace;

use crate::device::RawProperty;
use crate::error::Error;
use crate::layer::Layer;
use crate::property::{CoreProperty, CORE_PROPERTY_COUNT};
use crate::request::AtomicRequest;

/// One hardware plane discovered on the device.
#[derive(Debug)]
pub struct Plane {
    handle: plane::Handle,
    possible_crtcs: u32,
    kind: PlaneType,
    zpos: i32,
    props: Vec<(String, property::Handle)>,
    core: [Option<property::Handle>; CORE_PROPERTY_COUNT],
}

impl Plane {
    pub(crate) fn new(
        handle: plane::Handle,
        possible_crtcs: u32,
        props: Vec<RawProperty>,
    ) -> Result<Self, Error> {
        let mut kind = PlaneType::Overlay;
        let mut zpos = 0i32;
        let mut core = [None; CORE_PROPERTY_COUNT];
        let mut table = Vec::with_capacity(props.len());

        for prop in props {
            if prop.name == "type" {
                kind = if prop.value == PlaneType::Primary as u64 {
                    PlaneType::Primary
                } else if prop.value == PlaneType::Cursor as u64 {
                    PlaneType::Cursor
                } else {
                    PlaneType::Overlay
                };
            } else if prop.name == "zpos" {
                zpos = prop.value as i32;
            }
            if let Some(core_prop) = CoreProperty::from_name(&prop.name) {
                core[core_prop.index()] = Some(prop.handle);
            }
            table.push((prop.name, prop.handle));
        }

        // Without these two the plane cannot scan anything out.
        for required in [CoreProperty::FbId, CoreProperty::CrtcId] {
            if core[required.index()].is_none() {
                return Err(Error::UnknownProperty {
                    handle,
                    name: required.name(),
                });
            }
        }

        Ok(Plane {
            handle,
            possible_crtcs,
            kind,
            zpos,
            props: table,
            core,
        })
    }

    /// Kernel object id of this plane.
    pub fn handle(&self) -> plane::Handle {
        self.handle
    }

    /// Plane type as reported by the `type` property.
    pub fn kind(&self) -> PlaneType {
        self.kind
    }

    /// Stacking position; greater values are closer to the eye.
    pub fn zpos(&self) -> i32 {
        self.zpos
    }

    pub(crate) fn supports_crtc_index(&self, index: usize) -> bool {
        index < 32 && self.possible_crtcs & (1 << index) != 0
    }

    pub(crate) fn core_property(&self, prop: CoreProperty) -> Option<property::Handle> {
        self.core[prop.index()]
    }

    pub(crate) fn property(&self, name: &str) -> Option<property::Handle> {
        self.props
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, handle)| *handle)
    }

    /// Sort key for the allocator's plane walk: primaries first, then
    /// overlays, then cursors, ascending zpos within a type. This is the
    /// underneath-to-top order the hardware composes in.
    pub(crate) fn ordering_key(&self) -> (u8, i32, u32) {
        let rank = match self.kind {
            PlaneType::Primary => 0,
            PlaneType::Overlay => 1,
            PlaneType::Cursor => 2,
        };
        (rank, self.zpos, self.handle.into())
    }

    /// Stamps `layer` onto this plane: CRTC_ID plus every layer property
    /// the plane advertises. Properties the plane does not expose are
    /// dropped, the kernel arbitrates everything else.
    pub(crate) fn apply_to(&self, layer: &Layer, crtc: crtc::Handle, req: &mut AtomicRequest) {
        // CRTC_ID belongs to the allocator, never to the client.
        if let Some(prop) = self.core_property(CoreProperty::CrtcId) {
            req.set(self.handle, prop, u64::from(u32::from(crtc)));
        }
        for prop in layer.properties() {
            if prop.name == CoreProperty::CrtcId.name() {
                continue;
            }
            match self.property(&prop.name) {
                Some(handle) => req.set(self.handle, handle, prop.value),
                None => trace!(
                    "plane {:?} does not advertise {}, dropping",
                    self.handle,
                    prop.name
                ),
            }
        }
    }

    /// Stamps this plane disabled.
    pub(crate) fn disable(&self, req: &mut AtomicRequest) {
        if let Some(prop) = self.core_property(CoreProperty::CrtcId) {
            req.set(self.handle, prop, 0);
        }
        if let Some(prop) = self.core_property(CoreProperty::FbId) {
            req.set(self.handle, prop, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use drm::control::{plane, property, PlaneType};

    use super::Plane;
    use crate::device::RawProperty;
    use crate::error::Error;

    fn plane_handle(id: u32) -> plane::Handle {
        plane::Handle::from(NonZeroU32::new(id).unwrap())
    }

    fn props(plane_id: u32, kind: PlaneType, zpos: u64) -> Vec<RawProperty> {
        ["FB_ID", "CRTC_ID", "type", "zpos"]
            .iter()
            .enumerate()
            .map(|(index, &name)| RawProperty {
                name: name.to_owned(),
                handle: property::Handle::from(
                    NonZeroU32::new(plane_id * 16 + index as u32 + 1).unwrap(),
                ),
                value: match name {
                    "type" => kind as u64,
                    "zpos" => zpos,
                    _ => 0,
                },
            })
            .collect()
    }

    fn make(id: u32, kind: PlaneType, zpos: u64) -> Plane {
        Plane::new(plane_handle(id), 0x1, props(id, kind, zpos)).unwrap()
    }

    #[test]
    fn classifies_type_and_zpos() {
        let plane = make(10, PlaneType::Cursor, 7);
        assert_eq!(plane.kind(), PlaneType::Cursor);
        assert_eq!(plane.zpos(), 7);
    }

    #[test]
    fn ordering_is_type_rank_then_zpos() {
        let mut planes = vec![
            make(10, PlaneType::Cursor, 4),
            make(11, PlaneType::Overlay, 3),
            make(12, PlaneType::Overlay, 1),
            make(13, PlaneType::Primary, 0),
        ];
        planes.sort_by_key(|plane| plane.ordering_key());

        let order: Vec<u32> = planes.iter().map(|plane| plane.handle().into()).collect();
        assert_eq!(order, vec![13, 12, 11, 10]);
    }

    #[test]
    fn rejects_planes_without_fb_id() {
        let mut table = props(10, PlaneType::Overlay, 0);
        table.retain(|prop| prop.name != "FB_ID");
        let result = Plane::new(plane_handle(10), 0x1, table);
        assert!(matches!(result, Err(Error::UnknownProperty { .. })));
    }

    #[test]
    fn crtc_mask_is_indexed() {
        let plane = Plane::new(plane_handle(10), 0b101, props(10, PlaneType::Overlay, 0)).unwrap();
        assert!(plane.supports_crtc_index(0));
        assert!(!plane.supports_crtc_index(1));
        assert!(plane.supports_crtc_index(2));
        assert!(!plane.supports_crtc_index(33));
    }
}
