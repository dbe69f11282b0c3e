//! Device discovery and the client-facing surface.

use std::collections::{HashMap, HashSet};
use std::io;

use drm::control::{crtc, plane, property, AtomicCommitFlags, Device as ControlDevice};
use indexmap::IndexMap;
use tracing::{debug, info, info_span, Span};

use crate::alloc::allocate_output;
use crate::error::Error;
use crate::layer::{LayerHandle, PRIORITY_PERIOD};
use crate::output::{Output, OutputHandle};
use crate::plane::Plane;
use crate::request::AtomicRequest;

/// Longest accepted property name, terminating NUL included.
const PROP_NAME_LEN: usize = drm_ffi::DRM_PROP_NAME_LEN as usize;

/// One plane as enumerated by the kernel, with the crtcs it can drive
/// resolved to a bitmask over the device crtc table.
#[derive(Debug, Clone, Copy)]
pub struct PlaneResource {
    /// Kernel plane id.
    pub handle: plane::Handle,
    /// Bit `i` set means the plane can scan out on the `i`-th crtc.
    pub possible_crtcs: u32,
}

/// A property exposed by a drm object, with its value at discovery time.
#[derive(Debug, Clone)]
pub struct RawProperty {
    /// Property name as the kernel spells it.
    pub name: String,
    /// Property id used when stamping requests.
    pub handle: property::Handle,
    /// Raw value at discovery time.
    pub value: u64,
}

/// The subset of the KMS interface the allocator needs.
///
/// A blanket implementation covers every [`drm::control::Device`], so a
/// regular card wrapper works out of the box; tests substitute their own
/// kernel.
pub trait AtomicDevice {
    /// Crtcs exposed by the device, in kernel order.
    fn crtc_handles(&self) -> io::Result<Vec<crtc::Handle>>;

    /// Planes exposed by the device.
    fn plane_resources(&self) -> io::Result<Vec<PlaneResource>>;

    /// Properties attached to a plane.
    fn plane_properties(&self, plane: plane::Handle) -> io::Result<Vec<RawProperty>>;

    /// Asks the kernel to validate `req` without touching hardware state
    /// (`TEST_ONLY`, with `ALLOW_MODESET` cleared).
    fn test_commit(&self, req: &AtomicRequest) -> io::Result<()>;
}

impl<D: ControlDevice> AtomicDevice for D {
    fn crtc_handles(&self) -> io::Result<Vec<crtc::Handle>> {
        Ok(self.resource_handles()?.crtcs().to_vec())
    }

    fn plane_resources(&self) -> io::Result<Vec<PlaneResource>> {
        let res = self.resource_handles()?;
        let crtcs = res.crtcs();
        let mut planes = Vec::new();
        for handle in self.plane_handles()? {
            let info = self.get_plane(handle)?;
            let compatible = res.filter_crtcs(info.possible_crtcs());
            let mut possible_crtcs = 0u32;
            for (index, crtc) in crtcs.iter().enumerate().take(32) {
                if compatible.contains(crtc) {
                    possible_crtcs |= 1 << index;
                }
            }
            planes.push(PlaneResource {
                handle,
                possible_crtcs,
            });
        }
        Ok(planes)
    }

    fn plane_properties(&self, plane: plane::Handle) -> io::Result<Vec<RawProperty>> {
        let props = self.get_properties(plane)?;
        let (handles, values) = props.as_props_and_values();
        let mut out = Vec::with_capacity(handles.len());
        for (&handle, &value) in handles.iter().zip(values.iter()) {
            let info = self.get_property(handle)?;
            out.push(RawProperty {
                name: info.name().to_string_lossy().into_owned(),
                handle,
                value,
            });
        }
        Ok(out)
    }

    fn test_commit(&self, req: &AtomicRequest) -> io::Result<()> {
        self.atomic_commit(AtomicCommitFlags::TEST_ONLY, req.build())
    }
}

/// Maps client layers onto the hardware planes of an atomic KMS device.
///
/// The device owns the discovered [`Plane`]s and the outputs created on
/// it; outputs own their layers. All operations happen on the calling
/// thread, nothing here is `Sync`-aware by design: KMS is a single-client
/// protocol.
#[derive(Debug)]
pub struct Device<D: AtomicDevice> {
    drm: D,
    crtcs: Vec<crtc::Handle>,
    planes: Vec<Plane>,
    outputs: IndexMap<OutputHandle, Output>,
    layer_index: HashMap<LayerHandle, OutputHandle>,
    page_flip_counter: u64,
    test_commit_counter: u64,
    next_id: u64,
    span: Span,
}

impl<D: AtomicDevice> Device<D> {
    /// Discovers crtcs and planes on `drm` and prepares the allocator.
    ///
    /// The caller must have enabled the `UniversalPlanes` and `Atomic`
    /// client capabilities beforehand.
    pub fn new(drm: D) -> Result<Self, Error> {
        let span = info_span!("skylift");
        let guard = span.enter();

        let crtcs = drm.crtc_handles().map_err(|source| Error::Access {
            errmsg: "Error loading crtc resources",
            source,
        })?;

        let resources = drm.plane_resources().map_err(|source| Error::Access {
            errmsg: "Error loading planes",
            source,
        })?;
        let mut planes = Vec::with_capacity(resources.len());
        for resource in resources {
            let props = drm
                .plane_properties(resource.handle)
                .map_err(|source| Error::Access {
                    errmsg: "Error reading plane properties",
                    source,
                })?;
            planes.push(Plane::new(resource.handle, resource.possible_crtcs, props)?);
        }
        planes.sort_by_key(|plane| plane.ordering_key());

        info!("using {} planes across {} crtcs", planes.len(), crtcs.len());
        for plane in &planes {
            debug!(
                "plane {:?}: type {:?}, zpos {}",
                plane.handle(),
                plane.kind(),
                plane.zpos()
            );
        }

        drop(guard);
        Ok(Device {
            drm,
            crtcs,
            planes,
            outputs: IndexMap::new(),
            layer_index: HashMap::new(),
            page_flip_counter: 0,
            test_commit_counter: 0,
            next_id: 1,
            span,
        })
    }

    /// Borrows the wrapped drm device, e.g. to submit the final commit.
    pub fn drm(&self) -> &D {
        &self.drm
    }

    /// Consumes the device and returns the wrapped drm handle.
    pub fn into_inner(self) -> D {
        self.drm
    }

    /// The discovered planes, in allocation order.
    pub fn planes(&self) -> impl Iterator<Item = &Plane> {
        self.planes.iter()
    }

    /// Total TEST_ONLY commits issued so far.
    pub fn test_commit_count(&self) -> u64 {
        self.test_commit_counter
    }

    /// Page flips reported via [`Device::notify_page_flip`].
    pub fn page_flip_count(&self) -> u64 {
        self.page_flip_counter
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Creates an output for `crtc`. At most one output may drive a
    /// crtc at a time.
    pub fn create_output(&mut self, crtc: crtc::Handle) -> Result<OutputHandle, Error> {
        let crtc_index = self
            .crtcs
            .iter()
            .position(|&candidate| candidate == crtc)
            .ok_or(Error::UnknownCrtc(crtc))?;
        if self.outputs.values().any(|output| output.crtc() == crtc) {
            return Err(Error::OutputExists(crtc));
        }
        let handle = OutputHandle(self.next_id());
        self.outputs.insert(handle, Output::new(crtc, crtc_index));
        debug!(parent: &self.span, "created output {:?} for crtc {:?}", handle, crtc);
        Ok(handle)
    }

    /// Destroys an output and every layer on it. The planes it used stay
    /// untouched until the caller reconfigures them.
    pub fn destroy_output(&mut self, output: OutputHandle) -> Result<(), Error> {
        let removed = self.outputs.shift_remove(&output).ok_or(Error::DeadOutput)?;
        self.layer_index.retain(|_, owner| *owner != output);
        debug!(parent: &self.span, "destroyed output {:?} for crtc {:?}", output, removed.crtc());
        Ok(())
    }

    /// Creates a layer on `output`.
    pub fn create_layer(&mut self, output: OutputHandle) -> Result<LayerHandle, Error> {
        if !self.outputs.contains_key(&output) {
            return Err(Error::DeadOutput);
        }
        let handle = LayerHandle(self.next_id());
        self.outputs
            .get_mut(&output)
            .ok_or(Error::DeadOutput)?
            .insert_layer(handle);
        self.layer_index.insert(handle, output);
        Ok(handle)
    }

    /// Destroys a layer. The plane it held, if any, is freed on the next
    /// apply.
    pub fn destroy_layer(&mut self, layer: LayerHandle) -> Result<(), Error> {
        let output = self.layer_index.remove(&layer).ok_or(Error::DeadLayer)?;
        if let Some(out) = self.outputs.get_mut(&output) {
            out.remove_layer(layer);
        }
        Ok(())
    }

    fn layer_output(&self, layer: LayerHandle) -> Result<OutputHandle, Error> {
        self.layer_index.get(&layer).copied().ok_or(Error::DeadLayer)
    }

    /// Records a property value on a layer, `"FB_ID"`, `"CRTC_X"` and
    /// friends. Values are raw u64 per KMS convention; `SRC_*` use 16.16
    /// fixed point. Whether the plane ultimately chosen supports the
    /// property is the kernel's call, made at test-commit time.
    pub fn set_layer_property(
        &mut self,
        layer: LayerHandle,
        name: &str,
        value: u64,
    ) -> Result<(), Error> {
        // the kernel buffer holds the terminating NUL too
        if name.len() >= PROP_NAME_LEN {
            return Err(Error::InvalidPropertyName(name.to_owned()));
        }
        let output = self.layer_output(layer)?;
        self.outputs
            .get_mut(&output)
            .ok_or(Error::DeadOutput)?
            .layer_mut(layer)
            .ok_or(Error::DeadLayer)?
            .set_property(name, value);
        Ok(())
    }

    /// Excludes a layer from plane assignment (or re-admits it). Forced
    /// layers always end up composited.
    pub fn set_force_composition(&mut self, layer: LayerHandle, force: bool) -> Result<(), Error> {
        let output = self.layer_output(layer)?;
        self.outputs
            .get_mut(&output)
            .ok_or(Error::DeadOutput)?
            .layer_mut(layer)
            .ok_or(Error::DeadLayer)?
            .set_force_composition(force);
        Ok(())
    }

    /// Designates the layer whose framebuffer absorbs software-composited
    /// content. While set, that layer is reserved for the primary plane.
    pub fn set_composition_layer(
        &mut self,
        output: OutputHandle,
        layer: Option<LayerHandle>,
    ) -> Result<(), Error> {
        if let Some(layer) = layer {
            if self.layer_output(layer)? != output {
                return Err(Error::ForeignLayer);
            }
        }
        self.outputs
            .get_mut(&output)
            .ok_or(Error::DeadOutput)?
            .set_composition_layer(layer);
        Ok(())
    }

    /// The plane a layer was assigned on the last apply. `None` is the
    /// signal that the client must composite this layer.
    pub fn layer_plane(&self, layer: LayerHandle) -> Result<Option<plane::Handle>, Error> {
        let output = self.layer_output(layer)?;
        Ok(self
            .outputs
            .get(&output)
            .ok_or(Error::DeadOutput)?
            .layer(layer)
            .ok_or(Error::DeadLayer)?
            .plane())
    }

    /// `true` when some visible layer on `output` is not on a plane and
    /// needs to be composited by the client.
    pub fn output_needs_composition(&self, output: OutputHandle) -> Result<bool, Error> {
        let out = self.outputs.get(&output).ok_or(Error::DeadOutput)?;
        Ok(out.layers().iter().any(|(handle, layer)| {
            Some(*handle) != out.composition_layer()
                && layer.is_visible()
                && layer.plane().is_none()
        }))
    }

    /// How often the allocator replayed a previous allocation for
    /// `output` instead of searching.
    pub fn allocation_reuse_count(&self, output: OutputHandle) -> Result<u64, Error> {
        Ok(self
            .outputs
            .get(&output)
            .ok_or(Error::DeadOutput)?
            .alloc_reused())
    }

    /// Reports a completed page flip. Every [`PRIORITY_PERIOD`] flips
    /// the priorities accumulated by property updates are promoted, so
    /// layers that update frequently win the better planes.
    pub fn notify_page_flip(&mut self) {
        self.page_flip_counter += 1;
        if self.page_flip_counter % PRIORITY_PERIOD == 0 {
            for output in self.outputs.values_mut() {
                for layer in output.layers_mut().values_mut() {
                    layer.update_priority(true);
                }
            }
        }
    }

    /// Computes a plane assignment for every output and stamps it into
    /// `req`; the caller submits the built request afterwards.
    ///
    /// Fails only when even the configuration that disables every
    /// candidate plane (all layers composited) is rejected, which points
    /// at a problem with the request or device state outside this
    /// library's writes.
    pub fn apply(&mut self, req: &mut AtomicRequest) -> Result<(), Error> {
        let span = self.span.clone();
        let _guard = span.enter();

        let mut claimed = HashSet::new();
        for index in 0..self.outputs.len() {
            let (&handle, output) = self
                .outputs
                .get_index_mut(index)
                .expect("output index in range");
            allocate_output(
                &self.drm,
                &self.planes,
                &mut claimed,
                handle,
                output,
                req,
                &mut self.test_commit_counter,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::num::NonZeroU32;

    use drm::control::{crtc, plane, property, PlaneType};

    use super::{AtomicDevice, Device, PlaneResource, RawProperty};
    use crate::error::Error;
    use crate::layer::PRIORITY_PERIOD;
    use crate::request::AtomicRequest;

    // Minimal kernel stand-in: one crtc, accepts everything.
    struct StubKms {
        planes: Vec<(u32, PlaneType, u64)>,
    }

    fn handle(id: u32) -> NonZeroU32 {
        NonZeroU32::new(id).unwrap()
    }

    impl AtomicDevice for StubKms {
        fn crtc_handles(&self) -> io::Result<Vec<crtc::Handle>> {
            Ok(vec![crtc::Handle::from(handle(1))])
        }

        fn plane_resources(&self) -> io::Result<Vec<PlaneResource>> {
            Ok(self
                .planes
                .iter()
                .map(|&(id, _, _)| PlaneResource {
                    handle: plane::Handle::from(handle(id)),
                    possible_crtcs: 0x1,
                })
                .collect())
        }

        fn plane_properties(&self, plane: plane::Handle) -> io::Result<Vec<RawProperty>> {
            let &(id, kind, zpos) = self
                .planes
                .iter()
                .find(|&&(id, _, _)| u32::from(plane) == id)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            Ok(["FB_ID", "CRTC_ID", "type", "zpos"]
                .iter()
                .enumerate()
                .map(|(index, &name)| RawProperty {
                    name: name.to_owned(),
                    handle: property::Handle::from(handle(id * 16 + index as u32 + 1)),
                    value: match name {
                        "type" => kind as u64,
                        "zpos" => zpos,
                        _ => 0,
                    },
                })
                .collect())
        }

        fn test_commit(&self, _req: &AtomicRequest) -> io::Result<()> {
            Ok(())
        }
    }

    fn stub() -> StubKms {
        StubKms {
            planes: vec![
                (12, PlaneType::Cursor, 2),
                (11, PlaneType::Overlay, 1),
                (10, PlaneType::Primary, 0),
            ],
        }
    }

    #[test]
    fn planes_are_sorted_at_discovery() {
        let device = Device::new(stub()).unwrap();
        let order: Vec<u32> = device
            .planes()
            .map(|plane| plane.handle().into())
            .collect();
        assert_eq!(order, vec![10, 11, 12]);
    }

    #[test]
    fn one_output_per_crtc() {
        let mut device = Device::new(stub()).unwrap();
        let crtc = crtc::Handle::from(handle(1));
        device.create_output(crtc).unwrap();
        assert!(matches!(
            device.create_output(crtc),
            Err(Error::OutputExists(_))
        ));
        assert!(matches!(
            device.create_output(crtc::Handle::from(handle(9))),
            Err(Error::UnknownCrtc(_))
        ));
    }

    #[test]
    fn long_property_names_are_rejected() {
        let mut device = Device::new(stub()).unwrap();
        let output = device.create_output(crtc::Handle::from(handle(1))).unwrap();
        let layer = device.create_layer(output).unwrap();

        // the 32-byte kernel buffer includes the terminating NUL, so
        // 31 bytes of content fit and 32 do not
        let longest = "X".repeat(super::PROP_NAME_LEN - 1);
        assert!(device.set_layer_property(layer, &longest, 1).is_ok());

        let too_long = "X".repeat(super::PROP_NAME_LEN);
        assert!(matches!(
            device.set_layer_property(layer, &too_long, 1),
            Err(Error::InvalidPropertyName(_))
        ));
    }

    #[test]
    fn destroyed_handles_go_stale() {
        let mut device = Device::new(stub()).unwrap();
        let output = device.create_output(crtc::Handle::from(handle(1))).unwrap();
        let layer = device.create_layer(output).unwrap();
        device.destroy_layer(layer).unwrap();
        assert!(matches!(device.layer_plane(layer), Err(Error::DeadLayer)));

        device.destroy_output(output).unwrap();
        assert!(matches!(device.create_layer(output), Err(Error::DeadOutput)));
    }

    #[test]
    fn composition_layer_must_belong_to_the_output() {
        let mut device = Device::new(stub()).unwrap();
        let output = device.create_output(crtc::Handle::from(handle(1))).unwrap();
        let layer = device.create_layer(output).unwrap();
        device.destroy_layer(layer).unwrap();
        assert!(matches!(
            device.set_composition_layer(output, Some(layer)),
            Err(Error::DeadLayer)
        ));
    }

    #[test]
    fn priorities_rotate_once_per_period() {
        let mut device = Device::new(stub()).unwrap();
        let output = device.create_output(crtc::Handle::from(handle(1))).unwrap();
        let layer = device.create_layer(output).unwrap();
        for fb in 0..10 {
            device.set_layer_property(layer, "FB_ID", fb + 1).unwrap();
        }

        for _ in 0..PRIORITY_PERIOD - 1 {
            device.notify_page_flip();
        }
        assert_eq!(
            device.outputs[&output].layer(layer).unwrap().current_priority(),
            0
        );

        device.notify_page_flip();
        assert_eq!(
            device.outputs[&output].layer(layer).unwrap().current_priority(),
            10
        );

        // pending was reset by the rotation, so a quiet period demotes
        for _ in 0..PRIORITY_PERIOD {
            device.notify_page_flip();
        }
        assert_eq!(
            device.outputs[&output].layer(layer).unwrap().current_priority(),
            0
        );
    }
}
