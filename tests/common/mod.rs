//! A scriptable stand-in for the kernel side of the atomic interface.
//!
//! The mock knows its crtcs and planes, hands out deterministic property
//! ids, and judges test commits with a few simple rules: an enabled
//! plane needs a known crtc and a framebuffer, and individual
//! (plane, framebuffer) pairs can be declared unacceptable, which is how
//! format rejections look from this side of the ioctl.

use std::io;
use std::num::NonZeroU32;

use drm::control::{crtc, plane, property, PlaneType};
use skylift::{AtomicDevice, AtomicRequest, PlaneResource, RawProperty};

const PROPERTY_NAMES: [&str; 14] = [
    "type", "zpos", "FB_ID", "CRTC_ID", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H", "SRC_X", "SRC_Y",
    "SRC_W", "SRC_H", "alpha", "rotation",
];

fn raw(id: u32) -> NonZeroU32 {
    NonZeroU32::new(id).expect("ids are non-zero")
}

pub fn crtc_handle(id: u32) -> crtc::Handle {
    crtc::Handle::from(raw(id))
}

pub fn plane_handle(id: u32) -> plane::Handle {
    plane::Handle::from(raw(id))
}

pub struct MockPlane {
    handle: plane::Handle,
    possible_crtcs: u32,
    kind: PlaneType,
    zpos: u64,
}

#[derive(Default)]
pub struct MockKms {
    crtcs: Vec<crtc::Handle>,
    planes: Vec<MockPlane>,
    rejected_fbs: Vec<(plane::Handle, u64)>,
    reject_everything: bool,
}

impl MockKms {
    pub fn new(crtcs: &[u32]) -> Self {
        MockKms {
            crtcs: crtcs.iter().map(|&id| crtc_handle(id)).collect(),
            ..Default::default()
        }
    }

    pub fn with_plane(mut self, id: u32, kind: PlaneType, zpos: u64, possible_crtcs: u32) -> Self {
        self.planes.push(MockPlane {
            handle: plane_handle(id),
            possible_crtcs,
            kind,
            zpos,
        });
        self
    }

    /// Every test commit putting `fb` on `plane` fails.
    pub fn with_rejected_fb(mut self, plane: u32, fb: u64) -> Self {
        self.rejected_fbs.push((plane_handle(plane), fb));
        self
    }

    /// Every test commit fails, as if the request were broken before the
    /// allocator touched it.
    pub fn with_everything_rejected(mut self) -> Self {
        self.reject_everything = true;
        self
    }

    /// The property id the mock assigned to `name` on `plane`, for
    /// request introspection in tests.
    pub fn prop(&self, plane: plane::Handle, name: &str) -> property::Handle {
        let index = PROPERTY_NAMES
            .iter()
            .position(|&candidate| candidate == name)
            .expect("known property name");
        property::Handle::from(raw(u32::from(plane) * 64 + index as u32 + 1))
    }
}

impl AtomicDevice for MockKms {
    fn crtc_handles(&self) -> io::Result<Vec<crtc::Handle>> {
        Ok(self.crtcs.clone())
    }

    fn plane_resources(&self) -> io::Result<Vec<PlaneResource>> {
        Ok(self
            .planes
            .iter()
            .map(|plane| PlaneResource {
                handle: plane.handle,
                possible_crtcs: plane.possible_crtcs,
            })
            .collect())
    }

    fn plane_properties(&self, plane: plane::Handle) -> io::Result<Vec<RawProperty>> {
        let mock = self
            .planes
            .iter()
            .find(|candidate| candidate.handle == plane)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(PROPERTY_NAMES
            .iter()
            .map(|&name| RawProperty {
                name: name.to_owned(),
                handle: self.prop(plane, name),
                value: match name {
                    "type" => mock.kind as u64,
                    "zpos" => mock.zpos,
                    _ => 0,
                },
            })
            .collect())
    }

    fn test_commit(&self, req: &AtomicRequest) -> io::Result<()> {
        if self.reject_everything {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        for mock in &self.planes {
            let crtc_id = req.get(mock.handle, self.prop(mock.handle, "CRTC_ID"));
            let fb_id = req.get(mock.handle, self.prop(mock.handle, "FB_ID"));
            let Some(crtc_id) = crtc_id else { continue };
            if crtc_id == 0 {
                continue;
            }
            if !self
                .crtcs
                .iter()
                .any(|&crtc| u64::from(u32::from(crtc)) == crtc_id)
            {
                return Err(io::Error::from(io::ErrorKind::InvalidInput));
            }
            match fb_id {
                Some(fb) if fb != 0 => {
                    if self
                        .rejected_fbs
                        .iter()
                        .any(|&(plane, rejected)| plane == mock.handle && rejected == fb)
                    {
                        return Err(io::Error::from(io::ErrorKind::InvalidInput));
                    }
                }
                _ => return Err(io::Error::from(io::ErrorKind::InvalidInput)),
            }
        }
        Ok(())
    }
}
