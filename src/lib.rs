#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # skylift
//!
//! Maps client-side layers onto the hardware planes of a DRM/KMS atomic
//! display controller.
//!
//! A display controller exposes a fixed set of scanout planes per crtc.
//! Putting a client buffer on a plane means the hardware composes it for
//! free, but whether a particular combination of framebuffers, positions
//! and formats works is something only the kernel can answer, through
//! atomic TEST_ONLY commits. This crate runs that negotiation: clients
//! describe what they want shown as [`Device`] outputs and layers, call
//! [`Device::apply`], and get back an atomic request carrying the best
//! plane assignment the kernel accepted. Layers that did not fit report
//! no plane and are the client's to composite, typically into a
//! designated composition layer.
//!
//! Steady-state frames reuse the previous allocation without issuing a
//! single test commit, and layers that update frequently accumulate
//! priority over a page-flip period so they end up on the planes that
//! matter.
//!
//! ```no_run
//! use std::fs::{File, OpenOptions};
//! use std::os::unix::io::{AsFd, BorrowedFd};
//!
//! use drm::control::Device as ControlDevice;
//! use drm::Device as DrmDevice;
//! use skylift::{AtomicRequest, Device};
//!
//! struct Card(File);
//!
//! impl AsFd for Card {
//!     fn as_fd(&self) -> BorrowedFd<'_> {
//!         self.0.as_fd()
//!     }
//! }
//! impl DrmDevice for Card {}
//! impl ControlDevice for Card {}
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let card = Card(OpenOptions::new().read(true).write(true).open("/dev/dri/card0")?);
//! card.set_client_capability(drm::ClientCapability::UniversalPlanes, true)?;
//! card.set_client_capability(drm::ClientCapability::Atomic, true)?;
//!
//! let mut device = Device::new(card)?;
//! let crtc = device.drm().resource_handles()?.crtcs()[0];
//! let output = device.create_output(crtc)?;
//!
//! let layer = device.create_layer(output)?;
//! device.set_layer_property(layer, "FB_ID", 42)?;
//! device.set_layer_property(layer, "CRTC_W", 1920)?;
//! device.set_layer_property(layer, "CRTC_H", 1080)?;
//! device.set_layer_property(layer, "SRC_W", 1920 << 16)?;
//! device.set_layer_property(layer, "SRC_H", 1080 << 16)?;
//!
//! let mut req = AtomicRequest::new();
//! device.apply(&mut req)?;
//! device
//!     .drm()
//!     .atomic_commit(drm::control::AtomicCommitFlags::NONBLOCK, req.build())?;
//!
//! if device.layer_plane(layer)?.is_none() {
//!     // composite this layer yourself
//! }
//! # Ok(())
//! # }
//! ```

mod alloc;
mod device;
mod error;
mod layer;
mod output;
mod plane;
mod property;
mod request;

pub use device::{AtomicDevice, Device, PlaneResource, RawProperty};
pub use error::Error;
pub use layer::{LayerHandle, PRIORITY_PERIOD};
pub use output::OutputHandle;
pub use plane::Plane;
pub use request::AtomicRequest;

/// Re-exports of crates that appear in the public API.
pub mod reexports {
    pub use drm;
}
