use std::io;

use drm::control::{crtc, plane};

/// Errors reported by this crate.
///
/// TEST_ONLY rejections encountered while probing candidate assignments
/// are not errors; the allocator backtracks over them. [`Error::TestFailed`]
/// is reported only when even the assignment that puts every layer into
/// composition is rejected, which points at a broken request or device
/// state outside this library's control.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading resources or properties from the drm device failed.
    #[error("error accessing the drm device ({errmsg}): {source}")]
    Access {
        /// Description of the access that failed.
        errmsg: &'static str,
        /// Underlying kernel error.
        source: io::Error,
    },
    /// A property name exceeds `DRM_PROP_NAME_LEN`.
    #[error("property name `{0}` exceeds DRM_PROP_NAME_LEN")]
    InvalidPropertyName(String),
    /// A plane does not expose a property the allocator requires.
    #[error("plane {handle:?} does not expose the {name} property")]
    UnknownProperty {
        /// The plane missing the property.
        handle: plane::Handle,
        /// Name of the missing property.
        name: &'static str,
    },
    /// The crtc is not exposed by this device.
    #[error("crtc {0:?} is not exposed by this device")]
    UnknownCrtc(crtc::Handle),
    /// An output already drives this crtc.
    #[error("an output already drives crtc {0:?}")]
    OutputExists(crtc::Handle),
    /// The output handle refers to a destroyed output.
    #[error("output was destroyed or belongs to another device")]
    DeadOutput,
    /// The layer handle refers to a destroyed layer.
    #[error("layer was destroyed or belongs to another device")]
    DeadLayer,
    /// The layer belongs to a different output.
    #[error("layer does not belong to this output")]
    ForeignLayer,
    /// Not even the all-composited assignment passed the atomic test.
    #[error("no plane configuration for crtc {crtc:?} passed the atomic test: {source}")]
    TestFailed {
        /// The crtc being configured.
        crtc: crtc::Handle,
        /// Error returned for the rejected baseline commit.
        source: io::Error,
    },
}
