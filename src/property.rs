//! The well-known KMS plane properties the allocator understands.

pub(crate) const CORE_PROPERTY_COUNT: usize = 13;

/// Plane properties with a fast path on layers and planes.
///
/// Everything outside this list is carried opaquely and left to the
/// kernel to validate. Keep [`CoreProperty::ALL`] in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreProperty {
    FbId,
    CrtcId,
    CrtcX,
    CrtcY,
    CrtcW,
    CrtcH,
    SrcX,
    SrcY,
    SrcW,
    SrcH,
    Zpos,
    Alpha,
    Rotation,
}

impl CoreProperty {
    pub(crate) const ALL: [CoreProperty; CORE_PROPERTY_COUNT] = [
        CoreProperty::FbId,
        CoreProperty::CrtcId,
        CoreProperty::CrtcX,
        CoreProperty::CrtcY,
        CoreProperty::CrtcW,
        CoreProperty::CrtcH,
        CoreProperty::SrcX,
        CoreProperty::SrcY,
        CoreProperty::SrcW,
        CoreProperty::SrcH,
        CoreProperty::Zpos,
        CoreProperty::Alpha,
        CoreProperty::Rotation,
    ];

    /// The property name as the kernel spells it.
    pub(crate) fn name(self) -> &'static str {
        match self {
            CoreProperty::FbId => "FB_ID",
            CoreProperty::CrtcId => "CRTC_ID",
            CoreProperty::CrtcX => "CRTC_X",
            CoreProperty::CrtcY => "CRTC_Y",
            CoreProperty::CrtcW => "CRTC_W",
            CoreProperty::CrtcH => "CRTC_H",
            CoreProperty::SrcX => "SRC_X",
            CoreProperty::SrcY => "SRC_Y",
            CoreProperty::SrcW => "SRC_W",
            CoreProperty::SrcH => "SRC_H",
            CoreProperty::Zpos => "zpos",
            CoreProperty::Alpha => "alpha",
            CoreProperty::Rotation => "rotation",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<CoreProperty> {
        Self::ALL.iter().copied().find(|prop| prop.name() == name)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A property value recorded on a layer.
#[derive(Debug, Clone)]
pub(crate) struct LayerProperty {
    pub name: String,
    pub value: u64,
    pub prev_value: u64,
}
