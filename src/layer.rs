//! Client layers, their geometry and the priority model.

use drm::control::plane;
use tracing::trace;

use crate::property::{CoreProperty, LayerProperty, CORE_PROPERTY_COUNT};

/// Identifies a layer created with [`Device::create_layer`](crate::Device::create_layer).
///
/// Handles are never reused; operations on a destroyed layer fail
/// instead of touching unrelated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(pub(crate) u64);

/// Number of page flips over which pending priority accumulates before
/// it is promoted.
///
/// A layer that updates on every flip of a period ends up with the
/// maximum priority and is offered the best planes first; layers that
/// rarely change drift towards composition.
pub const PRIORITY_PERIOD: u64 = 60;

/// Axis-aligned region a layer occupies on the crtc, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub(crate) fn intersects(&self, other: &Rect) -> bool {
        let (ax1, ay1) = (i64::from(self.x), i64::from(self.y));
        let (ax2, ay2) = (ax1 + i64::from(self.width), ay1 + i64::from(self.height));
        let (bx1, by1) = (i64::from(other.x), i64::from(other.y));
        let (bx2, by2) = (bx1 + i64::from(other.width), by1 + i64::from(other.height));
        ax1 < bx2 && bx1 < ax2 && ay1 < by2 && by1 < ay2
    }
}

#[derive(Debug)]
pub(crate) struct Layer {
    props: Vec<LayerProperty>,
    core: [Option<usize>; CORE_PROPERTY_COUNT],
    force_composition: bool,
    changed: bool,
    current_priority: u64,
    pending_priority: u64,
    plane: Option<plane::Handle>,
}

impl Layer {
    pub(crate) fn new() -> Self {
        Layer {
            props: Vec::new(),
            core: [None; CORE_PROPERTY_COUNT],
            force_composition: false,
            changed: false,
            current_priority: 0,
            pending_priority: 0,
            plane: None,
        }
    }

    /// Records a property value.
    ///
    /// Writing the value already stored is a no-op, so steady-state
    /// clients that re-stamp every frame keep their cached allocation.
    pub(crate) fn set_property(&mut self, name: &str, value: u64) {
        match self.props.iter_mut().find(|prop| prop.name == name) {
            Some(prop) if prop.value == value => {}
            Some(prop) => {
                prop.prev_value = prop.value;
                prop.value = value;
                trace!("layer property {}: {} -> {}", prop.name, prop.prev_value, value);
                self.changed = true;
                self.update_priority(false);
            }
            None => {
                if let Some(core) = CoreProperty::from_name(name) {
                    self.core[core.index()] = Some(self.props.len());
                }
                self.props.push(LayerProperty {
                    name: name.to_owned(),
                    value,
                    prev_value: value,
                });
                self.changed = true;
                self.update_priority(false);
            }
        }
    }

    pub(crate) fn properties(&self) -> impl Iterator<Item = &LayerProperty> {
        self.props.iter()
    }

    pub(crate) fn core_value(&self, prop: CoreProperty) -> Option<u64> {
        self.core[prop.index()].map(|index| self.props[index].value)
    }

    /// The region the layer covers, from CRTC_{X,Y,W,H}. Missing
    /// components default to zero.
    pub(crate) fn rect(&self) -> Rect {
        Rect {
            x: self.core_value(CoreProperty::CrtcX).unwrap_or(0) as i32,
            y: self.core_value(CoreProperty::CrtcY).unwrap_or(0) as i32,
            width: self.core_value(CoreProperty::CrtcW).unwrap_or(0) as i32,
            height: self.core_value(CoreProperty::CrtcH).unwrap_or(0) as i32,
        }
    }

    pub(crate) fn zpos(&self) -> i64 {
        self.core_value(CoreProperty::Zpos).unwrap_or(0) as i64
    }

    pub(crate) fn has_fb(&self) -> bool {
        self.core_value(CoreProperty::FbId)
            .map(|fb| fb != 0)
            .unwrap_or(false)
    }

    /// Only layers that actually scan out pixels compete for planes.
    pub(crate) fn is_visible(&self) -> bool {
        let rect = self.rect();
        rect.width > 0 && rect.height > 0 && self.has_fb()
    }

    pub(crate) fn force_composition(&self) -> bool {
        self.force_composition
    }

    pub(crate) fn set_force_composition(&mut self, force: bool) {
        if self.force_composition != force {
            self.force_composition = force;
            self.changed = true;
        }
    }

    pub(crate) fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn current_priority(&self) -> u64 {
        self.current_priority
    }

    pub(crate) fn plane(&self) -> Option<plane::Handle> {
        self.plane
    }

    pub(crate) fn set_plane(&mut self, plane: Option<plane::Handle>) {
        self.plane = plane;
    }

    /// With `make_current` the pending priority is promoted immediately
    /// and starts a new period for this layer; otherwise one update is
    /// accumulated, capped at [`PRIORITY_PERIOD`].
    pub(crate) fn update_priority(&mut self, make_current: bool) {
        if make_current {
            self.current_priority = self.pending_priority;
            self.pending_priority = 0;
        } else {
            self.pending_priority = (self.pending_priority + 1).min(PRIORITY_PERIOD);
        }
    }

    /// Resets change tracking after a successful apply.
    pub(crate) fn mark_clean(&mut self) {
        self.changed = false;
        for prop in &mut self.props {
            prop.prev_value = prop.value;
        }
    }
}
