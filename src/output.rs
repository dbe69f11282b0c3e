//! Outputs group the layers targeting one crtc.

use drm::control::{crtc, plane};
use indexmap::IndexMap;

use crate::layer::{Layer, LayerHandle};

/// Identifies an output created with [`Device::create_output`](crate::Device::create_output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle(pub(crate) u64);

/// A successful allocation, remembered so that unchanged frames replay
/// it without a single test commit.
#[derive(Debug, Clone)]
pub(crate) struct CachedAllocation {
    /// Every candidate plane of the output, in allocation order.
    pub entries: Vec<(plane::Handle, Option<LayerHandle>)>,
}

#[derive(Debug)]
pub(crate) struct Output {
    crtc: crtc::Handle,
    crtc_index: usize,
    layers: IndexMap<LayerHandle, Layer>,
    composition_layer: Option<LayerHandle>,
    layers_changed: bool,
    alloc_reused: u64,
    cache: Option<CachedAllocation>,
}

impl Output {
    pub(crate) fn new(crtc: crtc::Handle, crtc_index: usize) -> Self {
        Output {
            crtc,
            crtc_index,
            layers: IndexMap::new(),
            composition_layer: None,
            layers_changed: false,
            alloc_reused: 0,
            cache: None,
        }
    }

    pub(crate) fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    pub(crate) fn crtc_index(&self) -> usize {
        self.crtc_index
    }

    pub(crate) fn layers(&self) -> &IndexMap<LayerHandle, Layer> {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut IndexMap<LayerHandle, Layer> {
        &mut self.layers
    }

    pub(crate) fn layer(&self, handle: LayerHandle) -> Option<&Layer> {
        self.layers.get(&handle)
    }

    pub(crate) fn layer_mut(&mut self, handle: LayerHandle) -> Option<&mut Layer> {
        self.layers.get_mut(&handle)
    }

    pub(crate) fn insert_layer(&mut self, handle: LayerHandle) {
        self.layers.insert(handle, Layer::new());
        self.layers_changed = true;
    }

    pub(crate) fn remove_layer(&mut self, handle: LayerHandle) {
        if self.layers.shift_remove(&handle).is_some() {
            if self.composition_layer == Some(handle) {
                self.composition_layer = None;
            }
            self.layers_changed = true;
        }
    }

    pub(crate) fn composition_layer(&self) -> Option<LayerHandle> {
        self.composition_layer
    }

    pub(crate) fn set_composition_layer(&mut self, layer: Option<LayerHandle>) {
        if self.composition_layer != layer {
            self.composition_layer = layer;
            self.layers_changed = true;
        }
    }

    pub(crate) fn clear_layers_changed(&mut self) {
        self.layers_changed = false;
    }

    /// The previous allocation, if nothing that could influence it has
    /// changed since it was computed.
    pub(crate) fn reusable_allocation(&self) -> Option<&CachedAllocation> {
        if self.layers_changed {
            return None;
        }
        if self.layers.values().any(|layer| layer.changed()) {
            return None;
        }
        self.cache.as_ref()
    }

    pub(crate) fn store_allocation(&mut self, cache: CachedAllocation) {
        self.cache = Some(cache);
    }

    pub(crate) fn note_reuse(&mut self) {
        self.alloc_reused += 1;
    }

    pub(crate) fn alloc_reused(&self) -> u64 {
        self.alloc_reused
    }
}
