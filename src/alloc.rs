//! The plane allocation search.
//!
//! For one output, walk the candidate planes in scanout order and try
//! every priority-ordered layer on each of them, validating each partial
//! assignment with a TEST_ONLY commit and backtracking over rejections.
//! The baseline (every candidate plane disabled, every layer composited)
//! is validated once up front; after that each probe covers a fully
//! specified plane set, so no stale kernel plane state can skew a
//! verdict.

use std::collections::HashSet;

use drm::control::{crtc, plane, PlaneType};
use tracing::{debug, trace};

use crate::device::AtomicDevice;
use crate::error::Error;
use crate::layer::{Layer, LayerHandle, Rect};
use crate::output::{CachedAllocation, Output, OutputHandle};
use crate::plane::Plane;
use crate::request::AtomicRequest;

/// Upper bound on TEST_ONLY probes per output per apply. Counted, not
/// timed: the same inputs must always explore the same branches.
const TEST_COMMIT_BUDGET: u32 = 1024;

struct Candidate<'a> {
    handle: LayerHandle,
    layer: &'a Layer,
    rect: Rect,
    zpos: i64,
    weight: u64,
}

pub(crate) fn allocate_output<D: AtomicDevice>(
    drm: &D,
    planes: &[Plane],
    claimed: &mut HashSet<plane::Handle>,
    handle: OutputHandle,
    output: &mut Output,
    req: &mut AtomicRequest,
    test_counter: &mut u64,
) -> Result<(), Error> {
    let crtc = output.crtc();
    let candidates: Vec<&Plane> = planes
        .iter()
        .filter(|plane| plane.supports_crtc_index(output.crtc_index()))
        .filter(|plane| !claimed.contains(&plane.handle()))
        .collect();

    // Steady state: if nothing changed since the last apply, replay the
    // cached allocation without probing the kernel at all.
    let reusable = match output.reusable_allocation() {
        Some(cache)
            if !cache
                .entries
                .iter()
                .any(|(plane, slot)| slot.is_some() && claimed.contains(plane)) =>
        {
            Some(cache.entries.clone())
        }
        Some(_) => {
            trace!(
                "allocation for crtc {:?} was claimed by another output, searching again",
                crtc
            );
            None
        }
        None => None,
    };
    if let Some(entries) = reusable {
        for (plane_handle, slot) in &entries {
            let Some(plane) = planes.iter().find(|plane| plane.handle() == *plane_handle) else {
                continue;
            };
            match slot {
                Some(layer_handle) => {
                    if let Some(layer) = output.layer(*layer_handle) {
                        plane.apply_to(layer, crtc, req);
                        claimed.insert(*plane_handle);
                    }
                }
                None => {
                    if !claimed.contains(plane_handle) {
                        plane.disable(req);
                    }
                }
            }
        }
        output.note_reuse();
        debug!("reused previous plane allocation for crtc {:?}", crtc);
        return Ok(());
    }

    // Baseline: every candidate plane off, every layer composited. This
    // is always the fallback result, and it doubles as a sanity check of
    // whatever the caller already stamped into the request.
    for plane in &candidates {
        plane.disable(req);
    }
    *test_counter += 1;
    if let Err(source) = drm.test_commit(req) {
        return Err(Error::TestFailed { crtc, source });
    }

    // Layers competing for planes, best priority first. The sort is
    // stable, so layers created earlier win ties.
    let mut layers: Vec<Candidate<'_>> = output
        .layers()
        .iter()
        .filter(|(_, layer)| layer.is_visible() && !layer.force_composition())
        .map(|(&handle, layer)| Candidate {
            handle,
            layer,
            rect: layer.rect(),
            zpos: layer.zpos(),
            weight: layer.current_priority() + 1,
        })
        .collect();
    layers.sort_by(|a, b| b.weight.cmp(&a.weight));

    let composition = output
        .composition_layer()
        .and_then(|comp| layers.iter().position(|cand| cand.handle == comp));
    let max_score = layers.iter().map(|cand| cand.weight).sum();

    let mut search = Search {
        drm,
        crtc,
        planes: &candidates,
        layers: &layers,
        composition,
        assignment: vec![None; candidates.len()],
        taken: vec![false; layers.len()],
        best: vec![None; candidates.len()],
        best_score: 0,
        best_inversions: 0,
        max_score,
        probes: 0,
        test_counter,
    };
    search.walk(0, 0, req);
    let (best, best_score, probes) = (search.best, search.best_score, search.probes);

    debug!(
        "output {:?} (crtc {:?}): {} of {} layers on planes, score {}, {} probes",
        handle,
        crtc,
        best.iter().flatten().count(),
        layers.len(),
        best_score,
        probes,
    );

    // Emission: overwrite the baseline for every winning plane.
    let mut entries = Vec::with_capacity(candidates.len());
    for (position, slot) in best.iter().enumerate() {
        let plane = candidates[position];
        match slot {
            Some(layer_position) => {
                let cand = &layers[*layer_position];
                plane.apply_to(cand.layer, crtc, req);
                claimed.insert(plane.handle());
                entries.push((plane.handle(), Some(cand.handle)));
            }
            None => entries.push((plane.handle(), None)),
        }
    }

    // Bookkeeping: assignment pointers, clean flags, the reuse cache.
    let assigned: Vec<(LayerHandle, plane::Handle)> = entries
        .iter()
        .filter_map(|&(plane, slot)| slot.map(|layer| (layer, plane)))
        .collect();
    for (layer_handle, layer) in output.layers_mut().iter_mut() {
        let plane = assigned
            .iter()
            .find(|(candidate, _)| candidate == layer_handle)
            .map(|&(_, plane)| plane);
        layer.set_plane(plane);
        layer.mark_clean();
    }
    output.clear_layers_changed();
    output.store_allocation(CachedAllocation { entries });

    Ok(())
}

struct Search<'a, D: AtomicDevice> {
    drm: &'a D,
    crtc: crtc::Handle,
    planes: &'a [&'a Plane],
    layers: &'a [Candidate<'a>],
    /// Position of the composition layer in `layers`, if one is set and
    /// eligible. It is pinned to primary planes.
    composition: Option<usize>,
    assignment: Vec<Option<usize>>,
    taken: Vec<bool>,
    best: Vec<Option<usize>>,
    best_score: u64,
    best_inversions: u32,
    max_score: u64,
    probes: u32,
    test_counter: &'a mut u64,
}

impl<D: AtomicDevice> Search<'_, D> {
    fn walk(&mut self, position: usize, score: u64, req: &mut AtomicRequest) {
        // An assignment covering every layer cannot be improved on.
        if self.max_score > 0 && self.best_score == self.max_score {
            return;
        }
        if position == self.planes.len() {
            let inversions = self.inversions();
            if score > self.best_score
                || (score == self.best_score && inversions < self.best_inversions)
            {
                trace!(
                    "crtc {:?}: new best assignment, score {}, {} z-inversions",
                    self.crtc,
                    score,
                    inversions
                );
                self.best.clone_from(&self.assignment);
                self.best_score = score;
                self.best_inversions = inversions;
            }
            return;
        }
        if !self.worth_descending(position, score) {
            return;
        }

        let planes = self.planes;
        let layers = self.layers;
        let plane = planes[position];

        for layer_position in 0..layers.len() {
            if self.probes >= TEST_COMMIT_BUDGET {
                trace!("crtc {:?}: test commit budget exhausted", self.crtc);
                break;
            }
            if self.taken[layer_position] {
                continue;
            }
            // The composition layer owns the primary plane while it is
            // set; everything else competes for the rest.
            match self.composition {
                Some(comp) if plane.kind() == PlaneType::Primary => {
                    if layer_position != comp {
                        continue;
                    }
                }
                Some(comp) => {
                    if layer_position == comp {
                        continue;
                    }
                }
                None => {}
            }
            let cand = &layers[layer_position];
            if !self.stacking_allows(position, layer_position) {
                trace!(
                    "crtc {:?}: plane {:?} skipped for layer {:?}, would invert overlapping layers",
                    self.crtc,
                    plane.handle(),
                    cand.handle
                );
                continue;
            }

            let saved = req.clone();
            plane.apply_to(cand.layer, self.crtc, req);
            self.probes += 1;
            *self.test_counter += 1;
            match self.drm.test_commit(req) {
                Ok(()) => {
                    trace!(
                        "crtc {:?}: layer {:?} accepted on plane {:?}",
                        self.crtc,
                        cand.handle,
                        plane.handle()
                    );
                    self.assignment[position] = Some(layer_position);
                    self.taken[layer_position] = true;
                    self.walk(position + 1, score + cand.weight, req);
                    self.taken[layer_position] = false;
                    self.assignment[position] = None;
                }
                Err(err) => {
                    trace!(
                        "crtc {:?}: test-only commit rejected layer {:?} on plane {:?}: {}",
                        self.crtc,
                        cand.handle,
                        plane.handle(),
                        err
                    );
                }
            }
            *req = saved;
            if self.max_score > 0 && self.best_score == self.max_score {
                return;
            }
        }

        // Leaving the plane unused is always locally valid; the baseline
        // already stamped it disabled.
        self.walk(position + 1, score, req);
    }

    /// Whether this branch can still strictly beat the best assignment,
    /// or tie it with a chance of fewer z-inversions.
    fn worth_descending(&self, position: usize, score: u64) -> bool {
        let mut bound = score;
        let mut slots = self.planes.len() - position;
        for (layer_position, cand) in self.layers.iter().enumerate() {
            if slots == 0 {
                break;
            }
            if self.taken[layer_position] {
                continue;
            }
            bound += cand.weight;
            slots -= 1;
        }
        if bound < self.best_score {
            return false;
        }
        bound > self.best_score || self.best_inversions > 0
    }

    /// Two overlapping layers must keep their stacking order on planes:
    /// the plane walked earlier scans out underneath.
    fn stacking_allows(&self, position: usize, layer_position: usize) -> bool {
        let cand = &self.layers[layer_position];
        for (other_position, slot) in self.assignment.iter().enumerate() {
            let Some(other_layer) = slot else { continue };
            let other = &self.layers[*other_layer];
            if !cand.rect.intersects(&other.rect) {
                continue;
            }
            if other_position < position && cand.zpos < other.zpos {
                return false;
            }
            if other_position > position && cand.zpos > other.zpos {
                return false;
            }
        }
        true
    }

    /// Assigned layer pairs whose zpos order disagrees with their plane
    /// order. Used as a tie-break between equal-score assignments.
    fn inversions(&self) -> u32 {
        let mut count = 0;
        for (upper_position, upper_slot) in self.assignment.iter().enumerate() {
            let Some(upper) = upper_slot else { continue };
            for lower_slot in &self.assignment[..upper_position] {
                let Some(lower) = lower_slot else { continue };
                if self.layers[*lower].zpos > self.layers[*upper].zpos {
                    count += 1;
                }
            }
        }
        count
    }
}
