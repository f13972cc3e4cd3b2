//! Edge reservations of layer surfaces on one output.
//!
//! Entries are kept in priority order: higher layers first, and within a
//! layer in the order they were mapped. [`compute`] walks that list and carves
//! the reservations out of the output rectangle. It is pure, so the arbiter
//! can evaluate a reorder on a scratch copy before accepting it.

use stratum_core::ExclusiveZonePolicy;
use thiserror::Error;

use crate::geometry::Rectangle;
use crate::role::layer::{Edge, Layer, Margins};
use crate::surface::SurfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusiveZoneEntry {
    pub surface: SurfaceId,
    pub layer: Layer,
    /// `None` contributes nothing.
    pub edge: Option<Edge>,
    pub size: i32,
    /// Margin of the layer surface on `edge`, reserved together with `size`.
    pub margin: i32,
}

impl ExclusiveZoneEntry {
    fn reservation(&self) -> Option<(Edge, i32)> {
        match self.edge {
            Some(edge) if self.size > 0 => Some((edge, self.size + self.margin.max(0))),
            _ => None,
        }
    }
}

/// Result of an arbitration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusiveZones {
    pub usable: Rectangle,
    /// Cumulative reservation per edge.
    pub margins: Margins,
    /// Area each entry is placed in, in list order.
    pub available: Vec<(SurfaceId, Rectangle)>,
}

impl ExclusiveZones {
    /// Area `surface` is placed in. Surfaces without an entry use the usable area.
    pub fn available_for(&self, surface: SurfaceId) -> Rectangle {
        self.available
            .iter()
            .find(|(id, _)| *id == surface)
            .map(|(_, rect)| *rect)
            .unwrap_or(self.usable)
    }
}

fn shrink(output: Rectangle, margins: &Margins) -> Rectangle {
    let x = output.x + margins.left;
    let y = output.y + margins.top;
    let width = (output.width - margins.left - margins.right).max(0);
    let height = (output.height - margins.top - margins.bottom).max(0);
    Rectangle::new(x, y, width, height)
}

/// Carves the reservations of `entries` out of `output`.
///
/// A positive entry is placed in the area left by the entries before it and
/// then reserves its strip. Zero-size entries are placed in the final usable
/// area; negative ones in the whole output. With
/// [`ExclusiveZonePolicy::HighestPriority`] only the first positive entry on
/// an edge reserves; later ones on that edge are placed but reserve nothing.
pub fn compute(output: Rectangle, entries: &[ExclusiveZoneEntry], policy: ExclusiveZonePolicy) -> ExclusiveZones {
    let mut margins = Margins::default();
    let mut claimed = [false; 4];
    let mut placed = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some((edge, amount)) = entry.reservation() else {
            continue;
        };
        placed.push((entry.surface, shrink(output, &margins)));
        let slot = edge as usize;
        if claimed[slot] && policy == ExclusiveZonePolicy::HighestPriority {
            continue;
        }
        claimed[slot] = true;
        *margins.on_mut(edge) += amount;
    }

    let usable = shrink(output, &margins);
    let mut available = Vec::with_capacity(entries.len());
    for entry in entries {
        let rect = if entry.reservation().is_some() {
            placed
                .iter()
                .find(|(id, _)| *id == entry.surface)
                .map(|(_, rect)| *rect)
                .unwrap_or(usable)
        } else if entry.size < 0 {
            output
        } else {
            usable
        };
        available.push((entry.surface, rect));
    }

    ExclusiveZones { usable, margins, available }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExclusiveZoneError {
    #[error("{0} has no exclusive zone entry")]
    UnknownEntry(SurfaceId),

    #[error("moving {surface} to position {index} would break layer ordering")]
    PriorityViolation { surface: SurfaceId, index: usize },

    #[error("moving {surface} to position {index} would leave no usable area")]
    NoUsableArea { surface: SurfaceId, index: usize },
}

/// Ordered exclusive-zone entries of one output and their last arbitration.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveZoneArbiter {
    policy: ExclusiveZonePolicy,
    entries: Vec<ExclusiveZoneEntry>,
    output: Rectangle,
    zones: ExclusiveZones,
}

impl ExclusiveZoneArbiter {
    pub fn new(policy: ExclusiveZonePolicy) -> Self {
        Self { policy, ..Default::default() }
    }

    pub fn policy(&self) -> ExclusiveZonePolicy {
        self.policy
    }

    pub fn entries(&self) -> &[ExclusiveZoneEntry] {
        &self.entries
    }

    pub fn zones(&self) -> &ExclusiveZones {
        &self.zones
    }

    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.entries.iter().any(|e| e.surface == surface)
    }

    fn index_of(&self, surface: SurfaceId) -> Option<usize> {
        self.entries.iter().position(|e| e.surface == surface)
    }

    /// Adds an entry behind every entry of the same or a higher layer.
    pub fn insert(&mut self, entry: ExclusiveZoneEntry) {
        if let Some(index) = self.index_of(entry.surface) {
            self.entries.remove(index);
        }
        let index = self
            .entries
            .iter()
            .rposition(|e| e.layer >= entry.layer)
            .map_or(0, |i| i + 1);
        self.entries.insert(index, entry);
    }

    /// Replaces an entry's contribution, keeping its position unless its layer
    /// changed. Returns whether anything changed.
    pub fn update(&mut self, entry: ExclusiveZoneEntry) -> bool {
        match self.index_of(entry.surface) {
            Some(index) if self.entries[index] == entry => false,
            Some(index) if self.entries[index].layer == entry.layer => {
                self.entries[index] = entry;
                true
            }
            _ => {
                self.insert(entry);
                true
            }
        }
    }

    pub fn remove(&mut self, surface: SurfaceId) -> bool {
        match self.index_of(surface) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Moves an entry to `index` after checking the result on a scratch copy.
    pub fn reorder(&mut self, surface: SurfaceId, index: usize) -> Result<(), ExclusiveZoneError> {
        let from = self.index_of(surface).ok_or(ExclusiveZoneError::UnknownEntry(surface))?;
        let mut candidate = self.entries.clone();
        let entry = candidate.remove(from);
        let index = index.min(candidate.len());
        candidate.insert(index, entry);

        if candidate.windows(2).any(|pair| pair[0].layer < pair[1].layer) {
            return Err(ExclusiveZoneError::PriorityViolation { surface, index });
        }
        let speculative = compute(self.output, &candidate, self.policy);
        if !self.output.is_empty() && speculative.usable.is_empty() {
            return Err(ExclusiveZoneError::NoUsableArea { surface, index });
        }
        self.entries = candidate;
        self.zones = speculative;
        Ok(())
    }

    /// Re-runs the arbitration for `output`. Returns whether the usable area changed.
    pub fn recompute(&mut self, output: Rectangle) -> bool {
        self.output = output;
        let zones = compute(output, &self.entries, self.policy);
        let changed = zones.usable != self.zones.usable;
        if changed {
            tracing::debug!(usable = %zones.usable, entries = self.entries.len(), "Usable area changed");
        }
        self.zones = zones;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OUTPUT: Rectangle = Rectangle::new(0, 0, 800, 600);

    fn entry(index: u32, layer: Layer, edge: Edge, size: i32) -> ExclusiveZoneEntry {
        ExclusiveZoneEntry { surface: SurfaceId::new(index, 1), layer, edge: Some(edge), size, margin: 0 }
    }

    #[test]
    fn test_same_edge_highest_priority_wins() {
        let mut arbiter = ExclusiveZoneArbiter::new(ExclusiveZonePolicy::HighestPriority);
        arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
        arbiter.insert(entry(1, Layer::Top, Edge::Top, 30));
        arbiter.recompute(OUTPUT);
        assert_eq!(arbiter.zones().usable, Rectangle::new(0, 20, 800, 580));
        assert_eq!(arbiter.zones().margins.top, 20);
        assert_eq!(arbiter.zones().available_for(SurfaceId::new(1, 1)), Rectangle::new(0, 20, 800, 580));
    }

    #[test]
    fn test_accumulate_policy_stacks_same_edge() {
        let mut arbiter = ExclusiveZoneArbiter::new(ExclusiveZonePolicy::Accumulate);
        arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
        arbiter.insert(entry(1, Layer::Top, Edge::Top, 30));
        arbiter.recompute(OUTPUT);
        assert_eq!(arbiter.zones().usable, Rectangle::new(0, 50, 800, 550));
    }

    #[test]
    fn test_different_edges_both_reserve() {
        let mut arbiter = ExclusiveZoneArbiter::default();
        arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
        arbiter.insert(entry(1, Layer::Bottom, Edge::Left, 30));
        arbiter.recompute(OUTPUT);
        assert_eq!(arbiter.zones().usable, Rectangle::new(30, 20, 770, 580));
        assert_eq!(arbiter.zones().available_for(SurfaceId::new(1, 1)), Rectangle::new(0, 20, 800, 580));
    }

    #[test]
    fn test_adding_never_grows_and_removing_restores() {
        for policy in [ExclusiveZonePolicy::HighestPriority, ExclusiveZonePolicy::Accumulate] {
            let mut arbiter = ExclusiveZoneArbiter::new(policy);
            arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
            arbiter.recompute(OUTPUT);
            let before = arbiter.zones().usable;

            arbiter.insert(entry(1, Layer::Overlay, Edge::Top, 45));
            arbiter.recompute(OUTPUT);
            assert!(before.contains_rect(&arbiter.zones().usable));

            arbiter.remove(SurfaceId::new(1, 1));
            arbiter.recompute(OUTPUT);
            assert_eq!(arbiter.zones().usable, before);
        }
    }

    #[test]
    fn test_non_positive_entries_do_not_reserve() {
        let entries = [
            entry(0, Layer::Top, Edge::Top, 20),
            entry(1, Layer::Top, Edge::Bottom, 0),
            entry(2, Layer::Top, Edge::Left, -1),
        ];
        let zones = compute(OUTPUT, &entries, ExclusiveZonePolicy::HighestPriority);
        assert_eq!(zones.usable, Rectangle::new(0, 20, 800, 580));
        assert_eq!(zones.available_for(SurfaceId::new(1, 1)), zones.usable);
        assert_eq!(zones.available_for(SurfaceId::new(2, 1)), OUTPUT);
    }

    #[test]
    fn test_margin_is_reserved_with_size() {
        let mut e = entry(0, Layer::Top, Edge::Right, 40);
        e.margin = 10;
        let zones = compute(OUTPUT, &[e], ExclusiveZonePolicy::HighestPriority);
        assert_eq!(zones.usable, Rectangle::new(0, 0, 750, 600));
    }

    #[test]
    fn test_compute_is_idempotent() {
        let entries = [entry(0, Layer::Top, Edge::Top, 20), entry(1, Layer::Top, Edge::Left, 10)];
        let first = compute(OUTPUT, &entries, ExclusiveZonePolicy::HighestPriority);
        assert_eq!(compute(OUTPUT, &entries, ExclusiveZonePolicy::HighestPriority), first);
    }

    #[test]
    fn test_insert_orders_by_layer_then_arrival() {
        let mut arbiter = ExclusiveZoneArbiter::default();
        arbiter.insert(entry(0, Layer::Bottom, Edge::Top, 10));
        arbiter.insert(entry(1, Layer::Overlay, Edge::Top, 10));
        arbiter.insert(entry(2, Layer::Bottom, Edge::Top, 10));
        arbiter.insert(entry(3, Layer::Top, Edge::Top, 10));
        let order: Vec<u32> = arbiter.entries().iter().map(|e| e.surface.index() as u32).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_reorder_is_validated() {
        let mut arbiter = ExclusiveZoneArbiter::default();
        arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
        arbiter.insert(entry(1, Layer::Top, Edge::Top, 30));
        arbiter.insert(entry(2, Layer::Background, Edge::Left, 5));
        arbiter.recompute(OUTPUT);

        assert_eq!(
            arbiter.reorder(SurfaceId::new(2, 1), 0),
            Err(ExclusiveZoneError::PriorityViolation { surface: SurfaceId::new(2, 1), index: 0 })
        );
        assert_eq!(arbiter.entries()[2].surface, SurfaceId::new(2, 1));

        arbiter.reorder(SurfaceId::new(1, 1), 0).unwrap();
        assert_eq!(arbiter.zones().usable, Rectangle::new(5, 30, 795, 570));
        assert!(matches!(
            arbiter.reorder(SurfaceId::new(9, 1), 0),
            Err(ExclusiveZoneError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_reorder_rejects_empty_usable_area() {
        let mut arbiter = ExclusiveZoneArbiter::default();
        arbiter.insert(entry(0, Layer::Top, Edge::Top, 20));
        arbiter.insert(entry(1, Layer::Top, Edge::Top, 600));
        arbiter.recompute(OUTPUT);
        assert_eq!(arbiter.zones().usable, Rectangle::new(0, 20, 800, 580));

        assert_eq!(
            arbiter.reorder(SurfaceId::new(1, 1), 0),
            Err(ExclusiveZoneError::NoUsableArea { surface: SurfaceId::new(1, 1), index: 0 })
        );
        assert_eq!(arbiter.entries()[0].surface, SurfaceId::new(0, 1));
        assert_eq!(arbiter.zones().usable, Rectangle::new(0, 20, 800, 580));
    }
}
