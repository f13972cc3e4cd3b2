//! Shell layer surfaces: panels, docks, wallpapers and overlays.
//!
//! A layer surface is bound to one output. Its anchors, margins and requested
//! size decide where the compositor places it inside the area the
//! exclusive-zone arbiter leaves available, and its exclusive zone reserves an
//! edge strip that other surfaces avoid.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::error::ProtocolError;
use crate::events::CompositorEvent;
use crate::geometry::{Point, Rectangle, Size};
use crate::output::OutputId;
use crate::seat::Serial;
use crate::surface::{CommitPreview, SurfaceId};

use super::{CommitReaction, RoleBehavior, RoleContext, RoleKind};

/// Stacking layer, bottom-most first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    #[default]
    Background,
    Bottom,
    Top,
    Overlay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeyboardInteractivity {
    #[default]
    None,
    Exclusive,
    OnDemand,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerAnchor: u32 {
        const TOP = 1;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

impl Edge {
    pub fn anchor(self) -> LayerAnchor {
        match self {
            Edge::Top => LayerAnchor::TOP,
            Edge::Bottom => LayerAnchor::BOTTOM,
            Edge::Left => LayerAnchor::LEFT,
            Edge::Right => LayerAnchor::RIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl Margins {
    pub const fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn on(&self, edge: Edge) -> i32 {
        match edge {
            Edge::Top => self.top,
            Edge::Bottom => self.bottom,
            Edge::Left => self.left,
            Edge::Right => self.right,
        }
    }

    pub(crate) fn on_mut(&mut self, edge: Edge) -> &mut i32 {
        match edge {
            Edge::Top => &mut self.top,
            Edge::Bottom => &mut self.bottom,
            Edge::Left => &mut self.left,
            Edge::Right => &mut self.right,
        }
    }
}

/// Double-buffered layer surface attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerState {
    pub layer: Layer,
    pub anchor: LayerAnchor,
    /// Positive reserves space, zero only avoids others, negative ignores
    /// every exclusive zone.
    pub exclusive_zone: i32,
    pub exclusive_edge: Option<Edge>,
    pub margin: Margins,
    pub keyboard_interactivity: KeyboardInteractivity,
    /// Zero on an axis stretches between the two anchored edges.
    pub size: Size,
}

impl LayerState {
    fn initial(layer: Layer) -> Self {
        Self { layer, ..Default::default() }
    }
}

/// Maps anchors to the one edge an exclusive zone applies to.
///
/// An explicit exclusive edge wins when it is anchored. Otherwise a single
/// anchored edge, or an edge anchored together with both perpendicular edges,
/// is the edge. Corners, opposite pairs and all four anchors have none.
pub fn edges_to_single_edge(anchor: LayerAnchor, exclusive_edge: Option<Edge>) -> Option<Edge> {
    if let Some(edge) = exclusive_edge.filter(|e| anchor.contains(e.anchor())) {
        return Some(edge);
    }
    let horizontal = LayerAnchor::LEFT | LayerAnchor::RIGHT;
    let vertical = LayerAnchor::TOP | LayerAnchor::BOTTOM;
    match anchor {
        a if a == LayerAnchor::TOP || a == LayerAnchor::TOP | horizontal => Some(Edge::Top),
        a if a == LayerAnchor::BOTTOM || a == LayerAnchor::BOTTOM | horizontal => Some(Edge::Bottom),
        a if a == LayerAnchor::LEFT || a == LayerAnchor::LEFT | vertical => Some(Edge::Left),
        a if a == LayerAnchor::RIGHT || a == LayerAnchor::RIGHT | vertical => Some(Edge::Right),
        _ => None,
    }
}

/// Places a layer surface. `usable` is the area the arbiter left for it; a
/// negative exclusive zone uses the whole `output` instead.
pub fn layer_geometry(state: &LayerState, output: Rectangle, usable: Rectangle) -> Rectangle {
    let bounds = if state.exclusive_zone < 0 { output } else { usable };
    let anchor = state.anchor;
    let margin = state.margin;

    let both_h = anchor.contains(LayerAnchor::LEFT | LayerAnchor::RIGHT);
    let width = if state.size.width == 0 && both_h {
        (bounds.width - margin.left - margin.right).max(0)
    } else {
        state.size.width
    };
    let x = if both_h {
        bounds.x + margin.left + (bounds.width - margin.left - margin.right - width) / 2
    } else if anchor.contains(LayerAnchor::LEFT) {
        bounds.x + margin.left
    } else if anchor.contains(LayerAnchor::RIGHT) {
        bounds.right() - margin.right - width
    } else {
        bounds.x + (bounds.width - width) / 2
    };

    let both_v = anchor.contains(LayerAnchor::TOP | LayerAnchor::BOTTOM);
    let height = if state.size.height == 0 && both_v {
        (bounds.height - margin.top - margin.bottom).max(0)
    } else {
        state.size.height
    };
    let y = if both_v {
        bounds.y + margin.top + (bounds.height - margin.top - margin.bottom - height) / 2
    } else if anchor.contains(LayerAnchor::TOP) {
        bounds.y + margin.top
    } else if anchor.contains(LayerAnchor::BOTTOM) {
        bounds.bottom() - margin.bottom - height
    } else {
        bounds.y + (bounds.height - height) / 2
    };

    Rectangle::new(x, y, width, height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerConfigure {
    pub serial: Serial,
    pub size: Size,
}

#[derive(Debug)]
pub struct LayerRole {
    output: OutputId,
    namespace: String,
    initial: LayerState,
    pending: LayerState,
    current: LayerState,
    pending_configures: VecDeque<LayerConfigure>,
    acked: Option<LayerConfigure>,
    ever_acked: bool,
    last_sent_size: Option<Size>,
    configured_size: Size,
    initialized: bool,
    had_buffer: bool,
    closed: bool,
    /// Output-relative placement from the last arrangement.
    geometry: Rectangle,
}

impl LayerRole {
    pub fn new(output: OutputId, layer: Layer, namespace: impl Into<String>) -> Self {
        let initial = LayerState::initial(layer);
        Self {
            output,
            namespace: namespace.into(),
            pending: initial.clone(),
            current: initial.clone(),
            initial,
            pending_configures: VecDeque::new(),
            acked: None,
            ever_acked: false,
            last_sent_size: None,
            configured_size: Size::default(),
            initialized: false,
            had_buffer: false,
            closed: false,
            geometry: Rectangle::default(),
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> &LayerState {
        &self.current
    }

    pub fn layer(&self) -> Layer {
        self.current.layer
    }

    pub fn geometry(&self) -> Rectangle {
        self.geometry
    }

    /// Size from the last acked and committed configure.
    pub fn configured_size(&self) -> Size {
        self.configured_size
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Edge and size this surface reserves, if any.
    pub fn exclusive_zone(&self) -> (Option<Edge>, i32) {
        (edges_to_single_edge(self.current.anchor, self.current.exclusive_edge), self.current.exclusive_zone)
    }

    pub fn set_size(&mut self, size: Size) {
        self.pending.size = size;
    }

    pub fn set_anchor(&mut self, anchor: LayerAnchor) {
        self.pending.anchor = anchor;
    }

    pub fn set_exclusive_zone(&mut self, zone: i32) {
        self.pending.exclusive_zone = zone;
    }

    pub fn set_exclusive_edge(&mut self, edge: Option<Edge>) {
        self.pending.exclusive_edge = edge;
    }

    pub fn set_margin(&mut self, margin: Margins) {
        self.pending.margin = margin;
    }

    pub fn set_keyboard_interactivity(&mut self, mode: KeyboardInteractivity) {
        self.pending.keyboard_interactivity = mode;
    }

    pub fn set_layer(&mut self, layer: Layer) {
        self.pending.layer = layer;
    }

    pub fn ack_configure(&mut self, serial: Serial, ctx: &mut RoleContext<'_>) -> Result<(), ProtocolError> {
        let index = self
            .pending_configures
            .iter()
            .position(|c| c.serial == serial)
            .ok_or(ProtocolError::InvalidSerial { surface: ctx.surface, serial })?;
        self.acked = self.pending_configures.drain(..=index).last();
        self.ever_acked = true;
        Ok(())
    }

    /// Stores the placement computed by the output arrangement and configures
    /// the client if the size it should use changed.
    pub(crate) fn apply_arrangement(&mut self, geometry: Rectangle, ctx: &mut RoleContext<'_>) {
        self.geometry = geometry;
        if !self.initialized || self.closed {
            return;
        }
        let size = geometry.size();
        if self.last_sent_size == Some(size) {
            return;
        }
        let configure = LayerConfigure { serial: ctx.serials.next_serial(), size };
        self.pending_configures.push_back(configure);
        self.last_sent_size = Some(size);
        ctx.events.push(CompositorEvent::LayerConfigure {
            client: ctx.client,
            surface: ctx.surface,
            serial: configure.serial,
            size,
        });
    }

    /// The output went away.
    pub(crate) fn close(&mut self, ctx: &mut RoleContext<'_>) {
        if !self.closed {
            self.closed = true;
            ctx.events.push(CompositorEvent::LayerClosed { client: ctx.client, surface: ctx.surface });
        }
    }

    fn reset(&mut self) {
        self.pending = self.initial.clone();
        self.current = self.initial.clone();
        self.pending_configures.clear();
        self.acked = None;
        self.ever_acked = false;
        self.last_sent_size = None;
        self.configured_size = Size::default();
        self.initialized = false;
        self.had_buffer = false;
        self.geometry = Rectangle::default();
    }
}

impl RoleBehavior for LayerRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Layer
    }

    fn role_position(&self) -> Point {
        self.geometry.loc()
    }

    fn check_commit(&self, surface: SurfaceId, preview: &CommitPreview) -> Result<(), ProtocolError> {
        let state = &self.pending;
        if state.size.width == 0 && !state.anchor.contains(LayerAnchor::LEFT | LayerAnchor::RIGHT) {
            return Err(ProtocolError::InvalidLayerSize { surface, axis: "width" });
        }
        if state.size.height == 0 && !state.anchor.contains(LayerAnchor::TOP | LayerAnchor::BOTTOM) {
            return Err(ProtocolError::InvalidLayerSize { surface, axis: "height" });
        }
        if let Some(edge) = state.exclusive_edge {
            if !state.anchor.contains(edge.anchor()) {
                return Err(ProtocolError::InvalidExclusiveEdge { surface });
            }
        }
        if preview.has_buffer && !self.ever_acked {
            return Err(ProtocolError::UnconfiguredBuffer { surface });
        }
        Ok(())
    }

    fn can_map(&self) -> bool {
        !self.closed
    }

    fn on_commit(&mut self, ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction {
        if self.had_buffer && !preview.has_buffer {
            tracing::debug!(surface = %ctx.surface, namespace = %self.namespace, "Layer surface unmapped, resetting");
            self.reset();
            return CommitReaction::RESET | CommitReaction::ARRANGE;
        }

        let mut reaction = CommitReaction::empty();
        if !self.initialized {
            self.initialized = true;
            reaction |= CommitReaction::ARRANGE;
        }
        if self.current != self.pending {
            let only_keyboard = LayerState {
                keyboard_interactivity: self.pending.keyboard_interactivity,
                ..self.current.clone()
            } == self.pending;
            if !only_keyboard {
                reaction |= CommitReaction::ARRANGE;
            }
            self.current = self.pending.clone();
        }
        if let Some(acked) = self.acked.take() {
            self.configured_size = acked.size;
        }
        self.had_buffer = preview.has_buffer;
        reaction
    }

    fn exclusive_output(&self) -> Option<OutputId> {
        Some(self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::geometry::Transform;
    use crate::seat::SerialCounter;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use stratum_buffer_manager::ClientId;

    const ALL: LayerAnchor = LayerAnchor::all();

    #[rstest]
    #[case(LayerAnchor::TOP, None, Some(Edge::Top))]
    #[case(LayerAnchor::TOP.union(LayerAnchor::LEFT).union(LayerAnchor::RIGHT), None, Some(Edge::Top))]
    #[case(LayerAnchor::LEFT.union(LayerAnchor::TOP).union(LayerAnchor::BOTTOM), None, Some(Edge::Left))]
    #[case(LayerAnchor::TOP.union(LayerAnchor::LEFT), None, None)]
    #[case(LayerAnchor::TOP.union(LayerAnchor::LEFT), Some(Edge::Left), Some(Edge::Left))]
    #[case(ALL, None, None)]
    #[case(ALL, Some(Edge::Bottom), Some(Edge::Bottom))]
    #[case(LayerAnchor::LEFT.union(LayerAnchor::RIGHT), None, None)]
    #[case(LayerAnchor::TOP, Some(Edge::Bottom), Some(Edge::Top))]
    fn test_edges_to_single_edge(
        #[case] anchor: LayerAnchor,
        #[case] explicit: Option<Edge>,
        #[case] expected: Option<Edge>,
    ) {
        assert_eq!(edges_to_single_edge(anchor, explicit), expected);
    }

    #[test]
    fn test_panel_stretches_across_top() {
        let state = LayerState {
            anchor: LayerAnchor::TOP | LayerAnchor::LEFT | LayerAnchor::RIGHT,
            size: Size::new(0, 30),
            margin: Margins::new(5, 10, 0, 10),
            ..Default::default()
        };
        let output = Rectangle::new(0, 0, 800, 600);
        assert_eq!(layer_geometry(&state, output, output), Rectangle::new(10, 5, 780, 30));
    }

    #[test]
    fn test_negative_zone_ignores_usable_area() {
        let state = LayerState {
            anchor: LayerAnchor::TOP,
            size: Size::new(100, 100),
            exclusive_zone: -1,
            ..Default::default()
        };
        let output = Rectangle::new(0, 0, 800, 600);
        let usable = Rectangle::new(0, 20, 800, 580);
        assert_eq!(layer_geometry(&state, output, usable), Rectangle::new(350, 0, 100, 100));
        let zero = LayerState { exclusive_zone: 0, ..state };
        assert_eq!(layer_geometry(&zero, output, usable), Rectangle::new(350, 20, 100, 100));
    }

    #[test]
    fn test_unanchored_is_centered() {
        let state = LayerState { size: Size::new(200, 100), ..Default::default() };
        let output = Rectangle::new(100, 0, 800, 600);
        assert_eq!(layer_geometry(&state, output, output), Rectangle::new(400, 250, 200, 100));
    }

    struct Harness {
        serials: SerialCounter,
        events: EventQueue,
    }

    impl Harness {
        fn ctx(&mut self) -> RoleContext<'_> {
            RoleContext {
                surface: SurfaceId::new(2, 1),
                client: ClientId::new(9),
                serials: &mut self.serials,
                events: &mut self.events,
            }
        }
    }

    fn preview(has_buffer: bool) -> CommitPreview {
        CommitPreview {
            has_buffer,
            buffer_size: has_buffer.then(|| Size::new(800, 30)),
            scale: 1,
            transform: Transform::Normal,
            surface_size: Size::default(),
            buffer_offset: Point::default(),
        }
    }

    #[test]
    fn test_zero_size_requires_opposite_anchors() {
        let surface = SurfaceId::new(2, 1);
        let mut layer = LayerRole::new(OutputId::new_unique(), Layer::Top, "panel");
        layer.set_anchor(LayerAnchor::TOP | LayerAnchor::LEFT);
        layer.set_size(Size::new(0, 30));
        assert_eq!(
            layer.check_commit(surface, &preview(false)),
            Err(ProtocolError::InvalidLayerSize { surface, axis: "width" })
        );
        layer.set_anchor(LayerAnchor::TOP | LayerAnchor::LEFT | LayerAnchor::RIGHT);
        layer.check_commit(surface, &preview(false)).unwrap();
        layer.set_exclusive_edge(Some(Edge::Bottom));
        assert_eq!(
            layer.check_commit(surface, &preview(false)),
            Err(ProtocolError::InvalidExclusiveEdge { surface })
        );
    }

    #[test]
    fn test_lifecycle_and_hard_reset() {
        let mut h = Harness { serials: SerialCounter::new(), events: EventQueue::new() };
        let mut layer = LayerRole::new(OutputId::new_unique(), Layer::Top, "panel");
        layer.set_anchor(LayerAnchor::TOP | LayerAnchor::LEFT | LayerAnchor::RIGHT);
        layer.set_size(Size::new(0, 30));
        layer.set_exclusive_zone(30);

        let reaction = layer.on_commit(&mut h.ctx(), &preview(false));
        assert!(reaction.contains(CommitReaction::ARRANGE));
        layer.apply_arrangement(Rectangle::new(0, 0, 800, 30), &mut h.ctx());
        layer.apply_arrangement(Rectangle::new(0, 0, 800, 30), &mut h.ctx());
        assert_eq!(h.events.len(), 1);
        let serial = layer.pending_configures.back().unwrap().serial;
        layer.ack_configure(serial, &mut h.ctx()).unwrap();
        layer.check_commit(SurfaceId::new(2, 1), &preview(true)).unwrap();
        layer.on_commit(&mut h.ctx(), &preview(true));
        assert_eq!(layer.configured_size(), Size::new(800, 30));
        assert_eq!(layer.exclusive_zone(), (Some(Edge::Top), 30));

        let reaction = layer.on_commit(&mut h.ctx(), &preview(false));
        assert_eq!(reaction, CommitReaction::RESET | CommitReaction::ARRANGE);
        assert_eq!(layer.state(), &LayerState::initial(Layer::Top));
        assert_eq!(layer.exclusive_zone(), (None, 0));
        assert!(!layer.is_initialized());
    }

    #[test]
    fn test_keyboard_only_change_needs_no_arrange() {
        let mut h = Harness { serials: SerialCounter::new(), events: EventQueue::new() };
        let mut layer = LayerRole::new(OutputId::new_unique(), Layer::Overlay, "osd");
        layer.on_commit(&mut h.ctx(), &preview(false));
        layer.set_keyboard_interactivity(KeyboardInteractivity::OnDemand);
        let reaction = layer.on_commit(&mut h.ctx(), &preview(false));
        assert!(reaction.is_empty());
        assert_eq!(layer.state().keyboard_interactivity, KeyboardInteractivity::OnDemand);
    }
}
