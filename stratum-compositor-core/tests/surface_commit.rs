mod common;

use common::{add_output, buffer, compositor, damage_tracking, mapped_toplevel};
use pretty_assertions::assert_eq;
use stratum_buffer_manager::ClientId;
use stratum_compositor_core::events::CallbackId;
use stratum_compositor_core::{CompositorError, CompositorEvent, Point, ProtocolError, Rectangle, RepaintOutcome, Size};

#[test]
fn pending_state_is_invisible_until_commit() {
    let mut c = compositor();
    let client = ClientId::new(1);
    let surface = mapped_toplevel(&mut c, client, 100, 60);

    let bigger = buffer(&mut c, client, 200, 120);
    c.attach(surface, Some(bigger), 0, 0).unwrap();
    c.set_buffer_scale(surface, 2).unwrap();
    c.damage(surface, Rectangle::new(0, 0, 10, 10)).unwrap();

    let current = c.surface(surface).unwrap();
    assert_eq!(current.size(), Size::new(100, 60));
    assert_eq!(current.current().scale, 1);

    c.commit(surface).unwrap();
    let current = c.surface(surface).unwrap();
    assert_eq!(current.current().scale, 2);
    assert_eq!(current.size(), Size::new(100, 60));
    assert!(current.pending().is_empty());
}

#[test]
fn synced_subsurface_applies_right_after_its_parent() {
    let mut c = compositor();
    let client = ClientId::new(1);
    let parent = mapped_toplevel(&mut c, client, 100, 100);
    let child = c.create_surface(client);
    c.get_subsurface(child, parent).unwrap();

    let child_buffer = buffer(&mut c, client, 20, 20);
    c.attach(child, Some(child_buffer), 0, 0).unwrap();
    c.commit(child).unwrap();
    assert!(c.surface(child).unwrap().has_cached_state());
    assert!(!c.surface(child).unwrap().is_mapped());

    c.commit(parent).unwrap();
    let parent_sequence = c.surface(parent).unwrap().commit_sequence();
    let child_sequence = c.surface(child).unwrap().commit_sequence();
    assert!(child_sequence > parent_sequence);
    assert!(c.surface(child).unwrap().is_mapped());
}

#[test]
fn nested_synced_children_apply_in_tree_order() {
    let mut c = compositor();
    let client = ClientId::new(1);
    let root = mapped_toplevel(&mut c, client, 100, 100);
    let child = c.create_surface(client);
    let grandchild = c.create_surface(client);
    c.get_subsurface(child, root).unwrap();
    c.get_subsurface(grandchild, child).unwrap();

    c.set_buffer_scale(grandchild, 2).unwrap();
    c.commit(grandchild).unwrap();
    c.set_buffer_scale(child, 2).unwrap();
    c.commit(child).unwrap();
    c.commit(root).unwrap();

    let sequence = |id| c.surface(id).unwrap().commit_sequence();
    assert!(sequence(root) < sequence(child));
    assert!(sequence(child) < sequence(grandchild));
    assert_eq!(c.surface(grandchild).unwrap().current().scale, 2);
}

#[test]
fn replaced_buffer_is_released_once() {
    let mut c = compositor();
    let client = ClientId::new(1);
    let surface = mapped_toplevel(&mut c, client, 50, 50);
    let first = c.surface(surface).unwrap().current().buffer.as_ref().map(|b| b.id).unwrap();
    c.drain_events();

    let second = buffer(&mut c, client, 50, 50);
    c.attach(surface, Some(second), 0, 0).unwrap();
    c.commit(surface).unwrap();

    let releases: Vec<_> = c
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, CompositorEvent::BufferRelease { .. }))
        .collect();
    assert_eq!(releases, vec![CompositorEvent::BufferRelease { client, buffer: first }]);

    c.commit(surface).unwrap();
    assert!(!c.drain_events().iter().any(|e| matches!(e, CompositorEvent::BufferRelease { .. })));
}

#[test]
fn frame_callbacks_fire_after_repaint_of_visible_output() {
    let mut c = compositor();
    let (output, _log) = add_output(&mut c, "DP-1", (0, 0), (800, 600), damage_tracking());
    let client = ClientId::new(1);
    let surface = mapped_toplevel(&mut c, client, 100, 100);
    c.frame(surface, CallbackId(7)).unwrap();
    c.damage(surface, Rectangle::new(0, 0, 5, 5)).unwrap();
    c.commit(surface).unwrap();
    c.drain_events();

    assert!(matches!(c.repaint_output(output).unwrap(), RepaintOutcome::Presented { .. }));
    let done: Vec<_> = c
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            CompositorEvent::FrameDone { client, callbacks, .. } => Some((client, callbacks)),
            _ => None,
        })
        .collect();
    assert_eq!(done, vec![(client, vec![CallbackId(7)])]);

    // Nothing left to fire.
    assert_eq!(c.repaint_output(output).unwrap(), RepaintOutcome::NoDamage);
    assert!(!c.drain_events().iter().any(|e| matches!(e, CompositorEvent::FrameDone { .. })));
}

#[test]
fn surfaces_enter_and_leave_outputs() {
    let mut c = compositor();
    let (left, _) = add_output(&mut c, "left", (0, 0), (100, 100), damage_tracking());
    let (right, _) = add_output(&mut c, "right", (100, 0), (100, 100), damage_tracking());
    let client = ClientId::new(1);
    let surface = mapped_toplevel(&mut c, client, 150, 50);

    let outputs: Vec<_> = c.surface(surface).unwrap().outputs().iter().copied().collect();
    assert_eq!(outputs, vec![left, right]);

    c.uninitialize_output(right).unwrap();
    let events = c.drain_events();
    assert!(events.contains(&CompositorEvent::SurfaceLeave { client, surface, output: right }));
    assert!(!c.surface(surface).unwrap().outputs().contains(&right));

    c.initialize_output(right).unwrap();
    assert!(c.drain_events().contains(&CompositorEvent::SurfaceEnter { client, surface, output: right }));
}

#[test]
fn protocol_error_disconnects_only_the_offender() {
    let mut c = compositor();
    let good = ClientId::new(1);
    let bad = ClientId::new(2);
    let kept = mapped_toplevel(&mut c, good, 10, 10);
    let doomed = mapped_toplevel(&mut c, bad, 10, 10);
    c.drain_events();

    let err = c.set_buffer_scale(doomed, 0).unwrap_err();
    assert!(matches!(err, CompositorError::Protocol(ProtocolError::InvalidScale { scale: 0 })));
    assert!(c.surface(doomed).is_none());
    assert!(c.surface(kept).unwrap().is_mapped());
    assert!(c
        .drain_events()
        .iter()
        .any(|e| matches!(e, CompositorEvent::ClientError { client, code: 7, .. } if *client == bad)));
}

#[test]
fn restacked_synced_siblings_apply_in_new_order_on_parent_commit() {
    let mut c = compositor();
    let client = ClientId::new(1);
    let parent = mapped_toplevel(&mut c, client, 100, 100);
    let lower = c.create_surface(client);
    let upper = c.create_surface(client);
    c.get_subsurface(lower, parent).unwrap();
    c.get_subsurface(upper, parent).unwrap();
    assert_eq!(c.surface(parent).unwrap().children_above(), &[lower, upper]);

    for child in [lower, upper] {
        let content = buffer(&mut c, client, 10, 10);
        c.attach(child, Some(content), 0, 0).unwrap();
        c.commit(child).unwrap();
    }
    c.place_above(lower, upper).unwrap();
    c.subsurface_set_position(upper, 20, 30).unwrap();

    // Nothing moves before the parent commits.
    assert_eq!(c.surface(parent).unwrap().children_above(), &[lower, upper]);
    assert!(c.surface(lower).unwrap().has_cached_state());
    assert!(c.surface(upper).unwrap().has_cached_state());
    assert_eq!(c.surface_origin(upper), c.surface_origin(parent));

    c.commit(parent).unwrap();
    assert_eq!(c.surface(parent).unwrap().children_above(), &[upper, lower]);
    let sequence = |id| c.surface(id).unwrap().commit_sequence();
    assert!(sequence(parent) < sequence(upper));
    assert!(sequence(upper) < sequence(lower));
    assert!(c.surface(lower).unwrap().is_mapped());
    assert!(c.surface(upper).unwrap().is_mapped());

    let parent_origin = c.surface_origin(parent).unwrap();
    assert_eq!(c.surface_origin(upper), Some(parent_origin + Point::new(20, 30)));
}
