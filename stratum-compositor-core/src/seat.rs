//! Serials and the parts of seat state that drive role transitions.
//!
//! Input devices are not handled here. The input backend reports button and
//! key events through [`Seat::notify_button`] and [`Seat::notify_key`]; the seat
//! remembers their serials so that grabs, interactive moves/resizes and drags
//! can be validated.

use std::fmt;

use crate::geometry::Point;
use crate::role::toplevel::ResizeEdge;
use crate::surface::SurfaceId;

/// A protocol serial. Comparisons are wrap-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial(u32);

impl Serial {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Whether `self` was issued at the same time or after `other`, treating the
    /// counter as a ring.
    pub fn is_no_older_than(&self, other: &Serial) -> bool {
        (self.0.wrapping_sub(other.0) as i32) >= 0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic serial generator. Zero is never handed out.
#[derive(Debug, Clone)]
pub struct SerialCounter {
    last: u32,
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCounter {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Starts counting after `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    pub fn next_serial(&mut self) -> Serial {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        Serial(self.last)
    }
}

/// An exclusive pointer interaction started by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatGrab {
    Move { surface: SurfaceId, serial: Serial },
    Resize { surface: SurfaceId, serial: Serial, edges: ResizeEdge },
    Drag(DragSession),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSession {
    pub origin: SurfaceId,
    pub icon: Option<SurfaceId>,
    pub serial: Serial,
    /// Surface under the pointer that would receive a drop.
    pub target: Option<SurfaceId>,
}

#[derive(Debug, Default)]
pub struct Seat {
    name: String,
    pointer_focus: Option<SurfaceId>,
    keyboard_focus: Option<SurfaceId>,
    last_button_serial: Option<Serial>,
    last_key_serial: Option<Serial>,
    buttons_pressed: u32,
    grab: Option<SeatGrab>,
    /// Popups holding an explicit grab, oldest first.
    popup_grab: Vec<SurfaceId>,
    pointer_position: Point,
}

impl Seat {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer_focus
    }

    pub fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    pub fn set_pointer_focus(&mut self, surface: Option<SurfaceId>, position: Point) {
        self.pointer_focus = surface;
        self.pointer_position = position;
        if let Some(SeatGrab::Drag(drag)) = self.grab.as_mut() {
            drag.target = surface;
        }
    }

    pub fn set_keyboard_focus(&mut self, surface: Option<SurfaceId>) {
        if self.keyboard_focus != surface {
            tracing::debug!(seat = %self.name, ?surface, "Keyboard focus changed");
        }
        self.keyboard_focus = surface;
    }

    pub fn pointer_position(&self) -> Point {
        self.pointer_position
    }

    /// Records a button press or release sent to the focused client.
    pub fn notify_button(&mut self, serial: Serial, pressed: bool) {
        self.last_button_serial = Some(serial);
        if pressed {
            self.buttons_pressed += 1;
        } else {
            self.buttons_pressed = self.buttons_pressed.saturating_sub(1);
            if self.buttons_pressed == 0
                && matches!(self.grab, Some(SeatGrab::Move { .. } | SeatGrab::Resize { .. }))
            {
                self.grab = None;
            }
        }
    }

    pub fn notify_key(&mut self, serial: Serial) {
        self.last_key_serial = Some(serial);
    }

    /// Whether `serial` belongs to the latest button or key event.
    pub fn validate_serial(&self, serial: Serial) -> bool {
        self.last_button_serial == Some(serial) || self.last_key_serial == Some(serial)
    }

    /// Whether an interactive grab may start: the serial must be the latest
    /// button press and a button must still be held.
    pub fn validate_grab_serial(&self, serial: Serial) -> bool {
        self.buttons_pressed > 0 && self.last_button_serial == Some(serial)
    }

    pub fn grab(&self) -> Option<&SeatGrab> {
        self.grab.as_ref()
    }

    /// Starts an interactive move. Returns `false` if the serial does not allow it.
    pub fn start_move(&mut self, surface: SurfaceId, serial: Serial) -> bool {
        if !self.validate_grab_serial(serial) || self.grab.is_some() {
            tracing::debug!(seat = %self.name, %surface, %serial, "Ignoring move request");
            return false;
        }
        self.grab = Some(SeatGrab::Move { surface, serial });
        true
    }

    pub fn start_resize(&mut self, surface: SurfaceId, serial: Serial, edges: ResizeEdge) -> bool {
        if !self.validate_grab_serial(serial) || self.grab.is_some() {
            tracing::debug!(seat = %self.name, %surface, %serial, "Ignoring resize request");
            return false;
        }
        self.grab = Some(SeatGrab::Resize { surface, serial, edges });
        true
    }

    pub fn start_drag(&mut self, origin: SurfaceId, icon: Option<SurfaceId>, serial: Serial) -> bool {
        if !self.validate_grab_serial(serial) || self.grab.is_some() {
            tracing::debug!(seat = %self.name, %origin, %serial, "Ignoring drag request");
            return false;
        }
        self.grab = Some(SeatGrab::Drag(DragSession {
            origin,
            icon,
            serial,
            target: self.pointer_focus,
        }));
        true
    }

    pub fn drag(&self) -> Option<&DragSession> {
        match self.grab.as_ref() {
            Some(SeatGrab::Drag(drag)) => Some(drag),
            _ => None,
        }
    }

    /// Ends any active grab and returns it.
    pub fn end_grab(&mut self) -> Option<SeatGrab> {
        self.grab.take()
    }

    pub fn popup_grab(&self) -> &[SurfaceId] {
        &self.popup_grab
    }

    pub fn popup_grab_top(&self) -> Option<SurfaceId> {
        self.popup_grab.last().copied()
    }

    pub(crate) fn push_popup_grab(&mut self, popup: SurfaceId) {
        self.popup_grab.push(popup);
    }

    /// Removes `popup` and every popup grabbed after it. Returns the removed
    /// popups, topmost first.
    pub(crate) fn pop_popup_grab(&mut self, popup: SurfaceId) -> Vec<SurfaceId> {
        match self.popup_grab.iter().position(|id| *id == popup) {
            Some(index) => {
                let mut removed = self.popup_grab.split_off(index);
                removed.reverse();
                removed
            }
            None => Vec::new(),
        }
    }

    /// Clears every reference to a destroyed surface.
    pub(crate) fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.pointer_focus == Some(surface) {
            self.pointer_focus = None;
        }
        if self.keyboard_focus == Some(surface) {
            self.keyboard_focus = None;
        }
        let grab_ended = match self.grab.as_mut() {
            Some(SeatGrab::Move { surface: s, .. }) | Some(SeatGrab::Resize { surface: s, .. }) => {
                *s == surface
            }
            Some(SeatGrab::Drag(drag)) => {
                if drag.icon == Some(surface) {
                    drag.icon = None;
                }
                if drag.target == Some(surface) {
                    drag.target = None;
                }
                drag.origin == surface
            }
            None => false,
        };
        if grab_ended {
            self.grab = None;
        }
        self.popup_grab.retain(|id| *id != surface);
    }
}
