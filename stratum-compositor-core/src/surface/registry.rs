//! Arena of surface records addressed by generational [`SurfaceId`]s.

use stratum_buffer_manager::ClientId;

use super::{Surface, SurfaceId};

#[derive(Debug)]
struct Slot {
    generation: u32,
    surface: Option<Surface>,
}

/// Owns every live surface.
///
/// Removing a surface bumps its slot's generation, so stale handles held by
/// roles, the seat or the cursor simply stop resolving.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, client: ClientId, max_damage_rects: usize) -> SurfaceId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                SurfaceId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 1, surface: None });
                SurfaceId::new(index, 1)
            }
        };
        self.slots[id.index()].surface = Some(Surface::new(id, client, max_damage_rects));
        self.len += 1;
        id
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.surface.as_ref())
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.surface.as_mut())
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())?;
        let surface = slot.surface.take()?;
        self.free.push(id.index() as u32);
        self.len -= 1;
        Some(surface)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Surface> {
        self.slots.iter().filter_map(|slot| slot.surface.as_ref())
    }

    pub fn ids(&self) -> Vec<SurfaceId> {
        self.iter().map(Surface::id).collect()
    }

    pub fn surfaces_of_client(&self, client: ClientId) -> Vec<SurfaceId> {
        self.iter()
            .filter(|surface| surface.client() == client)
            .map(Surface::id)
            .collect()
    }
}
