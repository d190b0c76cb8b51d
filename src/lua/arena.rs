//! Generational arena backing heap objects and registry slots

/// A handle into a generational arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    /// Index into the arena
    pub index: u32,

    /// Generation count for detecting stale references
    pub generation: u32,
}

impl Handle {
    /// Create a new handle
    pub fn new(index: u32, generation: u32) -> Self {
        Handle { index, generation }
    }
}

/// A slot in the generational arena
#[derive(Debug)]
struct Slot<T> {
    /// The stored value (if occupied)
    value: Option<T>,

    /// Generation counter
    generation: u32,
}

/// A generational arena for storing values
///
/// A freed slot is only handed out again with a bumped generation, so a
/// handle to a removed value never aliases its replacement.
#[derive(Debug)]
pub struct Arena<T> {
    /// Storage slots
    slots: Vec<Slot<T>>,

    /// Free list (indices of empty slots)
    free_list: Vec<u32>,

    /// Total number of occupied slots
    occupied: usize,
}

impl<T> Arena<T> {
    /// Create a new empty arena
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free_list: Vec::new(),
            occupied: 0,
        }
    }

    /// Insert a value into the arena, returning its handle
    pub fn insert(&mut self, value: T) -> Handle {
        self.occupied += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.generation = slot.generation.wrapping_add(1);
            Handle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                value: Some(value),
                generation: 0,
            });
            Handle::new(index, 0)
        }
    }

    /// Remove a value from the arena
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free_list.push(handle.index);
        self.occupied -= 1;
        Some(value)
    }

    /// Get a reference to a value in the arena
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Get a mutable reference to a value in the arena
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check if a handle is valid
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Get the number of occupied slots
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Check if the arena is empty
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Iterate over occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Iterate mutably over occupied slots
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| (Handle::new(index as u32, generation), value))
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
