//! Generational arena backing every topology object.
//!
//! Objects refer to each other with [Id]s. Removing an object bumps its slot's generation, so
//! an [Id] held across the removal no longer resolves instead of naming whatever reuses the
//! slot.

use alloc::vec::Vec;
use core::{fmt, hash, marker::PhantomData};

pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    const fn new(index: u32, generation: u32) -> Self {
        Id {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    #[cfg(test)]
    pub(crate) const fn dangling() -> Self {
        Id::new(u32::MAX, u32::MAX)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> hash::Hash for Id<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    container: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Arena {
            container: Vec::new(),
            free: Vec::new(),
        }
    }

    /// The id the next [Arena::insert] will hand out.
    pub fn vacant_id(&self) -> Id<T> {
        match self.free.last() {
            Some(index) => Id::new(*index, self.container[*index as usize].generation),
            None => Id::new(self.container.len() as u32, 0),
        }
    }

    pub fn insert(&mut self, value: T) -> Id<T> {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.container[index as usize];
                slot.value = Some(value);
                Id::new(index, slot.generation)
            }
            None => {
                self.container.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                Id::new(self.container.len() as u32 - 1, 0)
            }
        }
    }

    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.container
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.container
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let slot = self.container.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.container.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Id::new(index as u32, slot.generation), value))
        })
    }
}
