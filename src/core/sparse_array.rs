//! Generation-checked slot storage.
//!
//! [`SparseArray`] hands out stable [`SparseId`]s for inserted values and reuses freed
//! slots. Each slot carries a generation counter so an id that outlived its value can
//! never alias whatever was inserted into the slot afterwards. Dependencies use it for
//! tracker registrations, task groups for pending tasks and channels for brushes.

/// Stable handle into a [`SparseArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SparseId {
    index: u32,
    generation: u32,
}

impl SparseId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena with a free list.
#[derive(Debug)]
pub struct SparseArray<T> {
    slots: Vec<Slot<T>>,
    free_slots: Vec<u32>,
    len: usize,
}

impl<T> Default for SparseArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseArray<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value, reusing a freed slot when one is available.
    pub fn add(&mut self, value: T) -> SparseId {
        self.len += 1;

        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SparseId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SparseId {
            index,
            generation: 0,
        }
    }

    /// Removes the value behind `id`. Returns `None` if the id is stale.
    pub fn remove(&mut self, id: SparseId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SparseId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, id: SparseId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, id: SparseId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates live values with their ids, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SparseId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SparseId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Removes every value for which `keep` returns false and hands it to `removed`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool, mut removed: impl FnMut(T)) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(value) = slot.value.as_ref() else {
                continue;
            };
            if keep(value) {
                continue;
            }
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(index as u32);
                self.len -= 1;
                removed(value);
            }
        }
    }
}
