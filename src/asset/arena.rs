use super::Handle;

enum Slot<T> {
    Occupied { generation: u32, item: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// Storage with stable handles and a free list, so removed items hand their
/// slot to the next insert instead of reallocating.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free_head {
            if let Some(Slot::Free {
                generation,
                next_free,
            }) = self.slots.get(index as usize)
            {
                let generation = generation.wrapping_add(1);
                let next_free = *next_free;
                self.slots[index as usize] = Slot::Occupied { generation, item };
                self.free_head = next_free;
                return Handle::new(index, generation);
            }
            log::error!("Arena free list pointed at occupied slot {}", index);
            self.free_head = None;
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            item,
        });
        Handle::new(index, 0)
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation() => {}
            _ => return None,
        }
        let freed = Slot::Free {
            generation: handle.generation(),
            next_free: self.free_head,
        };
        let Slot::Occupied { item, .. } = std::mem::replace(slot, freed) else {
            return None;
        };
        self.free_head = Some(handle.index() as u32);
        self.len -= 1;
        Some(item)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index())? {
            Slot::Occupied { generation, item } if *generation == handle.generation() => {
                Some(item)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index())? {
            Slot::Occupied { generation, item } if *generation == handle.generation() => {
                Some(item)
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Remove everything. Slots stay allocated and are reused by later inserts.
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            if let Slot::Occupied { generation, .. } = self.slots[index] {
                self.slots[index] = Slot::Free {
                    generation,
                    next_free: self.free_head,
                };
                self.free_head = Some(index as u32);
            }
        }
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, item } => {
                    Some((Handle::new(index as u32, *generation), item))
                }
                Slot::Free { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, item } => {
                    Some((Handle::new(index as u32, *generation), item))
                }
                Slot::Free { .. } => None,
            })
    }

    /// Slots ever allocated, occupied or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
