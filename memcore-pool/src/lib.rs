use std::{
    fmt::Debug,
    ops::{Index, IndexMut},
};

pub mod prelude {
    pub use crate::{NodePool, SlotId};
}

/// Index of a slot inside a [`NodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

enum Slot<T> {
    Live(T),
    Free(Option<SlotId>),
}

/// Recycles fixed-size slots for one type.
///
/// Slots live in a dense vector. A destroyed slot is threaded onto an
/// intrusive free chain and handed out again by the next [`NodePool::make`],
/// so steady make/destroy churn never grows the backing storage.
pub struct NodePool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<SlotId>,
    live: usize,
    free: usize,
    slots_created: usize,
}

impl<T> NodePool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            free: 0,
            slots_created: 0,
        }
    }

    pub fn make(&mut self, value: T) -> SlotId {
        self.live += 1;

        if let Some(id) = self.free_head {
            let slot = &mut self.slots[id.index()];
            let Slot::Free(next) = *slot else {
                panic!("Free chain points at live slot {id:?}.");
            };
            *slot = Slot::Live(value);
            self.free_head = next;
            self.free -= 1;
            return id;
        }

        let id = u32::try_from(self.slots.len())
            .map(SlotId)
            .expect("NodePool ran out of slot ids.");
        self.slots.push(Slot::Live(value));
        self.slots_created += 1;
        id
    }

    /// Takes the value out of `id` and recycles the slot.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already free.
    pub fn destroy(&mut self, id: SlotId) -> T {
        let slot = &mut self.slots[id.index()];
        if matches!(slot, Slot::Free(_)) {
            panic!("Slot {id:?} destroyed twice.");
        }

        let Slot::Live(value) = std::mem::replace(slot, Slot::Free(self.free_head)) else {
            unreachable!();
        };
        self.free_head = Some(id);
        self.live -= 1;
        self.free += 1;
        value
    }

    /// Releases recycled slots back to the allocator.
    ///
    /// Free slots sitting below a live slot keep their index pinned, so they
    /// stay on the free chain.
    pub fn clear(&mut self) {
        let before = self.slots.len();

        while let Some(Slot::Free(_)) = self.slots.last() {
            self.slots.pop();
        }
        self.slots.shrink_to_fit();

        self.free_head = None;
        self.free = 0;
        for idx in (0..self.slots.len()).rev() {
            if let Slot::Free(next) = &mut self.slots[idx] {
                *next = self.free_head;
                self.free_head = Some(SlotId(idx as u32));
                self.free += 1;
            }
        }

        tracing::debug!(
            "NodePool cleared, released {} slots, {} pinned",
            before - self.slots.len(),
            self.free
        );
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.index()) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Slot::Live(value) => Some((SlotId(idx as u32), value)),
                Slot::Free(_) => None,
            })
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of recycled slots waiting on the free chain.
    pub fn free_len(&self) -> usize {
        self.free
    }

    /// Slots appended to the dense vector over the pool's lifetime.
    ///
    /// Counts slots, not allocator calls: the vector grows geometrically, so
    /// several slots share one reallocation.
    pub fn slots_created(&self) -> usize {
        self.slots_created
    }
}

impl<T> Default for NodePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<SlotId> for NodePool<T> {
    type Output = T;

    fn index(&self, id: SlotId) -> &T {
        self.get(id)
            .unwrap_or_else(|| panic!("Slot {id:?} is not live."))
    }
}

impl<T> IndexMut<SlotId> for NodePool<T> {
    fn index_mut(&mut self, id: SlotId) -> &mut T {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("Slot {id:?} is not live."))
    }
}

impl<T> Debug for NodePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("live", &self.live)
            .field("free", &self.free)
            .field("slots_created", &self.slots_created)
            .finish()
    }
}
