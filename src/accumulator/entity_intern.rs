//! Entity id interning for memory-efficient accumulator state.

use lasso::{Rodeo, Spur};

/// Interned key for a reviewer or product id.
///
/// Ids like "A2SUAM1J3GNN3B" repeat in the first-seen map and in every
/// active-set they appear in. Interning stores each string once and
/// reduces each occurrence to a 4-byte key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(Spur);

/// String interner owned by a single accumulator for the length of one scan.
#[derive(Debug, Default)]
pub struct EntityInterner {
    rodeo: Rodeo<Spur>,
}

impl EntityInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an id, returning a cheap key.
    #[inline]
    pub fn intern(&mut self, id: &str) -> EntityId {
        EntityId(self.rodeo.get_or_intern(id))
    }

    /// Look up an id without interning it.
    #[inline]
    pub fn get(&self, id: &str) -> Option<EntityId> {
        self.rodeo.get(id).map(EntityId)
    }
}
