//! Position ledger boundary
//!
//! The ledger is the arena that owns position records. The ordered index
//! refers to positions by id only.

use std::collections::BTreeMap;

use crate::state::{Position, PositionId};

pub trait PositionLedger {
    /// Unknown ids read as a default record with status `Nonexistent`
    fn read(&self, id: PositionId) -> Position;
    fn write(&mut self, id: PositionId, position: Position);
    fn remove(&mut self, id: PositionId);
    /// Every id with a stored record, open or closed
    fn ids(&self) -> Vec<PositionId>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InMemoryLedger {
    positions: BTreeMap<PositionId, Position>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionLedger for InMemoryLedger {
    fn read(&self, id: PositionId) -> Position {
        self.positions.get(&id).copied().unwrap_or_default()
    }

    fn write(&mut self, id: PositionId, position: Position) {
        self.positions.insert(id, position);
    }

    fn remove(&mut self, id: PositionId) {
        self.positions.remove(&id);
    }

    fn ids(&self) -> Vec<PositionId> {
        self.positions.keys().copied().collect()
    }
}
