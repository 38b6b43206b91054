//! Per-instance encounter progress and its persisted form.
//!
//! The persisted form is a single line of whitespace-separated unsigned
//! integers, one per slot. Slots usually hold an [`EncounterState`], but
//! scripts also keep plain counters and flags in them, so any value survives
//! a save/load cycle except `IN_PROGRESS`, which loads as `NOT_STARTED`.

use crate::error::EncounterError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncounterState {
    NotStarted,
    InProgress,
    Fail,
    Done,
    Special,
    /// Script-defined value outside the standard states.
    Custom(u32),
}

impl EncounterState {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Fail => 2,
            Self::Done => 3,
            Self::Special => 4,
            Self::Custom(value) => value,
        }
    }
}

impl From<u32> for EncounterState {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::InProgress,
            2 => Self::Fail,
            3 => Self::Done,
            4 => Self::Special,
            other => Self::Custom(other),
        }
    }
}

/// Encounter slots of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncounterLog {
    slots: Vec<EncounterState>,
}

impl EncounterLog {
    pub fn new(slot_count: usize) -> Self {
        Self { slots: vec![EncounterState::NotStarted; slot_count] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<EncounterState> {
        self.slots.get(slot).copied()
    }

    pub fn states(&self) -> &[EncounterState] {
        &self.slots
    }

    /// Sets one slot. Returns true when the slot just moved to `Done`, which
    /// is when the log must be persisted.
    pub fn set(&mut self, slot: usize, state: EncounterState) -> bool {
        match self.slots.get_mut(slot) {
            Some(current) => {
                let completed = state == EncounterState::Done && *current != EncounterState::Done;
                *current = state;
                completed
            }
            None => false,
        }
    }

    /// True once every slot is `Done`.
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| *s == EncounterState::Done)
    }

    pub fn serialize(&self) -> String {
        self.slots
            .iter()
            .map(|state| state.as_u32().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parses `slot_count` values from `data`. Extra values are ignored;
    /// in-progress slots load as not started. A log without slots loads from
    /// any data, including the empty string it serializes to.
    pub fn load(data: &str, slot_count: usize) -> Result<Self, EncounterError> {
        if slot_count == 0 {
            return Ok(Self { slots: Vec::new() });
        }
        if data.trim().is_empty() {
            return Err(EncounterError::Empty);
        }
        let mut tokens = data.split_whitespace();

        let mut slots = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            let Some(token) = tokens.next() else {
                return Err(EncounterError::Truncated { expected: slot_count, found: slot });
            };
            let value: u32 = token
                .parse()
                .map_err(|_| EncounterError::InvalidValue { slot, token: token.to_string() })?;
            let state = match EncounterState::from(value) {
                EncounterState::InProgress => EncounterState::NotStarted,
                state => state,
            };
            slots.push(state);
        }

        Ok(Self { slots })
    }
}
