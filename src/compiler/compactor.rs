//! Sweep-line interval compaction.
//!
//! Turns the add/remove transitions produced by network rows into a list of
//! non-overlapping range records covering the whole IPv4 space, plus the
//! 256-entry octet index over those records.

use crate::address::ADDRESS_SPACE_END;

/// Kind of a transition. `Remove` sorts before `Add` at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Remove,
    Add,
}

/// A register offset entering or leaving one mapping slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// May equal `2^32` for ranges ending at `255.255.255.255`.
    pub address: u64,
    pub action: Action,
    pub slot: usize,
    pub offset: u32,
}

impl Transition {
    pub fn add(address: u64, slot: usize, offset: u32) -> Self {
        Self {
            address,
            action: Action::Add,
            slot,
            offset,
        }
    }

    pub fn remove(address: u64, slot: usize, offset: u32) -> Self {
        Self {
            address,
            action: Action::Remove,
            slot,
            offset,
        }
    }
}

/// A range starting at `start` and running up to the next record's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    pub start: u32,
    /// Row offset per slot; 0 selects the all-default row.
    pub offsets: Vec<u32>,
}

/// Output of [`compact`].
#[derive(Debug, Clone)]
pub struct Compaction {
    pub records: Vec<RangeRecord>,
    pub index: [u32; 256],
}

/// Sweep the transitions into range records.
///
/// Ties at one address are ordered `Remove` first, then by input order. Each
/// slot keeps the offsets currently in effect in insertion order; the last one
/// wins. A removal deletes the first equal offset in the slot.
pub fn compact(mut transitions: Vec<Transition>, slots: usize) -> Compaction {
    transitions.sort_by_key(|t| (t.address, t.action));

    let mut active: Vec<Vec<u32>> = vec![Vec::new(); slots];
    let mut records: Vec<RangeRecord> = Vec::new();
    let mut cursor: u64 = 0;

    for transition in &transitions {
        if transition.address != cursor {
            emit(&mut records, cursor, &active);
            cursor = transition.address;
        }

        let values = &mut active[transition.slot];
        match transition.action {
            Action::Add => values.push(transition.offset),
            Action::Remove => {
                if let Some(pos) = values.iter().position(|v| *v == transition.offset) {
                    values.remove(pos);
                }
            }
        }
    }

    if cursor < ADDRESS_SPACE_END {
        emit(&mut records, cursor, &active);
    }

    let index = build_index(&records);
    log::debug!(
        "Compacted {} transitions into {} records",
        transitions.len(),
        records.len()
    );

    Compaction { records, index }
}

fn emit(records: &mut Vec<RangeRecord>, cursor: u64, active: &[Vec<u32>]) {
    let offsets: Vec<u32> = active
        .iter()
        .map(|values| values.last().copied().unwrap_or(0))
        .collect();

    if records.last().map_or(true, |last| last.offsets != offsets) {
        records.push(RangeRecord {
            start: cursor as u32,
            offsets,
        });
    }
}

/// Entry `o` is the position of the first record whose top byte is `o`;
/// octets without records repeat the previous entry.
pub fn build_index(records: &[RangeRecord]) -> [u32; 256] {
    let mut first: [Option<u32>; 256] = [None; 256];
    for (pos, record) in records.iter().enumerate() {
        let octet = (record.start >> 24) as usize;
        if first[octet].is_none() {
            first[octet] = Some(pos as u32);
        }
    }

    let mut index = [0u32; 256];
    let mut carry = 0u32;
    for (octet, entry) in first.iter().enumerate() {
        if let Some(pos) = entry {
            carry = *pos;
        }
        index[octet] = carry;
    }
    index
}
