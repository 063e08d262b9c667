//! In-memory staging of register rows and network transitions.

use ahash::{AHashMap, AHashSet};

use super::compactor::{Action, Transition};
use crate::address::AddressKind;
use crate::field::{FieldLayout, FieldStats, Value};
use crate::schema::Schema;
use crate::source::SourceRow;
use crate::{Error, Result};

/// One register row after normalization.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub key: String,
    pub values: Vec<Value>,
    pub used: bool,
}

impl StagedRow {
    fn is_default(&self) -> bool {
        self.values.iter().all(Value::is_default)
    }
}

/// Rows of one register, unique by key in ingestion order.
#[derive(Debug, Default)]
pub struct StagedRegister {
    rows: Vec<StagedRow>,
    by_key: AHashMap<String, usize>,
    stats: Vec<FieldStats>,
    offsets: Vec<u32>,
}

impl StagedRegister {
    fn new(field_count: usize) -> Self {
        Self {
            stats: vec![FieldStats::new(); field_count],
            ..Default::default()
        }
    }

    /// Insert a row unless its key is taken. Returns whether it was inserted.
    fn insert(&mut self, key: String, values: Vec<Value>) -> bool {
        if self.by_key.contains_key(&key) {
            return false;
        }
        for (stats, value) in self.stats.iter_mut().zip(&values) {
            stats.observe(value);
        }
        self.by_key.insert(key.clone(), self.rows.len());
        self.rows.push(StagedRow {
            key,
            values,
            used: false,
        });
        true
    }

    pub fn lookup(&self, key: &str) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn rows(&self) -> &[StagedRow] {
        &self.rows
    }

    pub fn stats(&self) -> &[FieldStats] {
        &self.stats
    }

    /// Offset assigned to a row; 0 until [`Staging::assign_offsets`] ran.
    pub fn offset(&self, row: usize) -> u32 {
        self.offsets.get(row).copied().unwrap_or(0)
    }

    /// Rows that receive an offset, in offset order.
    pub fn written_rows(&self) -> impl Iterator<Item = &StagedRow> {
        self.rows
            .iter()
            .zip(&self.offsets)
            .filter(|(_, offset)| **offset != 0)
            .map(|(row, _)| row)
    }

    pub fn item_count(&self) -> u32 {
        self.offsets.iter().filter(|o| **o != 0).count() as u32
    }
}

/// An add/remove event before row offsets are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Event {
    address: u64,
    action: Action,
    slot: usize,
    row: Option<usize>,
}

/// Everything ingested from the schema's sources.
#[derive(Debug)]
pub struct Staging {
    registers: Vec<StagedRegister>,
    /// Register index for each network slot.
    slots: Vec<usize>,
    events: Vec<Event>,
}

impl Staging {
    /// Read every source of `schema` and stage its rows.
    pub fn ingest(schema: &Schema) -> Result<Self> {
        let mut staging = Staging {
            registers: Vec::with_capacity(schema.registers().len()),
            slots: schema.mapped_registers(),
            events: Vec::new(),
        };

        for def in schema.registers() {
            let origin = def.source.name();
            let rows = def.source.rows()?;
            let mut register = StagedRegister::new(def.fields.len());
            let mut duplicates = 0usize;

            for (ordinal, row) in rows.iter().enumerate() {
                let key = match def.key_column {
                    Some(column) => row
                        .cell(column)
                        .map(|k| k.trim().to_string())
                        .ok_or_else(|| {
                            Error::ingest(&origin, row.line, format!("missing key column {}", column))
                        })?,
                    None => (ordinal + 1).to_string(),
                };
                let values = def
                    .fields
                    .iter()
                    .map(|field| field.codec.normalize(row.cell(field.column)))
                    .collect();
                if !register.insert(key, values) {
                    duplicates += 1;
                }
            }

            if duplicates > 0 {
                log::warn!(
                    "Register {}: skipped {} rows with duplicate keys in {}",
                    def.name,
                    duplicates,
                    origin
                );
            }
            log::debug!("Register {}: staged {} rows", def.name, register.rows.len());
            staging.registers.push(register);
        }

        let slot_of: AHashMap<usize, usize> = staging
            .slots
            .iter()
            .enumerate()
            .map(|(slot, register)| (*register, slot))
            .collect();

        for network in schema.networks() {
            let origin = network.source.name();
            let rows = network.source.rows()?;
            let mut events = Vec::with_capacity(rows.len() * network.mappings.len() * 2);
            let mut unknown = 0usize;

            for row in &rows {
                let (first, _) = address_bounds(&origin, row, network.kind, network.first_column)?;
                let (_, last) = address_bounds(&origin, row, network.kind, network.last_column)?;
                if first > last {
                    return Err(Error::ingest(
                        &origin,
                        row.line,
                        format!("first address {} is above last address {}", first, last),
                    ));
                }

                for mapping in &network.mappings {
                    let slot = slot_of[&mapping.register];
                    let target = row
                        .cell(mapping.column)
                        .map(str::trim)
                        .filter(|key| !key.is_empty());
                    let resolved = target.and_then(|key| staging.registers[mapping.register].lookup(key));
                    if target.is_some() && resolved.is_none() {
                        unknown += 1;
                    }

                    events.push(Event {
                        address: first as u64,
                        action: Action::Add,
                        slot,
                        row: resolved,
                    });
                    events.push(Event {
                        address: last as u64 + 1,
                        action: Action::Remove,
                        slot,
                        row: resolved,
                    });
                }
            }

            if unknown > 0 {
                log::warn!("{} references to unknown register keys in {}", unknown, origin);
            }
            log::debug!("Network {}: staged {} ranges", origin, rows.len());
            staging.events.extend(events);
        }

        Ok(staging)
    }

    /// Mark rows referenced by network events, then everything reachable from
    /// them through relations.
    pub fn mark_reachable(&mut self, schema: &Schema) {
        let mut relations_by_parent: AHashMap<usize, Vec<(usize, usize)>> = AHashMap::new();
        for relation in schema.relations() {
            relations_by_parent
                .entry(relation.parent)
                .or_default()
                .push((relation.attribute, relation.child));
        }

        let mut visited: AHashSet<(usize, usize)> = AHashSet::new();
        let mut worklist: Vec<(usize, usize)> = Vec::new();
        for event in &self.events {
            if let Some(row) = event.row {
                let entry = (self.slots[event.slot], row);
                if visited.insert(entry) {
                    worklist.push(entry);
                }
            }
        }

        while let Some((register, row)) = worklist.pop() {
            self.registers[register].rows[row].used = true;

            let Some(relations) = relations_by_parent.get(&register) else {
                continue;
            };
            for &(attribute, child) in relations {
                let key = self.registers[register].rows[row].values[attribute].to_string();
                if key.is_empty() {
                    continue;
                }
                if let Some(child_row) = self.registers[child].lookup(&key) {
                    if visited.insert((child, child_row)) {
                        worklist.push((child, child_row));
                    }
                }
            }
        }

        for (def, register) in schema.registers().iter().zip(&self.registers) {
            let used = register.rows.iter().filter(|r| r.used).count();
            log::debug!(
                "Register {}: {} of {} rows reachable",
                def.name,
                used,
                register.rows.len()
            );
        }
    }

    /// Number used rows 1..N per register. Unused and all-default rows get 0.
    pub fn assign_offsets(&mut self) {
        for register in &mut self.registers {
            let mut next = 0u32;
            register.offsets = register
                .rows
                .iter()
                .map(|row| {
                    if row.used && !row.is_default() {
                        next += 1;
                        next
                    } else {
                        0
                    }
                })
                .collect();
        }
    }

    /// Events resolved to row offsets, ready for compaction.
    pub fn transitions(&self) -> Vec<Transition> {
        self.events
            .iter()
            .map(|event| {
                let register = &self.registers[self.slots[event.slot]];
                let offset = event.row.map_or(0, |row| register.offset(row));
                Transition {
                    address: event.address,
                    action: event.action,
                    slot: event.slot,
                    offset,
                }
            })
            .collect()
    }

    pub fn registers(&self) -> &[StagedRegister] {
        &self.registers
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    /// Final field layouts of a register.
    pub fn layouts(&self, schema: &Schema, register: usize) -> Vec<FieldLayout> {
        let def = &schema.registers()[register];
        def.fields
            .iter()
            .zip(self.registers[register].stats())
            .map(|(field, stats)| stats.layout(&field.codec))
            .collect()
    }
}

/// Bounds of the address cell at `column`. Ranges in a first-address column
/// contribute their start, in a last-address column their end.
fn address_bounds(
    origin: &str,
    row: &SourceRow,
    kind: AddressKind,
    column: usize,
) -> Result<(u32, u32)> {
    let cell = row
        .cell(column)
        .ok_or_else(|| Error::ingest(origin, row.line, format!("missing address column {}", column)))?;
    kind.parse_bounds(cell).ok_or_else(|| {
        Error::ingest(
            origin,
            row.line,
            format!("invalid {} address {:?}", kind, cell.trim()),
        )
    })
}
