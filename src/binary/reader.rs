//! Memory-mapped database reader.

use memmap2::Mmap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::Path;

use super::format::*;
use crate::field::{FieldLayout, Value, Width};
use crate::{Error, Result};

/// Whether a [`Database`] can serve queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    Ready,
    /// Opening failed; carries the open error message.
    Failed(String),
}

/// One decoded register row, fields in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// Value of a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Whether every field holds its default value.
    pub fn is_default(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_default())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Result of a point query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup {
    /// First address of the containing range.
    pub first: Ipv4Addr,
    /// Last address of the containing range.
    pub last: Ipv4Addr,
    /// Row per register mapped into the network.
    pub registers: BTreeMap<String, Row>,
}

impl Lookup {
    pub fn register(&self, name: &str) -> Option<&Row> {
        self.registers.get(name)
    }
}

/// Database metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct About {
    pub version: u8,
    pub author: String,
    pub license: String,
    pub created: u32,
    /// Number of range records.
    pub network_count: u32,
    /// Field names per register.
    pub registers: BTreeMap<String, Vec<String>>,
}

/// A relation from the header, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub parent: String,
    pub attribute: String,
    pub child: String,
}

struct Loaded {
    mmap: Mmap,
    header: Header,
    network_offset: usize,
    register_offsets: Vec<usize>,
    /// Register position for each network field.
    slot_registers: Vec<usize>,
    created: u32,
    author: String,
    license: String,
}

enum Inner {
    Ready(Box<Loaded>),
    Failed(String),
}

/// Memory-mapped database.
///
/// Queries decode only the bytes they touch. Any number of threads may
/// query one instance.
pub struct Database {
    inner: Inner,
}

impl Database {
    /// Open and validate a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < PREAMBLE_SIZE {
            return Err(Error::Truncated {
                section: "preamble",
                expected: PREAMBLE_SIZE,
                actual: len,
            });
        }

        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mmap(mmap)
    }

    /// Open a database, turning any failure into a [`ReaderState::Failed`]
    /// reader instead of an error.
    pub fn load(path: &Path) -> Self {
        match Self::open(path) {
            Ok(db) => db,
            Err(e) => {
                log::warn!("Failed to open database {:?}: {}", path, e);
                Self {
                    inner: Inner::Failed(e.to_string()),
                }
            }
        }
    }

    /// Open a database from bytes.
    ///
    /// This writes the data to a temp file and then memory-maps it.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        use std::io::Write;

        if data.len() < PREAMBLE_SIZE {
            return Err(Error::Truncated {
                section: "preamble",
                expected: PREAMBLE_SIZE,
                actual: data.len(),
            });
        }

        // Write to a temp file and mmap it
        let mut temp_file = tempfile::tempfile()?;
        temp_file.write_all(&data)?;

        let mmap = unsafe { Mmap::map(&temp_file)? };
        Self::from_mmap(mmap)
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        let loaded = Loaded::parse(mmap)?;
        log::debug!(
            "Opened database v{}: {} registers, {} records",
            loaded.header.version,
            loaded.header.registers.len(),
            loaded.header.network.item_count
        );
        Ok(Self {
            inner: Inner::Ready(Box::new(loaded)),
        })
    }

    pub fn state(&self) -> ReaderState {
        match &self.inner {
            Inner::Ready(_) => ReaderState::Ready,
            Inner::Failed(msg) => ReaderState::Failed(msg.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(_))
    }

    fn loaded(&self) -> Result<&Loaded> {
        match &self.inner {
            Inner::Ready(loaded) => Ok(loaded),
            Inner::Failed(msg) => Err(Error::ReaderFailed(msg.clone())),
        }
    }

    /// Find the range containing `ip` and the rows attached to it.
    pub fn find(&self, ip: Ipv4Addr) -> Result<Lookup> {
        let loaded = self.loaded()?;
        let address = u32::from(ip);
        let pos = loaded.locate(address)?;

        let count = loaded.record_count();
        let first = loaded.record_start(pos);
        let last = if pos + 1 < count {
            loaded.record_start(pos + 1).wrapping_sub(1)
        } else {
            u32::MAX
        };

        let mut registers = BTreeMap::new();
        let row = loaded.network_row(pos);
        let mut at = ADDRESS_SIZE;
        for (field, &register) in loaded.header.network.fields.iter().zip(&loaded.slot_registers) {
            let width = field.layout.width as usize;
            let offset = Width::from_bytes(width as u8)
                .map(|w| w.read(&row[at..at + width]))
                .unwrap_or(0);
            at += width;
            registers.insert(field.name.clone(), loaded.row(register, offset)?);
        }

        Ok(Lookup {
            first: Ipv4Addr::from(first),
            last: Ipv4Addr::from(last),
            registers,
        })
    }

    /// Parse a dotted-quad address and [`find`](Self::find) it.
    pub fn find_str(&self, address: &str) -> Result<Lookup> {
        let ip: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        self.find(ip)
    }

    /// Metadata and register shapes.
    pub fn about(&self) -> Result<About> {
        let loaded = self.loaded()?;
        Ok(About {
            version: loaded.header.version,
            author: loaded.author.clone(),
            license: loaded.license.clone(),
            created: loaded.created,
            network_count: loaded.header.network.item_count,
            registers: loaded
                .header
                .registers
                .iter()
                .map(|r| (r.name.clone(), r.field_names()))
                .collect(),
        })
    }

    /// All stored rows of a register, excluding the default row.
    pub fn dump_register(&self, name: &str) -> Result<Vec<Row>> {
        let loaded = self.loaded()?;
        let register = loaded
            .header
            .registers
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))?;

        let items = loaded.header.registers[register].item_count as u64;
        (1..=items).map(|offset| loaded.row(register, offset)).collect()
    }

    /// Relations declared when the database was compiled.
    pub fn relations(&self) -> Result<Vec<Relation>> {
        let loaded = self.loaded()?;
        let registers = &loaded.header.registers;
        Ok(loaded
            .header
            .relations
            .iter()
            .map(|r| {
                let parent = &registers[r.parent as usize];
                Relation {
                    parent: parent.name.clone(),
                    attribute: parent.fields[r.attribute as usize].name.clone(),
                    child: registers[r.child as usize].name.clone(),
                }
            })
            .collect())
    }

    /// Number of range records.
    pub fn record_count(&self) -> Result<usize> {
        Ok(self.loaded()?.record_count())
    }
}

impl Loaded {
    fn parse(mmap: Mmap) -> Result<Self> {
        let data: &[u8] = &mmap;
        let mut cursor = ByteCursor::new(data, "preamble");
        if cursor.take(MAGIC.len())? != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = cursor.u8()?;
        if !is_supported_version(version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let length_width = cursor.width()?;
        let header_len = cursor.uint(length_width)? as usize;

        let blob_start = PREAMBLE_SIZE + length_width.bytes();
        let blob_end = blob_start + header_len;
        if data.len() < blob_end {
            return Err(Error::Truncated {
                section: "header",
                expected: blob_end,
                actual: data.len(),
            });
        }
        let header = Header::decode(version, &data[blob_start..blob_end])?;

        let network_offset = blob_end;
        let mut end = network_offset as u64 + header.network.network_size();
        let mut register_offsets = Vec::with_capacity(header.registers.len());
        for register in &header.registers {
            register_offsets.push(end);
            end += register.register_size();
        }

        let trailer_end = end + (CREATED_SIZE + AUTHOR_FIELD_SIZE) as u64;
        if (data.len() as u64) < trailer_end {
            return Err(Error::Truncated {
                section: "sections",
                expected: trailer_end as usize,
                actual: data.len(),
            });
        }
        let trailer = end as usize;
        let register_offsets = register_offsets.into_iter().map(|o| o as usize).collect();

        let created = Width::U32.read(&data[trailer..]) as u32;
        let author_start = trailer + CREATED_SIZE;
        let author_bytes = &data[author_start..author_start + AUTHOR_FIELD_SIZE];
        let author = String::from_utf8_lossy(author_bytes).trim_end().to_string();
        let license = String::from_utf8_lossy(&data[author_start + AUTHOR_FIELD_SIZE..]).into_owned();

        let slot_registers = header
            .network
            .fields
            .iter()
            .map(|field| {
                header
                    .registers
                    .iter()
                    .position(|r| r.name == field.name)
                    .ok_or_else(|| Error::Corrupt(format!("invalid network field {}", field.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        let loaded = Self {
            mmap,
            header,
            network_offset,
            register_offsets,
            slot_registers,
            created,
            author,
            license,
        };
        loaded.check_record_order()?;
        Ok(loaded)
    }

    /// Record starts must begin at 0.0.0.0 and strictly increase.
    fn check_record_order(&self) -> Result<()> {
        if self.record_start(0) != 0 {
            return Err(Error::Corrupt("first record does not start at 0.0.0.0".into()));
        }
        let mut previous = 0;
        for pos in 1..self.record_count() {
            let start = self.record_start(pos);
            if start <= previous {
                return Err(Error::Corrupt(format!(
                    "record {} starts at {}, not after {}",
                    pos,
                    Ipv4Addr::from(start),
                    Ipv4Addr::from(previous)
                )));
            }
            previous = start;
        }
        Ok(())
    }

    fn record_count(&self) -> usize {
        self.header.network.item_count as usize
    }

    fn network_row(&self, pos: usize) -> &[u8] {
        let width = self.header.network.row_width as usize;
        let start = self.network_offset + pos * width;
        &self.mmap[start..start + width]
    }

    fn record_start(&self, pos: usize) -> u32 {
        Width::U32.read(self.network_row(pos)) as u32
    }

    /// Position of the record containing `address`.
    fn locate(&self, address: u32) -> Result<usize> {
        let index = &self.header.index;
        let octet = (address >> 24) as usize;
        let mut lo = index[octet] as usize;
        if octet > 0 {
            lo = lo.saturating_sub(1);
        }
        let hi = index[octet + 1..]
            .iter()
            .find(|&&entry| entry != index[octet])
            .map_or(self.record_count(), |&entry| entry as usize);

        if self.record_start(lo) > address {
            return Err(Error::Corrupt(format!(
                "no record covers {}",
                Ipv4Addr::from(address)
            )));
        }

        let step = ((hi - lo) as f64).sqrt().ceil().max(1.0) as usize;
        let mut pos = lo;
        while pos + step < hi && self.record_start(pos + step) <= address {
            pos += step;
        }
        while pos + 1 < hi && self.record_start(pos + 1) <= address {
            pos += 1;
        }

        // An index entry pointing at the wrong octet stops the scan early.
        if pos + 1 < self.record_count() && self.record_start(pos + 1) <= address {
            return Err(Error::Corrupt(format!(
                "octet index misses the record covering {}",
                Ipv4Addr::from(address)
            )));
        }
        Ok(pos)
    }

    /// Decode row `offset` of a register. Offset 0 is the default row.
    fn row(&self, register: usize, offset: u64) -> Result<Row> {
        let descriptor = &self.header.registers[register];
        if offset > descriptor.item_count as u64 {
            return Err(Error::Corrupt(format!(
                "offset {} beyond {} rows of register {}",
                offset, descriptor.item_count, descriptor.name
            )));
        }

        let width = descriptor.row_width as usize;
        let start = self.register_offsets[register] + offset as usize * width;
        let bytes = &self.mmap[start..start + width];

        let mut at = 0;
        let fields = descriptor
            .fields
            .iter()
            .map(|field| {
                let layout: &FieldLayout = &field.layout;
                let end = at + layout.width as usize;
                let value = layout.decode(&bytes[at..end]);
                at = end;
                (field.name.clone(), value)
            })
            .collect();
        Ok(Row { fields })
    }
}
