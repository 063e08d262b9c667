//! Binary format constants and header structures.

use crate::field::{Encoding, FieldLayout, Width};
use crate::{Error, Result};

/// Magic bytes identifying a database file.
pub const MAGIC: [u8; 3] = *b"DIT";

/// Current format version.
pub const FORMAT_VERSION: u8 = 2;

/// Oldest format version still readable. Version 1 has no relation table.
pub const MIN_FORMAT_VERSION: u8 = 1;

/// Magic, version and header length width.
pub const PREAMBLE_SIZE: usize = MAGIC.len() + 2;

/// Size of the creation timestamp in the trailer.
pub const CREATED_SIZE: usize = 4;

/// Fixed size of the author field in the trailer.
pub const AUTHOR_FIELD_SIZE: usize = 128;

/// Author names are cut to this many characters.
pub const AUTHOR_MAX_CHARS: usize = 64;

/// Name of the network section descriptor.
pub const NETWORK_SECTION: &str = "n";

/// Width of a range start address in a network row.
pub const ADDRESS_SIZE: usize = 4;

/// Entries in the octet index.
pub const INDEX_ENTRIES: usize = 256;

/// Whether a format version can be read and written.
pub fn is_supported_version(version: u8) -> bool {
    (MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version)
}

/// A named field inside a section descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub layout: FieldLayout,
}

/// Shape of one fixed-width row section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub row_width: u32,
    pub item_count: u32,
}

impl SectionDescriptor {
    /// Sum of the field widths.
    pub fn fields_width(&self) -> u64 {
        self.fields.iter().map(|f| f.layout.width as u64).sum()
    }

    /// Bytes occupied by a register section, including the default row 0.
    pub fn register_size(&self) -> u64 {
        self.row_width as u64 * (self.item_count as u64 + 1)
    }

    /// Bytes occupied by the network section.
    pub fn network_size(&self) -> u64 {
        self.row_width as u64 * self.item_count as u64
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// One row of the relation table, as register and field positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationEntry {
    pub parent: u8,
    pub attribute: u8,
    pub child: u8,
}

/// Decoded header blob.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub relations: Vec<RelationEntry>,
    pub registers: Vec<SectionDescriptor>,
    pub network: SectionDescriptor,
    pub index: [u32; INDEX_ENTRIES],
}

impl Header {
    /// Serialize the header blob (everything after the header length).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.registers.len() as u8);

        if self.version >= 2 {
            let widest = self
                .relations
                .iter()
                .flat_map(|r| [r.parent, r.attribute, r.child])
                .max()
                .unwrap_or(0);
            let width = Width::for_count(widest as u64);
            out.push(width.bytes() as u8);
            out.extend_from_slice(&(self.relations.len() as u16).to_be_bytes());
            for relation in &self.relations {
                width.write(relation.parent as u64, &mut out);
                width.write(relation.attribute as u64, &mut out);
                width.write(relation.child as u64, &mut out);
            }
        }

        let sections = || self.registers.iter().chain(std::iter::once(&self.network));
        let row_width = Width::for_count(sections().map(|s| s.row_width as u64).max().unwrap_or(0));
        let item_count = Width::for_count(sections().map(|s| s.item_count as u64).max().unwrap_or(0));
        out.push(row_width.bytes() as u8);
        out.push(item_count.bytes() as u8);

        for section in sections() {
            write_name(&section.name, &mut out);
            out.push(section.fields.len() as u8);
            for field in &section.fields {
                write_name(&field.name, &mut out);
                out.push(field.layout.encoding.as_u8());
                out.extend_from_slice(&field.layout.width.to_be_bytes());
                out.push(field.layout.precision);
            }
            row_width.write(section.row_width as u64, &mut out);
            item_count.write(section.item_count as u64, &mut out);
        }

        for entry in &self.index {
            out.extend_from_slice(&entry.to_be_bytes());
        }
        out
    }

    /// Parse a header blob written with `version`.
    pub fn decode(version: u8, blob: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(blob, "header");
        let register_count = cursor.u8()? as usize;

        let mut relations = Vec::new();
        if version >= 2 {
            let width = cursor.width()?;
            let count = cursor.u16()? as usize;
            relations.reserve(count);
            for _ in 0..count {
                let parent = cursor.uint(width)?;
                let attribute = cursor.uint(width)?;
                let child = cursor.uint(width)?;
                let narrow = |v: u64| {
                    u8::try_from(v)
                        .map_err(|_| Error::Corrupt(format!("relation position {} out of range", v)))
                };
                relations.push(RelationEntry {
                    parent: narrow(parent)?,
                    attribute: narrow(attribute)?,
                    child: narrow(child)?,
                });
            }
        }

        let row_width = cursor.width()?;
        let item_count = cursor.width()?;

        let mut registers = Vec::with_capacity(register_count);
        for _ in 0..register_count {
            registers.push(cursor.section(row_width, item_count)?);
        }
        let network = cursor.section(row_width, item_count)?;

        let mut index = [0u32; INDEX_ENTRIES];
        for entry in index.iter_mut() {
            *entry = cursor.u32()?;
        }

        if cursor.remaining() != 0 {
            return Err(Error::Corrupt(format!(
                "{} unexpected bytes after the octet index",
                cursor.remaining()
            )));
        }

        let header = Header {
            version,
            relations,
            registers,
            network,
            index,
        };
        header.validate()?;
        Ok(header)
    }

    /// Check the header is self-consistent.
    pub fn validate(&self) -> Result<()> {
        for section in &self.registers {
            for field in &section.fields {
                if !field.layout.is_valid() {
                    return Err(Error::Corrupt(format!(
                        "field {}.{} has invalid width {}",
                        section.name, field.name, field.layout.width
                    )));
                }
            }
            if section.fields_width() != section.row_width as u64 {
                return Err(Error::Corrupt(format!(
                    "register {} row width {} does not match its fields",
                    section.name, section.row_width
                )));
            }
        }

        if self.network.name != NETWORK_SECTION {
            return Err(Error::Corrupt(format!(
                "unexpected network section name {:?}",
                self.network.name
            )));
        }
        for field in &self.network.fields {
            let register = self.registers.iter().find(|r| r.name == field.name);
            let valid = field.layout.encoding == Encoding::Unsigned && field.layout.is_valid();
            if register.is_none() || !valid {
                return Err(Error::Corrupt(format!(
                    "invalid network field {}",
                    field.name
                )));
            }
        }
        if self.network.fields_width() + ADDRESS_SIZE as u64 != self.network.row_width as u64 {
            return Err(Error::Corrupt(format!(
                "network row width {} does not match its fields",
                self.network.row_width
            )));
        }
        if self.network.item_count == 0 {
            return Err(Error::Corrupt("network section has no records".into()));
        }

        if self.relations.len() > u16::MAX as usize {
            return Err(Error::Corrupt(format!(
                "{} relations exceed the relation table",
                self.relations.len()
            )));
        }
        for relation in &self.relations {
            let parent = self.registers.get(relation.parent as usize);
            let attribute_ok = parent.is_some_and(|p| (relation.attribute as usize) < p.fields.len());
            if !attribute_ok || relation.child as usize >= self.registers.len() {
                return Err(Error::Corrupt(format!("invalid relation {:?}", relation)));
            }
        }

        let records = self.network.item_count;
        if self.index[0] != 0 {
            return Err(Error::Corrupt("octet index must start at record 0".into()));
        }
        for pair in self.index.windows(2) {
            if pair[1] < pair[0] || pair[1] >= records {
                return Err(Error::Corrupt("octet index is out of order or out of range".into()));
            }
        }
        Ok(())
    }
}

/// Encode the fixed preamble plus header length for a blob of `blob_len` bytes.
pub fn encode_preamble(version: u8, blob_len: usize) -> Vec<u8> {
    let width = Width::for_count(blob_len as u64);
    let mut out = Vec::with_capacity(PREAMBLE_SIZE + width.bytes());
    out.extend_from_slice(&MAGIC);
    out.push(version);
    out.push(width.bytes() as u8);
    width.write(blob_len as u64, &mut out);
    out
}

fn write_name(name: &str, out: &mut Vec<u8>) {
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

/// Bounds-checked big-endian reader over a byte slice.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8], section: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            section,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::Truncated {
                section: self.section,
                expected: self.pos + len,
                actual: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(Width::U16.read(self.take(2)?) as u16)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(Width::U32.read(self.take(4)?) as u32)
    }

    pub(crate) fn uint(&mut self, width: Width) -> Result<u64> {
        Ok(width.read(self.take(width.bytes())?))
    }

    /// A width byte, which must be 1, 2 or 4.
    pub(crate) fn width(&mut self) -> Result<Width> {
        let raw = self.u8()?;
        Width::from_bytes(raw).ok_or_else(|| Error::Corrupt(format!("invalid width {}", raw)))
    }

    fn name(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::Corrupt("name is not valid UTF-8".into()))
    }

    fn section(&mut self, row_width: Width, item_count: Width) -> Result<SectionDescriptor> {
        let name = self.name()?;
        let field_count = self.u8()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field_name = self.name()?;
            let kind = self.u8()?;
            let encoding = Encoding::from_u8(kind)
                .ok_or_else(|| Error::Corrupt(format!("unknown field kind {}", kind)))?;
            let width = self.u16()?;
            let precision = self.u8()?;
            fields.push(FieldDescriptor {
                name: field_name,
                layout: FieldLayout::new(encoding, width, precision),
            });
        }
        let row_width = u32::try_from(self.uint(row_width)?)
            .map_err(|_| Error::Corrupt("row width out of range".into()))?;
        let item_count = u32::try_from(self.uint(item_count)?)
            .map_err(|_| Error::Corrupt("item count out of range".into()))?;
        Ok(SectionDescriptor {
            name,
            fields,
            row_width,
            item_count,
        })
    }
}
