//! Database file writer.

use std::io::Write;
use std::path::Path;

use super::format::*;
use crate::compiler::compactor::RangeRecord;
use crate::field::{FieldLayout, Value};
use crate::{Error, Result};

/// A register ready for serialization.
#[derive(Debug, Clone, Default)]
pub struct IntermediateRegister {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    /// Rows 1..=N; row 0 is written as the all-default row.
    pub rows: Vec<Vec<Value>>,
}

impl IntermediateRegister {
    fn descriptor(&self) -> SectionDescriptor {
        let row_width = self.fields.iter().map(|f| f.layout.width as u32).sum();
        SectionDescriptor {
            name: self.name.clone(),
            fields: self.fields.clone(),
            row_width,
            item_count: self.rows.len() as u32,
        }
    }
}

/// Intermediate representation of a compiled database.
#[derive(Debug, Clone)]
pub struct IntermediateDatabase {
    pub version: u8,
    pub registers: Vec<IntermediateRegister>,
    pub relations: Vec<RelationEntry>,
    /// Register position for each network slot.
    pub network: Vec<usize>,
    pub records: Vec<RangeRecord>,
    pub index: [u32; INDEX_ENTRIES],
    pub created: u32,
    pub author: String,
    pub license: String,
}

impl Default for IntermediateDatabase {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            registers: Vec::new(),
            relations: Vec::new(),
            network: Vec::new(),
            records: vec![RangeRecord {
                start: 0,
                offsets: Vec::new(),
            }],
            index: [0; INDEX_ENTRIES],
            created: 0,
            author: String::new(),
            license: String::new(),
        }
    }
}

impl IntermediateDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn network_descriptor(&self) -> SectionDescriptor {
        let fields: Vec<FieldDescriptor> = self
            .network
            .iter()
            .map(|&register| {
                let register = &self.registers[register];
                FieldDescriptor {
                    name: register.name.clone(),
                    layout: FieldLayout::offset(register.rows.len() as u32),
                }
            })
            .collect();
        let row_width =
            ADDRESS_SIZE as u32 + fields.iter().map(|f| f.layout.width as u32).sum::<u32>();
        SectionDescriptor {
            name: NETWORK_SECTION.to_string(),
            fields,
            row_width,
            item_count: self.records.len() as u32,
        }
    }

    /// Header describing this database.
    pub fn header(&self) -> Header {
        Header {
            version: self.version,
            relations: if self.version >= 2 {
                self.relations.clone()
            } else {
                Vec::new()
            },
            registers: self.registers.iter().map(|r| r.descriptor()).collect(),
            network: self.network_descriptor(),
            index: self.index,
        }
    }
}

/// Database file writer.
pub struct DatabaseWriter {
    buffer: Vec<u8>,
}

impl DatabaseWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024 * 1024), // 1MB initial
        }
    }

    /// Serialize a database.
    pub fn write(&mut self, db: &IntermediateDatabase) -> Result<Vec<u8>> {
        if !is_supported_version(db.version) {
            return Err(Error::config(
                "format_version",
                format!(
                    "supported versions are {}..={}, got {}",
                    MIN_FORMAT_VERSION, FORMAT_VERSION, db.version
                ),
            ));
        }
        self.buffer.clear();

        let header = db.header();
        header.validate()?;
        let blob = header.encode();
        self.buffer.extend_from_slice(&encode_preamble(db.version, blob.len()));
        self.buffer.extend_from_slice(&blob);

        self.write_network(db, &header.network)?;
        for (register, descriptor) in db.registers.iter().zip(&header.registers) {
            self.write_register(register, descriptor)?;
        }
        self.write_trailer(db);

        Ok(std::mem::take(&mut self.buffer))
    }

    /// Serialize a database and atomically publish it at `path`.
    ///
    /// The file is staged next to `path` and renamed into place, so on any
    /// failure no file appears at `path`.
    pub fn write_to_path(&mut self, db: &IntermediateDatabase, path: &Path) -> Result<usize> {
        let data = self.write(db)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(&data)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(path).map_err(|e| e.error)?;

        Ok(data.len())
    }

    fn write_network(&mut self, db: &IntermediateDatabase, descriptor: &SectionDescriptor) -> Result<()> {
        for record in &db.records {
            if record.offsets.len() != descriptor.fields.len() {
                return Err(Error::Corrupt(format!(
                    "record at {} has {} offsets, expected {}",
                    record.start,
                    record.offsets.len(),
                    descriptor.fields.len()
                )));
            }
            self.buffer.extend_from_slice(&record.start.to_be_bytes());
            for (offset, field) in record.offsets.iter().zip(&descriptor.fields) {
                field.layout.encode(&Value::Int(*offset as i64), &mut self.buffer);
            }
        }
        Ok(())
    }

    fn write_register(
        &mut self,
        register: &IntermediateRegister,
        descriptor: &SectionDescriptor,
    ) -> Result<()> {
        for field in &descriptor.fields {
            field.layout.encode(&field.layout.default_value(), &mut self.buffer);
        }
        for row in &register.rows {
            if row.len() != descriptor.fields.len() {
                return Err(Error::Corrupt(format!(
                    "register {} row has {} values, expected {}",
                    register.name,
                    row.len(),
                    descriptor.fields.len()
                )));
            }
            for (value, field) in row.iter().zip(&descriptor.fields) {
                field.layout.encode(value, &mut self.buffer);
            }
        }
        Ok(())
    }

    fn write_trailer(&mut self, db: &IntermediateDatabase) {
        self.buffer.extend_from_slice(&db.created.to_be_bytes());

        let mut author: String = db.author.chars().take(AUTHOR_MAX_CHARS).collect();
        while author.len() > AUTHOR_FIELD_SIZE {
            author.pop();
        }
        self.buffer.extend_from_slice(author.as_bytes());
        self.buffer
            .resize(self.buffer.len() + (AUTHOR_FIELD_SIZE - author.len()), b' ');

        self.buffer.extend_from_slice(db.license.as_bytes());
    }
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}
