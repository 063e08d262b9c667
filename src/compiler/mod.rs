//! Database compiler.
//!
//! Registers, networks and relations are declared through [`Compiler`];
//! `compile` then runs the pipeline:
//!
//! 1. stage every source (normalize rows, collect range transitions)
//! 2. mark rows reachable from networks and relations, assign row offsets
//! 3. compact transitions into range records and build the octet index
//! 4. measure field widths and write the file

pub mod compactor;
pub mod staging;

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::address::AddressKind;
use crate::binary::{
    is_supported_version, DatabaseWriter, FieldDescriptor, IntermediateDatabase,
    IntermediateRegister, RelationEntry, FORMAT_VERSION, MIN_FORMAT_VERSION,
};
use crate::field::FieldCodec;
use crate::schema::{NetworkId, RegisterId, Schema};
use crate::source::RowSource;
use crate::{Error, Result};

use compactor::compact;
use staging::Staging;

/// Summary of a finished compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    /// Number of range records written.
    pub record_count: usize,
    /// Rows written per register, in definition order.
    pub register_items: Vec<(String, u32)>,
    /// Size of the output in bytes.
    pub file_size: usize,
}

/// Builds a database from declared sources.
#[derive(Debug)]
pub struct Compiler {
    schema: Schema,
    author: String,
    license: String,
    created: Option<u32>,
    format_version: u8,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(),
            author: String::new(),
            license: String::new(),
            created: None,
            format_version: FORMAT_VERSION,
        }
    }

    /// Define a register read from `source`.
    ///
    /// Without a key column, rows are keyed by their 1-based ordinal.
    pub fn define_register<S: RowSource + 'static>(
        &mut self,
        name: &str,
        source: S,
        key_column: Option<usize>,
    ) -> Result<RegisterId> {
        self.schema.define_register(name, Arc::new(source), key_column)
    }

    pub fn add_field(
        &mut self,
        register: RegisterId,
        name: &str,
        column: usize,
        codec: FieldCodec,
    ) -> Result<()> {
        self.schema.add_field(register, name, column, codec)
    }

    /// Define an address-range source. `first_column` and `last_column` may
    /// be equal for single-column prefix or range notation.
    pub fn define_network<S: RowSource + 'static>(
        &mut self,
        source: S,
        kind: AddressKind,
        first_column: usize,
        last_column: usize,
    ) -> Result<NetworkId> {
        self.schema
            .define_network(Arc::new(source), kind, first_column, last_column)
    }

    /// Attach a register to a network; `column` holds its keys.
    pub fn map_register(&mut self, network: NetworkId, column: usize, register: &str) -> Result<()> {
        self.schema.map_register(network, column, register)
    }

    /// Declare that `parent.attribute` holds keys of `child`.
    pub fn declare_relation(&mut self, parent: &str, attribute: &str, child: &str) -> Result<()> {
        self.schema.declare_relation(parent, attribute, child)
    }

    pub fn set_author(&mut self, author: &str) {
        self.author = author.to_string();
    }

    pub fn set_license(&mut self, license: &str) {
        self.license = license.to_string();
    }

    /// Creation time in seconds since the epoch. Defaults to now.
    pub fn set_creation_time(&mut self, created: u32) {
        self.created = Some(created);
    }

    pub fn set_format_version(&mut self, version: u8) -> Result<()> {
        if !is_supported_version(version) {
            return Err(Error::config(
                "version",
                format!(
                    "supported versions are {}..={}, got {}",
                    MIN_FORMAT_VERSION, FORMAT_VERSION, version
                ),
            ));
        }
        self.format_version = version;
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run ingestion, reachability and compaction.
    pub fn build(&self) -> Result<IntermediateDatabase> {
        self.schema.validate()?;

        let mut staging = Staging::ingest(&self.schema)?;
        staging.mark_reachable(&self.schema);
        staging.assign_offsets();

        let compaction = compact(staging.transitions(), staging.slots().len());
        log::info!(
            "Compacted {} networks into {} range records",
            self.schema.networks().len(),
            compaction.records.len()
        );

        let registers = self
            .schema
            .registers()
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let fields = def
                    .fields
                    .iter()
                    .zip(staging.layouts(&self.schema, index))
                    .map(|(field, layout)| FieldDescriptor {
                        name: field.name.clone(),
                        layout,
                    })
                    .collect();
                let rows = staging.registers()[index]
                    .written_rows()
                    .map(|row| row.values.clone())
                    .collect();
                IntermediateRegister {
                    name: def.name.clone(),
                    fields,
                    rows,
                }
            })
            .collect();

        let relations = self
            .schema
            .relations()
            .iter()
            .map(|r| RelationEntry {
                parent: r.parent as u8,
                attribute: r.attribute as u8,
                child: r.child as u8,
            })
            .collect();

        Ok(IntermediateDatabase {
            version: self.format_version,
            registers,
            relations,
            network: staging.slots().to_vec(),
            records: compaction.records,
            index: compaction.index,
            created: self.created.unwrap_or_else(now),
            author: self.author.clone(),
            license: self.license.clone(),
        })
    }

    /// Compile into an in-memory file image.
    pub fn compile_to_bytes(&self) -> Result<Vec<u8>> {
        let db = self.build()?;
        DatabaseWriter::new().write(&db)
    }

    /// Compile and atomically publish the database at `path`.
    pub fn compile(&self, path: &Path) -> Result<CompileReport> {
        let db = self.build()?;
        let file_size = DatabaseWriter::new().write_to_path(&db, path)?;

        let report = CompileReport {
            record_count: db.records.len(),
            register_items: db
                .registers
                .iter()
                .map(|r| (r.name.clone(), r.rows.len() as u32))
                .collect(),
            file_size,
        };
        log::info!(
            "Compiled {:?}: {} records, {} registers, {} bytes",
            path,
            report.record_count,
            report.register_items.len(),
            report.file_size
        );
        Ok(report)
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
