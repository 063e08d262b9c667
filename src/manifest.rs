//! YAML build manifests.
//!
//! A manifest describes a whole build: metadata, registers with their
//! fields, networks and relations. Source paths are relative to the
//! manifest's directory.
//!
//! ```yaml
//! author: Example
//! license: CC BY 4.0
//! registers:
//!   - name: country
//!     file: countries.csv
//!     first_row: 2
//!     key_column: 1
//!     fields:
//!       - { name: code, column: 2, type: text, transform: lower }
//! networks:
//!   - file: ranges.csv
//!     address: prefix
//!     first_column: 1
//!     last_column: 1
//!     registers:
//!       - { register: country, column: 2 }
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::address::AddressKind;
use crate::compiler::Compiler;
use crate::field::{FieldCodec, Rounding, Transform};
use crate::source::DelimitedFile;
use crate::{Error, Result};

/// Top-level manifest.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildManifest {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    /// Creation time in seconds since the epoch; defaults to build time.
    pub time: Option<u32>,
    pub format_version: Option<u8>,
    #[serde(default)]
    pub registers: Vec<RegisterSpec>,
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
}

/// Register entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSpec {
    pub name: String,
    pub file: PathBuf,
    pub delimiter: Option<String>,
    pub first_row: Option<usize>,
    pub key_column: Option<usize>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Field kind names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Unsigned,
    Signed,
    Decimal,
    Text,
}

/// Field entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    pub column: usize,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub precision: Option<u8>,
    pub rounding: Option<Rounding>,
    pub transform: Option<Transform>,
    pub max_length: Option<usize>,
}

impl FieldSpec {
    /// Build the codec, applying every option through its validating setter.
    pub fn codec(&self) -> Result<FieldCodec> {
        let mut codec = match self.field_type {
            FieldType::Unsigned => FieldCodec::unsigned(),
            FieldType::Signed => FieldCodec::signed(),
            FieldType::Decimal => FieldCodec::decimal(self.precision.unwrap_or(0))?,
            FieldType::Text => FieldCodec::text(),
        };
        if self.precision.is_some() && self.field_type != FieldType::Decimal {
            return Err(Error::config(
                "precision",
                format!("field {} is not decimal", self.name),
            ));
        }
        if let Some(min) = self.min {
            codec = codec.with_min(min)?;
        }
        if let Some(max) = self.max {
            codec = codec.with_max(max)?;
        }
        if let Some(rounding) = self.rounding {
            codec = codec.with_rounding(rounding)?;
        }
        if let Some(transform) = self.transform {
            codec = codec.with_transform(transform)?;
        }
        if let Some(max_length) = self.max_length {
            codec = codec.with_max_length(max_length)?;
        }
        Ok(codec)
    }
}

/// Network entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub file: PathBuf,
    pub delimiter: Option<String>,
    pub first_row: Option<usize>,
    pub address: AddressKind,
    pub first_column: usize,
    /// Defaults to `first_column`.
    pub last_column: Option<usize>,
    #[serde(default)]
    pub registers: Vec<MappingSpec>,
}

/// Register key column inside a network.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingSpec {
    pub register: String,
    pub column: usize,
}

/// Relation entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSpec {
    pub parent: String,
    pub attribute: String,
    pub child: String,
}

impl BuildManifest {
    /// Parse a manifest from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a manifest file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Replay the manifest through the compiler API.
    ///
    /// Relative source paths are resolved against `base_dir`.
    pub fn into_compiler(self, base_dir: &Path) -> Result<Compiler> {
        let mut compiler = Compiler::new();
        compiler.set_author(&self.author);
        compiler.set_license(&self.license);
        if let Some(time) = self.time {
            compiler.set_creation_time(time);
        }
        if let Some(version) = self.format_version {
            compiler.set_format_version(version)?;
        }

        for register in &self.registers {
            let source = delimited(base_dir, &register.file, register.delimiter.as_deref(), register.first_row)?;
            let id = compiler.define_register(&register.name, source, register.key_column)?;
            for field in &register.fields {
                compiler.add_field(id, &field.name, field.column, field.codec()?)?;
            }
        }

        for network in &self.networks {
            let source = delimited(base_dir, &network.file, network.delimiter.as_deref(), network.first_row)?;
            let last_column = network.last_column.unwrap_or(network.first_column);
            let id = compiler.define_network(source, network.address, network.first_column, last_column)?;
            for mapping in &network.registers {
                compiler.map_register(id, mapping.column, &mapping.register)?;
            }
        }

        for relation in &self.relations {
            compiler.declare_relation(&relation.parent, &relation.attribute, &relation.child)?;
        }

        log::debug!(
            "Loaded manifest: {} registers, {} networks, {} relations",
            self.registers.len(),
            self.networks.len(),
            self.relations.len()
        );
        Ok(compiler)
    }
}

fn delimited(
    base_dir: &Path,
    file: &Path,
    delimiter: Option<&str>,
    first_row: Option<usize>,
) -> Result<DelimitedFile> {
    let mut source = DelimitedFile::new(base_dir.join(file));
    if let Some(delimiter) = delimiter {
        let mut chars = delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => source = source.with_delimiter(c)?,
            _ => {
                return Err(Error::config(
                    "delimiter",
                    format!("{:?} must be a single character", delimiter),
                ))
            }
        }
    }
    if let Some(first_row) = first_row {
        source = source.with_first_row(first_row)?;
    }
    Ok(source)
}
