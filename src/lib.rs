//! Iptool - compiler and reader for compact IPv4 range databases.
//!
//! A database maps every IPv4 address to one row of each "register"
//! (country, city, ASN, ...) attached to the range containing it.
//!
//! # Features
//!
//! - **Typed fixed-width rows**: unsigned, signed, decimal and text fields
//!   sized to the narrowest width their data needs
//! - **Interval compaction**: overlapping source ranges resolve to a minimal
//!   set of non-overlapping records covering the whole address space
//! - **Reachability pruning**: only rows referenced by a range, directly or
//!   through relations, are written
//! - **Memory-mapped reader**: point queries decode only what they touch
//! - **Hot reload**: [`CachedDatabase`] swaps in a recompiled file without
//!   blocking readers
//!
//! # Quick Start
//!
//! ```ignore
//! use iptool::{AddressKind, Compiler, Database, FieldCodec, MemorySource};
//! use std::path::Path;
//!
//! let mut compiler = Compiler::new();
//! let country = compiler.define_register(
//!     "country",
//!     MemorySource::new("countries").with_row(["1", "ru"]),
//!     Some(1),
//! )?;
//! compiler.add_field(country, "code", 2, FieldCodec::text())?;
//!
//! let net = compiler.define_network(
//!     MemorySource::new("ranges").with_row(["5.0.0.0/8", "1"]),
//!     AddressKind::Prefix,
//!     1,
//!     1,
//! )?;
//! compiler.map_register(net, 2, "country")?;
//! compiler.compile(Path::new("geo.dat"))?;
//!
//! let db = Database::open(Path::new("geo.dat"))?;
//! let lookup = db.find_str("5.1.2.3")?;
//! ```
//!
//! Whole builds can also be described in YAML, see [`manifest`].

mod error;

pub mod address;
pub mod binary;
pub mod compiler;
pub mod field;
pub mod manifest;
pub mod schema;
pub mod source;

// Re-export core types
pub use error::{Error, Result};

pub use address::AddressKind;
pub use compiler::{CompileReport, Compiler};
pub use field::{FieldCodec, Rounding, Transform, Value};
pub use manifest::BuildManifest;
pub use schema::{NetworkId, RegisterId};
pub use source::{DelimitedFile, MemorySource, RowSource, SourceRow};

// Re-export reader types
pub use binary::{About, CachedDatabase, CachedReaderConfig, Database, Lookup, ReaderState, Row};
