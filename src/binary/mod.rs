//! Binary database format.
//!
//! A database is one immutable file built for memory mapping. Every row
//! section is fixed width, so a lookup touches only the octet index, a short
//! run of network records and one row per register.
//!
//! # File Structure
//!
//! ```text
//! +------------------+
//! |    PREAMBLE      |  "DIT", version, header length width, header length
//! +------------------+
//! |     HEADER       |  relations, section descriptors, 256-entry octet index
//! +------------------+
//! | NETWORK RECORDS  |  start address + one row offset per mapped register
//! +------------------+
//! | REGISTER ROWS    |  one section per register, row 0 all-default
//! +------------------+
//! |     TRAILER      |  created (u32), author (128 bytes), license
//! +------------------+
//! ```
//!
//! All multi-byte integers are big-endian.

mod cached_reader;
mod format;
mod reader;
pub mod writer;


pub use cached_reader::{CacheStats, CachedDatabase, CachedReaderConfig};
pub use format::*;
pub use reader::{About, Database, Lookup, ReaderState, Relation, Row};
pub use writer::{DatabaseWriter, IntermediateDatabase, IntermediateRegister};
