//! Schema model: registers, networks and relations declared before compilation.
//!
//! Every definition is validated at the call that makes it, so a [`Schema`]
//! that exists is always internally consistent.

use std::fmt;
use std::sync::Arc;

use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::address::AddressKind;
use crate::field::{FieldCodec, FieldKind};
use crate::source::RowSource;
use crate::{Error, Result};

/// Legal register and field names.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9]*$").unwrap());

/// Most registers a database can hold.
pub const MAX_REGISTERS: usize = u8::MAX as usize;

/// Most fields a register can hold.
pub const MAX_FIELDS: usize = u8::MAX as usize;

/// Most relations a database can hold.
pub const MAX_RELATIONS: usize = u16::MAX as usize;

/// Longest register or field name.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Handle of a defined register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId(pub(crate) usize);

/// Handle of a defined network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub(crate) usize);

/// A field declaration: codec plus source column.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub column: usize,
    pub codec: FieldCodec,
}

/// A dictionary table.
pub struct RegisterDef {
    pub name: String,
    pub source: Arc<dyn RowSource>,
    pub key_column: Option<usize>,
    pub fields: Vec<FieldDef>,
}

impl RegisterDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

impl fmt::Debug for RegisterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterDef")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .field("key_column", &self.key_column)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Column of a network source holding keys into a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMapping {
    pub register: usize,
    pub column: usize,
}

/// An address-range source.
pub struct NetworkDef {
    pub source: Arc<dyn RowSource>,
    pub kind: AddressKind,
    pub first_column: usize,
    pub last_column: usize,
    pub mappings: Vec<RegisterMapping>,
}

impl fmt::Debug for NetworkDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkDef")
            .field("source", &self.source.name())
            .field("kind", &self.kind)
            .field("first_column", &self.first_column)
            .field("last_column", &self.last_column)
            .field("mappings", &self.mappings)
            .finish()
    }
}

/// `parent.fields[attribute]` holds keys of `child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationDef {
    pub parent: usize,
    pub attribute: usize,
    pub child: usize,
}

/// Validated set of definitions.
#[derive(Debug, Default)]
pub struct Schema {
    registers: Vec<RegisterDef>,
    networks: Vec<NetworkDef>,
    relations: Vec<RelationDef>,
    declared: AHashSet<RelationDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_register(
        &mut self,
        name: &str,
        source: Arc<dyn RowSource>,
        key_column: Option<usize>,
    ) -> Result<RegisterId> {
        validate_name("name", name)?;
        if let Some(column) = key_column {
            validate_column("key_column", column)?;
        }
        if self.register_index(name).is_some() {
            return Err(Error::config(
                "name",
                format!("register {} is already defined", name),
            ));
        }
        if self.registers.len() >= MAX_REGISTERS {
            return Err(Error::config(
                "name",
                format!("at most {} registers are supported", MAX_REGISTERS),
            ));
        }

        self.registers.push(RegisterDef {
            name: name.to_string(),
            source,
            key_column,
            fields: Vec::new(),
        });
        Ok(RegisterId(self.registers.len() - 1))
    }

    pub fn add_field(
        &mut self,
        register: RegisterId,
        name: &str,
        column: usize,
        codec: FieldCodec,
    ) -> Result<()> {
        validate_name("name", name)?;
        validate_column("column", column)?;
        let def = self
            .registers
            .get_mut(register.0)
            .ok_or_else(|| Error::config("register", "unknown register handle"))?;
        if def.field_index(name).is_some() {
            return Err(Error::config(
                "name",
                format!("field {} is already defined in register {}", name, def.name),
            ));
        }
        if def.fields.len() >= MAX_FIELDS {
            return Err(Error::config(
                "name",
                format!("at most {} fields per register are supported", MAX_FIELDS),
            ));
        }

        def.fields.push(FieldDef {
            name: name.to_string(),
            column,
            codec,
        });
        Ok(())
    }

    pub fn define_network(
        &mut self,
        source: Arc<dyn RowSource>,
        kind: AddressKind,
        first_column: usize,
        last_column: usize,
    ) -> Result<NetworkId> {
        validate_column("first_column", first_column)?;
        validate_column("last_column", last_column)?;
        self.networks.push(NetworkDef {
            source,
            kind,
            first_column,
            last_column,
            mappings: Vec::new(),
        });
        Ok(NetworkId(self.networks.len() - 1))
    }

    pub fn map_register(&mut self, network: NetworkId, column: usize, register: &str) -> Result<()> {
        validate_column("column", column)?;
        let index = self.register_index(register).ok_or_else(|| {
            Error::config("register", format!("register {} is not defined", register))
        })?;
        if self.registers[index].fields.is_empty() {
            return Err(Error::config(
                "register",
                format!("register {} has no fields", register),
            ));
        }
        let def = self
            .networks
            .get_mut(network.0)
            .ok_or_else(|| Error::config("network", "unknown network handle"))?;
        if def.mappings.iter().any(|m| m.register == index) {
            return Err(Error::config(
                "register",
                format!("register {} is already mapped in this network", register),
            ));
        }

        def.mappings.push(RegisterMapping {
            register: index,
            column,
        });
        Ok(())
    }

    pub fn declare_relation(&mut self, parent: &str, attribute: &str, child: &str) -> Result<()> {
        let parent_index = self.register_index(parent).ok_or_else(|| {
            Error::config("parent", format!("register {} is not defined", parent))
        })?;
        let child_index = self.register_index(child).ok_or_else(|| {
            Error::config("child", format!("register {} is not defined", child))
        })?;
        let attribute_index = self.registers[parent_index]
            .field_index(attribute)
            .ok_or_else(|| {
                Error::config(
                    "attribute",
                    format!("register {} has no field {}", parent, attribute),
                )
            })?;

        let codec = &self.registers[parent_index].fields[attribute_index].codec;
        if let FieldKind::Decimal { precision } = codec.kind() {
            if precision > 0 {
                return Err(Error::config(
                    "attribute",
                    format!("{}.{} is fractional and cannot hold keys", parent, attribute),
                ));
            }
        }

        let relation = RelationDef {
            parent: parent_index,
            attribute: attribute_index,
            child: child_index,
        };
        if self.declared.contains(&relation) {
            return Err(Error::config(
                "attribute",
                format!("relation {}.{} -> {} is already declared", parent, attribute, child),
            ));
        }
        if self.relations.len() >= MAX_RELATIONS {
            return Err(Error::config(
                "relation",
                format!("at most {} relations can be declared", MAX_RELATIONS),
            ));
        }
        self.declared.insert(relation);
        self.relations.push(relation);
        Ok(())
    }

    /// Check the whole schema is ready to compile.
    pub fn validate(&self) -> Result<()> {
        for register in &self.registers {
            if register.fields.is_empty() {
                return Err(Error::config(
                    "register",
                    format!("register {} has no fields", register.name),
                ));
            }
        }
        Ok(())
    }

    pub fn register_index(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|r| r.name == name)
    }

    pub fn registers(&self) -> &[RegisterDef] {
        &self.registers
    }

    pub fn networks(&self) -> &[NetworkDef] {
        &self.networks
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Registers mapped by any network, in order of first mapping.
    pub fn mapped_registers(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        for network in &self.networks {
            for mapping in &network.mappings {
                if !slots.contains(&mapping.register) {
                    slots.push(mapping.register);
                }
            }
        }
        slots
    }
}

fn validate_name(argument: &str, name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::config(
            argument,
            format!("names are limited to {} characters", MAX_NAME_LEN),
        ));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(Error::config(
            argument,
            format!("{:?} must match [a-z][a-z0-9]*", name),
        ));
    }
    Ok(())
}

fn validate_column(argument: &str, column: usize) -> Result<()> {
    if column == 0 {
        return Err(Error::config(argument, "columns are numbered from 1"));
    }
    Ok(())
}
