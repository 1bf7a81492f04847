// ABOUTME: Column metadata and the positional schema-compatibility check
// ABOUTME: Sync refuses to run when source and target columns differ in name, type or nullability

use serde::Serialize;
use std::fmt;

use crate::utils::quote_ident;

/// One column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared SQL type (`integer`, `character varying`, `ARRAY`, ...)
    pub data_type: String,
    pub nullable: bool,
    /// Underlying type name (`int4`, `varchar`, `_int4`, `mood`, ...). Picks
    /// how values are read and bound, and tells arrays and user-defined types
    /// apart during compatibility checks.
    pub udt_name: String,
    /// Schema of the underlying type; empty or `pg_catalog` for built-ins.
    pub udt_schema: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            udt_name: default_udt_name(&data_type).to_string(),
            udt_schema: String::new(),
            data_type,
            nullable,
        }
    }

    pub fn with_udt_name(mut self, udt_name: impl Into<String>) -> Self {
        self.udt_name = udt_name.into();
        self
    }

    pub fn with_udt_schema(mut self, udt_schema: impl Into<String>) -> Self {
        self.udt_schema = udt_schema.into();
        self
    }

    /// The type name to cast to, schema-qualified unless it is built in.
    pub fn cast_type(&self) -> String {
        match self.udt_schema.as_str() {
            "" | "pg_catalog" => quote_ident(&self.udt_name),
            schema => format!("{}.{}", quote_ident(schema), quote_ident(&self.udt_name)),
        }
    }

    /// Whether the driver reads and binds this column's values natively.
    ///
    /// Everything else travels as text and is cast back on write, so values
    /// such as `numeric`, `inet`, `json` or arrays round-trip without loss.
    pub fn is_native(&self) -> bool {
        matches!(
            self.udt_name.as_str(),
            "bool"
                | "int2"
                | "int4"
                | "int8"
                | "float4"
                | "float8"
                | "text"
                | "varchar"
                | "bpchar"
                | "name"
                | "uuid"
                | "date"
                | "timestamp"
                | "timestamptz"
                | "jsonb"
                | "bytea"
        )
    }

    fn same_definition(&self, other: &ColumnDescriptor) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && (!self.has_generic_data_type() || self.udt_name == other.udt_name)
    }

    fn type_label(&self) -> String {
        if self.has_generic_data_type() {
            format!("{} ({})", self.data_type, self.udt_name)
        } else {
            self.data_type.clone()
        }
    }

    /// `data_type` is the same for every array and every user-defined type,
    /// so only `udt_name` identifies those.
    fn has_generic_data_type(&self) -> bool {
        matches!(self.data_type.as_str(), "ARRAY" | "USER-DEFINED")
    }
}

fn default_udt_name(data_type: &str) -> &str {
    match data_type {
        "boolean" => "bool",
        "smallint" => "int2",
        "integer" => "int4",
        "bigint" => "int8",
        "real" => "float4",
        "double precision" => "float8",
        "character varying" => "varchar",
        "character" => "bpchar",
        "timestamp without time zone" => "timestamp",
        "timestamp with time zone" => "timestamptz",
        other => other,
    }
}

/// Columns of one table in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// First structural difference found between two schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    ColumnCount {
        source: usize,
        target: usize,
    },
    Column {
        position: usize,
        source: ColumnDescriptor,
        target: ColumnDescriptor,
    },
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMismatch::ColumnCount { source, target } => {
                write!(f, "source has {} columns, target has {}", source, target)
            }
            SchemaMismatch::Column {
                position,
                source,
                target,
            } => write!(
                f,
                "column {} differs: source {} {}{} vs target {} {}{}",
                position + 1,
                source.name,
                source.type_label(),
                if source.nullable { " NULL" } else { " NOT NULL" },
                target.name,
                target.type_label(),
                if target.nullable { " NULL" } else { " NOT NULL" },
            ),
        }
    }
}

/// Positional comparison of two schemas.
///
/// Returns the first mismatch, or `None` when both have the same number of
/// columns and every position agrees on name, declared type and nullability.
/// No type coercion: `varchar` and `text` are different types.
pub fn find_mismatch(source: &TableSchema, target: &TableSchema) -> Option<SchemaMismatch> {
    if source.columns.len() != target.columns.len() {
        return Some(SchemaMismatch::ColumnCount {
            source: source.columns.len(),
            target: target.columns.len(),
        });
    }

    source
        .columns
        .iter()
        .zip(&target.columns)
        .enumerate()
        .find(|(_, (s, t))| !s.same_definition(t))
        .map(|(position, (s, t))| SchemaMismatch::Column {
            position,
            source: s.clone(),
            target: t.clone(),
        })
}

pub fn compatible(source: &TableSchema, target: &TableSchema) -> bool {
    find_mismatch(source, target).is_none()
}
