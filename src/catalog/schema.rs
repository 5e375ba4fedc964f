//! Column and schema definitions.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Shared reference to a [`Schema`].
pub type SchemaRef = Arc<Schema>;

fn default_nullable() -> bool {
    true
}

/// Definition of a single named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether the column may hold nulls (default: true).
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a nullable column definition.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnDef {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Sets whether the column is nullable.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Converts the definition into an Arrow field.
    #[must_use]
    pub fn to_field(&self) -> Field {
        Field::new(&self.name, self.data_type.to_arrow(), self.nullable)
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered list of column definitions.
///
/// Names are not required to be unique: a join of two inputs that share a
/// column name keeps both columns. Name-based lookups on such schemas are
/// ambiguous and are rejected by the binder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    /// Creates a schema from column definitions.
    #[must_use]
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Schema { columns }
    }

    /// Creates a schema with no columns.
    #[must_use]
    pub fn empty() -> Self {
        Schema {
            columns: Vec::new(),
        }
    }

    /// Returns the column definitions.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the index of the first column named `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the indices of every column named `name`.
    #[must_use]
    pub fn indices_of(&self, name: &str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns the first name that appears more than once.
    #[must_use]
    pub fn duplicate_name(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .find(|name| !seen.insert(*name))
    }

    /// Concatenates two schemas (left columns first).
    #[must_use]
    pub fn join(&self, right: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(right.columns.iter().cloned());
        Schema { columns }
    }

    /// Returns a copy with every column marked nullable.
    #[must_use]
    pub fn to_nullable(&self) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .map(|c| c.clone().with_nullable(true))
                .collect(),
        }
    }

    /// Converts the schema into an Arrow schema.
    #[must_use]
    pub fn to_arrow(&self) -> ArrowSchemaRef {
        Arc::new(ArrowSchema::new(
            self.columns.iter().map(ColumnDef::to_field).collect::<Vec<_>>(),
        ))
    }

    /// Builds a schema from an Arrow schema.
    ///
    /// Dictionary fields map to their value type.
    ///
    /// # Errors
    ///
    /// Returns the name of the first field whose type vexel does not model.
    pub fn from_arrow(schema: &ArrowSchema) -> std::result::Result<Schema, String> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| {
                DataType::from_arrow(field.data_type())
                    .map(|dt| ColumnDef::new(field.name().clone(), dt).with_nullable(field.is_nullable()))
                    .ok_or_else(|| format!("field '{}' has unsupported type {}", field.name(), field.data_type()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Schema { columns })
    }
}

impl FromIterator<ColumnDef> for Schema {
    fn from_iter<I: IntoIterator<Item = ColumnDef>>(iter: I) -> Self {
        Schema {
            columns: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}")?;
        }
        write!(f, "]")
    }
}
