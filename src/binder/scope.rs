//! Binder scope for column resolution.

use super::expression::BoundExpression;
use super::BindError;
use crate::catalog::Schema;

/// A column reference as written in a plan document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// Reference by column name.
    Name(String),
    /// Reference by zero-based position.
    Index(usize),
}

/// Columns visible to an expression: the output schema of the operator's
/// input (or of both join inputs, concatenated).
#[derive(Debug, Clone, Copy)]
pub struct BinderScope<'a> {
    schema: &'a Schema,
}

impl<'a> BinderScope<'a> {
    /// Creates a scope over `schema`.
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        BinderScope { schema }
    }

    /// Returns the schema in scope.
    #[must_use]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Resolves a column reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or matches more than one
    /// column, or the index is out of range.
    pub fn resolve(&self, column: &ColumnRef) -> Result<BoundExpression, BindError> {
        let index = match column {
            ColumnRef::Name(name) => match self.schema.indices_of(name).as_slice() {
                [] => return Err(BindError::UnknownColumn(name.clone())),
                [index] => *index,
                _ => return Err(BindError::AmbiguousColumn(name.clone())),
            },
            ColumnRef::Index(index) => *index,
        };
        let def = self.schema.column(index).ok_or(BindError::ColumnIndexOutOfRange {
            index,
            len: self.schema.len(),
        })?;
        Ok(BoundExpression::column(
            index,
            def.name.clone(),
            def.data_type,
            def.nullable,
        ))
    }
}
