//! Catalog of named data sources.

mod schema;
mod source;

pub use schema::{ColumnDef, Schema, SchemaRef};
pub use source::{CsvOptions, CsvTable, DataSource, MemTable, SourceReader};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, VexelError};

/// Central registry of the data sources scans can reference.
///
/// The registry is shared between the engine and running executions; a scan
/// resolves its source when execution starts and keeps its own `Arc` to it.
#[derive(Debug, Default)]
pub struct Catalog {
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
}

impl Catalog {
    /// Creates a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Catalog {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a data source under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or already registered.
    pub fn register(&self, name: impl Into<String>, source: Arc<dyn DataSource>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(VexelError::Catalog("Source name cannot be empty".into()));
        }
        let mut sources = self.sources.write();
        if sources.contains_key(&name) {
            return Err(VexelError::Catalog(format!(
                "Source '{name}' already exists"
            )));
        }
        tracing::debug!(source = %name, schema = %source.schema(), "registered source");
        sources.insert(name, source);
        Ok(())
    }

    /// Removes a data source.
    ///
    /// # Errors
    ///
    /// Returns an error if no source has that name.
    pub fn deregister(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.sources
            .write()
            .remove(name)
            .ok_or_else(|| VexelError::Catalog(format!("Source '{name}' does not exist")))
    }

    /// Retrieves a data source by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.read().get(name).cloned()
    }

    /// Returns the schema of a registered source.
    #[must_use]
    pub fn schema_of(&self, name: &str) -> Option<SchemaRef> {
        self.sources.read().get(name).map(|s| s.schema())
    }

    /// Checks if a source exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.read().contains_key(name)
    }

    /// Returns all source names, sorted.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};

    fn table() -> Arc<dyn DataSource> {
        let schema = Schema::new(vec![ColumnDef::new("id", DataType::Int64)]);
        Arc::new(MemTable::from_rows(schema, &[vec![Value::Int64(1)]]).unwrap())
    }

    #[test]
    fn test_register_and_lookup() {
        let catalog = Catalog::new();
        catalog.register("t", table()).unwrap();
        assert!(catalog.contains("t"));
        assert_eq!(catalog.schema_of("t").unwrap().names(), vec!["id"]);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let catalog = Catalog::new();
        catalog.register("t", table()).unwrap();
        let err = catalog.register("t", table()).unwrap_err();
        assert!(matches!(err, VexelError::Catalog(_)));
    }

    #[test]
    fn test_deregister() {
        let catalog = Catalog::new();
        catalog.register("b", table()).unwrap();
        catalog.register("a", table()).unwrap();
        assert_eq!(catalog.source_names(), vec!["a", "b"]);
        catalog.deregister("a").unwrap();
        assert!(catalog.deregister("a").is_err());
        assert_eq!(catalog.source_names(), vec!["b"]);
    }
}
