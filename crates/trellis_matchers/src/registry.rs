//! Explicitly constructed registry of built queries.

use std::collections::HashMap;
use std::rc::Rc;

use trellis_foundation::{Error, ErrorKind, Result};

use crate::psystem::PQuery;

/// Queries keyed by fully qualified name, iterated in registration order.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: Vec<Rc<PQuery>>,
    by_name: HashMap<String, usize>,
}

impl QueryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateQuery` if a query with the same name is present.
    pub fn register(&mut self, query: Rc<PQuery>) -> Result<()> {
        let name = query.fqn().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::new(ErrorKind::DuplicateQuery(name)));
        }
        self.by_name.insert(name, self.queries.len());
        self.queries.push(query);
        Ok(())
    }

    /// Looks a query up by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQuery` if no query has that name.
    pub fn get(&self, fqn: &str) -> Result<Rc<PQuery>> {
        self.by_name
            .get(fqn)
            .map(|&i| Rc::clone(&self.queries[i]))
            .ok_or_else(|| Error::new(ErrorKind::UnknownQuery(fqn.to_string())))
    }

    /// Returns true if a query has that name.
    #[must_use]
    pub fn contains(&self, fqn: &str) -> bool {
        self.by_name.contains_key(fqn)
    }

    /// Registered queries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<PQuery>> + '_ {
        self.queries.iter()
    }

    /// Number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
