//! Object lifecycle management with generational indices.
//!
//! The `ObjectStore` allocates object slots and tracks generations so that
//! references to deleted objects are detected instead of silently aliasing a
//! newer object.

// Allow u64 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use trellis_foundation::{Error, ObjectId, Result};

/// Allocates object ids and tracks which ones are alive.
///
/// Even generations are free slots, odd generations are alive.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    generations: Vec<u32>,
    free_list: Vec<u64>,
    live_count: usize,
}

impl ObjectStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new object id, reusing freed slots first.
    pub fn allocate(&mut self) -> ObjectId {
        self.live_count += 1;

        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            self.generations[idx] += 1;
            ObjectId::new(index, self.generations[idx])
        } else {
            let index = self.generations.len() as u64;
            self.generations.push(1);
            ObjectId::new(index, 1)
        }
    }

    /// Frees an object id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is stale or was never allocated.
    pub fn release(&mut self, id: ObjectId) -> Result<()> {
        self.validate(id)?;

        let idx = id.index as usize;
        self.generations[idx] += 1;
        self.free_list.push(id.index);
        self.live_count -= 1;

        Ok(())
    }

    /// Checks if an object is alive.
    #[must_use]
    pub fn exists(&self, id: ObjectId) -> bool {
        self.generations
            .get(id.index as usize)
            .is_some_and(|&g| g == id.generation && g % 2 == 1)
    }

    /// Validates that an object is alive.
    ///
    /// # Errors
    ///
    /// Returns [`trellis_foundation::ErrorKind::StaleObject`] on generation
    /// mismatch and [`trellis_foundation::ErrorKind::ObjectNotFound`] otherwise.
    pub fn validate(&self, id: ObjectId) -> Result<()> {
        let Some(&current) = self.generations.get(id.index as usize) else {
            return Err(Error::object_not_found(id));
        };
        if current != id.generation {
            return Err(Error::stale_object(id));
        }
        if current % 2 == 0 {
            return Err(Error::object_not_found(id));
        }
        Ok(())
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns true if no object is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Iterates over live ids in index order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.generations
            .iter()
            .enumerate()
            .filter(|(_, generation)| *generation % 2 == 1)
            .map(|(idx, generation)| ObjectId::new(idx as u64, *generation))
    }
}
