//! Records visible across execution contexts.
//!
//! A record lives in one context's private copy and only becomes visible to
//! other contexts after an explicit [`SharedRecord::publish()`]. Readers work
//! from their own snapshot and call [`SharedReader::acquire()`] before
//! trusting it. This mirrors a write-back / invalidate cache discipline.

use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug)]
struct Published<T> {
    value: T,
    generation: u64,
}

/// Writer side of a cross-context record.
#[derive(Debug)]
pub struct SharedRecord<T: Clone> {
    local: T,
    published: Arc<RwLock<Published<T>>>,
    generation: u64,
}

impl<T: Clone> SharedRecord<T> {
    /// Creates a record and publishes its initial value.
    pub fn new(value: T) -> Self {
        let published = Arc::new(RwLock::new(Published {
            value: value.clone(),
            generation: 0,
        }));
        Self {
            local: value,
            published,
            generation: 0,
        }
    }

    /// Writer's private copy.
    pub fn local(&self) -> &T {
        &self.local
    }

    /// Mutates the private copy. Nothing is visible until [`publish()`](Self::publish).
    pub fn update(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.local);
    }

    /// Writes the private copy back so readers can acquire it.
    pub fn publish(&mut self) {
        self.generation += 1;
        let mut published = self.published.write();
        published.value = self.local.clone();
        published.generation = self.generation;
    }

    /// Generation of the last publish.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Creates a reader holding the currently published value.
    pub fn reader(&self) -> SharedReader<T> {
        let published = self.published.read();
        SharedReader {
            view: published.value.clone(),
            seen: published.generation,
            published: Arc::clone(&self.published),
        }
    }
}

/// Reader side of a cross-context record.
#[derive(Debug, Clone)]
pub struct SharedReader<T: Clone> {
    view: T,
    seen: u64,
    published: Arc<RwLock<Published<T>>>,
}

impl<T: Clone> SharedReader<T> {
    /// Refreshes the snapshot from the last publish and returns it.
    pub fn acquire(&mut self) -> &T {
        {
            let published = self.published.read();
            if published.generation != self.seen {
                self.view = published.value.clone();
                self.seen = published.generation;
            }
        }
        &self.view
    }

    /// Snapshot as of the last acquire. May be stale.
    pub fn view(&self) -> &T {
        &self.view
    }

    /// Returns true if a newer publish exists than the snapshot.
    pub fn is_stale(&self) -> bool {
        self.published.read().generation != self.seen
    }
}
