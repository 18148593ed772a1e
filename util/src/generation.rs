use std::cell::Cell;

use derive_more::Display;

/// A monotonically increasing version number of a requested state.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[display("#{_0}")]
pub struct Generation(u64);

impl Generation {
    pub const INITIAL: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Tracks the latest requested generation.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: Cell<Generation>,
}

impl GenerationCounter {
    /// Advances to a new generation, superseding all previous ones, and returns it.
    pub fn advance(&self) -> Generation {
        let next = self.current.get().next();
        self.current.set(next);
        next
    }

    pub fn current(&self) -> Generation {
        self.current.get()
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current.get() == generation
    }
}
