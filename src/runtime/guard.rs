//! Reentrancy guard - one flag per view
//!
//! Set while the engine itself writes to the document or the model, so that
//! the resulting notifications are recognised as self-caused. Held through an
//! RAII token: the flag is cleared when the token drops, on every exit path,
//! before control returns to the host loop.

use std::cell::Cell;
use std::rc::Rc;

/// Shared flag; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    held: Rc<Cell<bool>>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine is currently writing
    pub fn is_held(&self) -> bool {
        self.held.get()
    }

    /// Hold the guard until the returned token drops
    ///
    /// Nested holds keep the flag set until the outermost token drops.
    pub fn hold(&self) -> GuardToken {
        let was_held = self.held.replace(true);
        GuardToken {
            held: Rc::clone(&self.held),
            restore: was_held,
        }
    }
}

/// Clears the guard on drop
#[must_use = "the guard is released as soon as the token drops"]
pub struct GuardToken {
    held: Rc<Cell<bool>>,
    restore: bool,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.held.set(self.restore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clears_on_drop() {
        let guard = ReentrancyGuard::new();
        {
            let _token = guard.hold();
            assert!(guard.is_held());
        }
        assert!(!guard.is_held());
    }

    #[test]
    fn nested_holds_release_at_outermost() {
        let guard = ReentrancyGuard::new();
        let outer = guard.hold();
        {
            let _inner = guard.hold();
        }
        assert!(guard.is_held());
        drop(outer);
        assert!(!guard.is_held());
    }

    #[test]
    fn clears_on_early_return() {
        fn write(guard: &ReentrancyGuard) -> Result<(), ()> {
            let _token = guard.hold();
            Err(())
        }
        let guard = ReentrancyGuard::new();
        assert!(write(&guard).is_err());
        assert!(!guard.is_held());
    }
}
