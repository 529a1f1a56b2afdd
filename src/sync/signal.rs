//! Re-armable one-shot gate.

use super::completion::{Completion, CompletionSource};
use parking_lot::Mutex;
use std::fmt;

/// One-shot gate that re-arms on the next wait after being set.
///
/// [`wait`](Self::wait) hands out a future of the current round;
/// [`set`](Self::set) releases every future handed out since the round
/// started. The signal then reads as set until the next `wait` opens a new
/// round.
///
/// # Example
///
/// ```ignore
/// let signal = Arc::new(CompletionSignal::new());
/// let waiter = {
///     let signal = Arc::clone(&signal);
///     scheduler.add(move |_cx| async move {
///         signal.wait().await?;
///         Ok(())
///     })
/// };
/// scheduler.run()?;
/// signal.set();
/// scheduler.run()?;
/// assert!(waiter.is_over());
/// ```
pub struct CompletionSignal {
    current: Mutex<Option<CompletionSource<()>>>,
}

impl CompletionSignal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Returns a future released by the next [`set`](Self::set).
    pub fn wait(&self) -> Completion<()> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(source) if !source.is_completed() => source.completion(),
            _ => {
                let source = CompletionSource::new();
                let completion = source.completion();
                *current = Some(source);
                completion
            }
        }
    }

    /// Releases the current round. Returns true if anybody was waiting.
    pub fn set(&self) -> bool {
        let source = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(source) => source.clone(),
                None => {
                    // Nobody waited yet: start a round that is already set.
                    let source = CompletionSource::new();
                    source.try_set_result(());
                    *current = Some(source);
                    return false;
                }
            }
        };
        source.try_set_result(())
    }

    /// Returns true if the current round has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(CompletionSource::is_resolved)
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("set", &self.is_set())
            .finish()
    }
}
