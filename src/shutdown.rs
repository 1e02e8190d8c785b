use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Irreversible "stop issuing work" flag for one Initialize/Shutdown cycle.
///
/// Every long-running loop (engine workers, the render sync point, the
/// dispatcher) holds a clone and checks it at its iteration boundary. The
/// registry creates a fresh signal on each `initialize`, so a flag raised in
/// one cycle is never lowered again; it is simply replaced.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal
{
        flag: Arc<AtomicBool>,
}

impl ShutdownSignal
{
        pub fn new() -> Self
        {
                Self::default()
        }

        /// Raises the flag. Returns `true` if this call was the one that
        /// raised it.
        pub fn signal(&self) -> bool
        {
                !self.flag.swap(true, Ordering::AcqRel)
        }

        pub fn is_signaled(&self) -> bool
        {
                self.flag.load(Ordering::Acquire)
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        #[test]
        fn clones_observe_the_same_flag()
        {
                let signal = ShutdownSignal::new();
                let observer = signal.clone();

                assert!(!observer.is_signaled());
                assert!(signal.signal());
                assert!(observer.is_signaled());
                assert!(!signal.signal());
        }

        #[test]
        fn fresh_signals_are_independent()
        {
                let old = ShutdownSignal::new();
                old.signal();

                let fresh = ShutdownSignal::new();

                assert!(!fresh.is_signaled());
                assert!(old.is_signaled());
        }
}
