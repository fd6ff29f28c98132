//! Key/value logger collaborator for non-fatal failures.
//!
//! Library code reports recoverable problems (a parse falling back to a
//! default, a watch that could not be re-armed) through the [`Logger`]
//! trait rather than straight to `tracing`, so that embedding processes
//! decide where those reports go. [`Discard`] is always a valid choice
//! and is what [`default_logger`] points at until someone calls
//! [`Hierarchy::set`].

use std::fmt::{self, Display};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;

/// Well-known field keys.
pub mod keys {
    pub const MSG: &str = "msg";
    pub const ERR: &str = "err";
    pub const KEY: &str = "key";
    pub const BACKING: &str = "backing";
}

pub type Field<'a> = (&'a str, &'a dyn Display);

pub trait Logger: Send + Sync {
    fn log(&self, fields: &[Field<'_>]);

    fn is_discard(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Logger for Discard {
    fn log(&self, _fields: &[Field<'_>]) {}

    fn is_discard(&self) -> bool {
        true
    }
}

/// Forwards reports to `tracing` at WARN under the `distconf` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, fields: &[Field<'_>]) {
        let msg = fields
            .iter()
            .find(|(k, _)| *k == keys::MSG)
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        let rest = Rendered(fields);
        tracing::warn!(target: "distconf", fields = %rest, "{msg}");
    }
}

struct Rendered<'a, 'b>(&'a [Field<'b>]);

impl Display for Rendered<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.0.iter().filter(|(k, _)| *k != keys::MSG) {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// A logger that atomically points at another logger.
///
/// Reads go through `arc_swap`, so logging never takes a lock even while
/// another thread is swapping the destination.
pub struct Hierarchy {
    target: ArcSwap<Arc<dyn Logger>>,
}

impl Hierarchy {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            target: ArcSwap::from_pointee(logger),
        }
    }

    pub fn set(&self, logger: Arc<dyn Logger>) {
        self.target.store(Arc::new(logger));
    }

    /// Returns a logger that forwards to this one until it is [`set`](Self::set) elsewhere.
    #[must_use]
    pub fn create_child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self::new(self.clone()))
    }
}

impl Logger for Hierarchy {
    fn log(&self, fields: &[Field<'_>]) {
        self.target.load().log(fields);
    }

    fn is_discard(&self) -> bool {
        self.target.load().is_discard()
    }
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("discard", &self.is_discard())
            .finish()
    }
}

static DEFAULT_LOGGER: LazyLock<Arc<Hierarchy>> =
    LazyLock::new(|| Arc::new(Hierarchy::new(Arc::new(Discard))));

/// Process-wide root logger. Discards until [`Hierarchy::set`] is called on it.
#[must_use]
pub fn default_logger() -> Arc<Hierarchy> {
    DEFAULT_LOGGER.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl Logger for Capture {
        fn log(&self, fields: &[Field<'_>]) {
            self.0.lock().push(Rendered(fields).to_string());
        }
    }

    #[test]
    fn discard_is_default() {
        let h = Hierarchy::new(Arc::new(Discard));
        assert!(h.is_discard());
        h.log(&[(keys::MSG, &"dropped")]);
    }

    #[test]
    fn set_swaps_destination() {
        let capture = Arc::new(Capture::default());
        let h = Hierarchy::new(Arc::new(Discard));
        h.log(&[(keys::KEY, &"a")]);
        h.set(capture.clone());
        assert!(!h.is_discard());
        h.log(&[(keys::KEY, &"b"), (keys::ERR, &42)]);
        assert_eq!(*capture.0.lock(), vec!["key=b err=42".to_string()]);
    }

    #[test]
    fn child_follows_parent() {
        let capture = Arc::new(Capture::default());
        let parent = Arc::new(Hierarchy::new(Arc::new(Discard)));
        let child = parent.create_child();
        assert!(child.is_discard());

        parent.set(capture.clone());
        child.log(&[(keys::MSG, &"hello"), (keys::KEY, &"k")]);
        assert_eq!(*capture.0.lock(), vec!["key=k".to_string()]);

        child.set(Arc::new(Discard));
        child.log(&[(keys::KEY, &"ignored")]);
        assert_eq!(capture.0.lock().len(), 1);
    }
}
