//! The typed configuration registry.
//!
//! [`Distconf`] composes a chain of [`Backing`]s, in precedence order, into
//! one logical store and hands out typed [`Handle`]s. Loading never fails:
//! unreadable backings are skipped and undecodable values fall back to the
//! caller's default, with both reported through the [`Logger`].

pub mod handle;
pub mod value;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backing::{Backing, BackingCallback};
use crate::error::Result;
use crate::logger::{default_logger, keys, Logger};
use handle::Var;
pub use handle::{
    BoolHandle, DurationHandle, FloatHandle, Handle, IntHandle, StrHandle, WatchFn, WatchId,
};
pub use value::ConfigValue;

pub(crate) struct Chain {
    pub(crate) backings: Vec<Arc<dyn Backing>>,
    pub(crate) logger: Arc<dyn Logger>,
}

struct Registered {
    kind: &'static str,
    var: Arc<dyn Any + Send + Sync>,
}

enum Lookup<T: ConfigValue> {
    Found(Handle<T>),
    Mismatch(&'static str),
    Missing,
}

pub struct Distconf {
    chain: Arc<Chain>,
    vars: Mutex<HashMap<String, Registered>>,
    closed: AtomicBool,
}

impl Distconf {
    /// `chain` is in precedence order: the first backing holding a key wins.
    #[must_use]
    pub fn new(chain: Vec<Arc<dyn Backing>>) -> Self {
        Self::with_logger(chain, default_logger())
    }

    #[must_use]
    pub fn with_logger(chain: Vec<Arc<dyn Backing>>, logger: Arc<dyn Logger>) -> Self {
        Self {
            chain: Arc::new(Chain {
                backings: chain,
                logger,
            }),
            vars: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn str(&self, key: &str, default: impl Into<String>) -> StrHandle {
        self.handle(key, default.into()).await
    }

    pub async fn bool(&self, key: &str, default: bool) -> BoolHandle {
        self.handle(key, default).await
    }

    pub async fn int(&self, key: &str, default: i64) -> IntHandle {
        self.handle(key, default).await
    }

    pub async fn float(&self, key: &str, default: f64) -> FloatHandle {
        self.handle(key, default).await
    }

    pub async fn duration(&self, key: &str, default: Duration) -> DurationHandle {
        self.handle(key, default).await
    }

    fn lookup<T: ConfigValue>(&self, key: &str) -> Lookup<T> {
        let vars = self.vars.lock();
        let Some(registered) = vars.get(key) else {
            return Lookup::Missing;
        };
        match registered.var.clone().downcast::<Var<T>>() {
            Ok(var) => Lookup::Found(Handle::from_var(var)),
            Err(_) => Lookup::Mismatch(registered.kind),
        }
    }

    /// Handle for `key` decoded as `T`. Repeated calls for the same key and
    /// type share one handle.
    pub async fn handle<T: ConfigValue>(&self, key: &str, default: T) -> Handle<T> {
        match self.lookup::<T>(key) {
            Lookup::Found(handle) => return handle,
            Lookup::Mismatch(registered) => {
                self.chain.logger.log(&[
                    (keys::MSG, &"key already registered with another type, value will not update"),
                    (keys::KEY, &key),
                    ("registered", &registered),
                    ("requested", &T::KIND),
                ]);
                return Handle::from_var(Var::new(key, default, self.chain.clone()));
            }
            Lookup::Missing => {}
        }

        let var = Var::new(key, default, self.chain.clone());

        // Watch before reading so a change landing between the two is not lost.
        for (idx, backing) in self.chain.backings.iter().enumerate() {
            let Some(dynamic) = backing.as_dynamic() else {
                continue;
            };
            let weak = Arc::downgrade(&var);
            let callback: BackingCallback = Arc::new(move |_: &str, raw: Option<&[u8]>| {
                if let Some(var) = weak.upgrade() {
                    var.observe(idx, raw);
                }
            });
            if let Err(e) = dynamic.watch(key, callback).await {
                self.chain.logger.log(&[
                    (keys::MSG, &"unable to watch key"),
                    (keys::KEY, &key),
                    (keys::BACKING, &backing.name()),
                    (keys::ERR, &e),
                ]);
            }
        }

        let mut reads = Vec::with_capacity(self.chain.backings.len());
        for (idx, backing) in self.chain.backings.iter().enumerate() {
            match backing.get(key).await {
                Ok(raw) => reads.push((idx, raw)),
                Err(e) => self.chain.logger.log(&[
                    (keys::MSG, &"unable to read key, skipping backing"),
                    (keys::KEY, &key),
                    (keys::BACKING, &backing.name()),
                    (keys::ERR, &e),
                ]),
            }
        }
        var.load(reads);

        let mut vars = self.vars.lock();
        if let Some(existing) = vars.get(key) {
            // Lost a race with a concurrent load of the same key.
            if let Ok(winner) = existing.var.clone().downcast::<Var<T>>() {
                return Handle::from_var(winner);
            }
        }
        vars.insert(
            key.to_string(),
            Registered {
                kind: T::KIND,
                var: var.clone(),
            },
        );
        Handle::from_var(var)
    }

    #[must_use]
    pub fn backings(&self) -> &[Arc<dyn Backing>] {
        &self.chain.backings
    }

    /// Closes every backing once. Later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_err = None;
        for backing in &self.chain.backings {
            if let Err(e) = backing.close().await {
                self.chain.logger.log(&[
                    (keys::MSG, &"unable to close backing"),
                    (keys::BACKING, &backing.name()),
                    (keys::ERR, &e),
                ]);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
