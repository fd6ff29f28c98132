//! Typed, cached, watchable views over one configuration key.
//!
//! Every [`Handle`] keeps the last raw value seen from each backing of the
//! chain. A change from any backing recomputes the winning value (first
//! backing in chain order that has the key), decodes it, and if the decoded
//! value differs swaps the cache and runs the watchers. Recompute and
//! dispatch happen under one per-handle lock, so watchers of a handle see
//! changes one at a time and never a value older than the cache.
//!
//! Watchers run synchronously on whichever task delivered the change (a
//! backing's background task, or the caller of [`Handle::set`]). Long work
//! belongs on a spawned task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::value::ConfigValue;
use super::Chain;
use crate::error::{DistconfError, Result};
use crate::logger::keys;

pub type WatchFn<T> = Arc<dyn Fn(&Handle<T>, &T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Clone, Default)]
struct Slot {
    /// Last raw value. `None` until the backing has been heard from.
    raw: Option<Option<Vec<u8>>>,
    /// Changes pushed by the backing so far.
    pushes: u64,
}

type Slots = Vec<Slot>;

pub(crate) struct Var<T: ConfigValue> {
    key: String,
    default: T,
    chain: Arc<Chain>,
    slots: Mutex<Slots>,
    current: ArcSwap<T>,
    watchers: Mutex<Vec<(WatchId, WatchFn<T>)>>,
    next_watch: AtomicU64,
}

impl<T: ConfigValue> Var<T> {
    pub(crate) fn new(key: &str, default: T, chain: Arc<Chain>) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            slots: Mutex::new(vec![Slot::default(); chain.backings.len()]),
            current: ArcSwap::from_pointee(default.clone()),
            default,
            chain,
            watchers: Mutex::new(Vec::new()),
            next_watch: AtomicU64::new(0),
        })
    }

    /// A change pushed by backing `idx`.
    pub(crate) fn observe(self: &Arc<Self>, idx: usize, raw: Option<&[u8]>) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(idx) {
            slot.raw = Some(raw.map(<[u8]>::to_vec));
            slot.pushes += 1;
        }
        self.settle(&slots);
    }

    fn pushes(&self, idx: usize) -> u64 {
        self.slots.lock().get(idx).map_or(0, |slot| slot.pushes)
    }

    /// A value this process wrote through backing `idx`. Dropped if the
    /// backing pushed anything since `since`: that push was read no earlier
    /// than the write started and the write's own echo is still to come.
    fn apply_local(self: &Arc<Self>, idx: usize, raw: &[u8], since: u64) {
        let mut slots = self.slots.lock();
        match slots.get_mut(idx) {
            Some(slot) if slot.pushes == since => slot.raw = Some(Some(raw.to_vec())),
            _ => return,
        }
        self.settle(&slots);
    }

    /// Initial reads. Slots already filled by a watch are newer and kept.
    pub(crate) fn load(self: &Arc<Self>, reads: Vec<(usize, Option<Vec<u8>>)>) {
        let mut slots = self.slots.lock();
        for (idx, raw) in reads {
            if let Some(slot) = slots.get_mut(idx) {
                if slot.raw.is_none() {
                    slot.raw = Some(raw);
                }
            }
        }
        self.settle(&slots);
    }

    fn decode_winner(&self, slots: &Slots) -> T {
        let Some(raw) = slots
            .iter()
            .find_map(|s| s.raw.as_ref().and_then(|v| v.as_deref()))
        else {
            return self.default.clone();
        };
        match T::decode(raw) {
            Ok(v) => v,
            Err(message) => {
                let err = DistconfError::Parse {
                    key: self.key.clone(),
                    kind: T::KIND,
                    message,
                };
                self.chain.logger.log(&[
                    (keys::MSG, &"invalid config value, using default"),
                    (keys::KEY, &self.key),
                    (keys::ERR, &err),
                ]);
                self.default.clone()
            }
        }
    }

    // Caller holds the slots lock for the whole recompute + dispatch.
    fn settle(self: &Arc<Self>, slots: &Slots) {
        let next = self.decode_winner(slots);
        if **self.current.load() == next {
            return;
        }
        let old = self.current.swap(Arc::new(next));

        let watchers: Vec<WatchFn<T>> = self.watchers.lock().iter().map(|(_, f)| f.clone()).collect();
        if watchers.is_empty() {
            return;
        }
        let handle = Handle { var: self.clone() };
        for f in watchers {
            f(&handle, &old);
        }
    }
}

pub struct Handle<T: ConfigValue> {
    var: Arc<Var<T>>,
}

pub type StrHandle = Handle<String>;
pub type BoolHandle = Handle<bool>;
pub type IntHandle = Handle<i64>;
pub type FloatHandle = Handle<f64>;
pub type DurationHandle = Handle<Duration>;

impl<T: ConfigValue> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            var: self.var.clone(),
        }
    }
}

impl<T: ConfigValue> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.var.key)
            .field("value", &*self.var.current.load())
            .finish()
    }
}

impl<T: ConfigValue> Handle<T> {
    pub(crate) fn from_var(var: Arc<Var<T>>) -> Self {
        Self { var }
    }

    #[cfg(test)]
    pub(crate) fn var(&self) -> &Arc<Var<T>> {
        &self.var
    }

    /// Current value. Lock-free.
    #[must_use]
    pub fn get(&self) -> T {
        T::clone(&self.var.current.load())
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.var.key
    }

    #[must_use]
    pub fn default_value(&self) -> &T {
        &self.var.default
    }

    /// Runs `f(handle, previous_value)` after every change, in registration order.
    pub fn watch<F>(&self, f: F) -> WatchId
    where
        F: Fn(&Self, &T) + Send + Sync + 'static,
    {
        let id = WatchId(self.var.next_watch.fetch_add(1, Ordering::Relaxed));
        self.var.watchers.lock().push((id, Arc::new(f)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.var.watchers.lock();
        let before = watchers.len();
        watchers.retain(|(w, _)| *w != id);
        watchers.len() != before
    }

    /// Writes through the first backing in the chain that accepts writes and
    /// updates the cache immediately, without waiting for the change to echo
    /// back. A backing earlier in the chain that also has the key still wins.
    ///
    /// If the backing delivered a change for this key while the write was in
    /// flight, the cache is left to that delivery and the coming echo.
    pub async fn set(&self, value: T) -> Result<()> {
        let raw = value.encode();
        for (idx, backing) in self.var.chain.backings.iter().enumerate() {
            let since = self.var.pushes(idx);
            match backing.write(&self.var.key, Some(&raw)).await {
                Ok(()) => {
                    self.var.apply_local(idx, &raw, since);
                    return Ok(());
                }
                Err(DistconfError::ReadOnly { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DistconfError::ReadOnly { backing: "chain" })
    }
}
