//! Opaque handles for execution contexts.
//!
//! A [`Handle`] is an address-sized integer that carries no type information
//! to the foreign side. [`HandleRegistry`] is the only place a handle is
//! turned back into a context. Every lookup is checked: a released, stale or
//! forged handle is an error, never a memory access.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{BridgeError, Result};

/// Low half of a handle: slot index + 1. High half: slot generation.
const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: usize = usize::MAX >> INDEX_BITS;

/// Opaque token standing in for an execution context.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    /// The null handle, meaning "no context".
    pub const NULL: Handle = Handle(0);

    /// Wrap a raw value received from a foreign caller.
    pub fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    /// The raw value handed to a foreign caller.
    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn new(index: usize, generation: usize) -> Self {
        Handle((generation << INDEX_BITS) | (index + 1))
    }

    fn index(self) -> Option<usize> {
        (self.0 & INDEX_MASK).checked_sub(1)
    }

    fn generation(self) -> usize {
        self.0 >> INDEX_BITS
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: usize,
    context: Option<Arc<Mutex<T>>>,
}

#[derive(Debug)]
struct Slots<T> {
    slots: Vec<Slot<T>>,
    /// Indices of empty slots, reused before the table grows.
    free: Vec<usize>,
    live: usize,
}

/// Owner of every context that has been handed out as a handle.
///
/// Each context sits behind its own `Mutex`, so two calls presenting the
/// same handle run one after the other.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    inner: Mutex<Slots<T>>,
    capacity: usize,
}

impl<T> HandleRegistry<T> {
    /// Create a registry holding at most `capacity` live contexts.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            capacity: capacity.min(INDEX_MASK),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of `context` and return a fresh handle for it.
    pub fn mint(&self, context: T) -> Result<Handle> {
        let mut inner = self.lock();
        if inner.live >= self.capacity {
            return Err(BridgeError::Construction(format!(
                "handle limit of {} live contexts reached",
                self.capacity
            )));
        }

        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                if inner.slots.len() >= INDEX_MASK {
                    return Err(BridgeError::Construction(
                        "handle space exhausted".to_string(),
                    ));
                }
                inner.slots.push(Slot {
                    generation: 0,
                    context: None,
                });
                inner.slots.len() - 1
            }
        };

        let slot = &mut inner.slots[index];
        slot.context = Some(Arc::new(Mutex::new(context)));
        let handle = Handle::new(index, slot.generation);
        inner.live += 1;

        debug!(%handle, live = inner.live, "minted handle");
        Ok(handle)
    }

    /// Look up the context behind `handle`.
    ///
    /// The returned `Arc` keeps the context alive even if the handle is
    /// released while the caller is still using it.
    pub fn recover(&self, handle: Handle) -> Result<Arc<Mutex<T>>> {
        let index = handle.index().ok_or(BridgeError::InvalidHandle(handle))?;
        let inner = self.lock();
        match inner.slots.get(index) {
            Some(Slot {
                generation,
                context: Some(context),
            }) if *generation == handle.generation() => Ok(Arc::clone(context)),
            _ => Err(BridgeError::InvalidHandle(handle)),
        }
    }

    /// Drop the registry's ownership of the context behind `handle`.
    ///
    /// The handle is invalid afterwards, even once its slot is reused. A slot
    /// whose generation is exhausted is retired instead of wrapping around.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let index = handle.index().ok_or(BridgeError::InvalidHandle(handle))?;
        let mut inner = self.lock();

        let (context, reusable) = match inner.slots.get_mut(index) {
            Some(slot) if slot.generation == handle.generation() && slot.context.is_some() => {
                let reusable = slot.generation < GENERATION_MASK;
                if reusable {
                    slot.generation += 1;
                }
                (slot.context.take(), reusable)
            }
            _ => return Err(BridgeError::InvalidHandle(handle)),
        };
        if reusable {
            inner.free.push(index);
        } else {
            debug!(%handle, "retired slot with exhausted generation");
        }
        inner.live -= 1;
        debug!(%handle, live = inner.live, "released handle");

        // Drop the context outside the registry lock.
        drop(inner);
        drop(context);
        Ok(())
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
