// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Multicast event delegates.
//!
//! A [`Multicast`] is a thread-safe callback collection. `add` returns a
//! [`DelegateHandle`] acting as the lifetime anchor of the slot: the slot
//! stays alive while the handle exists. Broadcast copies the live slots out
//! of the lock, invokes them outside the lock, and prunes dead slots on the
//! way. Callbacks are isolated, a panicking subscriber never stops the
//! broadcast.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct SlotAnchor {
    alive: AtomicBool,
}

struct Slot<E> {
    id: u64,
    anchor: Weak<SlotAnchor>,
    callback: Arc<dyn Fn(&E) + Send + Sync>,
}

impl<E> Slot<E> {
    /// A slot is live while its anchor exists and has not been detached.
    fn upgrade(&self) -> Option<(Arc<SlotAnchor>, Arc<dyn Fn(&E) + Send + Sync>)> {
        let anchor = self.anchor.upgrade()?;
        if anchor.alive.load(Ordering::Acquire) {
            Some((anchor, Arc::clone(&self.callback)))
        } else {
            None
        }
    }
}

/// Handle returned by [`Multicast::add`].
///
/// In the default auto-detach mode, dropping the handle detaches the slot.
/// After `detach_on_drop(false)` the subscription stays installed for the
/// lifetime of the delegate unless `detach` is called first.
#[derive(Debug)]
pub struct DelegateHandle {
    anchor: Option<Arc<SlotAnchor>>,
    auto_detach: bool,
}

impl DelegateHandle {
    /// Detach the slot now. The callback is not invoked by any broadcast
    /// that starts after this call.
    pub fn detach(&mut self) {
        if let Some(anchor) = self.anchor.take() {
            anchor.alive.store(false, Ordering::Release);
        }
    }

    /// Choose whether dropping this handle detaches the slot.
    pub fn detach_on_drop(&mut self, auto_detach: bool) -> &mut Self {
        self.auto_detach = auto_detach;
        self
    }

    /// Returns true if the slot is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.anchor
            .as_ref()
            .map_or(false, |anchor| anchor.alive.load(Ordering::Acquire))
    }
}

impl Drop for DelegateHandle {
    fn drop(&mut self) {
        if let Some(anchor) = self.anchor.take() {
            if self.auto_detach {
                anchor.alive.store(false, Ordering::Release);
            } else {
                // Manual mode: keep the weak anchor valid so the slot
                // outlives the handle.
                std::mem::forget(anchor);
            }
        }
    }
}

/// Thread-safe multicast callback collection for events of type `E`.
pub struct Multicast<E> {
    slots: Arc<Mutex<Vec<Slot<E>>>>,
}

impl<E> Default for Multicast<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Multicast<E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<E> std::fmt::Debug for Multicast<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Multicast(slots: {})", self.len())
    }
}

impl<E> Multicast<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install `callback` and return its handle.
    pub fn add<F>(&self, callback: F) -> DelegateHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let anchor = Arc::new(SlotAnchor {
            alive: AtomicBool::new(true),
        });
        let slot = Slot {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            anchor: Arc::downgrade(&anchor),
            callback: Arc::new(callback),
        };
        self.slots.lock().unwrap().push(slot);
        DelegateHandle {
            anchor: Some(anchor),
            auto_detach: true,
        }
    }

    /// Get number of installed slots, including not yet pruned dead ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }

    /// Invoke every live callback with `event`.
    ///
    /// Slots whose anchor expired are pruned. Adds and removes performed by
    /// callbacks take effect on the next broadcast, never mid-iteration.
    /// Returns the number of callbacks that panicked.
    pub fn broadcast(&self, event: &E) -> u64 {
        // Snapshot live callbacks under the lock; the upgraded anchors keep
        // the slots alive for the duration of the invocation.
        let snapshot: Vec<_> = {
            let mut slots = self.slots.lock().unwrap();
            slots.retain(|slot| slot.upgrade().is_some());
            slots
                .iter()
                .filter_map(|slot| slot.upgrade().map(|(_, callback)| (slot.id, callback)))
                .collect()
        };

        let mut panics = 0;
        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                log::error!("delegate: Callback in slot {id} panicked");
                panics += 1;
            }
        }
        panics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_broadcast_invokes_all() {
        let multicast = Multicast::<u32>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        let _h1 = multicast.add(move |v| {
            c1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        let _h2 = multicast.add(move |v| {
            c2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        multicast.broadcast(&3);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_dropped_handle_is_pruned() {
        let multicast = Multicast::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let handle = multicast.add(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);

        multicast.broadcast(&());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(multicast.len(), 0);
    }

    #[test]
    fn test_manual_mode_survives_drop() {
        let multicast = Multicast::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let mut handle = multicast.add(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.detach_on_drop(false);
        drop(handle);

        multicast.broadcast(&());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach() {
        let multicast = Multicast::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let mut handle = multicast.add(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        multicast.broadcast(&());
        assert!(handle.is_attached());
        handle.detach();
        assert!(!handle.is_attached());
        multicast.broadcast(&());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let multicast = Multicast::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _h1 = multicast.add(|()| panic!("boom"));
        let c = Arc::clone(&counter);
        let _h2 = multicast.add(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let panics = multicast.broadcast(&());
        assert_eq!(panics, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_add_takes_effect_next_broadcast() {
        let multicast = Multicast::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner = multicast.clone();
        let c = Arc::clone(&counter);
        let _h1 = multicast.add(move |()| {
            let c2 = Arc::clone(&c);
            let mut handle = inner.add(move |()| {
                c2.fetch_add(1, Ordering::SeqCst);
            });
            handle.detach_on_drop(false);
        });

        multicast.broadcast(&());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        multicast.broadcast(&());
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
