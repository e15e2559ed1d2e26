//! Channel primitives for the modem driver.
//!
//! `EvictingChannel` is a fixed-capacity FIFO whose producer never blocks:
//! when full it drops the oldest entry and appends the new one. Telemetry
//! queues prefer fresh data over complete data; the internal write/read/URC
//! channels use the same primitive with eviction as a safety valve only.
//!
//! `WriteGate` is the write-serialization lock. Unlike a scoped mutex guard
//! it is released by a *different* task than the one that acquired it: the
//! writer acquires it around a transport write, and either the reader
//! (on a terminal line) or the correlator (on a response timeout) releases
//! it. `release` reports whether the gate was actually held so a release
//! can never happen twice.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::{MultiWakerRegistration, WakerRegistration};
use heapless::Deque;

const MAX_WAITERS: usize = 4;

struct ChannelState<T, const N: usize> {
    items: Deque<T, N>,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

/// Bounded FIFO channel that evicts the oldest entry instead of blocking.
pub struct EvictingChannel<T, const N: usize> {
    state: Mutex<CriticalSectionRawMutex, RefCell<ChannelState<T, N>>>,
}

impl<T, const N: usize> EvictingChannel<T, N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(ChannelState {
                items: Deque::new(),
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Append an item, evicting the oldest entry first if the channel is
    /// full. Never blocks, never fails; relative order of the survivors is
    /// preserved.
    pub fn push(&self, item: T) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.items.is_full() {
                log::warn!("queue: full, dropping oldest entry");
                let _ = state.items.pop_front();
            }
            // Cannot fail: a slot was just freed if needed
            let _ = state.items.push_back(item);
            state.waiters.wake();
        });
    }

    /// Take the oldest item, suspending until one is available. Waiters are
    /// woken in registration order.
    pub async fn pop(&self) -> T {
        poll_fn(|cx| {
            self.state.lock(|cell| {
                let mut state = cell.borrow_mut();
                match state.items.pop_front() {
                    Some(item) => Poll::Ready(item),
                    None => {
                        state.waiters.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }

    /// Take the oldest item if one is present.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock(|cell| cell.borrow_mut().items.pop_front())
    }

    pub fn len(&self) -> usize {
        self.state.lock(|cell| cell.borrow().items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct GateState {
    held: bool,
    waiter: WakerRegistration,
}

/// Explicitly released binary lock serializing transport writes against
/// response completion.
pub struct WriteGate {
    state: Mutex<CriticalSectionRawMutex, RefCell<GateState>>,
}

impl WriteGate {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                held: false,
                waiter: WakerRegistration::new(),
            })),
        }
    }

    /// Take the gate, suspending while another write holds it.
    pub async fn acquire(&self) {
        poll_fn(|cx| {
            self.state.lock(|cell| {
                let mut state = cell.borrow_mut();
                if state.held {
                    state.waiter.register(cx.waker());
                    Poll::Pending
                } else {
                    state.held = true;
                    Poll::Ready(())
                }
            })
        })
        .await
    }

    /// Release the gate. Returns `false` if it was not held, so a second
    /// release on the same acquisition is a detectable no-op.
    pub fn release(&self) -> bool {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.held {
                state.held = false;
                state.waiter.wake();
                true
            } else {
                false
            }
        })
    }

    pub fn is_held(&self) -> bool {
        self.state.lock(|cell| cell.borrow().held)
    }
}

/// Single-slot hand-off for a lock guard that one task acquires and a
/// different task releases, the incoming-call guard contract. The slot
/// never blocks: stashing over an occupied slot displaces the old guard
/// and returns it so the caller can report the protocol violation.
pub struct GuardStash<T> {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Option<T>>>,
}

impl<T> GuardStash<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(None)),
        }
    }

    /// Store a guard, returning any displaced one.
    pub fn stash(&self, guard: T) -> Option<T> {
        self.slot.lock(|cell| cell.borrow_mut().replace(guard))
    }

    /// Take the stashed guard. Each stash can be taken exactly once.
    pub fn take(&self) -> Option<T> {
        self.slot.lock(|cell| cell.borrow_mut().take())
    }
}
