//! Event-signal set shared between the session, the publisher and the
//! controller.
//!
//! A small flag word behind a critical-section mutex. Setting a flag wakes
//! every waiter; waiters observe flags without consuming them, so edge-style
//! flags must be cleared explicitly by the consumer ([`EventSet::take`]).

use core::cell::RefCell;
use core::future::poll_fn;
use core::ops::BitOr;
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

const MAX_WAITERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    /// Level flag: set while the broker connection is up.
    pub const CLIENT_CONNECTED: Events = Events(1 << 0);
    /// Edge flag, cleared by the publisher once handled.
    pub const TURN_LIGHT_ON: Events = Events(1 << 1);
    /// Edge flag, cleared by the publisher once handled.
    pub const TURN_LIGHT_OFF: Events = Events(1 << 2);
    /// Deliberate shutdown requested.
    pub const FORCE_STOP: Events = Events(1 << 3);
    pub(crate) const PUBLISHER_START: Events = Events(1 << 4);
    pub(crate) const PUBLISHER_CANCEL: Events = Events(1 << 5);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every flag of `other` is set in `self`.
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Events) -> Events {
        Events(self.0 & other.0)
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

struct Inner {
    flags: Events,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

pub struct EventSet {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl Default for EventSet {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSet {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                flags: Events::NONE,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    pub fn set(&self, events: Events) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.flags = inner.flags | events;
            inner.waiters.wake();
        });
    }

    pub fn clear(&self, events: Events) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.flags = Events(inner.flags.0 & !events.0);
        });
    }

    /// Clear `events` and return which of them were set.
    pub fn take(&self, events: Events) -> Events {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let taken = inner.flags.intersection(events);
            inner.flags = Events(inner.flags.0 & !events.0);
            taken
        })
    }

    pub fn current(&self) -> Events {
        self.inner.lock(|inner| inner.borrow().flags)
    }

    /// True if any flag of `events` is set.
    pub fn any(&self, events: Events) -> bool {
        !self.current().intersection(events).is_empty()
    }

    /// Wait until any flag of `mask` is set and return the set flags of `mask`.
    ///
    /// Flags are left as they are.
    pub async fn wait_any(&self, mask: Events) -> Events {
        poll_fn(|cx| {
            self.inner.lock(|inner| {
                let mut inner = inner.borrow_mut();
                let hit = inner.flags.intersection(mask);
                if hit.is_empty() {
                    inner.waiters.register(cx.waker());
                    Poll::Pending
                } else {
                    Poll::Ready(hit)
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};
    use embassy_futures::yield_now;

    #[test]
    fn test_take_clears_only_requested_flags() {
        let set = EventSet::new();
        set.set(Events::CLIENT_CONNECTED | Events::TURN_LIGHT_ON);

        assert_eq!(set.take(Events::TURN_LIGHT_ON | Events::TURN_LIGHT_OFF), Events::TURN_LIGHT_ON);
        assert_eq!(set.current(), Events::CLIENT_CONNECTED);
        assert!(set.take(Events::TURN_LIGHT_ON).is_empty());
    }

    #[test]
    fn test_wait_any_returns_immediately_when_set() {
        let set = EventSet::new();
        set.set(Events::FORCE_STOP);

        let hit = block_on(set.wait_any(Events::FORCE_STOP | Events::CLIENT_CONNECTED));
        assert_eq!(hit, Events::FORCE_STOP);
        // Waiting does not consume.
        assert!(set.any(Events::FORCE_STOP));
    }

    #[test]
    fn test_waiter_is_woken_by_set() {
        let set = EventSet::new();

        let result = block_on(select(set.wait_any(Events::TURN_LIGHT_OFF), async {
            yield_now().await;
            set.set(Events::CLIENT_CONNECTED);
            yield_now().await;
            set.set(Events::TURN_LIGHT_OFF);
            // Never finishes on its own.
            core::future::pending::<()>().await
        }));

        match result {
            Either::First(hit) => assert_eq!(hit, Events::TURN_LIGHT_OFF),
            Either::Second(()) => panic!("waiter never woke"),
        }
    }
}
