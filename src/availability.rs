//! Shared hardware availability flags.
//!
//! One mutex-protected flag word plus a condvar, injected into every stage.
//! Presence flags (`TRANSPORT_CONNECTED`, `STORAGE_MOUNTED`) are driven by
//! the collaborators. Token flags (`TRANSPORT_AVAILABLE`, `STORAGE_AVAILABLE`)
//! behave like binary semaphores: `acquire` waits for the token and clears
//! it, and the returned guard sets it again when dropped, so every exit path
//! releases exclusivity.

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HardwareFlags: u8 {
        const TRANSPORT_CONNECTED = 1 << 0;
        const TRANSPORT_AVAILABLE = 1 << 1;
        const STORAGE_MOUNTED     = 1 << 2;
        const STORAGE_AVAILABLE   = 1 << 3;
        const FILES_PENDING       = 1 << 4;
    }
}

/// External resource guarded by an exclusivity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Transport,
    Storage,
}

impl Resource {
    pub fn token(self) -> HardwareFlags {
        match self {
            Resource::Transport => HardwareFlags::TRANSPORT_AVAILABLE,
            Resource::Storage => HardwareFlags::STORAGE_AVAILABLE,
        }
    }

    pub fn presence(self) -> HardwareFlags {
        match self {
            Resource::Transport => HardwareFlags::TRANSPORT_CONNECTED,
            Resource::Storage => HardwareFlags::STORAGE_MOUNTED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Resource::Transport => "transport",
            Resource::Storage => "storage",
        }
    }
}

pub struct AvailabilityState {
    flags: Mutex<HardwareFlags>,
    changed: Condvar,
}

impl Default for AvailabilityState {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityState {
    /// Both tokens free, nothing connected or mounted.
    pub fn new() -> Self {
        Self::with_flags(HardwareFlags::TRANSPORT_AVAILABLE | HardwareFlags::STORAGE_AVAILABLE)
    }

    pub fn with_flags(initial: HardwareFlags) -> Self {
        Self {
            flags: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    /// Non-blocking snapshot.
    pub fn get(&self) -> HardwareFlags {
        *self.flags.lock()
    }

    pub fn set(&self, flags: HardwareFlags) {
        self.flags.lock().insert(flags);
        self.changed.notify_all();
    }

    pub fn clear(&self, flags: HardwareFlags) {
        self.flags.lock().remove(flags);
        self.changed.notify_all();
    }

    /// Sets or clears `flags`; returns whether the word changed.
    pub fn assign(&self, flags: HardwareFlags, on: bool) -> bool {
        let changed = {
            let mut current = self.flags.lock();
            let before = *current;
            current.set(flags, on);
            before != *current
        };
        if changed {
            self.changed.notify_all();
        }
        changed
    }

    /// Blocks until all (or any) of `wanted` are set; returns the flags seen.
    pub fn wait_until(&self, wanted: HardwareFlags, all: bool) -> HardwareFlags {
        let mut flags = self.flags.lock();
        while !satisfied(*flags, wanted, all) {
            self.changed.wait(&mut flags);
        }
        *flags
    }

    /// Like `wait_until` with an upper bound; `None` on timeout.
    pub fn wait_until_timeout(
        &self,
        wanted: HardwareFlags,
        all: bool,
        timeout: Duration,
    ) -> Option<HardwareFlags> {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !satisfied(*flags, wanted, all) {
            if self.changed.wait_until(&mut flags, deadline).timed_out() {
                return satisfied(*flags, wanted, all).then_some(*flags);
            }
        }
        Some(*flags)
    }

    /// Waits for the resource token and takes it.
    pub fn acquire(&self, resource: Resource) -> ExclusiveGuard<'_> {
        let token = resource.token();
        let mut flags = self.flags.lock();
        while !flags.contains(token) {
            self.changed.wait(&mut flags);
        }
        flags.remove(token);
        ExclusiveGuard {
            state: self,
            resource,
            extra: HardwareFlags::empty(),
        }
    }

    pub fn try_acquire(&self, resource: Resource) -> Option<ExclusiveGuard<'_>> {
        let token = resource.token();
        let mut flags = self.flags.lock();
        if !flags.contains(token) {
            return None;
        }
        flags.remove(token);
        Some(ExclusiveGuard {
            state: self,
            resource,
            extra: HardwareFlags::empty(),
        })
    }

    pub fn transport_connected(&self) -> bool {
        self.get().contains(HardwareFlags::TRANSPORT_CONNECTED)
    }

    pub fn storage_mounted(&self) -> bool {
        self.get().contains(HardwareFlags::STORAGE_MOUNTED)
    }
}

fn satisfied(current: HardwareFlags, wanted: HardwareFlags, all: bool) -> bool {
    if wanted.is_empty() {
        return true;
    }
    if all {
        current.contains(wanted)
    } else {
        current.intersects(wanted)
    }
}

/// Exclusive use of a resource; releases the token on drop.
pub struct ExclusiveGuard<'a> {
    state: &'a AvailabilityState,
    resource: Resource,
    extra: HardwareFlags,
}

impl ExclusiveGuard<'_> {
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Releases the token and sets `extra` in the same update.
    pub fn release_with(mut self, extra: HardwareFlags) {
        self.extra |= extra;
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.state.set(self.resource.token() | self.extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    #[test]
    fn starts_with_free_tokens_only() {
        let state = AvailabilityState::new();
        let flags = state.get();
        assert!(flags.contains(HardwareFlags::TRANSPORT_AVAILABLE | HardwareFlags::STORAGE_AVAILABLE));
        assert!(!state.transport_connected());
        assert!(!state.storage_mounted());
    }

    #[test]
    fn guard_releases_on_drop() {
        let state = AvailabilityState::new();
        {
            let _guard = state.acquire(Resource::Storage);
            assert!(!state.get().contains(HardwareFlags::STORAGE_AVAILABLE));
            assert!(state.try_acquire(Resource::Storage).is_none());
            assert!(state.try_acquire(Resource::Transport).is_some());
        }
        assert!(state.get().contains(HardwareFlags::STORAGE_AVAILABLE));
    }

    #[test]
    fn release_with_sets_extra_flags() {
        let state = AvailabilityState::new();
        let guard = state.acquire(Resource::Storage);
        guard.release_with(HardwareFlags::FILES_PENDING);
        let flags = state.get();
        assert!(flags.contains(HardwareFlags::STORAGE_AVAILABLE | HardwareFlags::FILES_PENDING));
    }

    #[test]
    fn token_has_a_single_holder() {
        let state = Arc::new(AvailabilityState::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = state.acquire(Resource::Transport);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_until_all_and_any() {
        let state = Arc::new(AvailabilityState::new());
        let waiter = {
            let state = state.clone();
            thread::spawn(move || {
                state.wait_until(
                    HardwareFlags::FILES_PENDING | HardwareFlags::TRANSPORT_CONNECTED,
                    true,
                )
            })
        };
        state.set(HardwareFlags::FILES_PENDING);
        thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());
        state.set(HardwareFlags::TRANSPORT_CONNECTED);
        let seen = waiter.join().unwrap();
        assert!(seen.contains(HardwareFlags::FILES_PENDING | HardwareFlags::TRANSPORT_CONNECTED));

        let any = state.wait_until(HardwareFlags::STORAGE_MOUNTED | HardwareFlags::FILES_PENDING, false);
        assert!(any.contains(HardwareFlags::FILES_PENDING));
    }

    #[test]
    fn wait_with_timeout_expires() {
        let state = AvailabilityState::new();
        let seen = state.wait_until_timeout(HardwareFlags::STORAGE_MOUNTED, true, Duration::from_millis(5));
        assert!(seen.is_none());
        assert!(state.assign(HardwareFlags::STORAGE_MOUNTED, true));
        assert!(!state.assign(HardwareFlags::STORAGE_MOUNTED, true));
        assert!(state
            .wait_until_timeout(HardwareFlags::STORAGE_MOUNTED, true, Duration::from_millis(5))
            .is_some());
    }
}
