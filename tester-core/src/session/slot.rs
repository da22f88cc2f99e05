use core::sync::atomic::Ordering;

use portable_atomic::AtomicBool;

/// Guards the single ground-bond session.
///
/// A session can only be built from a [`SessionHandle`], and only one handle
/// exists at a time. Dropping the handle frees the slot.
pub struct SessionSlot {
    active: AtomicBool,
}

impl SessionSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Claims the slot, or returns `None` while a handle is outstanding.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SessionHandle<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionHandle { slot: self })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of ownership of the [`SessionSlot`].
#[must_use = "dropping the handle releases the session slot"]
pub struct SessionHandle<'a> {
    slot: &'a SessionSlot,
}

impl Drop for SessionHandle<'_> {
    fn drop(&mut self) {
        self.slot.active.store(false, Ordering::Release);
    }
}

impl core::fmt::Debug for SessionHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_handle_at_a_time() {
        let slot = SessionSlot::new();
        let handle = slot.try_acquire().expect("slot starts free");
        assert!(slot.is_active());
        assert!(slot.try_acquire().is_none());

        drop(handle);
        assert!(!slot.is_active());
        assert!(slot.try_acquire().is_some());
    }
}
