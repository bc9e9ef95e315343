use std::{fmt, mem::ManuallyDrop};

/// Owns a native handle and runs a cleanup routine for it exactly once.
///
/// The cleanup runs when the wrapper is dropped, which covers normal returns, early `?` returns
/// and unwinding alike. A wrapper constructed around a handle that fails its validity check still
/// holds the handle but owns nothing, and never calls its cleanup.
///
/// Declaring several of these in creation order gives reverse-order teardown for free, since
/// locals are dropped in reverse declaration order.
pub struct ScopedResource<H, C = fn(H)>
where
    C: FnOnce(H),
{
    handle: ManuallyDrop<H>,
    /// `None` once released, or if the handle was never valid.
    cleanup: Option<C>,
}

impl<H, C> ScopedResource<H, C>
where
    C: FnOnce(H),
{
    /// Wrap `handle`, treating it as owned only if `is_valid` accepts it.
    pub fn new(handle: H, is_valid: impl FnOnce(&H) -> bool, cleanup: C) -> Self {
        let cleanup = is_valid(&handle).then_some(cleanup);

        Self {
            handle: ManuallyDrop::new(handle),
            cleanup,
        }
    }

    /// Wrap a handle that is already known to be valid.
    pub fn owned(handle: H, cleanup: C) -> Self {
        Self::new(handle, |_| true, cleanup)
    }

    pub fn is_valid(&self) -> bool {
        self.cleanup.is_some()
    }

    pub fn get(&self) -> &H {
        &self.handle
    }

    pub fn get_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Give up ownership of the handle without running the cleanup.
    pub fn into_inner(self) -> H {
        let mut this = ManuallyDrop::new(self);
        drop(this.cleanup.take());

        // SAFETY: `this` is never dropped, so the handle is moved out exactly once.
        unsafe { ManuallyDrop::take(&mut this.handle) }
    }

    /// Run the cleanup now instead of at the end of the scope.
    pub fn close(self) {
        drop(self);
    }
}

impl<H, C> Drop for ScopedResource<H, C>
where
    C: FnOnce(H),
{
    fn drop(&mut self) {
        // SAFETY: `drop` runs once and nothing touches the handle afterwards.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };

        if let Some(cleanup) = self.cleanup.take() {
            cleanup(handle);
        }
    }
}

impl<H: fmt::Debug, C> fmt::Debug for ScopedResource<H, C>
where
    C: FnOnce(H),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedResource")
            .field("handle", &*self.handle)
            .field("valid", &self.is_valid())
            .finish()
    }
}
