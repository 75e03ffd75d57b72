//! RAII guard over one acquired reference

use crate::error::Result;
use crate::resource::Resource;

/// One acquired reference on a [`Resource`], released when dropped.
///
/// Obtained from [`Resource::lease`]. Use [`into_inner`](Self::into_inner)
/// to keep the reference without releasing it, or
/// [`release`](Self::release) to release it and observe the outcome.
#[must_use = "dropping a lease releases the reference immediately"]
pub struct Lease {
    resource: Option<Resource>,
}

impl Lease {
    pub(crate) fn new(resource: Resource) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    /// Hand the reference back to the caller, who now owes a `release()`.
    #[must_use]
    pub fn into_inner(mut self) -> Resource {
        self.take()
    }

    /// Release the reference now, returning the remaining count.
    pub fn release(mut self) -> Result<u32> {
        self.take().release()
    }

    fn take(&mut self) -> Resource {
        match self.resource.take() {
            Some(resource) => resource,
            None => unreachable!("lease is only emptied by consuming methods"),
        }
    }
}

impl std::ops::Deref for Lease {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("lease is only emptied by consuming methods"),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take()
            && let Err(error) = resource.release()
        {
            tracing::error!(
                resource_id = %resource.id(),
                error = %error,
                "Lease could not release its reference"
            );
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("resource", &self.resource)
            .finish()
    }
}
