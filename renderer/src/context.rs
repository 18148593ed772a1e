use std::{cell::Cell, fmt, rc::Rc};

use anyhow::{Context, Result};
use log::info;

use crate::GpuBackend;

/// A GPU context shared by everything that renders on this thread.
///
/// Cloning shares the context. Users [`acquire`](Self::acquire) a [`ContextLease`]; the backend's
/// resources are released when the last lease is dropped.
#[derive(Clone)]
pub struct GpuContext {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    backend: Rc<dyn GpuBackend>,
    leases: Cell<usize>,
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("leases", &self.inner.leases.get())
            .finish()
    }
}

impl GpuContext {
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                backend: Rc::new(backend),
                leases: 0.into(),
            }),
        }
    }

    /// Checks the capabilities of the backend and takes a lease.
    pub fn acquire(&self) -> Result<ContextLease> {
        let capabilities = self.inner.backend.capabilities();
        capabilities
            .check()
            .context("The GPU device is not supported")?;

        let leases = self.inner.leases.get() + 1;
        self.inner.leases.set(leases);
        if leases == 1 {
            info!("GPU context acquired: {capabilities:?}");
        }
        Ok(ContextLease {
            inner: self.inner.clone(),
        })
    }

    pub fn lease_count(&self) -> usize {
        self.inner.leases.get()
    }
}

/// Keeps the shared context alive.
pub struct ContextLease {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLease").finish_non_exhaustive()
    }
}

impl ContextLease {
    pub fn backend(&self) -> &Rc<dyn GpuBackend> {
        &self.inner.backend
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let leases = self.inner.leases.get() - 1;
        self.inner.leases.set(leases);
        if leases == 0 {
            self.inner.backend.release();
            info!("GPU context released");
        }
    }
}
