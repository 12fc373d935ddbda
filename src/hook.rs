//! Reporting of errors that can't be delivered to a downstream observer.
//!
//! An error is *undeliverable* when the operation it belongs to has already committed to another
//! terminal signal, or has been cancelled. Such errors are never dropped silently: they are handed
//! to an [`ErrorHook`].
//!
//! Every operator reports to the process-wide hook unless a dedicated hook was injected with its
//! `undeliverable` builder method. The process-wide hook can be replaced with
//! [`set_undeliverable_hook`] and restored with [`reset_undeliverable_hook`]; when no hook is
//! installed, undeliverable errors are logged at error level.

use std::{fmt, sync::Arc};

use crate::{sync::RwLock, Error};

type HookFn = dyn Fn(Error) + Send + Sync;

static GLOBAL_HOOK: RwLock<Option<Arc<HookFn>>> = RwLock::new(None);

/// Installs `hook` as the process-wide handler for undeliverable errors.
///
/// Replaces any previously installed hook.
pub fn set_undeliverable_hook<F>(hook: F)
where
    F: Fn(Error) + Send + Sync + 'static,
{
    *GLOBAL_HOOK.write() = Some(Arc::new(hook));
}

/// Removes the process-wide undeliverable error hook, restoring the default of logging them.
pub fn reset_undeliverable_hook() {
    *GLOBAL_HOOK.write() = None;
}

/// Where an operator sends errors it can't deliver downstream.
#[derive(Clone, Default)]
pub struct ErrorHook {
    local: Option<Arc<HookFn>>,
}

impl ErrorHook {
    /// Returns a hook that forwards to whatever process-wide hook is installed at report time.
    #[inline]
    pub fn global() -> Self {
        Self::default()
    }

    /// Creates a dedicated hook that bypasses the process-wide one.
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        Self {
            local: Some(Arc::new(hook)),
        }
    }

    pub fn report(&self, error: Error) {
        if let Some(local) = &self.local {
            return local(error);
        }

        // Don't hold the lock while calling out, the hook may want to replace itself.
        let global = GLOBAL_HOOK.read().clone();
        match global {
            Some(hook) => hook(error),
            None => log::error!("undeliverable error: {error}"),
        }
    }
}

impl fmt::Debug for ErrorHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHook")
            .field("global", &self.local.is_none())
            .finish()
    }
}
