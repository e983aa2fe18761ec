//! Serialized access to Dear ImGui's global "current context".
//!
//! Every window keeps its own context suspended. A window thread that wants to
//! touch its context goes through [`WindowContext::with_active`], which takes
//! the process-wide gate, makes the context current, runs the closure and
//! suspends the context again, also when the closure unwinds.
//!
//! Lock order: the gate is taken before the Vulkan queue lock, never after.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use dear_imgui_rs::{Context, SuspendedContext};
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::error::{AppError, AppResult};

static GATE: Mutex<()> = parking_lot::const_mutex(());

/// Holds the gate. Code that touches ImGui's global state without a
/// [`WindowContext`] (creation, destruction) runs while one of these is alive.
pub struct GateGuard {
    _guard: MutexGuard<'static, ()>,
}

/// Blocks until no other thread is inside the gate.
pub fn lock_gate() -> GateGuard {
    GateGuard {
        _guard: GATE.lock(),
    }
}

/// A Dear ImGui context owned by one window thread, suspended between uses.
pub struct WindowContext {
    suspended: Option<SuspendedContext>,
    label: String,
}

impl WindowContext {
    /// Creates a suspended context, running `setup` on it while active.
    pub fn new<F>(label: impl Into<String>, setup: F) -> AppResult<Self>
    where
        F: FnOnce(&mut Context) -> AppResult<()>,
    {
        let label = label.into();
        let suspended = {
            let _gate = lock_gate();
            SuspendedContext::try_create().map_err(|e| AppError::Imgui(e.to_string()))?
        };
        let mut context = Self {
            suspended: Some(suspended),
            label,
        };
        context.with_active(setup)??;
        Ok(context)
    }

    /// Runs `f` with this context current.
    ///
    /// Fails with [`AppError::ContextBusy`] if some context was made current
    /// outside the gate.
    pub fn with_active<F, R>(&mut self, f: F) -> AppResult<R>
    where
        F: FnOnce(&mut Context) -> R,
    {
        let gate = lock_gate();
        let Some(suspended) = self.suspended.take() else {
            return Err(AppError::Imgui(format!(
                "context for {} was lost",
                self.label
            )));
        };
        match suspended.activate() {
            Ok(context) => {
                trace!(window = %self.label, "Context activated");
                let mut active = ActiveContext {
                    context: ManuallyDrop::new(context),
                    slot: &mut self.suspended,
                    _gate: gate,
                };
                Ok(f(&mut *active))
            }
            Err(suspended) => {
                self.suspended = Some(suspended);
                Err(AppError::ContextBusy)
            }
        }
    }
}

impl Drop for WindowContext {
    fn drop(&mut self) {
        if let Some(suspended) = self.suspended.take() {
            let _gate = lock_gate();
            drop(suspended);
            trace!(window = %self.label, "Context destroyed");
        }
    }
}

/// The active context, suspended back into its slot on drop.
struct ActiveContext<'a> {
    context: ManuallyDrop<Context>,
    slot: &'a mut Option<SuspendedContext>,
    // Released after `drop` has suspended the context.
    _gate: GateGuard,
}

impl Deref for ActiveContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

impl DerefMut for ActiveContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}

impl Drop for ActiveContext<'_> {
    fn drop(&mut self) {
        // SAFETY: `context` is not used again after this.
        let context = unsafe { ManuallyDrop::take(&mut self.context) };
        *self.slot = Some(context.suspend());
    }
}
