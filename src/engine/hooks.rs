// src/engine/hooks.rs

//! Optional callbacks around a run.

use std::fmt;

use tracing::debug;

use crate::dag::Register;

pub type Hook = Box<dyn FnMut(&Register) + Send>;

/// Callbacks invoked by [`crate::engine::Engine::run`].
///
/// Order: `on_create` (fresh run) or `on_restart` (restored run), then
/// `on_start`, the tick loop, `on_success` or `on_fail`, and finally
/// `on_destroy`. An aborted run skips `on_success` and `on_fail` but still
/// gets `on_destroy`.
#[derive(Default)]
pub struct EngineHooks {
    pub on_create: Option<Hook>,
    pub on_restart: Option<Hook>,
    pub on_start: Option<Hook>,
    pub on_success: Option<Hook>,
    pub on_fail: Option<Hook>,
    pub on_destroy: Option<Hook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    Create,
    Restart,
    Start,
    Success,
    Fail,
    Destroy,
}

impl EngineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, point: HookPoint, hook: impl FnMut(&Register) + Send + 'static) -> Self {
        *self.slot(point) = Some(Box::new(hook));
        self
    }

    pub(crate) fn fire(&mut self, point: HookPoint, register: &Register) {
        if let Some(hook) = self.slot(point).as_mut() {
            debug!(?point, "running lifecycle hook");
            hook(register);
        }
    }

    fn slot(&mut self, point: HookPoint) -> &mut Option<Hook> {
        match point {
            HookPoint::Create => &mut self.on_create,
            HookPoint::Restart => &mut self.on_restart,
            HookPoint::Start => &mut self.on_start,
            HookPoint::Success => &mut self.on_success,
            HookPoint::Fail => &mut self.on_fail,
            HookPoint::Destroy => &mut self.on_destroy,
        }
    }
}

impl fmt::Debug for EngineHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHooks")
            .field("on_create", &self.on_create.is_some())
            .field("on_restart", &self.on_restart.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}
