//! Restart Manager session controller.
//!
//! The session protocol is fixed:
//! 1. `RmStartSession`
//! 2. `RmRegisterResources` with exactly one file
//! 3. `RmShutdown(RmForceShutdown | RmShutdownOnlyRegistered)`
//! 4. `RmEndSession`
//!
//! The order is encoded as a type-state chain: `Idle -> SessionOpen ->
//! ResourceRegistered -> ShutdownIssued -> (ended)`. Each step consumes the
//! prior state. The session handle lives in a [`SessionGuard`] that calls
//! `RmEndSession` exactly once, either through an explicit `end()` or on drop
//! when a step fails and the session value is discarded.

use super::{RestartManagerApi, SessionIdentity};
use crate::config::types::{LiberationError, Result};
use std::marker::PhantomData;

/// `RmForceShutdown`
pub const RM_FORCE_SHUTDOWN: u32 = 0x1;
/// `RmShutdownOnlyRegistered`
pub const RM_SHUTDOWN_ONLY_REGISTERED: u32 = 0x10;
/// Flags passed to `RmShutdown`; never an unrestricted shutdown
pub const FORCED_REGISTERED_ONLY: u32 = RM_FORCE_SHUTDOWN | RM_SHUTDOWN_ONLY_REGISTERED;

/// `RmShutdown` returns `ERROR_INVALID_HANDLE` when nothing held the resource
pub const NOTHING_HELD_CODE: u32 = 6;

const ERROR_SUCCESS: u32 = 0;

/// Type-state marker: no session yet
pub struct Idle;

/// Type-state marker: `RmStartSession` succeeded
pub struct SessionOpen;

/// Type-state marker: the target file is registered
pub struct ResourceRegistered;

/// Type-state marker: forced shutdown was issued
pub struct ShutdownIssued;

/// How the forced shutdown ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Holders were closed or terminated
    Released,
    /// No process held the resource
    NothingHeld,
}

/// Owns the session handle and ends it exactly once
struct SessionGuard<'a, R: RestartManagerApi + ?Sized> {
    api: &'a R,
    identity: Option<SessionIdentity>,
}

impl<'a, R: RestartManagerApi + ?Sized> SessionGuard<'a, R> {
    fn handle(&self) -> u32 {
        self.identity.as_ref().map(|id| id.handle).unwrap_or_default()
    }

    fn finish(&mut self) {
        if let Some(identity) = self.identity.take() {
            let code = self.api.end_session(identity.handle);
            if code == ERROR_SUCCESS {
                log::debug!("Restart Manager session {} ended", identity.handle);
            } else {
                log::warn!(
                    "RmEndSession failed for session {} with error code: {}",
                    identity.handle,
                    code
                );
            }
        }
    }
}

impl<R: RestartManagerApi + ?Sized> Drop for SessionGuard<'_, R> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Controller in the `Idle` state
pub struct RestartManager<'a, R: RestartManagerApi + ?Sized> {
    api: &'a R,
    _state: PhantomData<Idle>,
}

impl<'a, R: RestartManagerApi + ?Sized> RestartManager<'a, R> {
    pub fn new(api: &'a R) -> Self {
        Self {
            api,
            _state: PhantomData,
        }
    }

    /// Transition to `SessionOpen`. `path` is the resource the session is
    /// opened for and only appears in errors.
    pub fn open_session(self, path: &str) -> Result<RmSession<'a, R, SessionOpen>> {
        let identity = self
            .api
            .start_session()
            .map_err(|code| LiberationError::SessionStartFailed {
                path: path.to_string(),
                code,
            })?;

        log::debug!(
            "Restart Manager session {} started (key {})",
            identity.handle,
            identity.key
        );

        Ok(RmSession {
            guard: SessionGuard {
                api: self.api,
                identity: Some(identity),
            },
            _state: PhantomData,
        })
    }
}

/// Live Restart Manager session; `S` tracks the protocol step
pub struct RmSession<'a, R: RestartManagerApi + ?Sized, S> {
    guard: SessionGuard<'a, R>,
    _state: PhantomData<S>,
}

impl<'a, R: RestartManagerApi + ?Sized, S> RmSession<'a, R, S> {
    pub fn session_handle(&self) -> u32 {
        self.guard.handle()
    }

    /// End the session now. Available in every state.
    pub fn end(mut self) {
        self.guard.finish();
    }

    fn advance<T>(self) -> RmSession<'a, R, T> {
        RmSession {
            guard: self.guard,
            _state: PhantomData,
        }
    }
}

impl<'a, R: RestartManagerApi + ?Sized> RmSession<'a, R, SessionOpen> {
    /// Transition to `ResourceRegistered`
    pub fn register_resource(self, path: &str) -> Result<RmSession<'a, R, ResourceRegistered>> {
        if path.contains('\0') {
            return Err(LiberationError::InvalidArgument(format!(
                "path contains a NUL character: {:?}",
                path
            )));
        }

        let code = self.guard.api.register_file(self.guard.handle(), path);
        if code != ERROR_SUCCESS {
            return Err(LiberationError::ResourceRegistrationFailed {
                path: path.to_string(),
                code,
            });
        }

        log::debug!(
            "Registered {} with Restart Manager session {}",
            path,
            self.guard.handle()
        );
        Ok(self.advance())
    }
}

impl<'a, R: RestartManagerApi + ?Sized> RmSession<'a, R, ResourceRegistered> {
    /// Transition to `ShutdownIssued`.
    ///
    /// Forces every holder of the registered resource to let go, without
    /// prompting and without a progress callback. `path` is only used in
    /// error messages.
    pub fn force_shutdown(
        self,
        path: &str,
    ) -> Result<(RmSession<'a, R, ShutdownIssued>, ShutdownOutcome)> {
        let code = self
            .guard
            .api
            .shutdown(self.guard.handle(), FORCED_REGISTERED_ONLY);

        let outcome = match code {
            ERROR_SUCCESS => ShutdownOutcome::Released,
            NOTHING_HELD_CODE => ShutdownOutcome::NothingHeld,
            code => {
                return Err(LiberationError::ForceShutdownFailed {
                    path: path.to_string(),
                    code,
                })
            }
        };

        Ok((self.advance(), outcome))
    }
}
