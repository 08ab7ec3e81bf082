//! Connection handles.
//!
//! Every connection is owned by exactly one [`ConnectionGuard`], held by the
//! connection task; dropping it (or an explicit disconnect from any
//! [`ConnectionHandle`]) tears the connection down. Dissemination loops
//! select on [`ConnectionHandle::closed`] so they terminate promptly when
//! the peer goes away.
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A [`ConnectionGuard`]/[`ConnectionHandle`] builder.
#[derive(Default, Debug)]
pub struct HandleBuilder {
    permit: Option<OwnedSemaphorePermit>,
}

impl HandleBuilder {
    /// Creates a new builder.
    pub const fn new() -> Self {
        Self { permit: None }
    }

    /// Attaches a capacity permit to the connection.
    ///
    /// The permit lives inside the guard, so whatever capacity it represents
    /// is given back on every exit path of the connection task.
    #[must_use]
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Builds the guard (for the connection task) and the first handle.
    pub fn build(self) -> (ConnectionGuard, ConnectionHandle) {
        let token = CancellationToken::new();

        (
            ConnectionGuard {
                token: token.clone(),
                _permit: self.permit,
            },
            ConnectionHandle { token },
        )
    }
}

/// The owning half of a connection, given to the connection task.
pub struct ConnectionGuard {
    token: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    /// Resolves when some handle asked for the connection to close.
    pub fn should_shutdown(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Tells every [`ConnectionHandle`] that the connection is gone.
    ///
    /// Also called on [`Drop::drop`].
    pub fn connection_closed(&self) {
        self.token.cancel();
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A non-owning view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    token: CancellationToken,
}

impl ConnectionHandle {
    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// `true` once the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Asks the connection task to disconnect.
    pub fn disconnect(&self) {
        self.token.cancel();
    }
}
