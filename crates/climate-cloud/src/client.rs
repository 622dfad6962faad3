//! The `CloudClient` seam.
//!
//! The sync engine never talks to the vendor cloud directly. It is handed
//! an implementation of [`CloudClient`] and drives it through these five
//! calls. Concrete implementations (the encrypted REST API, test doubles)
//! live outside this crate.

use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;

use crate::error::Error;
use crate::model::{
    CommandAck, CommandKind, CommandPayload, DeviceDescriptor, DeviceId, PushEvent, RemoteState,
};

/// Live push stream returned by [`CloudClient::open_push_channel`].
///
/// Ending (yielding `None`) or yielding an `Err` both mean the channel is
/// gone and must be reopened.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushEvent, Error>> + Send>>;

/// Remote device cloud, as seen by the sync engine.
///
/// Every method may be called concurrently from many tasks. Callers wrap
/// each call in their own timeout; implementations need not.
pub trait CloudClient: Send + Sync + 'static {
    /// Enumerate every device on the account.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>, Error>> + Send;

    /// Read the current state of one device.
    fn fetch_state(&self, id: &DeviceId) -> impl Future<Output = Result<RemoteState, Error>> + Send;

    /// Submit a parameter write.
    fn send_command(
        &self,
        id: &DeviceId,
        kind: CommandKind,
        payload: CommandPayload,
    ) -> impl Future<Output = Result<CommandAck, Error>> + Send;

    /// Open the push channel. The returned stream yields one event per
    /// remote change notification until it ends or fails.
    fn open_push_channel(&self) -> impl Future<Output = Result<PushStream, Error>> + Send;

    /// Refresh an expired session.
    ///
    /// Called after [`Error::AuthExpired`]. Implementations should collapse
    /// concurrent calls into one login. The default cannot recover.
    fn reauthenticate(&self) -> impl Future<Output = Result<(), Error>> + Send {
        async { Err(Error::AuthExpired) }
    }
}
