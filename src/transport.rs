//! Transport boundary between the session state machine and a BLE stack.
//!
//! [`crate::ble::BleTransport`] implements these traits on top of btleplug;
//! tests drive the session with an in-memory implementation instead.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Handler registered with [`Connection::subscribe`]
///
/// The transport pushes the raw value of every notification received on the
/// subscribed characteristic. Dropping the sender signals a lost link.
pub type NotificationSender = mpsc::UnboundedSender<Vec<u8>>;

/// Opens connections to bikes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection type produced by this transport
    type Connection: Connection;

    /// Connect to the device with the given identifier
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device cannot be found or connected.
    async fn connect(&self, device_id: &str) -> Result<Self::Connection>;
}

/// An open GATT connection, owned exclusively by one session
#[async_trait]
pub trait Connection: Send {
    /// Enable notifications on `characteristic` and forward them to `handler`
    ///
    /// # Errors
    ///
    /// Returns [`crate::BikeError::SubscribeFailed`] if notifications cannot be enabled.
    async fn subscribe(&mut self, characteristic: Uuid, handler: NotificationSender) -> Result<()>;

    /// Write one frame; with `require_ack` the call completes only once the
    /// device acknowledged the write
    ///
    /// # Errors
    ///
    /// Returns [`crate::BikeError::WriteFailed`] if the write is rejected.
    async fn write(&mut self, characteristic: Uuid, data: &[u8], require_ack: bool) -> Result<()>;

    /// Disable notifications on `characteristic`
    ///
    /// # Errors
    ///
    /// Returns [`crate::BikeError::SubscribeFailed`] if the stack refuses.
    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns a transport error if the stack fails to disconnect cleanly.
    async fn disconnect(&mut self) -> Result<()>;
}
