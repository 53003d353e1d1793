use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use uuid::Uuid;

use super::characteristic::Characteristic;
use super::{DeviceId, Error, NotificationSetupMode, Result};

/// Values pushed by the device after notifications or indications were enabled.
///
/// Dropping the stream disables them again.
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>>>;

/// A Bluetooth LE device that can be connected to.
///
/// Implemented by the BLE stack in use; [crate::mock::MockDevice] is an in-process implementation.
pub trait Peripheral: Send + Sync + 'static {
    /// The logical session obtained by [Peripheral::connect].
    type Connection: Connection;

    /// Returns this device’s unique identifier.
    fn id(&self) -> DeviceId;

    /// Establishes a connection. The physical link is released when the returned
    /// connection is dropped.
    fn connect(&self, auto_connect: bool) -> BoxFuture<'static, Result<Self::Connection>>;
}

/// An open GATT connection to a device.
///
/// Every returned future or stream is `'static`, so that it can outlive the borrow
/// of the connection; cancelling is done by dropping it.
pub trait Connection: Send + Sync + 'static {
    /// Discovers services and returns the characteristic with the given [Uuid].
    fn discover_characteristic(&self, uuid: Uuid) -> BoxFuture<'static, Result<Characteristic>>;

    /// Reads the value of the characteristic from the device.
    fn read(&self, characteristic: &Characteristic) -> BoxFuture<'static, Result<Vec<u8>>>;

    /// Writes `value` with response; resolves to the bytes written.
    fn write(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>>>;

    /// Enables notifications; resolves once they are set up on both ends.
    fn setup_notification(
        &self,
        characteristic: &Characteristic,
        mode: NotificationSetupMode,
    ) -> BoxFuture<'static, Result<NotificationStream>>;

    /// Enables indications; resolves once they are set up on both ends.
    fn setup_indication(
        &self,
        characteristic: &Characteristic,
        mode: NotificationSetupMode,
    ) -> BoxFuture<'static, Result<NotificationStream>>;

    /// Resolves with the cause when the link is lost. Never resolves if the
    /// connection is closed from this side.
    fn disconnected(&self) -> BoxFuture<'static, Error>;
}
