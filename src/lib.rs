//! Reactive coordinator for operations on a single BLE GATT characteristic.
//!
//! A [Presenter] consumes user [Intents] (connect, read, write, enable/disable
//! notifications or indications...) and drives connection, discovery and the
//! characteristic operations through the [Peripheral] and [Connection] traits,
//! reporting everything as one stream of [PresenterEvent]s.
//!
//! The crate is runtime-agnostic and spawns no threads. [mock::MockDevice] is an
//! in-process peripheral for tests and demos.

pub use btuuid::BluetoothUuidExt;
pub use characteristic::Characteristic;
pub use config::{PresenterConfig, DEFAULT_CONNECTED_TEXT};
pub use device::{Connection, NotificationStream, Peripheral};
pub use error::{AttError, Error, ErrorKind};
pub use event::PresenterEvent;
pub use intent::{intent_channel, Intent, IntentQueue, IntentSender, IntentSenders, Intents};
pub use oplog::{LogOperationLogger, OperationEvent, OperationEventLogger};
pub use presenter::Presenter;
pub use util::parse_hex_payload;

/// Convenience alias for a result with [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub use uuid::Uuid;
pub mod btuuid;
pub mod error;
pub mod mock;
pub mod oplog;
mod types;
pub use types::*;

mod async_util;
mod characteristic;
mod config;
mod device;
mod event;
mod intent;
mod presenter;
mod util;
