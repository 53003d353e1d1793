//! An in-process [Peripheral] with scripted GATT characteristics.
//!
//! Reads return the stored value, writes store and echo the written bytes. In
//! [NotificationSetupMode::Default] the Client Characteristic Configuration descriptor
//! is written `01 00` for notifications, `02 00` for indications and `00 00` once the
//! last subscriber is gone. Subscribers of the same kind share one setup; setting up
//! the other kind while one is active fails with [ErrorKind::AlreadyNotifying].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_lock::Mutex;
use futures_core::future::BoxFuture;
use futures_lite::{future, StreamExt};
use futures_timer::Delay;
use log::debug;
use uuid::Uuid;

use super::async_util::Notifier;
use super::btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION;
use super::characteristic::Characteristic;
use super::device::{Connection, NotificationStream, Peripheral};
use super::{
    AttError, CharacteristicProperties, DeviceId, Error, ErrorKind, NotificationSetupMode,
    NotificationType, Result,
};

const NOTIFIER_CAPACITY: usize = 16;

/// A characteristic of a [MockDevice].
#[derive(Debug, Clone)]
pub struct MockCharacteristic {
    uuid: Uuid,
    value: Vec<u8>,
    properties: u32,
    descriptors: Vec<(Uuid, Vec<u8>)>,
    read_error: Option<AttError>,
    write_error: Option<AttError>,
    subscribe_error: Option<AttError>,
}

impl MockCharacteristic {
    /// `properties` is the GATT property bitmask, see [CharacteristicProperties].
    pub fn new(uuid: Uuid, value: impl Into<Vec<u8>>, properties: u32) -> Self {
        Self {
            uuid,
            value: value.into(),
            properties,
            descriptors: Vec::new(),
            read_error: None,
            write_error: None,
            subscribe_error: None,
        }
    }

    pub fn descriptor(mut self, uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.descriptors.push((uuid, value.into()));
        self
    }

    /// Every read fails with `error`.
    pub fn fail_reads(mut self, error: AttError) -> Self {
        self.read_error = Some(error);
        self
    }

    /// Every write fails with `error`.
    pub fn fail_writes(mut self, error: AttError) -> Self {
        self.write_error = Some(error);
        self
    }

    /// Every notification or indication setup fails with `error`, as if the device
    /// rejected the descriptor write.
    pub fn fail_subscriptions(mut self, error: AttError) -> Self {
        self.subscribe_error = Some(error);
        self
    }
}

/// Builds a [MockDevice].
#[derive(Debug, Clone)]
pub struct MockDeviceBuilder {
    name: String,
    address: String,
    rssi: i16,
    latency: Option<Duration>,
    services: Vec<(Uuid, Vec<MockCharacteristic>)>,
}

impl Default for MockDeviceBuilder {
    fn default() -> Self {
        Self {
            name: "MockDevice".to_string(),
            address: "00:11:22:33:44:55".to_string(),
            rssi: -60,
            latency: None,
            services: Vec::new(),
        }
    }
}

impl MockDeviceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The address is used as the [DeviceId].
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Delays connection, discovery and every characteristic operation.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Characteristic UUIDs must be unique across all services of the device.
    pub fn add_service(mut self, uuid: Uuid, characteristics: Vec<MockCharacteristic>) -> Self {
        self.services.push((uuid, characteristics));
        self
    }

    pub fn build(self) -> MockDevice {
        let mut chars = HashMap::new();
        let mut notifiers = HashMap::new();
        let mut services = Vec::with_capacity(self.services.len());
        for (service_id, characteristics) in self.services {
            services.push((service_id, characteristics.iter().map(|c| c.uuid).collect()));
            for c in characteristics {
                notifiers.insert(c.uuid, PushNotifiers::default());
                chars.insert(
                    c.uuid,
                    CharState {
                        properties: CharacteristicProperties::from_bits(c.properties),
                        value: c.value,
                        descriptors: c.descriptors,
                        read_error: c.read_error,
                        write_error: c.write_error,
                        subscribe_error: c.subscribe_error,
                        pushing: None,
                    },
                );
            }
        }
        MockDevice {
            inner: Arc::new(MockInner {
                name: self.name,
                id: DeviceId(self.address),
                rssi: self.rssi,
                latency: self.latency,
                services,
                notifiers,
                state: Mutex::new(MockState {
                    chars,
                    link: None,
                    next_link: 0,
                    connection_failure: None,
                }),
            }),
        }
    }
}

/// A scripted device. Clones share the same state.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<MockInner>,
}

struct MockInner {
    name: String,
    id: DeviceId,
    rssi: i16,
    latency: Option<Duration>,
    services: Vec<(Uuid, Vec<Uuid>)>,
    notifiers: HashMap<Uuid, PushNotifiers>,
    state: Mutex<MockState>,
}

struct PushNotifiers {
    notification: Notifier<Vec<u8>>,
    indication: Notifier<Vec<u8>>,
}

impl Default for PushNotifiers {
    fn default() -> Self {
        Self {
            notification: Notifier::new(NOTIFIER_CAPACITY),
            indication: Notifier::new(NOTIFIER_CAPACITY),
        }
    }
}

impl PushNotifiers {
    fn get(&self, kind: NotificationType) -> &Notifier<Vec<u8>> {
        match kind {
            NotificationType::Notification => &self.notification,
            NotificationType::Indication => &self.indication,
        }
    }
}

struct MockState {
    chars: HashMap<Uuid, CharState>,
    link: Option<Link>,
    next_link: u64,
    connection_failure: Option<Error>,
}

struct CharState {
    properties: CharacteristicProperties,
    value: Vec<u8>,
    descriptors: Vec<(Uuid, Vec<u8>)>,
    read_error: Option<AttError>,
    write_error: Option<AttError>,
    subscribe_error: Option<AttError>,
    pushing: Option<NotificationType>,
}

struct Link {
    id: u64,
    lost: Sender<Error>,
}

impl MockState {
    fn check(&self, link: u64) -> Result<()> {
        match &self.link {
            Some(current) if current.id == link => Ok(()),
            _ => Err(ErrorKind::NotConnected.into()),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&CharState> {
        self.chars
            .get(&uuid)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no characteristic {uuid}")))
    }

    fn characteristic_mut(&mut self, uuid: Uuid) -> Result<&mut CharState> {
        self.chars
            .get_mut(&uuid)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no characteristic {uuid}")))
    }
}

impl CharState {
    fn set_descriptor(&mut self, uuid: Uuid, value: Vec<u8>) {
        match self.descriptors.iter_mut().find(|(id, _)| *id == uuid) {
            Some((_, current)) => *current = value,
            None => self.descriptors.push((uuid, value)),
        }
    }
}

impl MockInner {
    async fn delay(&self) {
        if let Some(latency) = self.latency {
            Delay::new(latency).await;
        }
    }

    fn start_push(
        &self,
        link: u64,
        char_id: Uuid,
        kind: NotificationType,
        mode: NotificationSetupMode,
    ) -> Result<()> {
        let mut state = self.state.lock_blocking();
        state.check(link)?;
        let ch = state.characteristic_mut(char_id)?;
        if !ch.properties.supports(kind) {
            return Err(Error::new(
                ErrorKind::NotSupported,
                format!("{char_id} does not support {kind:?}"),
            ));
        }
        if let Some(active) = ch.pushing {
            return Err(Error::new(
                ErrorKind::AlreadyNotifying,
                format!("{active:?} is active on {char_id}"),
            ));
        }
        if let Some(error) = ch.subscribe_error {
            return Err(Error::from(error));
        }
        if mode == NotificationSetupMode::Default {
            let value = match kind {
                NotificationType::Notification => vec![0x01, 0x00],
                NotificationType::Indication => vec![0x02, 0x00],
            };
            ch.set_descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION, value);
        }
        ch.pushing = Some(kind);
        debug!("{} enabled {kind:?} on {char_id}", self.id);
        Ok(())
    }

    fn stop_push(&self, char_id: Uuid, kind: NotificationType, mode: NotificationSetupMode) {
        let mut state = self.state.lock_blocking();
        let Some(ch) = state.chars.get_mut(&char_id) else {
            return;
        };
        if ch.pushing != Some(kind) {
            return;
        }
        ch.pushing = None;
        if mode == NotificationSetupMode::Default {
            ch.set_descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION, vec![0x00, 0x00]);
        }
        debug!("{} disabled {kind:?} on {char_id}", self.id);
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl MockDevice {
    pub fn builder() -> MockDeviceBuilder {
        MockDeviceBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn rssi(&self) -> i16 {
        self.inner.rssi
    }

    /// Service UUIDs with the UUIDs of their characteristics.
    pub fn services(&self) -> &[(Uuid, Vec<Uuid>)] {
        &self.inner.services
    }

    /// The next connection attempt fails with `error`.
    pub fn fail_next_connection(&self, error: Error) {
        self.inner.state.lock_blocking().connection_failure = Some(error);
    }

    /// Simulates a link loss of the current connection. Returns `false` if not connected.
    pub fn drop_connection(&self, error: Error) -> bool {
        let link = self.inner.state.lock_blocking().link.take();
        match link {
            Some(link) => {
                debug!("{} lost connection: {error}", self.inner.id);
                let _ = link.lost.try_send(error);
                true
            }
            None => false,
        }
    }

    /// Pushes a value through the active notification or indication of the
    /// characteristic. Returns `false` if neither is enabled.
    pub fn notify(&self, char_id: Uuid, value: impl Into<Vec<u8>>) -> bool {
        let kind = {
            let state = self.inner.state.lock_blocking();
            state.chars.get(&char_id).and_then(|ch| ch.pushing)
        };
        match (kind, self.inner.notifiers.get(&char_id)) {
            (Some(kind), Some(notifiers)) => notifiers.get(kind).notify(value.into()),
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock_blocking().link.is_some()
    }

    /// The kind of value push currently enabled on the characteristic.
    pub fn is_notifying(&self, char_id: Uuid) -> Option<NotificationType> {
        let state = self.inner.state.lock_blocking();
        state.chars.get(&char_id).and_then(|ch| ch.pushing)
    }

    pub fn characteristic_value(&self, char_id: Uuid) -> Option<Vec<u8>> {
        let state = self.inner.state.lock_blocking();
        state.chars.get(&char_id).map(|ch| ch.value.clone())
    }

    pub fn descriptor_value(&self, char_id: Uuid, desc_id: Uuid) -> Option<Vec<u8>> {
        let state = self.inner.state.lock_blocking();
        state
            .chars
            .get(&char_id)?
            .descriptors
            .iter()
            .find(|(id, _)| *id == desc_id)
            .map(|(_, value)| value.clone())
    }
}

impl Peripheral for MockDevice {
    type Connection = MockConnection;

    fn id(&self) -> DeviceId {
        self.inner.id.clone()
    }

    fn connect(&self, auto_connect: bool) -> BoxFuture<'static, Result<MockConnection>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.delay().await;
            let mut state = inner.state.lock().await;
            if let Some(error) = state.connection_failure.take() {
                return Err(error);
            }
            let (lost_tx, lost_rx) = async_channel::bounded(1);
            state.next_link += 1;
            let id = state.next_link;
            state.link = Some(Link { id, lost: lost_tx });
            drop(state);
            debug!("{} connected (auto_connect: {auto_connect})", inner.id);
            Ok(MockConnection {
                device: inner,
                link: id,
                lost: lost_rx,
            })
        })
    }
}

/// A connection to a [MockDevice]; dropping it disconnects.
pub struct MockConnection {
    device: Arc<MockInner>,
    link: u64,
    lost: Receiver<Error>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let mut state = self.device.state.lock_blocking();
        if state.link.as_ref().is_some_and(|link| link.id == self.link) {
            state.link = None;
            debug!("{} disconnected", self.device.id);
        }
    }
}

impl MockConnection {
    fn setup_push(
        &self,
        characteristic: &Characteristic,
        mode: NotificationSetupMode,
        kind: NotificationType,
    ) -> BoxFuture<'static, Result<NotificationStream>> {
        let device = self.device.clone();
        let link = self.link;
        let char_id = characteristic.uuid();
        Box::pin(async move {
            device.delay().await;
            let notifier = device
                .notifiers
                .get(&char_id)
                .map(|notifiers| notifiers.get(kind))
                .ok_or_else(|| {
                    Error::new(ErrorKind::NotFound, format!("no characteristic {char_id}"))
                })?;
            let weak = Arc::downgrade(&device);
            let receiver = notifier
                .subscribe(
                    || device.start_push(link, char_id, kind, mode),
                    move || {
                        if let Some(device) = weak.upgrade() {
                            device.stop_push(char_id, kind, mode);
                        }
                    },
                )
                .await?;
            let values: NotificationStream = receiver.map(Ok).boxed();
            Ok::<_, Error>(values)
        })
    }
}

impl Connection for MockConnection {
    fn discover_characteristic(&self, uuid: Uuid) -> BoxFuture<'static, Result<Characteristic>> {
        let device = self.device.clone();
        let link = self.link;
        Box::pin(async move {
            device.delay().await;
            let state = device.state.lock().await;
            state.check(link)?;
            let ch = state.characteristic(uuid)?;
            Ok::<_, Error>(Characteristic::new(
                uuid,
                ch.properties,
                ch.descriptors.iter().map(|(id, _)| *id),
            ))
        })
    }

    fn read(&self, characteristic: &Characteristic) -> BoxFuture<'static, Result<Vec<u8>>> {
        let device = self.device.clone();
        let link = self.link;
        let char_id = characteristic.uuid();
        Box::pin(async move {
            device.delay().await;
            let state = device.state.lock().await;
            state.check(link)?;
            let ch = state.characteristic(char_id)?;
            match ch.read_error {
                Some(error) => Err(Error::from(error)),
                None => Ok(ch.value.clone()),
            }
        })
    }

    fn write(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>>> {
        let device = self.device.clone();
        let link = self.link;
        let char_id = characteristic.uuid();
        Box::pin(async move {
            device.delay().await;
            let mut state = device.state.lock().await;
            state.check(link)?;
            let ch = state.characteristic_mut(char_id)?;
            if let Some(error) = ch.write_error {
                return Err(Error::from(error));
            }
            ch.value = value.clone();
            Ok(value)
        })
    }

    fn setup_notification(
        &self,
        characteristic: &Characteristic,
        mode: NotificationSetupMode,
    ) -> BoxFuture<'static, Result<NotificationStream>> {
        self.setup_push(characteristic, mode, NotificationType::Notification)
    }

    fn setup_indication(
        &self,
        characteristic: &Characteristic,
        mode: NotificationSetupMode,
    ) -> BoxFuture<'static, Result<NotificationStream>> {
        self.setup_push(characteristic, mode, NotificationType::Indication)
    }

    fn disconnected(&self) -> BoxFuture<'static, Error> {
        let lost = self.lost.clone();
        Box::pin(async move {
            match lost.recv().await {
                Ok(error) => error,
                // closed from this side
                Err(_) => future::pending().await,
            }
        })
    }
}
