use std::sync::Arc;

use uuid::Uuid;

use super::btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION;
use super::{CharacteristicProperties, NotificationSetupMode};

/// A discovered Bluetooth GATT characteristic.
///
/// The capability set is fixed once discovered; handles are cheap to clone and
/// may be read from any branch of a connect cycle.
#[derive(Debug, Clone)]
pub struct Characteristic {
    char_id: Uuid,
    properties: CharacteristicProperties,
    descs: Arc<[Uuid]>,
}

impl PartialEq for Characteristic {
    fn eq(&self, other: &Self) -> bool {
        self.char_id == other.char_id
    }
}

impl Eq for Characteristic {}

impl std::hash::Hash for Characteristic {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.char_id.hash(state);
    }
}

impl Characteristic {
    /// Creates the handle from the attributes reported by service discovery.
    pub fn new(
        char_id: Uuid,
        properties: CharacteristicProperties,
        descriptors: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            char_id,
            properties,
            descs: descriptors.into_iter().collect(),
        }
    }

    /// The [Uuid] identifying the type of this GATT characteristic.
    pub fn uuid(&self) -> Uuid {
        self.char_id
    }

    /// The properties of this this GATT characteristic.
    ///
    /// Characteristic properties indicate which operations (e.g. read, write, notify, etc)
    /// may be performed on this characteristic.
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// UUIDs of the descriptors found under this characteristic.
    pub fn descriptors(&self) -> &[Uuid] {
        &self.descs
    }

    /// Checks for a descriptor with the given [Uuid].
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descs.contains(&uuid)
    }

    /// Compat mode is needed when the Client Characteristic Configuration
    /// descriptor is missing.
    pub fn notification_setup_mode(&self) -> NotificationSetupMode {
        if self.has_descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION) {
            NotificationSetupMode::Default
        } else {
            NotificationSetupMode::Compat
        }
    }

    /// Whether notify/indicate setup on this characteristic falls back to compat mode.
    ///
    /// Always `false` for characteristics that support neither notifications nor indications.
    pub fn is_compat(&self) -> bool {
        self.properties.can_push()
            && self.notification_setup_mode() == NotificationSetupMode::Compat
    }
}
