use std::fmt;

/// Identifies a remote device, usually by its Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// Characteristic properties indicate which operations may be performed on a characteristic.
///
/// See the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    pub const BROADCAST: u32 = 0x01;
    pub const READ: u32 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u32 = 0x04;
    pub const WRITE: u32 = 0x08;
    pub const NOTIFY: u32 = 0x10;
    pub const INDICATE: u32 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u32 = 0x40;
    pub const EXTENDED_PROPERTIES: u32 = 0x80;

    /// Decodes the GATT property bitmask. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        CharacteristicProperties {
            broadcast: bits & Self::BROADCAST != 0,
            read: bits & Self::READ != 0,
            write_without_response: bits & Self::WRITE_WITHOUT_RESPONSE != 0,
            write: bits & Self::WRITE != 0,
            notify: bits & Self::NOTIFY != 0,
            indicate: bits & Self::INDICATE != 0,
            authenticated_signed_writes: bits & Self::AUTHENTICATED_SIGNED_WRITES != 0,
            extended_properties: bits & Self::EXTENDED_PROPERTIES != 0,
        }
    }

    /// Encodes the properties back into the GATT bitmask.
    pub fn to_bits(self) -> u32 {
        [
            (self.broadcast, Self::BROADCAST),
            (self.read, Self::READ),
            (self.write_without_response, Self::WRITE_WITHOUT_RESPONSE),
            (self.write, Self::WRITE),
            (self.notify, Self::NOTIFY),
            (self.indicate, Self::INDICATE),
            (self.authenticated_signed_writes, Self::AUTHENTICATED_SIGNED_WRITES),
            (self.extended_properties, Self::EXTENDED_PROPERTIES),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    /// Whether values can be pushed by the device, either as notifications or indications.
    pub fn can_push(&self) -> bool {
        self.notify || self.indicate
    }

    /// Checks the capability needed by the given kind of value push.
    pub fn supports(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::Notification => self.notify,
            NotificationType::Indication => self.indicate,
        }
    }
}

/// How notifications or indications are enabled on the remote side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NotificationSetupMode {
    /// Writes the Client Characteristic Configuration descriptor on setup and teardown.
    #[default]
    Default,
    /// Only enables the local callback; used when the characteristic lacks the
    /// Client Characteristic Configuration descriptor.
    Compat,
}

/// The two mutually exclusive mechanisms for values pushed by the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NotificationType {
    #[default]
    Notification,
    Indication,
}

impl NotificationType {
    /// The other kind of value push.
    pub fn rival(self) -> Self {
        match self {
            NotificationType::Notification => NotificationType::Indication,
            NotificationType::Indication => NotificationType::Notification,
        }
    }
}

/// The kind of characteristic operation an event result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationKind {
    Read,
    Write,
    Notify,
    Indicate,
}

impl From<NotificationType> for OperationKind {
    fn from(kind: NotificationType) -> Self {
        match kind {
            NotificationType::Notification => OperationKind::Notify,
            NotificationType::Indication => OperationKind::Indicate,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Read => "READ",
            OperationKind::Write => "WRITE",
            OperationKind::Notify => "NOTIFY",
            OperationKind::Indicate => "INDICATE",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_from_gatt_bitmask() {
        let props = CharacteristicProperties::from_bits(0x02 | 0x10 | 0x100);
        assert!(props.read);
        assert!(props.notify);
        assert!(!props.write);
        assert!(!props.indicate);
        assert!(props.can_push());
        assert_eq!(props.to_bits(), 0x12);
    }

    #[test]
    fn rival_flips() {
        assert_eq!(
            NotificationType::Notification.rival(),
            NotificationType::Indication
        );
        assert_eq!(
            OperationKind::from(NotificationType::Indication),
            OperationKind::Indicate
        );
    }
}
