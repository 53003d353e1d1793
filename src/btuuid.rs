//! Bluetooth base UUID helpers and well-known attribute UUIDs.

use uuid::Uuid;

/// The Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Creates a [Uuid] from a 16-bit Bluetooth UUID.
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Creates a [Uuid] from a 32-bit Bluetooth UUID.
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Extension trait for [Uuid] with helper methods for dealing with Bluetooth 16-bit and 32-bit UUIDs.
pub trait BluetoothUuidExt: private::Sealed {
    /// Creates a [Uuid] from a 16-bit Bluetooth UUID.
    fn from_u16(uuid: u16) -> Self;

    /// Creates a [Uuid] from a 32-bit Bluetooth UUID.
    fn from_u32(uuid: u32) -> Self;

    /// Returns the 16-bit short form if this is derived from the Bluetooth base UUID.
    fn try_to_u16(&self) -> Option<u16>;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn try_to_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        if value & ((1 << 96) - 1) == BLUETOOTH_BASE_UUID && value >> 112 == 0 {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for uuid::Uuid {}
}

/// Well-known descriptor UUIDs.
pub mod descriptors {
    use super::bluetooth_uuid_from_u16;
    use uuid::Uuid;

    /// Client Characteristic Configuration (0x2902).
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2902);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cccd_matches_the_long_form() {
        assert_eq!(
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
            Uuid::parse_str("00002902-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION.try_to_u16(),
            Some(0x2902)
        );
        assert_eq!(Uuid::from_u16(0x2a29).try_to_u16(), Some(0x2a29));
        assert_eq!(Uuid::from_u32(0x0001_2a29).try_to_u16(), None);
        assert_eq!(Uuid::nil().try_to_u16(), None);
    }
}
