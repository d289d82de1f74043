//! Typed D-Bus property bags.
//!
//! Every exported object declares exactly one BlueZ interface. Its properties are described by a
//! typed struct (eg. [`ServiceProperties`]) and turned into the `a{sv}` wire map by a
//! [`PropertyTable`], which is what ends up in the object manager's `GetManagedObjects` reply.

use std::collections::HashMap;

use zbus::zvariant::{OwnedValue, Value};

use crate::uuid::Uuid;

/// Property name → value, the `a{sv}` map of a single interface.
pub type PropertyMap = HashMap<String, OwnedValue>;

/// Interface name → properties, the `a{sa{sv}}` map describing one object.
pub type InterfaceMap = HashMap<String, PropertyMap>;

pub const GATT_SERVICE_INTERFACE: &str = "org.bluez.GattService1";
pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const GATT_DESCRIPTOR_INTERFACE: &str = "org.bluez.GattDescriptor1";
pub const LE_ADVERTISEMENT_INTERFACE: &str = "org.bluez.LEAdvertisement1";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

/// The properties of one interface of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyTable {
    interface: &'static str,
    entries: PropertyMap,
}

impl PropertyTable {
    pub fn new(interface: &'static str) -> Self {
        Self {
            interface,
            entries: PropertyMap::new(),
        }
    }

    /// Adds a property, builder-style.
    pub fn with<'a>(mut self, name: &str, value: impl Into<Value<'a>>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a property, returning `true` if its value changed.
    pub fn set<'a>(&mut self, name: &str, value: impl Into<Value<'a>>) -> bool {
        let value: Value<'a> = value.into();
        let value = OwnedValue::from(value);
        match self.entries.insert(name.to_string(), value.clone()) {
            Some(old) => old != value,
            None => true,
        }
    }

    pub fn get(&self, name: &str) -> Option<&OwnedValue> {
        self.entries.get(name)
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub fn into_map(self) -> PropertyMap {
        self.entries
    }

    /// Wraps this table into the single-interface [`InterfaceMap`] of its object.
    pub fn into_interfaces(self) -> InterfaceMap {
        let mut interfaces = InterfaceMap::new();
        interfaces.insert(self.interface.to_string(), self.entries);
        interfaces
    }
}

/// Properties of a GATT service (`org.bluez.GattService1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProperties {
    pub uuid: Uuid,
    /// Whether this is a primary service. If `false`, the service is secondary.
    pub primary: bool,
}

impl ServiceProperties {
    /// Properties of a primary service with the given [`Uuid`].
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
        }
    }
}

/// Properties of a GATT characteristic (`org.bluez.GattCharacteristic1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub uuid: Uuid,
    pub flags: CharacteristicFlags,
    /// Cached value reported by the `Value` property. Reads are still answered by the read
    /// callback.
    pub value: Vec<u8>,
}

impl CharacteristicProperties {
    pub fn new(uuid: Uuid, flags: CharacteristicFlags) -> Self {
        Self {
            uuid,
            flags,
            value: Vec::new(),
        }
    }
}

/// Properties of a GATT descriptor (`org.bluez.GattDescriptor1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorProperties {
    pub uuid: Uuid,
    pub flags: DescriptorFlags,
    pub value: Vec<u8>,
}

impl DescriptorProperties {
    pub fn new(uuid: Uuid, flags: DescriptorFlags) -> Self {
        Self {
            uuid,
            flags,
            value: Vec::new(),
        }
    }
}

bitflags::bitflags! {
    /// Operations supported by a characteristic, as declared to BlueZ.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicFlags: u32 {
        const BROADCAST = 1 << 0;
        const READ = 1 << 1;
        const WRITE_WITHOUT_RESPONSE = 1 << 2;
        const WRITE = 1 << 3;
        const NOTIFY = 1 << 4;
        const INDICATE = 1 << 5;
        const AUTHENTICATED_SIGNED_WRITES = 1 << 6;
        const EXTENDED_PROPERTIES = 1 << 7;
        const RELIABLE_WRITE = 1 << 8;
        const WRITABLE_AUXILIARIES = 1 << 9;
        const ENCRYPT_READ = 1 << 10;
        const ENCRYPT_WRITE = 1 << 11;
        const ENCRYPT_AUTHENTICATED_READ = 1 << 12;
        const ENCRYPT_AUTHENTICATED_WRITE = 1 << 13;
        const SECURE_READ = 1 << 14;
        const SECURE_WRITE = 1 << 15;
        const AUTHORIZE = 1 << 16;
    }
}

bitflags::bitflags! {
    /// Operations supported by a descriptor, as declared to BlueZ.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorFlags: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const ENCRYPT_READ = 1 << 2;
        const ENCRYPT_WRITE = 1 << 3;
        const ENCRYPT_AUTHENTICATED_READ = 1 << 4;
        const ENCRYPT_AUTHENTICATED_WRITE = 1 << 5;
        const SECURE_READ = 1 << 6;
        const SECURE_WRITE = 1 << 7;
        const AUTHORIZE = 1 << 8;
    }
}

const CHARACTERISTIC_FLAG_NAMES: &[(CharacteristicFlags, &str)] = &[
    (CharacteristicFlags::BROADCAST, "broadcast"),
    (CharacteristicFlags::READ, "read"),
    (CharacteristicFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
    (CharacteristicFlags::WRITE, "write"),
    (CharacteristicFlags::NOTIFY, "notify"),
    (CharacteristicFlags::INDICATE, "indicate"),
    (CharacteristicFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
    (CharacteristicFlags::EXTENDED_PROPERTIES, "extended-properties"),
    (CharacteristicFlags::RELIABLE_WRITE, "reliable-write"),
    (CharacteristicFlags::WRITABLE_AUXILIARIES, "writable-auxiliaries"),
    (CharacteristicFlags::ENCRYPT_READ, "encrypt-read"),
    (CharacteristicFlags::ENCRYPT_WRITE, "encrypt-write"),
    (CharacteristicFlags::ENCRYPT_AUTHENTICATED_READ, "encrypt-authenticated-read"),
    (CharacteristicFlags::ENCRYPT_AUTHENTICATED_WRITE, "encrypt-authenticated-write"),
    (CharacteristicFlags::SECURE_READ, "secure-read"),
    (CharacteristicFlags::SECURE_WRITE, "secure-write"),
    (CharacteristicFlags::AUTHORIZE, "authorize"),
];

const DESCRIPTOR_FLAG_NAMES: &[(DescriptorFlags, &str)] = &[
    (DescriptorFlags::READ, "read"),
    (DescriptorFlags::WRITE, "write"),
    (DescriptorFlags::ENCRYPT_READ, "encrypt-read"),
    (DescriptorFlags::ENCRYPT_WRITE, "encrypt-write"),
    (DescriptorFlags::ENCRYPT_AUTHENTICATED_READ, "encrypt-authenticated-read"),
    (DescriptorFlags::ENCRYPT_AUTHENTICATED_WRITE, "encrypt-authenticated-write"),
    (DescriptorFlags::SECURE_READ, "secure-read"),
    (DescriptorFlags::SECURE_WRITE, "secure-write"),
    (DescriptorFlags::AUTHORIZE, "authorize"),
];

impl CharacteristicFlags {
    /// Returns the flag strings BlueZ expects in the `Flags` property.
    pub fn to_strings(self) -> Vec<String> {
        CHARACTERISTIC_FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

impl DescriptorFlags {
    /// Returns the flag strings BlueZ expects in the `Flags` property.
    pub fn to_strings(self) -> Vec<String> {
        DESCRIPTOR_FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect()
    }
}
