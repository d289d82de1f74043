//! LE [`Advertisement`]s registered with BlueZ's advertising manager.

use std::collections::HashMap;

use zbus::{
    dbus_interface, dbus_proxy,
    zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value},
};

use crate::{
    properties::{InterfaceMap, PropertyTable, LE_ADVERTISEMENT_INTERFACE},
    uuid::Uuid,
};

/// Path the application's advertisement is exported at.
pub(crate) const ADVERTISEMENT_PATH: &str = "/org/bluez/advertisement/0";

/// Prefix of the BlueZ object path of a local adapter (eg. `/org/bluez/hci0`).
pub(crate) const DEVICE_PATH_PREFIX: &str = "/org/bluez/";

/// Advertised interval in seconds.
pub(crate) const DEFAULT_DURATION: u16 = 2;

/// Lifetime of the advertisement in seconds.
pub(crate) const DEFAULT_TIMEOUT: u16 = 60;

#[dbus_proxy(
    interface = "org.bluez.LEAdvertisingManager1",
    default_service = "org.bluez",
    assume_defaults = false
)]
pub(crate) trait LEAdvertisingManager {
    fn register_advertisement(
        &self,
        advertisement: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    fn unregister_advertisement(&self, advertisement: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// The kind of advertising packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertisementType {
    Broadcast,
    #[default]
    Peripheral,
}

impl AdvertisementType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Peripheral => "peripheral",
        }
    }
}

/// Properties of an `org.bluez.LEAdvertisement1` object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvertisementProperties {
    pub ty: AdvertisementType,
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer-specific data, keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub solicit_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub includes: Vec<String>,
    pub local_name: String,
    pub appearance: u16,
    pub duration: u16,
    pub timeout: u16,
}

impl AdvertisementProperties {
    fn manufacturer_data_dict(&self) -> HashMap<u16, OwnedValue> {
        self.manufacturer_data
            .iter()
            .map(|(id, data)| (*id, OwnedValue::from(Value::from(data.clone()))))
            .collect()
    }

    fn service_data_dict(&self) -> HashMap<String, OwnedValue> {
        self.service_data
            .iter()
            .map(|(uuid, data)| {
                let data = OwnedValue::from(Value::from(data.clone()));
                (uuid.to_string(), data)
            })
            .collect()
    }

    fn table(&self) -> PropertyTable {
        PropertyTable::new(LE_ADVERTISEMENT_INTERFACE)
            .with("Type", self.ty.as_str())
            .with("ServiceUUIDs", uuid_strings(&self.service_uuids))
            .with("ManufacturerData", self.manufacturer_data_dict())
            .with("SolicitUUIDs", uuid_strings(&self.solicit_uuids))
            .with("ServiceData", self.service_data_dict())
            .with("Includes", self.includes.clone())
            .with("LocalName", self.local_name.clone())
            .with("Appearance", self.appearance)
            .with("Duration", self.duration)
            .with("Timeout", self.timeout)
    }
}

fn uuid_strings(uuids: &[Uuid]) -> Vec<String> {
    uuids.iter().map(Uuid::to_string).collect()
}

/// An advertisement object, exported on the bus while advertising.
///
/// The [`Application`][crate::Application] owns the only instance and registers it with BlueZ
/// in [`start_advertising`][crate::Application::start_advertising].
pub struct Advertisement {
    path: OwnedObjectPath,
    properties: AdvertisementProperties,
}

impl Advertisement {
    pub(crate) fn new(path: OwnedObjectPath, properties: AdvertisementProperties) -> Self {
        Self { path, properties }
    }

    /// Returns the path the advertisement is exported at.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Returns the advertised data.
    pub fn data(&self) -> &AdvertisementProperties {
        &self.properties
    }

    /// Returns the interfaces and properties of this advertisement.
    ///
    /// This is always a single `org.bluez.LEAdvertisement1` entry.
    pub fn properties(&self) -> InterfaceMap {
        self.properties.table().into_interfaces()
    }
}

#[dbus_interface(name = "org.bluez.LEAdvertisement1")]
impl Advertisement {
    /// Called by BlueZ when it drops the advertisement. There is no local state to release.
    fn release(&self) {
        log::debug!("advertisement {} released by BlueZ", self.path.as_str());
    }

    #[dbus_interface(property, name = "Type")]
    fn ty(&self) -> String {
        self.properties.ty.as_str().to_string()
    }

    #[dbus_interface(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> Vec<String> {
        uuid_strings(&self.properties.service_uuids)
    }

    #[dbus_interface(property)]
    fn manufacturer_data(&self) -> HashMap<u16, OwnedValue> {
        self.properties.manufacturer_data_dict()
    }

    #[dbus_interface(property, name = "SolicitUUIDs")]
    fn solicit_uuids(&self) -> Vec<String> {
        uuid_strings(&self.properties.solicit_uuids)
    }

    #[dbus_interface(property)]
    fn service_data(&self) -> HashMap<String, OwnedValue> {
        self.properties.service_data_dict()
    }

    #[dbus_interface(property)]
    fn includes(&self) -> Vec<String> {
        self.properties.includes.clone()
    }

    #[dbus_interface(property)]
    fn local_name(&self) -> String {
        self.properties.local_name.clone()
    }

    #[dbus_interface(property)]
    fn appearance(&self) -> u16 {
        self.properties.appearance
    }

    #[dbus_interface(property)]
    fn duration(&self) -> u16 {
        self.properties.duration
    }

    #[dbus_interface(property)]
    fn timeout(&self) -> u16 {
        self.properties.timeout
    }
}
