//! GATT [`Service`]s, [`Characteristic`]s and [`Descriptor`]s published by the peripheral.
//!
//! Nodes are built unexposed: [`Application::create_service`] allocates a path for a [`Service`],
//! and the service in turn allocates paths for its characteristics, which allocate paths for
//! their descriptors. Nothing is visible on the bus until the service is passed to
//! [`Application::add_service`], which exports the whole subtree at once.
//!
//! [`Application::create_service`]: crate::Application::create_service
//! [`Application::add_service`]: crate::Application::add_service

use std::collections::HashMap;

use zbus::{
    dbus_interface,
    zvariant::{ObjectPath, OwnedObjectPath, OwnedValue},
    DBusError, SignalContext,
};

use crate::{
    application::AppRef,
    bus::{Object, ObjectKind},
    error::CallbackErrorKind,
    properties::{
        CharacteristicFlags, CharacteristicProperties, DescriptorFlags, DescriptorProperties,
        InterfaceMap, PropertyTable, ServiceProperties, GATT_CHARACTERISTIC_INTERFACE,
        GATT_DESCRIPTOR_INTERFACE, GATT_SERVICE_INTERFACE,
    },
    uuid::Uuid,
    CallbackError, Error, Result,
};

/// Builds `<parent>/<segment><index>`. The root path contributes an empty prefix.
pub(crate) fn child_path(
    parent: &OwnedObjectPath,
    segment: &str,
    index: u32,
) -> Result<OwnedObjectPath> {
    let prefix = match parent.as_str() {
        "/" => "",
        other => other,
    };
    owned_path(format!("{}/{}{}", prefix, segment, index))
}

pub(crate) fn owned_path(path: String) -> Result<OwnedObjectPath> {
    ObjectPath::try_from(path)
        .map(OwnedObjectPath::from)
        .map_err(Error::from)
}

/// A GATT service under construction or published by an [`Application`].
///
/// Created by [`Application::create_service`].
///
/// [`Application`]: crate::Application
/// [`Application::create_service`]: crate::Application::create_service
#[derive(Debug, Clone)]
pub struct Service {
    path: OwnedObjectPath,
    properties: ServiceProperties,
    advertised: bool,
    characteristic_index: u32,
    characteristics: Vec<Characteristic>,
}

impl Service {
    pub(crate) fn new(
        path: OwnedObjectPath,
        properties: ServiceProperties,
        advertised: bool,
    ) -> Self {
        Self {
            path,
            properties,
            advertised,
            characteristic_index: 0,
            characteristics: Vec::new(),
        }
    }

    /// Returns the object path allocated for this service.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Returns the service [`Uuid`].
    pub fn uuid(&self) -> Uuid {
        self.properties.uuid
    }

    /// Returns whether this is a primary service.
    pub fn is_primary(&self) -> bool {
        self.properties.primary
    }

    /// Returns whether this service's [`Uuid`] is included in advertisements.
    pub fn is_advertised(&self) -> bool {
        self.advertised
    }

    /// Returns the interfaces and properties this service is published with.
    pub fn properties(&self) -> InterfaceMap {
        PropertyTable::new(GATT_SERVICE_INTERFACE)
            .with("UUID", self.properties.uuid.to_string())
            .with("Primary", self.properties.primary)
            .into_interfaces()
    }

    /// Allocates a path for a new [`Characteristic`] of this service.
    ///
    /// The characteristic is not part of the service until it is passed to
    /// [`Service::add_characteristic`]. Indices are never reused.
    pub fn create_characteristic(
        &mut self,
        properties: CharacteristicProperties,
    ) -> Result<Characteristic> {
        self.characteristic_index += 1;
        let path = child_path(&self.path, "char", self.characteristic_index)?;
        Ok(Characteristic {
            path,
            service: self.path.clone(),
            properties,
            descriptor_index: 0,
            descriptors: Vec::new(),
        })
    }

    /// Attaches a [`Characteristic`] created by [`Service::create_characteristic`].
    pub fn add_characteristic(&mut self, characteristic: Characteristic) -> Result<()> {
        if characteristic.service.as_str() != self.path.as_str() {
            return Err(Error::from(format!(
                "characteristic {} does not belong to service {}",
                characteristic.path.as_str(),
                self.path.as_str()
            )));
        }
        if self.characteristic(&characteristic.path).is_some() {
            return Err(Error::from(format!(
                "characteristic {} was already added",
                characteristic.path.as_str()
            )));
        }

        self.characteristics.push(characteristic);
        Ok(())
    }

    /// Returns the characteristics attached so far.
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    /// Looks up an attached characteristic by path.
    pub fn characteristic(&self, path: &ObjectPath<'_>) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.path.as_str() == path.as_str())
    }

    pub(crate) fn characteristic_mut(
        &mut self,
        path: &ObjectPath<'_>,
    ) -> Option<&mut Characteristic> {
        self.characteristics
            .iter_mut()
            .find(|c| c.path.as_str() == path.as_str())
    }

    /// Returns every node of this subtree, parents before their children.
    pub(crate) fn nodes(&self) -> Vec<Node<'_>> {
        let mut nodes = vec![Node::Service(self)];
        for characteristic in &self.characteristics {
            nodes.push(Node::Characteristic(self, characteristic));
            for descriptor in &characteristic.descriptors {
                nodes.push(Node::Descriptor(self, characteristic, descriptor));
            }
        }
        nodes
    }
}

/// A characteristic of a [`Service`].
///
/// Created by [`Service::create_characteristic`].
#[derive(Debug, Clone)]
pub struct Characteristic {
    path: OwnedObjectPath,
    service: OwnedObjectPath,
    properties: CharacteristicProperties,
    descriptor_index: u32,
    descriptors: Vec<Descriptor>,
}

impl Characteristic {
    /// Returns the object path allocated for this characteristic.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Returns the characteristic [`Uuid`].
    pub fn uuid(&self) -> Uuid {
        self.properties.uuid
    }

    /// Returns the operations this characteristic declares.
    pub fn flags(&self) -> CharacteristicFlags {
        self.properties.flags
    }

    /// Returns the cached value, as last set on this node.
    pub fn value(&self) -> &[u8] {
        &self.properties.value
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        self.properties.value = value;
    }

    /// Returns the interfaces and properties this characteristic is published with.
    pub fn properties(&self) -> InterfaceMap {
        PropertyTable::new(GATT_CHARACTERISTIC_INTERFACE)
            .with("UUID", self.properties.uuid.to_string())
            .with("Service", self.service.clone().into_inner())
            .with("Flags", self.properties.flags.to_strings())
            .with("Value", self.properties.value.clone())
            .into_interfaces()
    }

    /// Allocates a path for a new [`Descriptor`] of this characteristic.
    pub fn create_descriptor(&mut self, properties: DescriptorProperties) -> Result<Descriptor> {
        self.descriptor_index += 1;
        let path = child_path(&self.path, "desc", self.descriptor_index)?;
        Ok(Descriptor {
            path,
            characteristic: self.path.clone(),
            properties,
        })
    }

    /// Attaches a [`Descriptor`] created by [`Characteristic::create_descriptor`].
    pub fn add_descriptor(&mut self, descriptor: Descriptor) -> Result<()> {
        if descriptor.characteristic.as_str() != self.path.as_str() {
            return Err(Error::from(format!(
                "descriptor {} does not belong to characteristic {}",
                descriptor.path.as_str(),
                self.path.as_str()
            )));
        }
        if self
            .descriptors
            .iter()
            .any(|d| d.path.as_str() == descriptor.path.as_str())
        {
            return Err(Error::from(format!(
                "descriptor {} was already added",
                descriptor.path.as_str()
            )));
        }

        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Returns the descriptors attached so far.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }
}

/// A descriptor of a [`Characteristic`].
#[derive(Debug, Clone)]
pub struct Descriptor {
    path: OwnedObjectPath,
    characteristic: OwnedObjectPath,
    properties: DescriptorProperties,
}

impl Descriptor {
    /// Returns the object path allocated for this descriptor.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Returns the descriptor [`Uuid`].
    pub fn uuid(&self) -> Uuid {
        self.properties.uuid
    }

    /// Returns the operations this descriptor declares.
    pub fn flags(&self) -> DescriptorFlags {
        self.properties.flags
    }

    /// Returns the interfaces and properties this descriptor is published with.
    pub fn properties(&self) -> InterfaceMap {
        PropertyTable::new(GATT_DESCRIPTOR_INTERFACE)
            .with("UUID", self.properties.uuid.to_string())
            .with("Characteristic", self.characteristic.clone().into_inner())
            .with("Flags", self.properties.flags.to_strings())
            .with("Value", self.properties.value.clone())
            .into_interfaces()
    }
}

/// A borrowed node of a service subtree.
pub(crate) enum Node<'a> {
    Service(&'a Service),
    Characteristic(&'a Service, &'a Characteristic),
    Descriptor(&'a Service, &'a Characteristic, &'a Descriptor),
}

impl Node<'_> {
    pub(crate) fn path(&self) -> &OwnedObjectPath {
        match self {
            Node::Service(s) => &s.path,
            Node::Characteristic(_, c) => &c.path,
            Node::Descriptor(_, _, d) => &d.path,
        }
    }

    pub(crate) fn kind(&self) -> ObjectKind {
        match self {
            Node::Service(_) => ObjectKind::Service,
            Node::Characteristic(..) => ObjectKind::Characteristic,
            Node::Descriptor(..) => ObjectKind::Descriptor,
        }
    }

    pub(crate) fn properties(&self) -> InterfaceMap {
        match self {
            Node::Service(s) => s.properties(),
            Node::Characteristic(_, c) => c.properties(),
            Node::Descriptor(_, _, d) => d.properties(),
        }
    }

    /// Builds the bus object serving this node. Read/write calls are forwarded to `app`.
    pub(crate) fn export(&self, app: &AppRef) -> Object {
        match self {
            Node::Service(s) => Object::Service(ServiceObject {
                properties: s.properties,
            }),
            Node::Characteristic(s, c) => Object::Characteristic(CharacteristicObject {
                app: app.clone(),
                service_uuid: s.uuid(),
                service: s.path.clone(),
                properties: c.properties.clone(),
                notifying: false,
            }),
            Node::Descriptor(s, c, d) => Object::Descriptor(DescriptorObject {
                app: app.clone(),
                service_uuid: s.uuid(),
                characteristic_uuid: c.uuid(),
                characteristic: c.path.clone(),
                properties: d.properties.clone(),
            }),
        }
    }
}

/// Errors sent back to BlueZ when a read or write cannot be served.
#[derive(Debug, DBusError)]
#[dbus_error(prefix = "org.bluez.Error")]
pub enum GattError {
    #[dbus_error(zbus_error)]
    ZBus(zbus::Error),
    Failed(String),
    NotSupported(String),
}

impl From<CallbackError> for GattError {
    fn from(e: CallbackError) -> Self {
        match e.kind() {
            CallbackErrorKind::NotRegistered => Self::NotSupported(e.message().to_string()),
            CallbackErrorKind::FunctionError => Self::Failed(e.message().to_string()),
        }
    }
}

/// Checks that a characteristic can be subscribed to (notify or indicate).
fn check_notifiable(properties: &CharacteristicProperties) -> std::result::Result<(), GattError> {
    let notifiable = CharacteristicFlags::NOTIFY | CharacteristicFlags::INDICATE;
    if properties.flags.intersects(notifiable) {
        Ok(())
    } else {
        Err(GattError::NotSupported(format!(
            "characteristic {} does not support notifications",
            properties.uuid
        )))
    }
}

fn application_gone() -> GattError {
    GattError::Failed("application has shut down".to_string())
}

fn log_options(op: &str, uuid: Uuid, options: &HashMap<String, OwnedValue>) {
    log::trace!(
        "{} on {} with options {:?}",
        op,
        uuid,
        options.keys().collect::<Vec<_>>()
    );
}

/// Bus object serving `org.bluez.GattService1`.
pub struct ServiceObject {
    properties: ServiceProperties,
}

#[dbus_interface(name = "org.bluez.GattService1")]
impl ServiceObject {
    #[dbus_interface(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.properties.uuid.to_string()
    }

    #[dbus_interface(property)]
    fn primary(&self) -> bool {
        self.properties.primary
    }
}

/// Bus object serving `org.bluez.GattCharacteristic1`.
pub struct CharacteristicObject {
    app: AppRef,
    service_uuid: Uuid,
    service: OwnedObjectPath,
    properties: CharacteristicProperties,
    notifying: bool,
}

impl CharacteristicObject {
    pub(crate) fn set_cached_value(&mut self, value: Vec<u8>) {
        self.properties.value = value;
    }
}

#[dbus_interface(name = "org.bluez.GattCharacteristic1")]
impl CharacteristicObject {
    async fn read_value(
        &self,
        options: HashMap<String, OwnedValue>,
    ) -> std::result::Result<Vec<u8>, GattError> {
        log_options("ReadValue", self.properties.uuid, &options);
        let app = self.app.upgrade().ok_or_else(application_gone)?;
        Ok(app.handle_read(self.service_uuid, self.properties.uuid)?)
    }

    async fn write_value(
        &self,
        value: Vec<u8>,
        options: HashMap<String, OwnedValue>,
    ) -> std::result::Result<(), GattError> {
        log_options("WriteValue", self.properties.uuid, &options);
        let app = self.app.upgrade().ok_or_else(application_gone)?;
        Ok(app.handle_write(self.service_uuid, self.properties.uuid, &value)?)
    }

    async fn start_notify(
        &mut self,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> std::result::Result<(), GattError> {
        check_notifiable(&self.properties)?;
        if !self.notifying {
            self.notifying = true;
            self.notifying_changed(&ctxt).await.map_err(GattError::ZBus)?;
        }
        Ok(())
    }

    async fn stop_notify(
        &mut self,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> std::result::Result<(), GattError> {
        if self.notifying {
            self.notifying = false;
            self.notifying_changed(&ctxt).await.map_err(GattError::ZBus)?;
        }
        Ok(())
    }

    #[dbus_interface(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.properties.uuid.to_string()
    }

    #[dbus_interface(property)]
    fn service(&self) -> ObjectPath<'static> {
        self.service.clone().into_inner()
    }

    #[dbus_interface(property)]
    fn flags(&self) -> Vec<String> {
        self.properties.flags.to_strings()
    }

    #[dbus_interface(property)]
    fn value(&self) -> Vec<u8> {
        self.properties.value.clone()
    }

    #[dbus_interface(property)]
    fn notifying(&self) -> bool {
        self.notifying
    }
}

/// Bus object serving `org.bluez.GattDescriptor1`.
pub struct DescriptorObject {
    app: AppRef,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    characteristic: OwnedObjectPath,
    properties: DescriptorProperties,
}

#[dbus_interface(name = "org.bluez.GattDescriptor1")]
impl DescriptorObject {
    async fn read_value(
        &self,
        options: HashMap<String, OwnedValue>,
    ) -> std::result::Result<Vec<u8>, GattError> {
        log_options("ReadValue", self.properties.uuid, &options);
        let app = self.app.upgrade().ok_or_else(application_gone)?;
        Ok(app.handle_descriptor_read(
            self.service_uuid,
            self.characteristic_uuid,
            self.properties.uuid,
        )?)
    }

    async fn write_value(
        &self,
        value: Vec<u8>,
        options: HashMap<String, OwnedValue>,
    ) -> std::result::Result<(), GattError> {
        log_options("WriteValue", self.properties.uuid, &options);
        let app = self.app.upgrade().ok_or_else(application_gone)?;
        Ok(app.handle_descriptor_write(
            self.service_uuid,
            self.characteristic_uuid,
            self.properties.uuid,
            &value,
        )?)
    }

    #[dbus_interface(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.properties.uuid.to_string()
    }

    #[dbus_interface(property)]
    fn characteristic(&self) -> ObjectPath<'static> {
        self.characteristic.clone().into_inner()
    }

    #[dbus_interface(property)]
    fn flags(&self) -> Vec<String> {
        self.properties.flags.to_strings()
    }

    #[dbus_interface(property)]
    fn value(&self) -> Vec<u8> {
        self.properties.value.clone()
    }
}
