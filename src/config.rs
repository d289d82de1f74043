//! [`ApplicationConfig`], the construction-time settings of an [`Application`].
//!
//! [`Application`]: crate::Application

use std::fmt;

use zbus::zvariant::OwnedObjectPath;

use crate::{error::BoxError, gatt::owned_path, uuid::Uuid, Application, Error, Result};

/// The fixed tail of 128-bit UUIDs derived from the Bluetooth base UUID.
pub const UUID_SUFFIX: &str = "-0000-1000-8000-00805F9B34FB";

/// Called when BlueZ reads a characteristic: `(app, service_uuid, characteristic_uuid)`.
pub type ReadCallback =
    Box<dyn Fn(&Application, Uuid, Uuid) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync>;

/// Called when BlueZ writes a characteristic: `(app, service_uuid, characteristic_uuid, value)`.
pub type WriteCallback =
    Box<dyn Fn(&Application, Uuid, Uuid, &[u8]) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Called when BlueZ reads a descriptor:
/// `(app, service_uuid, characteristic_uuid, descriptor_uuid)`.
pub type DescriptorReadCallback = Box<
    dyn Fn(&Application, Uuid, Uuid, Uuid) -> std::result::Result<Vec<u8>, BoxError>
        + Send
        + Sync,
>;

/// Called when BlueZ writes a descriptor:
/// `(app, service_uuid, characteristic_uuid, descriptor_uuid, value)`.
pub type DescriptorWriteCallback = Box<
    dyn Fn(&Application, Uuid, Uuid, Uuid, &[u8]) -> std::result::Result<(), BoxError>
        + Send
        + Sync,
>;

/// Settings of an [`Application`].
///
/// The bus name and root object path are required. Callbacks are optional; read and write calls
/// for which no callback is configured fail with
/// [`CallbackError::CALLBACK_NOT_REGISTERED`][crate::CallbackError::CALLBACK_NOT_REGISTERED].
///
/// ```no_run
/// # use blues_peripheral::ApplicationConfig;
/// let config = ApplicationConfig::new("org.example.pulse", "/org/example/pulse")
///     .local_name("pulse")
///     .on_read(|_app, _service, _characteristic| Ok(vec![0x00, 72]));
/// ```
pub struct ApplicationConfig {
    pub(crate) object_name: String,
    pub(crate) object_path: String,
    pub(crate) uuid_base: String,
    pub(crate) uuid_suffix: String,
    pub(crate) local_name: String,
    pub(crate) read: Option<ReadCallback>,
    pub(crate) write: Option<WriteCallback>,
    pub(crate) descriptor_read: Option<DescriptorReadCallback>,
    pub(crate) descriptor_write: Option<DescriptorWriteCallback>,
}

impl ApplicationConfig {
    /// Creates a configuration claiming the bus name `object_name` and rooting the object tree at
    /// `object_path`.
    pub fn new(object_name: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            object_path: object_path.into(),
            uuid_base: "0000".to_string(),
            uuid_suffix: UUID_SUFFIX.to_string(),
            local_name: String::new(),
            read: None,
            write: None,
            descriptor_read: None,
            descriptor_write: None,
        }
    }

    /// Sets the prefix [`Application::generate_uuid`] puts in front of short values.
    pub fn uuid_base(mut self, base: impl Into<String>) -> Self {
        self.uuid_base = base.into();
        self
    }

    /// Overrides the suffix [`Application::generate_uuid`] appends (defaults to [`UUID_SUFFIX`]).
    pub fn uuid_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.uuid_suffix = suffix.into();
        self
    }

    /// Sets the name included in advertisements.
    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    /// Sets the callback answering characteristic reads.
    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&Application, Uuid, Uuid) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.read = Some(Box::new(f));
        self
    }

    /// Sets the callback receiving characteristic writes.
    pub fn on_write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Application, Uuid, Uuid, &[u8]) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.write = Some(Box::new(f));
        self
    }

    /// Sets the callback answering descriptor reads.
    pub fn on_descriptor_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&Application, Uuid, Uuid, Uuid) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.descriptor_read = Some(Box::new(f));
        self
    }

    /// Sets the callback receiving descriptor writes.
    pub fn on_descriptor_write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Application, Uuid, Uuid, Uuid, &[u8]) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.descriptor_write = Some(Box::new(f));
        self
    }

    /// Returns the bus name the application will claim.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Checks the required settings and returns the parsed root path.
    pub(crate) fn validate(&self) -> Result<OwnedObjectPath> {
        if self.object_name.is_empty() {
            return Err(Error::from("objectName is required"));
        }
        if self.object_path.is_empty() {
            return Err(Error::from("objectPath is required"));
        }
        owned_path(self.object_path.clone())
    }
}

impl fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("object_name", &self.object_name)
            .field("object_path", &self.object_path)
            .field("uuid_base", &self.uuid_base)
            .field("local_name", &self.local_name)
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("descriptor_read", &self.descriptor_read.is_some())
            .field("descriptor_write", &self.descriptor_write.is_some())
            .finish()
    }
}
