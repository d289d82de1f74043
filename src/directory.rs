//! The [`ObjectDirectory`], answering BlueZ's `GetManagedObjects` query.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use zbus::{
    dbus_interface,
    zvariant::{OwnedObjectPath, OwnedValue, Value},
    SignalContext,
};

use crate::properties::InterfaceMap;

/// Object path → interfaces → properties, the `a{oa{sa{sv}}}` reply of `GetManagedObjects`.
pub type ManagedObjects = HashMap<OwnedObjectPath, InterfaceMap>;

/// A cloneable handle to the snapshot of every object an [`Application`] has published.
///
/// The directory holds one entry per exported GATT node. The [`Application`] keeps it in sync with
/// the bus exports; the [`ObjectManager`] object serves it to BlueZ.
///
/// [`Application`]: crate::Application
#[derive(Clone, Default)]
pub struct ObjectDirectory {
    objects: Arc<Mutex<ManagedObjects>>,
}

impl ObjectDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, ManagedObjects> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces the entry for `path`.
    ///
    /// Returns `false` if an entry for `path` was already present (it is replaced).
    pub fn add_object(&self, path: OwnedObjectPath, interfaces: InterfaceMap) -> bool {
        self.objects().insert(path, interfaces).is_none()
    }

    /// Removes the entry for `path`, returning its interfaces.
    pub fn remove_object(&self, path: &OwnedObjectPath) -> Option<InterfaceMap> {
        self.objects().remove(path)
    }

    /// Updates a single property of an existing entry.
    ///
    /// Returns `false` if there is no such object or interface.
    pub fn set_property<'a>(
        &self,
        path: &OwnedObjectPath,
        interface: &str,
        name: &str,
        value: impl Into<Value<'a>>,
    ) -> bool {
        let mut objects = self.objects();
        let Some(props) = objects
            .get_mut(path)
            .and_then(|intfs| intfs.get_mut(interface))
        else {
            return false;
        };
        let value: Value<'a> = value.into();
        props.insert(name.to_string(), OwnedValue::from(value));
        true
    }

    /// Returns a copy of the entry for `path`.
    pub fn get(&self, path: &OwnedObjectPath) -> Option<InterfaceMap> {
        self.objects().get(path).cloned()
    }

    /// Returns whether an entry for `path` exists.
    pub fn contains(&self, path: &OwnedObjectPath) -> bool {
        self.objects().contains_key(path)
    }

    /// Returns the number of objects in the directory.
    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Returns a copy of the full directory.
    pub fn snapshot(&self) -> ManagedObjects {
        self.objects().clone()
    }
}

/// Bus object serving `org.freedesktop.DBus.ObjectManager` from an [`ObjectDirectory`].
///
/// Exported once, at the application's root path.
pub struct ObjectManager {
    directory: ObjectDirectory,
}

impl ObjectManager {
    pub fn new(directory: ObjectDirectory) -> Self {
        Self { directory }
    }
}

#[dbus_interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ObjectManager {
    fn get_managed_objects(&self) -> ManagedObjects {
        let objects = self.directory.snapshot();
        log::debug!("GetManagedObjects: {} objects", objects.len());
        objects
    }

    #[dbus_interface(signal)]
    pub async fn interfaces_added(
        ctxt: &SignalContext<'_>,
        object_path: &OwnedObjectPath,
        interfaces_and_properties: &InterfaceMap,
    ) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    pub async fn interfaces_removed(
        ctxt: &SignalContext<'_>,
        object_path: &OwnedObjectPath,
        interfaces: &[String],
    ) -> zbus::Result<()>;
}
