//! The D-Bus operations an [`Application`] relies on.
//!
//! [`Session`] implements [`Bus`] on top of a zbus connection. The trait exists so that the tree
//! logic can be driven without a running system bus.
//!
//! [`Application`]: crate::Application

use std::collections::HashMap;

use futures_util::{future::BoxFuture, FutureExt};
use zbus::{
    fdo::{RequestNameFlags, RequestNameReply},
    zvariant::OwnedObjectPath,
    SignalContext,
};

use crate::{
    advertisement::{Advertisement, LEAdvertisingManagerProxy},
    directory::ObjectManager,
    gatt::{CharacteristicObject, DescriptorObject, ServiceObject},
    introspect::Introspection,
    properties::{
        InterfaceMap, GATT_CHARACTERISTIC_INTERFACE, GATT_DESCRIPTOR_INTERFACE,
        GATT_SERVICE_INTERFACE, LE_ADVERTISEMENT_INTERFACE, OBJECT_MANAGER_INTERFACE,
    },
    Error, Result, Session,
};

/// An object that can be exported on the bus.
pub enum Object {
    ObjectManager(ObjectManager),
    Service(ServiceObject),
    Characteristic(CharacteristicObject),
    Descriptor(DescriptorObject),
    Advertisement(Advertisement),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::ObjectManager(_) => ObjectKind::ObjectManager,
            Object::Service(_) => ObjectKind::Service,
            Object::Characteristic(_) => ObjectKind::Characteristic,
            Object::Descriptor(_) => ObjectKind::Descriptor,
            Object::Advertisement(_) => ObjectKind::Advertisement,
        }
    }
}

/// Identifies the interface an exported [`Object`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ObjectManager,
    Service,
    Characteristic,
    Descriptor,
    Advertisement,
}

impl ObjectKind {
    pub fn interface(self) -> &'static str {
        match self {
            ObjectKind::ObjectManager => OBJECT_MANAGER_INTERFACE,
            ObjectKind::Service => GATT_SERVICE_INTERFACE,
            ObjectKind::Characteristic => GATT_CHARACTERISTIC_INTERFACE,
            ObjectKind::Descriptor => GATT_DESCRIPTOR_INTERFACE,
            ObjectKind::Advertisement => LE_ADVERTISEMENT_INTERFACE,
        }
    }
}

/// Bus operations used to publish an application and talk to BlueZ.
///
/// Every call completes once the bus (or the daemon) has answered. None of them retry.
pub trait Bus: Send + Sync + 'static {
    /// Claims `name`, replacing an existing owner and without queueing.
    fn request_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Exports `object` at `path`. Fails if the path already serves that interface.
    fn export<'a>(&'a self, path: &'a OwnedObjectPath, object: Object)
        -> BoxFuture<'a, Result<()>>;

    /// Withdraws the object of the given kind at `path`.
    fn unexport<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        kind: ObjectKind,
    ) -> BoxFuture<'a, Result<()>>;

    /// Publishes the introspection description of the tree rooted at `path`.
    fn publish_introspection<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        tree: &'a Introspection,
    ) -> BoxFuture<'a, Result<()>>;

    /// Emits `InterfacesAdded` from the object manager at `manager`.
    fn interfaces_added<'a>(
        &'a self,
        manager: &'a OwnedObjectPath,
        path: &'a OwnedObjectPath,
        interfaces: &'a InterfaceMap,
    ) -> BoxFuture<'a, Result<()>>;

    /// Emits `InterfacesRemoved` from the object manager at `manager`.
    fn interfaces_removed<'a>(
        &'a self,
        manager: &'a OwnedObjectPath,
        path: &'a OwnedObjectPath,
        interfaces: &'a [String],
    ) -> BoxFuture<'a, Result<()>>;

    /// Replaces the `Value` of the exported characteristic at `path` and signals the change.
    fn update_value<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<()>>;

    /// Calls `RegisterAdvertisement` on the advertising manager at `device`.
    fn register_advertisement<'a>(
        &'a self,
        device: &'a OwnedObjectPath,
        advertisement: &'a OwnedObjectPath,
    ) -> BoxFuture<'a, Result<()>>;

    /// Calls `UnregisterAdvertisement` on the advertising manager at `device`.
    fn unregister_advertisement<'a>(
        &'a self,
        device: &'a OwnedObjectPath,
        advertisement: &'a OwnedObjectPath,
    ) -> BoxFuture<'a, Result<()>>;
}

impl Bus for Session {
    fn request_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let flags = RequestNameFlags::ReplaceExisting | RequestNameFlags::DoNotQueue;
            let reply = self
                .conn
                .request_name_with_flags(name, flags)
                .await
                .map_err(Error::from)?;
            match reply {
                RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {
                    log::info!("acquired bus name {}", name);
                    Ok(())
                }
                _ => Err(Error::from(format!(
                    "bus name {} is owned by another connection",
                    name
                ))),
            }
        }
        .boxed()
    }

    fn export<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        object: Object,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let kind = object.kind();
            let server = self.conn.object_server();
            let added = match object {
                Object::ObjectManager(o) => server.at(path.as_str(), o).await,
                Object::Service(o) => server.at(path.as_str(), o).await,
                Object::Characteristic(o) => server.at(path.as_str(), o).await,
                Object::Descriptor(o) => server.at(path.as_str(), o).await,
                Object::Advertisement(o) => server.at(path.as_str(), o).await,
            }
            .map_err(Error::from)?;

            if !added {
                return Err(Error::from(format!(
                    "{} is already exported at {}",
                    kind.interface(),
                    path.as_str()
                )));
            }
            log::debug!("exported {} at {}", kind.interface(), path.as_str());
            Ok(())
        }
        .boxed()
    }

    fn unexport<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        kind: ObjectKind,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let server = self.conn.object_server();
            let removed = match kind {
                ObjectKind::ObjectManager => {
                    server.remove::<ObjectManager, _>(path.as_str()).await
                }
                ObjectKind::Service => server.remove::<ServiceObject, _>(path.as_str()).await,
                ObjectKind::Characteristic => {
                    server
                        .remove::<CharacteristicObject, _>(path.as_str())
                        .await
                }
                ObjectKind::Descriptor => {
                    server.remove::<DescriptorObject, _>(path.as_str()).await
                }
                ObjectKind::Advertisement => {
                    server.remove::<Advertisement, _>(path.as_str()).await
                }
            }
            .map_err(Error::from)?;

            if !removed {
                log::warn!(
                    "no {} was exported at {}",
                    kind.interface(),
                    path.as_str()
                );
            }
            Ok(())
        }
        .boxed()
    }

    fn publish_introspection<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        tree: &'a Introspection,
    ) -> BoxFuture<'a, Result<()>> {
        // The zbus object server answers `Introspect` itself, from the same set of exported
        // paths, so there is nothing to install here.
        async move {
            log::debug!(
                "tree at {} now has {} nodes",
                path.as_str(),
                tree.children().len()
            );
            log::trace!("introspection of {}:\n{}", path.as_str(), tree);
            Ok(())
        }
        .boxed()
    }

    fn interfaces_added<'a>(
        &'a self,
        manager: &'a OwnedObjectPath,
        path: &'a OwnedObjectPath,
        interfaces: &'a InterfaceMap,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let ctxt = SignalContext::new(&self.conn, manager.as_str()).map_err(Error::from)?;
            ObjectManager::interfaces_added(&ctxt, path, interfaces)
                .await
                .map_err(Error::from)
        }
        .boxed()
    }

    fn interfaces_removed<'a>(
        &'a self,
        manager: &'a OwnedObjectPath,
        path: &'a OwnedObjectPath,
        interfaces: &'a [String],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let ctxt = SignalContext::new(&self.conn, manager.as_str()).map_err(Error::from)?;
            ObjectManager::interfaces_removed(&ctxt, path, interfaces)
                .await
                .map_err(Error::from)
        }
        .boxed()
    }

    fn update_value<'a>(
        &'a self,
        path: &'a OwnedObjectPath,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let iface = self
                .conn
                .object_server()
                .interface::<_, CharacteristicObject>(path.as_str())
                .await
                .map_err(Error::from)?;
            let mut characteristic = iface.get_mut().await;
            characteristic.set_cached_value(value.to_vec());
            characteristic
                .value_changed(iface.signal_context())
                .await
                .map_err(Error::from)
        }
        .boxed()
    }

    fn register_advertisement<'a>(
        &'a self,
        device: &'a OwnedObjectPath,
        advertisement: &'a OwnedObjectPath,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let proxy = LEAdvertisingManagerProxy::new(&self.conn, device.clone())
                .await
                .map_err(Error::from)?;
            proxy
                .register_advertisement(advertisement, HashMap::new())
                .await
                .map_err(Error::from)
        }
        .boxed()
    }

    fn unregister_advertisement<'a>(
        &'a self,
        device: &'a OwnedObjectPath,
        advertisement: &'a OwnedObjectPath,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let proxy = LEAdvertisingManagerProxy::new(&self.conn, device.clone())
                .await
                .map_err(Error::from)?;
            proxy
                .unregister_advertisement(advertisement)
                .await
                .map_err(Error::from)
        }
        .boxed()
    }
}

/// A [`Bus`] that records every call, for driving an application in tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;
    use crate::advertisement::AdvertisementProperties;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        RequestName(String),
        Export(String, ObjectKind),
        Unexport(String, ObjectKind),
        Introspection(String, Vec<String>),
        InterfacesAdded(String),
        InterfacesRemoved(String, Vec<String>),
        UpdateValue(String, Vec<u8>),
        RegisterAdvertisement { device: String, advertisement: String },
        UnregisterAdvertisement { device: String, advertisement: String },
    }

    #[derive(Default)]
    pub(crate) struct RecordingBus {
        calls: Mutex<Vec<Call>>,
        advertisements: Mutex<Vec<AdvertisementProperties>>,
        fail_export_at: Mutex<Option<String>>,
        name_taken: AtomicBool,
        daemon_down: AtomicBool,
        signals_fail: AtomicBool,
    }

    impl RecordingBus {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        /// Properties of every advertisement exported so far.
        pub(crate) fn advertisements(&self) -> Vec<AdvertisementProperties> {
            self.advertisements.lock().unwrap().clone()
        }

        pub(crate) fn fail_export_at(&self, path: &str) {
            *self.fail_export_at.lock().unwrap() = Some(path.to_string());
        }

        pub(crate) fn set_name_taken(&self, taken: bool) {
            self.name_taken.store(taken, Ordering::SeqCst);
        }

        pub(crate) fn set_daemon_down(&self, down: bool) {
            self.daemon_down.store(down, Ordering::SeqCst);
        }

        /// Makes `InterfacesAdded`/`InterfacesRemoved` emission fail.
        pub(crate) fn set_signals_fail(&self, fail: bool) {
            self.signals_fail.store(fail, Ordering::SeqCst);
        }

        fn signal_result(&self) -> Result<()> {
            if self.signals_fail.load(Ordering::SeqCst) {
                Err(Error::from("connection closed"))
            } else {
                Ok(())
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn daemon_result(&self) -> Result<()> {
            if self.daemon_down.load(Ordering::SeqCst) {
                Err(Error::from("org.bluez.Error.Failed: daemon unavailable"))
            } else {
                Ok(())
            }
        }
    }

    impl Bus for RecordingBus {
        fn request_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
            self.record(Call::RequestName(name.to_string()));
            let result = if self.name_taken.load(Ordering::SeqCst) {
                Err(Error::from(format!("bus name {} is owned by another connection", name)))
            } else {
                Ok(())
            };
            async move { result }.boxed()
        }

        fn export<'a>(
            &'a self,
            path: &'a OwnedObjectPath,
            object: Object,
        ) -> BoxFuture<'a, Result<()>> {
            let fail = self.fail_export_at.lock().unwrap().as_deref() == Some(path.as_str());
            let result = if fail {
                Err(Error::from(format!("cannot export {}", path.as_str())))
            } else {
                if let Object::Advertisement(ad) = &object {
                    self.advertisements.lock().unwrap().push(ad.data().clone());
                }
                self.record(Call::Export(path.as_str().to_string(), object.kind()));
                Ok(())
            };
            async move { result }.boxed()
        }

        fn unexport<'a>(
            &'a self,
            path: &'a OwnedObjectPath,
            kind: ObjectKind,
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::Unexport(path.as_str().to_string(), kind));
            async { Ok(()) }.boxed()
        }

        fn publish_introspection<'a>(
            &'a self,
            path: &'a OwnedObjectPath,
            tree: &'a Introspection,
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::Introspection(
                path.as_str().to_string(),
                tree.children().to_vec(),
            ));
            async { Ok(()) }.boxed()
        }

        fn interfaces_added<'a>(
            &'a self,
            _manager: &'a OwnedObjectPath,
            path: &'a OwnedObjectPath,
            _interfaces: &'a InterfaceMap,
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::InterfacesAdded(path.as_str().to_string()));
            let result = self.signal_result();
            async move { result }.boxed()
        }

        fn interfaces_removed<'a>(
            &'a self,
            _manager: &'a OwnedObjectPath,
            path: &'a OwnedObjectPath,
            interfaces: &'a [String],
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::InterfacesRemoved(
                path.as_str().to_string(),
                interfaces.to_vec(),
            ));
            let result = self.signal_result();
            async move { result }.boxed()
        }

        fn update_value<'a>(
            &'a self,
            path: &'a OwnedObjectPath,
            value: &'a [u8],
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::UpdateValue(path.as_str().to_string(), value.to_vec()));
            async { Ok(()) }.boxed()
        }

        fn register_advertisement<'a>(
            &'a self,
            device: &'a OwnedObjectPath,
            advertisement: &'a OwnedObjectPath,
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::RegisterAdvertisement {
                device: device.as_str().to_string(),
                advertisement: advertisement.as_str().to_string(),
            });
            let result = self.daemon_result();
            async move { result }.boxed()
        }

        fn unregister_advertisement<'a>(
            &'a self,
            device: &'a OwnedObjectPath,
            advertisement: &'a OwnedObjectPath,
        ) -> BoxFuture<'a, Result<()>> {
            self.record(Call::UnregisterAdvertisement {
                device: device.as_str().to_string(),
                advertisement: advertisement.as_str().to_string(),
            });
            let result = self.daemon_result();
            async move { result }.boxed()
        }
    }
}
