use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Weak,
    },
};

use futures_util::lock::Mutex;
use zbus::zvariant::OwnedObjectPath;

use crate::{
    advertisement::{
        Advertisement, AdvertisementProperties, AdvertisementType, ADVERTISEMENT_PATH,
        DEFAULT_DURATION, DEFAULT_TIMEOUT, DEVICE_PATH_PREFIX,
    },
    bus::{Bus, Object, ObjectKind},
    config::ApplicationConfig,
    directory::{ObjectDirectory, ObjectManager},
    gatt::{child_path, owned_path, Service},
    introspect::Introspection,
    properties::{ServiceProperties, GATT_CHARACTERISTIC_INTERFACE},
    uuid::Uuid,
    CallbackError, Error, Result, Session,
};

/// A BLE peripheral application: a tree of GATT services published on D-Bus, plus an optional
/// LE advertisement.
///
/// This is a cloneable handle. All clones refer to the same tree.
///
/// Tree mutations and the advertising protocol are serialized; concurrent calls wait for each
/// other. Read and write requests from BlueZ are dispatched to the callbacks of the
/// [`ApplicationConfig`] without taking that lock.
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

struct Inner {
    config: ApplicationConfig,
    path: OwnedObjectPath,
    bus: Arc<dyn Bus>,
    directory: ObjectDirectory,
    service_index: AtomicU32,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Set once the object manager is exported.
    running: bool,
    /// Live services, in the order they were added.
    services: Vec<Service>,
    advertisement: Option<ActiveAdvertisement>,
}

struct ActiveAdvertisement {
    path: OwnedObjectPath,
    device: OwnedObjectPath,
}

/// A non-owning handle held by exported GATT objects.
#[derive(Clone)]
pub(crate) struct AppRef(Weak<Inner>);

impl AppRef {
    pub(crate) fn upgrade(&self) -> Option<Application> {
        self.0.upgrade().map(|inner| Application { inner })
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.config.object_name)
            .field("path", &self.inner.path.as_str())
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Connects to the system bus and creates an application from `config`.
    ///
    /// Nothing is published until [`Application::run`] is called.
    pub async fn new(config: ApplicationConfig) -> Result<Self> {
        let session = Session::new().await?;
        Self::with_bus(config, Arc::new(session))
    }

    /// Creates an application that publishes through `bus`.
    pub fn with_bus<B: Bus>(config: ApplicationConfig, bus: Arc<B>) -> Result<Self> {
        let path = config.validate()?;
        let bus: Arc<dyn Bus> = bus;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                path,
                bus,
                directory: ObjectDirectory::new(),
                service_index: AtomicU32::new(0),
                state: Mutex::new(State::default()),
            }),
        })
    }

    fn downgrade(&self) -> AppRef {
        AppRef(Arc::downgrade(&self.inner))
    }

    /// Returns the bus name this application claims.
    pub fn name(&self) -> &str {
        &self.inner.config.object_name
    }

    /// Returns the root object path of the application.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.inner.path
    }

    /// Returns the directory served by the application's object manager.
    pub fn directory(&self) -> &ObjectDirectory {
        &self.inner.directory
    }

    /// Claims the bus name, exports the object manager at the root path and publishes the tree.
    ///
    /// Must be called once, before services are added; a second call fails. The name is requested
    /// with replace-existing and do-not-queue semantics; if another connection keeps it, this
    /// fails.
    pub async fn run(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.running {
            return Err(Error::from(format!(
                "application {} is already running",
                self.name()
            )));
        }
        self.inner.bus.request_name(self.name()).await?;

        let manager = ObjectManager::new(self.inner.directory.clone());
        self.inner
            .bus
            .export(&self.inner.path, Object::ObjectManager(manager))
            .await?;
        state.running = true;

        let tree = self.tree(&state);
        self.inner
            .bus
            .publish_introspection(&self.inner.path, &tree)
            .await?;
        log::info!(
            "application {} running at {}",
            self.name(),
            self.inner.path.as_str()
        );
        Ok(())
    }

    /// Allocates a path for a new [`Service`].
    ///
    /// Paths are `<app path>/service<N>`, with `N` starting at 1 and never reused. The service is
    /// not published until it is passed to [`Application::add_service`].
    pub fn create_service(&self, properties: ServiceProperties, advertised: bool) -> Result<Service> {
        let index = self.inner.service_index.fetch_add(1, Ordering::SeqCst) + 1;
        let path = child_path(&self.inner.path, "service", index)?;
        log::debug!("allocated service {} ({})", path.as_str(), properties.uuid);
        Ok(Service::new(path, properties, advertised))
    }

    /// Publishes `service` together with its characteristics and descriptors.
    ///
    /// Every node is exported before anything else changes. If an export fails, the nodes
    /// exported so far are withdrawn and the application is left as it was. Later failures are
    /// returned as they happen, without undoing the steps already taken.
    ///
    /// Fails if [`Application::run`] has not completed, since BlueZ learns about new objects
    /// through the object manager.
    pub async fn add_service(&self, service: &Service) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            return Err(Error::from(format!(
                "cannot add service {} before the application is running",
                service.path().as_str()
            )));
        }
        if state.services.iter().any(|s| s.path() == service.path()) {
            return Err(Error::from(format!(
                "service {} was already added",
                service.path().as_str()
            )));
        }

        let app = self.downgrade();
        let nodes = service.nodes();
        let mut exported: Vec<(&OwnedObjectPath, ObjectKind)> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            if let Err(e) = self.inner.bus.export(node.path(), node.export(&app)).await {
                for (path, kind) in exported.into_iter().rev() {
                    if let Err(e) = self.inner.bus.unexport(path, kind).await {
                        log::warn!("failed to withdraw {}: {}", path.as_str(), e);
                    }
                }
                return Err(e);
            }
            exported.push((node.path(), node.kind()));
        }

        state.services.push(service.clone());
        let tree = self.tree(&state);
        self.inner
            .bus
            .publish_introspection(&self.inner.path, &tree)
            .await?;

        for node in &nodes {
            let interfaces = node.properties();
            self.inner
                .directory
                .add_object(node.path().clone(), interfaces.clone());
            self.inner
                .bus
                .interfaces_added(&self.inner.path, node.path(), &interfaces)
                .await?;
        }

        log::debug!(
            "added service {} ({} objects)",
            service.path().as_str(),
            nodes.len()
        );
        Ok(())
    }

    /// Withdraws a published service together with its characteristics and descriptors.
    ///
    /// Removing a service that is not published does nothing.
    pub async fn remove_service(&self, service: &Service) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let Some(pos) = state
            .services
            .iter()
            .position(|s| s.path() == service.path())
        else {
            log::debug!("service {} is not published", service.path().as_str());
            return Ok(());
        };
        let removed = state.services.remove(pos);
        let nodes = removed.nodes();

        for node in nodes.iter().rev() {
            if let Some(interfaces) = self.inner.directory.remove_object(node.path()) {
                let names = interfaces.into_keys().collect::<Vec<_>>();
                self.inner
                    .bus
                    .interfaces_removed(&self.inner.path, node.path(), &names)
                    .await?;
            }
        }

        for node in nodes.iter().rev() {
            self.inner.bus.unexport(node.path(), node.kind()).await?;
        }

        let tree = self.tree(&state);
        self.inner
            .bus
            .publish_introspection(&self.inner.path, &tree)
            .await?;

        log::debug!("removed service {}", removed.path().as_str());
        Ok(())
    }

    /// Returns the paths of all published services, in the order they were added.
    pub async fn services(&self) -> Vec<OwnedObjectPath> {
        let state = self.inner.state.lock().await;
        state.services.iter().map(|s| s.path().clone()).collect()
    }

    /// Describes the currently published tree.
    pub async fn introspection(&self) -> Introspection {
        let state = self.inner.state.lock().await;
        self.tree(&state)
    }

    fn tree(&self, state: &State) -> Introspection {
        let nodes = state
            .services
            .iter()
            .flat_map(Service::nodes)
            .collect::<Vec<_>>();
        Introspection::of_tree(
            self.inner.path.as_str(),
            nodes.iter().map(|node| node.path().as_str()),
        )
    }

    /// Expands a short UUID into its 128-bit string form.
    ///
    /// An 8-character value is only suffixed; anything else is prefixed with the configured base
    /// as well.
    ///
    /// ```no_run
    /// # async fn f(app: blues_peripheral::Application) {
    /// assert_eq!(app.generate_uuid("180D"), "0000180D-0000-1000-8000-00805F9B34FB");
    /// # }
    /// ```
    pub fn generate_uuid(&self, value: &str) -> String {
        let config = &self.inner.config;
        if value.len() == 8 {
            format!("{}{}", value, config.uuid_suffix)
        } else {
            format!("{}{}{}", config.uuid_base, value, config.uuid_suffix)
        }
    }

    /// Replaces the value of a published characteristic and notifies subscribers.
    pub async fn update_characteristic_value(
        &self,
        path: &OwnedObjectPath,
        value: &[u8],
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let characteristic = state
            .services
            .iter_mut()
            .find_map(|s| s.characteristic_mut(path))
            .ok_or_else(|| {
                Error::from(format!("no published characteristic at {}", path.as_str()))
            })?;
        characteristic.set_value(value.to_vec());

        self.inner.directory.set_property(
            path,
            GATT_CHARACTERISTIC_INTERFACE,
            "Value",
            value.to_vec(),
        );
        self.inner.bus.update_value(path, value).await
    }

    pub(crate) fn handle_read(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> std::result::Result<Vec<u8>, CallbackError> {
        log::debug!("read {}/{}", service, characteristic);
        let read = self
            .inner
            .config
            .read
            .as_ref()
            .ok_or_else(CallbackError::not_registered)?;
        read(self, service, characteristic).map_err(CallbackError::function_error)
    }

    pub(crate) fn handle_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> std::result::Result<(), CallbackError> {
        log::debug!("write {}/{}: {:02x?}", service, characteristic, value);
        let write = self
            .inner
            .config
            .write
            .as_ref()
            .ok_or_else(CallbackError::not_registered)?;
        write(self, service, characteristic, value).map_err(CallbackError::function_error)
    }

    pub(crate) fn handle_descriptor_read(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> std::result::Result<Vec<u8>, CallbackError> {
        log::debug!("read {}/{}/{}", service, characteristic, descriptor);
        let read = self
            .inner
            .config
            .descriptor_read
            .as_ref()
            .ok_or_else(CallbackError::not_registered)?;
        read(self, service, characteristic, descriptor).map_err(CallbackError::function_error)
    }

    pub(crate) fn handle_descriptor_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> std::result::Result<(), CallbackError> {
        log::debug!(
            "write {}/{}/{}: {:02x?}",
            service,
            characteristic,
            descriptor,
            value
        );
        let write = self
            .inner
            .config
            .descriptor_write
            .as_ref()
            .ok_or_else(CallbackError::not_registered)?;
        write(self, service, characteristic, descriptor, value)
            .map_err(CallbackError::function_error)
    }

    /// Starts advertising the services marked as advertised, on the adapter `device_name`
    /// (eg. `hci0`).
    ///
    /// Does nothing if an advertisement is already active. If BlueZ rejects the registration,
    /// the error is returned and the advertisement remains active; call
    /// [`Application::stop_advertising`] to withdraw it.
    pub async fn start_advertising(&self, device_name: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.advertisement.is_some() {
            log::debug!("already advertising");
            return Ok(());
        }

        let path = owned_path(ADVERTISEMENT_PATH.to_string())?;
        let device = owned_path(format!("{}{}", DEVICE_PATH_PREFIX, device_name))?;
        let properties = AdvertisementProperties {
            ty: AdvertisementType::Peripheral,
            service_uuids: state
                .services
                .iter()
                .filter(|s| s.is_advertised())
                .map(Service::uuid)
                .collect(),
            local_name: self.inner.config.local_name.clone(),
            duration: DEFAULT_DURATION,
            timeout: DEFAULT_TIMEOUT,
            ..Default::default()
        };

        let advertisement = Advertisement::new(path.clone(), properties);
        self.inner
            .bus
            .export(&path, Object::Advertisement(advertisement))
            .await?;
        state.advertisement = Some(ActiveAdvertisement {
            path: path.clone(),
            device: device.clone(),
        });

        self.inner.bus.register_advertisement(&device, &path).await?;
        log::info!("advertising on {}", device.as_str());
        Ok(())
    }

    /// Stops advertising.
    ///
    /// The local advertisement is withdrawn even if BlueZ fails to unregister it; that failure
    /// is still returned. Does nothing if no advertisement is active.
    pub async fn stop_advertising(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let Some(active) = state.advertisement.take() else {
            return Ok(());
        };

        let result = self
            .inner
            .bus
            .unregister_advertisement(&active.device, &active.path)
            .await;
        if let Err(e) = self
            .inner
            .bus
            .unexport(&active.path, ObjectKind::Advertisement)
            .await
        {
            log::warn!("failed to withdraw {}: {}", active.path.as_str(), e);
        }

        match &result {
            Ok(()) => log::info!("stopped advertising on {}", active.device.as_str()),
            Err(e) => log::warn!(
                "failed to unregister advertisement on {}: {}",
                active.device.as_str(),
                e
            ),
        }
        result
    }

    /// Returns whether an advertisement is active (registered, or kept after a failed
    /// registration).
    pub async fn is_advertising(&self) -> bool {
        self.inner.state.lock().await.advertisement.is_some()
    }
}

#[cfg(test)]
mod tests {
    use pollster::block_on;

    use super::*;
    use crate::{
        bus::testing::{Call, RecordingBus},
        properties::{
            CharacteristicFlags, CharacteristicProperties, DescriptorFlags, DescriptorProperties,
            GATT_DESCRIPTOR_INTERFACE, GATT_SERVICE_INTERFACE,
        },
        CallbackErrorKind,
    };
    use zbus::zvariant::{OwnedValue, Value};

    const HEART_RATE: Uuid = Uuid::from_u16(0x180D);
    const BATTERY: Uuid = Uuid::from_u16(0x180F);
    const MEASUREMENT: Uuid = Uuid::from_u16(0x2A37);
    const CCCD: Uuid = Uuid::from_u16(0x2902);

    fn config() -> ApplicationConfig {
        ApplicationConfig::new("org.example.app", "/org/example/app").local_name("pulse")
    }

    fn application(config: ApplicationConfig) -> (Application, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::default());
        let app = Application::with_bus(config, bus.clone()).unwrap();
        (app, bus)
    }

    /// An application whose object manager is exported, with the call log cleared.
    fn running(config: ApplicationConfig) -> (Application, Arc<RecordingBus>) {
        let (app, bus) = application(config);
        block_on(app.run()).unwrap();
        bus.clear();
        (app, bus)
    }

    /// A heart rate service with one notifying characteristic and its CCCD.
    fn heart_rate(app: &Application) -> Service {
        let mut service = app
            .create_service(ServiceProperties::primary(HEART_RATE), true)
            .unwrap();
        let mut characteristic = service
            .create_characteristic(CharacteristicProperties::new(
                MEASUREMENT,
                CharacteristicFlags::READ | CharacteristicFlags::NOTIFY,
            ))
            .unwrap();
        let descriptor = characteristic
            .create_descriptor(DescriptorProperties::new(
                CCCD,
                DescriptorFlags::READ | DescriptorFlags::WRITE,
            ))
            .unwrap();
        characteristic.add_descriptor(descriptor).unwrap();
        service.add_characteristic(characteristic).unwrap();
        service
    }

    fn path(s: &str) -> OwnedObjectPath {
        owned_path(s.to_string()).unwrap()
    }

    #[test]
    fn invalid_config() {
        let bus = Arc::new(RecordingBus::default());
        Application::with_bus(ApplicationConfig::new("", "/app"), bus.clone()).unwrap_err();
        Application::with_bus(ApplicationConfig::new("org.example", ""), bus).unwrap_err();
    }

    #[test]
    fn service_paths_are_never_reused() {
        let (app, _bus) = running(config());
        block_on(async {
            let first = app
                .create_service(ServiceProperties::primary(HEART_RATE), false)
                .unwrap();
            let second = app
                .create_service(ServiceProperties::primary(BATTERY), false)
                .unwrap();
            assert_eq!(first.path().as_str(), "/org/example/app/service1");
            assert_eq!(second.path().as_str(), "/org/example/app/service2");

            app.add_service(&first).await.unwrap();
            app.remove_service(&first).await.unwrap();

            let third = app
                .create_service(ServiceProperties::primary(HEART_RATE), false)
                .unwrap();
            assert_eq!(third.path().as_str(), "/org/example/app/service3");
        });
    }

    #[test]
    fn root_application_paths() {
        let (app, _bus) = application(ApplicationConfig::new("org.example.app", "/"));
        let service = app
            .create_service(ServiceProperties::primary(HEART_RATE), false)
            .unwrap();
        assert_eq!(service.path().as_str(), "/service1");
    }

    #[test]
    fn generate_uuid() {
        let (app, _bus) = application(config());
        assert_eq!(
            app.generate_uuid("180D"),
            "0000180D-0000-1000-8000-00805F9B34FB"
        );
        assert_eq!(
            app.generate_uuid("0000180D"),
            "0000180D-0000-1000-8000-00805F9B34FB"
        );
        assert_eq!(
            app.generate_uuid("feed1234"),
            "feed1234-0000-1000-8000-00805F9B34FB"
        );

        let (custom, _bus) = application(config().uuid_base("1234").uuid_suffix("-5678"));
        assert_eq!(custom.generate_uuid("abcd"), "1234abcd-5678");
        assert_eq!(custom.generate_uuid("0000180D"), "0000180D-5678");
        assert_eq!(
            custom.generate_uuid("someBase0001"),
            "1234someBase0001-5678"
        );
        assert_eq!(custom.generate_uuid(""), "1234-5678");
    }

    #[test]
    fn run_publishes_root() {
        let (app, bus) = application(config());
        block_on(app.run()).unwrap();
        assert_eq!(
            bus.calls(),
            [
                Call::RequestName("org.example.app".to_string()),
                Call::Export("/org/example/app".to_string(), ObjectKind::ObjectManager),
                Call::Introspection("/org/example/app".to_string(), Vec::new()),
            ]
        );
    }

    #[test]
    fn run_fails_when_name_is_taken() {
        let (app, bus) = application(config());
        bus.set_name_taken(true);
        block_on(app.run()).unwrap_err();
        assert_eq!(
            bus.calls(),
            [Call::RequestName("org.example.app".to_string())]
        );
    }

    #[test]
    fn run_is_single_shot() {
        let (app, bus) = running(config());
        block_on(app.run()).unwrap_err();
        assert!(bus.calls().is_empty());
    }

    #[test]
    fn add_service_requires_run() {
        let (app, bus) = application(config());
        block_on(async {
            let service = heart_rate(&app);
            app.add_service(&service).await.unwrap_err();
            assert!(bus.calls().is_empty());
            assert!(app.directory().is_empty());
            assert!(app.services().await.is_empty());

            // The same service can be published once the application runs.
            app.run().await.unwrap();
            app.add_service(&service).await.unwrap();
            assert_eq!(app.services().await, [service.path().clone()]);
        });
    }

    #[test]
    fn late_add_failure_is_not_rolled_back() {
        let (app, bus) = running(config());
        block_on(async {
            let service = heart_rate(&app);
            bus.set_signals_fail(true);

            app.add_service(&service).await.unwrap_err();

            // Exports, map and introspection stay as they were when the signal failed.
            assert_eq!(app.services().await, [service.path().clone()]);
            assert_eq!(app.introspection().await.children().len(), 3);
            assert_eq!(app.directory().len(), 1);
            assert!(app.directory().contains(service.path()));
            assert!(!bus
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Unexport(..))));

            // Removal still withdraws what was published.
            bus.set_signals_fail(false);
            app.remove_service(&service).await.unwrap();
            assert!(app.directory().is_empty());
            assert!(app.services().await.is_empty());
        });
    }

    #[test]
    fn add_service_publishes_subtree() {
        let (app, bus) = application(config());
        block_on(async {
            app.run().await.unwrap();
            bus.clear();

            let service = heart_rate(&app);
            app.add_service(&service).await.unwrap();

            let children = [
                "service1".to_string(),
                "service1/char1".to_string(),
                "service1/char1/desc1".to_string(),
            ];
            assert_eq!(
                bus.calls(),
                [
                    Call::Export(service.path().as_str().to_string(), ObjectKind::Service),
                    Call::Export(
                        "/org/example/app/service1/char1".to_string(),
                        ObjectKind::Characteristic
                    ),
                    Call::Export(
                        "/org/example/app/service1/char1/desc1".to_string(),
                        ObjectKind::Descriptor
                    ),
                    Call::Introspection("/org/example/app".to_string(), children.to_vec()),
                    Call::InterfacesAdded("/org/example/app/service1".to_string()),
                    Call::InterfacesAdded("/org/example/app/service1/char1".to_string()),
                    Call::InterfacesAdded("/org/example/app/service1/char1/desc1".to_string()),
                ]
            );

            let directory = app.directory();
            assert_eq!(directory.len(), 3);
            assert_eq!(directory.get(service.path()), Some(service.properties()));
            let characteristic = &service.characteristics()[0];
            assert_eq!(
                directory.get(characteristic.path()),
                Some(characteristic.properties())
            );
            let descriptor = &characteristic.descriptors()[0];
            assert!(directory
                .get(descriptor.path())
                .unwrap()
                .contains_key(GATT_DESCRIPTOR_INTERFACE));

            let tree = app.introspection().await;
            assert_eq!(tree.children(), children);
            assert_eq!(tree, app.introspection().await);
            assert_eq!(app.services().await, [service.path().clone()]);
        });
    }

    #[test]
    fn duplicate_add_fails() {
        let (app, bus) = running(config());
        block_on(async {
            let service = heart_rate(&app);
            app.add_service(&service).await.unwrap();
            let before = app.directory().snapshot();
            bus.clear();

            app.add_service(&service).await.unwrap_err();
            assert_eq!(app.directory().snapshot(), before);
            assert!(bus.calls().is_empty());
        });
    }

    #[test]
    fn failed_export_is_rolled_back() {
        let (app, bus) = running(config());
        block_on(async {
            let service = heart_rate(&app);
            bus.fail_export_at("/org/example/app/service1/char1/desc1");

            app.add_service(&service).await.unwrap_err();
            assert_eq!(
                bus.calls(),
                [
                    Call::Export(service.path().as_str().to_string(), ObjectKind::Service),
                    Call::Export(
                        "/org/example/app/service1/char1".to_string(),
                        ObjectKind::Characteristic
                    ),
                    Call::Unexport(
                        "/org/example/app/service1/char1".to_string(),
                        ObjectKind::Characteristic
                    ),
                    Call::Unexport(service.path().as_str().to_string(), ObjectKind::Service),
                ]
            );
            assert!(app.directory().is_empty());
            assert!(app.services().await.is_empty());
            assert!(app.introspection().await.children().is_empty());
        });
    }

    #[test]
    fn remove_service_is_recursive() {
        let (app, bus) = running(config());
        block_on(async {
            let service = heart_rate(&app);
            let battery = app
                .create_service(ServiceProperties::primary(BATTERY), false)
                .unwrap();
            app.add_service(&service).await.unwrap();
            app.add_service(&battery).await.unwrap();
            bus.clear();

            app.remove_service(&service).await.unwrap();

            let descriptor = "/org/example/app/service1/char1/desc1";
            let characteristic = "/org/example/app/service1/char1";
            assert_eq!(
                bus.calls(),
                [
                    Call::InterfacesRemoved(
                        descriptor.to_string(),
                        vec![GATT_DESCRIPTOR_INTERFACE.to_string()]
                    ),
                    Call::InterfacesRemoved(
                        characteristic.to_string(),
                        vec![GATT_CHARACTERISTIC_INTERFACE.to_string()]
                    ),
                    Call::InterfacesRemoved(
                        service.path().as_str().to_string(),
                        vec![GATT_SERVICE_INTERFACE.to_string()]
                    ),
                    Call::Unexport(descriptor.to_string(), ObjectKind::Descriptor),
                    Call::Unexport(characteristic.to_string(), ObjectKind::Characteristic),
                    Call::Unexport(service.path().as_str().to_string(), ObjectKind::Service),
                    Call::Introspection(
                        "/org/example/app".to_string(),
                        vec!["service2".to_string()]
                    ),
                ]
            );

            let directory = app.directory();
            assert!(!directory.contains(service.path()));
            assert!(!directory.contains(&path(characteristic)));
            assert!(!directory.contains(&path(descriptor)));
            assert!(directory.contains(battery.path()));
            assert_eq!(app.services().await, [battery.path().clone()]);

            // Removing it again is a no-op.
            bus.clear();
            app.remove_service(&service).await.unwrap();
            assert!(bus.calls().is_empty());
        });
    }

    #[test]
    fn update_characteristic_value() {
        let (app, bus) = running(config());
        block_on(async {
            let service = heart_rate(&app);
            app.add_service(&service).await.unwrap();
            bus.clear();

            let characteristic = service.characteristics()[0].path().clone();
            app.update_characteristic_value(&characteristic, &[0x00, 0x48])
                .await
                .unwrap();
            assert_eq!(
                bus.calls(),
                [Call::UpdateValue(
                    characteristic.as_str().to_string(),
                    vec![0x00, 0x48]
                )]
            );

            let interfaces = app.directory().get(&characteristic).unwrap();
            assert_eq!(
                interfaces[GATT_CHARACTERISTIC_INTERFACE]["Value"],
                OwnedValue::from(Value::from(vec![0x00u8, 0x48]))
            );

            app.update_characteristic_value(service.path(), &[1])
                .await
                .unwrap_err();
        });
    }

    #[test]
    fn dispatch_without_callbacks() {
        let (app, _bus) = application(config());
        let err = app.handle_read(HEART_RATE, MEASUREMENT).unwrap_err();
        assert_eq!(err.code(), CallbackError::CALLBACK_NOT_REGISTERED);
        assert_eq!(err.message(), "No callback registered.");

        let err = app.handle_write(HEART_RATE, MEASUREMENT, &[1]).unwrap_err();
        assert_eq!(err.kind(), CallbackErrorKind::NotRegistered);
        let err = app
            .handle_descriptor_read(HEART_RATE, MEASUREMENT, CCCD)
            .unwrap_err();
        assert_eq!(err.code(), CallbackError::CALLBACK_NOT_REGISTERED);
        let err = app
            .handle_descriptor_write(HEART_RATE, MEASUREMENT, CCCD, &[1, 0])
            .unwrap_err();
        assert_eq!(err.code(), CallbackError::CALLBACK_NOT_REGISTERED);
    }

    #[test]
    fn dispatch_to_callbacks() {
        let config = config()
            .on_read(|_app, service, characteristic| {
                assert_eq!(service, HEART_RATE);
                assert_eq!(characteristic, MEASUREMENT);
                Ok(vec![0x00, 72])
            })
            .on_write(|_app, _service, _characteristic, _value| Err("boom".into()))
            .on_descriptor_read(|_app, _service, _characteristic, descriptor| {
                Ok(descriptor.as_u16().unwrap().to_le_bytes().to_vec())
            })
            .on_descriptor_write(|_app, _service, _characteristic, _descriptor, value| {
                assert_eq!(value, [1, 0]);
                Ok(())
            });
        let (app, _bus) = application(config);

        assert_eq!(app.handle_read(HEART_RATE, MEASUREMENT).unwrap(), [0x00, 72]);

        let err = app.handle_write(HEART_RATE, MEASUREMENT, &[1]).unwrap_err();
        assert_eq!(err.code(), CallbackError::CALLBACK_FUNCTION_ERROR);
        assert_eq!(err.message(), "boom");

        assert_eq!(
            app.handle_descriptor_read(HEART_RATE, MEASUREMENT, CCCD)
                .unwrap(),
            [0x02, 0x29]
        );
        app.handle_descriptor_write(HEART_RATE, MEASUREMENT, CCCD, &[1, 0])
            .unwrap();
    }

    #[test]
    fn start_advertising_is_idempotent() {
        let (app, bus) = application(config());
        block_on(async {
            app.run().await.unwrap();
            let service = heart_rate(&app);
            let battery = app
                .create_service(ServiceProperties::primary(BATTERY), false)
                .unwrap();
            app.add_service(&service).await.unwrap();
            app.add_service(&battery).await.unwrap();
            bus.clear();

            app.start_advertising("hci0").await.unwrap();
            app.start_advertising("hci0").await.unwrap();
            assert!(app.is_advertising().await);

            assert_eq!(
                bus.calls(),
                [
                    Call::Export(
                        "/org/bluez/advertisement/0".to_string(),
                        ObjectKind::Advertisement
                    ),
                    Call::RegisterAdvertisement {
                        device: "/org/bluez/hci0".to_string(),
                        advertisement: "/org/bluez/advertisement/0".to_string(),
                    },
                ]
            );

            let advertisements = bus.advertisements();
            assert_eq!(advertisements.len(), 1);
            let ad = &advertisements[0];
            assert_eq!(ad.ty, AdvertisementType::Peripheral);
            assert_eq!(ad.service_uuids, [HEART_RATE]);
            assert_eq!(ad.local_name, "pulse");
            assert_eq!(ad.duration, 2);
            assert_eq!(ad.timeout, 60);
        });
    }

    #[test]
    fn stop_without_advertisement() {
        let (app, bus) = application(config());
        block_on(app.stop_advertising()).unwrap();
        assert!(bus.calls().is_empty());
    }

    #[test]
    fn stop_advertising() {
        let (app, bus) = application(config());
        block_on(async {
            app.start_advertising("hci1").await.unwrap();
            bus.clear();

            app.stop_advertising().await.unwrap();
            assert!(!app.is_advertising().await);
            assert_eq!(
                bus.calls(),
                [
                    Call::UnregisterAdvertisement {
                        device: "/org/bluez/hci1".to_string(),
                        advertisement: "/org/bluez/advertisement/0".to_string(),
                    },
                    Call::Unexport(
                        "/org/bluez/advertisement/0".to_string(),
                        ObjectKind::Advertisement
                    ),
                ]
            );
        });
    }

    #[test]
    fn advertising_with_daemon_down() {
        let (app, bus) = application(config());
        block_on(async {
            bus.set_daemon_down(true);

            // The registration fails but the advertisement stays active.
            app.start_advertising("hci0").await.unwrap_err();
            assert!(app.is_advertising().await);

            // Local state is cleared anyway.
            app.stop_advertising().await.unwrap_err();
            assert!(!app.is_advertising().await);
            assert!(bus.calls().contains(&Call::Unexport(
                "/org/bluez/advertisement/0".to_string(),
                ObjectKind::Advertisement
            )));

            bus.set_daemon_down(false);
            bus.clear();
            app.start_advertising("hci0").await.unwrap();
            assert_eq!(bus.advertisements().len(), 2);
        });
    }
}
