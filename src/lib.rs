//! BLE peripheral applications for BlueZ, published over D-Bus.
//!
//! An [`Application`] owns a tree of GATT [`Service`]s, characteristics and descriptors, exports
//! them on the system bus together with an `org.freedesktop.DBus.ObjectManager` that BlueZ can
//! query, and registers an LE advertisement with BlueZ's advertising manager. Read and write
//! requests coming from BlueZ are routed to the callbacks of the [`ApplicationConfig`].
//!
//! [`Service`]: gatt::Service

mod advertisement;
mod application;
pub mod bus;
mod config;
mod directory;
mod error;
pub mod gatt;
mod introspect;
pub mod properties;
pub mod uuid;

pub use advertisement::{Advertisement, AdvertisementProperties, AdvertisementType};
pub use application::Application;
pub use bus::{Bus, Object, ObjectKind};
pub use config::{
    ApplicationConfig, DescriptorReadCallback, DescriptorWriteCallback, ReadCallback,
    WriteCallback, UUID_SUFFIX,
};
pub use directory::{ManagedObjects, ObjectDirectory, ObjectManager};
pub use error::{BoxError, CallbackError, CallbackErrorKind, Error, Result};
pub use introspect::Introspection;

use zbus::Connection;

/// A cloneable handle to a D-Bus connection.
///
/// This is the [`Bus`] an [`Application`] uses when created with [`Application::new`].
#[derive(Clone)]
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Creates a new connection to the system bus.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            conn: Connection::system().await.map_err(Error::from)?,
        })
    }
}
