use std::{env, thread, time::Duration};

use blues_peripheral::{
    properties::{
        CharacteristicFlags, CharacteristicProperties, DescriptorFlags, DescriptorProperties,
        ServiceProperties,
    },
    uuid::Uuid,
    Application, ApplicationConfig,
};

// https://www.bluetooth.com/specifications/assigned-numbers/
const HEART_RATE_SERVICE: Uuid = Uuid::from_u16(0x180D);
const HEART_RATE_MEASUREMENT_CHARACTERISTIC: Uuid = Uuid::from_u16(0x2A37);
const BODY_SENSOR_LOCATION_CHARACTERISTIC: Uuid = Uuid::from_u16(0x2A38);
const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::from_u16(0x2902);

/// "Chest", from the body sensor location value table.
const SENSOR_LOCATION_CHEST: u8 = 1;

#[pollster::main]
async fn main() -> blues_peripheral::Result<()> {
    env_logger::builder()
        .filter_module("blues_peripheral", log::LevelFilter::Debug)
        .filter_module(env!("CARGO_CRATE_NAME"), log::LevelFilter::Debug)
        .init();

    let adapter = env::args().nth(1).unwrap_or_else(|| "hci0".to_string());

    let config = ApplicationConfig::new("org.example.HeartRate", "/org/example/heartrate")
        .local_name("blues-hr")
        .on_read(|_app, _service, characteristic| match characteristic {
            BODY_SENSOR_LOCATION_CHARACTERISTIC => Ok(vec![SENSOR_LOCATION_CHEST]),
            // Flags byte (8-bit value), then the value.
            HEART_RATE_MEASUREMENT_CHARACTERISTIC => Ok(vec![0x00, 60]),
            other => Err(format!("no value for {}", other).into()),
        })
        .on_descriptor_read(|_app, _service, _characteristic, _descriptor| Ok(vec![0x00, 0x00]))
        .on_descriptor_write(|_app, _service, characteristic, _descriptor, value| {
            log::info!("client configuration of {} set to {:02x?}", characteristic, value);
            Ok(())
        });

    let app = Application::new(config).await?;
    app.run().await?;

    let mut service = app.create_service(ServiceProperties::primary(HEART_RATE_SERVICE), true)?;

    let mut measurement = service.create_characteristic(CharacteristicProperties::new(
        HEART_RATE_MEASUREMENT_CHARACTERISTIC,
        CharacteristicFlags::NOTIFY,
    ))?;
    let cccd = measurement.create_descriptor(DescriptorProperties::new(
        CLIENT_CHARACTERISTIC_CONFIGURATION,
        DescriptorFlags::READ | DescriptorFlags::WRITE,
    ))?;
    measurement.add_descriptor(cccd)?;
    let measurement_path = measurement.path().clone();
    service.add_characteristic(measurement)?;

    let location = service.create_characteristic(CharacteristicProperties::new(
        BODY_SENSOR_LOCATION_CHARACTERISTIC,
        CharacteristicFlags::READ,
    ))?;
    service.add_characteristic(location)?;

    app.add_service(&service).await?;
    log::info!("published {}", app.introspection().await);

    app.start_advertising(&adapter).await?;

    // BlueZ drops the advertisement after its timeout, so only simulate for that long.
    for bpm in (60..120u8).chain((60..120u8).rev()).take(60) {
        thread::sleep(Duration::from_secs(1));
        app.update_characteristic_value(&measurement_path, &[0x00, bpm])
            .await?;
    }

    app.stop_advertising().await?;
    app.remove_service(&service).await?;
    Ok(())
}
