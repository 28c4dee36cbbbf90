//! Battery level monitoring over a managed session
//!
//! Run with: cargo run --example battery_monitor

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use uuid::Uuid;

use ble_session::{
    BleTransport, DeviceId, Error, GattRequest, Result, ServiceProfile, Session, SessionCallbacks,
};

const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

struct PrintCallbacks;

impl SessionCallbacks for PrintCallbacks {
    fn on_device_connecting(&self, device: &DeviceId) {
        println!("Connecting to {device}...");
    }

    fn on_device_connected(&self, device: &DeviceId) {
        println!("Connected to {device}");
    }

    fn on_device_ready(&self, device: &DeviceId) {
        println!("{device} is ready");
    }

    fn on_device_not_supported(&self, device: &DeviceId) {
        eprintln!("{device} has no battery service");
    }

    fn on_linkloss_occurred(&self, device: &DeviceId) {
        eprintln!("Link to {device} lost");
    }

    fn on_device_disconnected(&self, device: &DeviceId) {
        println!("{device} disconnected");
    }

    fn on_error(&self, device: &DeviceId, message: &str, code: i32) {
        eprintln!("Error on {device}: {message} (code {code})");
    }

    fn on_data_received(&self, device: &DeviceId, _characteristic: Uuid, payload: bytes::Bytes) {
        if let Some(level) = payload.first() {
            println!("{device} battery: {level}%");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Battery Monitor");
    println!("===============\n");
    println!("Scanning for devices...\n");

    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let peripheral = adapter
        .peripherals()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    let device = DeviceId::new(format!("{:?}", peripheral.id()));
    let transport = Arc::new(BleTransport::new(
        adapter,
        peripheral,
        ServiceProfile::mandatory([BATTERY_SERVICE]),
    ));

    // Battery level notifications are enabled before the session reports
    // ready, so updates start flowing immediately.
    let session = Session::builder(device, transport)
        .callbacks(Arc::new(PrintCallbacks))
        .initialization([GattRequest::EnableNotifications {
            characteristic: BATTERY_LEVEL,
        }])
        .build();

    session.connect(true).await?;

    while !session.state().is_ready() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let level = session.read(BATTERY_LEVEL).await?;
    println!(
        "Current battery: {}%\n",
        level.first().copied().unwrap_or(0)
    );
    println!("Monitoring notifications. Press Ctrl+C to exit.\n");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    println!("\nExiting...");
    session.disconnect().await?;

    Ok(())
}
