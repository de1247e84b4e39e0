use pedalers::{BleTransport, Connection, Result, ScanParams, Transport};
use tracing::info;

/// `scan [name-filter] [device-address]`
///
/// With an address, also connects and lists the characteristics a session can use.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔍 Pedalers Scan Example");

    let mut args = std::env::args().skip(1);
    let params = ScanParams {
        scan_timeout_ms: 8_000,
        name_filter: args.next().filter(|f| !f.is_empty()),
    };
    let inspect = args.next();

    let transport = BleTransport::with_scan_params(params.clone()).await?;
    let devices = transport.scan_for_devices(&params).await?;

    if devices.is_empty() {
        println!("No devices found");
    }
    for device in &devices {
        println!("{:4} dBm  {}", device.rssi, device);
    }

    if let Some(address) = inspect {
        let mut connection = transport.connect(&address).await?;
        println!("\nWritable + notifying characteristics on {address}:");
        for uuid in connection.writable_characteristics() {
            println!("  {uuid}");
        }
        connection.disconnect().await?;
    }

    Ok(())
}
