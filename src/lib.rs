#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Pedalers 🚴
//!
//! A Rust library for riding BLE-controlled exercise bikes without the vendor app.
//!
//! The bike's console speaks a small binary protocol over a single GATT
//! characteristic: the host writes checksummed command frames and the console
//! answers with notifications. This crate implements that protocol, lays out
//! resistance programs minute by minute and runs a workout session end to end.
//!
//! ## Protocol Overview
//!
//! - **Frames**: every command starts with `0xF0` and ends with an additive checksum
//! - **Handshake**: `PING`, `INIT_A0`, five `PING`s, `INIT_A3`, `INIT_A4`
//! - **Resistance**: `SET_LEVEL(n)` carries `n + 1`, levels run 1 to 254
//! - **Telemetry**: one 21-byte notification per `READ`, every byte offset by one
//! - **Programs**: constant, ramp-up, ramp-up-down, stepped-cycle and warmup-cooldown
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library changes the resistance of physical exercise
//! equipment while someone is riding it. Keep level ranges sensible and make sure
//! the rider can always stop the session.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pedalers::{
//!     BleTransport, ProgramKind, ResistanceProgram, Session, SessionConfig, SessionRunner,
//! };
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BleTransport::new().await?;
//!     let characteristic = Uuid::parse_str("0000fff2-0000-1000-8000-00805f9b34fb")?;
//!     let config = SessionConfig::new("AA:BB:CC:DD:EE:FF", characteristic);
//!
//!     // Twenty minutes, climbing from level 8
//!     let program = ResistanceProgram::new(8, 20, ProgramKind::RampUp);
//!     let session = Session::new(program)?;
//!
//!     let mut runner = SessionRunner::new(transport, config, session);
//!     let record = runner.run().await?;
//!     println!("{} km in {:?}", record.summary.distance, record.summary.duration);
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport
pub mod ble;
/// Error types and handling
pub mod error;
/// Resistance programs and level schedules
pub mod program;
/// Command frames and notification classification
pub mod protocol;
/// Workout session state machine
pub mod session;
/// Telemetry frame decoding
pub mod telemetry;
/// Transport traits
pub mod transport;
/// Configuration and shared data types
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BleConnection, BleTransport};
pub use error::{BikeError, Result};
pub use program::{build_schedule, LevelSchedule, ProgramKind, ResistanceProgram};
pub use protocol::{decode_notification, Command, Notification};
pub use session::{
    SampleAction, Session, SessionRecord, SessionRunner, SessionStore, SessionSummary,
    TelemetrySink,
};
pub use telemetry::{parse_telemetry, TelemetrySample};
pub use transport::{Connection, NotificationSender, Transport};
pub use types::{
    DeviceInfo, RetryPolicy, ScanParams, SessionConfig, SessionOutcome, SessionState,
    TimingConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
