use pedalers::{
    BikeError, BleTransport, ProgramKind, ResistanceProgram, Result, Session, SessionConfig,
    SessionRunner, TelemetrySample,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

const USAGE: &str = "usage: ride <device-address> <characteristic-uuid> [level] [minutes] [program]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Pedalers Ride Example");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (Some(device_id), Some(characteristic)) = (args.first(), args.get(1)) else {
        eprintln!("{USAGE}");
        return Err(BikeError::InvalidState {
            state: "missing arguments".to_string(),
        });
    };

    let characteristic = Uuid::parse_str(characteristic)
        .map_err(|e| BikeError::Protocol(format!("Invalid characteristic UUID: {e}")))?;
    let level = parse_arg(&args, 2, 5)?;
    let minutes = parse_arg(&args, 3, 20)?;
    let kind: ProgramKind = args.get(4).map_or(Ok(ProgramKind::Constant), |k| k.parse())?;
    let level = u8::try_from(level).map_err(|_| BikeError::InvalidLevel {
        level,
        maximum: pedalers::protocol::MAX_LEVEL,
    })?;

    let program = ResistanceProgram::new(level, minutes, kind);
    let session = match Session::new(program) {
        Ok(session) => session,
        Err(e) => {
            if e.is_configuration_error() {
                eprintln!("{USAGE}");
            }
            error!("❌ Invalid program: {}", e);
            return Err(e);
        }
    };
    info!("📈 Schedule ({}): {:?}", kind, session.schedule().levels());

    let (sample_tx, mut sample_rx) = mpsc::unbounded_channel::<TelemetrySample>();
    let transport = BleTransport::new().await?;
    let mut runner = SessionRunner::new(transport, SessionConfig::new(device_id, characteristic), session)
        .with_sink(sample_tx);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl+C received, stopping the session");
            cancel.cancel();
        }
    });

    tokio::spawn(async move {
        while let Some(sample) = sample_rx.recv().await {
            println!(
                "{} | level {:3} | {:5.1} km/h | {:3} rpm | {:6.1} W | {:3} bpm | {:5.1} km | {:4} kcal",
                sample,
                sample.level,
                sample.speed,
                sample.rpm,
                sample.watt,
                sample.heart_rate,
                sample.distance,
                sample.calories
            );
        }
    });

    let record = match runner.run().await {
        Ok(record) => record,
        Err(e) => {
            error!("❌ Session failed: {}", e);
            return Err(e);
        }
    };

    let summary = &record.summary;
    println!("\n🏁 {} after {} sample(s)", record.outcome, summary.sample_count);
    println!("  Duration:  {:?}", summary.duration);
    println!("  Distance:  {:.1} km", summary.distance);
    println!("  Calories:  {} kcal", summary.calories);
    println!("  Speed:     {:.1} avg / {:.1} max km/h", summary.avg_speed, summary.max_speed);
    println!("  Cadence:   {:.0} avg / {} max rpm", summary.avg_rpm, summary.max_rpm);
    println!("  Power:     {:.1} avg / {:.1} max W", summary.avg_watt, summary.max_watt);
    println!(
        "  Heart:     {:.0} avg / {} max bpm",
        summary.avg_heart_rate, summary.max_heart_rate
    );

    Ok(())
}

fn parse_arg(args: &[String], index: usize, default: u32) -> Result<u32> {
    args.get(index).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|_| BikeError::Protocol(format!("Not a number: {raw}")))
    })
}
