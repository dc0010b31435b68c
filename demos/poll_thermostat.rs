use cometblue::{BleLinkParams, BleLinkProvider, CometBlueDevice, SessionConfig, StatusFlag};
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Usage: `poll_thermostat <MAC> [PIN] [TARGET_CELSIUS]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        error!("Usage: poll_thermostat <MAC> [PIN] [TARGET_CELSIUS]");
        return Ok(());
    };
    let pin = args.next().map(|pin| pin.parse()).transpose()?.unwrap_or(0);
    let target: Option<f32> = args.next().map(|t| t.parse()).transpose()?;

    info!("🌡️ Comet Blue Poller Example");

    let provider = BleLinkProvider::new(BleLinkParams::default()).await?;
    let config = SessionConfig::new(address).with_pin(pin);
    let mut thermostat = CometBlueDevice::new(config, provider);

    if let Some(target) = target {
        thermostat.set_manual_temperature(target)?;
        info!("Staged target temperature {target:.1}°C");
    }

    let mut poll_interval = interval(Duration::from_secs(30));
    loop {
        poll_interval.tick().await;

        if !thermostat.update().await {
            continue;
        }

        if !thermostat.is_available() {
            warn!("❌ {} unavailable, will retry", thermostat.address());
            continue;
        }

        info!("📊 {}", thermostat.address());
        info!("  Room:   {:?} °C", thermostat.current_temperature());
        info!("  Target: {:?} °C", thermostat.manual_temperature());
        info!(
            "  Eco/Comfort: {:?} / {:?} °C",
            thermostat.target_low_temperature(),
            thermostat.target_high_temperature()
        );
        for flag in StatusFlag::ALL {
            if thermostat.status_flag(flag) == Some(true) {
                info!("  Flag: {flag}");
            }
        }
        if let Some(bits) = thermostat.unused_status_bits().filter(|&bits| bits != 0) {
            info!("  Unknown status bits: {bits:#08X}");
        }
    }
}
