//! Bring up two ECUs on a virtual bus, let them claim addresses, partner
//! them with each other, and exchange a message.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use fieldbus::{NetworkConfig, NetworkManager, PgnCallback};
use fieldbus_frame::{Name, NameField, NameFilter, Priority};
use fieldbus_hardware::{HardwareInterface, VirtualBus};

const CLIMATE_FUNCTION: u8 = 0x81;
const SEAT_FUNCTION: u8 = 0x82;
const DEMO_PGN: u32 = 0x00EF00;

#[derive(Parser)]
#[command(about = "fieldbus address-claim demo on a virtual bus")]
struct Args {
    /// How long to wait for the address claims to settle.
    #[arg(long, default_value_t = 2000)]
    claim_timeout_ms: u64,

    /// Log filter, e.g. "debug" or "fieldbus=trace".
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log)
                .context("invalid log filter")?,
        )
        .init();

    let bus = VirtualBus::new();
    let climate_network = NetworkManager::new(NetworkConfig::default());
    let seat_network = NetworkManager::new(NetworkConfig::default());

    let mut interface = HardwareInterface::new();
    interface.assign_channel(Arc::clone(&climate_network), Box::new(bus.plugin()));
    interface.assign_channel(Arc::clone(&seat_network), Box::new(bus.plugin()));
    if !interface.start() {
        bail!("failed to start the hardware interface");
    }

    let climate_ecu = climate_network
        .create_internal_control_function(demo_name(1, CLIMATE_FUNCTION), 0x1C)
        .context("creating climate ECU")?;
    let seat_ecu = seat_network
        .create_internal_control_function(demo_name(2, SEAT_FUNCTION), 0x1D)
        .context("creating seat ECU")?;

    let seat_partner = climate_network
        .create_partnered_control_function(vec![NameFilter::new(
            NameField::FunctionCode,
            u32::from(SEAT_FUNCTION),
        )]);
    let climate_partner = seat_network
        .create_partnered_control_function(vec![NameFilter::new(
            NameField::FunctionCode,
            u32::from(CLIMATE_FUNCTION),
        )]);

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = Arc::clone(&received);
    let on_message: PgnCallback = Arc::new(move |message| {
        println!(
            "seat ECU received PGN 0x{:05X} from address 0x{:02X}: {:?}",
            message.pgn(),
            message.identifier().source_address(),
            message.data()
        );
        received_clone.fetch_add(1, Ordering::Relaxed);
    });
    climate_partner.add_pgn_callback(DEMO_PGN, on_message, Some(Arc::clone(&seat_ecu)));

    let deadline = Instant::now() + Duration::from_millis(args.claim_timeout_ms);
    while Instant::now() < deadline {
        if climate_ecu.address_valid()
            && seat_ecu.address_valid()
            && seat_partner.address_valid()
            && climate_partner.address_valid()
        {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if !seat_partner.address_valid() || !climate_partner.address_valid() {
        bail!("address claims did not settle in {} ms", args.claim_timeout_ms);
    }

    println!(
        "climate ECU claimed 0x{:02X}, seat ECU claimed 0x{:02X}",
        climate_ecu.address(),
        seat_ecu.address()
    );

    // Climate greets the seat through the partner binding.
    climate_network
        .send(
            DEMO_PGN,
            &[0xDE, 0xAD, 0xBE, 0xEF],
            &climate_ecu,
            Some(&seat_partner),
            Priority::DEFAULT,
            None,
        )
        .context("sending the demo message")?;

    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline && received.load(Ordering::Relaxed) == 0 {
        thread::sleep(Duration::from_millis(10));
    }
    if received.load(Ordering::Relaxed) == 0 {
        bail!("demo message never arrived");
    }

    println!(
        "busload: climate {:.2}%, seat {:.2}%",
        climate_network.estimated_busload(),
        seat_network.estimated_busload()
    );

    interface.stop();
    Ok(())
}

fn demo_name(identity: u32, function: u8) -> Name {
    Name::builder()
        .identity_number(identity)
        .manufacturer_code(69)
        .function_code(function)
        .industry_group(fieldbus_frame::IndustryGroup::OnHighway)
        .arbitrary_address_capable(true)
        .build()
}
