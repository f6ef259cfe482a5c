//! Peerseal demo binary.
//!
//! Runs a two-user exchange over the simulated key server: Alice encrypts
//! each message for every one of Bob's devices, the envelope crosses the
//! CBOR codec, and every Bob device decrypts it.
//!
//! # Usage
//!
//! ```bash
//! # Two Bob devices, default seed
//! peerseal-demo --message hello
//!
//! # Four devices, one of them failing to wrap, verbose logs
//! RUST_LOG=peerseal_core=debug peerseal-demo --bob-devices 4 --fail-wrap 3 -m hi -m again
//! ```

use clap::Parser;
use peerseal_core::{CoordinatorConfig, EncryptedBox, InitFailurePolicy, KeyGroupId, Uid};
use peerseal_harness::SimWorld;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const ALICE: Uid = 1;
const BOB: Uid = 2;
const ALICE_KEY_GROUP: KeyGroupId = 1;

/// Multi-device envelope encryption demo
#[derive(Parser, Debug)]
#[command(name = "peerseal-demo")]
#[command(about = "Encrypt messages for every device of a peer and decrypt them on each")]
#[command(version)]
struct Args {
    /// Seed for keys, nonces and access hashes
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Number of devices Bob has published
    #[arg(long, default_value = "2")]
    bob_devices: u32,

    /// Messages to send (repeatable)
    #[arg(short, long = "message", default_value = "hello")]
    messages: Vec<String>,

    /// Make Alice's wraps for this Bob key group fail
    #[arg(long)]
    fail_wrap: Option<KeyGroupId>,

    /// Keep requests queued on load failure instead of failing them
    #[arg(long)]
    stall_on_failure: bool,

    /// Coordinator mailbox capacity
    #[arg(long, default_value = "64")]
    mailbox_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = CoordinatorConfig {
        mailbox_capacity: args.mailbox_capacity,
        init_failure: if args.stall_on_failure {
            InitFailurePolicy::Stall
        } else {
            InitFailurePolicy::Surface
        },
        ..CoordinatorConfig::default()
    };

    tracing::info!("Peerseal demo starting (seed {})", args.seed);

    let world = SimWorld::new(args.seed);
    let alice = world.add_device(ALICE, ALICE_KEY_GROUP);
    let bob_devices: Vec<_> =
        (1..=args.bob_devices).map(|key_group_id| world.add_device(BOB, key_group_id)).collect();

    if let Some(key_group_id) = args.fail_wrap {
        tracing::warn!("Injecting wrap failure for Bob key group {}", key_group_id);
        alice.sessions.fail_wrap(key_group_id);
    }

    let alice_directory = alice.directory(config.clone());
    let bob_directories: Vec<_> = bob_devices
        .iter()
        .map(|device| (device.key_group_id, device.directory(config.clone())))
        .collect();

    for message in &args.messages {
        let envelope = match alice_directory.encrypt(BOB, message.as_bytes()).await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Encrypt of {:?} failed: {}", message, e);
                continue;
            },
        };

        let wire = envelope.encode()?;
        tracing::info!(
            "Envelope for {:?}: {} keys, {} bytes on the wire, payload {}..",
            message,
            envelope.keys().len(),
            wire.len(),
            hex::encode(envelope.payload().get(..12).unwrap_or(envelope.payload()))
        );

        for (key_group_id, directory) in &bob_directories {
            let received = EncryptedBox::decode(&wire)?;
            match directory.decrypt(ALICE, received).await {
                Ok(plaintext) => tracing::info!(
                    "Bob device {} decrypted {:?}",
                    key_group_id,
                    String::from_utf8_lossy(&plaintext)
                ),
                Err(e) => tracing::error!("Bob device {} failed to decrypt: {}", key_group_id, e),
            }
        }
    }

    alice_directory.shutdown_all().await;
    for (_, directory) in &bob_directories {
        directory.shutdown_all().await;
    }

    tracing::info!("Peerseal demo finished");

    Ok(())
}
