//! CLI command implementations.

use anyhow::{bail, Context, Result};
use confab_core::config::ConversationConfig;
use confab_core::identity::PeerId;
use confab_core::notify::{Notification, NotificationSink};
use confab_core::transport::{ExchangeCall, MemoryTransport};
use confab_core::trust::TrustStore;
use confab_core::verify::{generate_pin, Secret};
use confab_core::{Conversation, SendOutcome};
use rand::rngs::OsRng;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const TRUST_FILE: &str = "trust.bin";

/// Prints user-facing notifications, prefixed with whose screen they are on.
struct ConsoleSink {
    who: &'static str,
}

impl NotificationSink for ConsoleSink {
    fn notify(&self, notification: Notification) {
        let text = notification.to_string();
        if text.is_empty() {
            return;
        }
        match &notification {
            Notification::ShareSecret { secret, .. } => {
                println!("[{}] {}: {}", self.who, text, secret.as_str())
            }
            _ => println!("[{}] {}", self.who, text),
        }
    }
}

fn trust_path(data_dir: &str) -> String {
    format!("{}/{}", data_dir, TRUST_FILE)
}

fn load_trust(data_dir: &str) -> Result<TrustStore> {
    let path = trust_path(data_dir);
    if !Path::new(&path).exists() {
        return Ok(TrustStore::new());
    }
    let bytes = std::fs::read(&path).context("Failed to read trust table")?;
    TrustStore::from_bytes(&bytes).context("Trust table is corrupt")
}

fn save_trust(data_dir: &str, trust: &TrustStore) -> Result<()> {
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    let bytes = trust.to_bytes().context("Failed to encode trust table")?;
    std::fs::write(trust_path(data_dir), bytes).context("Failed to write trust table")?;
    Ok(())
}

fn print_trust(trust: &TrustStore) -> Result<()> {
    let snapshot = trust.snapshot().context("Failed to read trust table")?;
    if snapshot.is_empty() {
        println!("No known fingerprints.");
        return Ok(());
    }
    for peer in snapshot {
        println!("{}", peer.peer);
        for known in peer.fingerprints {
            let flag = if known.trusted { "trusted" } else { "untrusted" };
            println!("  {}  {}", known.fingerprint.to_display(), flag);
        }
    }
    Ok(())
}

/// Print a fresh PIN.
pub async fn print_pin() -> Result<()> {
    let mut config = ConversationConfig::default();
    config.apply_env();
    let pin = generate_pin(&mut OsRng, config.pin_digits).context("Failed to generate PIN")?;
    println!("{}", pin.as_str());
    Ok(())
}

/// Show the persisted trust table.
pub async fn show_trust(data_dir: &str) -> Result<()> {
    let trust = load_trust(data_dir)?;
    print_trust(&trust)
}

/// Run a verification and delayed delivery between two local parties.
pub async fn simulate(data_dir: &str, mismatch: bool, delayed: usize) -> Result<()> {
    let mut config = ConversationConfig::default();
    config.apply_env();

    let trust = load_trust(data_dir)?;
    let (alice_link, bob_link) = MemoryTransport::pair(b"alice-key", b"bob-key");

    let alice = Conversation::builder(PeerId::new("bob@confab.local"), alice_link.clone())
        .peer_name("Bob")
        .account_name("alice")
        .resource("laptop")
        .trust(trust.clone())
        .sink(Arc::new(ConsoleSink { who: "alice" }))
        .config(config.clone())
        .build()
        .context("Failed to create conversation")?;
    let bob = Conversation::builder(PeerId::new("alice@confab.local"), bob_link.clone())
        .peer_name("Alice")
        .account_name("bob")
        .resource("phone")
        .sink(Arc::new(ConsoleSink { who: "bob" }))
        .config(config)
        .build()
        .context("Failed to create conversation")?;

    alice_link.attach(alice.event_sender()?);
    bob_link.attach(bob.event_sender()?);

    alice.on_private_started()?;
    bob.on_private_started()?;

    info!("Alice starts verification");
    alice.start_verification()?;
    let Some(pin) = alice_link.exchanges().into_iter().find_map(|call| match call {
        ExchangeCall::Start { secret, .. } => Some(secret),
        _ => None,
    }) else {
        bail!("Verification did not start");
    };
    bob.drain_events();

    let answer = if mismatch {
        wrong_pin(&pin)
    } else {
        pin
    };
    match bob.answer_verification(answer) {
        Ok(()) => {}
        Err(e) if e.is_user_recoverable() => warn!(error = %e, "Verification answer failed"),
        Err(e) => return Err(e).context("Failed to answer verification"),
    }
    alice.drain_events();
    bob.drain_events();

    if delayed > 0 {
        alice_link.delay_next(delayed);
        for i in 1..=delayed {
            match alice.send(&format!("message {} written before Bob was reachable", i))? {
                SendOutcome::Delayed { trace } => info!(trace = %trace, "Message delayed"),
                other => warn!(outcome = ?other, "Expected a delayed send"),
            }
        }
        let confirmed = alice_link.confirm_delayed()?;
        info!(confirmed, "Delivery confirmed");
        alice.drain_events();
    }
    alice.send("hello Bob")?;

    println!("\n=== alice ===\n{}", alice.history_text()?);
    let pending = alice.pending_text()?;
    if !pending.is_empty() {
        println!("--- pending ---\n{}", pending);
    }
    println!("\n=== bob ===\n{}", bob.history_text()?);
    println!(
        "\nverification: alice {:?}, bob {:?}",
        alice.verification_state()?,
        bob.verification_state()?
    );

    println!("\n=== trust ===");
    print_trust(&trust)?;
    save_trust(data_dir, &trust)?;
    println!("\nTrust table saved to {}", trust_path(data_dir));

    Ok(())
}

/// Same width, last digit changed.
fn wrong_pin(pin: &Secret) -> Secret {
    let mut digits: Vec<char> = pin.as_str().chars().collect();
    if let Some(last) = digits.last_mut() {
        *last = if *last == '0' { '1' } else { '0' };
    }
    Secret::new(digits.into_iter().collect::<String>())
}
