//! Integration tests for confab end-to-end scenarios.
//!
//! Two conversations are wired to paired in-memory transports so that
//! verification, delayed delivery and compaction run through the public
//! API only.

use chrono::{Duration, TimeZone, Utc};
use confab_core::clock::ManualClock;
use confab_core::identity::PeerId;
use confab_core::notify::{Notification, RecordingSink};
use confab_core::pending::TraceId;
use confab_core::transcript::{TimedMark, Transcript, TranscriptEntry, ViewKind};
use confab_core::transport::memory::fingerprint_of;
use confab_core::transport::{ExchangeCall, MemoryTransport};
use confab_core::trust::TrustStore;
use confab_core::verify::{Secret, VerificationState};
use confab_core::{Conversation, Error, SendOutcome};
use std::sync::Arc;

struct Party {
    conv: Conversation<MemoryTransport>,
    link: Arc<MemoryTransport>,
    sink: Arc<RecordingSink>,
    trust: TrustStore,
}

fn party(peer: &str, name: &str, link: Arc<MemoryTransport>) -> Party {
    let sink = Arc::new(RecordingSink::new());
    let trust = TrustStore::new();
    let conv = Conversation::builder(PeerId::new(peer), link.clone())
        .peer_name(name)
        .account_name(name.to_lowercase())
        .trust(trust.clone())
        .sink(sink.clone())
        .build()
        .expect("build conversation");
    link.attach(conv.event_sender().expect("event sender"));
    Party {
        conv,
        link,
        sink,
        trust,
    }
}

/// Alice talks to Bob, Bob talks to Alice.
fn pair() -> (Party, Party) {
    let (a, b) = MemoryTransport::pair(b"alice-key", b"bob-key");
    (party("bob@example.org", "Bob", a), party("alice@example.org", "Alice", b))
}

fn started_pin(link: &MemoryTransport) -> Secret {
    link.exchanges()
        .into_iter()
        .find_map(|call| match call {
            ExchangeCall::Start { secret, .. } => Some(secret),
            ExchangeCall::Finish { .. } => None,
        })
        .expect("exchange started")
}

/// Initiator verifies, the peer answers with the shared PIN, and the
/// fingerprint recorded as untrusted becomes trusted.
#[test]
fn test_e2e_verification_trusts_fingerprint() {
    let (alice, bob) = pair();
    let bob_key = fingerprint_of(b"bob-key");

    let status = alice
        .conv
        .on_fingerprint_observed(alice.conv.peer(), &bob_key)
        .expect("observe");
    assert!(status.is_new);
    assert!(!status.is_trusted);

    alice.conv.start_verification().expect("start verification");
    assert_eq!(
        alice.conv.verification_state().unwrap(),
        VerificationState::WaitingForPeer
    );

    let pin = started_pin(&alice.link);
    assert_eq!(pin.as_str().len(), 6);
    assert!(pin.as_str().chars().all(|c| c.is_ascii_digit()));
    assert!(alice.sink.any(|n| matches!(n, Notification::ShareSecret { secret, .. } if *secret == pin)));

    // Bob receives the request and answers.
    assert_eq!(bob.conv.drain_events(), 1);
    assert_eq!(
        bob.conv.verification_state().unwrap(),
        VerificationState::PeerRequestsSecret
    );
    bob.conv.answer_verification(pin).expect("answer");

    alice.conv.drain_events();
    bob.conv.drain_events();

    assert_eq!(alice.conv.verification_state().unwrap(), VerificationState::Success);
    assert_eq!(bob.conv.verification_state().unwrap(), VerificationState::Success);
    assert!(alice.trust.is_trusted(alice.conv.peer(), &bob_key).unwrap());
    assert!(bob
        .trust
        .is_trusted(bob.conv.peer(), &fingerprint_of(b"alice-key"))
        .unwrap());
    assert!(alice.sink.any(|n| matches!(n, Notification::VerificationSucceeded { .. })));
}

#[test]
fn test_e2e_verification_mismatch_keeps_trust() {
    let (alice, bob) = pair();
    let bob_key = fingerprint_of(b"bob-key");

    alice.conv.start_verification().expect("start verification");
    bob.conv.drain_events();
    bob.conv
        .answer_verification(Secret::new("not-the-pin"))
        .expect("answer");

    alice.conv.drain_events();
    bob.conv.drain_events();

    assert_eq!(alice.conv.verification_state().unwrap(), VerificationState::Failure);
    assert_eq!(bob.conv.verification_state().unwrap(), VerificationState::Failure);
    assert!(!alice.trust.is_trusted(alice.conv.peer(), &bob_key).unwrap());
    assert_eq!(alice.trust.fingerprints(alice.conv.peer()).unwrap().len(), 1);
    assert!(alice.sink.any(|n| *n == Notification::VerificationFailed { peer: "Bob".into() }));
    assert!(alice.sink.any(|n| *n == Notification::VerificationWarning { visible: true }));

    // A new session can start right away.
    assert!(alice.conv.start_verification().is_ok());
}

#[test]
fn test_smp_failure_surfaces_protocol_failure() {
    let (alice, _bob) = pair();
    alice.conv.start_verification().expect("start verification");
    let err = alice
        .conv
        .on_smp_event(confab_core::verify::SmpEvent::Failure)
        .unwrap_err();
    assert_eq!(err, Error::ProtocolFailure);
    assert!(err.is_user_recoverable());
}

#[test]
fn test_start_while_waiting_is_rejected() {
    let (alice, bob) = pair();
    alice.conv.start_verification().expect("start verification");
    assert_eq!(
        alice.conv.start_verification().unwrap_err(),
        Error::AlreadyInProgress
    );

    // Bob starting too does not take over Alice's session.
    bob.conv.start_verification().expect("bob starts");
    alice.conv.drain_events();
    assert_eq!(
        alice.conv.verification_state().unwrap(),
        VerificationState::WaitingForPeer
    );
    assert!(alice
        .sink
        .any(|n| matches!(n, Notification::VerificationAlreadyStarted { .. })));
}

#[test]
fn test_concurrent_starts_yield_one_session() {
    let (alice, _bob) = pair();
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| alice.conv.start_verification()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == Error::AlreadyInProgress));
    assert_eq!(
        alice
            .link
            .exchanges()
            .iter()
            .filter(|c| matches!(c, ExchangeCall::Start { .. }))
            .count(),
        1
    );
}

#[test]
fn test_cancel_then_restart() {
    let (alice, _bob) = pair();
    alice.conv.start_verification().expect("start verification");
    alice.conv.cancel_verification().expect("cancel");
    assert_eq!(
        alice.conv.verification_state().unwrap(),
        VerificationState::Unverified
    );
    assert!(alice.sink.any(|n| *n == Notification::ClearVerificationNotices));
    alice.conv.start_verification().expect("restart");
}

/// Delayed send with trace 7 sits alone at offset 0 in the pending view
/// and moves into history once delivery is confirmed.
#[test]
fn test_delayed_message_replayed_on_confirmation() {
    let (alice, _bob) = pair();
    alice.link.set_next_trace(7);
    alice.link.delay_next(1);

    let outcome = alice.conv.send("are you there?").expect("send");
    assert_eq!(outcome, SendOutcome::Delayed { trace: TraceId(7) });
    assert_eq!(alice.conv.pending_len().unwrap(), 1);
    assert!(alice.sink.any(|n| matches!(
        n,
        Notification::Appended { view: ViewKind::Pending, slice } if slice.start == 0
    )));
    assert!(alice.conv.history_text().unwrap().is_empty());

    assert_eq!(alice.conv.on_delivery_confirmed(TraceId(7)).unwrap(), 1);
    assert!(alice.conv.pending_text().unwrap().is_empty());
    assert_eq!(alice.conv.pending_len().unwrap(), 0);
    assert!(alice.conv.history_text().unwrap().contains("are you there?"));

    // A second confirmation does not duplicate it.
    assert_eq!(alice.conv.on_delivery_confirmed(TraceId(7)).unwrap(), 0);
    assert_eq!(
        alice.conv.history_text().unwrap().matches("are you there?").count(),
        1
    );
}

#[test]
fn test_confirmations_through_event_queue() {
    let (alice, _bob) = pair();
    alice.link.delay_next(3);
    for text in ["one", "two", "three"] {
        alice.conv.send(text).expect("send");
    }
    assert_eq!(alice.link.confirm_delayed().unwrap(), 3);
    assert_eq!(alice.conv.drain_events(), 3);

    assert_eq!(alice.conv.pending_len().unwrap(), 0);
    let history = alice.conv.history_text().unwrap();
    let positions: Vec<_> = ["one", "two", "three"]
        .iter()
        .map(|t| history.find(t).expect("replayed"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(alice.sink.any(|n| *n == Notification::PendingView { visible: false }));
}

#[test]
fn test_transcript_compaction_rebases_marks() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let minutes = |m| t0 + Duration::minutes(m);
    let mut transcript = Transcript::new();

    // "[00:00:00] " is 11 characters; marks sit past the line separator.
    transcript.mark_at(minutes(0));
    transcript.append(&TranscriptEntry::status("a".repeat(38), minutes(0)), ViewKind::History);
    transcript.mark_at(minutes(10));
    transcript.append(&TranscriptEntry::status("b".repeat(58), minutes(10)), ViewKind::History);
    transcript.mark_at(minutes(20));
    transcript.append(&TranscriptEntry::status("c".repeat(10), minutes(20)), ViewKind::History);

    let offsets: Vec<_> = transcript.marks().iter().map(|m| m.offset).collect();
    assert_eq!(offsets, vec![0, 50, 120]);

    assert_eq!(transcript.compact(minutes(15)), 50);
    assert_eq!(transcript.marks(), &[TimedMark { at: minutes(20), offset: 70 }]);
    assert!(transcript.history().text().starts_with("[00:10:00] bbb"));
    assert!(transcript.history().text()[70..].starts_with("[00:20:00] ccc"));

    // Earlier cutoffs change nothing.
    assert_eq!(transcript.compact(minutes(15)), 0);
    assert_eq!(transcript.compact(minutes(1)), 0);
    assert_eq!(transcript.marks().len(), 1);
}

#[test]
fn test_hidden_conversation_compacts_with_retention_window() {
    let link = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
    ));
    let conv = Conversation::builder(PeerId::new("bob@example.org"), link)
        .clock(clock.clone())
        .build()
        .expect("build conversation");

    conv.send("first").unwrap();
    clock.advance(Duration::minutes(5));
    conv.send("second").unwrap();
    clock.advance(Duration::minutes(30));
    assert_eq!(conv.on_hidden().unwrap(), 0);

    // While hidden the window passes; showing again catches up.
    clock.advance(Duration::minutes(45));
    conv.send("third").unwrap();
    clock.advance(Duration::minutes(15));
    let removed = conv.on_shown().unwrap();
    assert!(removed > 0);
    let history = conv.history_text().unwrap();
    assert!(!history.contains("first"));
    assert!(history.contains("second"));
    assert!(history.contains("third"));
}

#[test]
fn test_trust_survives_persistence() {
    let (alice, bob) = pair();
    alice.conv.start_verification().unwrap();
    bob.conv.drain_events();
    bob.conv
        .answer_verification(started_pin(&alice.link))
        .unwrap();
    alice.conv.drain_events();

    let bytes = alice.trust.to_bytes().unwrap();
    let restored = TrustStore::from_bytes(&bytes).unwrap();
    assert!(restored
        .is_trusted(alice.conv.peer(), &fingerprint_of(b"bob-key"))
        .unwrap());
}
