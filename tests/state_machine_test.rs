//! FSM transition-table properties
//!
//! Exercises the contract from the outside: for every pair of states
//! `(S, T)`, a transition request mutates state and notifies the
//! observer iff `T` is in the table for `S` or the move is forced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use peregrine::fsm::{transition_table, Fsm, FsmState, TransitionPayload};

/// Builds an FSM forced into `start`, with an observer call counter.
fn fsm_in_state(start: FsmState) -> (Arc<AtomicUsize>, Fsm) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let fsm = Fsm::new(Box::new(move |_from, _to, _payload| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));
    if start != FsmState::Deregistered {
        assert!(fsm.transition_with(start, TransitionPayload::None, true));
    }
    count.store(0, Ordering::SeqCst);
    (count, fsm)
}

#[test]
fn transition_mutates_iff_tabled_for_every_state_pair() {
    let table = transition_table();

    for from in FsmState::ALL {
        for to in FsmState::ALL {
            let (count, fsm) = fsm_in_state(from);
            let tabled = table[&from].contains(&to);

            let moved = fsm.transition(to, TransitionPayload::None);

            assert_eq!(
                moved, tabled,
                "transition {from} -> {to}: result must match the table"
            );
            let expected_state = if tabled { to } else { from };
            assert_eq!(
                fsm.current_state(),
                expected_state,
                "transition {from} -> {to}: state after the request"
            );
            let expected_calls = usize::from(tabled);
            assert_eq!(
                count.load(Ordering::SeqCst),
                expected_calls,
                "transition {from} -> {to}: observer invocations"
            );
        }
    }
}

#[test]
fn forced_transition_always_mutates_and_notifies() {
    for from in FsmState::ALL {
        for to in FsmState::ALL {
            let (count, fsm) = fsm_in_state(from);

            let moved = fsm.transition_with(to, TransitionPayload::None, true);

            assert!(moved, "forced transition {from} -> {to} must succeed");
            assert_eq!(fsm.current_state(), to);
            assert_eq!(
                count.load(Ordering::SeqCst),
                1,
                "forced transition {from} -> {to} must notify exactly once"
            );
        }
    }
}

#[test]
fn failed_transition_keeps_payload_away_from_observer() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let fsm = Fsm::new(Box::new(move |_from, _to, payload| {
        sink.lock().unwrap().push(payload.clone());
    }));

    // Connected is not reachable from Deregistered.
    assert!(!fsm.transition(
        FsmState::Connected,
        TransitionPayload::Message("must not be delivered".into())
    ));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn payload_reaches_observer_on_tabled_transition() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let fsm = Fsm::new(Box::new(move |from, to, payload| {
        sink.lock().unwrap().push((from, to, payload.clone()));
    }));

    assert!(fsm.transition(FsmState::NoServer, TransitionPayload::Servers(Vec::new())));

    let events = seen.lock().unwrap();
    assert_eq!(
        events.as_slice(),
        &[(
            FsmState::Deregistered,
            FsmState::NoServer,
            TransitionPayload::Servers(Vec::new())
        )]
    );
}
