//! Client finite state machine
//!
//! The FSM is the single source of truth for what the client is allowed
//! to do at any moment. It holds the current [`FsmState`], an immutable
//! transition table built at construction, and a caller-supplied
//! observer that is invoked synchronously, on the caller's thread, for
//! every completed transition.
//!
//! Transitions are requested, never queued. A requested transition that
//! is not in the table (and not forced) is a silent no-op returning
//! `false`; callers that require the move must check the return value.
//! The observer must not call back into the same FSM: a re-entrancy
//! guard turns a nested call into a no-op and reports an internal error
//! through `tracing`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::server::{Profile, ServerInfo};

// ---------------------------------------------------------------------------
// FsmState
// ---------------------------------------------------------------------------

/// The closed enumeration of client states.
///
/// Exactly one state is current at a time. The set is fixed: transitions
/// are only legal when listed in the static table for the current state
/// (see [`transition_table`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    /// The app is not registered with the core.
    Deregistered,
    /// Registered, no server chosen yet.
    NoServer,
    /// The user must pick a secure internet location.
    AskLocation,
    /// A server has been chosen and is being prepared.
    ChosenServer,
    /// The OAuth authorization URL has been handed to the observer.
    OAuthStarted,
    /// Valid tokens are available for the chosen server.
    Authorized,
    /// A VPN configuration is being requested from the server API.
    RequestConfig,
    /// The user must pick one of several VPN profiles.
    AskProfile,
    /// A configuration is available but no tunnel is up.
    Disconnected,
    /// The platform layer is bringing the tunnel up.
    Connecting,
    /// The tunnel is up.
    Connected,
    /// The platform layer is tearing the tunnel down.
    Disconnecting,
}

impl FsmState {
    /// All states, in declaration order. Useful for exhaustive table
    /// checks in tests.
    pub const ALL: [FsmState; 12] = [
        FsmState::Deregistered,
        FsmState::NoServer,
        FsmState::AskLocation,
        FsmState::ChosenServer,
        FsmState::OAuthStarted,
        FsmState::Authorized,
        FsmState::RequestConfig,
        FsmState::AskProfile,
        FsmState::Disconnected,
        FsmState::Connecting,
        FsmState::Connected,
        FsmState::Disconnecting,
    ];
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FsmState::Deregistered => "Deregistered",
            FsmState::NoServer => "No_Server",
            FsmState::AskLocation => "Ask_Location",
            FsmState::ChosenServer => "Chosen_Server",
            FsmState::OAuthStarted => "OAuth_Started",
            FsmState::Authorized => "Authorized",
            FsmState::RequestConfig => "Request_Config",
            FsmState::AskProfile => "Ask_Profile",
            FsmState::Disconnected => "Disconnected",
            FsmState::Connecting => "Connecting",
            FsmState::Connected => "Connected",
            FsmState::Disconnecting => "Disconnecting",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// TransitionPayload
// ---------------------------------------------------------------------------

/// Typed payload delivered to the observer on a transition.
///
/// The variant is keyed by the target state so observers in statically
/// typed consumers never need a dynamic escape hatch:
///
/// - [`TransitionPayload::AuthorizationUrl`] accompanies
///   [`FsmState::OAuthStarted`]; the observer is expected to open the
///   URL in a browser.
/// - [`TransitionPayload::Profiles`] accompanies
///   [`FsmState::AskProfile`].
/// - [`TransitionPayload::Servers`] accompanies [`FsmState::NoServer`]
///   after registration, carrying the restored server list.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionPayload {
    /// No payload for this transition.
    None,
    /// Authorization URL to open in the user's browser.
    AuthorizationUrl(String),
    /// VPN profiles the user must choose between.
    Profiles(Vec<Profile>),
    /// Summaries of the currently known servers.
    Servers(Vec<ServerInfo>),
    /// Free-form diagnostic text.
    Message(String),
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Builds the static transition table: each state mapped to the set of
/// states directly reachable from it.
///
/// The table is data, not behavior, so tests can inspect it and assert
/// transition legality exhaustively.
pub fn transition_table() -> HashMap<FsmState, Vec<FsmState>> {
    use FsmState::*;
    let mut table = HashMap::new();
    table.insert(Deregistered, vec![NoServer]);
    table.insert(NoServer, vec![NoServer, AskLocation, ChosenServer, OAuthStarted]);
    table.insert(AskLocation, vec![NoServer, ChosenServer]);
    table.insert(ChosenServer, vec![OAuthStarted, Authorized, NoServer]);
    table.insert(OAuthStarted, vec![Authorized, NoServer, ChosenServer]);
    table.insert(Authorized, vec![OAuthStarted, RequestConfig, NoServer]);
    table.insert(RequestConfig, vec![AskProfile, Disconnected, NoServer]);
    table.insert(AskProfile, vec![RequestConfig, Disconnected, NoServer]);
    table.insert(Disconnected, vec![Connecting, NoServer, OAuthStarted]);
    table.insert(Connecting, vec![Connected, Disconnected]);
    table.insert(Connected, vec![Disconnecting]);
    table.insert(Disconnecting, vec![Disconnected]);
    table
}

// ---------------------------------------------------------------------------
// Fsm
// ---------------------------------------------------------------------------

/// Observer callback invoked on every completed transition.
///
/// Receives `(from, to, payload)` synchronously before the triggering
/// `transition` call returns.
pub type Observer = Box<dyn Fn(FsmState, FsmState, &TransitionPayload) + Send + Sync>;

/// The finite state machine.
///
/// # Examples
///
/// ```
/// use peregrine::fsm::{Fsm, FsmState, TransitionPayload};
///
/// let fsm = Fsm::new(Box::new(|from, to, _payload| {
///     println!("{from} -> {to}");
/// }));
///
/// assert_eq!(fsm.current_state(), FsmState::Deregistered);
/// assert!(fsm.transition(FsmState::NoServer, TransitionPayload::None));
/// assert!(fsm.in_state(FsmState::NoServer));
///
/// // Deregistered is not reachable from NoServer without force.
/// assert!(!fsm.transition(FsmState::Deregistered, TransitionPayload::None));
/// assert!(fsm.in_state(FsmState::NoServer));
/// ```
pub struct Fsm {
    current: RwLock<FsmState>,
    table: HashMap<FsmState, Vec<FsmState>>,
    observer: Observer,
    in_callback: AtomicBool,
}

impl Fsm {
    /// Creates an FSM in [`FsmState::Deregistered`] with the given
    /// observer. The observer is registered once and cannot be replaced.
    pub fn new(observer: Observer) -> Self {
        Self {
            current: RwLock::new(FsmState::Deregistered),
            table: transition_table(),
            observer,
            in_callback: AtomicBool::new(false),
        }
    }

    /// Returns the current state.
    pub fn current_state(&self) -> FsmState {
        *self.current.read().expect("fsm state lock poisoned")
    }

    /// Returns `true` when the current state equals `candidate`.
    pub fn in_state(&self, candidate: FsmState) -> bool {
        self.current_state() == candidate
    }

    /// Requests a transition to `to` along a tabled edge.
    ///
    /// Returns `true` and invokes the observer iff `to` is listed in the
    /// transition table for the current state. Otherwise the state is
    /// unchanged, the observer is not invoked, and `false` is returned.
    pub fn transition(&self, to: FsmState, payload: TransitionPayload) -> bool {
        self.transition_with(to, payload, false)
    }

    /// Requests a transition to `to`, optionally forcing an untabled edge.
    ///
    /// With `force` set the move happens, and the observer is invoked,
    /// even when the edge is not in the table. Forced moves are for
    /// administrative resets (deregistration, OAuth cancellation).
    pub fn transition_with(&self, to: FsmState, payload: TransitionPayload, force: bool) -> bool {
        // Nested transition from inside the observer callback: reject.
        if self.in_callback.load(Ordering::SeqCst) {
            tracing::error!(
                "re-entrant FSM transition to {to} from inside the observer callback; ignoring"
            );
            return false;
        }

        let from = self.current_state();
        let allowed = force
            || self
                .table
                .get(&from)
                .map(|targets| targets.contains(&to))
                .unwrap_or(false);
        if !allowed {
            return false;
        }

        *self.current.write().expect("fsm state lock poisoned") = to;

        self.in_callback.store(true, Ordering::SeqCst);
        (self.observer)(from, to, &payload);
        self.in_callback.store(false, Ordering::SeqCst);
        true
    }

    /// The immutable transition table, exposed as data for inspection.
    pub fn table(&self) -> &HashMap<FsmState, Vec<FsmState>> {
        &self.table
    }
}

impl std::fmt::Debug for Fsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsm")
            .field("current", &self.current_state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
