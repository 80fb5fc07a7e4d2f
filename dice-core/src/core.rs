//! Host-driven session state machine: SessionCore receives events from the host, returns actions.
//!
//! The host owns the transport (listener, initiator, connection) and the collaborators (screen,
//! alerts, peer picker). It must serialize every call into one `SessionCore`, typically by keeping
//! it behind a single mutex, and execute the returned actions in order.

use tracing::debug;

use crate::protocol::{Message, PeerAddress, Role};

/// Connection-status text shown whenever no link is up.
pub const NO_DEVICE_STATUS: &str = "No device connected. Pull to refresh.";

/// Lifecycle of the session. Only `Connected` permits application traffic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Identifies one establishment attempt and the connection it yields.
/// Events carrying an older id than the current one are stale and ignored.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// How the host should establish the link for the current role.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Establish {
    /// Open a connection to the peer, then announce `announce` before anything else.
    Connect { announce: Role },
    /// Advertise the service and accept exactly one peer.
    Listen,
}

/// Screen update for the UI collaborator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UiUpdate {
    /// Connection status line.
    Status(String),
    DiceValue(String),
    /// "Ready to roll", "Sent: 4", "Received: 4", ...
    DiceStatus(String),
    RollEnabled(bool),
    ToggleLabel(String),
    /// Show a busy indicator with the given text, or hide it.
    Progress(Option<String>),
}

/// Action for host to perform, in order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Action {
    Ui(UiUpdate),
    /// Roll arrived while the app is in the background.
    Alert { value: u8 },
    /// Write on the live connection. Best effort.
    Send(Message),
    Establish {
        link: LinkId,
        peer: PeerAddress,
        how: Establish,
    },
    /// Cancel whatever is active, then call `begin_teardown` / `finish_teardown`.
    Teardown,
    /// Ask the peer supplier for the paired peer and call `on_start`.
    Start,
}

/// Protocol state for one device: role, session state and the current link.
pub struct SessionCore {
    role: Role,
    state: SessionState,
    foreground: bool,
    link: Option<LinkId>,
    next_link: u64,
    peer: Option<PeerAddress>,
}

impl SessionCore {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            foreground: true,
            link: None,
            next_link: 0,
            peer: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Link currently being established or carried, if any.
    pub fn current_link(&self) -> Option<LinkId> {
        self.link
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Visibility changed. Rolls received while not in the foreground also raise an alert.
    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    /// What the screen should show before anything has happened.
    pub fn initial_view(&self) -> Vec<Action> {
        let mut out = self.affordances();
        out.push(status(NO_DEVICE_STATUS));
        out
    }

    /// Roll control, toggle label and dice status for the current role.
    pub fn affordances(&self) -> Vec<Action> {
        let (label, dice_status) = match self.role {
            Role::Sender => ("Switch to Receiver", "Ready to roll"),
            Role::Receiver => ("Switch to Sender", "Waiting for roll..."),
        };
        vec![
            Action::Ui(UiUpdate::RollEnabled(self.role == Role::Sender)),
            Action::Ui(UiUpdate::ToggleLabel(label.to_string())),
            Action::Ui(UiUpdate::DiceStatus(dice_status.to_string())),
        ]
    }

    /// Begin a session with the paired peer. Sender connects, Receiver listens.
    pub fn on_start(&mut self, peer: Option<PeerAddress>) -> Vec<Action> {
        if self.state != SessionState::Idle {
            debug!(state = ?self.state, "start ignored, session already active");
            return Vec::new();
        }
        let Some(peer) = peer else {
            debug!("start without a paired peer");
            return vec![status(NO_DEVICE_STATUS)];
        };

        self.next_link += 1;
        let link = LinkId(self.next_link);
        self.link = Some(link);
        self.state = SessionState::Connecting;
        self.peer = Some(peer.clone());
        debug!(link = link.0, role = %self.role, peer = %peer, "connecting");

        let (progress, how) = match self.role {
            Role::Sender => (
                "Connecting to receiver...",
                Establish::Connect {
                    announce: self.role,
                },
            ),
            Role::Receiver => ("Waiting for connection...", Establish::Listen),
        };
        let mut out = vec![
            status(format!("Connecting to device: {} ...", peer.name)),
            Action::Ui(UiUpdate::Progress(Some(progress.to_string()))),
            Action::Establish { link, peer, how },
        ];
        out.extend(self.affordances());
        out
    }

    /// The accept or connect for `link` succeeded.
    /// Returns `None` when the attempt is stale; the host must close that connection.
    pub fn on_established(&mut self, link: LinkId) -> Option<Vec<Action>> {
        if !self.is_current(link, SessionState::Connecting) {
            debug!(link = link.0, "discarding stale connection");
            return None;
        }
        self.state = SessionState::Connected;
        let name = self
            .peer
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        debug!(link = link.0, "connected");
        Some(vec![
            status(format!("Connected to: {name}")),
            Action::Ui(UiUpdate::Progress(None)),
        ])
    }

    /// The accept or connect for `link` failed or was aborted.
    pub fn on_establish_failed(&mut self, link: LinkId) -> Vec<Action> {
        if !self.is_current(link, SessionState::Connecting) {
            return Vec::new();
        }
        self.link = None;
        self.peer = None;
        self.state = SessionState::Idle;
        vec![
            status(NO_DEVICE_STATUS),
            Action::Ui(UiUpdate::Progress(None)),
        ]
    }

    /// Dispatch one message read on `link`.
    pub fn on_message(&mut self, link: LinkId, msg: Message) -> Vec<Action> {
        if !self.is_current(link, SessionState::Connected) {
            debug!(link = link.0, ?msg, "ignoring message from stale link");
            return Vec::new();
        }
        match msg {
            Message::DiceRoll { value } => {
                let mut out = vec![
                    Action::Ui(UiUpdate::Progress(None)),
                    Action::Ui(UiUpdate::DiceValue(value.to_string())),
                    Action::Ui(UiUpdate::DiceStatus(format!("Received: {value}"))),
                ];
                if !self.foreground {
                    out.push(Action::Alert { value });
                }
                out
            }
            Message::RoleAnnounce { role } => {
                // The peer announces its own role; we take the other one.
                self.role = role.complement();
                debug!(announced = %role, local = %self.role, "role announced");
                let mut out = vec![Action::Ui(UiUpdate::Progress(None))];
                out.extend(self.affordances());
                out
            }
            Message::SwitchRequest => {
                self.role = self.role.complement();
                let mut out = self.affordances();
                out.push(Action::Send(Message::SwitchAck));
                out.extend([Action::Teardown, Action::Start]);
                out
            }
            Message::SwitchAck => {
                self.role = self.role.complement();
                let mut out = self.affordances();
                out.extend([Action::Teardown, Action::Start]);
                out
            }
        }
    }

    /// Reading `link` failed: peer closed, undecodable bytes or local abort.
    pub fn on_link_lost(&mut self, link: LinkId) -> Vec<Action> {
        if !self.is_current(link, SessionState::Connected) {
            return Vec::new();
        }
        vec![Action::Teardown]
    }

    /// Local roll of `value`. Doubles as "reconnect" when not an active sender.
    pub fn on_roll(&mut self, value: u8) -> Vec<Action> {
        if self.role != Role::Sender || self.state != SessionState::Connected {
            debug!(role = %self.role, state = ?self.state, "roll repurposed as reconnect");
            return vec![Action::Teardown, Action::Start];
        }
        vec![
            Action::Ui(UiUpdate::DiceValue(value.to_string())),
            Action::Ui(UiUpdate::DiceStatus(format!("Sent: {value}"))),
            Action::Send(Message::DiceRoll { value }),
        ]
    }

    /// User asked to swap roles. With a live link the swap waits for the peer's ack.
    pub fn on_switch_requested(&mut self) -> Vec<Action> {
        if self.state == SessionState::Connected {
            return vec![Action::Send(Message::SwitchRequest)];
        }
        self.role = self.role.complement();
        let mut out = self.affordances();
        out.extend([Action::Teardown, Action::Start]);
        out
    }

    /// Host is about to cancel the listener, initiator and connection.
    pub fn begin_teardown(&mut self) {
        self.state = SessionState::ShuttingDown;
        self.link = None;
        self.peer = None;
    }

    /// Host has released every transport resource.
    pub fn finish_teardown(&mut self) -> Vec<Action> {
        self.state = SessionState::Idle;
        vec![status(NO_DEVICE_STATUS)]
    }

    fn is_current(&self, link: LinkId, state: SessionState) -> bool {
        self.link == Some(link) && self.state == state
    }
}

fn status(text: impl Into<String>) -> Action {
    Action::Ui(UiUpdate::Status(text.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerAddress {
        PeerAddress::new("tablet", "127.0.0.1:45690".parse().unwrap())
    }

    fn establish_link(actions: &[Action]) -> LinkId {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Establish { link, .. } => Some(*link),
                _ => None,
            })
            .expect("expected Establish")
    }

    fn connected(role: Role) -> (SessionCore, LinkId) {
        let mut core = SessionCore::new(role);
        let link = establish_link(&core.on_start(Some(peer())));
        core.on_established(link).expect("current link");
        (core, link)
    }

    #[test]
    fn sender_connects_and_announces_itself() {
        let mut core = SessionCore::new(Role::Sender);
        let actions = core.on_start(Some(peer()));
        assert_eq!(core.state(), SessionState::Connecting);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Establish {
                how: Establish::Connect {
                    announce: Role::Sender
                },
                ..
            }
        )));
    }

    #[test]
    fn receiver_listens() {
        let mut core = SessionCore::new(Role::Receiver);
        let actions = core.on_start(Some(peer()));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Establish {
                how: Establish::Listen,
                ..
            }
        )));
    }

    #[test]
    fn start_without_peer_stays_idle() {
        let mut core = SessionCore::new(Role::Sender);
        let actions = core.on_start(None);
        assert_eq!(core.state(), SessionState::Idle);
        assert_eq!(actions, vec![status(NO_DEVICE_STATUS)]);
    }

    #[test]
    fn start_while_connected_is_noop() {
        let (mut core, link) = connected(Role::Sender);
        assert!(core.on_start(Some(peer())).is_empty());
        assert_eq!(core.current_link(), Some(link));
    }

    #[test]
    fn role_announce_sender_makes_us_receiver() {
        let (mut core, link) = connected(Role::Receiver);
        core.on_message(
            link,
            Message::RoleAnnounce {
                role: Role::Receiver,
            },
        );
        assert_eq!(core.role(), Role::Sender);

        let actions = core.on_message(link, Message::RoleAnnounce { role: Role::Sender });
        assert_eq!(core.role(), Role::Receiver);
        assert!(actions.contains(&Action::Ui(UiUpdate::RollEnabled(false))));
        assert_eq!(core.state(), SessionState::Connected);
    }

    #[test]
    fn dice_roll_alerts_only_in_background() {
        let (mut core, link) = connected(Role::Receiver);
        let actions = core.on_message(link, Message::DiceRoll { value: 5 });
        assert!(actions.contains(&Action::Ui(UiUpdate::DiceValue("5".into()))));
        assert!(!actions.iter().any(|a| matches!(a, Action::Alert { .. })));

        core.set_foreground(false);
        let actions = core.on_message(link, Message::DiceRoll { value: 2 });
        assert!(actions.contains(&Action::Alert { value: 2 }));
        assert_eq!(core.role(), Role::Receiver);
        assert_eq!(core.state(), SessionState::Connected);
    }

    #[test]
    fn switch_request_flips_acks_then_restarts() {
        let (mut core, link) = connected(Role::Receiver);
        let actions = core.on_message(link, Message::SwitchRequest);
        assert_eq!(core.role(), Role::Sender);
        assert!(actions.ends_with(&[
            Action::Send(Message::SwitchAck),
            Action::Teardown,
            Action::Start
        ]));
    }

    #[test]
    fn switch_ack_flips_and_restarts() {
        let (mut core, link) = connected(Role::Sender);
        let actions = core.on_message(link, Message::SwitchAck);
        assert_eq!(core.role(), Role::Receiver);
        assert!(!actions.iter().any(|a| matches!(a, Action::Send(_))));
        assert!(actions.ends_with(&[Action::Teardown, Action::Start]));
    }

    #[test]
    fn switch_request_with_live_link_waits_for_ack() {
        let (mut core, _) = connected(Role::Sender);
        let actions = core.on_switch_requested();
        assert_eq!(actions, vec![Action::Send(Message::SwitchRequest)]);
        assert_eq!(core.role(), Role::Sender);
    }

    #[test]
    fn switch_without_link_flips_locally() {
        let mut core = SessionCore::new(Role::Sender);
        let actions = core.on_switch_requested();
        assert_eq!(core.role(), Role::Receiver);
        assert!(actions.ends_with(&[Action::Teardown, Action::Start]));
    }

    #[test]
    fn roll_sends_only_as_connected_sender() {
        let (mut core, _) = connected(Role::Sender);
        let actions = core.on_roll(4);
        assert!(actions.contains(&Action::Send(Message::DiceRoll { value: 4 })));
        assert!(actions.contains(&Action::Ui(UiUpdate::DiceStatus("Sent: 4".into()))));

        let (mut core, _) = connected(Role::Receiver);
        assert_eq!(core.on_roll(4), vec![Action::Teardown, Action::Start]);

        let mut core = SessionCore::new(Role::Sender);
        assert_eq!(core.on_roll(4), vec![Action::Teardown, Action::Start]);
    }

    #[test]
    fn link_lost_tears_down_once() {
        let (mut core, link) = connected(Role::Sender);
        assert_eq!(core.on_link_lost(link), vec![Action::Teardown]);
        core.begin_teardown();
        assert_eq!(core.state(), SessionState::ShuttingDown);
        core.finish_teardown();
        assert_eq!(core.state(), SessionState::Idle);
        assert!(core.on_link_lost(link).is_empty());
    }

    #[test]
    fn teardown_twice_is_idle_both_times() {
        let (mut core, _) = connected(Role::Sender);
        for _ in 0..2 {
            core.begin_teardown();
            assert_eq!(core.finish_teardown(), vec![status(NO_DEVICE_STATUS)]);
            assert_eq!(core.state(), SessionState::Idle);
            assert_eq!(core.current_link(), None);
        }
    }

    #[test]
    fn stale_link_events_are_ignored() {
        let (mut core, old) = connected(Role::Sender);
        core.begin_teardown();
        core.finish_teardown();
        let new = establish_link(&core.on_start(Some(peer())));
        assert_ne!(old, new);
        assert!(core.on_established(old).is_none());
        assert!(core.on_establish_failed(old).is_empty());
        assert!(core
            .on_message(old, Message::DiceRoll { value: 1 })
            .is_empty());
        assert_eq!(core.state(), SessionState::Connecting);
        assert!(core.on_established(new).is_some());
    }

    #[test]
    fn establish_failure_returns_to_idle() {
        let mut core = SessionCore::new(Role::Receiver);
        let link = establish_link(&core.on_start(Some(peer())));
        let actions = core.on_establish_failed(link);
        assert_eq!(core.state(), SessionState::Idle);
        assert!(actions.contains(&status(NO_DEVICE_STATUS)));
    }
}
