//! Session controller: owns the role, the session state and the single live connection.
//!
//! All mutation goes through one `tokio::sync::Mutex<Session>`: the establishment task, the read
//! loop and user actions each take the lock, feed an event into `SessionCore`, and execute the
//! returned actions before releasing it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dice_core::{
    Action, Dice, Establish, LinkId, Message, PeerAddress, Role, SessionCore, SessionState,
    UiUpdate,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionError};
use crate::initiator::Initiator;
use crate::listener::Listener;

/// Screen collaborator. Calls arrive from any task; implementations marshal to their own context.
pub trait Notifier: Send + Sync {
    fn set_status(&self, text: &str);
    fn set_dice_value(&self, text: &str);
    fn set_dice_status(&self, text: &str);
    fn set_roll_enabled(&self, enabled: bool);
    fn set_toggle_label(&self, text: &str);
    fn set_progress(&self, text: Option<&str>);
}

/// Push-style alert for rolls that arrive while the app is not visible.
pub trait AlertSink: Send + Sync {
    fn notify_roll_received(&self, value: u8);
}

/// The user's chosen peer, if any.
pub trait PeerSupplier: Send + Sync {
    fn paired_peer(&self) -> Option<PeerAddress>;
}

fn apply(ui: &dyn Notifier, update: &UiUpdate) {
    match update {
        UiUpdate::Status(text) => ui.set_status(text),
        UiUpdate::DiceValue(text) => ui.set_dice_value(text),
        UiUpdate::DiceStatus(text) => ui.set_dice_status(text),
        UiUpdate::RollEnabled(enabled) => ui.set_roll_enabled(*enabled),
        UiUpdate::ToggleLabel(text) => ui.set_toggle_label(text),
        UiUpdate::Progress(text) => ui.set_progress(text.as_deref()),
    }
}

/// Transport settings for the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the listener binds when this device is the receiver.
    pub listen_addr: SocketAddr,
    /// How long the initiator waits for a peer that is not listening yet.
    pub connect_window: Duration,
}

/// In-flight establishment: exactly one of these while Connecting.
#[derive(Clone)]
enum Attempt {
    Listen(Arc<Listener>),
    Connect {
        initiator: Arc<Initiator>,
        announce: Role,
    },
}

impl Attempt {
    async fn run(&self) -> Result<Connection, ConnectionError> {
        match self {
            Attempt::Listen(listener) => listener.listen().await,
            Attempt::Connect {
                initiator,
                announce,
            } => initiator.connect(*announce).await,
        }
    }

    fn cancel(&self) {
        match self {
            Attempt::Listen(listener) => listener.cancel(),
            Attempt::Connect { initiator, .. } => initiator.cancel(),
        }
    }
}

struct Session {
    core: SessionCore,
    attempt: Option<Attempt>,
    connection: Option<Arc<Connection>>,
    dice: Box<dyn Dice>,
}

struct Shared {
    session: Mutex<Session>,
    /// The live connection, readable without taking the session lock.
    live: StdMutex<Option<Arc<Connection>>>,
    config: SessionConfig,
    ui: Arc<dyn Notifier>,
    alerts: Arc<dyn AlertSink>,
    peers: Arc<dyn PeerSupplier>,
}

/// Handle to one device's dice session. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(
        role: Role,
        config: SessionConfig,
        ui: Arc<dyn Notifier>,
        alerts: Arc<dyn AlertSink>,
        peers: Arc<dyn PeerSupplier>,
        dice: Box<dyn Dice>,
    ) -> Self {
        let core = SessionCore::new(role);
        for action in core.initial_view() {
            if let Action::Ui(update) = action {
                apply(ui.as_ref(), &update);
            }
        }
        let session = Session {
            core,
            attempt: None,
            connection: None,
            dice,
        };
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                live: StdMutex::new(None),
                config,
                ui,
                alerts,
                peers,
            }),
        }
    }

    pub async fn role(&self) -> Role {
        self.shared.session.lock().await.core.role()
    }

    pub async fn state(&self) -> SessionState {
        self.shared.session.lock().await.core.state()
    }

    /// Whether rolls are shown on screen rather than raised as alerts.
    pub async fn is_foreground(&self) -> bool {
        self.shared.session.lock().await.core.is_foreground()
    }

    /// Tell the session whether the UI is visible.
    pub async fn set_foreground(&self, foreground: bool) {
        self.shared
            .session
            .lock()
            .await
            .core
            .set_foreground(foreground);
    }

    /// Connect (sender) or listen (receiver) in the background. No-op unless Idle.
    pub async fn start(&self) {
        self.shared.perform(vec![Action::Start]).await;
    }

    /// Roll and send as the connected sender; otherwise reconnect.
    pub async fn roll_dice(&self) {
        let mut session = self.shared.session.lock().await;
        let value = session.dice.roll();
        let actions = session.core.on_roll(value);
        self.shared.run(&mut session, actions).await;
    }

    /// Ask the peer to swap roles, or swap locally and restart when no link is up.
    pub async fn request_mode_switch(&self) {
        let mut session = self.shared.session.lock().await;
        let actions = session.core.on_switch_requested();
        self.shared.run(&mut session, actions).await;
    }

    /// Teardown followed by start, as a manual reconnect.
    pub async fn reconnect(&self) {
        self.shared.abort_live();
        self.shared
            .perform(vec![Action::Teardown, Action::Start])
            .await;
    }

    /// Cancel everything and return to Idle. Safe to call repeatedly.
    pub async fn teardown(&self) {
        self.shared.abort_live();
        self.shared.perform(vec![Action::Teardown]).await;
    }
}

impl Shared {
    /// Signal the live connection closed before queueing for the session lock.
    fn abort_live(&self) {
        let live = match self.live.lock() {
            Ok(live) => live.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(conn) = live {
            conn.abort();
        }
    }

    fn set_live(&self, conn: Option<Arc<Connection>>) {
        match self.live.lock() {
            Ok(mut live) => *live = conn,
            Err(poisoned) => *poisoned.into_inner() = conn,
        }
    }

    async fn perform(self: &Arc<Self>, actions: Vec<Action>) {
        let mut session = self.session.lock().await;
        self.run(&mut session, actions).await;
    }

    /// Execute actions in order. Follow-up actions produced while executing one are run next.
    async fn run(self: &Arc<Self>, session: &mut Session, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            let follow = match action {
                Action::Ui(update) => {
                    apply(self.ui.as_ref(), &update);
                    continue;
                }
                Action::Alert { value } => {
                    self.alerts.notify_roll_received(value);
                    continue;
                }
                Action::Send(msg) => {
                    match &session.connection {
                        Some(conn) => conn.write_message(&msg).await,
                        None => warn!(?msg, "write skipped: no live connection"),
                    }
                    continue;
                }
                Action::Establish { link, peer, how } => {
                    let attempt = match how {
                        Establish::Listen => {
                            Attempt::Listen(Arc::new(Listener::new(self.config.listen_addr)))
                        }
                        Establish::Connect { announce } => Attempt::Connect {
                            initiator: Arc::new(Initiator::new(peer, self.config.connect_window)),
                            announce,
                        },
                    };
                    session.attempt = Some(attempt.clone());
                    spawn_establish(self.clone(), link, attempt);
                    continue;
                }
                Action::Teardown => {
                    session.core.begin_teardown();
                    if let Some(attempt) = session.attempt.take() {
                        attempt.cancel();
                    }
                    self.set_live(None);
                    if let Some(conn) = session.connection.take() {
                        conn.close().await;
                    }
                    info!("connections closed");
                    session.core.finish_teardown()
                }
                Action::Start => {
                    let peer = self.peers.paired_peer();
                    session.core.on_start(peer)
                }
            };
            for next in follow.into_iter().rev() {
                queue.push_front(next);
            }
        }
    }

    async fn on_establish_result(
        self: &Arc<Self>,
        link: LinkId,
        res: Result<Connection, ConnectionError>,
    ) {
        let mut session = self.session.lock().await;
        match res {
            Ok(conn) => {
                let conn = Arc::new(conn);
                let Some(actions) = session.core.on_established(link) else {
                    conn.close().await;
                    return;
                };
                info!(peer = %conn.remote_addr(), role = %session.core.role(), "session connected");
                session.attempt = None;
                session.connection = Some(conn.clone());
                self.set_live(Some(conn.clone()));
                spawn_read_loop(self.clone(), link, conn);
                self.run(&mut session, actions).await;
            }
            Err(e) => {
                if session.core.current_link() != Some(link) {
                    debug!(link = link.get(), error = %e, "stale attempt ended");
                    return;
                }
                match e {
                    ConnectionError::Aborted => debug!("establishment aborted"),
                    e => warn!(error = %e, "establishment failed"),
                }
                session.attempt = None;
                let actions = session.core.on_establish_failed(link);
                self.run(&mut session, actions).await;
            }
        }
    }

    async fn on_message(self: &Arc<Self>, link: LinkId, msg: Message) {
        let mut session = self.session.lock().await;
        let actions = session.core.on_message(link, msg);
        self.run(&mut session, actions).await;
    }

    async fn on_read_failed(self: &Arc<Self>, link: LinkId, err: ConnectionError) {
        let mut session = self.session.lock().await;
        let actions = session.core.on_link_lost(link);
        if !actions.is_empty() {
            info!(error = %err, "disconnected");
        }
        self.run(&mut session, actions).await;
    }
}

fn spawn_establish(shared: Arc<Shared>, link: LinkId, attempt: Attempt) {
    tokio::spawn(async move {
        let res = attempt.run().await;
        shared.on_establish_result(link, res).await;
    });
}

/// One reader per connection; messages are dispatched strictly in arrival order.
fn spawn_read_loop(shared: Arc<Shared>, link: LinkId, conn: Arc<Connection>) {
    tokio::spawn(async move {
        loop {
            match conn.read_message().await {
                Ok(msg) => {
                    shared.on_message(link, msg).await;
                    if conn.is_closed() {
                        debug!(link = link.get(), "read loop done, link closed locally");
                        break;
                    }
                }
                Err(ConnectionError::Aborted) => {
                    // Only a local teardown aborts; it reports the disconnect itself.
                    debug!(link = link.get(), "read loop aborted");
                    break;
                }
                Err(e) => {
                    shared.on_read_failed(link, e).await;
                    break;
                }
            }
        }
    });
}
