//! Terminal collaborators: the screen, the background alert and the paired-peer choice.
//!
//! Session tasks never print directly. Every update is sent over a channel to the render task,
//! which is the only context that touches the terminal.

use dice_core::{PeerAddress, UiUpdate};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{AlertSink, Notifier, PeerSupplier};

/// Work for the render task.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Render {
    Ui(UiUpdate),
    Alert(u8),
    /// Print the whole screen.
    Dump,
}

/// Handle the session uses as its screen.
#[derive(Clone)]
pub struct TerminalUi {
    tx: mpsc::UnboundedSender<Render>,
}

/// Handle the session uses for background alerts.
pub struct TerminalAlerts {
    tx: mpsc::UnboundedSender<Render>,
}

/// Build the screen and alert handles plus the receiver the render task drains.
pub fn terminal() -> (TerminalUi, TerminalAlerts, mpsc::UnboundedReceiver<Render>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TerminalUi { tx: tx.clone() },
        TerminalAlerts { tx },
        rx,
    )
}

impl TerminalUi {
    /// Ask the render task to print the full screen.
    pub fn dump(&self) {
        self.post(Render::Dump);
    }

    fn post(&self, render: Render) {
        if self.tx.send(render).is_err() {
            debug!("render task gone, update dropped");
        }
    }
}

impl Notifier for TerminalUi {
    fn set_status(&self, text: &str) {
        self.post(Render::Ui(UiUpdate::Status(text.to_string())));
    }

    fn set_dice_value(&self, text: &str) {
        self.post(Render::Ui(UiUpdate::DiceValue(text.to_string())));
    }

    fn set_dice_status(&self, text: &str) {
        self.post(Render::Ui(UiUpdate::DiceStatus(text.to_string())));
    }

    fn set_roll_enabled(&self, enabled: bool) {
        self.post(Render::Ui(UiUpdate::RollEnabled(enabled)));
    }

    fn set_toggle_label(&self, text: &str) {
        self.post(Render::Ui(UiUpdate::ToggleLabel(text.to_string())));
    }

    fn set_progress(&self, text: Option<&str>) {
        self.post(Render::Ui(UiUpdate::Progress(text.map(String::from))));
    }
}

impl AlertSink for TerminalAlerts {
    fn notify_roll_received(&self, value: u8) {
        if self.tx.send(Render::Alert(value)).is_err() {
            debug!(value, "render task gone, alert dropped");
        }
    }
}

/// Peer picked in config or on the command line.
pub struct ConfiguredPeer(Option<PeerAddress>);

impl ConfiguredPeer {
    pub fn new(peer: Option<PeerAddress>) -> Self {
        Self(peer)
    }
}

impl PeerSupplier for ConfiguredPeer {
    fn paired_peer(&self) -> Option<PeerAddress> {
        self.0.clone()
    }
}

/// What the screen currently shows.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Screen {
    pub status: String,
    pub dice_value: String,
    pub dice_status: String,
    pub roll_enabled: bool,
    pub toggle_label: String,
    pub progress: Option<String>,
}

impl Screen {
    /// Apply one update. Returns the line to print, if the update is visible on its own.
    pub fn apply(&mut self, update: UiUpdate) -> Option<String> {
        match update {
            UiUpdate::Status(text) => {
                let line = format!("[device] {text}");
                self.status = text;
                Some(line)
            }
            UiUpdate::DiceValue(text) => {
                let line = format!("[dice] {text}");
                self.dice_value = text;
                Some(line)
            }
            UiUpdate::DiceStatus(text) => {
                self.dice_status = text;
                None
            }
            UiUpdate::RollEnabled(enabled) => {
                self.roll_enabled = enabled;
                None
            }
            UiUpdate::ToggleLabel(text) => {
                self.toggle_label = text;
                None
            }
            UiUpdate::Progress(text) => {
                let line = text.as_ref().map(|t| format!("[...] {t}"));
                self.progress = text;
                line
            }
        }
    }

    pub fn render(&self) -> String {
        let roll = if self.roll_enabled {
            "roll"
        } else {
            "roll (disabled)"
        };
        format!(
            "{}\n  dice: {} ({})\n  controls: [{}] [{}]",
            self.status,
            if self.dice_value.is_empty() {
                "-"
            } else {
                self.dice_value.as_str()
            },
            self.dice_status,
            roll,
            self.toggle_label
        )
    }
}

/// The UI execution context: applies updates in order and prints them.
pub async fn run_renderer(mut rx: mpsc::UnboundedReceiver<Render>) {
    let mut screen = Screen::default();
    while let Some(render) = rx.recv().await {
        match render {
            Render::Ui(update) => {
                if let Some(line) = screen.apply(update) {
                    println!("{line}");
                }
            }
            Render::Alert(value) => {
                println!("(!) Dice Rolled: {value} - Your partner rolled the dice.");
            }
            Render::Dump => println!("{}", screen.render()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_tracks_latest_values() {
        let mut screen = Screen::default();
        assert_eq!(
            screen.apply(UiUpdate::Status("Connected to: tablet".into())),
            Some("[device] Connected to: tablet".into())
        );
        assert_eq!(screen.apply(UiUpdate::RollEnabled(true)), None);
        screen.apply(UiUpdate::DiceValue("3".into()));
        screen.apply(UiUpdate::DiceStatus("Sent: 3".into()));
        screen.apply(UiUpdate::ToggleLabel("Switch to Receiver".into()));
        let shown = screen.render();
        assert!(shown.contains("Connected to: tablet"));
        assert!(shown.contains("dice: 3 (Sent: 3)"));
        assert!(shown.contains("[roll] [Switch to Receiver]"));
    }

    #[test]
    fn hidden_progress_prints_nothing() {
        let mut screen = Screen::default();
        assert!(screen
            .apply(UiUpdate::Progress(Some("Waiting for connection...".into())))
            .is_some());
        assert_eq!(screen.apply(UiUpdate::Progress(None)), None);
        assert_eq!(screen.progress, None);
    }

    #[tokio::test]
    async fn updates_are_marshaled_in_order() {
        let (ui, alerts, mut rx) = terminal();
        ui.set_status("a");
        alerts.notify_roll_received(2);
        ui.set_roll_enabled(false);
        assert_eq!(
            rx.recv().await,
            Some(Render::Ui(UiUpdate::Status("a".into())))
        );
        assert_eq!(rx.recv().await, Some(Render::Alert(2)));
        assert_eq!(
            rx.recv().await,
            Some(Render::Ui(UiUpdate::RollEnabled(false)))
        );
    }
}
