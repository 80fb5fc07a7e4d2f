//! Dice link wire protocol: roles, message kinds and the well-known service identifier.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known service identifier, identical on both peers. The listener advertises it and the
/// initiator targets it.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xa60f35f0_b93a_11de_8a39_08002009c666);

/// Human-readable name registered alongside [`SERVICE_UUID`].
pub const SERVICE_NAME: &str = "DiceGame";

/// Lowest and highest face of the die.
pub const DICE_MIN: u8 = 1;
pub const DICE_MAX: u8 = 6;

/// Which half of the exchange this device plays. Sender rolls, Receiver displays.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role the other peer must hold.
    pub fn complement(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    /// Token used after `ROLE:` on the wire.
    pub fn wire_token(self) -> &'static str {
        match self {
            Role::Sender => "SENDER",
            Role::Receiver => "RECEIVER",
        }
    }

    /// Role a peer announces with `token`. Any word other than `RECEIVER` is a sender.
    pub(crate) fn from_wire_token(token: &str) -> Role {
        if token == Role::Receiver.wire_token() {
            Role::Receiver
        } else {
            Role::Sender
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role {0:?} (expected \"sender\" or \"receiver\")")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// All application messages. Encoding is plain ASCII; see the wire module.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Message {
    /// A roll from the sender, always within `DICE_MIN..=DICE_MAX`.
    DiceRoll { value: u8 },
    /// The sending peer's own role. Receivers adopt the complement.
    RoleAnnounce { role: Role },
    /// Ask the peer to swap roles.
    SwitchRequest,
    /// Peer agreed to swap; completes a locally initiated switch.
    SwitchAck,
}

/// Remote endpoint chosen by the user. Immutable for the lifetime of a session attempt.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PeerAddress {
    pub name: String,
    pub addr: SocketAddr,
}

impl PeerAddress {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}
