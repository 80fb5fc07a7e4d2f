//! Dice link protocol reference implementation.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod core;
pub mod dice;
pub mod protocol;
pub mod wire;

pub use crate::core::{Action, Establish, LinkId, SessionCore, SessionState, UiUpdate, NO_DEVICE_STATUS};
pub use dice::{Dice, RandomDice};
pub use protocol::{Message, ParseRoleError, PeerAddress, Role, SERVICE_NAME, SERVICE_UUID};
pub use wire::{decode, encode, DecodeError, MAX_MESSAGE_LEN};
