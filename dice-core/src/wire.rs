//! Codec: one ASCII message per transport read, no length prefix and no terminator.

use crate::protocol::{Message, Role, DICE_MAX, DICE_MIN};

const DICE_PREFIX: &str = "DICE:";
const ROLE_PREFIX: &str = "ROLE:";
const SWITCH_REQUEST: &str = "MODE_SWITCH_REQUEST";
const SWITCH_ACK: &str = "MODE_SWITCH_ACK";

/// Largest encoded message. Readers size their buffer from this.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Encode a message into its wire form.
pub fn encode(msg: &Message) -> Vec<u8> {
    match msg {
        Message::DiceRoll { value } => format!("{DICE_PREFIX}{value}").into_bytes(),
        Message::RoleAnnounce { role } => format!("{ROLE_PREFIX}{}", role.wire_token()).into_bytes(),
        Message::SwitchRequest => SWITCH_REQUEST.as_bytes().to_vec(),
        Message::SwitchAck => SWITCH_ACK.as_bytes().to_vec(),
    }
}

/// Error decoding a message. Any failure is fatal to the connection it arrived on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized message")]
    Unrecognized,
}

/// Decode exactly one message from `bytes`.
/// Prefixes are tried in order `DICE:`, `ROLE:`, then the two switch literals.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::Unrecognized)?;
    if let Some(digits) = text.strip_prefix(DICE_PREFIX) {
        return decode_roll(digits);
    }
    if let Some(token) = text.strip_prefix(ROLE_PREFIX) {
        return Ok(Message::RoleAnnounce {
            role: Role::from_wire_token(token),
        });
    }
    match text {
        SWITCH_REQUEST => Ok(Message::SwitchRequest),
        SWITCH_ACK => Ok(Message::SwitchAck),
        _ => Err(DecodeError::Unrecognized),
    }
}

fn decode_roll(digits: &str) -> Result<Message, DecodeError> {
    // u8::from_str accepts a leading '+'; the wire form is bare digits only.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::Unrecognized);
    }
    let value: u8 = digits.parse().map_err(|_| DecodeError::Unrecognized)?;
    if !(DICE_MIN..=DICE_MAX).contains(&value) {
        return Err(DecodeError::Unrecognized);
    }
    Ok(Message::DiceRoll { value })
}
