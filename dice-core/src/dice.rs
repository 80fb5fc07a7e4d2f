//! Dice source for local rolls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{DICE_MAX, DICE_MIN};

/// Produces a face in `DICE_MIN..=DICE_MAX` each time the sender rolls.
pub trait Dice: Send {
    fn roll(&mut self) -> u8;
}

/// Uniform fair die.
pub struct RandomDice {
    rng: StdRng,
}

impl RandomDice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDice {
    fn default() -> Self {
        Self::new()
    }
}

impl Dice for RandomDice {
    fn roll(&mut self) -> u8 {
        self.rng.gen_range(DICE_MIN..=DICE_MAX)
    }
}
