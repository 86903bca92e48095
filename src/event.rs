use crate::core::TimeUnits;
use crate::error::{DvsError, DvsResult};

/// Direction of the brightness change reported for a pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    Off,
    Neutral,
    On,
}

impl Polarity {
    pub fn as_i8(self) -> i8 {
        match self {
            Polarity::Off => -1,
            Polarity::Neutral => 0,
            Polarity::On => 1,
        }
    }

    /// Only rising events refresh a pixel.
    pub fn is_qualifying(self) -> bool {
        self == Polarity::On
    }
}

impl TryFrom<i8> for Polarity {
    type Error = DvsError;

    fn try_from(v: i8) -> DvsResult<Self> {
        match v {
            -1 => Ok(Polarity::Off),
            0 => Ok(Polarity::Neutral),
            1 => Ok(Polarity::On),
            other => Err(DvsError::validation(format!(
                "polarity must be -1, 0 or +1 (got {other})"
            ))),
        }
    }
}

/// A single change event, already mapped into sensor coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub timestamp: TimeUnits,
    pub x: u32,
    pub y: u32,
    pub polarity: Polarity,
}

impl Event {
    pub fn new(timestamp: TimeUnits, x: u32, y: u32, polarity: Polarity) -> Self {
        Self {
            timestamp,
            x,
            y,
            polarity,
        }
    }
}
