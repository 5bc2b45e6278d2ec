//! Logical directions and the held-direction set
//!
//! Directions are decoupled from physical keycodes: the dispatcher maps keys
//! to directions, the accelerators only ever see [`Direction`] values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the four logical directions a held key can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All directions, in bit order
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Lowercase name used in config files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Direction::Up => 0b0001,
            Direction::Down => 0b0010,
            Direction::Left => 0b0100,
            Direction::Right => 0b1000,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected direction name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown direction \"{0}\" (expected up, down, left or right)")]
pub struct DirectionError(pub String);

impl FromStr for Direction {
    type Err = DirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            _ => Err(DirectionError(s.to_string())),
        }
    }
}

/// Unordered set of held directions
///
/// Stored as a bitmask so a snapshot taken under the accelerator lock is a
/// plain copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DirectionSet(u8);

impl DirectionSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a direction. Returns true if it was not already present.
    pub fn insert(&mut self, direction: Direction) -> bool {
        let was_absent = !self.contains(direction);
        self.0 |= direction.bit();
        was_absent
    }

    /// Remove a direction. Returns true if it was present.
    pub fn remove(&mut self, direction: Direction) -> bool {
        let was_present = self.contains(direction);
        self.0 &= !direction.bit();
        was_present
    }

    pub fn contains(&self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterate over the members in a fixed order (up, down, left, right)
    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(|d| self.contains(*d))
    }
}

impl FromIterator<Direction> for DirectionSet {
    fn from_iter<I: IntoIterator<Item = Direction>>(iter: I) -> Self {
        let mut set = DirectionSet::empty();
        for direction in iter {
            set.insert(direction);
        }
        set
    }
}

impl fmt::Display for DirectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, direction) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(direction.as_str())?;
        }
        f.write_str("}")
    }
}
