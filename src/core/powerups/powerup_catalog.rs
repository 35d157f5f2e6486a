// Powerup catalog
//
// This module defines every powerup a player can buy during a level.
// It is pure reference data: nothing here changes after startup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for powerups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupKind {
    /// Removes one unmatched pair from the board.
    Bomb,
    /// Reveals every card for a few seconds.
    Glimpse,
    /// Completes the current level.
    Skip,
}

impl PowerupKind {
    /// Convert the kind to its stable string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerupKind::Bomb => "bomb",
            PowerupKind::Glimpse => "glimpse",
            PowerupKind::Skip => "skip",
        }
    }

    /// Parse a kind from its identifier.
    ///
    /// `clock` is what older save files call the glimpse powerup.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bomb" => Some(PowerupKind::Bomb),
            "glimpse" | "clock" => Some(PowerupKind::Glimpse),
            "skip" => Some(PowerupKind::Skip),
            _ => None,
        }
    }

    /// All kinds, in the order the powerup bar shows them.
    pub fn all() -> [PowerupKind; 3] {
        [PowerupKind::Bomb, PowerupKind::Glimpse, PowerupKind::Skip]
    }

    /// Shortcut for `PowerupDefinition::get(self)`.
    pub fn definition(self) -> &'static PowerupDefinition {
        PowerupDefinition::get(self)
    }
}

impl fmt::Display for PowerupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Powerup metadata shown in the bar and in the confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerupDefinition {
    pub kind: PowerupKind,
    pub name: &'static str,
    pub emoji: &'static str,
    pub description: &'static str,
    pub price: u64,
}

static CATALOG: [PowerupDefinition; 3] = [
    PowerupDefinition {
        kind: PowerupKind::Bomb,
        name: "Bomb",
        emoji: "💣",
        description: "Randomly removes one pair of unmatched cards",
        price: 50,
    },
    PowerupDefinition {
        kind: PowerupKind::Glimpse,
        name: "Glimpse",
        emoji: "👀",
        description: "Reveals all cards for 5 seconds then flips them back",
        price: 100,
    },
    PowerupDefinition {
        kind: PowerupKind::Skip,
        name: "Skip",
        emoji: "⏭️",
        description: "Instantly completes the current level",
        price: 600,
    },
];

impl PowerupDefinition {
    /// Look up the definition for a kind. Total over the closed set.
    pub fn get(kind: PowerupKind) -> &'static PowerupDefinition {
        match kind {
            PowerupKind::Bomb => &CATALOG[0],
            PowerupKind::Glimpse => &CATALOG[1],
            PowerupKind::Skip => &CATALOG[2],
        }
    }

    /// All definitions, in display order.
    pub fn all() -> &'static [PowerupDefinition] {
        &CATALOG
    }

    /// Title of the confirmation prompt.
    pub fn prompt_title(&self) -> String {
        format!("Use {}?", self.name)
    }

    /// Body of the confirmation prompt.
    pub fn prompt_body(&self) -> String {
        format!("{}\n\nPrice: {} coins", self.description, self.price)
    }
}
