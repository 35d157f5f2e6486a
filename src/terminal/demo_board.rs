// A stand-in game board for terminal sessions.
//
// Real boards live in the game client. This one tracks just enough state
// (pairs left, phase, reveal flag) to show powerups doing something.

use crate::core::powerups::{
    EffectError, GamePhase, PowerupEffect, PowerupKind, SessionSnapshot,
};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoardState {
    level: u32,
    pairs_left: u32,
    phase: GamePhase,
    revealed: bool,
    ui_disabled: bool,
}

pub struct DemoBoard {
    state: Mutex<BoardState>,
}

impl DemoBoard {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BoardState {
                level: 0,
                pairs_left: 0,
                phase: GamePhase::Idle,
                revealed: false,
                ui_disabled: false,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BoardState) -> T) -> T {
        // Plain data, so a poisoned lock is still safe to reuse
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Deal a fresh level with `pairs` unmatched pairs.
    pub fn start_level(&self, pairs: u32) -> u32 {
        self.with_state(|s| {
            s.level += 1;
            s.pairs_left = pairs.max(1);
            s.phase = GamePhase::Playing;
            s.revealed = false;
            s.ui_disabled = false;
            s.level
        })
    }

    /// Match one pair by hand. Returns false if there was nothing to match.
    pub fn match_pair(&self) -> bool {
        self.with_state(|s| {
            if s.phase != GamePhase::Playing || s.pairs_left == 0 {
                return false;
            }
            s.pairs_left -= 1;
            s.revealed = false;
            if s.pairs_left == 0 {
                s.phase = GamePhase::Complete;
            }
            true
        })
    }

    pub fn pause(&self) {
        self.with_state(|s| {
            if s.phase == GamePhase::Playing {
                s.phase = GamePhase::Paused;
            }
        })
    }

    pub fn resume(&self) {
        self.with_state(|s| {
            if s.phase == GamePhase::Paused {
                s.phase = GamePhase::Playing;
            }
        })
    }

    /// Lock or unlock the controls, as the host does during transitions.
    pub fn set_ui_disabled(&self, disabled: bool) {
        self.with_state(|s| s.ui_disabled = disabled)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.with_state(|s| SessionSnapshot {
            phase: s.phase,
            ui_disabled: s.ui_disabled,
        })
    }

    pub fn describe(&self) -> String {
        self.with_state(|s| {
            format!(
                "Level {} | {} | {} pairs left{}",
                s.level,
                s.phase,
                s.pairs_left,
                if s.revealed { " | cards revealed" } else { "" }
            )
        })
    }
}

#[cfg(test)]
impl DemoBoard {
    pub fn pairs_left(&self) -> u32 {
        self.with_state(|s| s.pairs_left)
    }

    pub fn is_revealed(&self) -> bool {
        self.with_state(|s| s.revealed)
    }
}

impl Default for DemoBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerupEffect for DemoBoard {
    async fn apply(&self, kind: PowerupKind) -> Result<(), EffectError> {
        self.with_state(|s| {
            if s.phase != GamePhase::Playing {
                return Err(EffectError(format!("board is {}", s.phase)));
            }

            match kind {
                PowerupKind::Bomb => {
                    if s.pairs_left == 0 {
                        return Err(EffectError("no unmatched pairs left".to_string()));
                    }
                    s.pairs_left -= 1;
                }
                PowerupKind::Glimpse => s.revealed = true,
                PowerupKind::Skip => s.pairs_left = 0,
            }

            if s.pairs_left == 0 {
                s.phase = GamePhase::Complete;
            }
            Ok(())
        })
    }
}
