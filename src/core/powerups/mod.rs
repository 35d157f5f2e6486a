// Powerups module - domain logic for buying and using one-shot assists

pub mod powerup_catalog;
mod transaction_controller;

pub use powerup_catalog::{PowerupDefinition, PowerupKind};
pub use transaction_controller::{
    ButtonState, CoinLedger, Confirmation, ConfirmationSurface, EffectError, GamePhase,
    IneligibleReason, LedgerEntry, LedgerError, Notice, PowerupController, PowerupEffect, PurchaseOutcome,
    PurchasePrompt, RequestOutcome, SessionSnapshot,
};
