// Powerup purchase controller - the business logic for spending coins on powerups.
//
// Like the rest of `core`, this module knows nothing about terminals, screens or
// databases. It decides whether a purchase may happen, asks the player to confirm,
// spends the coins through the ledger port and only then applies the effect.

use super::powerup_catalog::{PowerupDefinition, PowerupKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// Phase of the surrounding game. Owned by the game, read here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamePhase {
    #[default]
    Idle,
    Playing,
    Paused,
    Complete,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GamePhase::Idle => "idle",
            GamePhase::Playing => "playing",
            GamePhase::Paused => "paused",
            GamePhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What the host screen looks like at the moment the player taps a powerup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub phase: GamePhase,
    /// Set by the host during level transitions and similar animations.
    pub ui_disabled: bool,
}

/// Why a request was rejected before any coins were considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    UiDisabled,
    NotPlaying(GamePhase),
    /// Another purchase is already in flight.
    Busy,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::UiDisabled => write!(f, "controls are disabled"),
            IneligibleReason::NotPlaying(phase) => write!(f, "game is {}", phase),
            IneligibleReason::Busy => write!(f, "busy"),
        }
    }
}

/// Everything the confirmation surface needs to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasePrompt {
    pub kind: PowerupKind,
    pub title: String,
    pub description: String,
    pub price: u64,
}

impl PurchasePrompt {
    pub fn for_kind(kind: PowerupKind) -> Self {
        let definition = PowerupDefinition::get(kind);
        Self {
            kind,
            title: definition.prompt_title(),
            description: definition.prompt_body(),
            price: definition.price,
        }
    }
}

/// Result of the eligibility gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Ineligible(IneligibleReason),
    InsufficientFunds { price: u64, balance: u64 },
    /// The player must confirm before anything changes.
    ConfirmationRequired(PurchasePrompt),
}

/// The player's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

/// Final result of a purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The player cancelled the prompt. Nothing changed.
    Declined,
    Ineligible(IneligibleReason),
    InsufficientFunds {
        price: u64,
        balance: u64,
    },
    /// The ledger could not be read or written. No coins spent, no effect applied.
    LedgerFailed {
        reason: String,
    },
    Applied {
        kind: PowerupKind,
        price: u64,
        new_balance: u64,
    },
    /// Coins were spent but the effect reported a failure. The spend stands.
    EffectAnomaly {
        kind: PowerupKind,
        price: u64,
        reason: String,
    },
}

/// How the powerup bar should render a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Disabled,
    Affordable,
    Unaffordable,
}

/// User-facing notices raised by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Raised by the gate when the balance is below the price.
    InsufficientFunds {
        name: &'static str,
        price: u64,
        balance: u64,
    },
    /// Raised when the spend itself fails after confirmation.
    PurchaseFailed { reason: String },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::InsufficientFunds { .. } => "Insufficient Coins",
            Notice::PurchaseFailed { .. } => "Purchase Failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::InsufficientFunds {
                name,
                price,
                balance,
            } => format!(
                "You need {} coins to use {}. You have {}.",
                price, name, balance
            ),
            Notice::PurchaseFailed { reason } => reason.clone(),
        }
    }
}

/// One line of a ledger's audit trail. Spends are negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub amount: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn spend(amount: u64, reason: &str) -> Self {
        Self {
            amount: -i64::try_from(amount).unwrap_or(i64::MAX),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn credit(amount: u64, reason: &str) -> Self {
        Self {
            amount: i64::try_from(amount).unwrap_or(i64::MAX),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: need {required} coins, but only have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Ledger error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Effect failed: {0}")]
pub struct EffectError(pub String);

// ============================================================================
// PORTS
// ============================================================================

/// The external owner of the player's coins.
///
/// Implementations must make `spend` atomic: either the full amount leaves the
/// wallet or nothing does. A spend never clamps the balance at zero.
#[async_trait]
pub trait CoinLedger: Send + Sync {
    /// Current balance.
    async fn balance(&self) -> Result<u64, LedgerError>;

    /// Deduct `amount` and return the new balance.
    async fn spend(&self, amount: u64, reason: &str) -> Result<u64, LedgerError>;

    /// Add `amount` and return the new balance.
    async fn credit(&self, amount: u64, reason: &str) -> Result<u64, LedgerError>;

    /// Most recent audit entries, newest first.
    async fn recent_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Where prompts and notices are shown to the player.
#[async_trait]
pub trait ConfirmationSurface: Send + Sync {
    /// Show the prompt and wait for the player's answer.
    async fn ask(&self, prompt: &PurchasePrompt) -> Confirmation;

    async fn notify(&self, notice: Notice);
}

/// The game board side of a powerup.
#[async_trait]
pub trait PowerupEffect: Send + Sync {
    async fn apply(&self, kind: PowerupKind) -> Result<(), EffectError>;
}

// ============================================================================
// IN-FLIGHT GUARD
// ============================================================================

/// Holds the controller's in-flight flag. Dropping it clears the flag, so every
/// exit path releases it: early returns, panics, and futures dropped mid-await.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    /// Check-and-set in one step. `None` if the flag was already held.
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// One controller per play session.
///
/// Generic over its three ports so tests can drive it without a real UI,
/// database or board.
pub struct PowerupController<L: CoinLedger, S: ConfirmationSurface, E: PowerupEffect> {
    ledger: L,
    surface: S,
    effect: E,
    in_flight: AtomicBool,
}

impl<L: CoinLedger, S: ConfirmationSurface, E: PowerupEffect> PowerupController<L, S, E> {
    pub fn new(ledger: L, surface: S, effect: E) -> Self {
        Self {
            ledger,
            surface,
            effect,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }

    /// True while a confirmed purchase is being processed.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn check_eligibility(&self, phase: GamePhase, ui_disabled: bool) -> Result<(), IneligibleReason> {
        if ui_disabled {
            Err(IneligibleReason::UiDisabled)
        } else if phase != GamePhase::Playing {
            Err(IneligibleReason::NotPlaying(phase))
        } else if self.is_busy() {
            Err(IneligibleReason::Busy)
        } else {
            Ok(())
        }
    }

    /// The eligibility gate without side effects.
    ///
    /// Checks run in order: disabled flag, phase, in-flight guard, affordability.
    pub fn evaluate(
        &self,
        kind: PowerupKind,
        phase: GamePhase,
        balance: u64,
        ui_disabled: bool,
    ) -> RequestOutcome {
        if let Err(reason) = self.check_eligibility(phase, ui_disabled) {
            return RequestOutcome::Ineligible(reason);
        }

        let price = PowerupDefinition::get(kind).price;
        if balance < price {
            RequestOutcome::InsufficientFunds { price, balance }
        } else {
            RequestOutcome::ConfirmationRequired(PurchasePrompt::for_kind(kind))
        }
    }

    /// Run the gate and raise the insufficient-funds notice when it applies.
    pub async fn request_powerup(
        &self,
        kind: PowerupKind,
        phase: GamePhase,
        balance: u64,
        ui_disabled: bool,
    ) -> RequestOutcome {
        let outcome = self.evaluate(kind, phase, balance, ui_disabled);

        match &outcome {
            RequestOutcome::Ineligible(reason) => {
                tracing::debug!(kind = %kind, reason = %reason, "Powerup request ignored");
            }
            RequestOutcome::InsufficientFunds { price, balance } => {
                tracing::info!(kind = %kind, price, balance, "Not enough coins for powerup");
                self.surface
                    .notify(Notice::InsufficientFunds {
                        name: PowerupDefinition::get(kind).name,
                        price: *price,
                        balance: *balance,
                    })
                    .await;
            }
            RequestOutcome::ConfirmationRequired(_) => {
                tracing::debug!(kind = %kind, "Powerup awaiting confirmation");
            }
        }

        outcome
    }

    /// Spend the coins and apply the effect, after the player confirmed `prompt`.
    ///
    /// The effect runs only once the ledger has accepted the spend. A failing
    /// effect does not refund the coins.
    pub async fn confirm_purchase(&self, prompt: &PurchasePrompt) -> PurchaseOutcome {
        let kind = prompt.kind;
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::warn!(kind = %kind, "Purchase confirmed while another is in flight");
            return PurchaseOutcome::Ineligible(IneligibleReason::Busy);
        };

        // Price comes from the catalog, not from whatever the prompt carried.
        let definition = PowerupDefinition::get(kind);
        let price = definition.price;
        let reason = format!("Used {}", definition.name);

        let new_balance = match self.ledger.spend(price, &reason).await {
            Ok(new_balance) => new_balance,
            Err(LedgerError::InsufficientFunds {
                required,
                available,
            }) => {
                tracing::info!(
                    kind = %kind,
                    required,
                    available,
                    "Spend rejected at confirmation time"
                );
                self.surface
                    .notify(Notice::PurchaseFailed {
                        reason: "Not enough coins!".to_string(),
                    })
                    .await;
                return PurchaseOutcome::InsufficientFunds {
                    price: required,
                    balance: available,
                };
            }
            Err(LedgerError::Store(message)) => {
                tracing::error!(kind = %kind, price, "Ledger failed during spend: {}", message);
                self.surface
                    .notify(Notice::PurchaseFailed {
                        reason: message.clone(),
                    })
                    .await;
                return PurchaseOutcome::LedgerFailed { reason: message };
            }
        };

        tracing::debug!(kind = %kind, price, new_balance, "Coins spent, applying effect");

        match self.effect.apply(kind).await {
            Ok(()) => {
                tracing::info!(kind = %kind, price, new_balance, "Powerup applied");
                PurchaseOutcome::Applied {
                    kind,
                    price,
                    new_balance,
                }
            }
            Err(e) => {
                tracing::error!(
                    kind = %kind,
                    price,
                    new_balance,
                    "Powerup effect failed after coins were spent: {}",
                    e
                );
                PurchaseOutcome::EffectAnomaly {
                    kind,
                    price,
                    reason: e.0,
                }
            }
        }
    }

    /// The whole tap-to-effect flow for one powerup button.
    pub async fn use_powerup(&self, kind: PowerupKind, session: SessionSnapshot) -> PurchaseOutcome {
        // Rejected taps never touch the ledger.
        if let Err(reason) = self.check_eligibility(session.phase, session.ui_disabled) {
            tracing::debug!(kind = %kind, reason = %reason, "Powerup request ignored");
            return PurchaseOutcome::Ineligible(reason);
        }

        let balance = match self.ledger.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(kind = %kind, "Failed to read balance: {}", e);
                let reason = e.to_string();
                self.surface
                    .notify(Notice::PurchaseFailed {
                        reason: reason.clone(),
                    })
                    .await;
                return PurchaseOutcome::LedgerFailed { reason };
            }
        };

        let prompt = match self
            .request_powerup(kind, session.phase, balance, session.ui_disabled)
            .await
        {
            RequestOutcome::Ineligible(reason) => return PurchaseOutcome::Ineligible(reason),
            RequestOutcome::InsufficientFunds { price, balance } => {
                return PurchaseOutcome::InsufficientFunds { price, balance }
            }
            RequestOutcome::ConfirmationRequired(prompt) => prompt,
        };

        match self.surface.ask(&prompt).await {
            Confirmation::Confirmed => self.confirm_purchase(&prompt).await,
            Confirmation::Declined => {
                tracing::debug!(kind = %kind, "Powerup declined");
                PurchaseOutcome::Declined
            }
        }
    }

    /// Render state for a powerup button.
    pub fn button_state(
        &self,
        kind: PowerupKind,
        phase: GamePhase,
        balance: u64,
        ui_disabled: bool,
    ) -> ButtonState {
        match self.evaluate(kind, phase, balance, ui_disabled) {
            RequestOutcome::Ineligible(_) => ButtonState::Disabled,
            RequestOutcome::InsufficientFunds { .. } => ButtonState::Unaffordable,
            RequestOutcome::ConfirmationRequired(_) => ButtonState::Affordable,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    const PLAYING: SessionSnapshot = SessionSnapshot {
        phase: GamePhase::Playing,
        ui_disabled: false,
    };

    // Simple in-memory ledger that records every call
    struct TestLedger {
        balance: Mutex<u64>,
        spends: Mutex<Vec<u64>>,
        balance_reads: AtomicUsize,
        broken: bool,
        // When set, spend waits here before touching the balance
        gate: Option<Arc<Notify>>,
    }

    impl TestLedger {
        fn with_balance(balance: u64) -> Self {
            Self {
                balance: Mutex::new(balance),
                spends: Mutex::new(Vec::new()),
                balance_reads: AtomicUsize::new(0),
                broken: false,
                gate: None,
            }
        }

        fn broken(balance: u64) -> Self {
            Self {
                broken: true,
                ..Self::with_balance(balance)
            }
        }

        fn gated(balance: u64, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::with_balance(balance)
            }
        }

        fn current(&self) -> u64 {
            *self.balance.lock().unwrap()
        }

        fn spends(&self) -> Vec<u64> {
            self.spends.lock().unwrap().clone()
        }

        fn reads(&self) -> usize {
            self.balance_reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CoinLedger for TestLedger {
        async fn balance(&self) -> Result<u64, LedgerError> {
            self.balance_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.current())
        }

        async fn spend(&self, amount: u64, _reason: &str) -> Result<u64, LedgerError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.broken {
                return Err(LedgerError::Store("disk full".to_string()));
            }
            let mut balance = self.balance.lock().unwrap();
            if *balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    required: amount,
                    available: *balance,
                });
            }
            *balance -= amount;
            self.spends.lock().unwrap().push(amount);
            Ok(*balance)
        }

        async fn credit(&self, amount: u64, _reason: &str) -> Result<u64, LedgerError> {
            let mut balance = self.balance.lock().unwrap();
            *balance += amount;
            Ok(*balance)
        }

        async fn recent_entries(&self, _limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
            Ok(Vec::new())
        }
    }

    struct TestSurface {
        answer: Confirmation,
        asked: Mutex<Vec<PurchasePrompt>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl TestSurface {
        fn answering(answer: Confirmation) -> Self {
            Self {
                answer,
                asked: Mutex::new(Vec::new()),
                notices: Mutex::new(Vec::new()),
            }
        }

        fn asked(&self) -> Vec<PurchasePrompt> {
            self.asked.lock().unwrap().clone()
        }

        fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfirmationSurface for TestSurface {
        async fn ask(&self, prompt: &PurchasePrompt) -> Confirmation {
            self.asked.lock().unwrap().push(prompt.clone());
            self.answer
        }

        async fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    #[derive(Default)]
    struct TestEffect {
        applied: Mutex<Vec<PowerupKind>>,
        fail: bool,
    }

    impl TestEffect {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn applied(&self) -> Vec<PowerupKind> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PowerupEffect for TestEffect {
        async fn apply(&self, kind: PowerupKind) -> Result<(), EffectError> {
            self.applied.lock().unwrap().push(kind);
            if self.fail {
                Err(EffectError("board not ready".to_string()))
            } else {
                Ok(())
            }
        }
    }

    type TestController = PowerupController<TestLedger, TestSurface, TestEffect>;

    fn controller(balance: u64, answer: Confirmation) -> TestController {
        PowerupController::new(
            TestLedger::with_balance(balance),
            TestSurface::answering(answer),
            TestEffect::default(),
        )
    }

    #[tokio::test]
    async fn test_glimpse_end_to_end() {
        let controller = controller(100, Confirmation::Confirmed);

        let outcome = controller.use_powerup(PowerupKind::Glimpse, PLAYING).await;

        assert_eq!(
            outcome,
            PurchaseOutcome::Applied {
                kind: PowerupKind::Glimpse,
                price: 100,
                new_balance: 0,
            }
        );
        assert_eq!(controller.ledger().spends(), vec![100]);
        assert_eq!(controller.ledger().current(), 0);
        assert_eq!(controller.effect().applied(), vec![PowerupKind::Glimpse]);
        assert_eq!(controller.surface().asked().len(), 1);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_insufficient_funds_at_gate() {
        let controller = controller(40, Confirmation::Confirmed);

        let outcome = controller
            .request_powerup(PowerupKind::Bomb, GamePhase::Playing, 40, false)
            .await;

        assert_eq!(
            outcome,
            RequestOutcome::InsufficientFunds {
                price: 50,
                balance: 40
            }
        );
        assert!(controller.surface().asked().is_empty());
        assert_eq!(controller.ledger().reads(), 0);
        assert!(controller.ledger().spends().is_empty());
        assert_eq!(
            controller.surface().notices(),
            vec![Notice::InsufficientFunds {
                name: "Bomb",
                price: 50,
                balance: 40
            }]
        );
    }

    #[tokio::test]
    async fn test_use_powerup_unaffordable_never_asks() {
        let controller = controller(40, Confirmation::Confirmed);

        let outcome = controller.use_powerup(PowerupKind::Bomb, PLAYING).await;

        assert_eq!(
            outcome,
            PurchaseOutcome::InsufficientFunds {
                price: 50,
                balance: 40
            }
        );
        assert!(controller.surface().asked().is_empty());
        assert!(controller.ledger().spends().is_empty());
        assert!(controller.effect().applied().is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_never_touches_ledger() {
        let sessions = [
            SessionSnapshot {
                phase: GamePhase::Idle,
                ui_disabled: false,
            },
            SessionSnapshot {
                phase: GamePhase::Paused,
                ui_disabled: false,
            },
            SessionSnapshot {
                phase: GamePhase::Complete,
                ui_disabled: false,
            },
            SessionSnapshot {
                phase: GamePhase::Playing,
                ui_disabled: true,
            },
        ];

        for balance in [0, 50, 10_000] {
            for session in sessions {
                let controller = controller(balance, Confirmation::Confirmed);
                let outcome = controller.use_powerup(PowerupKind::Skip, session).await;

                assert!(matches!(outcome, PurchaseOutcome::Ineligible(_)));
                assert_eq!(controller.ledger().reads(), 0);
                assert!(controller.ledger().spends().is_empty());
                assert!(controller.surface().asked().is_empty());
                assert!(controller.effect().applied().is_empty());
                assert!(!controller.is_busy());
            }
        }
    }

    #[test]
    fn test_gate_order() {
        let controller = controller(1_000, Confirmation::Confirmed);

        // Disabled wins over phase
        assert_eq!(
            controller.evaluate(PowerupKind::Bomb, GamePhase::Paused, 1_000, true),
            RequestOutcome::Ineligible(IneligibleReason::UiDisabled)
        );
        assert_eq!(
            controller.evaluate(PowerupKind::Bomb, GamePhase::Paused, 1_000, false),
            RequestOutcome::Ineligible(IneligibleReason::NotPlaying(GamePhase::Paused))
        );

        controller.in_flight.store(true, Ordering::SeqCst);
        // Busy wins over affordability
        assert_eq!(
            controller.evaluate(PowerupKind::Bomb, GamePhase::Playing, 0, false),
            RequestOutcome::Ineligible(IneligibleReason::Busy)
        );
    }

    #[test]
    fn test_confirmation_prompt_contents() {
        let controller = controller(600, Confirmation::Confirmed);

        let outcome = controller.evaluate(PowerupKind::Skip, GamePhase::Playing, 600, false);

        match outcome {
            RequestOutcome::ConfirmationRequired(prompt) => {
                assert_eq!(prompt.kind, PowerupKind::Skip);
                assert_eq!(prompt.title, "Use Skip?");
                assert_eq!(prompt.price, 600);
                assert!(prompt.description.ends_with("Price: 600 coins"));
            }
            other => panic!("expected confirmation prompt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decline_changes_nothing() {
        let controller = controller(500, Confirmation::Declined);

        let outcome = controller.use_powerup(PowerupKind::Bomb, PLAYING).await;

        assert_eq!(outcome, PurchaseOutcome::Declined);
        assert_eq!(controller.surface().asked().len(), 1);
        assert!(controller.ledger().spends().is_empty());
        assert_eq!(controller.ledger().current(), 500);
        assert!(controller.effect().applied().is_empty());
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_balance_drops_while_prompt_is_open() {
        let controller = controller(50, Confirmation::Confirmed);

        let prompt = match controller
            .request_powerup(PowerupKind::Bomb, GamePhase::Playing, 50, false)
            .await
        {
            RequestOutcome::ConfirmationRequired(prompt) => prompt,
            other => panic!("expected confirmation prompt, got {:?}", other),
        };

        // Coins spent elsewhere before the player taps "Use"
        controller.ledger().spend(20, "elsewhere").await.unwrap();

        let outcome = controller.confirm_purchase(&prompt).await;

        assert_eq!(
            outcome,
            PurchaseOutcome::InsufficientFunds {
                price: 50,
                balance: 30
            }
        );
        assert!(controller.effect().applied().is_empty());
        assert_eq!(controller.ledger().current(), 30);
        assert!(!controller.is_busy());
        assert_eq!(
            controller.surface().notices(),
            vec![Notice::PurchaseFailed {
                reason: "Not enough coins!".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_ledger_failure_skips_effect() {
        let controller = PowerupController::new(
            TestLedger::broken(500),
            TestSurface::answering(Confirmation::Confirmed),
            TestEffect::default(),
        );

        let outcome = controller.use_powerup(PowerupKind::Bomb, PLAYING).await;

        assert!(matches!(outcome, PurchaseOutcome::LedgerFailed { .. }));
        assert!(controller.effect().applied().is_empty());
        assert_eq!(controller.ledger().current(), 500);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_effect_failure_keeps_the_spend() {
        let controller = PowerupController::new(
            TestLedger::with_balance(120),
            TestSurface::answering(Confirmation::Confirmed),
            TestEffect::failing(),
        );

        let outcome = controller.use_powerup(PowerupKind::Bomb, PLAYING).await;

        assert_eq!(
            outcome,
            PurchaseOutcome::EffectAnomaly {
                kind: PowerupKind::Bomb,
                price: 50,
                reason: "board not ready".to_string(),
            }
        );
        assert_eq!(controller.ledger().current(), 70);
        assert_eq!(controller.effect().applied(), vec![PowerupKind::Bomb]);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_second_confirmation_is_rejected_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let controller = PowerupController::new(
            TestLedger::gated(100, Arc::clone(&gate)),
            TestSurface::answering(Confirmation::Confirmed),
            TestEffect::default(),
        );
        let prompt = PurchasePrompt::for_kind(PowerupKind::Bomb);

        // The first purchase parks inside spend; the second arrives meanwhile.
        let (first, second) = tokio::join!(controller.confirm_purchase(&prompt), async {
            let outcome = controller.confirm_purchase(&prompt).await;
            gate.notify_one();
            outcome
        });

        assert_eq!(
            first,
            PurchaseOutcome::Applied {
                kind: PowerupKind::Bomb,
                price: 50,
                new_balance: 50,
            }
        );
        assert_eq!(second, PurchaseOutcome::Ineligible(IneligibleReason::Busy));
        assert_eq!(controller.ledger().spends(), vec![50]);
        assert_eq!(controller.effect().applied(), vec![PowerupKind::Bomb]);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_purchase_releases_guard() {
        let gate = Arc::new(Notify::new());
        let controller = PowerupController::new(
            TestLedger::gated(100, gate),
            TestSurface::answering(Confirmation::Confirmed),
            TestEffect::default(),
        );
        let prompt = PurchasePrompt::for_kind(PowerupKind::Bomb);

        tokio::select! {
            biased;
            _ = controller.confirm_purchase(&prompt) => panic!("spend should still be parked"),
            busy = async { controller.is_busy() } => assert!(busy),
        }

        assert!(!controller.is_busy());
        assert!(controller.effect().applied().is_empty());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let flag = AtomicBool::new(false);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = InFlightGuard::acquire(&flag).unwrap();
            assert!(InFlightGuard::acquire(&flag).is_none());
            panic!("effect blew up");
        }));

        assert!(result.is_err());
        assert!(!flag.load(Ordering::SeqCst));
        assert!(InFlightGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_button_states() {
        let controller = controller(60, Confirmation::Confirmed);

        assert_eq!(
            controller.button_state(PowerupKind::Bomb, GamePhase::Playing, 60, false),
            ButtonState::Affordable
        );
        assert_eq!(
            controller.button_state(PowerupKind::Glimpse, GamePhase::Playing, 60, false),
            ButtonState::Unaffordable
        );
        assert_eq!(
            controller.button_state(PowerupKind::Bomb, GamePhase::Complete, 60, false),
            ButtonState::Disabled
        );
        assert_eq!(
            controller.button_state(PowerupKind::Bomb, GamePhase::Playing, 60, true),
            ButtonState::Disabled
        );
    }

    #[test]
    fn test_notice_text() {
        let notice = Notice::InsufficientFunds {
            name: "Skip",
            price: 600,
            balance: 10,
        };
        assert_eq!(notice.title(), "Insufficient Coins");
        assert_eq!(
            notice.message(),
            "You need 600 coins to use Skip. You have 10."
        );
    }
}
