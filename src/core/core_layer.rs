// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "powerups/mod.rs"]
pub mod powerups;
