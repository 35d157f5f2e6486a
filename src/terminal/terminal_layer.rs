// Terminal layer - stands in for the game screen when running from a shell.

pub mod console;
pub mod demo_board;
pub mod session;

pub use console::{Console, TerminalSurface};
pub use demo_board::DemoBoard;
pub use session::run_session;
