//! Key input for trigger detection and the abort path.
//!
//! Presses from every producer (terminal, sync-pulse generator, tests) land
//! in one [`Keyboard`] buffer, which the trigger polls by key name.

pub mod keyboard;
pub mod terminal;
pub mod types;

pub use keyboard::{KeySender, Keyboard};
pub use terminal::TerminalListener;
pub use types::KeyEvent;
