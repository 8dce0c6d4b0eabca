//! Terminal key capture.
//!
//! Puts the terminal in raw mode and forwards key presses from a background
//! thread. Keyboard-emulating trigger boxes (and the operator's abort key)
//! reach the program this way when it runs in a console.

use crate::input::keyboard::KeySender;
use crate::input::types::KeyEvent;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the reader blocks before re-checking the running flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Background reader forwarding terminal key presses to a key buffer.
pub struct TerminalListener {
    sender: KeySender,
    abort_key: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TerminalListener {
    /// Create a listener. Ctrl+C is delivered as `abort_key`, since raw mode
    /// swallows the interrupt signal.
    pub fn new(sender: KeySender, abort_key: impl Into<String>) -> Self {
        Self {
            sender,
            abort_key: abort_key.into(),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Enter raw mode and start forwarding presses.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        terminal::enable_raw_mode()?;
        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();
        let abort_key = self.abort_key.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = run_reader(&sender, &running, &abort_key) {
                tracing::error!("terminal reader stopped: {e}");
            }
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        tracing::debug!("terminal key capture started");
        Ok(())
    }

    /// Stop forwarding and restore the terminal.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            if let Err(e) = terminal::disable_raw_mode() {
                tracing::warn!("could not restore terminal mode: {e}");
            }
            tracing::debug!("terminal key capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TerminalListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_reader(sender: &KeySender, running: &AtomicBool, abort_key: &str) -> std::io::Result<()> {
    while running.load(Ordering::SeqCst) {
        if !event::poll(POLL_TIMEOUT)? {
            continue;
        }
        let at = Instant::now();
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Release {
                continue;
            }
            let name = if is_interrupt(&key) {
                Some(abort_key.to_string())
            } else {
                key_name(key.code)
            };
            if let Some(name) = name {
                sender.send(KeyEvent::at(name, at));
            }
        }
    }
    Ok(())
}

fn is_interrupt(key: &event::KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
}

/// Name used in key lists for a terminal key code.
pub fn key_name(code: KeyCode) -> Option<String> {
    let name = match code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(c) => c.to_lowercase().to_string(),
        KeyCode::Esc => "escape".to_string(),
        KeyCode::Enter => "return".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::F(n) => format!("f{n}"),
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(KeyCode::Char('5')).as_deref(), Some("5"));
        assert_eq!(key_name(KeyCode::Char('T')).as_deref(), Some("t"));
        assert_eq!(key_name(KeyCode::Char(' ')).as_deref(), Some("space"));
        assert_eq!(key_name(KeyCode::Esc).as_deref(), Some("escape"));
        assert_eq!(key_name(KeyCode::Enter).as_deref(), Some("return"));
        assert_eq!(key_name(KeyCode::F(5)).as_deref(), Some("f5"));
        assert_eq!(key_name(KeyCode::Insert), None);
    }

    #[test]
    fn test_ctrl_c_is_interrupt() {
        let ctrl_c = event::KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        };
        assert!(is_interrupt(&ctrl_c));

        let plain_c = event::KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert!(!is_interrupt(&plain_c));
    }

    #[test]
    fn test_listener_not_running_before_start() {
        let keyboard = crate::input::Keyboard::new();
        let listener = TerminalListener::new(keyboard.sender(), "escape");
        assert!(!listener.is_running());
    }
}
