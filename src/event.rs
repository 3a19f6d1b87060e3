//! Terminal input events, bridged onto the async controller loop.
//!
//! Key reading is blocking in crossterm, so a dedicated blocking task polls
//! and forwards events over a channel; the controller consumes them alongside
//! snapshot updates and redraw ticks.

use std::time::Duration;

use crossterm::event::{Event as TermEvent, KeyEvent, KeyEventKind};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize(u16, u16),
}

/// Spawn the blocking key reader. It exits when the receiver is dropped.
pub fn spawn_input_reader(tx: mpsc::Sender<AppEvent>) {
    tokio::task::spawn_blocking(move || loop {
        if tx.is_closed() {
            break;
        }
        match crossterm::event::poll(POLL_INTERVAL) {
            Ok(true) => match crossterm::event::read() {
                Ok(TermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                    if tx.blocking_send(AppEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(TermEvent::Resize(w, h)) => {
                    if tx.blocking_send(AppEvent::Resize(w, h)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            Ok(false) => {}
            Err(_) => break,
        }
    });
}
