use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, warn};

/// Yes/no confirmation from the operator
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// Confirms everything; used with `--yes` or `infra.auto_confirm`
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, question: &str) -> bool {
        debug!("Auto-confirming: {}", question);
        true
    }
}

/// Single key press on the terminal: `y` confirms, anything else declines
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    timeout: Duration,
}

impl TerminalPrompt {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Confirm for TerminalPrompt {
    async fn confirm(&self, question: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            warn!("Cannot ask '{}': stdin is not a terminal", question);
            return false;
        }

        let question = question.to_string();
        let limit = self.timeout;

        task::spawn_blocking(move || read_confirmation(&question, limit))
            .await
            .unwrap_or(false)
    }
}

fn read_confirmation(question: &str, limit: Duration) -> bool {
    print!("{} [y/N] ", question);
    let _ = std::io::stdout().flush();

    if let Err(e) = enable_raw_mode() {
        warn!("Failed to enable raw mode for confirmation: {}", e);
        return false;
    }

    let deadline = Instant::now() + limit;
    let mut answer = false;

    while Instant::now() < deadline {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {
                if let Ok(Event::Key(key_event)) = event::read() {
                    // Only handle key press events (not release)
                    if key_event.kind == KeyEventKind::Press {
                        answer = matches!(key_event.code, KeyCode::Char('y') | KeyCode::Char('Y'));
                        break;
                    }
                }
            }
            Ok(false) => continue,
            Err(e) => {
                warn!("Error polling for confirmation input: {}", e);
                break;
            }
        }
    }

    let _ = disable_raw_mode();
    println!("{}", if answer { "y" } else { "n" });
    answer
}
