//! Confirmation for destructive operations

use std::io::IsTerminal;
use tracing::warn;

/// Asks the user to approve a destructive operation.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Interactive y/N prompt on the terminal, defaulting to no.
///
/// Declines when stdin is not a terminal, so unattended runs never remove
/// anything without `--force`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            return false;
        }
        let answer = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact_opt();
        accepted(answer)
    }
}

/// Only an explicit yes approves; an aborted prompt or a terminal error
/// declines.
fn accepted(answer: Result<Option<bool>, dialoguer::Error>) -> bool {
    match answer {
        Ok(Some(yes)) => yes,
        Ok(None) => false,
        Err(e) => {
            warn!("Confirmation prompt failed: {}", e);
            false
        }
    }
}

/// Always gives the same answer.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub bool);

#[cfg(test)]
impl Confirm for Fixed {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_explicit_yes_is_accepted() {
        assert!(accepted(Ok(Some(true))));
        assert!(!accepted(Ok(Some(false))));
        assert!(!accepted(Ok(None)));
        let broken = dialoguer::Error::IO(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
        assert!(!accepted(Err(broken)));
    }
}
