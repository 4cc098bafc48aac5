//! Operator confirmation prompts.

use log::warn;
use std::io::{self, BufRead, IsTerminal, Write};
use std::thread::sleep;
use std::time::Duration;

/// How long a prompt waits before taking its default when nobody can answer it
const NON_INTERACTIVE_DELAY: Duration = Duration::from_secs(3);

/// Asks the operator a yes/no question
pub(crate) trait Prompt: Send + Sync {
    fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Prompts on the controlling terminal.  When stdin isn't a terminal the default answer is taken
/// after a short pause, so piped runs don't hang.
#[derive(Debug, Default)]
pub(crate) struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str, default: bool) -> bool {
        let choices = if default { "[Y/n]" } else { "[y/N]" };
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            warn!(
                "{} {}: not interactive, answering '{}' in {}s",
                question,
                choices,
                if default { "yes" } else { "no" },
                NON_INTERACTIVE_DELAY.as_secs()
            );
            sleep(NON_INTERACTIVE_DELAY);
            return default;
        }

        loop {
            print!("{} {} ", question, choices);
            // Prompt text only; a failed flush just delays it.
            let _ = io::stdout().flush();

            let mut answer = String::new();
            if stdin.lock().read_line(&mut answer).is_err() {
                return default;
            }
            match parse_answer(&answer) {
                Some(answer) => return answer,
                None if answer.trim().is_empty() => return default,
                None => println!("Please answer 'yes' or 'no'"),
            }
        }
    }
}

fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Always gives the same answer
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedAnswer(pub(crate) bool);

#[cfg(test)]
impl Prompt for FixedAnswer {
    fn confirm(&self, _question: &str, _default: bool) -> bool {
        self.0
    }
}
