//! Terminal consent prompt

use async_trait::async_trait;
use rollcall_api::PromptContext;
use rollcall_platform::ConsentPrompt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Asks on stdin, or answers yes up front when `assume_yes` is set
pub struct TerminalPrompt {
    assume_yes: bool,
}

impl TerminalPrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl ConsentPrompt for TerminalPrompt {
    async fn ask(&self, context: PromptContext) -> bool {
        println!("{}", context.title());
        println!("{}", context.message());

        if self.assume_yes {
            println!("Allow location access? [y/N] y");
            return true;
        }

        println!("Allow location access? [y/N]");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                warn!(error = %e, "Failed to read consent answer");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
