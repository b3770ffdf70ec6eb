use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub const PROMPT: &str = "gopuTN > ";
pub const WS_PROMPT: &str = "gopuTN(ws) > ";

/// Source of user input lines. `None` means the input is exhausted.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self, prompt: &str) -> std::io::Result<Option<String>>;
}

/// Interactive terminal input: prints the prompt and reads one line.
pub struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineSource for StdinSource {
    async fn next_line(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        let mut stdout = std::io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        self.lines.next_line().await
    }
}

/// Pre-recorded input, used for one-shot mode and in tests.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    lines: VecDeque<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

#[async_trait]
impl LineSource for ScriptedSource {
    async fn next_line(&mut self, _prompt: &str) -> std::io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}
