//! Interactive confirmation on the controlling terminal.

use async_trait::async_trait;
use ghe_restore_core::{Confirmation, Error, Result};
use std::io::{BufRead, Write};

/// Reads the operator's answer from stdin. Blocks until a line arrives.
pub struct StdinConfirmation;

#[async_trait]
impl Confirmation for StdinConfirmation {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut stderr = std::io::stderr().lock();
            write!(stderr, "{}", prompt)?;
            stderr.flush()?;

            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            Ok(answer)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}
