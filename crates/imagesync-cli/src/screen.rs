//! The image list screen: loading, failed with retry, or ready.

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Result;
use imagesync_core::{DisplayRecord, ImageServer, SyncError, SyncManager, SyncOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::format::{format_size, truncate_string};

/// Initial backoff delay in milliseconds between automatic retries.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Characters of the data URI shown per record.
const URI_PREVIEW_LEN: usize = 48;

#[derive(Debug)]
pub enum ScreenState {
    Loading,
    Ready(Vec<DisplayRecord>),
    Failed { message: String, retryable: bool },
}

impl ScreenState {
    fn from_error(error: &SyncError) -> Self {
        ScreenState::Failed {
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

pub struct Screen {
    pub state: ScreenState,
    json: bool,
    // Offer the retry prompt once automatic retries run out
    interactive: bool,
}

impl Screen {
    pub fn new(json: bool) -> Self {
        Self {
            state: ScreenState::Loading,
            json,
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Sync, then show the records. Retries retryable failures `retries`
    /// times with exponential backoff, then asks on an interactive terminal.
    pub async fn run<S: ImageServer>(&mut self, manager: &SyncManager<S>, retries: u32) -> Result<()> {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            self.state = ScreenState::Loading;
            self.render()?;

            self.state = match Self::load(manager).await {
                Ok(records) => ScreenState::Ready(records),
                Err(e) => ScreenState::from_error(&e),
            };
            self.render()?;

            let ScreenState::Failed { retryable, .. } = self.state else {
                return Ok(());
            };
            if !retryable {
                anyhow::bail!("sync failed");
            }

            attempt += 1;
            if attempt <= retries {
                warn!(attempt = attempt, backoff_ms = backoff_ms, "Retrying sync");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
            } else if !self.interactive || !Self::prompt_retry().await? {
                anyhow::bail!("sync failed");
            }
        }
    }

    async fn load<S: ImageServer>(manager: &SyncManager<S>) -> Result<Vec<DisplayRecord>, SyncError> {
        match manager.ensure_synced().await? {
            SyncOutcome::AlreadySynced => info!("Using cached images"),
            SyncOutcome::Synced { assets } => info!(assets = assets, "Downloaded images"),
        }
        manager.load_display_records().await
    }

    /// Ask on stdin whether to retry.
    async fn prompt_retry() -> Result<bool> {
        eprint!("Retry? [y/N] ");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(matches!(line.trim(), "y" | "Y" | "yes"))
    }

    pub fn render(&self) -> Result<()> {
        match &self.state {
            ScreenState::Loading => eprintln!("loading..."),
            ScreenState::Failed { message, retryable } => {
                eprintln!("Sync failed: {}", message);
                if *retryable {
                    eprintln!("The image server or store may be temporarily unavailable.");
                }
            }
            ScreenState::Ready(records) if self.json => {
                println!("{}", serde_json::to_string_pretty(records)?);
            }
            ScreenState::Ready(records) => print!("{}", Self::format_records(records)),
        }
        Ok(())
    }

    fn format_records(records: &[DisplayRecord]) -> String {
        if records.is_empty() {
            return "No images.\n".to_string();
        }
        let mut out = String::new();
        for (index, record) in records.iter().enumerate() {
            let payload_len = record.uri.split_once(',').map(|(_, b)| b.len()).unwrap_or(0);
            out.push_str(&format!(
                "{:>3}. {}  ({})\n     {}\n",
                index + 1,
                record.name,
                format_size(payload_len),
                truncate_string(&record.uri, URI_PREVIEW_LEN)
            ));
        }
        out
    }
}
