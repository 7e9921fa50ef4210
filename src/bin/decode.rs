//! Receiving-side decoder for relayed messages.
//!
//! Reads the delivered chunks (each ending with its `PART i OF n` marker),
//! reassembles them, verifies and decrypts the token and prints the JSON
//! payload.
//!
//! Usage: `relay-decode [FILE...]` with the key in `RELAY_FERNET_KEY`.
//! Chunks may be pasted back to back, each ending at its marker line.
//! Reads stdin when no file is given.

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};

use relaybot::packager::{Fernet, Packager, CHUNK_SIZE};

const MARKER_END: &str = " ========";

/// Split raw text holding several marked chunks back into chunks.
fn split_chunks(input: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in input.lines() {
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if line.starts_with("======== PART ") && line.ends_with(MARKER_END) {
            chunks.push(current.trim_start_matches('\n').to_string());
            current.clear();
        }
    }
    chunks
}

fn main() -> Result<()> {
    let key = std::env::var("RELAY_FERNET_KEY").context("RELAY_FERNET_KEY is not set")?;
    let ttl = std::env::var("RELAY_TTL_SECS")
        .ok()
        .map(|secs| secs.parse::<u64>().map(Duration::from_secs))
        .transpose()
        .context("RELAY_TTL_SECS must be a number of seconds")?;

    let mut input = String::new();
    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read stdin")?;
    } else {
        for file in &files {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file))?;
            input.push_str(&content);
            input.push('\n');
        }
    }

    let chunks = split_chunks(&input);
    if chunks.is_empty() {
        anyhow::bail!("no marked parts found in input");
    }

    let packager = Packager::new(Fernet::new(&key)?, CHUNK_SIZE);
    let payload = packager
        .unpack(&chunks, ttl)
        .context("Message rejected")?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
