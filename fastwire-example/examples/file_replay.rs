/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! File capture and replay example.
//!
//! This example records a quote feed to a capture file through a
//! `WriteSink`, then replays the file through a `ReadSource`. The capture is
//! written to `FASTWIRE_CAPTURE` or to the system temp directory.

mod common;

use common::{init_logging, load_config, quote_count};
use fastwire::prelude::*;
use fastwire_example::{QuoteTemplate, sample_feed};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tracing::info;

fn capture_path() -> PathBuf {
    std::env::var_os("FASTWIRE_CAPTURE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("fastwire_quotes.fast"))
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = load_config()?;
    let template = QuoteTemplate::new()?;
    let dictionary = template.dictionary()?;
    let feed = sample_feed(quote_count());
    let path = capture_path();

    info!("Recording {} quotes to {}", feed.len(), path.display());
    let file = BufWriter::new(File::create(&path)?);
    let mut encoder = FastEncoder::with_config(WriteSink::new(file), &config, dictionary.clone())?;
    for quote in &feed {
        template.encode(&mut encoder, quote)?;
    }
    encoder.finish()?;
    info!(bytes = std::fs::metadata(&path)?.len(), "Capture complete");

    info!("Replaying {}", path.display());
    let file = BufReader::new(File::open(&path)?);
    let mut decoder = FastDecoder::with_config(ReadSource::new(file), &config, dictionary)?;
    let mut replayed = Vec::with_capacity(feed.len());
    while let Some(quote) = template.decode(&mut decoder)? {
        replayed.push(quote);
    }

    anyhow::ensure!(
        replayed == feed,
        "replayed {} quotes, recorded {}",
        replayed.len(),
        feed.len()
    );
    if let Some(last) = replayed.last() {
        info!(
            seq = last.seq,
            bid = %last.bid,
            "Last quote: {}",
            serde_json::to_string(last)?
        );
    }
    info!(quotes = replayed.len(), bytes = decoder.total_read(), "Replay complete");
    Ok(())
}
