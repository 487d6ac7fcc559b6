/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! In-memory quote feed example.
//!
//! This example encodes a generated quote feed into memory, then decodes it
//! from a source that hands out a few bytes at a time and occasionally
//! stalls, the way a socket does under load.

mod common;

use common::{init_logging, load_config, quote_count};
use fastwire::prelude::*;
use fastwire_example::{QuoteTemplate, sample_feed};
use tracing::{debug, info, warn};

/// Bytes handed out per fill by the trickling source.
const CHUNK_SIZE: usize = 7;

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = load_config()?;
    let template = QuoteTemplate::new()?;
    let dictionary = template.dictionary()?;
    let feed = sample_feed(quote_count());
    info!(
        quotes = feed.len(),
        buffer_size = config.buffer_size,
        "Encoding quote feed"
    );

    let mut encoder = FastEncoder::with_config(MemorySink::new(), &config, dictionary.clone())?;
    for quote in &feed {
        template.encode(&mut encoder, quote)?;
    }
    let sink = encoder.finish()?;
    let encoded = sink.len();
    let mut json_size = 0usize;
    for quote in &feed {
        json_size += serde_json::to_vec(quote)?.len();
    }
    info!(
        bytes = encoded,
        json_bytes = json_size,
        "Encoded {:.2} bytes per quote",
        encoded as f64 / feed.len().max(1) as f64
    );

    let source = MemorySource::new(sink.into_bytes())
        .with_chunk_size(CHUNK_SIZE)
        .with_stalls();
    let mut decoder = FastDecoder::with_config(source, &config, dictionary)?;
    let mut decoded = 0usize;
    while let Some(quote) = template.decode(&mut decoder)? {
        if feed.get(decoded) != Some(&quote) {
            warn!(seq = quote.seq, "Decoded quote differs from the encoded one");
            anyhow::bail!("round trip mismatch at quote {}", quote.seq);
        }
        if quote.seq % 100 == 0 {
            debug!("Quote: {}", serde_json::to_string(&quote)?);
        }
        decoded += 1;
    }

    info!(
        quotes = decoded,
        bytes = decoder.total_read(),
        "Decoded quote feed"
    );
    Ok(())
}
