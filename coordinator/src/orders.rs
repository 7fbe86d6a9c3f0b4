//! Reads the incoming order stream: one JSON-encoded [`Order`] per line,
//! from a configured file or from standard input when no path is set.

use marketplace_core::Order;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Errors reading the order input stream.
#[derive(Debug, Error)]
pub enum OrderSourceError {
    /// The configured input file could not be opened.
    #[error("failed to open order input {path}: {reason}")]
    Open {
        /// Path that failed to open.
        path: String,
        /// Underlying IO error.
        reason: String,
    },
}

/// Load every order from `path`, or from stdin if `path` is `None`,
/// skipping and logging any line that fails to parse rather than failing
/// the whole batch.
///
/// # Errors
///
/// Returns [`OrderSourceError::Open`] if a configured file path cannot be
/// opened.
pub async fn load_orders(path: Option<&str>) -> Result<Vec<Order>, OrderSourceError> {
    let lines = match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| OrderSourceError::Open { path: path.to_string(), reason: e.to_string() })?;
            read_lines(BufReader::new(file)).await
        }
        None => read_lines(BufReader::new(tokio::io::stdin())).await,
    };

    let mut orders = Vec::with_capacity(lines.len());
    for (line_number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Order>(&line) {
            Ok(order) => orders.push(order),
            Err(error) => {
                tracing::warn!(line_number, %error, "skipping unparseable order line");
            }
        }
    }
    Ok(orders)
}

async fn read_lines<R: tokio::io::AsyncRead + Unpin>(reader: BufReader<R>) -> Vec<String> {
    let mut lines = reader.lines();
    let mut collected = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => collected.push(line),
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "order input stream read error, stopping early");
                break;
            }
        }
    }
    collected
}
