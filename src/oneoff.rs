//! One-off query execution without the actor.
//!
//! Connects, sends, reads, closes. The response is line-terminated rather
//! than fixed16-framed because nothing here forces `ResponseHeader: fixed16`;
//! this path is meant for ad-hoc and CLI use. Failures of any phase are
//! reported inside the returned [`QueryResult`] with status 500 so callers
//! have a single shape to handle.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::LivestatusConfig;
use crate::connection::{self, Stream};
use crate::error::LivestatusError;
use crate::protocol::{STATUS_INTERNAL_SERVER_ERROR, STATUS_OK};
use crate::query::LivestatusQuery;
use crate::QueryResult;

/// Executes a Livestatus query directly, bypassing the actor.
///
/// The caller's `ctx` covers the connect phase: it is raced against the
/// dial, so cancelling it aborts (or shortens) connection establishment
/// ahead of the configured `connect_timeout`. The read phase is bounded by
/// `read_timeout` alone.
pub async fn query_oneoff(
    ctx: &CancellationToken,
    config: &LivestatusConfig,
    query: &str,
) -> QueryResult {
    if ctx.is_cancelled() {
        return QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, LivestatusError::Cancelled);
    }
    let transport = tokio::select! {
        connected = connection::connect(config) => match connected {
            Ok(transport) => transport,
            Err(e) => return QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, e),
        },
        _ = ctx.cancelled() => {
            return QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, LivestatusError::Cancelled)
        }
    };
    let mut stream = transport.into_stream();

    // The request must end with a blank line per the livestatus protocol.
    let mut rendered = query.to_string();
    if !rendered.ends_with("\n\n") {
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        rendered.push('\n');
    }
    debug!(address = %config.address, query = %rendered, "one-off query");

    if let Err(e) = stream.write_all(rendered.as_bytes()).await {
        return QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, LivestatusError::Io(e));
    }

    // One read deadline covers the entire response.
    let outcome = if config.read_timeout > Duration::ZERO {
        match timeout(config.read_timeout, read_response(stream)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return QueryResult::err(
                    STATUS_INTERNAL_SERVER_ERROR,
                    LivestatusError::Timeout {
                        phase: "read",
                        after: config.read_timeout,
                    },
                )
            }
        }
    } else {
        read_response(stream).await
    };

    match outcome {
        Ok(data) => QueryResult::ok(STATUS_OK, data),
        Err(e) => QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, LivestatusError::Io(e)),
    }
}

/// Executes a query assembled with [`LivestatusQuery`] directly.
pub async fn query_oneoff_from_builder(
    ctx: &CancellationToken,
    config: &LivestatusConfig,
    query: &LivestatusQuery,
) -> QueryResult {
    query_oneoff(ctx, config, &query.build()).await
}

/// Reads until a line that is only `\n` arrives with nothing further
/// buffered, or until EOF. Returns all bytes including the terminator.
async fn read_response(stream: Stream) -> std::io::Result<Vec<u8>> {
    let mut reader = BufReader::new(stream);
    let mut response = Vec::new();
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        response.extend_from_slice(&line);
        if n == 0 {
            // EOF is expected at end of response.
            break;
        }
        if line == b"\n" && reader.buffer().is_empty() {
            break;
        }
    }
    Ok(response)
}
