#![forbid(unsafe_code)]

//! TCP transport speaking the segmented message framing.
//!
//! A message is a sequence of segments, each terminated by a line holding
//! `#`; a lone `#` line ends the message. JSON segments carry text spread
//! over one or more lines; binary segments open with `@` and carry
//! size-prefixed chunks.

use crate::error::{Context, Error, Result};
use crate::gateway::dispatcher::RequestDispatcher;
use crate::protocol::{ProtocolRequest, ProtocolResponse, RequestEnvelope, Segment};
use crate::telemetry::runtime_counters;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "turnstone::transport";

/// Hard cap on one JSON segment.
const MAX_JSON_SEGMENT_BYTES: usize = 1_048_576;

/// Listener plus per-connection protocol loop.
pub struct GatewayServer {
    listener: TcpListener,
    dispatcher: Arc<RequestDispatcher>,
    max_stream_bytes: usize,
}

impl GatewayServer {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<RequestDispatcher>,
        max_stream_bytes: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind listener on {addr}"))?;
        Ok(Self {
            listener,
            dispatcher,
            max_stream_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Accept connections until the token fires, then drain the ones still
    /// open. An in-flight request finishes before its connection closes.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            dispatcher,
            max_stream_bytes,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(target: LOG_TARGET, event = "accept_failed", error = %err);
                            continue;
                        }
                    };
                    tracing::debug!(target: LOG_TARGET, event = "connection_accepted", peer = %peer);
                    let dispatcher = Arc::clone(&dispatcher);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        runtime_counters().inc_active_connections();
                        if let Err(err) =
                            serve_connection(stream, dispatcher, max_stream_bytes, shutdown).await
                        {
                            tracing::warn!(
                                target: LOG_TARGET,
                                event = "connection_failed",
                                peer = %peer,
                                error = %err,
                            );
                        }
                        runtime_counters().dec_active_connections();
                    });
                    while let Some(finished) = connections.try_join_next() {
                        if let Err(err) = finished {
                            tracing::warn!(target: LOG_TARGET, event = "connection_task_failed", error = %err);
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        while let Some(finished) = connections.join_next().await {
            if let Err(err) = finished {
                tracing::warn!(target: LOG_TARGET, event = "connection_task_failed", error = %err);
            }
        }
        tracing::info!(target: LOG_TARGET, event = "listener_stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatcher: Arc<RequestDispatcher>,
    max_stream_bytes: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        tokio::select! {
            received = read_request(&mut reader, max_stream_bytes) => {
                match received {
                    Ok(Some(request)) => {
                        let response = dispatcher.dispatch(request).await;
                        write_response(&mut writer, &response).await?;
                    }
                    Ok(None) => return Ok(()),
                    Err(err) => {
                        // Decode failures still earn the caller a framed answer.
                        let response =
                            ProtocolResponse::failure(err.protocol_status(), err.to_string());
                        write_response(&mut writer, &response).await?;
                        return Err(err);
                    }
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

/// Read one request message. `Ok(None)` means the peer closed the connection
/// cleanly between messages.
pub async fn read_request<R>(
    reader: &mut R,
    max_binary_bytes: usize,
) -> Result<Option<ProtocolRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(segments) = read_message(reader, max_binary_bytes).await? else {
        return Ok(None);
    };

    let mut segments = segments.into_iter();
    let envelope = match segments.next() {
        Some(Segment::Json(value)) => value,
        Some(Segment::Bytes(_)) => {
            return Err(Error::MalformedMessage(
                "first request segment must be the JSON envelope".to_string(),
            ))
        }
        None => {
            return Err(Error::MalformedMessage(
                "request message has no segments".to_string(),
            ))
        }
    };
    let envelope: RequestEnvelope = serde_json::from_value(envelope)
        .map_err(|err| Error::MalformedMessage(format!("invalid request envelope: {err}")))?;

    Ok(Some(ProtocolRequest::from_envelope(
        envelope,
        segments.collect(),
    )))
}

/// Read segments up to the message terminator. `Ok(None)` only at a clean
/// EOF before any segment byte.
pub async fn read_message<R>(
    reader: &mut R,
    max_binary_bytes: usize,
) -> Result<Option<Vec<Segment>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut segments = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            if segments.is_empty() {
                return Ok(None);
            }
            return Err(closed_mid_message());
        };
        let trimmed = line.trim();
        if trimmed == "#" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "@" {
            let content = read_binary_segment(reader, max_binary_bytes).await?;
            segments.push(Segment::Bytes(content));
        } else {
            let value = read_json_segment(reader, trimmed).await?;
            segments.push(Segment::Json(value));
        }
    }
    Ok(Some(segments))
}

/// Write a full message: every segment, then the message terminator.
pub async fn write_message<W>(writer: &mut W, segments: &[Segment]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for segment in segments {
        match segment {
            Segment::Json(value) => {
                let encoded = serde_json::to_vec(value)?;
                writer.write_all(&encoded).await?;
                writer.write_all(b"\n#\n").await?;
            }
            Segment::Bytes(bytes) => {
                writer.write_all(b"@\n").await?;
                if !bytes.is_empty() {
                    writer
                        .write_all(format!("{}\n", bytes.len()).as_bytes())
                        .await?;
                    writer.write_all(bytes).await?;
                    writer.write_all(b"\n").await?;
                }
                writer.write_all(b"#\n").await?;
            }
        }
    }
    writer.write_all(b"#\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W>(writer: &mut W, response: &ProtocolResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut segments = Vec::with_capacity(response.output.len() + 1);
    segments.push(Segment::Json(response.envelope_json()));
    segments.extend(response.output.iter().cloned());
    write_message(writer, &segments).await
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

// Line-boundary whitespace is insignificant here: JSON strings cannot
// contain raw newlines, so every line break sits between tokens.
async fn read_json_segment<R>(reader: &mut R, first_line: &str) -> Result<JsonValue>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = first_line.to_string();
    loop {
        let Some(line) = read_line(reader).await? else {
            return Err(closed_mid_message());
        };
        let trimmed = line.trim();
        if trimmed == "#" {
            break;
        }
        buffer.push('\n');
        buffer.push_str(trimmed);
        if buffer.len() > MAX_JSON_SEGMENT_BYTES {
            return Err(Error::MalformedMessage(format!(
                "JSON segment exceeds the {MAX_JSON_SEGMENT_BYTES} byte limit"
            )));
        }
    }
    serde_json::from_str(&buffer)
        .map_err(|err| Error::MalformedMessage(format!("segment is not valid JSON: {err}")))
}

async fn read_binary_segment<R>(reader: &mut R, max_bytes: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut content: Vec<u8> = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            return Err(closed_mid_message());
        };
        let trimmed = line.trim();
        if trimmed == "#" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        let size: usize = trimmed
            .parse()
            .map_err(|_| Error::MalformedMessage(format!("invalid binary chunk size `{trimmed}`")))?;
        // Cap check happens before any allocation for the chunk.
        if content.len() + size > max_bytes {
            return Err(Error::MalformedMessage(format!(
                "binary segment exceeds the {max_bytes} byte limit"
            )));
        }
        let start = content.len();
        content.resize(start + size, 0);
        reader.read_exact(&mut content[start..]).await?;
        let Some(terminator) = read_line(reader).await? else {
            return Err(closed_mid_message());
        };
        if !terminator.trim().is_empty() {
            return Err(Error::MalformedMessage(
                "binary chunk is not newline terminated".to_string(),
            ));
        }
    }
    Ok(Bytes::from(content))
}

fn closed_mid_message() -> Error {
    Error::MalformedMessage("connection closed inside a message".to_string())
}
