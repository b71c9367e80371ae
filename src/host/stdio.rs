//! Stdin/stdout JSON bridge for the progression engine.
//!
//! Reads newline-delimited JSON `InboundEnvelope` messages, runs each as a
//! turn for its user and writes one `OutboundEnvelope` line per message.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::EcosError;
use crate::engine::ProgressionEngine;
use crate::host::contract::{InboundEnvelope, OutboundEnvelope};
use crate::store::UserId;

/// Envelopes a user may have waiting before new ones are refused.
const USER_QUEUE_CAPACITY: usize = 32;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge on the process's stdin and stdout until stdin closes.
pub async fn run_stdio_bridge(engine: Arc<ProgressionEngine>) -> crate::Result<()> {
    run_bridge(engine, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the bridge over arbitrary streams.
///
/// Each user gets a worker that handles that user's envelopes in arrival
/// order; workers for different users run concurrently. Returns once input
/// reaches EOF and every queued envelope has been answered.
///
/// A user whose queue is full gets an error envelope for the overflowing
/// request; the reader never waits on one user's backlog.
pub async fn run_bridge<R, W>(
    engine: Arc<ProgressionEngine>,
    input: R,
    output: W,
) -> crate::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    serve(engine, input, output, USER_QUEUE_CAPACITY).await
}

async fn serve<R, W>(
    engine: Arc<ProgressionEngine>,
    input: R,
    output: W,
    queue_capacity: usize,
) -> crate::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));
    let mut lines = BufReader::new(input).lines();
    let mut queues: HashMap<UserId, mpsc::Sender<InboundEnvelope>> = HashMap::new();
    let mut workers = JoinSet::new();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| EcosError::Transport(format!("failed to read input: {e}")))?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: InboundEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse inbound envelope");
                let response = OutboundEnvelope::error(
                    "parse-error",
                    format!("failed to parse inbound envelope: {e}"),
                );
                write_envelope(&writer, &response).await?;
                continue;
            }
        };
        if let Err(e) = envelope.validate() {
            tracing::warn!(request_id = %envelope.request_id, error = %e, "invalid envelope");
            let response = OutboundEnvelope::error(envelope.request_id, e.to_string());
            write_envelope(&writer, &response).await?;
            continue;
        }

        let user_id = envelope.user_id;
        let sender = queues.entry(user_id).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(queue_capacity);
            workers.spawn(user_worker(
                Arc::clone(&engine),
                user_id,
                rx,
                Arc::clone(&writer),
            ));
            tx
        });
        match sender.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    user_id,
                    request_id = %envelope.request_id,
                    "user queue full; refusing envelope"
                );
                let response = OutboundEnvelope::error(
                    envelope.request_id,
                    "too many pending requests, try again",
                );
                write_envelope(&writer, &response).await?;
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                tracing::error!(
                    user_id,
                    request_id = %envelope.request_id,
                    "user worker stopped; dropping envelope"
                );
                queues.remove(&user_id);
            }
        }
    }

    tracing::info!("input closed (EOF); draining user workers");
    drop(queues);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "user worker failed"),
            Err(e) => tracing::error!(error = %e, "user worker panicked"),
        }
    }
    Ok(())
}

async fn user_worker<W>(
    engine: Arc<ProgressionEngine>,
    user_id: UserId,
    mut rx: mpsc::Receiver<InboundEnvelope>,
    writer: SharedWriter<W>,
) -> crate::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(envelope) = rx.recv().await {
        let response = match engine.handle(user_id, envelope.event).await {
            Ok(reply) => OutboundEnvelope::ok(envelope.request_id, reply),
            Err(e) => {
                tracing::error!(
                    user_id,
                    request_id = %envelope.request_id,
                    error = %e,
                    "turn failed"
                );
                OutboundEnvelope::error(envelope.request_id, "nothing happened, try again")
            }
        };
        write_envelope(&writer, &response).await?;
    }
    Ok(())
}

async fn write_envelope<W>(writer: &SharedWriter<W>, envelope: &OutboundEnvelope) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(envelope)
        .map_err(|e| EcosError::Protocol(format!("failed to serialize envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

/// Write a single JSON line to the buffered writer and flush.
async fn write_line<W>(writer: &mut BufWriter<W>, json: &str) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| EcosError::Transport(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| EcosError::Transport(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| EcosError::Transport(format!("failed to flush output: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::content::ContentBroker;
    use crate::engine::FixedClock;
    use crate::store::SqliteStore;
    use chrono::NaiveDate;
    use tokio::io::AsyncReadExt;

    fn engine() -> Arc<ProgressionEngine> {
        let store = SqliteStore::open_in_memory().expect("store");
        Arc::new(ProgressionEngine::new(
            Arc::new(store),
            Arc::new(ContentBroker::fallback_only(FlowConfig::default())),
            Arc::new(FixedClock::new(
                NaiveDate::from_ymd_opt(2025, 3, 1).expect("date"),
            )),
        ))
    }

    async fn run(input: &str) -> Vec<OutboundEnvelope> {
        let (out_tx, mut out_rx) = tokio::io::duplex(1 << 16);
        let bridge = run_bridge(engine(), input.as_bytes(), out_tx);
        let mut raw = String::new();
        let (result, _) = tokio::join!(bridge, out_rx.read_to_string(&mut raw));
        result.expect("bridge");
        raw.lines()
            .map(|l| serde_json::from_str(l).expect("outbound json"))
            .collect()
    }

    #[tokio::test]
    async fn parse_error_yields_error_envelope_and_continues() {
        let out = run("not json\n{\"request_id\":\"r1\",\"user_id\":1,\"event\":{\"type\":\"welcome\"}}\n").await;
        assert_eq!(out.len(), 2);
        let parse_err = out.iter().find(|e| e.request_id == "parse-error").expect("error");
        assert!(!parse_err.ok);
        let ok = out.iter().find(|e| e.request_id == "r1").expect("reply");
        assert!(ok.ok);
    }

    #[tokio::test]
    async fn same_user_envelopes_answer_in_order() {
        let input = [
            r#"{"request_id":"a","user_id":7,"event":{"type":"today"}}"#,
            r#"{"request_id":"b","user_id":7,"event":{"type":"start_step"}}"#,
            r#"{"request_id":"c","user_id":7,"event":{"type":"exit"}}"#,
        ]
        .join("\n");
        let out = run(&input).await;
        let ids: Vec<&str> = out.iter().map(|e| e.request_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(out.iter().all(|e| e.ok));
    }

    #[tokio::test]
    async fn full_user_queue_does_not_stall_other_users() {
        use std::time::Duration;

        let engine = engine();
        // Holding user 1's session blocks that user's worker mid-turn.
        let session = engine.sessions().get_or_create(1);
        let guard = session.lock().await;

        let mut lines: Vec<String> = (0..5)
            .map(|i| format!(r#"{{"request_id":"u1-{i}","user_id":1,"event":{{"type":"status"}}}}"#))
            .collect();
        lines.push(r#"{"request_id":"u2","user_id":2,"event":{"type":"welcome"}}"#.to_owned());
        let input = std::io::Cursor::new(lines.join("\n").into_bytes());

        let (out_tx, out_rx) = tokio::io::duplex(1 << 16);
        let bridge = tokio::spawn(serve(Arc::clone(&engine), input, out_tx, 1));
        let mut out = BufReader::new(out_rx).lines();

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(line) = out.next_line().await.expect("read") {
                let env: OutboundEnvelope = serde_json::from_str(&line).expect("json");
                let done = env.request_id == "u2";
                seen.push(env);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("user 2 was answered while user 1 was blocked");

        let refused = seen
            .iter()
            .filter(|e| !e.ok && e.request_id.starts_with("u1-"))
            .count();
        assert!(refused >= 3, "only {refused} envelopes refused");
        assert!(seen.iter().any(|e| e.request_id == "u2" && e.ok));

        drop(guard);
        while let Some(line) = out.next_line().await.expect("read") {
            seen.push(serde_json::from_str(&line).expect("json"));
        }
        bridge.await.expect("join").expect("bridge");
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test]
    async fn empty_request_id_is_rejected() {
        let out = run(r#"{"request_id":" ","user_id":1,"event":{"type":"status"}}"#).await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].ok);
    }
}
