// Synchronous upstream call presented as an SSE stream
use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use keyrelay_types::protocol::ChatCompletionResponse;
use keyrelay_types::GatewayError;

use super::sse::{completion_frames, done_line, error_line, sse_line, ChunkMeta, SseStream};

enum Race {
    Finished(Result<ChatCompletionResponse, GatewayError>),
    Heartbeat,
}

/// Stream heartbeats every `interval` while `call` is pending, then the answer.
///
/// The first heartbeat goes out one full interval after the stream opens, so a
/// call that resolves after N intervals yields exactly N heartbeats. A failed
/// call ends the stream with an error frame. Dropping the stream drops `call`.
pub fn create_fake_sse_stream<F>(call: F, model: String, interval: Duration) -> SseStream
where
    F: Future<Output = Result<ChatCompletionResponse, GatewayError>> + Send + 'static,
{
    let meta = ChunkMeta::new(model);

    let stream = async_stream::stream! {
        let mut call = Box::pin(call);
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeats = 0u32;

        let outcome = loop {
            let race = tokio::select! {
                biased;
                result = &mut call => Race::Finished(result),
                _ = ticker.tick() => Race::Heartbeat,
            };
            match race {
                Race::Finished(result) => break result,
                Race::Heartbeat => {
                    heartbeats += 1;
                    yield Ok::<_, String>(sse_line(&meta.heartbeat()));
                },
            }
        };

        match outcome {
            Ok(response) => {
                tracing::debug!("[Fake-SSE] {} answered after {} heartbeats", meta.model, heartbeats);
                for frame in completion_frames(&meta, &response) {
                    yield Ok(frame);
                }
            },
            Err(err) => {
                tracing::warn!("[Fake-SSE] {} failed after {} heartbeats: {}", meta.model, heartbeats, err);
                yield Ok(error_line(&err));
            },
        }
        yield Ok(done_line());
    };

    Box::pin(stream)
}
