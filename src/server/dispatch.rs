//! Top-level dispatch loop.
//!
//! One loop drives the whole service: every inbound frame spawns an
//! independent task that decodes, admits or rejects, scores, and answers.
//! Unrelated requests never serialize behind one another, and no per-request
//! failure can terminate the loop.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::protocol::{self, ScoreResponse};
use crate::server::ServerState;
use crate::transport::{ClientId, MuxSender, MuxSocket};

/// Run the dispatch loop until the transport tears down.
pub async fn run(mut socket: MuxSocket, state: Arc<ServerState>) -> Result<()> {
    let sender = socket.sender();
    loop {
        let (client, frame) = socket.receive().await?;
        let state = Arc::clone(&state);
        let sender = sender.clone();
        tokio::spawn(async move {
            handle_message(state, sender, client, frame).await;
        });
    }
}

/// Handle one inbound message end to end. Never propagates an error.
async fn handle_message(
    state: Arc<ServerState>,
    sender: MuxSender,
    client: ClientId,
    frame: Bytes,
) {
    state.metrics.record_request();
    let response = process(&state, client, &frame).await;

    match serde_json::to_vec(&response) {
        Ok(payload) => {
            if let Err(e) = sender.send(client, payload.into()).await {
                warn!("dropping response for {}: {}", client, e);
                return;
            }
            state.metrics.record_response();
        }
        Err(e) => error!("failed to encode response for {}: {}", client, e),
    }
}

/// Decode, admit, score, release: one request unit's state machine.
async fn process(state: &ServerState, client: ClientId, frame: &[u8]) -> ScoreResponse {
    let request_id = match protocol::read_request_id(frame) {
        Ok(id) => id,
        Err(e) => {
            state.metrics.record_decode_failure();
            debug!("{}: {}", client, e);
            return ScoreResponse::failure(None, &e);
        }
    };

    let audio = match protocol::decode_samples(&frame[protocol::REQUEST_ID_BYTES..]) {
        Ok(samples) => samples,
        Err(e) => {
            state.metrics.record_decode_failure();
            debug!("{} request {}: {}", client, request_id, e);
            return ScoreResponse::failure(Some(request_id), &e);
        }
    };

    info!(
        "Received {} samples from {} with ID {}",
        audio.len(),
        client,
        request_id
    );

    let permit = match state.admission.try_admit() {
        Some(permit) => permit,
        None => {
            state.metrics.record_rejection();
            warn!(
                "Rejecting request {} from {}: outstanding ceiling reached",
                request_id, client
            );
            return ScoreResponse::failure(Some(request_id), &AppError::QueueFull);
        }
    };

    state.metrics.increment_in_flight();
    let scored = state.pool.score(audio).await;
    state.metrics.decrement_in_flight();
    drop(permit);

    match scored {
        Ok(score) => {
            info!("Sending result to {} for ID {}: {}", client, request_id, score);
            ScoreResponse::success(request_id, vec![score])
        }
        Err(e) => {
            state.metrics.record_inference_failure();
            warn!("Sending failure to {} for ID {}: {}", client, request_id, e);
            ScoreResponse::failure(Some(request_id), &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{PoolConfig, ScorerPool};
    use crate::transport::frame_codec;
    use futures::{SinkExt, StreamExt};
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    type ClientConn = Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>;

    fn weight_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for w in [1.0f32, 0.5] {
            file.write_all(&w.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    /// Boot a server on an ephemeral port and return its address and state.
    async fn start_server(
        model: &NamedTempFile,
        ceiling: usize,
    ) -> (SocketAddr, Arc<ServerState>) {
        let pool = ScorerPool::start(&PoolConfig {
            pool_size: 2,
            model_path: model.path().to_path_buf(),
        })
        .unwrap();
        let state = Arc::new(ServerState::new(pool, ceiling));

        let socket = MuxSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr();
        tokio::spawn(run(socket, Arc::clone(&state)));

        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> ClientConn {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, frame_codec())
    }

    fn request_frame(request_id: u64, samples: &[f32]) -> Bytes {
        let mut frame = request_id.to_le_bytes().to_vec();
        for sample in samples {
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        frame.into()
    }

    async fn next_response(conn: &mut ClientConn) -> ScoreResponse {
        let frame = timeout(Duration::from_secs(10), conn.next())
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn scores_five_seconds_of_silence() {
        let model = weight_file();
        let (addr, _state) = start_server(&model, 100).await;
        let mut conn = connect(addr).await;

        conn.send(request_frame(1, &vec![0.0f32; 80_000]))
            .await
            .unwrap();

        let response = next_response(&mut conn).await;
        assert_eq!(response.request_id, Some(1));
        assert!(response.error.is_none());
        let scores = response.result.unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0] > 0.0 && scores[0] < 1.0);
    }

    #[tokio::test]
    async fn short_frame_yields_malformed_request_id() {
        let model = weight_file();
        let (addr, _state) = start_server(&model, 100).await;
        let mut conn = connect(addr).await;

        conn.send(Bytes::from_static(&[1, 2, 3, 4])).await.unwrap();

        let response = next_response(&mut conn).await;
        assert_eq!(response.error.as_deref(), Some("MalformedRequestId"));
        assert!(response.request_id.is_none());
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn ragged_audio_yields_malformed_audio_with_the_id() {
        let model = weight_file();
        let (addr, _state) = start_server(&model, 100).await;
        let mut conn = connect(addr).await;

        let mut raw = 77u64.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0xAA, 0xBB]);
        conn.send(Bytes::from(raw)).await.unwrap();

        let response = next_response(&mut conn).await;
        assert_eq!(response.request_id, Some(77));
        assert_eq!(response.error.as_deref(), Some("MalformedAudio"));
    }

    #[tokio::test]
    async fn request_id_round_trips_at_the_top_of_the_u64_range() {
        let model = weight_file();
        let (addr, _state) = start_server(&model, 100).await;
        let mut conn = connect(addr).await;

        conn.send(request_frame(u64::MAX, &[0.25; 16])).await.unwrap();

        let response = next_response(&mut conn).await;
        assert_eq!(response.request_id, Some(u64::MAX));
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn at_ceiling_exactly_one_request_is_rejected_queue_full() {
        let model = weight_file();
        let (addr, state) = start_server(&model, 1).await;
        let mut conn = connect(addr).await;

        // Model the first admitted request still being scored.
        let in_flight = state.admission.try_admit().unwrap();

        conn.send(request_frame(2, &[0.1; 100])).await.unwrap();
        let rejected = next_response(&mut conn).await;
        assert_eq!(rejected.request_id, Some(2));
        assert_eq!(rejected.error.as_deref(), Some("QueueFull"));

        // Completion of the first request frees the slot.
        drop(in_flight);
        conn.send(request_frame(3, &[0.1; 100])).await.unwrap();
        let admitted = next_response(&mut conn).await;
        assert_eq!(admitted.request_id, Some(3));
        assert!(admitted.error.is_none());

        assert_eq!(state.metrics.to_json()["rejected_requests"], 1);
    }

    #[tokio::test]
    async fn a_saturated_pool_does_not_delay_decode_rejections() {
        let model = weight_file();
        let (addr, state) = start_server(&model, 1).await;
        let mut conn = connect(addr).await;

        // A slow admitted inference holds the only slot for the whole test.
        let slow = state.admission.try_admit().unwrap();

        // Malformed traffic is answered while the slot stays occupied.
        conn.send(Bytes::from_static(&[9, 9])).await.unwrap();
        let response = next_response(&mut conn).await;
        assert_eq!(response.error.as_deref(), Some("MalformedRequestId"));
        assert_eq!(state.admission.in_flight(), 1);

        drop(slow);
    }

    #[tokio::test]
    async fn responses_route_to_the_requesting_client_only() {
        let model = weight_file();
        let (addr, _state) = start_server(&model, 100).await;
        let mut asker = connect(addr).await;
        let mut bystander = connect(addr).await;

        asker.send(request_frame(5, &[0.0; 32])).await.unwrap();
        let response = next_response(&mut asker).await;
        assert_eq!(response.request_id, Some(5));

        let leaked = timeout(Duration::from_millis(200), bystander.next()).await;
        assert!(leaked.is_err());
    }

    #[tokio::test]
    async fn concurrent_requests_all_get_exactly_one_response() {
        let model = weight_file();
        let (addr, state) = start_server(&model, 100).await;
        let mut conn = connect(addr).await;

        for id in 0..20u64 {
            conn.send(request_frame(id, &[0.05; 256])).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            let response = next_response(&mut conn).await;
            assert!(response.error.is_none());
            seen.push(response.request_id.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(state.metrics.to_json()["total_requests"], 20);
    }
}
