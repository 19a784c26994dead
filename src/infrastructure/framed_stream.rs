// Length-prefixed JSON streaming - one frame per published snapshot
use crate::domain::dashboard::DashboardSnapshot;
use async_compression::tokio::bufread::BrotliEncoder;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

pub const FRAMED_CONTENT_TYPE: &str = "application/x-ndframe+json";

/// Emits the current snapshot, then one frame per change until the session ends.
pub fn snapshot_frames(
    mut rx: watch::Receiver<DashboardSnapshot>,
    compress: bool,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            yield serialize_chunk(&snapshot, compress).await;
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Wraps a snapshot receiver in a chunked HTTP response.
pub fn stream_from_receiver(rx: watch::Receiver<DashboardSnapshot>, compress: bool) -> Response<Body> {
    let body = Body::from_stream(snapshot_frames(rx, compress));

    // Frames are compressed individually, so no Content-Encoding on the response itself.
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, FRAMED_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-frame-encoding", if compress { "br" } else { "identity" })
        .body(body);

    match response {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("failed to build streaming response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// 4-byte big-endian length, then the (optionally Brotli-compressed) JSON body.
pub async fn serialize_chunk<T: Serialize>(msg: &T, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(msg)?;

    let payload = if compress {
        let mut encoder = BrotliEncoder::new(json.as_slice());
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await?;
        compressed
    } else {
        json
    };

    let length = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds 4 GiB"))?;
    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(length);
    chunk.put_slice(&payload);

    Ok(chunk.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dashboard::SessionPhase;
    use crate::domain::metrics::CrossUnitMetrics;
    use async_compression::tokio::bufread::BrotliDecoder;
    use chrono::{TimeZone, Utc};
    use futures::StreamExt;
    use uuid::Uuid;

    fn snapshot(epoch: u64) -> DashboardSnapshot {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap();
        DashboardSnapshot {
            session_id: Uuid::nil(),
            epoch,
            working_mode: "mode1".to_string(),
            shift: Some("shift1".to_string()),
            window_start: start,
            window_end: start + chrono::Duration::hours(8),
            live: true,
            phase: SessionPhase::Live,
            transitioning: false,
            units: Vec::new(),
            totals: CrossUnitMetrics::default(),
            generated_at: start,
        }
    }

    fn split_frame(chunk: &[u8]) -> &[u8] {
        let length = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
        assert_eq!(chunk.len(), 4 + length);
        &chunk[4..]
    }

    #[tokio::test]
    async fn test_plain_frame_is_length_prefixed_json() {
        let chunk = serialize_chunk(&snapshot(3), false).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(split_frame(&chunk)).unwrap();
        assert_eq!(value["epoch"], 3);
        assert_eq!(value["phase"], "live");
    }

    #[tokio::test]
    async fn test_compressed_frame_round_trips() {
        let chunk = serialize_chunk(&snapshot(1), true).await.unwrap();
        let mut decoder = BrotliDecoder::new(split_frame(&chunk));
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["working_mode"], "mode1");
    }

    #[tokio::test]
    async fn test_stream_ends_with_the_session() {
        let (tx, rx) = watch::channel(snapshot(0));
        let frames = snapshot_frames(rx, false);
        tokio::pin!(frames);

        let first = frames.next().await.unwrap().unwrap();
        assert!(!first.is_empty());

        tx.send_replace(snapshot(1));
        drop(tx);
        let second = frames.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(split_frame(&second)).unwrap();
        assert_eq!(value["epoch"], 1);
        assert!(frames.next().await.is_none());
    }
}
