//! The time-and-size-bounded NDJSON buffer and the ingest POST (spec
//! §4.7). Grounded on `original_source/feed_sparkpost.go`'s
//! `myTimedBuffer`/`sparkPostIngest`/`FeedForever`, reshaped as an
//! explicit state struct plus free functions rather than package-level
//! globals, the way the teacher's `feeder`-equivalent services carry
//! their loop state in an owned struct instead of statics.

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;
use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("gzip compression failed: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("ingest request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Accumulates NDJSON lines until a size or age bound is hit.
pub struct TimedBuffer {
    content: Vec<u8>,
    started_at: Option<Instant>,
    max_age: Duration,
    max_payload_bytes: usize,
}

impl TimedBuffer {
    pub fn new(max_age: Duration, max_payload_bytes: usize) -> Self {
        Self {
            content: Vec::with_capacity(max_payload_bytes),
            started_at: None,
            max_age,
            max_payload_bytes,
        }
    }

    /// True once the oldest buffered line has aged past `max_age` (spec
    /// §4.7 step 2: "oldest line in a non-empty buffer triggers flush").
    pub fn is_mature(&self) -> bool {
        match self.started_at {
            Some(t) => !self.content.is_empty() && t.elapsed() >= self.max_age,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Would appending `line` push the buffer past `max_payload_bytes`
    /// (spec §4.7 step 5)?
    pub fn would_overflow(&self, line: &[u8]) -> bool {
        self.content.len() + line.len() >= self.max_payload_bytes
    }

    /// Appends `line`, stamping the buffer's start time if it was empty
    /// (spec §4.7 step 5).
    pub fn push(&mut self, line: &[u8]) {
        if self.content.is_empty() {
            self.started_at = Some(Instant::now());
        }
        self.content.extend_from_slice(line);
    }

    pub fn take(&mut self) -> Vec<u8> {
        self.started_at = None;
        std::mem::replace(&mut self.content, Vec::with_capacity(self.max_payload_bytes))
    }
}

#[derive(Debug, Deserialize)]
struct IngestErrorEntry {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    results: IngestResults,
    #[serde(default)]
    errors: Vec<IngestErrorEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestResults {
    #[serde(default)]
    id: String,
}

/// Gzips `ndjson` and POSTs it to `<host>/api/v1/ingest/events` with the
/// headers spec §4.7/§6 require. Logs `{results.id}` or
/// `{errors[].message}` from the response; a non-2xx or a parse failure
/// is logged and returned as an error to the caller but never causes the
/// feeder to retry this batch (spec §7: "the batch is considered handed
/// off and not retried").
pub async fn flush(
    client: &reqwest::Client,
    host: &str,
    api_key: &str,
    ndjson: &[u8],
    timeout: Duration,
) -> Result<(), IngestError> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(ndjson).map_err(IngestError::Gzip)?;
    let gzipped = gz.finish().map_err(IngestError::Gzip)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

    let url = format!("{host}/api/v1/ingest/events");
    let resp = client
        .post(&url)
        .headers(headers)
        .timeout(timeout)
        .body(gzipped.clone())
        .send()
        .await?;

    let status = resp.status();
    let body = resp.bytes().await.unwrap_or_default();
    match serde_json::from_slice::<IngestResponse>(&body) {
        Ok(parsed) => {
            if let Some(err) = parsed.errors.first() {
                tracing::warn!(
                    %status,
                    raw_bytes = ndjson.len(),
                    gzip_bytes = gzipped.len(),
                    error = %err.message,
                    "ingest batch reported errors"
                );
            }
            if !parsed.results.id.is_empty() {
                tracing::info!(
                    %status,
                    raw_bytes = ndjson.len(),
                    gzip_bytes = gzipped.len(),
                    results_id = %parsed.results.id,
                    "ingest batch accepted"
                );
            }
        }
        Err(e) => {
            tracing::warn!(%status, error = %e, "ingest response was not valid json");
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_buffer_is_never_mature() {
        let buf = TimedBuffer::new(Duration::from_secs(1), 1024);
        assert!(!buf.is_mature());
    }

    #[test]
    fn push_stamps_start_time_only_on_first_line() {
        let mut buf = TimedBuffer::new(Duration::from_millis(50), 1024);
        buf.push(b"a\n");
        assert!(!buf.is_mature());
        std::thread::sleep(Duration::from_millis(60));
        assert!(buf.is_mature());
        buf.push(b"b\n");
        assert!(buf.is_mature());
    }

    #[test]
    fn would_overflow_accounts_for_pending_line() {
        let buf = TimedBuffer::new(Duration::from_secs(60), 10);
        assert!(!buf.would_overflow(b"12345"));
        assert!(buf.would_overflow(b"1234567890"));
    }

    /// Scenario 6 ("queue pressure"): 12 000 fixed-size lines pushed
    /// through a payload-capped buffer produce exactly the number of
    /// batches the cap implies, each flush carries a whole number of
    /// lines, and concatenating every flushed batch in order reproduces
    /// all 12 000 lines in FIFO order.
    #[test]
    fn payload_cap_splits_12000_lines_into_the_implied_batch_count() {
        let line = b"{\"line\":1234567}\n";
        let lines_per_batch = 37;
        let cap = line.len() * lines_per_batch;
        let mut buf = TimedBuffer::new(Duration::from_secs(600), cap);

        let total_lines = 12_000;
        let mut flushed_batches: Vec<Vec<u8>> = Vec::new();
        for _ in 0..total_lines {
            if buf.would_overflow(line) && !buf.is_empty() {
                flushed_batches.push(buf.take());
            }
            buf.push(line);
        }
        if !buf.is_empty() {
            flushed_batches.push(buf.take());
        }

        let expected_batches = total_lines.div_ceil(lines_per_batch);
        assert_eq!(flushed_batches.len(), expected_batches);

        let mut seen_lines = 0usize;
        for batch in &flushed_batches {
            assert_eq!(batch.len() % line.len(), 0, "every flush is a whole number of lines");
            seen_lines += batch.len() / line.len();
        }
        assert_eq!(seen_lines, total_lines);

        let reassembled: Vec<u8> = flushed_batches.concat();
        let expected: Vec<u8> = line.repeat(total_lines);
        assert_eq!(reassembled, expected, "FIFO order preserved across batches");
    }

    #[test]
    fn take_resets_buffer_and_start_time() {
        let mut buf = TimedBuffer::new(Duration::from_millis(10), 1024);
        buf.push(b"a\n");
        let taken = buf.take();
        assert_eq!(taken, b"a\n");
        assert!(buf.is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!buf.is_mature());
    }

    /// End-to-end over a real socket (spec §8 scenario 6: "each batch is
    /// a single POST with Content-Encoding: gzip"): a minimal hand-rolled
    /// HTTP/1.1 server reads the whole request, asserts the gzip/NDJSON
    /// contract, and decompresses the body to check FIFO order survives
    /// the round trip.
    #[tokio::test]
    async fn flush_posts_gzipped_ndjson_with_expected_headers() {
        use flate2::read::GzDecoder;
        use std::io::Read;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let (header_end, content_length) = loop {
                let n = sock.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before full request arrived");
                buf.extend_from_slice(&chunk[..n]);
                let Some(header_end) = buf
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map(|p| p + 4)
                else {
                    continue;
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
                let content_length: usize = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .expect("request must carry Content-Length");
                assert!(headers.contains("content-encoding: gzip"));
                assert!(headers.contains("content-type: application/x-ndjson"));
                assert!(headers.contains("authorization: test-key"));
                if buf.len() >= header_end + content_length {
                    break (header_end, content_length);
                }
            };
            let body = &buf[header_end..header_end + content_length];

            let mut decoder = GzDecoder::new(body);
            let mut decompressed = String::new();
            decoder.read_to_string(&mut decompressed).unwrap();
            assert_eq!(decompressed, "{\"a\":1}\n{\"b\":2}\n");

            let response = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 23\r\n\r\n{\"results\":{\"id\":\"ok\"}}";
            sock.write_all(response).await.unwrap();
        });

        let client = reqwest::Client::new();
        let host = format!("http://{addr}");
        flush(
            &client,
            &host,
            "test-key",
            b"{\"a\":1}\n{\"b\":2}\n",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        server.await.unwrap();
    }
}
