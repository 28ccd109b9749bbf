//! Upstream game-data API client.
//!
//! Fetches one record per request from `GET {base_url}/{segment}/{id}`,
//! where `segment` is the kind's API path segment (`item`, `mob`, `map`,
//! `npc`).
//!
//! # Outcomes
//!
//! - HTTP 2xx with a JSON record → [`FetchOutcome::Found`]
//! - HTTP 404 → [`FetchOutcome::NotFound`] (expected, not an error)
//! - HTTP 2xx with a malformed body → error, not retried
//! - Any other status, timeout, or network error → retried up to
//!   `max_retries` times with a fixed `retry_delay_ms` pause, then an error
//!
//! # Bulk collection
//!
//! [`Fetcher::fetch_range`] issues requests in groups of `concurrency`.
//! Each group is awaited together on the calling task and fully settles
//! before the next group starts, with a `request_delay_ms` pause between
//! groups to stay under upstream rate limits. An ID that still fails after
//! its retries is logged and skipped; it never aborts the batch.

use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use gamedex_core::models::{Record, RecordSet, ResourceKind};

use crate::config::{Config, UpstreamConfig};
use crate::progress::{format_number, ProgressEvent, ProgressReporter};
use crate::sources::write_snapshot;

/// Result of fetching a single ID.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(Record),
    NotFound,
}

/// Summary of a bulk fetch.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub records: RecordSet,
    pub not_found: usize,
    /// IDs dropped after exhausting retries or failing to parse.
    pub failed: Vec<u32>,
}

impl FetchReport {
    pub fn found(&self) -> usize {
        self.records.len()
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    concurrency: usize,
    request_delay: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        if config.concurrency == 0 {
            bail!("upstream.concurrency must be > 0");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("gamedex/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            concurrency: config.concurrency,
            request_delay: Duration::from_millis(config.request_delay_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    pub fn url_for(&self, kind: ResourceKind, id: u32) -> String {
        format!("{}/{}/{}", self.base_url, kind.api_segment(), id)
    }

    /// Fetch a single record, retrying transient failures.
    pub async fn fetch(&self, kind: ResourceKind, id: u32) -> Result<FetchOutcome> {
        let url = self.url_for(kind, id);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(FetchOutcome::NotFound);
                    }

                    if status.is_success() {
                        let body = match response.bytes().await {
                            Ok(body) => body,
                            Err(e) => {
                                last_err = Some(anyhow!(e).context(format!("reading {}", url)));
                                continue;
                            }
                        };
                        let record = parse_response(kind, id, &body)
                            .with_context(|| format!("Malformed response from {}", url))?;
                        return Ok(FetchOutcome::Found(record));
                    }

                    tracing::debug!(%url, %status, attempt, "retryable upstream status");
                    last_err = Some(anyhow!("HTTP {} from {}", status, url));
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, attempt, "upstream request failed");
                    last_err = Some(anyhow!(e).context(format!("GET {}", url)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("GET {} failed after retries", url)))
    }

    /// Fetch every ID in `ids`, in groups of `concurrency`.
    pub async fn fetch_range(
        &self,
        kind: ResourceKind,
        ids: &[u32],
        progress: &dyn ProgressReporter,
    ) -> FetchReport {
        let mut report = FetchReport::default();
        let total = ids.len() as u64;
        let mut settled = 0u64;

        for (group_index, group) in ids.chunks(self.concurrency).enumerate() {
            if group_index > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let results = join_all(
                group
                    .iter()
                    .map(|&id| async move { (id, self.fetch(kind, id).await) }),
            )
            .await;

            for (id, result) in results {
                match result {
                    Ok(FetchOutcome::Found(record)) => {
                        report.records.insert(id, record);
                    }
                    Ok(FetchOutcome::NotFound) => report.not_found += 1,
                    Err(e) => {
                        let error = format!("{:#}", e);
                        tracing::warn!(kind = %kind, id, %error, "skipping id");
                        report.failed.push(id);
                    }
                }
            }

            settled += group.len() as u64;
            progress.report(ProgressEvent::Fetching {
                kind,
                n: settled,
                total,
            });
        }

        report
    }
}

/// Largest number of IDs one `gdx fetch --start/--end` run may cover.
pub const MAX_RANGE_SPAN: u32 = 1_000_000;

/// IDs `start..=end`. Both ends must be positive and in order, and the
/// range may cover at most [`MAX_RANGE_SPAN`] IDs.
pub fn id_range(start: u32, end: u32) -> Result<Vec<u32>> {
    if start == 0 {
        bail!("--start must be > 0");
    }
    if start > end {
        bail!("--start ({}) must not exceed --end ({})", start, end);
    }
    let span = end - start + 1;
    if span > MAX_RANGE_SPAN {
        bail!(
            "Range {}..={} covers {} IDs; split it into runs of at most {}",
            start,
            end,
            span,
            MAX_RANGE_SPAN
        );
    }
    Ok((start..=end).collect())
}

/// Run `gdx fetch`: fetch `ids` of `kind` and write them as a snapshot.
pub async fn run_fetch(
    config: &Config,
    kind: ResourceKind,
    ids: &[u32],
    out: &Path,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    if ids.is_empty() {
        bail!("No IDs to fetch");
    }

    let fetcher = Fetcher::new(&config.upstream)?;
    let report = fetcher.fetch_range(kind, ids, progress).await;
    write_snapshot(out, &report.records)?;

    println!("fetch {}", kind);
    println!("  requested: {}", format_number(ids.len() as u64));
    println!("  found: {}", format_number(report.found() as u64));
    println!("  not found: {}", format_number(report.not_found as u64));
    if !report.failed.is_empty() {
        println!("  failed: {}", format_number(report.failed.len() as u64));
    }
    println!("  written: {}", out.display());
    println!("ok");
    Ok(())
}

/// Decode a response body as a record of `kind`. A body without an `id`
/// takes the requested one; a body naming a different ID is rejected.
fn parse_response(kind: ResourceKind, id: u32, body: &[u8]) -> Result<Record> {
    let mut value: Value = serde_json::from_slice(body)?;
    if let Value::Object(obj) = &mut value {
        obj.entry("id").or_insert_with(|| Value::from(id));
    }
    let record = Record::from_raw(kind, value)?;
    if record.id() != id {
        bail!("requested {} {} but response has id {}", kind, id, record.id());
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Canned responses per path; each path pops from the front until one is left.
    type Routes = Arc<Mutex<HashMap<String, Vec<(u16, String)>>>>;

    /// Minimal HTTP/1.1 stub: one request per connection, `Connection: close`.
    async fn stub_server(routes: Routes, hits: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let routes = routes.clone();
                let hits = hits.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    hits.fetch_add(1, Ordering::SeqCst);

                    let request = String::from_utf8_lossy(&buf);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = {
                        let mut routes = routes.lock().unwrap();
                        match routes.get_mut(&path) {
                            Some(queue) if queue.len() > 1 => queue.remove(0),
                            Some(queue) => queue[0].clone(),
                            None => (404, String::new()),
                        }
                    };
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    fn fetcher(base_url: String) -> Fetcher {
        Fetcher::new(&UpstreamConfig {
            base_url,
            concurrency: 2,
            request_delay_ms: 0,
            max_retries: 2,
            retry_delay_ms: 10,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn routes(entries: Vec<(&str, Vec<(u16, &str)>)>) -> Routes {
        Arc::new(Mutex::new(
            entries
                .into_iter()
                .map(|(path, responses)| {
                    (
                        path.to_string(),
                        responses
                            .into_iter()
                            .map(|(s, b)| (s, b.to_string()))
                            .collect(),
                    )
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn found_and_not_found() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = stub_server(
            routes(vec![("/mob/100100", vec![(200, r#"{"id":100100,"name":"Snail"}"#)])]),
            hits.clone(),
        )
        .await;
        let fetcher = fetcher(base);

        match fetcher.fetch(ResourceKind::Monster, 100100).await.unwrap() {
            FetchOutcome::Found(record) => assert_eq!(record.name(), Some("Snail")),
            other => panic!("expected a record, got {:?}", other),
        }
        assert_eq!(
            fetcher.fetch(ResourceKind::Monster, 999).await.unwrap(),
            FetchOutcome::NotFound
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = stub_server(
            routes(vec![(
                "/item/2000000",
                vec![(503, ""), (500, ""), (200, r#"{"id":2000000,"name":"Red Potion"}"#)],
            )]),
            hits.clone(),
        )
        .await;

        let outcome = fetcher(base).fetch(ResourceKind::Item, 2000000).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Found(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = stub_server(routes(vec![("/npc/1", vec![(500, "")])]), hits.clone()).await;

        assert!(fetcher(base).fetch(ResourceKind::Npc, 1).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_body_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = stub_server(routes(vec![("/map/10", vec![(200, "{nope")])]), hits.clone()).await;

        assert!(fetcher(base).fetch(ResourceKind::Map, 10).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn range_skips_failures_and_counts_missing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = stub_server(
            routes(vec![
                ("/item/1", vec![(200, r#"{"id":1,"name":"A"}"#)]),
                ("/item/2", vec![(500, "")]),
                ("/item/4", vec![(200, r#"{"name":"D"}"#)]),
                ("/item/5", vec![(200, r#"{"id":5,"name":"E"}"#)]),
            ]),
            hits,
        )
        .await;

        let report = fetcher(base)
            .fetch_range(ResourceKind::Item, &[1, 2, 3, 4, 5], &NoProgress)
            .await;

        assert_eq!(report.records.keys().copied().collect::<Vec<_>>(), vec![1, 4, 5]);
        assert_eq!(report.records[&4].name(), Some("D"));
        assert_eq!(report.not_found, 1);
        assert_eq!(report.failed, vec![2]);
        assert_eq!(report.found(), 3);
    }

    /// Request lifecycle seen by the server: `(true, id)` when a request
    /// arrives, `(false, id)` just before its response is written.
    type Events = Arc<Mutex<Vec<(bool, u32)>>>;

    /// Answers every `/item/{id}` with a record after `delay`, tracking the
    /// peak number of requests held open at once.
    async fn slow_server(delay: Duration, events: Events, peak: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let open = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let (events, peak, open) = (events.clone(), peak.clone(), open.clone());
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let id: u32 = request
                        .split_whitespace()
                        .nth(1)
                        .and_then(|path| path.rsplit('/').next())
                        .and_then(|id| id.parse().ok())
                        .unwrap_or(0);

                    events.lock().unwrap().push((true, id));
                    let now_open = open.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_open, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    open.fetch_sub(1, Ordering::SeqCst);
                    events.lock().unwrap().push((false, id));

                    let body = format!(r#"{{"id":{},"name":"item {}"}}"#, id, id);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn range_runs_groups_one_at_a_time_with_a_pause() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let peak = Arc::new(AtomicUsize::new(0));
        let base = slow_server(Duration::from_millis(30), events.clone(), peak.clone()).await;
        let fetcher = Fetcher::new(&UpstreamConfig {
            base_url: base,
            concurrency: 3,
            request_delay_ms: 100,
            max_retries: 0,
            retry_delay_ms: 10,
            timeout_secs: 5,
        })
        .unwrap();

        let ids: Vec<u32> = (1..=7).collect();
        let started = std::time::Instant::now();
        let report = fetcher
            .fetch_range(ResourceKind::Item, &ids, &NoProgress)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(report.found(), 7);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{} requests were open at once", peak);
        assert!(peak > 1, "requests within a group should overlap");

        // Three groups: two pauses plus three rounds of server latency.
        assert!(
            elapsed >= Duration::from_millis(2 * 100 + 3 * 30),
            "finished in {:?}",
            elapsed
        );

        // No request of a group arrives before every request of the previous group was answered.
        let events = events.lock().unwrap();
        let group_of = |id: u32| (id as usize - 1) / 3;
        for group in 1..3 {
            let first_arrival = events
                .iter()
                .position(|&(arrived, id)| arrived && group_of(id) == group)
                .unwrap();
            let last_answer = events
                .iter()
                .rposition(|&(arrived, id)| !arrived && group_of(id) == group - 1)
                .unwrap();
            assert!(last_answer < first_arrival, "group {} started early", group + 1);
        }
    }

    #[test]
    fn url_building() {
        let fetcher = fetcher("https://example.com/api/GMS/255/".to_string());
        assert_eq!(
            fetcher.url_for(ResourceKind::Monster, 100100),
            "https://example.com/api/GMS/255/mob/100100"
        );
    }

    #[test]
    fn response_with_other_id_is_rejected() {
        assert!(parse_response(ResourceKind::Item, 1, br#"{"id":2}"#).is_err());
    }

    #[test]
    fn id_ranges() {
        assert_eq!(id_range(3, 5).unwrap(), vec![3, 4, 5]);
        assert_eq!(id_range(7, 7).unwrap(), vec![7]);
        assert!(id_range(0, 5).is_err());
        assert!(id_range(5, 3).is_err());
    }

    #[test]
    fn id_range_span_is_capped() {
        assert_eq!(id_range(1, MAX_RANGE_SPAN).unwrap().len(), MAX_RANGE_SPAN as usize);
        assert!(id_range(1, MAX_RANGE_SPAN + 1).is_err());
        let err = id_range(1, u32::MAX).unwrap_err();
        assert!(err.to_string().contains("split it into runs"));
    }
}
