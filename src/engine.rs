// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Segmented fetch engine.
//!
//! One engine per job, alive for one [`DownloadEngine::run`] call. The engine
//! probes the source, plans chunks, races semaphore-bounded workers over the
//! byte space, resumes from part files, falls back to a single stream when the
//! server rejects parallel ranges, assembles and verifies the artifact, and
//! drives the structured event stream throughout.

use reqwest::header::RANGE;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::assembler::assemble;
use crate::checksum::verify_sha256;
use crate::chunking::{plan_chunks, Chunk};
use crate::config::DownloadJob;
use crate::constants::{MAX_REDIRECTS, RETRY_DELAY_STEP, WORKER_EVENT_INTERVAL};
use crate::error::{AccelaraError, Result};
use crate::events::{Event, EventSink};
use crate::failure_tracker::FailureTracker;
use crate::probe::{probe, ProbeResult};
use crate::progress::{ProgressBoard, SpeedMeter};
use crate::rate_limiter::RateLimiter;
use crate::reporter::Reporter;
use crate::utils::{resolve_out_path, TempArea};

/// Transfer strategy, latched one-way as the run unfolds.
///
/// Workers move `Segmented` to `FallingBack` when the server rejects parallel
/// ranges; the engine then restarts the transfer in `SingleStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Parallel range workers over a chunk plan
    Segmented,
    /// A worker observed a multi-connection rejection; fallback pending
    FallingBack,
    /// One connection, no ranges
    SingleStream,
}

/// Download result information
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Path to the published artifact
    pub path: PathBuf,
    /// Total bytes of the artifact
    pub size: u64,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Average download speed (bytes/sec)
    pub speed: f64,
    /// Whether part files or a partial stream were resumed
    pub resumed: bool,
}

/// Segmented HTTP download engine for one job
pub struct DownloadEngine {
    job: DownloadJob,
    client: Client,
    sink: EventSink,
    tracker: Arc<FailureTracker>,
    limiter: Arc<RateLimiter>,
    mode: Arc<Mutex<EngineMode>>,
    resumed: Arc<AtomicBool>,
}

impl DownloadEngine {
    /// Create an engine for a job, reporting through the given transport
    pub fn new(job: DownloadJob, reporter: Arc<dyn Reporter>) -> Result<Self> {
        job.validate()?;
        crate::init_tls();

        let client = Self::build_client(&job)?;
        let limiter = Arc::new(RateLimiter::new(job.rate_limit.unwrap_or(0)));

        Ok(Self {
            job,
            client,
            sink: EventSink::new(reporter),
            tracker: Arc::new(FailureTracker::new()),
            limiter,
            mode: Arc::new(Mutex::new(EngineMode::Segmented)),
            resumed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn build_client(job: &DownloadJob) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(job.connect_timeout())
            .read_timeout(job.read_timeout())
            .user_agent(concat!("accelara/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

        if let Some(proxy) = &job.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(builder.build()?)
    }

    /// Current transfer mode
    pub fn mode(&self) -> EngineMode {
        *self.mode.lock().unwrap()
    }

    /// Whether the engine latched the pause state
    pub fn is_paused(&self) -> bool {
        self.tracker.is_paused()
    }

    /// Run the download to completion.
    ///
    /// Exactly one terminal event (`completed`, `paused` or `error`) reaches
    /// the supervisor per call, whatever the outcome.
    pub async fn run(&self) -> Result<DownloadOutcome> {
        let result = self.execute().await;

        if let Err(e) = &result {
            warn!("Download failed ({}): {e}", e.category());
            // A pause already produced its own terminal event; the sink
            // gates duplicates either way.
            self.sink.emit(Event::error(&e.to_string())).await;
        }

        result
    }

    async fn execute(&self) -> Result<DownloadOutcome> {
        let started = Instant::now();
        let out_path = resolve_out_path(&self.job.out_path, &self.job.source_url);

        self.sink.emit_now(Event::http("initializing")).await;
        info!(
            "Starting download {} -> {}",
            self.job.source_url,
            out_path.display()
        );

        // Pre-flight: an existing artifact with a matching digest short-circuits
        // the whole run; a mismatching one is discarded.
        if out_path.exists() {
            if let Some(outcome) = self.check_existing(&out_path, started).await? {
                return Ok(outcome);
            }
        }

        let probed = probe(&self.client, &self.job.source_url).await?;
        debug!(
            "Probe: total={}, ranges={}, url={}",
            probed.total_size, probed.accept_ranges, probed.final_url
        );

        // Without a digest the completeness check had to wait for the probe.
        if out_path.exists()
            && self.job.expected_sha256.is_none()
            && probed.total_size > 0
            && file_size(&out_path).await == probed.total_size
        {
            return Ok(self
                .finish_existing(&out_path, "size_verified", None, started)
                .await);
        }

        let area = TempArea::for_output(&out_path)?;
        area.ensure_exists().await?;

        let chunks = plan_chunks(
            probed.total_size,
            probed.accept_ranges,
            self.job.concurrency,
            self.job.min_chunk_size,
        );

        let staging = if chunks.is_empty() {
            *self.mode.lock().unwrap() = EngineMode::SingleStream;
            self.run_single_stream(&area, &probed).await?
        } else {
            match self.run_segmented(&area, &chunks, &probed).await {
                Ok(staging) => staging,
                Err(e)
                    if self.mode() == EngineMode::FallingBack
                        && !matches!(e, AccelaraError::Paused { .. }) =>
                {
                    self.fall_back_to_single_stream(&area, &probed, &e).await?
                }
                Err(e) => return Err(e),
            }
        };

        // Atomic publish, then drop the temp area.
        tokio::fs::rename(&staging, &out_path).await?;
        area.cleanup().await?;

        let (verify_status, digest) = self.verify_published(&out_path).await?;

        let size = file_size(&out_path).await;
        let duration = started.elapsed();
        let speed = if duration.as_secs_f64() > 0.0 {
            size as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        self.sink
            .emit(
                Event::http("completed")
                    .with_counters(size, size, speed, 0)
                    .set("progress", 1.0)
                    .set("verify_status", verify_status)
                    .set_opt("sha256", digest.clone()),
            )
            .await;

        info!(
            "Download completed: {} bytes in {:.2}s",
            size,
            duration.as_secs_f64()
        );

        Ok(DownloadOutcome {
            path: out_path,
            size,
            duration,
            speed,
            resumed: self.resumed.load(Ordering::Relaxed),
        })
    }

    /// Verify a pre-existing artifact. Returns the completed outcome when it
    /// already matches the expected digest, `None` when the run must proceed.
    async fn check_existing(
        &self,
        out_path: &Path,
        started: Instant,
    ) -> Result<Option<DownloadOutcome>> {
        self.sink
            .emit_now(
                Event::http("verifying").set("verify_status", "checking_existing_file"),
            )
            .await;

        let Some(expected) = self.job.expected_sha256.clone() else {
            // No digest to check against; completeness is decided after the
            // probe reveals the true size.
            return Ok(None);
        };

        self.sink
            .emit_now(Event::http("verifying").set("verify_status", "checksum_verifying"))
            .await;

        match verify_sha256(out_path, &expected).await {
            Ok(digest) => {
                info!("Existing file already complete: {}", out_path.display());
                Ok(Some(
                    self.finish_existing(out_path, "checksum_verified", Some(digest), started)
                        .await,
                ))
            }
            Err(AccelaraError::ChecksumMismatch { .. }) => {
                warn!("Existing file fails verification, re-downloading");
                tokio::fs::remove_file(out_path).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn finish_existing(
        &self,
        out_path: &Path,
        verify_status: &str,
        digest: Option<String>,
        started: Instant,
    ) -> DownloadOutcome {
        let size = file_size(out_path).await;
        self.sink
            .emit(
                Event::http("completed")
                    .with_counters(size, size, 0.0, 0)
                    .set("progress", 1.0)
                    .set("verify_status", verify_status)
                    .set_opt("sha256", digest),
            )
            .await;

        DownloadOutcome {
            path: out_path.to_path_buf(),
            size,
            duration: started.elapsed(),
            speed: 0.0,
            resumed: false,
        }
    }

    async fn verify_published(&self, out_path: &Path) -> Result<(&'static str, Option<String>)> {
        let Some(expected) = self.job.expected_sha256.clone() else {
            return Ok(("size_verified", None));
        };

        self.sink
            .emit_now(Event::http("verifying").set("verify_status", "checksum_verifying"))
            .await;

        match verify_sha256(out_path, &expected).await {
            Ok(digest) => Ok(("checksum_verified", Some(digest))),
            Err(e @ AccelaraError::ChecksumMismatch { .. }) => {
                // Never leave a corrupt artifact at the published path.
                let _ = tokio::fs::remove_file(out_path).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Segmented mode
    // ------------------------------------------------------------------

    async fn run_segmented(
        &self,
        area: &TempArea,
        chunks: &[Chunk],
        probed: &ProbeResult,
    ) -> Result<PathBuf> {
        let total = probed.total_size;
        let board = Arc::new(ProgressBoard::new(chunks.to_vec()));
        let meter = Arc::new(SpeedMeter::new(0));
        let semaphore = Arc::new(Semaphore::new(self.job.concurrency));

        info!(
            "Segmented download: {} chunks, {} workers",
            chunks.len(),
            self.job.concurrency.min(chunks.len())
        );

        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let worker = ChunkWorker {
                client: self.client.clone(),
                url: probed.final_url.clone(),
                chunk: *chunk,
                part_path: area.part_path(chunk),
                total,
                retries: self.job.retries,
                board: board.clone(),
                meter: meter.clone(),
                tracker: self.tracker.clone(),
                limiter: self.limiter.clone(),
                sink: self.sink.clone(),
                mode: self.mode.clone(),
                resumed: self.resumed.clone(),
            };
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| AccelaraError::internal("Worker semaphore closed"))?;
                worker.run().await
            });
        }

        let mut first_error: Option<AccelaraError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| AccelaraError::internal(format!("Worker task failed: {e}")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                debug!("Chunk worker failed: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        // A pause outranks whatever error surfaced first.
        if let Some(reason) = self.tracker.pause_reason() {
            return Err(AccelaraError::paused(reason));
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.completeness_gate(&board, total)?;
        self.sink
            .emit_now(
                Event::http("verifying")
                    .set("verify_status", "chunks_verified")
                    .set("chunk_count", chunks.len()),
            )
            .await;

        assemble(area, chunks, total, &self.tracker, &self.sink).await
    }

    /// Every chunk full, aggregate equal to the declared total (within the
    /// job's explicitly configured slack, zero by default).
    fn completeness_gate(&self, board: &ProgressBoard, total: u64) -> Result<()> {
        if !board.all_complete() {
            let snapshot = board.snapshot();
            return Err(AccelaraError::SizeMismatch {
                got: snapshot.downloaded,
                want: total,
            });
        }

        let downloaded = board.snapshot().downloaded;
        if downloaded.abs_diff(total) > self.job.size_tolerance {
            return Err(AccelaraError::SizeMismatch {
                got: downloaded,
                want: total,
            });
        }
        Ok(())
    }

    async fn fall_back_to_single_stream(
        &self,
        area: &TempArea,
        probed: &ProbeResult,
        cause: &AccelaraError,
    ) -> Result<PathBuf> {
        warn!("Multi-connection download rejected ({cause}), falling back");
        self.sink
            .emit_now(Event::http("downloading").set(
                "message",
                "Server disallows multiple connections, falling back to single connection",
            ))
            .await;

        area.remove_parts().await?;
        *self.mode.lock().unwrap() = EngineMode::SingleStream;

        self.run_single_stream(area, probed).await
    }

    // ------------------------------------------------------------------
    // Single-stream mode
    // ------------------------------------------------------------------

    async fn run_single_stream(&self, area: &TempArea, probed: &ProbeResult) -> Result<PathBuf> {
        let staging = area.staging_path();
        let declared_total = probed.total_size;

        // A partial stream from an earlier paused run is one pseudo-chunk:
        // resume it when the server honors ranges, start over otherwise.
        let existing = file_size(&staging).await;
        let resume_from = if existing > 0
            && probed.accept_ranges
            && (declared_total == 0 || existing < declared_total)
        {
            existing
        } else {
            0
        };

        let mut request = self.client.get(&probed.final_url);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.single_stream_disconnect(e.into()).await),
        };

        let status = response.status().as_u16();
        let mut start_offset = resume_from;
        match status {
            206 => {}
            200 => {
                // Server replayed the whole body; any partial bytes restart.
                start_offset = 0;
            }
            other => return Err(AccelaraError::UnexpectedStatus { status: other }),
        }

        let total = if declared_total > 0 {
            declared_total
        } else {
            response
                .content_length()
                .map(|len| len + start_offset)
                .unwrap_or(0)
        };

        let mut file = if start_offset > 0 {
            self.resumed.store(true, Ordering::Relaxed);
            OpenOptions::new().append(true).open(&staging).await?
        } else {
            File::create(&staging).await?
        };

        info!(
            "Single-stream download from offset {} (total {})",
            start_offset, total
        );

        let meter = SpeedMeter::new(start_offset);
        let mut downloaded = start_offset;
        let mut stream = response.bytes_stream();

        loop {
            self.tracker.check_paused()?;

            let Some(item) = stream.next().await else {
                break;
            };

            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err: AccelaraError = e.into();
                    if err.is_connection_error() {
                        file.flush().await?;
                        return Err(self.single_stream_disconnect(err).await);
                    }
                    return Err(err);
                }
            };

            if bytes.is_empty() {
                continue;
            }

            self.limiter.acquire(bytes.len() as u64).await;
            file.write_all(&bytes).await?;
            self.tracker.record_success();
            downloaded += bytes.len() as u64;

            let speed = meter.sample(downloaded);
            let eta = meter.eta(downloaded, total);
            self.sink
                .emit(Event::http("downloading").with_counters(downloaded, total, speed, eta))
                .await;
        }

        file.flush().await?;
        drop(file);

        if total > 0 && downloaded != total {
            return Err(AccelaraError::SizeMismatch {
                got: downloaded,
                want: total,
            });
        }

        Ok(staging)
    }

    /// A mid-body connection loss in single-stream mode pauses immediately;
    /// there is no per-chunk retry ladder to hand the error back to. The
    /// partial bytes stay in the temp area for the next run.
    async fn single_stream_disconnect(&self, cause: AccelaraError) -> AccelaraError {
        let reason = format!(
            "Connection lost: {cause}. Please check your connection and resume manually."
        );
        self.tracker.pause_now(reason, &self.sink).await
    }
}

// ----------------------------------------------------------------------
// Chunk worker
// ----------------------------------------------------------------------

/// Everything one chunk worker needs, cloned out of the engine so the task
/// is `'static`.
struct ChunkWorker {
    client: Client,
    url: String,
    chunk: Chunk,
    part_path: PathBuf,
    total: u64,
    retries: u32,
    board: Arc<ProgressBoard>,
    meter: Arc<SpeedMeter>,
    tracker: Arc<FailureTracker>,
    limiter: Arc<RateLimiter>,
    sink: EventSink,
    mode: Arc<Mutex<EngineMode>>,
    resumed: Arc<AtomicBool>,
}

impl ChunkWorker {
    async fn run(self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt().await {
                Ok(()) => return Ok(()),
                Err(e @ AccelaraError::Paused { .. }) => return Err(e),
                // A rejection is a mode signal, not a transient fault.
                Err(e @ AccelaraError::MultiConnectionRejected { .. }) => return Err(e),
                Err(e) => {
                    // Another worker latched the fallback: retrying this
                    // chunk is wasted work, the plan is about to be wiped.
                    if *self.mode.lock().unwrap() == EngineMode::FallingBack {
                        return Err(e);
                    }
                    if attempt >= self.retries {
                        warn!(
                            "Chunk {} failed after {} attempts: {e}",
                            self.chunk.index,
                            attempt + 1
                        );
                        return Err(e);
                    }
                    debug!(
                        "Chunk {} attempt {} failed: {e}; retrying",
                        self.chunk.index,
                        attempt + 1
                    );
                    tokio::time::sleep(RETRY_DELAY_STEP * (attempt + 1)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self) -> Result<()> {
        self.tracker.check_paused()?;

        let chunk_len = self.chunk.len();
        let existing = file_size(&self.part_path).await;

        if existing >= chunk_len {
            // Nothing left to fetch for this chunk; fold the bytes into the
            // aggregate and report.
            self.resumed.store(true, Ordering::Relaxed);
            let downloaded = self.board.set_chunk(self.chunk.index, chunk_len);
            self.emit_progress(downloaded).await;
            debug!("Chunk {} already complete on disk", self.chunk.index);
            return Ok(());
        }

        let (mut file, resume_at) = if existing > 0 {
            self.resumed.store(true, Ordering::Relaxed);
            self.board.set_chunk(self.chunk.index, existing);
            let file = OpenOptions::new().append(true).open(&self.part_path).await?;
            (file, self.chunk.start + existing)
        } else {
            self.board.set_chunk(self.chunk.index, 0);
            (File::create(&self.part_path).await?, self.chunk.start)
        };

        debug!(
            "Chunk {}: requesting bytes {}-{}",
            self.chunk.index, resume_at, self.chunk.end
        );

        let response = match self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", resume_at, self.chunk.end))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.connection_failure(e.into()).await),
        };

        let status = response.status().as_u16();
        match status {
            206 => {}
            200 if resume_at > 0 => {
                // The server silently refused the range and replayed the
                // whole body from byte zero; writing it at this offset would
                // corrupt the artifact.
                self.latch_fallback();
                return Err(AccelaraError::MultiConnectionRejected { status: 200 });
            }
            // A 200 for a from-zero range is a full-body reply; reads below
            // stop at the chunk boundary.
            200 => {}
            400 | 403 | 429 | 503 => {
                self.latch_fallback();
                return Err(AccelaraError::MultiConnectionRejected { status });
            }
            other => return Err(AccelaraError::UnexpectedStatus { status: other }),
        }

        let mut written = existing;
        let mut last_emit: Option<Instant> = None;
        let mut stream = response.bytes_stream();

        while written < chunk_len {
            self.tracker.check_paused()?;

            let Some(item) = stream.next().await else {
                break;
            };

            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    file.flush().await?;
                    return Err(self.connection_failure(e.into()).await);
                }
            };

            if bytes.is_empty() {
                continue;
            }

            let room = (chunk_len - written) as usize;
            let take = bytes.len().min(room);

            self.limiter.acquire(take as u64).await;
            file.write_all(&bytes[..take]).await?;
            self.tracker.record_success();
            written += take as u64;

            let downloaded = self.board.add_to_chunk(self.chunk.index, take as u64);
            if last_emit.map_or(true, |t| t.elapsed() >= WORKER_EVENT_INTERVAL) {
                last_emit = Some(Instant::now());
                self.emit_progress(downloaded).await;
            }
        }

        file.flush().await?;

        if written != chunk_len {
            return Err(AccelaraError::IncompleteChunk {
                index: self.chunk.index,
                got: written,
                want: chunk_len,
            });
        }

        let downloaded = self.board.snapshot().downloaded;
        self.emit_progress(downloaded).await;
        debug!("Chunk {} complete ({} bytes)", self.chunk.index, chunk_len);
        Ok(())
    }

    /// Route a transport error through the failure handler when it is a
    /// connection loss; otherwise hand it straight back to the retry loop.
    async fn connection_failure(&self, err: AccelaraError) -> AccelaraError {
        if err.is_connection_error() {
            if let Err(paused) = self.tracker.handle(&err.to_string(), &self.sink).await {
                return paused;
            }
        }
        err
    }

    fn latch_fallback(&self) {
        let mut mode = self.mode.lock().unwrap();
        if *mode == EngineMode::Segmented {
            info!("Latching single-connection fallback");
            *mode = EngineMode::FallingBack;
        }
    }

    async fn emit_progress(&self, downloaded: u64) {
        let speed = self.meter.sample(downloaded);
        let eta = self.meter.eta(downloaded, self.total);
        self.sink
            .emit(
                Event::http("downloading")
                    .with_counters(downloaded, self.total, speed, eta)
                    .set("chunk_progress", self.board.to_event_value())
                    .set("chunk_count", self.board.chunk_count()),
            )
            .await;
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
