//! Debounced, burst-protected filesystem watcher feeding the indexer.
//!
//! A single long-running task owns `WatcherState` and the pending-path
//! batch; `index_status` only ever takes snapshot reads of the atomics.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::config::timeouts;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::indexer::{has_binary_suffix, is_ignored_dir, Indexer};

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);
const MAX_WAIT: Duration = Duration::from_secs(30);
const BURST_WINDOW: Duration = Duration::from_secs(5);
const BURST_THRESHOLD: u32 = 50;
const PERIODIC_RESCAN_INTERVAL: Duration = Duration::from_secs(15 * 60);
const FLUSH_TICK: Duration = Duration::from_millis(250);
/// Raw OS-event coalescing window handed to `notify-debouncer-full`, well
/// below the 3s trailing debounce this module layers on top — it only
/// exists to collapse the handful of duplicate native events one save
/// triggers, not to implement the batching semantics itself.
const RAW_EVENT_COALESCE_WINDOW: Duration = Duration::from_millis(200);

/// Scalar, atomically-readable state published to `index_status`. Written
/// only by the watcher task; read by observers without locking.
#[derive(Default)]
pub struct WatcherState {
    pub running: AtomicBool,
    /// Monotonic epoch-seconds of the most recently completed full scan.
    pub last_scan_time: AtomicU64,
    pub index_generation: AtomicU64,
}

impl WatcherState {
    pub fn snapshot(&self) -> (bool, u64, u64) {
        (
            self.running.load(Ordering::Relaxed),
            self.last_scan_time.load(Ordering::Relaxed),
            self.index_generation.load(Ordering::Relaxed),
        )
    }

    fn bump_generation(&self) {
        self.index_generation.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_scanned_now(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_scan_time.store(now, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct PendingBatch {
    paths: HashSet<String>,
    first_enqueued_at: Option<Instant>,
    last_activity_at: Option<Instant>,
}

struct BurstTracker {
    window_start: Instant,
    count: u32,
}

impl BurstTracker {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Returns true if the burst threshold was exceeded by this increment.
    fn record(&mut self, n: u32) -> bool {
        if self.window_start.elapsed() >= BURST_WINDOW {
            self.window_start = Instant::now();
            self.count = 0;
        }
        self.count += n;
        self.count > BURST_THRESHOLD
    }

    fn reset(&mut self) {
        self.window_start = Instant::now();
        self.count = 0;
    }
}

pub struct FileWatcher {
    ctx: Arc<EngineContext>,
    indexer: Arc<Indexer>,
    state: Arc<WatcherState>,
    pending: AsyncMutex<PendingBatch>,
    burst: AsyncMutex<BurstTracker>,
}

impl FileWatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Arc<Self> {
        let indexer = Arc::new(Indexer::new(ctx.clone()));
        Arc::new(Self {
            ctx,
            indexer,
            state: Arc::new(WatcherState::default()),
            pending: AsyncMutex::new(PendingBatch::default()),
            burst: AsyncMutex::new(BurstTracker::new()),
        })
    }

    pub fn state(&self) -> Arc<WatcherState> {
        self.state.clone()
    }

    /// Runs forever: the raw filesystem event loop, the debounce-flush
    /// ticker, and the periodic-rescan timer, all driven from one task set.
    pub async fn run(self: Arc<Self>) -> EngineResult<()> {
        self.state.running.store(true, Ordering::Relaxed);

        // Initial full scan establishes the baseline catalog state.
        self.run_full_scan().await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(RAW_EVENT_COALESCE_WINDOW, None, move |result| {
            let _ = tx.send(result);
        })
        .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
        debouncer
            .watch(&self.ctx.project_root, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;

        let flush_self = self.clone();
        let flush_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_TICK);
            loop {
                ticker.tick().await;
                if let Err(e) = flush_self.maybe_flush().await {
                    warn!(error = %e, "debounce flush failed");
                }
            }
        });

        let rescan_self = self.clone();
        let rescan_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERIODIC_RESCAN_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = rescan_self.run_full_scan().await {
                    warn!(error = %e, "periodic rescan failed");
                }
            }
        });

        while let Some(res) = rx.recv().await {
            match res {
                Ok(events) => {
                    for debounced in events {
                        if let Err(e) = self.handle_event(debounced.event).await {
                            warn!(error = %e, "event handling failed");
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "filesystem watcher error");
                    }
                }
            }
        }

        flush_task.abort();
        rescan_task.abort();
        drop(debouncer);
        self.state.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    #[instrument(skip(self, event))]
    async fn handle_event(&self, event: Event) -> EngineResult<()> {
        let root = self.ctx.project_root.clone();

        if event
            .paths
            .iter()
            .any(|p| path_is_git_head(p, &root))
        {
            info!("branch switch detected via .git/HEAD");
            self.cancel_pending().await;
            self.run_full_scan().await?;
            self.state.bump_generation();
            return Ok(());
        }

        let mut changed = Vec::new();
        let mut removed = Vec::new();
        for path in &event.paths {
            let Some(relative) = self.relative_and_allowed(path, &root) else {
                continue;
            };
            match event.kind {
                EventKind::Remove(_) => removed.push(relative),
                EventKind::Create(_) | EventKind::Modify(_) => changed.push(relative),
                _ => {}
            }
        }

        // Removal fast path: immediate, outside debounce/burst batching.
        for path in &removed {
            self.ctx
                .vector_store
                .delete_by_file(self.ctx.preset, self.ctx.workspace_id, path)
                .await?;
            self.ctx.catalog.delete_file(path)?;
            debug!(file_path = %path, "removed file handled immediately");
        }

        if changed.is_empty() {
            return Ok(());
        }

        let burst_tripped = {
            let mut burst = self.burst.lock().await;
            burst.record(changed.len() as u32)
        };
        if burst_tripped {
            info!(count = changed.len(), "burst threshold exceeded, running full scan");
            self.cancel_pending().await;
            self.run_full_scan().await?;
            self.burst.lock().await.reset();
            self.state.bump_generation();
            return Ok(());
        }

        let mut pending = self.pending.lock().await;
        if pending.paths.is_empty() {
            pending.first_enqueued_at = Some(Instant::now());
        }
        pending.last_activity_at = Some(Instant::now());
        pending.paths.extend(changed);
        Ok(())
    }

    async fn cancel_pending(&self) {
        let mut pending = self.pending.lock().await;
        pending.paths.clear();
        pending.first_enqueued_at = None;
    }

    /// Called on a fixed tick; flushes when the trailing debounce window has
    /// elapsed or the 30s max-wait has been exceeded since the batch's first
    /// real enqueue time.
    async fn maybe_flush(&self) -> EngineResult<()> {
        let should_flush = {
            let pending = self.pending.lock().await;
            match pending.first_enqueued_at {
                None => false,
                Some(first) => {
                    first.elapsed() >= MAX_WAIT || pending.quiet_for(DEBOUNCE_WINDOW)
                }
            }
        };
        if !should_flush {
            return Ok(());
        }

        let batch = {
            let mut pending = self.pending.lock().await;
            let snapshot: Vec<String> = pending.paths.drain().collect();
            pending.first_enqueued_at = None;
            pending.last_activity_at = None;
            snapshot
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut chunks_written = 0usize;
        for path in batch {
            if !self.is_stable(&path).await {
                debug!(file_path = %path, "file still changing, deferring");
                continue;
            }
            match self.indexer.index_file(&path).await {
                Ok(n) => chunks_written += n,
                Err(e) => warn!(file_path = %path, error = %e, "index_file failed in flush"),
            }
        }
        if chunks_written > 0 {
            self.state.bump_generation();
        }
        Ok(())
    }

    /// Sleeps 300ms and verifies `(mtime, size)` are unchanged, per §4.5.
    async fn is_stable(&self, relative_path: &str) -> bool {
        let absolute = self.ctx.absolute(relative_path);
        let Ok(before) = std::fs::metadata(&absolute) else {
            return false;
        };
        tokio::time::sleep(timeouts::FILE_STABILITY).await;
        let Ok(after) = std::fs::metadata(&absolute) else {
            return false;
        };
        before.len() == after.len()
            && before.modified().ok() == after.modified().ok()
    }

    #[instrument(skip(self))]
    async fn run_full_scan(&self) -> EngineResult<()> {
        let (files, chunks) = self.indexer.run_scan().await?;
        self.state.mark_scanned_now();
        info!(files_scanned = files, chunks_indexed = chunks, "full scan complete");
        Ok(())
    }

    /// Rejects a path lying in an ignore-listed/hidden directory or carrying
    /// a binary suffix, with the single exception of `.git/HEAD` itself —
    /// the branch-switch signal — which passes through even though `.git`
    /// is otherwise wholly excluded.
    fn relative_and_allowed(&self, path: &Path, root: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if relative_str.is_empty() {
            return None;
        }
        if relative_str == ".git/HEAD" {
            return Some(relative_str);
        }
        if has_binary_suffix(&relative_str) {
            return None;
        }
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                if let std::path::Component::Normal(part) = component {
                    if let Some(name) = part.to_str() {
                        if is_ignored_dir(name) {
                            return None;
                        }
                    }
                }
            }
        }
        Some(relative_str)
    }
}

impl PendingBatch {
    /// True once `window` has passed since the last path was added — the
    /// trailing part of the trailing debounce: every new arrival resets
    /// `last_activity_at`, so this only trips once activity genuinely stops.
    fn quiet_for(&self, window: Duration) -> bool {
        self.last_activity_at
            .map(|last| last.elapsed() >= window)
            .unwrap_or(false)
    }
}

fn path_is_git_head(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .map(|p| p == Path::new(".git/HEAD") || p == Path::new(".git").join("HEAD"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_tracker_trips_past_threshold() {
        let mut tracker = BurstTracker::new();
        assert!(!tracker.record(50));
        assert!(tracker.record(1));
    }

    #[test]
    fn burst_tracker_resets_after_window() {
        let mut tracker = BurstTracker::new();
        tracker.window_start = Instant::now() - Duration::from_secs(6);
        assert!(!tracker.record(10));
        assert_eq!(tracker.count, 10);
    }

    #[test]
    fn git_head_is_recognized_on_any_platform_separator() {
        let root = PathBuf::from("/repo");
        assert!(path_is_git_head(&PathBuf::from("/repo/.git/HEAD"), &root));
        assert!(!path_is_git_head(&PathBuf::from("/repo/.git/config"), &root));
    }

    fn test_watcher(root: &Path) -> Arc<FileWatcher> {
        use crate::config::EngineConfig;
        use crate::context::EngineContext;
        use crate::types::{Preset, WorkspaceConfig};
        use uuid::Uuid;

        let workspace = WorkspaceConfig {
            workspace_id: Uuid::new_v4(),
            repo_id: "test-repo".to_string(),
            preset: Preset::Lite,
            created_at: chrono::Utc::now(),
        };
        let config = EngineConfig {
            qdrant_url: "http://127.0.0.1:0".to_string(),
            tei_url: "http://127.0.0.1:0".to_string(),
            reranker_url: None,
            preset: Preset::Lite,
        };
        let ctx = EngineContext::open(root.to_path_buf(), workspace, &config).unwrap();
        FileWatcher::new(ctx)
    }

    #[test]
    fn relative_and_allowed_keeps_top_level_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let watcher = test_watcher(&root);
        assert_eq!(
            watcher.relative_and_allowed(&root.join(".env"), &root),
            Some(".env".to_string())
        );
        assert_eq!(
            watcher.relative_and_allowed(&root.join(".gitignore"), &root),
            Some(".gitignore".to_string())
        );
    }

    #[test]
    fn relative_and_allowed_rejects_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let watcher = test_watcher(&root);
        assert_eq!(
            watcher.relative_and_allowed(&root.join("node_modules/dep.js"), &root),
            None
        );
        assert_eq!(
            watcher.relative_and_allowed(&root.join(".git/index"), &root),
            None
        );
    }

    #[test]
    fn relative_and_allowed_keeps_git_head_exception() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let watcher = test_watcher(&root);
        assert_eq!(
            watcher.relative_and_allowed(&root.join(".git/HEAD"), &root),
            Some(".git/HEAD".to_string())
        );
    }
}
