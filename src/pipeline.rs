//! Pipeline driver (§8 ambient module): the `prepare`/`execute` contract of
//! §5, dispatched over a `rayon::ThreadPool` sized per §5's guidance (CPU
//! count, or a small bounded pool for the memory-intensive snapshot-mapping
//! stage). Generalizes the teacher's single `get_law_info_lst` directory
//! walk into a bag-of-items map/reduce shared by every stage.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::info;

use crate::error::{Diagnostic, PipelineError, Result};
use crate::stage_log::Log;

/// One unit of work for a stage: typically one document or one snapshot.
pub trait PipelineItem: Send + Sync {
    fn id(&self) -> &str;
}

/// A stage's `prepare`/`execute` contract (§5).
pub trait PipelineStage: Sync {
    type Item: PipelineItem;

    fn name(&self) -> &'static str;

    /// Builds the work queue, optionally skipping items whose output
    /// already exists unless `overwrite` is set (§5 "prepare").
    fn prepare(&self, overwrite: bool) -> Result<Vec<Self::Item>>;

    /// Processes one item. Pure with respect to the stage's shared
    /// read-only registries (§5 "execute").
    fn execute(&self, item: &Self::Item) -> Result<Vec<Diagnostic>>;

    /// Worker pool size (§5): CPU count by default, overridden by stages
    /// like snapshot-mapping that bound it to avoid memory pressure.
    fn max_workers(&self) -> Option<usize> {
        None
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Runs `stage` to completion: builds the pool, dispatches every prepared
/// item, aggregates per-item diagnostics into one stage log (§7 "aggregated
/// by stage into a single log file"), and propagates the first fatal error
/// to the dispatcher once the whole batch has finished (§5 "Cancellation":
/// a worker finishes its current item, it does not abort siblings).
pub fn run_stage<S: PipelineStage>(
    stage: &S,
    overwrite: bool,
    single_process: bool,
    log_path: impl AsRef<Path>,
) -> Result<()> {
    let items = stage.prepare(overwrite)?;
    info!(stage = stage.name(), items = items.len(), "prepared work queue");

    let workers = if single_process {
        1
    } else {
        stage.max_workers().unwrap_or_else(default_worker_count)
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| PipelineError::Io {
            path: format!("<{} thread pool>", stage.name()),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    let results: Vec<(String, Result<Vec<Diagnostic>>)> = pool.install(|| {
        items
            .par_iter()
            .map(|item| (item.id().to_string(), stage.execute(item)))
            .collect()
    });

    let mut log = Log::new();
    let mut first_failure: Option<(String, PipelineError)> = None;
    for (id, result) in results {
        match result {
            Ok(diagnostics) => log.extend(diagnostics),
            Err(err) if first_failure.is_none() => first_failure = Some((id, err)),
            Err(_) => {}
        }
    }
    log.write(log_path)?;

    if let Some((id, err)) = first_failure {
        return Err(PipelineError::Io {
            path: id,
            source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        });
    }
    Ok(())
}

/// Write-to-temp-then-rename (§5 "Cancellation": partial output files must
/// be removed, not left corrupted, if a worker raises).
pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, bytes).map_err(|source| PipelineError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Best-effort cleanup of a partial output after a failed `execute` (§5).
pub fn remove_partial(path: impl AsRef<Path>) {
    let _ = std::fs::remove_file(path.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingItem(String);
    impl PipelineItem for CountingItem {
        fn id(&self) -> &str {
            &self.0
        }
    }

    struct CountingStage {
        calls: AtomicUsize,
        fail_on: Mutex<Option<String>>,
    }

    impl PipelineStage for CountingStage {
        type Item = CountingItem;

        fn name(&self) -> &'static str {
            "counting"
        }

        fn prepare(&self, _overwrite: bool) -> Result<Vec<Self::Item>> {
            Ok(vec![
                CountingItem("a".into()),
                CountingItem("b".into()),
                CountingItem("c".into()),
            ])
        }

        fn execute(&self, item: &Self::Item) -> Result<Vec<Diagnostic>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.lock().unwrap().as_deref() == Some(item.id()) {
                return Err(PipelineError::NoValidAlias(item.id().to_string()));
            }
            Ok(vec![Diagnostic::new(item.id(), "ok")])
        }

        fn max_workers(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[test]
    fn runs_every_prepared_item_and_writes_log() {
        let dir = std::env::temp_dir().join("statute_graph_pipeline_test_stage_log");
        let _ = std::fs::create_dir_all(&dir);
        let log_path = dir.join("counting.log");
        let stage = CountingStage {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(None),
        };
        run_stage(&stage, true, true, &log_path).unwrap();
        assert_eq!(stage.calls.load(Ordering::SeqCst), 3);
        let written = std::fs::read_to_string(&log_path).unwrap();
        assert!(written.contains("ok"));
    }

    #[test]
    fn propagates_first_failure_after_the_batch_completes() {
        let dir = std::env::temp_dir().join("statute_graph_pipeline_test_stage_log_fail");
        let _ = std::fs::create_dir_all(&dir);
        let log_path = dir.join("counting.log");
        let stage = CountingStage {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(Some("b".to_string())),
        };
        let result = run_stage(&stage, true, true, &log_path);
        assert!(result.is_err());
        assert_eq!(stage.calls.load(Ordering::SeqCst), 3);
    }
}
