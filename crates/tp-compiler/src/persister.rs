//! Rule artifact persistence
//!
//! A coalescing writer regenerates the artifact on its own thread. Each run reads
//! the tracker list, safelist and flags as they are when it starts, so a burst of
//! changes ends in one write that reflects the latest state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tp_core::store::write_atomic;
use tp_core::task::{BackgroundExecution, NoBackgroundExecution, Task, TaskCoalescer};

use crate::builder::{CompileStats, RuleCompiler};

/// Outcome of the most recent artifact write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub stats: CompileStats,
    pub bytes: usize,
    pub written: bool,
}

type ReportSlot = Arc<Mutex<Option<WriteReport>>>;

/// Pending regeneration of the rule artifact at `path`.
#[derive(Clone)]
pub struct ArtifactWrite {
    pub path: PathBuf,
    compiler: Arc<RuleCompiler>,
    report: ReportSlot,
}

impl ArtifactWrite {
    fn write(&self) -> WriteReport {
        let compiled = self.compiler.generate_or_empty();
        let contents = match compiled.to_json() {
            Ok(contents) => contents,
            Err(e) => {
                log::error!("Failed to serialize rules for '{}': {}", self.path.display(), e);
                return WriteReport {
                    stats: compiled.stats,
                    bytes: 0,
                    written: false,
                };
            }
        };

        let written = match write_atomic(&self.path, &contents) {
            Ok(()) => {
                log::info!("Wrote {} bytes of rules to '{}'", contents.len(), self.path.display());
                true
            }
            Err(e) => {
                log::error!("Failed to write rule artifact '{}': {}", self.path.display(), e);
                false
            }
        };
        WriteReport {
            stats: compiled.stats,
            bytes: contents.len(),
            written,
        }
    }
}

impl std::fmt::Debug for ArtifactWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWrite").field("path", &self.path).finish()
    }
}

impl Task for ArtifactWrite {
    /// A pending write compiles when it runs, so any write to the same path
    /// already covers a newer one.
    fn is_duplicate(&self, other: &Self) -> bool {
        self.path == other.path
    }

    fn run(self) {
        let report = self.write();
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }
}

/// Keeps the on-disk rule artifact in sync with the compiler's inputs.
pub struct RuleArtifactPersister {
    compiler: Arc<RuleCompiler>,
    path: PathBuf,
    report: ReportSlot,
    writer: TaskCoalescer<ArtifactWrite>,
}

impl RuleArtifactPersister {
    pub fn new(compiler: RuleCompiler, path: impl Into<PathBuf>) -> Self {
        Self::with_background(compiler, path, Arc::new(NoBackgroundExecution))
    }

    pub fn with_background(
        compiler: RuleCompiler,
        path: impl Into<PathBuf>,
        background: Arc<dyn BackgroundExecution>,
    ) -> Self {
        Self {
            compiler: Arc::new(compiler),
            path: path.into(),
            report: Arc::default(),
            writer: TaskCoalescer::with_background("rule-artifact", background),
        }
    }

    /// Schedule a recompile and write.
    ///
    /// Compilation happens on the writer thread when the write starts. An
    /// unreadable tracker list produces an empty artifact rather than an error.
    /// Use [`flush`](Self::flush) to wait for it and
    /// [`last_report`](Self::last_report) for the outcome.
    pub fn regenerate(&self) {
        self.writer.submit(ArtifactWrite {
            path: self.path.clone(),
            compiler: Arc::clone(&self.compiler),
            report: Arc::clone(&self.report),
        });
    }

    /// Result of the last write that ran, if any.
    pub fn last_report(&self) -> Option<WriteReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn artifact_path(&self) -> &Path {
        &self.path
    }

    pub fn artifact_exists(&self) -> bool {
        self.path.is_file()
    }

    /// Wait for scheduled writes to finish.
    pub fn flush(&self) {
        self.writer.flush();
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }
}
