use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};

use crate::config::ParallelMode;
use crate::data::{Datatype, Extent};
use crate::task::{Location, StepMode, Task, TaskKind};

use super::{Backend, BackendError, Capabilities, Communicator};

/// Where a gathered task runs relative to the rest of the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Rank-ordered body
    Body,
    /// Closes and step endings, once per location, after every rank's body
    Finalize,
}

fn phase(kind: &TaskKind) -> Phase {
    match kind {
        TaskKind::AdvanceStep {
            mode: StepMode::End,
        }
        | TaskKind::ClosePath
        | TaskKind::CloseFile => Phase::Finalize,
        _ => Phase::Body,
    }
}

/// Wraps an engine for execution across the ranks of a [`Communicator`].
///
/// Mutating tasks are held back until [`Backend::flush`], gathered on rank 0
/// and executed there in rank order. Chunk reads that follow a held-back
/// task on the same file wait as well and run locally once the writes are
/// done. Structural tasks that several ranks issue for the same location run
/// once; conflicting dataset declarations fail the whole flush with
/// [`BackendError::CollectiveMismatch`]. Rank 0 broadcasts its verdict, even
/// when the gather itself failed, so every rank returns the same outcome.
///
/// In [`ParallelMode::Independent`] on a shared-storage engine, chunk writes
/// skip the gather and run on the issuing rank once the structural phase
/// succeeded, followed by a barrier.
///
/// A failed collective flush fails on every rank. Callers must either retry
/// on all ranks or abandon the series on all ranks.
#[derive(Debug)]
pub struct CollectiveBackend<B> {
    inner: B,
    communicator: Box<dyn Communicator>,
    mode: ParallelMode,
    pending: Vec<Task>,
    /// Chunk reads queued behind pending writes, in submission order
    reads: Vec<Task>,
}

impl<B: Backend> CollectiveBackend<B> {
    /// Wrap `inner`; every rank must wrap its own instance
    pub fn new(inner: B, communicator: Box<dyn Communicator>, mode: ParallelMode) -> Self {
        let mode = match mode {
            ParallelMode::Independent if !inner.capabilities().shared_storage => {
                warn!(
                    "{} engine has no shared storage, falling back to collective chunk writes",
                    inner.name()
                );
                ParallelMode::Collective
            }
            mode => mode,
        };
        Self {
            inner,
            communicator,
            mode,
            pending: Vec::new(),
            reads: Vec::new(),
        }
    }

    /// Rank of this instance
    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }

    /// Effective parallel mode
    pub fn mode(&self) -> ParallelMode {
        self.mode
    }

    /// Wrapped engine
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Execute every rank's batch on rank 0
    fn execute_gathered(&mut self, batches: Vec<Vec<Task>>) -> Result<(), BackendError> {
        let mut seen: HashSet<(Location, &'static str)> = HashSet::new();
        let mut declared: BTreeMap<Location, (Datatype, Extent)> = BTreeMap::new();
        let mut extended: BTreeMap<Location, Extent> = BTreeMap::new();

        let mut body = Vec::new();
        let mut finalizing = Vec::new();
        for (rank, batch) in batches.into_iter().enumerate() {
            for task in batch {
                match phase(&task.kind) {
                    Phase::Body => body.push((rank, task)),
                    Phase::Finalize => finalizing.push(task),
                }
            }
        }

        // a step opens where the first rank placed it, after that rank's file creation
        for (rank, task) in body {
            match &task.kind {
                TaskKind::CreateFile
                | TaskKind::OpenFile
                | TaskKind::CreatePath
                | TaskKind::AdvanceStep { .. } => {
                    if !seen.insert((task.location.clone(), task.kind.name())) {
                        continue;
                    }
                }
                TaskKind::CreateDataset { datatype, extent } => {
                    match declared.get(&task.location) {
                        Some((d, e)) if d == datatype && e == extent => continue,
                        Some((d, e)) => {
                            return Err(BackendError::CollectiveMismatch(format!(
                                "rank {rank} declares {} as {datatype} {extent:?}, \
                                 another rank declared {d} {e:?}",
                                task.location
                            )))
                        }
                        None => {
                            declared.insert(task.location.clone(), (*datatype, extent.clone()));
                        }
                    }
                }
                TaskKind::ExtendDataset { extent } => match extended.get(&task.location) {
                    Some(e) if e == extent => continue,
                    Some(e) => {
                        return Err(BackendError::CollectiveMismatch(format!(
                            "rank {rank} extends {} to {extent:?}, another rank to {e:?}",
                            task.location
                        )))
                    }
                    None => {
                        extended.insert(task.location.clone(), extent.clone());
                    }
                },
                _ => {}
            }
            self.inner.execute(task)?;
        }

        let mut finalized: HashSet<(Location, &'static str)> = HashSet::new();
        for task in finalizing {
            if finalized.insert((task.location.clone(), task.kind.name())) {
                self.inner.execute(task)?;
            }
        }
        self.inner.flush()
    }

    fn flush_local(&mut self, tasks: Vec<Task>) -> Result<(), BackendError> {
        for task in tasks {
            self.inner.execute(task)?;
        }
        self.inner.flush()
    }

    /// Whether a held-back task touches `file`
    fn holds_writes_for(&self, file: &str) -> bool {
        self.pending.iter().any(|t| t.location.file == file)
    }
}

impl<B: Backend> Backend for CollectiveBackend<B> {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        if matches!(task.kind, TaskKind::ReadChunk { .. })
            && (!self.reads.is_empty() || self.holds_writes_for(&task.location.file))
        {
            self.reads.push(task);
            return Ok(());
        }
        if task.kind.is_read() {
            return self.inner.execute(task);
        }
        self.pending.push(task);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        let batch = std::mem::take(&mut self.pending);
        let (chunks, structural): (Vec<Task>, Vec<Task>) = match self.mode {
            ParallelMode::Independent => batch
                .into_iter()
                .partition(|t| matches!(t.kind, TaskKind::WriteChunk { .. })),
            ParallelMode::Collective => (Vec::new(), batch),
        };
        debug!(
            "Rank {} contributes {} tasks to the collective flush ({} local chunk writes)",
            self.communicator.rank(),
            structural.len(),
            chunks.len()
        );

        let reads = std::mem::take(&mut self.reads);
        let is_root = self.communicator.rank() == 0;

        let mut root_error = None;
        let verdict = match self.communicator.gather_tasks(structural) {
            Ok(Some(batches)) => {
                let result = self.execute_gathered(batches);
                let verdict = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                root_error = result.err();
                Some(verdict)
            }
            Ok(None) => None,
            // peers are waiting for a verdict and must fail too
            Err(e) if is_root => {
                let verdict = Err(e.to_string());
                root_error = Some(e);
                Some(verdict)
            }
            Err(e) => return Err(e),
        };
        let verdict = self.communicator.broadcast_verdict(verdict)?;

        if let Err(message) = verdict {
            return Err(root_error.unwrap_or(BackendError::CollectiveFailure(message)));
        }

        if self.mode == ParallelMode::Independent {
            let local = self.flush_local(chunks);
            // every rank reaches the barrier, even after a local failure
            self.communicator.barrier()?;
            local?;
        }
        // reads observe every write of this flush, on every rank
        self.flush_local(reads)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collective_chunk_writes: self.mode == ParallelMode::Collective,
            ..self.inner.capabilities()
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
