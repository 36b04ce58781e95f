use std::fmt;
use std::sync::{Arc, Barrier};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::task::Task;

use super::BackendError;

/// Outcome of a collective flush as seen by rank 0
pub type Verdict = Result<(), String>;

/// Collective communication between the ranks sharing one series.
///
/// Every rank must call [`gather_tasks`](Communicator::gather_tasks) and
/// [`broadcast_verdict`](Communicator::broadcast_verdict) the same number of
/// times and in the same order.
pub trait Communicator: Send + fmt::Debug {
    /// Index of this rank
    fn rank(&self) -> usize;

    /// Number of ranks
    fn size(&self) -> usize;

    /// Block until every rank has arrived
    fn barrier(&self) -> Result<(), BackendError>;

    /// Send this rank's batch to rank 0.
    ///
    /// Rank 0 gets every batch back, indexed by rank; other ranks get `None`.
    fn gather_tasks(&self, tasks: Vec<Task>) -> Result<Option<Vec<Vec<Task>>>, BackendError>;

    /// Rank 0 passes `Some(verdict)`; every rank returns the same verdict
    fn broadcast_verdict(&self, verdict: Option<Verdict>) -> Result<Verdict, BackendError>;
}

#[derive(Debug)]
enum Message {
    Tasks { rank: usize, tasks: Vec<Task> },
    Verdict(Verdict),
}

/// In-process communicator: threads stand in for ranks
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    inbox: Receiver<Message>,
    peers: Vec<Sender<Message>>,
    barrier: Arc<Barrier>,
}

impl LocalCommunicator {
    /// One communicator per rank, connected to each other
    pub fn world(size: usize) -> Vec<LocalCommunicator> {
        let size = size.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let barrier = Arc::new(Barrier::new(size));
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalCommunicator {
                rank,
                size,
                inbox,
                peers: senders.clone(),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn send(&self, to: usize, message: Message) -> Result<(), BackendError> {
        self.peers[to].send(message).map_err(|_| {
            BackendError::Communication(format!("rank {to} is gone (sent from rank {})", self.rank))
        })
    }

    fn receive(&self) -> Result<Message, BackendError> {
        self.inbox.recv().map_err(|_| {
            BackendError::Communication(format!("all peers of rank {} disconnected", self.rank))
        })
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), BackendError> {
        self.barrier.wait();
        Ok(())
    }

    fn gather_tasks(&self, tasks: Vec<Task>) -> Result<Option<Vec<Vec<Task>>>, BackendError> {
        if self.rank != 0 {
            self.send(0, Message::Tasks { rank: self.rank, tasks })?;
            return Ok(None);
        }

        let mut batches: Vec<Option<Vec<Task>>> = (0..self.size).map(|_| None).collect();
        batches[0] = Some(tasks);
        for _ in 1..self.size {
            match self.receive()? {
                Message::Tasks { rank, tasks } if rank < self.size && batches[rank].is_none() => {
                    batches[rank] = Some(tasks);
                }
                Message::Tasks { rank, .. } => {
                    return Err(BackendError::Communication(format!(
                        "unexpected task batch from rank {rank}"
                    )))
                }
                Message::Verdict(_) => {
                    return Err(BackendError::Communication(
                        "rank 0 received a verdict while gathering".to_string(),
                    ))
                }
            }
        }
        Ok(Some(batches.into_iter().map(Option::unwrap_or_default).collect()))
    }

    fn broadcast_verdict(&self, verdict: Option<Verdict>) -> Result<Verdict, BackendError> {
        if self.rank == 0 {
            let verdict = verdict.unwrap_or(Ok(()));
            for peer in 1..self.size {
                self.send(peer, Message::Verdict(verdict.clone()))?;
            }
            return Ok(verdict);
        }
        match self.receive()? {
            Message::Verdict(verdict) => Ok(verdict),
            Message::Tasks { rank, .. } => Err(BackendError::Communication(format!(
                "rank {} received tasks from rank {rank} while waiting for a verdict",
                self.rank
            ))),
        }
    }
}
