//! Collective flushes across simulated ranks sharing one store

use std::sync::Arc;
use std::thread;

use pmdio::backend::{LocalCommunicator, MemoryStore};
use pmdio::config::ParallelConfig;
use pmdio::{Access, Dataset, ParallelMode, Series, SeriesConfig};

const RANKS: usize = 4;
const PER_RANK: u64 = 25;

/// Run `body(rank, communicator)` on one thread per rank
fn run_ranks<F>(body: F)
where
    F: Fn(usize, LocalCommunicator) + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let handles: Vec<_> = LocalCommunicator::world(RANKS)
        .into_iter()
        .enumerate()
        .map(|(rank, communicator)| {
            let body = Arc::clone(&body);
            thread::spawn(move || body(rank, communicator))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

fn read_back(store: &MemoryStore, extent: u64) -> Vec<f64> {
    let series = Series::builder("parallel.json")
        .access(Access::ReadOnly)
        .memory(store)
        .open()
        .unwrap();
    let x = series
        .iteration(0)
        .unwrap()
        .mesh("E")
        .unwrap()
        .component("x")
        .unwrap();
    assert_eq!(x.dataset(), Some(Dataset::of::<f64>(vec![extent])));
    let chunk = x.load_chunk::<f64>(vec![0], vec![extent]).unwrap();
    series.flush().unwrap();
    chunk.get().unwrap()
}

#[test]
fn test_every_rank_writes_its_slice() {
    let store = MemoryStore::new();
    let shared = store.clone();
    run_ranks(move |rank, communicator| {
        let series = Series::builder("parallel.json")
            .memory(&shared)
            .communicator(communicator)
            .open()
            .unwrap();
        let x = series
            .iteration(0)
            .unwrap()
            .mesh("E")
            .unwrap()
            .component("x")
            .unwrap();
        x.reset_dataset(Dataset::of::<f64>(vec![PER_RANK * RANKS as u64]))
            .unwrap();
        let offset = rank as u64 * PER_RANK;
        x.store_chunk(vec![rank as f64; PER_RANK as usize], vec![offset], vec![PER_RANK])
            .unwrap();
        series.iteration(0).unwrap().close(true).unwrap();
        series.close().unwrap();
    });

    let values = read_back(&store, PER_RANK * RANKS as u64);
    for (i, value) in values.iter().enumerate() {
        assert_eq!(*value, (i as u64 / PER_RANK) as f64);
    }
}

#[test]
fn test_rank_without_data_still_participates() {
    let store = MemoryStore::new();
    let shared = store.clone();
    let extent = PER_RANK * (RANKS as u64 - 1);
    run_ranks(move |rank, communicator| {
        let series = Series::builder("parallel.json")
            .memory(&shared)
            .communicator(communicator)
            .open()
            .unwrap();
        let x = series
            .iteration(0)
            .unwrap()
            .mesh("E")
            .unwrap()
            .component("x")
            .unwrap();
        x.reset_dataset(Dataset::of::<f64>(vec![extent])).unwrap();
        if rank == 0 {
            x.store_chunk(Vec::<f64>::new(), vec![0], vec![0]).unwrap();
        } else {
            let offset = (rank as u64 - 1) * PER_RANK;
            x.store_chunk(vec![rank as f64; PER_RANK as usize], vec![offset], vec![PER_RANK])
                .unwrap();
        }
        series.flush().unwrap();
        series.close().unwrap();
    });

    let values = read_back(&store, extent);
    assert_eq!(values.len() as u64, extent);
    assert!(values.iter().all(|&v| v != 0.0));
}

#[test]
fn test_independent_mode_on_shared_store() {
    let store = MemoryStore::new();
    let shared = store.clone();
    run_ranks(move |rank, communicator| {
        let config = SeriesConfig {
            parallel: ParallelConfig {
                mode: ParallelMode::Independent,
            },
            ..SeriesConfig::default()
        };
        let series = Series::builder("parallel.json")
            .config(config)
            .memory(&shared)
            .communicator(communicator)
            .open()
            .unwrap();
        let x = series
            .iteration(0)
            .unwrap()
            .mesh("E")
            .unwrap()
            .component("x")
            .unwrap();
        x.reset_dataset(Dataset::of::<f64>(vec![PER_RANK * RANKS as u64]))
            .unwrap();
        let offset = rank as u64 * PER_RANK;
        x.store_chunk(vec![1.0 + rank as f64; PER_RANK as usize], vec![offset], vec![PER_RANK])
            .unwrap();
        series.close().unwrap();
    });

    let values = read_back(&store, PER_RANK * RANKS as u64);
    assert!(values.iter().all(|&v| v >= 1.0));
}
