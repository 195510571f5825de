//! skillindex-core — the reorg-safe event indexing pipeline for the
//! SkillChain platform.
//!
//! # Architecture
//!
//! ```text
//! ChainIndexer (one loop per chain, strictly sequential)
//!     ├── ChainClient      (RPC abstraction; impl in skillindex-rpc)
//!     ├── Reconciler       (checkpoint verification, fork-point rewind)
//!     ├── LogFetcher       (confirmed windows, decode + normalize)
//!     ├── EventWriter      (idempotent upsert, bounded dispatch queue)
//!     ├── CheckpointStore  (per-chain CAS cursor)
//!     └── PipelineMetrics  (lag / reorg / delivery gauges)
//! ```
//!
//! New events flow out through the bounded queue to the webhook dispatcher
//! (`skillindex-webhook`); storage backends live in `skillindex-storage`.

pub mod checkpoint;
pub mod client;
pub mod decode;
pub mod error;
pub mod fetcher;
pub mod indexer;
pub mod metrics;
pub mod reorg;
pub mod retry;
pub mod types;
pub mod writer;

pub use checkpoint::{ChainCheckpoint, CheckpointStore, MemoryCheckpointStore};
pub use client::ChainClient;
pub use decode::{EventDecoder, SkillContractsDecoder};
pub use error::IndexerError;
pub use fetcher::LogFetcher;
pub use indexer::{ChainIndexer, ChainIndexerBuilder, ChainIndexerConfig};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use reorg::{Reconciler, ReorgEvent};
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{event_id, BlockRef, EventKind, EventPayload, IndexedEvent, RawLog};
pub use writer::{EventStore, EventWriter, MemoryEventStore};
