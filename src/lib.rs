//! `txn-trace-core`: the in-process transaction tracing core of an APM
//! agent — segment tree, exclusive-time accounting, distributed trace
//! propagation, bounded metric table, and the two-pass trace/span-event
//! finalizer, with no I/O, no background threads, and no knowledge of any
//! particular host language's runtime (spec.md §1).
//!
//! # Module map
//!
//! - [`app`] — the process-wide, reference-counted application handle.
//! - [`config`] — a transaction's immutable-after-begin options.
//! - [`txn`] — the transaction object and its `txn_*`/`segment_*` surface.
//! - [`segment_tree`] / [`segment`] — the arena-backed segment tree.
//! - [`exclusive_time`] — the child-interval clamp/merge calculator.
//! - [`finalizer`] — the two-pass accounting + emission pipeline.
//! - [`distributed_trace`] — W3C and proprietary distributed trace payloads.
//! - [`metric`] — the bounded, name-keyed metric table.
//! - [`namer`] — URL/transaction naming rules and segment-term collapsing.
//! - [`matcher`] — the prefix matcher the namer builds on.
//! - [`attributes`] — the attribute store, destination masks, and filters.
//! - [`error_record`] — the transaction-level error-priority record.
//! - [`heap`] — the bounded min-max heap backing every reservoir.
//! - [`ids`] — trace/span id types and generation.
//! - [`string_pool`] — string interning shared by a transaction's segments.
//! - [`error`] — the library-internal error type.
//! - [`internal_logging`] — `tracing`-backed internal diagnostics macros.
#![forbid(unsafe_code)]

pub mod app;
pub mod attributes;
pub mod config;
pub mod distributed_trace;
pub mod error;
pub mod error_record;
pub mod exclusive_time;
pub mod finalizer;
pub mod heap;
pub mod ids;
pub mod internal_logging;
pub mod matcher;
pub mod metric;
pub mod namer;
pub mod segment;
pub mod segment_tree;
pub mod string_pool;
pub mod txn;

pub use app::{App, AppSnapshot};
pub use config::TxnOptions;
pub use error::{TraceCoreError, TraceCoreResult};
pub use finalizer::FinalizeOutput;
pub use txn::Txn;
