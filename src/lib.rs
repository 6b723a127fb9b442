//! # Poiesis
//!
//! A GA4GH Task Execution Service (TES) v1.1.0 engine on top of Kubernetes.
//!
//! A task moves through four short-lived workloads, all built from this
//! crate and selected by subcommand:
//!
//! ```text
//! api ──creates──▶ torc ──▶ tif ──▶ texam ──▶ tof
//!                    │  (Jobs on the cluster, hand-off over the bus,
//!                    ▼   state owned by the store's CAS transitions)
//!                  store
//! ```
//!
//! The API persists the task and launches the orchestrator (`torc`) as a
//! Job. The orchestrator provisions the task's PVC and drives the input
//! filer (`tif`), the executor monitor (`texam`) and the output filer
//! (`tof`), each as its own Job. Phase completion is signalled over the
//! message bus with a bounded wait; the persisted task document is always
//! authoritative when the bus is silent.

pub mod api;
pub mod auth;
pub mod bus;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod errors;
pub mod filer;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod texam;
pub mod transfer;

pub use errors::{PoiesisError, Result};
