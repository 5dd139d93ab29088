//! Kubexpose - Kubernetes controller that exposes services through ngrok tunnels
//!
//! For every `Kubexpose` custom resource the controller ensures an ngrok Deployment
//! exists that tunnels traffic to `serviceName:port`.
//!
//! # Architecture
//!
//! Change notifications flow through a single pipeline:
//!
//! ```text
//! watch -> ResourceCache -> EventTranslator -> WorkQueue -> Reconciler -> DependentClient
//! ```
//!
//! - The informer mirrors Kubexpose objects into a local cache and emits events
//! - The translator turns each event into a `namespace/name` key on the queue
//! - The queue deduplicates keys and applies per-key exponential backoff
//! - Workers pull keys, compute the desired Deployment and create it
//!
//! # Modules
//!
//! - [`crd`] - The Kubexpose custom resource definition
//! - [`store`] - Resource store seam, key helpers and the local cache
//! - [`informer`] - Watch loop feeding the cache and emitting events
//! - [`translator`] - Event to work-queue key translation
//! - [`queue`] - Deduplicating, rate-limited work queue
//! - [`dependent`] - Desired Deployment computation and the cluster API seam
//! - [`controller`] - Reconcile loop, retry policy and worker pool
//! - [`config`] - Controller configuration
//! - [`telemetry`] - Tracing and OpenTelemetry setup
//! - [`metrics`] - OpenTelemetry instruments
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod dependent;
pub mod error;
pub mod informer;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod translator;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for every write this controller issues
pub const FIELD_MANAGER: &str = "kubexpose-controller";

/// Label key marking objects managed by this controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_KUBEXPOSE: &str = "kubexpose";

/// Default number of processing attempts per key before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
