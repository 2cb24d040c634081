//! # Reconciler
//!
//! Turns a `Vault` descriptor into its managed objects.
//!
//! - `reconcile`: controller entry point and the ordered sync pass
//! - `resources`: pure builders for every owned object
//! - `store`: the `ObjectStore` seam over the Kubernetes API
//! - `types`: errors, events and the shared reconciler context
//! - `validation`: descriptor checks run before any object is touched

pub mod reconcile;
pub mod resources;
pub mod store;
pub mod types;
pub mod validation;

pub use reconcile::{reconcile, sync_vault};
pub use store::{CreateOutcome, KubeObjectStore, ManagedObject, ObjectKind, ObjectStore, StoreError};
pub use types::{BackoffState, Descriptor, Event, Reconciler, ReconcilerError};
