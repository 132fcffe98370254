//! Placement and discovery for live agent workers.
//!
//! Two interchangeable `Registry` backends (`LocalRegistry`,
//! `ClusteredRegistry`) sit behind one trait so `sg-runtime` never needs to
//! know which is in play; `Placement` adds retry-with-backoff registration
//! on top of either.

pub mod clustered;
pub mod config;
pub mod key;
pub mod local;
pub mod placement;
pub mod registry;

pub use clustered::{ClusteredRegistry, TransferObserver};
pub use config::{DistributionConfig, RuntimeConfig};
pub use key::RegistryKey;
pub use local::LocalRegistry;
pub use placement::Placement;
pub use registry::{Handle, RegisterOutcome, Registry};
