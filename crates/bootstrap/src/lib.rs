//! Edgeboot bootstrap - acquire, configure and launch the edge binaries,
//! then publish the subscription for the resulting tunnel.

pub mod artifacts;
pub mod config;
pub mod listener;
pub mod orchestrator;
pub mod publish;
pub mod subscription;
pub mod supervisor;
pub mod tunnel;

pub use config::{BootstrapConfig, WorkLayout};
pub use orchestrator::{BootstrapReport, Orchestrator};
pub use publish::{PublishedSubscription, SubscriptionSlot};
pub use supervisor::{RestartPolicy, Supervisor};
