//! # mdsync-sync
//!
//! The pipeline between a local project and a remote metadata service.
//!
//! Open a [`Session`] over a [`mdsync_core::Project`] and a
//! [`MetadataClient`], then call [`Session::compile`], [`Session::create`],
//! [`Session::delete`], or [`Session::refresh`]. Each returns a single
//! result no matter how many protocols ran underneath.

pub mod aggregate;
pub mod client;
pub mod conflict;
pub mod container;
pub mod deploy;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod session;
pub mod status;

pub use aggregate::{ProtocolResult, ResultStatus, UnifiedResult};
pub use client::{
    AsyncRequestStatus, AsyncState, DeployMessage, DeployResult, MemberRequest, MetadataClient,
    RetrieveResult, ServerCopy,
};
pub use conflict::{Conflict, ConflictCheck, ConflictDetector, ConflictSet};
pub use container::{ContainerCompile, ContainerState};
pub use error::{RemoteError, SyncError};
pub use session::{RefreshReport, Session};
pub use status::{FileStatus, ProjectStatus};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
