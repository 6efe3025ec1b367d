//! Start-once, share-everywhere container fixtures for test suites.
//!
//! A [`SharedFixture`] launches an expensive external dependency the first time
//! any test asks for it, hands every later caller the same [`ResourceHandle`],
//! and is stopped once when its [`RootScope`] closes at the end of the run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shared_fixture::{DockerCli, EnvPublisher, FixtureConfig, RootScope, SharedFixture};
//!
//! # fn main() -> shared_fixture::error::Result<()> {
//! let scope = Arc::new(RootScope::new());
//! let rabbit = SharedFixture::builder(DockerCli::new())
//!     .config(FixtureConfig::from_env()?)
//!     .publisher(EnvPublisher)
//!     .scope(&scope)
//!     .build()?;
//!
//! let handle = rabbit.ensure_started()?;
//! println!("broker at {:?}", handle.endpoint(5672));
//!
//! scope.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod docker;
pub mod error;
pub mod handle;
pub mod provisioner;
pub mod publish;
pub mod scope;

pub use config::FixtureConfig;
pub use coordinator::*;
pub use docker::DockerCli;
pub use handle::*;
pub use provisioner::{LaunchRequest, Provisioner};
pub use publish::{EnvPublisher, FilePublisher, NoopPublisher, PropertyStore, Publisher, Publishers};
pub use scope::{CloseableResource, RootScope};
