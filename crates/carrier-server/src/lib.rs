//! # carrier-server
//!
//! Runs many log streams at once: routes records to per-stream bufferers,
//! flushes and rotates them on timers, and carries buffered data across
//! restarts through a checkpoint file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use carrier_buffer::StreamId;
//! use carrier_config::Config;
//! use carrier_server::Server;
//!
//! # async fn run() -> carrier_server::Result<()> {
//! let server = Server::start(Config::from_file("carrier.json")?)?;
//! let handle = server.handle();
//! handle.write(StreamId::new("nginx", "access", "")?, b"GET / 200\n".to_vec()).await?;
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod error;
pub mod factory;
pub mod flusher;
pub mod ingest;
pub mod registry;
pub mod rotation;
pub mod server;

pub use checkpoint::{Checkpoint, StreamEntry};
pub use error::{Result, ServerError};
pub use factory::BuffererFactory;
pub use ingest::{Ingest, Record};
pub use registry::{Registry, SharedBufferer};
pub use rotation::{Rotation, RotationSettings};
pub use server::{Server, ServerHandle, drain, restore};
