// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ephemfs core: node identity, filesystem adapter and staleness reaper
//!
//! The crate maps the path-addressed [`store::Backstore`] onto the
//! integer-addressed world of the kernel protocol. [`nodes::NodeTable`]
//! keeps paths and identifiers in step, [`node`] translates protocol
//! operations into store calls, and [`reaper`] removes files nobody has
//! touched for a while.

pub mod attr;
pub mod config;
pub mod error;
pub mod node;
pub mod nodes;
pub mod path;
pub mod reaper;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use attr::{Attributes, FsStats, NodeKind};
pub use config::{CachePolicy, ConfigError, FsConfig, ModePolicy, ReaperPolicy};
pub use error::{FsError, FsResult};
pub use node::{Created, DirNode, FileNode, FsContext, Node, OpenHandle};
pub use nodes::{NodeId, NodeTable};
pub use reaper::{sweep, Reaper, SweepReport};
pub use store::{Backstore, DirEntry, MemBackstore, Metadata, Stream};
