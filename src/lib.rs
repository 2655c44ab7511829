// SPDX-License-Identifier: Apache-2.0

//! loadctl: the control plane of a bulk loader for TiDB-compatible clusters
//!
//! Resolves the loader's TOML configuration against the live cluster and
//! hands out a retrying SQL executor for the statements the import issues.

pub mod bootstrap;
pub mod cli;
pub mod observability;

pub use bootstrap::{resolve_config, BootstrapError, BootstrapResult, ControlPlane};
pub use loadctl_common as common;
pub use loadctl_config as config;
