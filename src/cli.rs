// SPDX-License-Identifier: Apache-2.0

//! Command-line arguments of the `loadctl` binary.

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_CONFIG_PATH: &str = "tidb-lightning.toml";

#[derive(Parser, Debug)]
#[command(
    name = "loadctl",
    version,
    about = "Resolve a bulk-load configuration against a live cluster"
)]
pub struct Cli {
    /// Configuration file path.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Also connect to the cluster and check it answers queries.
    #[arg(long)]
    pub check: bool,
}
