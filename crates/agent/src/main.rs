// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use terminox_agent::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    match terminox_agent::run::run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
