// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use ricart::{runtime, Config};
use std::env;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ricart [nodes]\n\n  nodes  number of nodes to simulate, a positive integer (default 6)";

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match Config::load().and_then(|c| c.with_args(&args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    info!("starting {} nodes", config.nodes);
    if let Err(e) = runtime::launch(&config) {
        error!("{}", e);
        process::exit(1);
    }
}
