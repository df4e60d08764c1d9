//! fluxa402 facilitator HTTP server binary.
//!
//! Entry point for the facilitator role of the x402 v2 protocol. The server
//! hosts the `fluxacredit` and `odp-deferred` scheme implementations and
//! exposes `/verify`, `/settle`, `/supported`, and `/benchmark/metrics`.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration (config.json)
//! cargo run --package fluxa402-facilitator
//!
//! # Run with custom configuration
//! cargo run --package fluxa402-facilitator -- --config /path/to/config.json
//! ```
//!
//! Configuration format and environment variables are documented in the
//! [`config`](crate::config) module.

mod config;
mod handlers;
mod metrics;
mod run;
mod schemes;
mod util;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
