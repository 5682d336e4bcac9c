// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Opt-in diagnostics for the loader itself.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter, e.g. `APE_LOADER_LOG=debug`.
pub const LOG_ENV: &str = "APE_LOADER_LOG";

/// Sends loader events to standard error when [`LOG_ENV`] is set. Otherwise the guest's standard
/// error stays untouched.
pub fn init_from_env() {
    let Some(directives) = std::env::var_os(LOG_ENV) else {
        return;
    };
    let filter = directives
        .to_str()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
