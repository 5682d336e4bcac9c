// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ape_loader_platform_userland::diag;
use ape_loader_runner::{CliArgs, error, logging, run};

fn main() {
    logging::init_from_env();
    let cli_args = match CliArgs::parse_verbatim(std::env::args_os()) {
        Ok(cli_args) => cli_args,
        Err(err) => {
            tracing::debug!(%err, "bad command line");
            diag::usage()
        }
    };
    let Err(err) = run(&cli_args);
    tracing::debug!(err = format_args!("{err:#}"), "giving up");
    error::exit(&err)
}
