// src/main.rs

use std::process::ExitCode;

use clap::Parser;

use dagrun::cli::CliArgs;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    dagrun::logging::init_logging(args.log_level);

    match dagrun::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "dagrun exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}
