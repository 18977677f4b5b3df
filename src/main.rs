use std::process::ExitCode;

use clap::Parser;

use spa_client::cli::Cli;
use spa_client::client;
use spa_client::logging::{self, LogLevel};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let cli = Cli::parse_from(&argv);
    logging::init(LogLevel::from_verbosity(cli.verbose));

    client::run(cli, argv).await.into()
}
