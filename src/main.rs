use std::process::exit;

use clap::Parser;

use nsf_monitor_lib::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = nsf_monitor_lib::run(Cli::parse()).await {
        eprintln!("nsf-monitor error: {err:?}");
        exit(1);
    }
}
