use app::streamer::{self, CliArgs, StreamConfig};
use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = StreamConfig::from_args(CliArgs::parse())?;
    streamer::run(config)
}
