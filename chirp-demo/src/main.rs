use clap::Parser;

mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    cli::run(cli::DemoOptions::parse())
}
