use apps_stats_config::{
    Args,
    Config,
};
use clap::Parser;
use color_eyre::Result;
use raintank_apps_stats::{
    init_errors,
    init_logging,
    run,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_errors()?;
    let config = Config::new(Args::parse())?;
    init_logging(config.verbose, config.log_file.as_deref())?;
    run(config).await
}
