use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use micro_file_server::config::Config;
use micro_file_server::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(config.log_level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let session_config = config.session_config().context("invalid configuration")?;
    info!(
        root = %session_config.root.display(),
        spool_dir = %session_config.upload.spool_dir.display(),
        upload_mode = ?session_config.upload_mode,
        "serving files"
    );

    Server::builder()
        .address(config.address)
        .config(session_config)
        .build()?
        .start()
        .await
        .with_context(|| format!("can't serve on {}", config.address))
}
