use clap::Parser;
use fileserver::{config::Config, FileServer};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    config.validate()?;

    FileServer::new(&config.root)
        .with_tools(config.toolbox())
        .listen(&config.host, config.port)
        .await
}
