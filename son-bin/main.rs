use snet::son::{self, SonConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = son::run(SonConfig::default()).await {
        tracing::error!(target: "snet/son", "overlay process failed: {e}");
        std::process::exit(1);
    }
}
