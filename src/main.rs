//! jtail entry point: parses CLI, sets up logging and starts the async application runtime.
//! The main function is intentionally thin and delegates to the runtime in `app`.

mod app;
mod cli;
mod error;
mod filter;
mod logging;
mod server;
mod sink;
mod source;
mod state;
mod streamer;
mod ui;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = cli::parse()?;
    let _guard = logging::init_tracing(&config.log_dir, config.plain)?;
    app::run(config).await
}
