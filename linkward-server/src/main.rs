use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};

use linkward_server::{build_app, ServerOptions};

fn init_logging() {
    // `warn` for dependencies, `info` for our own crates; RUST_LOG wins
    let env = Env::default().filter_or("RUST_LOG", "warn,linkward=info,linkward_lib=info,linkward_server=info");
    Builder::from_env(env)
        .format_module_path(false)
        .format_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let options = ServerOptions::parse();
    let config = options.load_config()?;

    let app = build_app(&config).await?;
    let bind_address = config.effective_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("could not bind {bind_address}"))?;
    log::info!(
        "linkward {} listening on {bind_address}",
        linkward_lib::binary_version()
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server terminated")?;

    Ok(())
}
