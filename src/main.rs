use wicket::config::Config;
use wicket::server::listener::Server;
use wicket::site::files::StaticFiles;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    tracing::info!(
        "Serving {} at {}",
        cfg.site.physical_path.display(),
        cfg.server.virtual_path
    );

    let server = Server::bind(cfg, StaticFiles::from_config).await?;
    let shutdown = server.shutdown_handle();
    let mut run = tokio::spawn(server.run());

    tokio::select! {
        res = &mut run => {
            res??;
            return Ok(());
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.shutdown();
        }
    }

    run.await??;
    Ok(())
}
