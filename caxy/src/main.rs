use caxy_config::CaxyConfig;
use caxy_core::Master;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = CaxyConfig::from_env_or_default();
    utils::init_tracing(cfg.debug);

    let master = Master::bind(cfg).await?;

    let handle = master.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    master.run().await?;

    Ok(())
}
