use anyhow::{Context, Result};

use camrtsp::camera::TestPatternCamera;
use camrtsp::{Config, Coordinator};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    // No real capture hardware here; a deterministic test pattern stands
    // in for the camera driver.
    let camera = Box::new(TestPatternCamera::new(640, 480));

    let coordinator = Coordinator::new(config, camera)
        .await
        .context("failed to start RTSP server")?;

    coordinator.log_startup_banner();
    coordinator.run().await
}
