use anyhow::Result;
use log::*;

use engine::{config, Engine, RendererConfig};

fn main() -> Result<()> {
    pretty_env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::CONFIG_FILE.to_string());

    let config = RendererConfig::load(&path)?;
    info!("Starting {} ({}x{}).", config.window.title, config.window.width, config.window.height);

    let engine = match Engine::new(config) {
        Err(err) => {
            error!("Failed to start: {:#}", err);
            return Err(err);
        }
        Ok(e) => e,
    };

    engine.run()
}
