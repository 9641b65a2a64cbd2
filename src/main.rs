/// Progressive path tracer executable
/// Usage: raytrace [config.toml]
use std::path::PathBuf;

use raytrace_engine::{Engine, EngineConfig, EngineError};

fn start(config_path: Option<PathBuf>) -> Result<(), EngineError> {
    let config = EngineConfig::discover(config_path.as_deref())?;
    log::info!(
        "Starting {} at {}x{}",
        config.window_title,
        config.window_width,
        config.window_height
    );
    Engine::new(config)?.run()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);

    if let Err(err) = start(config_path) {
        let code = err.exit_code();
        let report = anyhow::Error::new(err).context("renderer stopped");
        log::error!("{:#}", report);
        std::process::exit(code);
    }

    log::info!("Renderer exited cleanly");
    Ok(())
}
