//! Scene viewer for the syzygy renderer
//!
//! Usage: `syzygy_editor [config.toml|config.ron]`. Without an argument `syzygy.toml` in the
//! working directory is used when present, otherwise the defaults.

mod demo;
mod window;

use std::path::{Path, PathBuf};

use syzygy_engine::core::{ApplicationConfig, Config};
use syzygy_engine::foundation::logging;
use syzygy_engine::Engine;

use demo::DemoScene;
use window::GlfwWindow;

const DEFAULT_CONFIG_FILE: &str = "syzygy.toml";

fn load_config() -> Result<ApplicationConfig, syzygy_engine::core::ConfigError> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    match path {
        Some(path) => ApplicationConfig::load_from_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => ApplicationConfig::load_from_file(DEFAULT_CONFIG_FILE),
        None => Ok(ApplicationConfig::new("Syzygy Editor")),
    }
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init();
            log::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.engine.log_level);

    let mut window = match GlfwWindow::new(&config.window) {
        Ok(window) => window,
        Err(e) => {
            log::error!("Failed to open window: {e}");
            std::process::exit(1);
        }
    };

    let mut app = DemoScene::default();
    if let Err(e) = Engine::run(config, &mut window, &mut app) {
        log::error!("Engine error: {e}");
        std::process::exit(1);
    }
}
