use dear_threaded_ash::{RunnerConfig, logging, run};
use tracing::{error, info};

fn main() {
    logging::init_tracing();

    let config = match RunnerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!(
        windows = config.window_count,
        present = ?config.present,
        validation = config.validation,
        "Starting threaded Dear ImGui windows"
    );

    if let Err(e) = run(config) {
        error!("{e}");
        std::process::exit(1);
    }
}
