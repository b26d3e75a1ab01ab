use std::process;
use std::sync::Arc;

use flood_relay::config::Config;
use flood_relay::logging::{self, DataSource, LogLevel};
use flood_relay::relay::RelayStats;
use flood_relay::supervisor;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("   ✗ {}", e);
            process::exit(2);
        }
    };

    let level = config.logging.min_level().unwrap_or(LogLevel::Info);
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.console_timestamps);
    logging::info(DataSource::System, None, "Backend starting...");

    let stats = Arc::new(RelayStats::default());
    let handler_stats = Arc::clone(&stats);
    let handler = ctrlc::set_handler(move || {
        logging::info(DataSource::System, None, "Backend stopped by user");
        handler_stats.log_summary();
        process::exit(0);
    });
    if let Err(e) = handler {
        logging::warn(DataSource::System, None, &format!("Could not install interrupt handler: {}", e));
    }

    if let Err(e) = supervisor::run(&config, stats) {
        logging::error(DataSource::System, None, &format!("Startup failed: {}", e));
        process::exit(1);
    }
}
