// Logging setup
//
// The library itself only uses the `log` facade. Hosts that have no logger of
// their own (the demo binary, C callers through `gb_init_logging`) install
// env_logger here.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Once;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Installs env_logger once. `RUST_LOG` wins over `config.level`.
///
/// Returns true only for the call that installed the logger; later calls, or
/// a host that already installed another logger, return false.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.parse_filters(&config.level);
        }

        if config.log_to_file {
            match OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&config.log_file)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "=== gpu-bridge log ===");
                    let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                    let _ = writeln!(file);
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => eprintln!("gpu-bridge: cannot open {}: {}", config.log_file, e),
            }
        }

        installed = builder.try_init().is_ok();
        if installed {
            log::debug!("logging initialized");
        }
    });
    installed
}
