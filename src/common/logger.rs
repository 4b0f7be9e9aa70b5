use std::{fs, path::Path};

use tracing_subscriber::{
  EnvFilter,
  fmt::{self, time::LocalTime},
  prelude::*,
};

use crate::configs::Config;

/// Initialize the global tracing subscriber from the `[logging]` config
/// section. `RUST_LOG` overrides the configured level and filters.
pub fn init(config: &Config) {
  let log_level = config
    .logging
    .as_ref()
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info");

  let filters = config
    .logging
    .as_ref()
    .and_then(|l| l.filters.as_deref())
    .unwrap_or("");

  let filter_str = if filters.is_empty() {
    log_level.to_string()
  } else {
    format!("{},{}", log_level, filters)
  };

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

  let stdout_layer = fmt::layer()
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_file(false);

  let file_layer = config
    .logging
    .as_ref()
    .and_then(|l| l.file.as_deref())
    .and_then(|path| {
      if let Some(parent) = Path::new(path).parent() {
        if let Err(e) = fs::create_dir_all(parent) {
          eprintln!("Failed to create log directory: {}", e);
          return None;
        }
      }
      match fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(
          fmt::layer()
            .with_writer(file)
            .with_timer(LocalTime::rfc_3339())
            .with_target(true)
            .with_file(false)
            .with_ansi(false),
        ),
        Err(e) => {
          eprintln!("Failed to open log file {}: {}", path, e);
          None
        }
      }
    });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stdout_layer)
    .with(file_layer)
    .init();
}
