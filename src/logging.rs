use crate::config::Config;
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

pub const LOG_ENV: &str = "MARKSIFT_LOG";

/// Where the log goes when it can't share the terminal with the UI.
pub fn log_path(config: &Config) -> Option<PathBuf> {
    config
        .log_file
        .clone()
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("marksift").join("marksift.log")))
}

/// Installs the global logger. The filter comes from `MARKSIFT_LOG` and
/// defaults to `warn`. With `to_file` set, records are appended to
/// [`log_path`] instead of stderr.
pub fn init(config: &Config, to_file: bool) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .parse_env(Env::new().filter(LOG_ENV))
        .format_timestamp_millis();

    if to_file {
        let path = log_path(config).context("Could not determine a log file location")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file))).write_style(env_logger::WriteStyle::Never);
    }

    builder.try_init().context("Failed to install logger")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::log_path;
    use crate::config::Config;
    use std::path::PathBuf;

    #[test]
    fn configured_log_file_wins() {
        let config = Config {
            log_file: Some(PathBuf::from("/tmp/marksift-test.log")),
            ..Config::default()
        };
        assert_eq!(log_path(&config), Some(PathBuf::from("/tmp/marksift-test.log")));
    }

    #[test]
    fn default_log_file_lives_in_cache_dir() {
        let config = Config::default();
        if let Some(cache) = dirs::cache_dir() {
            assert_eq!(log_path(&config), Some(cache.join("marksift").join("marksift.log")));
        }
    }
}
