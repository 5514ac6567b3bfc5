//! Log output for gekko
//!
//! Everything goes through `tracing`. The CPU crates log under three
//! targets, `ppc`, `jit` and `timing`, each of which can be given its own
//! level in the `[debug]` section or through `RUST_LOG`.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, DebugConfig, LogLevel};

fn level_of(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

/// `target=level` directive, with `off` for a silenced target
fn target_directive(target: &str, level: LogLevel) -> Option<Directive> {
    let level = level_of(level).map_or("off", |l| l.as_str());
    format!("{target}={}", level.to_ascii_lowercase()).parse().ok()
}

/// Per-target directives from the `[debug]` section
fn target_directives(debug: &DebugConfig) -> Vec<Directive> {
    [
        ("ppc", debug.ppc_log_level),
        ("jit", debug.jit_log_level),
        ("timing", debug.timing_log_level),
    ]
    .into_iter()
    .filter_map(|(target, level)| target_directive(target, level?))
    .collect()
}

/// Base level, then the configured target levels. `RUST_LOG` entries are
/// applied first, so config wins for targets named in both.
fn build_filter(debug: &DebugConfig, level: Level) -> EnvFilter {
    target_directives(debug)
        .into_iter()
        .fold(EnvFilter::from_default_env().add_directive(level.into()), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Install the global subscriber for `config.debug`. Off installs nothing.
pub fn init(config: &Config) {
    let Some(level) = level_of(config.debug.log_level) else {
        return;
    };

    let console = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);
    let registry = tracing_subscriber::registry()
        .with(build_filter(&config.debug, level))
        .with(console);

    if !config.debug.log_to_file {
        let _ = registry.try_init();
        return;
    }

    match std::fs::File::create(&config.debug.log_path) {
        Ok(file) => {
            let _ = registry
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .try_init();
        }
        Err(e) => {
            let _ = registry.try_init();
            tracing::warn!("Could not open log file {}: {}", config.debug.log_path.display(), e);
        }
    }
}

/// Console subscriber at INFO with the default target levels, for tests
/// and tools that skip the config file
pub fn init_default() {
    let _ = tracing_subscriber::registry()
        .with(build_filter(&DebugConfig::default(), Level::INFO))
        .with(fmt::layer())
        .try_init();
}

/// Trace under the `ppc` target
#[macro_export]
macro_rules! ppc_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "ppc", $($arg)*)
    };
}

/// Debug under the `ppc` target
#[macro_export]
macro_rules! ppc_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "ppc", $($arg)*)
    };
}

/// Trace under the `jit` target (dispatch cache and Baseline tier)
#[macro_export]
macro_rules! jit_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "jit", $($arg)*)
    };
}

/// Debug under the `jit` target
#[macro_export]
macro_rules! jit_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "jit", $($arg)*)
    };
}

/// Trace under the `timing` target
#[macro_export]
macro_rules! timing_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "timing", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_of(LogLevel::Off), None);
        assert_eq!(level_of(LogLevel::Warn), Some(Level::WARN));
        assert_eq!(level_of(LogLevel::Trace), Some(Level::TRACE));
    }

    #[test]
    fn test_default_target_directives() {
        let directives: Vec<String> = target_directives(&DebugConfig::default())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(directives, ["timing=warn"]);
    }

    #[test]
    fn test_silenced_target() {
        let debug = DebugConfig {
            jit_log_level: Some(LogLevel::Off),
            ppc_log_level: Some(LogLevel::Trace),
            timing_log_level: None,
            ..DebugConfig::default()
        };
        let directives: Vec<String> = target_directives(&debug).iter().map(ToString::to_string).collect();
        assert_eq!(directives, ["ppc=trace", "jit=off"]);
    }
}
