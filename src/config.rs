//! Run-time configuration (ambient stack, SPEC_FULL.md 1A): knobs that
//! govern how a run is driven rather than what the model describes —
//! NaN-checking, wall-clock timeouts, MCMC worker count, output
//! location. None of this belongs in the model-description language
//! itself; it layers the same way the reference compiler's own
//! `config.rs` does: `config.toml` as the base, `config.local.toml` as
//! a git-ignored local override, then `MOBIUS_`-prefixed environment
//! variables on top.
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [run]
//! check_for_nan = true
//! wall_clock_timeout_secs = 300
//!
//! [mcmc]
//! n_workers = 4
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! MOBIUS_RUN__CHECK_FOR_NAN=false
//! MOBIUS_MCMC__N_WORKERS=8
//! ```

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration, layered from `config.toml` →
/// `config.local.toml` → `MOBIUS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub mcmc: McmcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Knobs for one model run, read by the binary before calling
/// [`crate::execution::run_model`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Whether to scan each committed step's row for non-finite values.
    #[serde(default = "default_check_for_nan")]
    pub check_for_nan: bool,

    /// Wall-clock budget for an entire run, in seconds. `0` means no
    /// timeout.
    #[serde(default)]
    pub wall_clock_timeout_secs: u64,

    /// Directory results and diagnostics are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Knobs for the MCMC / local-search optimizer harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McmcConfig {
    /// Worker threads for the walker ensemble. `0` means use all
    /// available CPU cores.
    #[serde(default)]
    pub n_workers: usize,

    /// Per-evaluation timeout, in seconds. `0` means no timeout.
    #[serde(default)]
    pub eval_timeout_secs: u64,
}

/// Logging configuration, consumed when installing the
/// `tracing-subscriber` at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_check_for_nan() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { check_for_nan: default_check_for_nan(), wall_clock_timeout_secs: 0, output_dir: default_output_dir() }
    }
}

impl Default for McmcConfig {
    fn default() -> Self {
        McmcConfig { n_workers: 0, eval_timeout_secs: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}

impl Config {
    /// Loads configuration from the default locations in the working
    /// directory. Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. `MOBIUS_*` environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::file("config.toml")).merge(Toml::file("config.local.toml")).merge(Env::prefixed("MOBIUS_").split("__")).extract()
    }

    /// Loads configuration from a specific file path, still allowing
    /// environment variables to override it.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::file(path)).merge(Env::prefixed("MOBIUS_").split("__")).extract()
    }

    #[must_use]
    pub fn default() -> Self {
        Config { run: RunConfig::default(), mcmc: McmcConfig::default(), logging: LoggingConfig::default() }
    }

    /// The resolved worker count for the MCMC harness: `n_workers` if
    /// nonzero, otherwise the number of available CPU cores.
    #[must_use]
    pub fn resolved_mcmc_workers(&self) -> usize {
        if self.mcmc.n_workers == 0 {
            num_cpus::get()
        } else {
            self.mcmc.n_workers
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.run.check_for_nan);
        assert_eq!(config.run.wall_clock_timeout_secs, 0);
        assert_eq!(config.mcmc.n_workers, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[run]"));
        assert!(toml_str.contains("[mcmc]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn env_var_overrides_toml_base() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [run]
                check_for_nan = true
                wall_clock_timeout_secs = 60
                "#,
            )?;
            jail.set_env("MOBIUS_RUN__CHECK_FOR_NAN", "false");

            let config: Config = Figment::new().merge(Toml::file("config.toml")).merge(Env::prefixed("MOBIUS_").split("__")).extract()?;

            assert!(!config.run.check_for_nan);
            assert_eq!(config.run.wall_clock_timeout_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn local_overrides_base_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[mcmc]\nn_workers = 2\n")?;
            jail.create_file("config.local.toml", "[mcmc]\nn_workers = 8\n")?;

            let config: Config = Figment::new().merge(Toml::file("config.toml")).merge(Toml::file("config.local.toml")).extract()?;

            assert_eq!(config.mcmc.n_workers, 8);
            Ok(())
        });
    }

    #[test]
    fn resolved_mcmc_workers_falls_back_to_cpu_count() {
        let config = Config::default();
        assert_eq!(config.resolved_mcmc_workers(), num_cpus::get());
    }
}
