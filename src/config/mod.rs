//! Configuration for TimeJet.
//!
//! Settings live in a single `config.kdl`:
//!
//! - Explicit: `--config <file>` or `TJ_CONFIG`
//! - Default: `~/.config/timejet/config.kdl`
//!
//! Contains the data root, HTTP bind address, mail sender, document open
//! retry policy and log filter. See [`schema`] for the node names.
//!
//! ## Precedence
//!
//! CLI flag > environment > config file > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_ENV, ConfigOverrides, DATA_DIR_ENV, EnvValues, LOG_ENV, Resolved, ResolvedConfig,
    ValueSource, resolve_config, resolve_from,
};
pub use schema::TimejetConfig;
