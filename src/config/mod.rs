//! Config layer (C8): a small YAML-like dialect, parsed into [`types::Config`]
//! via the derive-generated [`parser::FromYaml`] impls, then checked for
//! host/port/name collisions before a [`types::ServerConfig`] is allowed to
//! bind.

pub mod display;
pub mod parser;
pub mod types;
pub mod validate;

pub use parser::{ConfigParser, ParseResult, FromYaml, ConfigError};
pub use types::{Config, ServerConfig, RouteConfig};
pub use display::display_config;
pub use validate::validate_configs;
