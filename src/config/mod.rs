//! The `config` module loads settings for the server and the client.
//!
//! Sources, later ones winning: built-in defaults, `config/default.toml`
//! (optional), then `TEMPLECAST_*` environment variables with `__` as the
//! nesting separator, e.g. `TEMPLECAST_SERVER__PORT=9000`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;
use crate::utils::error::Result;

pub use settings::{BroadcastSettings, ClientSettings, ServerSettings, Settings};

pub const ENV_PREFIX: &str = "TEMPLECAST";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Same as `load_config`, reading the optional file at `path` (extension
/// may be omitted).
pub fn load_config_from(path: &str) -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge_onto(Settings::default());

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.broadcast.update_interval_ms == 0 {
        return Err(ConfigError::Message("broadcast.update_interval_ms must be greater than zero".into()).into());
    }
    Ok(())
}
