use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    normalize(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Trailing slashes on published base URLs would double up in generated ids.
fn normalize(config: &mut Config) {
    truncate_trailing_slash(&mut config.publish.image_base_url);
    truncate_trailing_slash(&mut config.publish.manifest_base_url);
    truncate_trailing_slash(&mut config.describe.base_url);
}

fn truncate_trailing_slash(url: &mut String) {
    while url.ends_with('/') {
        url.pop();
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    for (name, value) in [
        ("inbound_directory", &config.inbound_directory),
        ("working_directory", &config.working_directory),
        ("derivative_directory", &config.derivative_directory),
        ("storage.region", &config.storage.region),
        ("storage.bucket", &config.storage.bucket),
        ("describe.base_url", &config.describe.base_url),
        ("publish.image_base_url", &config.publish.image_base_url),
        ("publish.manifest_base_url", &config.publish.manifest_base_url),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{} must not be empty", name),
            });
        }
    }

    if config.encode.workers == 0 {
        return Err(ConfigError::Validation {
            message: "encode.workers must be at least 1".to_string(),
        });
    }

    if config.max_stage_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max_stage_attempts must be at least 1".to_string(),
        });
    }

    if config.upload.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "upload.max_attempts must be at least 1".to_string(),
        });
    }

    if config.upload.base_delay_ms > config.upload.max_delay_ms {
        return Err(ConfigError::Validation {
            message: "upload.base_delay_ms must not exceed upload.max_delay_ms".to_string(),
        });
    }

    Ok(())
}
