use crate::{ConfigError, LaunchOptions, Result};
use std::collections::HashSet;

pub fn validate_launch_options(options: &LaunchOptions) -> Result<()> {
    if !options.enable_extensions.is_empty() && !options.disable_extensions {
        return Err(ConfigError::ValidationError(
            "enableExtensions requires disableExtensions".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for id in &options.enable_extensions {
        if id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "empty extension id in enableExtensions".to_string(),
            ));
        }
        if !seen.insert(id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate extension id: {}",
                id
            )));
        }
    }

    for arg in &options.extra_args {
        if arg.contains('\n') {
            return Err(ConfigError::ValidationError(format!(
                "extra arg contains newline: {:?}",
                arg
            )));
        }
    }

    Ok(())
}
