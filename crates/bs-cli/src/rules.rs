use std::fs;

use bs_core::storage::{read_settings, JsonFileStore};
use bs_core::Settings;
use bs_rules::{generate_rules, RuleSetUpdate};

pub fn cmd_rules(
    settings: Settings,
    state: Option<&str>,
    replace: Option<Vec<u32>>,
    output: Option<&str>,
) -> Result<(), String> {
    let settings = match state {
        Some(path) => {
            let store = JsonFileStore::new(path);
            read_settings(&store)
                .map_err(|e| format!("Failed to read '{}': {}", path, e))?
                .map(|record| record.settings)
                .unwrap_or_else(Settings::install_defaults)
        }
        None => settings,
    };

    let json = match replace {
        Some(current) => serde_json::to_string_pretty(&RuleSetUpdate::replace_all(current, &settings)),
        None => serde_json::to_string_pretty(&generate_rules(&settings)),
    }
    .map_err(|e| format!("Failed to serialize rules: {}", e))?;

    match output {
        Some(path) => {
            fs::write(path, json + "\n").map_err(|e| format!("Failed to write '{}': {}", path, e))?;
            log::info!("wrote {} rule(s) to {}", generate_rules(&settings).len(), path);
        }
        None => println!("{}", json),
    }

    Ok(())
}
