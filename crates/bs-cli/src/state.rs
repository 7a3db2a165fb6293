//! Settings record commands. The record file holds the same key-value blob
//! the extension keeps in storage.

use bs_core::popup::{self, PopupUpdate, StatsDisplay, Toggle};
use bs_core::storage::{load_or_default, read_settings, JsonFileStore};
use bs_rules::background::{Background, Handled, MemoryRuleEngine, RecordingTabs};

fn print_record(path: &str, store: &JsonFileStore) {
    let record = load_or_default(store);
    let display = StatsDisplay::from(&record.stats);

    println!("Settings: {}", path);
    println!("  Block images:   {}", record.settings.block_images);
    println!("  Block videos:   {}", record.settings.block_videos);
    println!("  Block iframes:  {}", record.settings.block_iframes);
    println!("  Saved:          {}", display.bandwidth_saved);
    println!("  Blocked:        {}", display.elements_blocked);
}

pub fn cmd_show(path: &str) -> Result<(), String> {
    let store = JsonFileStore::new(path);
    if read_settings(&store)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?
        .is_none()
    {
        println!("No record in '{}', showing install defaults", path);
    }
    print_record(path, &store);
    Ok(())
}

fn report(update: &PopupUpdate) -> Result<(), String> {
    let message = serde_json::to_string(&update.message)
        .map_err(|e| format!("Failed to serialize message: {}", e))?;
    println!("Broadcast: {}", message);
    Ok(())
}

pub fn cmd_toggle(path: &str, toggle: Toggle, enabled: bool) -> Result<(), String> {
    let mut store = JsonFileStore::new(path);
    let update = popup::apply_toggle(&mut store, toggle, enabled)
        .map_err(|e| format!("Failed to update '{}': {}", path, e))?;
    print_record(path, &store);
    report(&update)
}

pub fn cmd_reset(path: &str) -> Result<(), String> {
    let mut store = JsonFileStore::new(path);
    let update = popup::reset_stats(&mut store).map_err(|e| format!("Failed to update '{}': {}", path, e))?;
    print_record(path, &store);
    report(&update)
}

pub fn cmd_message(path: &str, message: &str) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(message).map_err(|e| format!("Invalid message JSON: {}", e))?;

    let mut background = Background::new(JsonFileStore::new(path), MemoryRuleEngine::new(), RecordingTabs::default());
    background
        .on_installed()
        .map_err(|e| format!("Failed to initialize '{}': {}", path, e))?;

    match background.handle_value(&value).map_err(|e| e.to_string())? {
        Handled::RulesReplaced { removed, added } => {
            println!("Dynamic rules replaced: removed {}, added {}", removed, added);
        }
        Handled::StatsRecorded(stats) => {
            let display = StatsDisplay::from(&stats);
            println!(
                "Stats recorded: {} saved, {} blocked",
                display.bandwidth_saved, display.elements_blocked
            );
        }
        Handled::Ignored => println!("Message ignored"),
    }
    Ok(())
}
