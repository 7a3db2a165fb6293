use std::fs;

use bs_core::dom::NodeSpec;
use bs_core::{format_bytes, ArenaHost, Document, Driver, MonitorEvent, Settings, Stats};

pub struct ScanOptions {
    pub input: String,
    pub host: Option<String>,
    pub settings: Settings,
    pub inject: Option<String>,
    pub dump: bool,
}

fn read_specs(path: &str) -> Result<Vec<NodeSpec>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid page tree '{}': {}", path, e))
}

/// Initial scan, then optionally one injected batch followed by the
/// coalesced pass it schedules.
pub fn run_scan(
    page: &[NodeSpec],
    injected: &[NodeSpec],
    host: Option<&str>,
    settings: Settings,
) -> Driver<Document, ArenaHost> {
    let mut driver = Driver::for_document(Document::from_body_specs(page), ArenaHost::new(), host);
    driver.dispatch(MonitorEvent::Configure(settings));
    driver.dispatch(MonitorEvent::Start);

    if !injected.is_empty() {
        let tree = driver.tree_mut();
        let body = tree.attach_body();
        for spec in injected {
            let node = tree.build(spec);
            tree.append_child(body, node);
        }
        driver.deliver_records();
        driver.fire_timers();
    }

    driver
}

pub fn cmd_scan(opts: ScanOptions) -> Result<(), String> {
    let page = read_specs(&opts.input)?;
    let injected = match &opts.inject {
        Some(path) => read_specs(path)?,
        None => Vec::new(),
    };

    let driver = run_scan(&page, &injected, opts.host.as_deref(), opts.settings);
    let monitor = driver.monitor();
    let session: Stats = monitor.session_stats();

    println!("Scanned '{}'", opts.input);
    println!("  Selectors:   {}", monitor.selectors().to_css());
    println!("  Passes:      {}", monitor.passes());
    println!("  Blocked:     {}", session.elements_blocked);
    println!("  Saved:       {}", format_bytes(session.bandwidth_saved));
    println!("  Messages:    {}", driver.host().sent().len());

    if opts.dump {
        let tree = driver.tree();
        if let Some(body) = tree.body_id() {
            let json = serde_json::to_string_pretty(&tree.to_spec(body))
                .map_err(|e| format!("Failed to serialize tree: {}", e))?;
            println!("{}", json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(json: &str) -> Vec<NodeSpec> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn scan_counts_initial_and_injected_media() {
        let page = specs(r#"[{"tag":"video"},{"tag":"p","children":["text"]}]"#);
        let injected = specs(
            r#"[{"tag":"div","children":[{"tag":"iframe","attributes":{"src":"https://player.vimeo.com/video/1"}}]}]"#,
        );
        let driver = run_scan(&page, &injected, None, Settings::install_defaults());

        let stats = driver.monitor().session_stats();
        assert_eq!(stats.elements_blocked, 2);
        assert_eq!(stats.bandwidth_saved, 6 * 1024 * 1024);
        assert_eq!(driver.host().sent().len(), 2);
        assert!(driver.tree().find_by_tag("video").is_empty());
        assert!(driver.tree().find_by_tag("iframe").is_empty());
    }

    #[test]
    fn scan_on_rich_site_keeps_player_hidden() {
        let page = specs(r#"[{"tag":"div","attributes":{"id":"player-container"}}]"#);
        let settings = Settings {
            block_videos: true,
            ..Settings::disabled()
        };
        let driver = run_scan(&page, &[], Some("www.youtube.com"), settings);

        let tree = driver.tree();
        let body = tree.body_id().unwrap();
        assert_eq!(tree.children_of(body).len(), 2);
        assert_eq!(driver.monitor().session_stats().bandwidth_saved, 10 * 1024 * 1024);
    }
}
