use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;

pub struct E2eOptions {
    pub chromedriver_url: String,
    pub extension_path: String,
    pub video_page: String,
    pub headless: bool,
}

pub fn run_e2e(opts: E2eOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_e2e_async(opts))
}

async fn run_e2e_async(opts: E2eOptions) -> Result<(), String> {
    let extension_path = canonicalize_path(&opts.extension_path)?;

    let mut caps = ChromeCapabilities::new();
    let mut args = vec![
        format!("--disable-extensions-except={}", extension_path.display()),
        format!("--load-extension={}", extension_path.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-default-apps".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    for arg in &args {
        caps.add_arg(arg)
            .map_err(|e| format!("Failed to set chrome arg: {}", e))?;
    }

    let driver = WebDriver::new(&opts.chromedriver_url, caps)
        .await
        .map_err(|e| format!("Failed to connect to chromedriver: {}", e))?;

    let cdp = ChromeDevTools::new(driver.handle.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let extension_id = find_extension_id(&cdp)
        .await
        .ok_or_else(|| "Failed to locate extension service worker".to_string())?;

    let mut errors = Vec::new();

    if let Err(e) = check_popup(&driver, &extension_id).await {
        errors.push(format!("Popup page check failed: {}", e));
    }

    if let Err(e) = check_video_removed(&driver, &opts.video_page).await {
        errors.push(format!("Content script check failed: {}", e));
    }

    driver.quit().await.ok();

    if errors.is_empty() {
        println!("✓ E2E checks passed");
        Ok(())
    } else {
        Err(format!("E2E failed:\n- {}", errors.join("\n- ")))
    }
}

async fn find_extension_id(cdp: &ChromeDevTools) -> Option<String> {
    let targets = cdp.execute_cdp("Target.getTargets").await.ok()?;
    let infos = targets.get("targetInfos")?.as_array()?;
    for info in infos {
        let target_type = info.get("type").and_then(Value::as_str).unwrap_or("");
        let url = info.get("url").and_then(Value::as_str).unwrap_or("");
        if matches!(target_type, "service_worker" | "background_page") && url.starts_with("chrome-extension://") {
            let id = url.trim_start_matches("chrome-extension://");
            if let Some(id) = id.split('/').next() {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

/// The popup renders stats and the three toggles, all on by default.
async fn check_popup(driver: &WebDriver, extension_id: &str) -> Result<(), String> {
    let url = format!("chrome-extension://{}/popup.html", extension_id);
    driver.goto(&url).await.map_err(|e| format!("Failed to open popup: {}", e))?;

    for selector in ["#bandwidthSaved", "#elementsBlocked", "#resetStats"] {
        driver
            .find(By::Css(selector))
            .await
            .map_err(|e| format!("Missing {}: {}", selector, e))?;
    }

    for toggle in ["blockImages", "blockVideos", "blockIframes"] {
        let checked = eval_bool(driver, &format!("return document.getElementById('{}')?.checked ?? false;", toggle))
            .await
            .map_err(|e| format!("Failed to read #{}: {}", toggle, e))?;
        if !checked {
            return Err(format!("Expected #{} to default to checked", toggle));
        }
    }
    Ok(())
}

async fn check_video_removed(driver: &WebDriver, page: &str) -> Result<(), String> {
    driver
        .goto(page)
        .await
        .map_err(|e| format!("Failed to navigate to {}: {}", page, e))?;
    // Past the coalescing window for late insertions.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let remaining = eval_bool(driver, "return document.querySelector('video') !== null;")
        .await
        .map_err(|e| format!("Failed to query videos: {}", e))?;
    if remaining {
        return Err("Expected every <video> to be removed".to_string());
    }
    Ok(())
}

async fn eval_bool(driver: &WebDriver, script: &str) -> WebDriverResult<bool> {
    let result = driver.execute(script, Vec::<Value>::new()).await?;
    Ok(result.json().as_bool().unwrap_or(false))
}

fn canonicalize_path(path: &str) -> Result<PathBuf, String> {
    std::fs::canonicalize(path)
        .map_err(|e| format!("Failed to resolve '{}': {}", path, e))
}
