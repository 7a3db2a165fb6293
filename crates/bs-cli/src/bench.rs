//! Performance budget for the mutation path: batch triage and the coalesced
//! suppression pass over synthetic pages.

use std::time::Instant;

use bs_core::dom::{ElementSpec, NodeSpec};
use bs_core::{ArenaHost, Document, Driver, MonitorEvent, Settings};

pub struct PerfBudgetOptions {
    pub elements: usize,
    pub iterations: usize,
}

const BUDGET_INITIAL_SCAN_MS: f64 = 50.0;
const BUDGET_TRIAGE_P99_US: f64 = 500.0;
const BUDGET_PASS_P99_US: f64 = 5000.0;

fn element(tag: &str, attributes: &[(&str, &str)], children: Vec<NodeSpec>) -> NodeSpec {
    NodeSpec::Element(ElementSpec {
        tag: tag.to_string(),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        children,
    })
}

/// A feed-like page: `count` cards, every fourth one carrying media.
fn synthetic_page(count: usize) -> Vec<NodeSpec> {
    (0..count)
        .map(|i| {
            let media = match i % 8 {
                0 => Some(element("video", &[("src", "clip.mp4")], Vec::new())),
                4 => Some(element(
                    "iframe",
                    &[("src", "https://www.youtube.com/embed/abc")],
                    Vec::new(),
                )),
                _ => None,
            };
            let mut children = vec![element("p", &[], vec![NodeSpec::Text(format!("post {}", i))])];
            children.extend(media);
            element("article", &[("class", "card")], children)
        })
        .collect()
}

fn running_driver(page: &[NodeSpec]) -> Driver<Document, ArenaHost> {
    let mut driver = Driver::for_document(Document::from_body_specs(page), ArenaHost::new(), None);
    driver.dispatch(MonitorEvent::Configure(Settings::install_defaults()));
    driver.dispatch(MonitorEvent::Start);
    driver
}

pub fn run_perf_budget(opts: PerfBudgetOptions) -> Result<(), String> {
    if opts.iterations == 0 {
        return Err("Iterations must be greater than zero".to_string());
    }

    println!("Performance Budget Check");
    println!("==================================================");

    let page = synthetic_page(opts.elements);

    println!("Initial scan of {} card(s)...", opts.elements);
    let scan_begin = Instant::now();
    let driver = running_driver(&page);
    let initial_scan_ms = scan_begin.elapsed().as_secs_f64() * 1000.0;
    let blocked = driver.monitor().session_stats().elements_blocked;
    println!("  Blocked {} element(s)", blocked);

    println!("Measuring batch triage (no media)...");
    let quiet = synthetic_page(1)
        .into_iter()
        .map(|spec| match spec {
            NodeSpec::Element(mut el) => {
                el.children.truncate(1);
                NodeSpec::Element(el)
            }
            text => text,
        })
        .collect::<Vec<_>>();
    let triage = measure(opts.iterations, |driver| {
        append(driver, &quiet);
        let begin = Instant::now();
        driver.deliver_records();
        begin.elapsed().as_secs_f64() * 1_000_000.0
    });

    println!("Measuring coalesced pass...");
    let burst = synthetic_page(16);
    let pass = measure(opts.iterations, |driver| {
        append(driver, &burst);
        driver.deliver_records();
        let begin = Instant::now();
        driver.fire_timers();
        begin.elapsed().as_secs_f64() * 1_000_000.0
    });

    let mut passed = true;
    println!();
    println!("Results");
    println!("--------------------------------------------------");

    passed &= report_budget("Initial Scan", initial_scan_ms, BUDGET_INITIAL_SCAN_MS, "ms");
    passed &= report_budget("Triage P99 Latency", percentile(&triage, 0.99), BUDGET_TRIAGE_P99_US, "μs");
    passed &= report_budget("Pass P99 Latency", percentile(&pass, 0.99), BUDGET_PASS_P99_US, "μs");

    println!();
    println!("==================================================");

    if passed {
        println!("✓ All performance budgets passed");
        Ok(())
    } else {
        Err("Performance budget exceeded".to_string())
    }
}

fn append(driver: &mut Driver<Document, ArenaHost>, specs: &[NodeSpec]) {
    let tree = driver.tree_mut();
    let body = tree.attach_body();
    for spec in specs {
        let node = tree.build(spec);
        tree.append_child(body, node);
    }
}

/// Run `sample` on a fresh running driver per iteration batch and collect
/// its latencies.
fn measure<F>(iterations: usize, mut sample: F) -> Vec<f64>
where
    F: FnMut(&mut Driver<Document, ArenaHost>) -> f64,
{
    const PER_DRIVER: usize = 50;
    let mut latencies = Vec::with_capacity(iterations);
    while latencies.len() < iterations {
        let mut driver = running_driver(&[]);
        for _ in 0..PER_DRIVER.min(iterations - latencies.len()) {
            latencies.push(sample(&mut driver));
        }
    }
    latencies
}

fn report_budget(name: &str, actual: f64, limit: f64, unit: &str) -> bool {
    let passed = actual <= limit;
    let status = if passed { "✓" } else { "✗" };
    println!(
        "{} {}: {:.2} {} (limit: {:.2} {})",
        status, name, actual, unit, limit, unit
    );
    passed
}

fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
