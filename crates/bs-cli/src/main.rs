//! Bandwidth Saver CLI
//!
//! Tooling around the extension core: generate dynamic rules, run the media
//! monitor over a saved page tree, inspect and edit a settings record, and
//! check the monitor against its performance budget.

use clap::{Args, Parser, Subcommand};

use bs_core::popup::Toggle;
use bs_core::Settings;

mod bench;
#[cfg(feature = "e2e")]
mod e2e;
mod rules;
mod scan;
mod state;

#[derive(Parser)]
#[command(name = "bs-cli")]
#[command(about = "Bandwidth Saver rule generator and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Category toggles. With none given, every category is blocked; `--none`
/// blocks nothing.
#[derive(Args, Debug, Clone, Copy)]
struct SettingsArgs {
    /// Block images
    #[arg(long)]
    images: bool,

    /// Block videos and streaming requests
    #[arg(long)]
    videos: bool,

    /// Block embedded player iframes
    #[arg(long)]
    iframes: bool,

    /// Block nothing
    #[arg(long, conflicts_with_all = ["images", "videos", "iframes"])]
    none: bool,
}

impl SettingsArgs {
    fn settings(&self) -> Settings {
        if self.none {
            return Settings::disabled();
        }
        let settings = Settings {
            block_images: self.images,
            block_videos: self.videos,
            block_iframes: self.iframes,
        };
        if settings.any_enabled() {
            settings
        } else {
            Settings::install_defaults()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dynamic rule set for the given settings
    Rules {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Read settings from a stored record instead of flags
        #[arg(long)]
        state: Option<String>,

        /// Emit a full replacement update removing these rule ids
        #[arg(long, value_delimiter = ',')]
        replace: Option<Vec<u32>>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run the media monitor over a page tree (JSON node specs)
    Scan {
        /// Page tree file: a JSON array of body children
        #[arg(short, long)]
        input: String,

        /// Host the page is served from
        #[arg(long)]
        host: Option<String>,

        #[command(flatten)]
        settings: SettingsArgs,

        /// JSON array of subtrees appended after the initial scan
        #[arg(long)]
        inject: Option<String>,

        /// Print the resulting body as JSON
        #[arg(long)]
        dump: bool,
    },

    /// Show the stored settings record
    Show {
        /// Settings record file
        #[arg(short, long, default_value = "bandwidth-saver.json")]
        state: String,
    },

    /// Turn one category on or off in the stored record
    Toggle {
        /// blockImages, blockVideos or blockIframes
        toggle: Toggle,

        /// on or off
        #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
        enabled: bool,

        #[arg(short, long, default_value = "bandwidth-saver.json")]
        state: String,
    },

    /// Zero the stored counters
    Reset {
        #[arg(short, long, default_value = "bandwidth-saver.json")]
        state: String,
    },

    /// Feed a runtime message (JSON) to the background service
    Message {
        /// Message JSON, e.g. '{"action":"updateStats","stats":{...}}'
        message: String,

        #[arg(short, long, default_value = "bandwidth-saver.json")]
        state: String,
    },

    /// Check suppression pass latency against the budget
    Bench {
        /// Media elements per synthetic page
        #[arg(long, default_value_t = 200)]
        elements: usize,

        /// Measured iterations
        #[arg(long, default_value_t = 500)]
        iterations: usize,
    },

    /// Run Chrome extension E2E checks
    #[cfg(feature = "e2e")]
    E2e {
        /// Chromedriver URL
        #[arg(long, default_value = "http://localhost:9515")]
        chromedriver: String,

        /// Unpacked extension directory; `extension/` needs `pkg/` from
        /// `wasm-pack build crates/bs-wasm --target web --out-dir ../../extension/pkg`
        #[arg(long, default_value = "extension")]
        extension: String,

        /// Page with a <video> element to load
        #[arg(long, default_value = "https://www.w3schools.com/html/html5_video.asp")]
        video_page: String,

        /// Run Chrome in headless mode
        #[arg(long)]
        headless: bool,
    },
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on/off, got '{}'", other)),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Rules {
            settings,
            state,
            replace,
            output,
        } => rules::cmd_rules(settings.settings(), state.as_deref(), replace, output.as_deref()),
        Commands::Scan {
            input,
            host,
            settings,
            inject,
            dump,
        } => scan::cmd_scan(scan::ScanOptions {
            input,
            host,
            settings: settings.settings(),
            inject,
            dump,
        }),
        Commands::Show { state } => state::cmd_show(&state),
        Commands::Toggle {
            toggle,
            enabled,
            state,
        } => state::cmd_toggle(&state, toggle, enabled),
        Commands::Reset { state } => state::cmd_reset(&state),
        Commands::Message { message, state } => state::cmd_message(&state, &message),
        Commands::Bench {
            elements,
            iterations,
        } => bench::run_perf_budget(bench::PerfBudgetOptions {
            elements,
            iterations,
        }),
        #[cfg(feature = "e2e")]
        Commands::E2e {
            chromedriver,
            extension,
            video_page,
            headless,
        } => e2e::run_e2e(e2e::E2eOptions {
            chromedriver_url: chromedriver,
            extension_path: extension,
            video_page,
            headless,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
