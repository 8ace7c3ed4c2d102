//! TrackingShield CLI
//!
//! CLI tool for compiling the tracker list into a content-blocker artifact,
//! inspecting artifacts, checking requests against the matcher, and editing the
//! safelist and feature flags kept in the settings file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use tp_compiler::{load_tracker_domains, parse_rules, RuleArtifactPersister, RuleCompiler};
use tp_core::types::{overrides_follow_blocking, RuleSetSummary, MAX_RULES_ALLOWED};
use tp_core::{
    BlocklistMatcher, FeatureFlags, Flag, JsonFileStore, KeyValueStore, PageStats, PublicSuffix,
    SafelistStore, TrackerIndex,
};

#[derive(Parser)]
#[command(name = "tp-cli")]
#[command(about = "TrackingShield rule compiler and tools")]
struct Cli {
    /// Settings file holding feature flags and the safelist
    #[arg(long, global = true, env = "TP_STORE", default_value = "tp-settings.json")]
    store: PathBuf,

    /// Public suffix list file (built-in heuristic if omitted)
    #[arg(long, global = true, env = "TP_PSL")]
    psl: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the tracker list into a content-blocker rule artifact
    Compile {
        /// Tracker domain list (JSON array)
        #[arg(short, long, env = "TP_TRACKER_LIST")]
        list: PathBuf,

        /// Output artifact file
        #[arg(short, long, env = "TP_ARTIFACT", default_value = "contentBlockerList.json")]
        output: PathBuf,

        /// Fail instead of writing an empty artifact when the list is unreadable
        #[arg(long)]
        strict: bool,
    },

    /// Dump rule artifact info
    Info {
        /// Artifact file to inspect
        #[arg(short, long, env = "TP_ARTIFACT", default_value = "contentBlockerList.json")]
        input: PathBuf,
    },

    /// Check requests made by a page against the tracker list
    Check {
        /// Tracker domain list (JSON array)
        #[arg(short, long, env = "TP_TRACKER_LIST")]
        list: PathBuf,

        /// URL of the page making the requests
        #[arg(short, long)]
        page: String,

        /// Print the tracker summary as JSON
        #[arg(long)]
        json: bool,

        /// Request URLs
        #[arg(required = true)]
        requests: Vec<String>,
    },

    /// Allow trackers on a site
    Allow { domain: String },

    /// Block trackers on a previously allowed site
    Disallow { domain: String },

    /// List sites with trackers allowed
    Safelist,

    /// Show or change feature flags
    Flag {
        /// block-requests, block-cookies or upgrade-https (all flags if omitted)
        name: Option<String>,

        /// Set the flag
        #[arg(long, value_name = "BOOL", conflicts_with_all = ["toggle", "reset"])]
        set: Option<bool>,

        /// Flip the flag
        #[arg(long, conflicts_with = "reset")]
        toggle: bool,

        /// Forget the stored value and use the default
        #[arg(long)]
        reset: bool,
    },
}

struct Context {
    store: Arc<dyn KeyValueStore>,
    psl: Arc<PublicSuffix>,
}

impl Context {
    fn open(store: &Path, psl: Option<&Path>) -> Result<Self, String> {
        let store = JsonFileStore::open(store).map_err(|e| e.to_string())?;
        let psl = match psl {
            Some(path) => PublicSuffix::from_file(path).map_err(|e| e.to_string())?,
            None => PublicSuffix::fallback(),
        };
        Ok(Self {
            store: Arc::new(store),
            psl: Arc::new(psl),
        })
    }

    fn safelist(&self) -> Arc<SafelistStore> {
        Arc::new(SafelistStore::load(self.store.clone(), self.psl.clone()))
    }

    fn flags(&self) -> FeatureFlags {
        FeatureFlags::new(self.store.clone())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = Context::open(&cli.store, cli.psl.as_deref()).and_then(|ctx| match cli.command {
        Commands::Compile { list, output, strict } => cmd_compile(&ctx, &list, &output, strict),
        Commands::Info { input } => cmd_info(&input),
        Commands::Check {
            list,
            page,
            json,
            requests,
        } => cmd_check(&ctx, &list, &page, &requests, json),
        Commands::Allow { domain } => cmd_allow(&ctx, &domain, true),
        Commands::Disallow { domain } => cmd_allow(&ctx, &domain, false),
        Commands::Safelist => cmd_safelist(&ctx),
        Commands::Flag {
            name,
            set,
            toggle,
            reset,
        } => cmd_flag(&ctx, name.as_deref(), set, toggle, reset),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(ctx: &Context, list: &Path, output: &Path, strict: bool) -> Result<(), String> {
    if strict {
        load_tracker_domains(list).map_err(|e| e.to_string())?;
    }

    let start = Instant::now();
    let compiler = RuleCompiler::new(list, ctx.safelist(), ctx.flags(), ctx.psl.clone());
    let config = compiler.flags().config();
    let persister = RuleArtifactPersister::new(compiler, output);

    persister.regenerate();
    persister.flush();

    let report = persister
        .last_report()
        .filter(|r| r.written)
        .ok_or_else(|| format!("Failed to write '{}'", output.display()))?;
    let stats = &report.stats;
    let size = report.bytes;

    println!("Compiled '{}' to '{}'", list.display(), output.display());
    println!(
        "  Flags:     requests={} cookies={} https={}",
        config.block_third_party_requests, config.block_third_party_cookies, config.upgrade_to_https
    );
    println!("  Domains:   {} ({} skipped)", stats.domains, stats.skipped_domains);
    println!(
        "  Rules:     {} (blocking {}, safelist {}, https {})",
        stats.total_rules, stats.blocking_rules, stats.safelist_rules, stats.https_rules
    );
    if stats.truncated_groups > 0 {
        println!("  Truncated: {} blocking groups over the rule ceiling", stats.truncated_groups);
    }
    println!("  Size:      {} bytes ({:.1} KB)", size, size as f64 / 1024.0);
    println!("  Time:      {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let rules = parse_rules(&bytes).map_err(|e| format!("Invalid rule artifact: {}", e))?;
    let summary = RuleSetSummary::of(&rules);

    println!("Artifact: {}", input.display());
    println!("  Size:            {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!("  Rules:           {} (ceiling {})", summary.total, MAX_RULES_ALLOWED);
    println!();
    println!("Actions:");
    println!("  block:                 {}", summary.block);
    println!("  block-cookies:         {}", summary.block_cookies);
    println!("  make-https:            {}", summary.make_https);
    println!("  ignore-previous-rules: {}", summary.ignore_previous);
    println!("  css-display-none:      {}", summary.css_display_none);

    if !overrides_follow_blocking(&rules) {
        println!();
        println!("Warning: some ignore-previous-rules entries precede blocking rules");
    }
    if summary.total > MAX_RULES_ALLOWED {
        println!();
        println!("Warning: rule count exceeds the content filter ceiling");
    }

    Ok(())
}

fn cmd_check(ctx: &Context, list: &Path, page: &str, requests: &[String], json: bool) -> Result<(), String> {
    let domains = load_tracker_domains(list).map_err(|e| e.to_string())?;
    let index = Arc::new(TrackerIndex::from_domains(domains));
    let matcher = BlocklistMatcher::new(index, ctx.safelist(), ctx.psl.clone());

    let mut stats = PageStats::new();
    let mut verdicts = Vec::with_capacity(requests.len());
    for request in requests {
        let blocked = matcher.record_if_blocked(request, page, &mut stats);
        log::debug!("{} -> {}", request, blocked);
        verdicts.push((request, blocked));
    }
    let summary = stats.summary(&ctx.psl);

    if json {
        let text = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Page: {}", page);
    for (request, blocked) in verdicts {
        println!("  {:<8} {}", if blocked { "BLOCKED" } else { "allowed" }, request);
    }
    println!();
    println!("Trackers:    {} requests, {} hosts", summary.num_trackers, summary.num_domains);
    for (entity, count) in summary.entity_counts() {
        println!("  {:<14} {}", entity.name(), count);
    }

    Ok(())
}

fn cmd_allow(ctx: &Context, domain: &str, allow: bool) -> Result<(), String> {
    let safelist = ctx.safelist();
    let changed = if allow {
        safelist.allow(domain)
    } else {
        safelist.disallow(domain)
    }
    .map_err(|e| e.to_string())?;

    let site = ctx.psl.registrable_domain(domain);
    match (allow, changed) {
        (true, true) => println!("Trackers allowed on {}", site),
        (true, false) => println!("{} is already safelisted", site),
        (false, true) => println!("Trackers blocked on {} again", site),
        (false, false) => println!("{} is not safelisted", site),
    }
    if changed {
        println!("Run 'tp-cli compile' to update the rule artifact");
    }

    Ok(())
}

fn cmd_safelist(ctx: &Context) -> Result<(), String> {
    let domains = ctx.safelist().all();
    if domains.is_empty() {
        println!("No safelisted sites");
    }
    for domain in domains {
        println!("{}", domain);
    }
    Ok(())
}

fn cmd_flag(ctx: &Context, name: Option<&str>, set: Option<bool>, toggle: bool, reset: bool) -> Result<(), String> {
    let flags = ctx.flags();

    let Some(name) = name else {
        for flag in Flag::ALL {
            print_flag(&flags, flag);
        }
        return Ok(());
    };

    let flag = Flag::from_name(name).ok_or_else(|| {
        format!(
            "Unknown flag '{}' (expected block-requests, block-cookies or upgrade-https)",
            name
        )
    })?;

    if reset {
        flags.reset(flag).map_err(|e| e.to_string())?;
    } else if toggle {
        flags.toggle(flag).map_err(|e| e.to_string())?;
    } else if let Some(enabled) = set {
        flags.set(flag, enabled).map_err(|e| e.to_string())?;
    }

    print_flag(&flags, flag);
    Ok(())
}

fn print_flag(flags: &FeatureFlags, flag: Flag) {
    let source = if flags.is_set(flag) { "" } else { " (default)" };
    println!("{:<34} {}{}", flag.key(), flags.is_enabled(flag), source);
}
