mod coerce;
mod config;
mod device;
mod display;
mod error;
mod executor;
mod range;
mod registry;
mod session;
mod template;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Settings;
use device::{Device, HttpTransport};
use executor::{BatchEvent, BatchSummary, BulkOperation, OperationKind};
use range::IndexRange;
use registry::Page;
use session::{ControlUpdate, PageSession};
use template::{Domain, ParameterTemplate};

#[derive(Parser)]
#[command(name = "bulk-notify", about = "Bulk configure notification parameters on a NEXX card")]
struct Cli {
    /// Card IP address (overrides the saved one)
    #[arg(long, global = true)]
    ip: Option<Ipv4Addr>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a card answers at this address and remember it
    Connect {
        /// Card IPv4 address
        #[arg(value_name = "IP")]
        address: Ipv4Addr,
    },

    /// Forget the saved card address
    Reset,

    /// List pages, or the parameters on one page
    Pages {
        /// Page to describe
        page: Option<Page>,
    },

    /// Read a page's values back from the card
    Load {
        page: Page,

        #[command(flatten)]
        range: RangeArgs,

        /// Write the loaded values to a JSON snapshot
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Write a page's values to the card
    Apply {
        page: Page,

        #[command(flatten)]
        range: RangeArgs,

        /// Start from a snapshot written by 'load --save' instead of defaults
        #[arg(long)]
        from: Option<PathBuf>,

        /// Set a parameter across the whole range (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        sets: Vec<String>,

        /// Flip every selector in a notification group (repeatable)
        #[arg(long = "toggle-all", value_name = "GROUP")]
        toggles: Vec<String>,

        /// Allow writing to a page whose ids are not verified on a card
        #[arg(long)]
        provisional: bool,
    },

    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// Inputs, e.g. 3 or 1-8 (default: all)
    #[arg(short, long)]
    inputs: Option<IndexRange>,

    /// Channels or pairs, e.g. 1-16 (default: all)
    #[arg(short, long)]
    channels: Option<IndexRange>,

    /// Only these parameters (repeatable, default: whole page)
    #[arg(long = "only", value_name = "NAME")]
    only: Vec<String>,
}

/// Global flags, split off before the subcommand is consumed.
struct Globals {
    ip: Option<Ipv4Addr>,
    timeout_ms: Option<u64>,
    settings_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let globals = Globals {
        ip: cli.ip,
        timeout_ms: cli.timeout_ms,
        settings_path: Settings::default_path(),
    };

    match cli.command {
        Commands::Connect { address } => cmd_connect(&globals, address).await,
        Commands::Reset => cmd_reset(&globals),
        Commands::Pages { page } => cmd_pages(page),
        Commands::Load { page, range, save } => cmd_load(&globals, page, range, save.as_deref()).await,
        Commands::Apply {
            page,
            range,
            from,
            sets,
            toggles,
            provisional,
        } => cmd_apply(&globals, page, range, from.as_deref(), &sets, &toggles, provisional).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "bulk-notify", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ── Helpers ──

fn load_settings(globals: &Globals) -> Result<Settings> {
    Settings::load(&globals.settings_path)
        .with_context(|| format!("Cannot use settings at {}", globals.settings_path.display()))
}

fn open_device(globals: &Globals, settings: &Settings, ip: Ipv4Addr) -> Result<Device> {
    let timeout = globals
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.request_timeout());
    let transport = HttpTransport::new(timeout)?;
    Ok(Device::new(ip, Arc::new(transport)))
}

/// The card address is read fresh for every command.
fn saved_device(globals: &Globals) -> Result<Device> {
    let settings = load_settings(globals)?;
    let ip = globals
        .ip
        .or(settings.device_ip)
        .context("IP not set. Run 'connect <ip>' first or pass --ip.")?;
    open_device(globals, &settings, ip)
}

fn build_operation(
    kind: OperationKind,
    page: Page,
    inputs: Option<IndexRange>,
    channels: Option<IndexRange>,
    only: &[String],
) -> Result<BulkOperation> {
    let op = BulkOperation::new(kind, page, inputs, channels);
    if only.is_empty() {
        return Ok(op);
    }
    let templates = only
        .iter()
        .map(|name| registry::find_template(page, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(op.with_templates(templates))
}

/// Pages with unverified ids are only written to when the user asks for it.
fn check_provisional(page: Page, allowed: bool) -> Result<()> {
    if !page.ids_confirmed() && !allowed {
        bail!(
            "Page {} uses provisional parameter ids that are not verified on a card. Pass --provisional to write anyway.",
            page
        );
    }
    Ok(())
}

/// Smallest ranges covering every tuple in `session`, on the axes `page` has.
fn covering_ranges(session: &PageSession) -> (Option<IndexRange>, Option<IndexRange>) {
    let axes = session.page().axes();
    let tuples = session.tuples();

    let primaries = tuples.iter().map(|t| t.primary);
    let primary = match (axes.primary, primaries.clone().min(), primaries.max()) {
        (Some(_), Some(lo), Some(hi)) => Some(IndexRange::new(lo, hi)),
        _ => None,
    };

    let secondaries = tuples.iter().filter_map(|t| t.secondary);
    let secondary = match (axes.secondary, secondaries.clone().min(), secondaries.max()) {
        (Some(_), Some(lo), Some(hi)) => Some(IndexRange::new(lo, hi)),
        _ => None,
    };

    (primary, secondary)
}

/// Parse a user value for `template`, checking it against the template's domain.
fn parse_value(s: &str, template: &ParameterTemplate) -> Result<i64> {
    match template.domain {
        Domain::Numeric { .. } => {
            let v: i64 = s
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Expected an integer for '{}'", template.name))?;
            if let Err(e) = template.domain.check(v) {
                bail!("'{}': {}", template.name, e);
            }
            Ok(v)
        }
        Domain::Choice(labels) => {
            let lower = s.trim().to_lowercase();
            if let Ok(idx) = lower.parse::<i64>() {
                if let Err(e) = template.domain.check(idx) {
                    bail!("'{}': {}", template.name, e);
                }
                return Ok(idx);
            }
            if let Some(idx) = labels.iter().position(|l| l.to_lowercase() == lower) {
                return Ok(idx as i64);
            }
            match lower.as_str() {
                "on" | "yes" | "true" | "enable" | "enabled" => Ok(1),
                "off" | "no" | "false" | "disable" | "disabled" => Ok(0),
                _ => bail!(
                    "Unknown choice '{}' for '{}'. Options: {}",
                    s,
                    template.name,
                    labels.join(", ")
                ),
            }
        }
    }
}

/// Run one batch to completion, feeding Load results into `session` and
/// printing item errors as they arrive. Ctrl-C cancels after the current request.
async fn run_batch(device: Device, op: &BulkOperation, session: &mut PageSession) -> Result<BatchSummary> {
    let (cancel, token) = executor::cancel_pair();
    let mut handle = executor::spawn(device, op, session.values().clone(), token)?;

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current request");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            BatchEvent::Started { kind, page, items } => {
                let verb = match kind {
                    OperationKind::Load => "Loading",
                    OperationKind::Apply => "Applying",
                };
                println!("{} {} parameters on page {}", verb, items, page);
            }
            BatchEvent::Control(update) => session.apply_update(update),
            BatchEvent::Item(result) => {
                if result.outcome.is_err() {
                    display::print_item_error(op.page, &result);
                }
            }
            BatchEvent::Finished(summary) => display::print_summary(&summary),
        }
    }

    interrupt.abort();
    Ok(handle.join().await?)
}

fn check_summary(summary: &BatchSummary) -> Result<()> {
    if summary.failed > 0 {
        bail!("{} of {} parameters failed", summary.failed, summary.total);
    }
    if summary.cancelled {
        bail!("Cancelled after {} of {} parameters", summary.succeeded, summary.total);
    }
    Ok(())
}

// ── Connect / Reset ──

async fn cmd_connect(globals: &Globals, ip: Ipv4Addr) -> Result<()> {
    let mut settings = load_settings(globals)?;
    let device = open_device(globals, &settings, ip)?;
    let card = device.probe().await?;
    println!("Card found: {}", card);

    settings.device_ip = Some(ip);
    settings.save(&globals.settings_path)?;
    println!("Saved {} as the card address", ip);
    Ok(())
}

fn cmd_reset(globals: &Globals) -> Result<()> {
    let mut settings = load_settings(globals)?;
    settings.device_ip = None;
    settings.save(&globals.settings_path)?;
    println!("Card address cleared");
    Ok(())
}

// ── Pages ──

fn cmd_pages(page: Option<Page>) -> Result<()> {
    match page {
        Some(page) => display::print_page(page),
        None => display::print_page_list(),
    }
    Ok(())
}

// ── Load / Apply ──

/// Run a Load into a fresh session. Only values the card actually returned end
/// up in it.
async fn load_session(device: Device, op: &BulkOperation) -> Result<(PageSession, BatchSummary)> {
    let (primary, secondary) = op.ranges()?;
    let mut session = PageSession::empty(op.page, range::expand(primary, secondary)?);
    let summary = run_batch(device, op, &mut session).await?;
    Ok((session, summary))
}

async fn cmd_load(globals: &Globals, page: Page, range: RangeArgs, save: Option<&Path>) -> Result<()> {
    let op = build_operation(OperationKind::Load, page, range.inputs, range.channels, &range.only)?;
    op.plan()?;

    let device = saved_device(globals)?;
    let (session, summary) = load_session(device, &op).await?;

    println!();
    display::print_values(&session, &op.templates);

    if let Some(path) = save {
        session::save_snapshot(path, &session)?;
        println!("Snapshot saved to {}", path.display());
    }

    check_summary(&summary)
}

/// Build the Apply batch and the values it writes.
///
/// Without a snapshot every control in range starts at its default. With one,
/// only the controls the snapshot lists are written, plus whatever `sets` and
/// `toggles` touch.
fn prepare_apply(
    page: Page,
    range: RangeArgs,
    saved: Option<PageSession>,
    sets: &[String],
    toggles: &[String],
) -> Result<(BulkOperation, PageSession)> {
    let (inputs, channels) = match &saved {
        Some(saved) if range.inputs.is_none() && range.channels.is_none() => covering_ranges(saved),
        _ => (range.inputs, range.channels),
    };
    let op = build_operation(OperationKind::Apply, page, inputs, channels, &range.only)?;
    let (primary, secondary) = op.ranges()?;
    let tuples = range::expand(primary, secondary)?;
    let from_snapshot = saved.is_some();

    let mut session = match saved {
        Some(saved) => {
            let tuples = tuples.into_iter().filter(|t| saved.tuples().contains(t)).collect();
            let mut session = PageSession::empty(page, tuples);
            for (key, value) in saved.values() {
                if session.tuples().contains(&key.tuple) {
                    session.apply_update(ControlUpdate {
                        key: *key,
                        value: *value,
                    });
                }
            }
            session
        }
        None => PageSession::new(page, tuples),
    };

    for set in sets {
        let (name, value) = set
            .split_once('=')
            .with_context(|| format!("Expected NAME=VALUE, got '{}'", set))?;
        let template = registry::find_template(page, name.trim())?;
        let value = parse_value(value, template)?;
        session.set_all(template, value);
    }

    for toggle in toggles {
        let group = registry::find_group(page, toggle)?;
        let value = session.toggle_all(group);
        println!("Toggled {}: every selector set to {}", group, value);
    }

    let op = if from_snapshot {
        op.with_controls(session.values().keys().copied().collect())
    } else {
        op
    };
    Ok((op, session))
}

async fn cmd_apply(
    globals: &Globals,
    page: Page,
    range: RangeArgs,
    from: Option<&Path>,
    sets: &[String],
    toggles: &[String],
    provisional: bool,
) -> Result<()> {
    check_provisional(page, provisional)?;

    let saved = match from {
        Some(path) => {
            let saved = session::load_snapshot(path)?;
            if saved.page() != page {
                bail!("{} is a snapshot of page {}, not {}", path.display(), saved.page(), page);
            }
            Some(saved)
        }
        None => None,
    };

    let (op, mut session) = prepare_apply(page, range, saved, sets, toggles)?;
    let device = saved_device(globals)?;
    let summary = run_batch(device, &op, &mut session).await?;
    check_summary(&summary)
}
