use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use batchgen_core::Tier;
use batchgen_runner::{apply_patch, render_patch, GenerateOptions, MaintainOptions, PatchOutcome, Runner};

/// Set by SIGINT/SIGTERM; the generation loop stops before the next candidate.
static CANCEL: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "batchgen", version)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config (.batchgen/batchgen.toml) and data directories
    Init,

    /// Check config, queue file, failures directory and executor
    Doctor,

    /// Show queue totals by status and ecosystem, with breaker states
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run one generation batch
    Generate {
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_tier: Option<Tier>,
        /// Only process entries of this ecosystem
        #[arg(long)]
        ecosystem: Option<String>,
        /// Print the selection without invoking the executor or writing anything
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },

    /// Requeue unblocked entries, then reorder pending entries by blocking impact
    Maintain {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        skip_requeue: bool,
        #[arg(long)]
        skip_reorder: bool,
    },

    /// Manual queue edits
    Queue {
        #[command(subcommand)]
        cmd: QueueCommand,
    },

    /// Derive platform constraints from a validation result file
    DeriveConstraints {
        /// JSON list of platform results
        #[arg(long)]
        results: PathBuf,
        /// Restrict to these recipes (repeatable)
        #[arg(long = "recipe")]
        recipes: Vec<String>,
        /// Restrict to these platform ids (repeatable)
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Write the derived keys into <dir>/<first letter>/<recipe>.toml
        #[arg(long)]
        apply: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Append a new pending entry
    Add {
        /// Entry id, `<ecosystem>:<name>`
        id: String,
        #[arg(long, default_value_t = 3)]
        tier: Tier,
    },

    /// Put a failed or skipped entry back to pending
    Reset { id: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo_root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    tracing::debug!(root = %repo_root.display(), "repository root");

    match cli.cmd {
        Command::Init => {
            let path = Runner::init_repo(&repo_root)?;
            println!("Initialized batchgen in {} (config: {})", repo_root.display(), path.display());
        }
        Command::Doctor => {
            let r = Runner::open(repo_root)?;
            r.doctor()?;
            println!("OK");
        }
        Command::Status { json } => {
            let r = Runner::open(repo_root)?;
            let status = r.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", status.render_text());
            }
        }
        Command::Generate { batch_size, max_tier, ecosystem, dry_run, json } => {
            let r = Runner::open(repo_root)?;
            install_cancel_handler();
            let opts = GenerateOptions { batch_size, max_tier, ecosystem, dry_run };
            let report = r.generate(&opts, &CANCEL)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.dry_run {
                println!("Would process {} entries:", report.selected.len());
                for id in &report.selected {
                    println!("- {id}");
                }
            } else {
                for a in &report.attempts {
                    println!("- {} {}", a.id, a.outcome);
                }
                print!("{}", report.summary.to_markdown());
            }
        }
        Command::Maintain { dry_run, json, skip_requeue, skip_reorder } => {
            let r = Runner::open(repo_root)?;
            let report = r.maintain(MaintainOptions { dry_run, skip_requeue, skip_reorder })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Queue { cmd } => {
            let r = Runner::open(repo_root)?;
            match cmd {
                QueueCommand::Add { id, tier } => {
                    let id = r.add(&id, tier)?;
                    println!("Added {id} (tier {tier})");
                }
                QueueCommand::Reset { id } => {
                    let previous = r.reset(&id)?;
                    println!("Reset {id} ({previous} -> pending)");
                }
            }
        }
        Command::DeriveConstraints { results, recipes, platforms, apply, json } => {
            let r = Runner::open(repo_root)?;
            let derived = r.derive_constraints(&results, &recipes, &platforms)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&derived)?);
            }
            for (recipe, constraint) in &derived {
                if !json {
                    let patch = render_patch(constraint)?;
                    if patch.is_empty() {
                        println!("# {recipe}: no constraint");
                    } else {
                        println!("# {recipe}\n{patch}");
                    }
                }
                if let Some(dir) = &apply {
                    match apply_patch(dir, recipe, constraint)? {
                        PatchOutcome::Updated { path } => eprintln!("updated {}", path.display()),
                        PatchOutcome::Missing { path } => eprintln!("skipped {} (not found)", path.display()),
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn install_cancel_handler() {
    extern "C" fn on_signal(_sig: libc::c_int) {
        CANCEL.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn install_cancel_handler() {}
