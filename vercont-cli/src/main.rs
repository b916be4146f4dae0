//! Vercont command-line client

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vercont_core::{Change, Error, Repository, RepositoryConfig, diff};

#[derive(Parser, Debug)]
#[command(name = "vc")]
#[command(author = "Vercont Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Simple local version control for one directory")]
struct Cli {
    /// Repository directory
    #[arg(short, long, global = true, default_value = ".vercont")]
    repo: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a repository tracking a directory
    Init {
        /// Directory to version
        #[arg(short, long, default_value = ".")]
        worktree: PathBuf,
        /// Name of the first branch
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Save the working tree as a new version
    Save {
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show the history of a branch
    Log {
        /// Branch to show (default: checked-out branch)
        branch: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// List the files of a version
    Show {
        #[arg(default_value = "head", allow_negative_numbers = true)]
        rev: String,
    },

    /// Compare two versions
    Diff {
        #[arg(allow_negative_numbers = true)]
        from: String,
        #[arg(default_value = "head", allow_negative_numbers = true)]
        to: String,
    },

    /// Write a version into the working tree or another directory
    Checkout {
        #[arg(allow_negative_numbers = true)]
        rev: String,
        #[arg(short, long)]
        target: Option<PathBuf>,
    },

    /// Record a new version with the content of an earlier one
    Revert {
        #[arg(allow_negative_numbers = true)]
        rev: String,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show working tree changes
    Status,

    /// Show repository statistics
    Stats,

    /// Manage branches
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },
}

#[derive(Subcommand, Debug)]
enum BranchCommands {
    /// List branches
    List,

    /// Create a branch at the current head
    Create {
        name: String,
        /// Start an independent history instead of forking
        #[arg(long)]
        empty: bool,
    },

    /// Switch branch and check out its head
    Switch {
        name: String,
        /// Leave the working tree untouched
        #[arg(long)]
        no_checkout: bool,
    },

    /// Delete a branch; its versions are kept
    Delete { name: String },

    /// Rename a branch
    Rename { from: String, to: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Init { worktree, branch } => {
            let worktree = worktree
                .canonicalize()
                .with_context(|| format!("cannot access {:?}", worktree))?;
            let mut config = RepositoryConfig::new(worktree);
            if let Some(branch) = branch {
                config = config.with_default_branch(branch);
            }
            let repo = Repository::init_with_config(&cli.repo, config)?;
            println!(
                "Repository initialized at {} (UUID: {})",
                cli.repo.display(),
                repo.config().uuid
            );
        }

        Commands::Save { message } => {
            let repo = open(&cli.repo)?;
            match repo.save_worktree(message.as_deref()) {
                Ok(id) => println!("Saved {} on '{}'", id, repo.current_branch()?),
                Err(e @ Error::NoChanges { .. }) => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Log { branch, limit } => {
            let repo = open(&cli.repo)?;
            let branch = match branch {
                Some(branch) => branch,
                None => repo.current_branch()?,
            };
            let Some(head) = repo.branch_head(&branch)? else {
                println!("Branch '{}' has no versions yet", branch);
                return Ok(());
            };
            for version in repo.history(head).take(limit.unwrap_or(usize::MAX)) {
                let version = version?;
                println!(
                    "{}  {}  {} files  {}",
                    version.id,
                    version.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    version.entries.len(),
                    version.message.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Show { rev } => {
            let repo = open(&cli.repo)?;
            let version = repo.get_version(repo.resolve(&rev)?)?;
            println!("version {} on '{}'", version.id, version.branch);
            if let Some(parent) = version.parent {
                println!("parent  {}", parent);
            }
            println!("date    {}", version.timestamp.to_rfc3339());
            if let Some(message) = &version.message {
                println!("\n    {}\n", message);
            }
            for (path, hash) in &version.entries {
                println!("{}  {}", hash.short(), path);
            }
        }

        Commands::Diff { from, to } => {
            let repo = open(&cli.repo)?;
            let (from, to) = (repo.resolve(&from)?, repo.resolve(&to)?);
            for change in repo.diff_versions(from, to)? {
                match &change.change {
                    Change::Modified { old, new, .. } => {
                        let old = repo.store().get(*old)?;
                        let new = repo.store().get(*new)?;
                        print!("{}", diff::render_unified(&old, &new, &change.path));
                    }
                    other => println!("{} {}", other.kind(), change.path),
                }
            }
        }

        Commands::Checkout { rev, target } => {
            let repo = open(&cli.repo)?;
            let id = repo.resolve(&rev)?;
            let target = target.unwrap_or_else(|| repo.worktree().to_path_buf());
            let summary = repo.checkout(id, &target)?;
            println!(
                "Checked out {}: {} written, {} removed, {} unchanged",
                id, summary.written, summary.removed, summary.unchanged
            );
        }

        Commands::Revert { rev, message } => {
            let repo = open(&cli.repo)?;
            let id = repo.resolve(&rev)?;
            let new = repo.revert_to(id, message.as_deref())?;
            println!("Reverted to {} as {}", id, new);
        }

        Commands::Status => {
            let repo = open(&cli.repo)?;
            let changes = repo.status()?;
            if changes.is_empty() {
                println!("Working tree clean");
            }
            for (path, kind) in changes {
                println!("{} {}", kind, path);
            }
        }

        Commands::Stats => {
            let repo = open(&cli.repo)?;
            let stats = repo.stats()?;
            println!("Versions:     {}", stats.versions);
            println!("Branches:     {}", stats.branches);
            println!("Blobs:        {}", stats.store.blobs);
            println!("Delta blobs:  {}", stats.store.delta_blobs);
            println!("Stored bytes: {}", stats.store.stored_bytes);
        }

        Commands::Branch { command } => {
            let repo = open(&cli.repo)?;
            branch_command(&repo, command)?;
        }
    }

    Ok(())
}

fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).with_context(|| format!("cannot open repository {:?}", path))
}

fn branch_command(repo: &Repository, command: BranchCommands) -> Result<()> {
    match command {
        BranchCommands::List => {
            for branch in repo.list_branches()? {
                let marker = if branch.current { "*" } else { " " };
                let head = branch
                    .head
                    .map_or_else(|| "-".to_string(), |h| h.to_string());
                println!("{} {:<20} {}", marker, branch.name, head);
            }
        }
        BranchCommands::Create { name, empty } => {
            if empty {
                repo.create_branch(&name, None)?;
                println!("Created empty branch '{}'", name);
            } else {
                let head = repo.fork_branch(&name)?;
                println!("Created branch '{}' at {}", name, head);
            }
        }
        BranchCommands::Switch { name, no_checkout } => {
            if no_checkout {
                repo.switch_branch(&name)?;
                println!("Switched to '{}'", name);
            } else {
                match repo.checkout_branch(&name)? {
                    Some(summary) => println!(
                        "Switched to '{}': {} written, {} removed",
                        name, summary.written, summary.removed
                    ),
                    None => println!("Switched to '{}' (no versions yet)", name),
                }
            }
        }
        BranchCommands::Delete { name } => {
            repo.delete_branch(&name)?;
            println!("Deleted branch '{}'", name);
        }
        BranchCommands::Rename { from, to } => {
            repo.rename_branch(&from, &to)?;
            println!("Renamed '{}' to '{}'", from, to);
        }
    }
    Ok(())
}
