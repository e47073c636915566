use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vibeman", version, about = "Branch-per-environment control plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to <config-dir>/vibeman/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage tracked repositories
    Repo {
        #[command(subcommand)]
        action: RepoSubcommand,
    },

    /// Manage worktree environments
    Worktree {
        #[command(subcommand)]
        action: WorktreeSubcommand,
    },

    /// Manage shared services
    Service {
        #[command(subcommand)]
        action: ServiceSubcommand,
    },

    /// Show repositories, worktrees and services at a glance
    Status,

    /// Stream container logs for a worktree
    Logs {
        /// Repository name
        repo: String,

        /// Worktree name
        worktree: String,

        /// Limit to one compose service
        #[arg(short, long)]
        service: Option<String>,

        /// Keep following the stream
        #[arg(short, long)]
        follow: bool,

        /// Number of trailing lines
        #[arg(long)]
        tail: Option<u32>,

        /// Only logs since this timestamp or duration (e.g. "10m")
        #[arg(long)]
        since: Option<String>,
    },

    /// Check external tools, config and catalog health
    Doctor,

    /// Repair catalog/runtime drift
    Reconcile,
}

#[derive(Debug, Subcommand)]
pub enum RepoSubcommand {
    /// Register a repository from a local path or clone a remote URL
    Add {
        /// Local path or remote URL (SSH, HTTPS, or SCP form)
        source: String,

        /// Repository name (defaults to the directory or URL tail)
        #[arg(short, long)]
        name: Option<String>,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a repository from the catalog (files are kept)
    Remove {
        /// Repository name or id
        target: String,

        /// Remove even while worktrees reference it
        #[arg(short, long)]
        force: bool,
    },

    /// List registered repositories
    List,
}

#[derive(Debug, Subcommand)]
pub enum WorktreeSubcommand {
    /// Create a worktree and bring its environment up
    Create {
        /// Repository name or id
        repo: String,

        /// Worktree name
        name: String,

        /// Branch to check out (defaults to <prefix><name>)
        #[arg(short, long)]
        branch: Option<String>,

        /// Base branch for a newly created branch
        #[arg(long)]
        base: Option<String>,

        /// Compose file relative to the worktree root
        #[arg(long)]
        compose_file: Option<String>,

        /// Compose services to start (defaults to the repo config)
        #[arg(long)]
        services: Vec<String>,

        /// Create only; don't start services or containers
        #[arg(long)]
        no_start: bool,

        /// Skip setup commands after the containers come up
        #[arg(long)]
        skip_setup: bool,

        /// Extra commands to run in the primary container after setup
        #[arg(long)]
        post_script: Vec<String>,
    },

    /// Start a stopped worktree
    Start {
        repo: String,
        name: String,
    },

    /// Stop a running worktree (shared services keep running)
    Stop {
        repo: String,
        name: String,
    },

    /// Remove a worktree: containers, git worktree, logs, catalog row
    Remove {
        repo: String,
        name: String,

        /// Skip the dirty/unpushed/unmerged safety checks
        #[arg(short, long)]
        force: bool,
    },

    /// List worktrees
    List {
        /// Limit to one repository
        #[arg(short, long)]
        repo: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServiceSubcommand {
    /// Start a shared service
    Start {
        name: String,
    },

    /// Stop a shared service (refused while worktrees reference it)
    Stop {
        name: String,

        /// Stop even while referenced
        #[arg(short, long)]
        force: bool,
    },

    /// Restart a shared service
    Restart {
        name: String,
    },

    /// List shared services with status and reference counts
    List,
}
