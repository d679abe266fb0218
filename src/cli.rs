use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vmconverge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge cloud VMs, scale sets and managed disks to a declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/vmconverge/config.toml)
    #[arg(short, long, global = true, env = "VMCONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a declared configuration against every invariant
    Validate {
        /// Declared configuration (TOML or JSON)
        declared: PathBuf,
    },

    /// Classify the changes between two declared configurations (offline)
    Diff {
        /// Previous configuration
        previous: PathBuf,
        /// New configuration
        declared: PathBuf,
    },

    /// Show the mutation plan for a resource without changing anything
    Plan(PlanArgs),

    /// Converge a resource to its declared configuration
    Apply(ApplyArgs),

    /// Show the observed power state of an instance
    Status {
        /// Resource id
        id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Resource id
    pub id: String,

    /// Declared configuration (TOML or JSON)
    pub declared: PathBuf,

    /// Leave the instance deallocated after a disk change
    #[arg(long)]
    pub leave_offline: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Resource id
    pub id: String,

    /// Declared configuration (TOML or JSON)
    pub declared: PathBuf,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would happen without making changes
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Leave the instance deallocated after a disk change
    #[arg(long)]
    pub leave_offline: bool,

    /// Only execute if the plan fingerprint matches (from `vmconverge plan`)
    #[arg(long, value_name = "FINGERPRINT")]
    pub expect_plan: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "vmconverge",
            "-vv",
            "apply",
            "/vms/web-0",
            "web-0.toml",
            "--yes",
            "--expect-plan",
            "abc123",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.yes);
        assert!(!args.dry_run);
        assert_eq!(args.expect_plan.as_deref(), Some("abc123"));
    }
}
