use clap::{Parser, Subcommand, ValueEnum};
use janitor_core::model::ScanOperation;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "janitor")]
#[command(about = "Find duplicates, sort files by rule, and keep an audit trail", long_about = None)]
pub struct Cli {
    /// Give up on long-running filesystem work after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find duplicate files under a directory (or the configured scan paths)
    Duplicates {
        directory: Option<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
        /// Print the groups as a JSON delete request to edit and feed back to `delete`
        #[arg(long)]
        json: bool,
    },
    /// Delete the selected members of duplicate groups
    Delete {
        /// JSON delete request; `-` reads stdin
        #[arg(short, long)]
        input: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Scan a directory and run one follow-up operation
    Scan {
        directory: String,
        #[arg(short, long)]
        recursive: bool,
        #[arg(short, long, value_enum, default_value_t = OperationArg::None)]
        operation: OperationArg,
    },
    /// Bucket files by the categorization rules
    Categorize {
        directory: Option<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Move categorized files into one folder per category
    Organize {
        directory: Option<PathBuf>,
        #[arg(long)]
        into: PathBuf,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Manage categorization rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Show or replace the default scan paths
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Show the audit log, newest first
    Logs {
        /// SCAN, DELETE, MOVE, CATEGORIZE, INFO, RULE_CHANGE, CONFIG_CHANGE or ALL
        #[arg(short, long)]
        action: Option<String>,
        /// UTC day, YYYY-MM-DD
        #[arg(short, long)]
        date: Option<String>,
        /// Write the matching entries as CSV to this file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Mail the exported audit log
    SendReport {
        email: String,
        /// Validate only; send nothing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List rules in evaluation order
    List,
    /// Add a rule or change the category of an existing pattern
    Add { pattern: String, category: String },
    /// Remove the rule with this exact pattern
    Remove { pattern: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the current configuration as JSON
    Show,
    /// Replace the default scan paths
    Set {
        #[arg(required = true)]
        scan_paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    None,
    /// Report duplicate groups; removing them goes through `delete`
    DeleteDuplicates,
    CategorizeFiles,
}

impl From<OperationArg> for ScanOperation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::None => ScanOperation::None,
            OperationArg::DeleteDuplicates => ScanOperation::DeleteDuplicates,
            OperationArg::CategorizeFiles => ScanOperation::CategorizeFiles,
        }
    }
}
