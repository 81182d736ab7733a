mod commands;
mod logging;
mod progress;

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ConfigCommand, RulesCommand};
use dotenv::dotenv;
use janitor_core::actions::{Completion, DeleteRequest};
use janitor_core::audit::{self, AuditQuery};
use janitor_core::model::{CleanerConfig, ReportRequest, ScanRequest};
use janitor_core::report::{OutboxMailer, ReportStatus};
use janitor_core::rules::RuleChange;
use janitor_core::{Audited, CancelToken, Janitor};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match janitor_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    let janitor = match Janitor::open(config) {
        Ok(janitor) => janitor,
        Err(err) => {
            error!("Error opening database: {}", err);
            process::exit(1);
        }
    };
    let cancel = match args.timeout {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    if let Err(err) = run(&janitor, command, &cancel) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run(janitor: &Janitor, command: Commands, cancel: &CancelToken) -> Result<()> {
    let reporter = CliReporter::new();

    match command {
        Commands::Duplicates {
            directory,
            recursive,
            json,
        } => {
            let found = janitor.find_duplicates(directory.as_deref(), recursive, cancel, &reporter)?;
            let scan = report_audit(found);
            if json {
                let body = serde_json::json!({ "duplicateGroups": scan.groups });
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }
            for group in &scan.groups {
                println!("{} ({} bytes each)", group.hash.yellow(), group.size);
                for file in &group.files {
                    println!("    {}", file.path.display());
                }
            }
            info!(
                "{} duplicate groups, {} files scanned, {} bytes wasted",
                format!("{}", scan.groups.len()).red(),
                format!("{}", scan.files_scanned).green(),
                format!("{}", scan.wasted_bytes()).red(),
            );
            for skipped in &scan.skipped {
                warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            for unreadable in &scan.unreadable {
                warn!("Unreadable {}: {}", unreadable.path.display(), unreadable.reason);
            }
        }
        Commands::Delete { input, yes } => {
            let request: DeleteRequest = serde_json::from_str(&read_input(&input)?)
                .context("delete request is not valid JSON")?;
            let selected: usize = request
                .duplicate_groups
                .iter()
                .map(|g| g.files.iter().filter(|f| f.selected).count())
                .sum();
            if selected == 0 {
                println!("Nothing selected.");
                return Ok(());
            }
            let prompt = format!("Delete {} selected files?", selected);
            if !yes && !prompt_confirm(&prompt, Some(false))? {
                return Ok(());
            }

            let deleted = janitor.delete_duplicates(&request, cancel, &reporter);
            reporter.finish_bar();
            let report = report_audit(deleted);
            for path in &report.deleted {
                println!("{} {}", "deleted".green(), path.display());
            }
            for (path, reason) in &report.skipped {
                println!("{} {} ({})", "skipped".yellow(), path.display(), reason);
            }
            for (path, reason) in &report.failed {
                println!("{} {} ({})", "failed".red(), path.display(), reason);
            }
            match report.completion() {
                Completion::Complete => info!("Deletion {}", "complete".green()),
                Completion::Partial => warn!("Deletion {}", "partially complete".yellow()),
            }
        }
        Commands::Scan {
            directory,
            recursive,
            operation,
        } => {
            let request = ScanRequest {
                directory_path: directory,
                recursive,
                operation: operation.into(),
            };
            let response = report_audit(janitor.run_scan(&request, cancel, &reporter)?);
            println!("{}", response.message);
        }
        Commands::Categorize {
            directory,
            recursive,
            json,
        } => {
            let categorized = janitor.categorize(directory.as_deref(), recursive, cancel, &reporter)?;
            let categorization = report_audit(categorized);
            if json {
                println!("{}", serde_json::to_string_pretty(&categorization)?);
                return Ok(());
            }
            for bucket in &categorization.buckets {
                println!("{} ({})", bucket.name.cyan(), bucket.files.len());
                for file in &bucket.files {
                    println!("    {}", file.path.display());
                }
            }
        }
        Commands::Organize {
            directory,
            into,
            recursive,
        } => {
            let organized =
                janitor.organize(directory.as_deref(), recursive, &into, cancel, &reporter)?;
            let report = report_audit(organized);
            for moved in &report.moved {
                println!("{} {} -> {}", "moved".green(), moved.from.display(), moved.to.display());
            }
            for (path, reason) in &report.failed {
                println!("{} {} ({})", "failed".red(), path.display(), reason);
            }
            if !report.not_attempted.is_empty() {
                warn!("{} files not attempted", report.not_attempted.len());
            }
        }
        Commands::Rules { command } => run_rules(janitor, command)?,
        Commands::Config { command } => run_config(janitor, command)?,
        Commands::Logs { action, date, csv } => {
            let query = AuditQuery::parse(action.as_deref(), date.as_deref())?;
            let entries = janitor.logs(&query)?;
            match csv {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    audit::export_csv(&entries, file)?;
                    info!("Wrote {} entries to {}", entries.len(), path.display());
                }
                None => print!("{}", audit::export(&entries)),
            }
        }
        Commands::SendReport { email, dry_run } => {
            let mailer = OutboxMailer::new(&janitor.config().outbox_dir);
            let request = ReportRequest {
                email,
                send_email: !dry_run,
            };
            match report_audit(janitor.send_report(&request, &mailer)?) {
                ReportStatus::Sent { entries } => {
                    println!("Queued {} log entries for {}", entries, request.email.green())
                }
                ReportStatus::NotRequested => println!("Address is valid; nothing sent"),
            }
        }
    }

    Ok(())
}

fn run_rules(janitor: &Janitor, command: RulesCommand) -> Result<()> {
    match command {
        RulesCommand::List => {
            for (i, rule) in janitor.list_rules().iter().enumerate() {
                println!("{:>3}. {} -> {}", i + 1, rule.pattern.yellow(), rule.category.cyan());
            }
        }
        RulesCommand::Add { pattern, category } => {
            match report_audit(janitor.upsert_rule(&pattern, &category)?) {
                RuleChange::Inserted => println!("Added '{}' -> '{}'", pattern, category),
                RuleChange::Updated { previous } => {
                    println!("Updated '{}': '{}' -> '{}'", pattern, previous, category)
                }
            }
        }
        RulesCommand::Remove { pattern } => {
            if report_audit(janitor.remove_rule(&pattern)?) {
                println!("Removed '{}'", pattern);
            } else {
                println!("No rule '{}'", pattern);
            }
        }
    }
    Ok(())
}

fn run_config(janitor: &Janitor, command: ConfigCommand) -> Result<()> {
    let config = match command {
        ConfigCommand::Show => janitor.get_config(),
        ConfigCommand::Set { scan_paths } => {
            let incoming = CleanerConfig {
                scan_paths,
                rules: Vec::new(),
            };
            report_audit(janitor.update_config(&incoming)?)
        }
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Surface audit append failures without failing the command.
fn report_audit<T>(result: Audited<T>) -> T {
    for failure in &result.audit_failures {
        warn!("{} {}", "Audit log write failed:".yellow(), failure);
    }
    result.into_inner()
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
