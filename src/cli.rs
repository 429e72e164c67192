use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "mdimg",
    version,
    about = "Repair dangling image references in Markdown documents, with journaled undo"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct WorkspaceArg {
    /// Workspace root containing the documents and the backup directory.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Print the report as JSON instead of key=value lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve and rewrite dangling references listed in a scan manifest.
    Repair {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        manifest: PathBuf,
        /// Resolve and report only; no snapshots, no writes.
        #[arg(long)]
        dry_run: bool,
        /// Skip the post-repair rescan.
        #[arg(long)]
        no_verify: bool,
    },
    /// Restore documents from the most recent (or the given) backup session.
    Undo {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
    /// List backup sessions.
    Sessions {
        #[command(flatten)]
        ws: WorkspaceArg,
    },
    /// Rescan the manifest's documents for references that still dangle.
    Verify {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Delete old backup sessions, keeping the newest ones.
    Prune {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long, default_value_t = commands::prune::DEFAULT_KEEP)]
        keep: usize,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "issues" }
    );
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    crate::logging::init();
    let cli = Cli::parse();

    let (report, json) = match cli.command {
        Command::Repair {
            ws,
            manifest,
            dry_run,
            no_verify,
        } => (
            commands::repair::run(&commands::repair::RepairOptions {
                workspace: ws.workspace,
                manifest,
                dry_run,
                verify: !no_verify,
            })?,
            ws.json,
        ),
        Command::Undo { ws, backup_dir } => (
            commands::undo::run(&commands::undo::UndoOptions {
                workspace: ws.workspace,
                backup_dir,
            })?,
            ws.json,
        ),
        Command::Sessions { ws } => (
            commands::sessions::run(&commands::sessions::SessionsOptions {
                workspace: ws.workspace,
            })?,
            ws.json,
        ),
        Command::Verify { ws, manifest } => (
            commands::verify::run(&commands::verify::VerifyOptions {
                workspace: ws.workspace,
                manifest,
            })?,
            ws.json,
        ),
        Command::Prune { ws, keep } => (
            commands::prune::run(&commands::prune::PruneOptions {
                workspace: ws.workspace,
                keep,
            })?,
            ws.json,
        ),
    };

    print_report(&report, json)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}
