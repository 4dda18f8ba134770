//! Restore command handler

use std::io::{self, IsTerminal, Write};
use std::path::Path;

use anyhow::Result;

use inkbook_core::{Principal, RestoreOptions, RestoreRequest, Vault};

use crate::output::{Output, OutputFormat};

pub struct RestoreArgs {
    /// Snapshot id, `latest`, or an archive path
    pub target: String,
    pub snapshot_id: Option<String>,
    pub verify: bool,
    pub safety_snapshot: bool,
    pub force: bool,
}

/// Archive paths end in `.zip` or name an existing file
fn is_archive_target(target: &str) -> bool {
    let path = Path::new(target);
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        || path.is_file()
}

fn build_request(args: &RestoreArgs) -> Result<RestoreRequest> {
    let mut request = if is_archive_target(&args.target) {
        RestoreRequest::archive(&args.target, args.snapshot_id.clone())
    } else {
        if args.snapshot_id.is_some() {
            anyhow::bail!("--snapshot-id only applies when restoring from an archive");
        }
        RestoreRequest::snapshot(&args.target)
    };
    request.verify_checksum = args.verify;
    Ok(request)
}

/// Ask for confirmation on an interactive terminal; anything else declines
fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

/// Replace the live database with a snapshot or archived snapshot
pub fn run(vault: &Vault, principal: &Principal, args: RestoreArgs, output: &Output) -> Result<()> {
    let request = build_request(&args)?;

    if output.should_prompt() && !args.force {
        println!("Restore {} over {}", args.target, vault.engine().path().display());
        println!("WARNING: This replaces ALL current studio data.");
        if args.safety_snapshot {
            println!("A safety snapshot of the current database is taken first.");
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled. Re-run with --force to skip this prompt.");
            return Ok(());
        }
    }

    let report = vault.restore(
        principal,
        &request,
        RestoreOptions {
            safety_snapshot: args.safety_snapshot,
        },
    )?;

    match output.format {
        OutputFormat::Json => output.json(&report)?,
        OutputFormat::Quiet => println!("{}", report.snapshot_id),
        OutputFormat::Human => {
            output.success(&format!("Restored snapshot {}", report.snapshot_id));
            println!("  Schema version: {}", report.schema_version);
            if let Some(ref safety) = report.safety_snapshot {
                println!("  Previous database saved as snapshot {}", safety);
            }
            if let Some(ref kept) = report.previous_database {
                println!("  Previous database file kept at {}", kept.display());
            }
        }
    }
    Ok(())
}
