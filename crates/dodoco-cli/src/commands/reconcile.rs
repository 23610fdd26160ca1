//! `dodoco reconcile-all` — Reconcile every record against the engine.

use clap::Args;

use super::Context;
use crate::output;

/// Arguments for the `reconcile-all` command.
#[derive(Args, Debug)]
pub struct ReconcileAllArgs {
    /// Exit with an error if any record could not be checked.
    #[arg(long)]
    pub strict: bool,
}

/// Executes the `reconcile-all` command.
///
/// # Errors
///
/// Returns an error if the sweep cannot run, or in strict mode if any
/// record failed.
pub fn execute(ctx: &Context, args: &ReconcileAllArgs) -> anyhow::Result<()> {
    let report = ctx.orchestrator.reconcile_all()?;
    if ctx.json {
        output::print_json(&report)?;
    } else {
        println!(
            "kept {}, removed {}, failed {}",
            report.kept,
            report.removed.len(),
            report.failed.len()
        );
        for failure in &report.failed {
            println!("  {}: {}", failure.id, failure.error);
        }
    }
    if args.strict && !report.failed.is_empty() {
        anyhow::bail!("{} records could not be reconciled", report.failed.len());
    }
    Ok(())
}
