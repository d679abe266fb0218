//! `vmconverge apply` - one full reconciliation pass

use super::{load_config, provider, report};
use crate::cli::ApplyArgs;
use crate::progress::{PromptConfirm, StepSpinner};
use crate::{Context, declared, ui};
use anyhow::Result;
use colored::Colorize;
use converge::{AutoConfirm, ConfirmCallback, LockRegistry, PassOutcome, ReconciliationContext, ResourceId};

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let declared = declared::load(&args.declared)?;
    let provider = provider(&config)?;
    let locks = LockRegistry::new();

    let mut options = config.reconcile_options(args.leave_offline);
    options.dry_run = args.dry_run;
    options.expected_fingerprint = args.expect_plan;
    let rctx = ReconciliationContext::new(&provider, &locks).with_options(options);
    let id = ResourceId::new(args.id);

    let mut progress = StepSpinner::new(ctx.quiet);
    let mut confirm: Box<dyn ConfirmCallback> = if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(PromptConfirm)
    };

    let outcome = converge::reconcile(&rctx, &id, &declared, &mut progress, confirm.as_mut())
        .map_err(report)?;

    match outcome {
        PassOutcome::Absent => ui::warn(&format!("{id} does not exist; nothing to apply")),
        PassOutcome::Unchanged => ui::success(&format!("{} is up to date", id.name())),
        PassOutcome::Planned(_) => {
            println!();
            ui::info("Dry run - no changes made");
        }
        PassOutcome::Declined(_) => {
            println!();
            println!("  {} Aborted", "✗".red());
        }
        PassOutcome::Applied { plan, report: summary } => {
            println!();
            ui::success(&format!(
                "Applied {} step(s) to {} in {:.1}s",
                summary.completed.len(),
                id.name(),
                summary.elapsed.as_secs_f64()
            ));
            for note in &plan.notes {
                ui::dim(&note.to_string());
            }
        }
    }
    Ok(())
}
