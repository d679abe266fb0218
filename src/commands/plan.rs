//! `vmconverge plan` - compute and print a plan without mutating

use super::{load_config, provider, report};
use crate::cli::PlanArgs;
use crate::{Context, declared, progress, ui};
use anyhow::Result;
use converge::{LockRegistry, ReconciliationContext, ResourceId};

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let declared = declared::load(&args.declared)?;
    let provider = provider(&config)?;
    let locks = LockRegistry::new();
    let rctx = ReconciliationContext::new(&provider, &locks)
        .with_options(config.reconcile_options(args.leave_offline));
    let id = ResourceId::new(args.id);

    let pb = (!ctx.quiet).then(|| progress::spinner(&format!("Reading {}", id.name())));
    let result = converge::prepare(&rctx, &id, &declared);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let Some(pass) = result.map_err(report)? else {
        ui::warn(&format!("{id} does not exist; nothing to plan"));
        return Ok(());
    };

    ui::header(&format!("Plan: {}", id.name()));
    ui::diff(&pass.diffs, ctx.verbose > 0);
    if ctx.verbose > 0 {
        println!();
        for entry in pass.diffs.changed() {
            ui::group_diff(entry.group, &pass.observed.configuration, &declared);
        }
    }
    println!();
    ui::plan(&pass.plan, &pass.plan.fingerprint()?);
    Ok(())
}
