//! `vmconverge diff` - offline classification of two declared files

use crate::Context;
use crate::{declared, ui};
use anyhow::Result;
use std::path::Path;

pub fn run(ctx: &Context, previous: &Path, next: &Path) -> Result<()> {
    let before = declared::load(previous)?;
    let after = declared::load(next)?;
    let diffs = converge::classify(&before, &after);

    ui::header(&format!("Diff: {} ({})", after.name, after.kind));
    ui::diff(&diffs, ctx.verbose > 0);

    if ctx.verbose > 0 {
        println!();
        for entry in diffs.changed() {
            ui::group_diff(entry.group, &before, &after);
        }
    }

    let violations = converge::validate(&after);
    if !violations.is_empty() {
        println!();
        ui::warn(&format!(
            "{} does not pass validation and cannot be applied:",
            next.display()
        ));
        ui::violations(&violations);
    }
    Ok(())
}
