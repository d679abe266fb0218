//! `vmconverge validate`

use crate::Context;
use crate::{declared, ui};
use anyhow::{Result, bail};
use std::path::Path;

pub fn run(ctx: &Context, path: &Path) -> Result<()> {
    let config = declared::load(path)?;
    let violations = converge::validate(&config);

    if violations.is_empty() {
        if !ctx.quiet {
            ui::success(&format!("{} ({}) is valid", config.name, config.kind));
        }
        return Ok(());
    }

    ui::error(&format!(
        "{} violates {} invariant(s):",
        path.display(),
        violations.len()
    ));
    ui::violations(&violations);
    bail!("validation failed")
}
