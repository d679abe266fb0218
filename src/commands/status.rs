//! `vmconverge status` - observed power state of an instance

use super::{load_config, provider};
use crate::{Context, ui};
use anyhow::Result;
use converge::{PowerState, Provider, ResourceId};

pub fn run(ctx: &Context, id: &str) -> Result<()> {
    let config = load_config(ctx)?;
    let provider = provider(&config)?;
    let id = ResourceId::new(id);

    let statuses = provider.list_instance_statuses(&id)?;
    let power = PowerState::from_statuses(&statuses);

    ui::header(&format!("Status: {}", id.name()));
    ui::kv("power", &ui::power_label(power));
    if ctx.verbose > 0 || power == PowerState::Unknown {
        for status in &statuses {
            let time = status
                .time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            ui::dim(&format!("{:<32} {}", status.code, time));
        }
    }
    Ok(())
}
