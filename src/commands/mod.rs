//! Command implementations

pub mod apply;
pub mod diff;
pub mod plan;
pub mod status;
pub mod validate;

use crate::Context;
use crate::config::Config;
use crate::ui;
use anyhow::{Context as _, Result};
use armclient::ArmProvider;

/// Load the config named on the command line, or the default one
pub fn load_config(ctx: &Context) -> Result<Config> {
    Config::load(ctx.config_path.as_deref())
}

/// Build the REST provider from config
pub fn provider(config: &Config) -> Result<ArmProvider> {
    let arm = config.arm_config()?;
    log::debug!("using endpoint {}", arm.endpoint);
    ArmProvider::new(arm).context("Invalid provider configuration")
}

/// Print follow-up advice for a failed pass and convert the error
pub fn report(err: converge::Error) -> anyhow::Error {
    if let converge::Error::StepFailed {
        offline_instance: Some(instance),
        ..
    } = &err
    {
        ui::warn(&format!(
            "{instance} was powered off and not restarted; start it or re-run apply"
        ));
    }
    ui::dim(err.category().advice());
    anyhow::Error::new(err)
}
