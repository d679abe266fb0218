//! Terminal progress and confirmation for reconciliation passes.

use crate::ui;
use colored::Colorize;
use converge::{ConfirmCallback, Error, MutationPlan, MutationStep, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner with a message
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// One spinner per step while it runs
pub struct StepSpinner {
    current: Option<ProgressBar>,
    quiet: bool,
}

impl StepSpinner {
    pub fn new(quiet: bool) -> Self {
        Self {
            current: None,
            quiet,
        }
    }
}

impl ProgressCallback for StepSpinner {
    fn on_plan(&mut self, plan: &MutationPlan) {
        if self.quiet {
            return;
        }
        ui::header(&format!("Plan: {}", plan.resource.name()));
        match plan.fingerprint() {
            Ok(fingerprint) => ui::plan(plan, &fingerprint),
            Err(e) => log::warn!("could not fingerprint plan: {e}"),
        }
        println!();
    }

    fn on_step_start(&mut self, index: usize, total: usize, step: &MutationStep) {
        if self.quiet {
            return;
        }
        self.current = Some(spinner(&format!(
            "{} {}",
            format!("[{}/{total}]", index + 1).blue().bold(),
            step.describe()
        )));
    }

    fn on_step_complete(&mut self, _index: usize, step: &MutationStep) {
        if let Some(pb) = self.current.take() {
            pb.finish_and_clear();
        }
        if !self.quiet {
            println!("  {} {}", "✓".green(), step.describe());
        }
    }

    fn on_step_failed(&mut self, _index: usize, step: &MutationStep, error: &Error) {
        if let Some(pb) = self.current.take() {
            pb.finish_and_clear();
        }
        eprintln!("  {} {}: {}", "✗".red(), step.describe(), error);
    }
}

/// Ask on the terminal before executing a plan
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, plan: &MutationPlan) -> converge::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(format!("Execute {} step(s)?", plan.len()))
            .default(false)
            .interact()
            .or_else(|e| {
                log::warn!("cannot prompt for confirmation ({e}); pass --yes to apply");
                Ok(false)
            })
    }
}
