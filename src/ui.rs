use colored::Colorize;
use converge::{
    AttributeGroup, DeclaredConfiguration, DiffSet, InvariantViolation, MutationClass,
    MutationPlan, PowerState,
};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Reconciliation Output
// ============================================================================

fn class_label(class: MutationClass) -> String {
    match class {
        MutationClass::NoOp => "no change".dimmed().to_string(),
        MutationClass::InPlace => "in place".green().to_string(),
        MutationClass::RequiresInstanceRefresh => "needs refresh".yellow().to_string(),
        MutationClass::RequiresReplacement => "needs replacement".red().bold().to_string(),
    }
}

/// Print every invariant violation
pub fn violations(violations: &[InvariantViolation]) {
    for v in violations {
        println!("  {} {} {}", "✗".red(), v.rule.to_string().bold(), v.message);
    }
}

/// Print changed groups with their class; unchanged groups only when verbose
pub fn diff(diffs: &DiffSet, verbose: bool) {
    for entry in diffs.iter() {
        if !entry.changed && !verbose {
            continue;
        }
        let marker = if entry.changed {
            "~".yellow()
        } else {
            " ".normal()
        };
        println!(
            "  {} {:<28} {}",
            marker,
            entry.group.as_str(),
            class_label(entry.class)
        );
        if let Some(reason) = &entry.reason {
            println!("      {}", reason.dimmed());
        }
    }

    let summary = diffs.summary();
    if summary.has_changes() {
        println!();
        println!(
            "  {} in place, {} needing refresh, {} needing replacement",
            summary.in_place.to_string().green(),
            summary.refresh.to_string().yellow(),
            summary.replacement.to_string().red()
        );
    } else {
        println!("  {}", "No changes".dimmed());
    }
}

/// Print plan steps, notes and fingerprint
pub fn plan(plan: &MutationPlan, fingerprint: &str) {
    if let Some(power) = plan.original_power {
        kv("power", &power_label(power));
    }
    if plan.is_empty() {
        println!("  {}", "Nothing to do".dimmed());
    }
    for (index, step) in plan.steps.iter().enumerate() {
        println!(
            "  {} {}",
            format!("{}.", index + 1).blue().bold(),
            step.describe()
        );
    }
    for note in &plan.notes {
        println!("  {} {}", "note:".yellow(), note);
    }
    if !plan.is_empty() {
        println!();
        kv("fingerprint", fingerprint);
    }
}

pub fn power_label(power: PowerState) -> String {
    match power {
        PowerState::Running => power.as_str().green().to_string(),
        PowerState::Deallocated | PowerState::Stopped => power.as_str().blue().to_string(),
        PowerState::Stopping | PowerState::Deallocating => power.as_str().yellow().to_string(),
        PowerState::Unknown => power.as_str().red().to_string(),
    }
}

/// Show a line diff of one attribute group between two configurations
pub fn group_diff(group: AttributeGroup, before: &DeclaredConfiguration, after: &DeclaredConfiguration) {
    let (Ok(a), Ok(b)) = (before.group_value(group), after.group_value(group)) else {
        return;
    };
    let text_a = serde_json::to_string_pretty(&a).unwrap_or_default() + "\n";
    let text_b = serde_json::to_string_pretty(&b).unwrap_or_default() + "\n";

    println!("  {}", group.as_str().cyan());
    let diff = similar::TextDiff::from_lines(&text_a, &text_b);
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => print!("    {}", format!("- {change}").red()),
            similar::ChangeTag::Insert => print!("    {}", format!("+ {change}").green()),
            similar::ChangeTag::Equal => print!("    {}", format!("  {change}").dimmed()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_label_keeps_state_name() {
        colored::control::set_override(false);
        assert_eq!(power_label(PowerState::Deallocated), "deallocated");
        assert_eq!(class_label(MutationClass::InPlace), "in place");
    }
}
