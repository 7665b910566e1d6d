//! Plain output for `--list` and `--dry-run`; neither touches the database.

use console::style;

use crate::plan::{Plan, Step};
use crate::sql::{contains_view_creation, split_statements};

/// Print every step of the plan, marking the selected ones.
pub fn print_plan(plan: &Plan, selected: &[&Step]) {
    println!(
        "{}",
        style(format!("Execution plan ({} steps):", plan.len())).bold()
    );
    for step in plan.steps() {
        let marker = if selected.iter().any(|s| s.ordinal == step.ordinal) {
            style("▶").green().bold()
        } else {
            style(" ").dim()
        };
        let statements = split_statements(&step.sql_body).len();
        let kind = if contains_view_creation(&step.sql_body) {
            "view"
        } else {
            "sql"
        };
        println!(
            "{} {:>3}. {} {}",
            marker,
            step.ordinal,
            step.name,
            style(format!("[{}, {} statement(s)]", kind, statements)).dim()
        );
    }
}

/// Print the selected steps and each statement they would run.
pub fn print_dry_run(selected: &[&Step]) {
    println!(
        "{}",
        style(format!("Dry run: {} step(s) selected", selected.len())).bold()
    );
    for step in selected {
        println!();
        println!(
            "{} {}",
            style(format!("Step {}:", step.ordinal)).yellow().bold(),
            step.name
        );
        for (idx, stmt) in split_statements(&step.sql_body).iter().enumerate() {
            println!("  {} {};", style(format!("[{}]", idx + 1)).dim(), stmt);
        }
    }
}
