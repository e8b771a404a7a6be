//! Output formatting - plain ASCII, colored only on a terminal
//!
//! Color is dropped when stdout is not a TTY or `NO_COLOR` is set. JSON
//! output never goes through these helpers.

use nlcmd_common::display_format::{pad_right, truncate_str};
use nlcmd_common::{ActionSchema, RouteOutcome, ValidationErrors};
use owo_colors::OwoColorize;
use std::io::IsTerminal;

/// Whether stdout should carry ANSI colors
pub fn use_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

fn paint(text: &str, color: bool, f: impl Fn(&str) -> String) -> String {
    if color {
        f(text)
    } else {
        text.to_string()
    }
}

pub fn ok_label(text: &str) -> String {
    paint(text, use_color(), |t| t.bright_green().to_string())
}

pub fn warn_label(text: &str) -> String {
    paint(text, use_color(), |t| t.yellow().to_string())
}

pub fn error_label(text: &str) -> String {
    paint(text, use_color(), |t| t.bright_red().to_string())
}

pub fn dim(text: &str) -> String {
    paint(text, use_color(), |t| t.dimmed().to_string())
}

/// Display an error on stderr
pub fn display_error(message: &str) {
    eprintln!("[ERROR] {}", error_label(message));
}

/// One line per action: id, risk, returned shape, description
pub fn render_catalog(schemas: &[&ActionSchema]) -> String {
    let width = schemas.iter().map(|s| s.id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for schema in schemas {
        out.push_str(&format!(
            "{}  {:<6}  {:<8}  {}\n",
            pad_right(&schema.id, width),
            schema.risk.as_str(),
            schema.returns.as_str(),
            truncate_str(&schema.description, 60)
        ));
        for param in &schema.params {
            let required = if param.required { "required" } else { "optional" };
            out.push_str(&format!(
                "    {} : {} ({})\n",
                param.name,
                param.param_type.as_str(),
                required
            ));
        }
    }
    out
}

/// Violations, one per line, under a count header
pub fn render_violations(errors: &ValidationErrors) -> String {
    let mut out = format!("{} {} violation(s)\n", error_label("[REJECTED]"), errors.len());
    for violation in errors.iter() {
        out.push_str(&format!("  * {}\n", violation));
    }
    out
}

/// Route line printed above a routed result in text mode
pub fn render_route(outcome: &RouteOutcome) -> String {
    let route = outcome.route.as_str();
    let label = if outcome.fallback_used() {
        warn_label(route)
    } else {
        ok_label(route)
    };
    match &outcome.planning_error {
        Some(reason) => format!("route: {}  {}", label, dim(&format!("(planner: {})", reason))),
        None => format!("route: {}", label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlcmd_common::builtin_schemas;

    #[test]
    fn test_catalog_lists_every_action() {
        let schemas = builtin_schemas();
        let refs: Vec<&ActionSchema> = schemas.iter().collect();
        let text = render_catalog(&refs);

        for schema in &schemas {
            assert!(text.contains(&schema.id), "missing {}", schema.id);
        }
        assert!(text.contains("container : string (required)"));
    }
}
