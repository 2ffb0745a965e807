// Pretty-printing helpers for pages, control values and batch results.

use owo_colors::{OwoColorize, Stream};

use crate::executor::{BatchSummary, OperationResult};
use crate::registry::{self, Page};
use crate::session::{ControlKey, PageSession};
use crate::template::{IndexTuple, ParameterTemplate};

/// "input 3, channel 2" style label for a tuple on `page`. Empty on pages
/// without an instance axis.
pub fn tuple_label(page: Page, tuple: IndexTuple) -> String {
    let axes = page.axes();
    let mut parts = Vec::new();
    if let Some(axis) = axes.primary {
        parts.push(format!("{} {}", axis.name, tuple.primary));
    }
    if let (Some(axis), Some(secondary)) = (axes.secondary, tuple.secondary) {
        parts.push(format!("{} {}", axis.name, secondary));
    }
    parts.join(", ")
}

fn value_text(template: &ParameterTemplate, value: i64) -> String {
    match template.domain.label(value) {
        Some(label) => label.to_string(),
        None => value.to_string(),
    }
}

pub fn print_page_list() {
    for page in Page::ALL {
        let axes = page.axes();
        let mut addressing = Vec::new();
        if let Some(axis) = axes.primary {
            addressing.push(format!("{} 1-{}", axis.name, axis.count));
        }
        if let Some(axis) = axes.secondary {
            addressing.push(format!("{} 1-{}", axis.name, axis.count));
        }
        let addressing = if addressing.is_empty() {
            "single".to_string()
        } else {
            addressing.join(" x ")
        };
        let note = if page.ids_confirmed() { "" } else { "  provisional ids" };
        println!(
            "  {:<15} {:<22} {:>2} params  ({}){}",
            page.name(),
            page.title(),
            registry::templates_for_page(page).len(),
            addressing,
            note
        );
    }
}

pub fn print_page(page: Page) {
    println!("  {}", page.title().if_supports_color(Stream::Stdout, |t| t.yellow()));
    if !page.ids_confirmed() {
        println!(
            "  {}",
            "Provisional ids: not verified on a card. Apply needs --provisional."
                .if_supports_color(Stream::Stdout, |t| t.red())
        );
    }
    println!("  {:<36}  {:<14}  {:<18}  {:>7}  {}", "Name", "Pattern", "Range", "Default", "Group");
    println!("  {}  {}  {}  {}  {}", "-".repeat(36), "-".repeat(14), "-".repeat(18), "-------", "-----");
    for t in registry::templates_for_page(page) {
        println!(
            "  {:<36}  {:<14}  {:<18}  {:>7}  {}",
            t.name,
            t.pattern,
            t.domain.describe(),
            value_text(t, t.default),
            t.group.unwrap_or("")
        );
    }
}

/// Current values of `templates` in `session`, grouped by tuple. Controls the
/// session holds no value for are shown as not read.
pub fn print_values(session: &PageSession, templates: &[&ParameterTemplate]) {
    let page = session.page();
    for &tuple in session.tuples() {
        let label = tuple_label(page, tuple);
        if !label.is_empty() {
            println!("  {}", label.if_supports_color(Stream::Stdout, |t| t.bold()));
        }
        for &t in templates {
            match session.get(&ControlKey::new(t, tuple)) {
                Some(value) => println!("    {:<36} {}", t.name, value_text(t, value)),
                None => println!(
                    "    {:<36} {}",
                    t.name,
                    NOT_READ.if_supports_color(Stream::Stdout, |t| t.dimmed())
                ),
            }
        }
    }
}

const NOT_READ: &str = "(not read)";

/// Heading ("load transport error") and detail of a failed item.
fn item_error_parts(page: Page, result: &OperationResult) -> Option<(String, String)> {
    let Err(e) = &result.outcome else {
        return None;
    };
    let label = tuple_label(page, result.key.tuple);
    let place = if label.is_empty() {
        String::new()
    } else {
        format!(" [{}]", label)
    };
    Some((
        format!("{} {} error", result.kind, e.kind()),
        format!("{}{} ({}): {}", result.key.template, place, result.parameter_id, e),
    ))
}

/// One line per failed item.
pub fn print_item_error(page: Page, result: &OperationResult) {
    if let Some((heading, detail)) = item_error_parts(page, result) {
        eprintln!("  {} {}", heading.if_supports_color(Stream::Stderr, |t| t.red()), detail);
    }
}

pub fn print_summary(summary: &BatchSummary) {
    let verb = match summary.kind {
        crate::executor::OperationKind::Load => "Loaded",
        crate::executor::OperationKind::Apply => "Applied",
    };
    let line = format!(
        "{} {}/{} parameters on page {}",
        verb, summary.succeeded, summary.total, summary.page
    );
    if summary.failed == 0 && !summary.cancelled {
        println!("{}", line.if_supports_color(Stream::Stdout, |t| t.green()));
    } else {
        let mut extra = Vec::new();
        if summary.failed > 0 {
            extra.push(format!("{} failed", summary.failed));
        }
        if summary.cancelled {
            extra.push("cancelled".to_string());
        }
        let line = format!("{} ({})", line, extra.join(", "));
        println!("{}", line.if_supports_color(Stream::Stdout, |t| t.yellow()));
    }
}
