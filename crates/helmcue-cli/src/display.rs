//! Terminal output helpers.

use console::style;
use helmcue_convert::ConversionWarning;

/// Prints per-template warnings to stderr as single lines.
pub fn print_warnings(warnings: &[ConversionWarning]) {
    for w in warnings {
        eprintln!("{} {}", style("warning:").yellow().bold(), w);
    }
}

/// Prints the chart conversion summary to stderr.
pub fn print_chart_summary(chart_name: &str, converted: usize, skipped: usize) {
    eprintln!(
        "{} {}/{} templates from {}",
        style("converted").green().bold(),
        converted,
        converted + skipped,
        chart_name,
    );
}
