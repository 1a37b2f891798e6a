//! `helmcue chart` - convert a chart directory to a CUE module.

use std::path::Path;

use miette::{IntoDiagnostic, Result};

use helmcue_convert::{convert_chart, ChartOptions};

use crate::display;

pub fn run(chart_dir: &Path, out_dir: &Path, allow_duplicate_helpers: bool) -> Result<()> {
    let options = ChartOptions {
        allow_duplicate_helpers,
    };

    let report = convert_chart(chart_dir, out_dir, &options).into_diagnostic()?;

    display::print_warnings(&report.warnings);
    display::print_chart_summary(
        &report.chart_name,
        report.converted.len(),
        report.warnings.len(),
    );

    Ok(())
}
