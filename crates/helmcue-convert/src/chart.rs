//! Chart conversion: discovers templates and helpers in a Helm chart
//! directory, converts each template, merges the results, and writes a
//! CUE module.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{ConversionWarning, ConvertError, Result};
use crate::helpers::parse_helpers;
use crate::schema::FieldDefault;
use crate::{convert_structured, cue, helm, schema, validate, ConvertResult};

/// Options for chart conversion.
#[derive(Debug, Clone, Default)]
pub struct ChartOptions {
    /// Allow conflicting helper definitions across files; the last
    /// definition wins with a warning.
    pub allow_duplicate_helpers: bool,
}

/// Summary of a chart conversion.
#[derive(Debug)]
pub struct ChartReport {
    pub chart_name: String,
    /// Template file names converted successfully, in emission order.
    pub converted: Vec<String>,
    /// Per-template (and helper) warnings.
    pub warnings: Vec<ConversionWarning>,
}

/// Parsed Chart.yaml metadata.
#[derive(Debug, Clone, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default, rename = "appVersion")]
    app_version: String,
}

/// Converts a Helm chart directory to a CUE module in `out_dir`.
pub fn convert_chart(chart_dir: &Path, out_dir: &Path, options: &ChartOptions) -> Result<ChartReport> {
    if !chart_dir.exists() {
        return Err(ConvertError::DirectoryNotFound(chart_dir.to_path_buf()));
    }

    let meta_path = chart_dir.join("Chart.yaml");
    if !meta_path.exists() {
        return Err(ConvertError::FileNotFound(meta_path));
    }
    let meta_src = fs::read_to_string(&meta_path)?;
    let meta: ChartMetadata = serde_yaml::from_str(&meta_src)
        .map_err(|e| ConvertError::Input(format!("parsing Chart.yaml: {e}")))?;
    if meta.name.is_empty() {
        return Err(ConvertError::Input("Chart.yaml: missing name".to_string()));
    }

    let pkg_name = sanitize_package_name(&meta.name);
    let cfg = helm::helm_config();

    // Helpers: templates/*.tpl plus charts/*/templates/**/*.tpl.
    let helper_files = collect_helper_files(chart_dir);
    let mut helper_sources = Vec::with_capacity(helper_files.len());
    for f in &helper_files {
        helper_sources.push(fs::read_to_string(f)?);
    }
    let helper_refs: Vec<&str> = helper_sources.iter().map(String::as_str).collect();
    let (mut tree_set, mut warnings) =
        parse_helpers(&helper_refs, options.allow_duplicate_helpers)?;

    // Main templates: templates/*.yaml|*.yml, sorted, skipping NOTES.txt.
    let template_files = collect_template_files(chart_dir);

    struct TemplateResult {
        field_name: String,
        filename: String,
        result: ConvertResult,
    }
    let mut results: Vec<TemplateResult> = Vec::new();

    for path in &template_files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warnings.push(ConversionWarning::new(&filename, e.to_string()));
                continue;
            }
        };

        let r = match convert_structured(&cfg, &content, &mut tree_set) {
            Ok(r) => r,
            Err(e) => {
                warnings.push(ConversionWarning::new(&filename, e.to_string()));
                continue;
            }
        };

        if let Err(e) = validate::validate_template_body(&r.body, &r.top_level_guards) {
            warnings.push(ConversionWarning::new(&filename, e.to_string()));
            continue;
        }

        results.push(TemplateResult {
            field_name: template_field_name(&filename),
            filename,
            result: r,
        });
    }

    if results.is_empty() {
        return Err(ConvertError::Input(
            "no templates converted successfully".to_string(),
        ));
    }

    // Merge bags across all successful results.
    let mut merged_context_objects: BTreeSet<String> = BTreeSet::new();
    let mut merged_field_refs: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    let mut merged_required_refs: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    let mut merged_range_refs: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    let mut merged_defaults: HashMap<String, Vec<FieldDefault>> = HashMap::new();
    let mut merged_imports: BTreeSet<String> = BTreeSet::new();
    let mut merged_used_helpers: BTreeMap<String, crate::HelperDef> = BTreeMap::new();
    let mut needs_nonzero = false;
    let mut has_dynamic_include = false;

    for tr in &results {
        let r = &tr.result;
        merged_context_objects.extend(r.used_context_objects.iter().cloned());
        for (k, v) in &r.field_refs {
            merged_field_refs
                .entry(k.clone())
                .or_default()
                .extend(v.iter().cloned());
        }
        for (k, v) in &r.required_refs {
            merged_required_refs
                .entry(k.clone())
                .or_default()
                .extend(v.iter().cloned());
        }
        for (k, v) in &r.range_refs {
            merged_range_refs
                .entry(k.clone())
                .or_default()
                .extend(v.iter().cloned());
        }
        for (k, v) in &r.defaults {
            merged_defaults
                .entry(k.clone())
                .or_default()
                .extend(v.iter().cloned());
        }
        merged_imports.extend(r.imports.iter().cloned());
        for (k, v) in &r.used_helpers {
            merged_used_helpers.insert(k.clone(), v.clone());
        }
        needs_nonzero |= r.needs_nonzero;
        has_dynamic_include |= r.has_dynamic_include;
    }

    // Helper compilation state is shared through the tree set; the last
    // result saw every define.
    let helper_result = &results.last().expect("nonempty results").result;

    fs::create_dir_all(out_dir.join("cue.mod"))?;

    let module_cue = format!(
        "module: \"helm.local/{}\"\nlanguage: version: \"v0.12.0\"\n",
        meta.name
    );
    fs::write(out_dir.join("cue.mod").join("module.cue"), module_cue)?;

    write_helpers_cue(
        out_dir,
        &pkg_name,
        helper_result,
        &merged_imports,
        &merged_used_helpers,
        needs_nonzero,
        has_dynamic_include,
        &mut warnings,
    )?;

    let empty_refs = Vec::new();
    let empty_defaults = Vec::new();
    write_values_cue(
        out_dir,
        &pkg_name,
        merged_field_refs.get("Values").unwrap_or(&empty_refs),
        merged_defaults.get("Values").unwrap_or(&empty_defaults),
        merged_required_refs.get("Values").unwrap_or(&empty_refs),
        merged_range_refs.get("Values").unwrap_or(&empty_refs),
    )?;

    write_context_cue(out_dir, &pkg_name, &meta, &merged_context_objects)?;

    for tr in &results {
        write_template_cue(out_dir, &pkg_name, &tr.field_name, &tr.result)?;
    }

    write_results_cue(out_dir, &pkg_name, &results.iter().map(|r| r.field_name.clone()).collect::<Vec<_>>())?;

    // Carry values.yaml alongside the module when present.
    let values_path = chart_dir.join("values.yaml");
    if values_path.exists() {
        fs::copy(&values_path, out_dir.join("values.yaml"))?;
    }

    Ok(ChartReport {
        chart_name: meta.name,
        converted: results.into_iter().map(|r| r.filename).collect(),
        warnings,
    })
}

fn collect_helper_files(chart_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let templates = chart_dir.join("templates");
    if templates.is_dir() {
        if let Ok(entries) = fs::read_dir(&templates) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("tpl") {
                    files.push(path);
                }
            }
        }
    }

    // Subchart helpers, including nested directories such as
    // charts/common/templates/validations/*.tpl.
    let charts = chart_dir.join("charts");
    if charts.is_dir() {
        if let Ok(entries) = fs::read_dir(&charts) {
            for entry in entries.flatten() {
                let sub_templates = entry.path().join("templates");
                if !sub_templates.is_dir() {
                    continue;
                }
                for e in WalkDir::new(&sub_templates)
                    .follow_links(true)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = e.path();
                    if path.is_file()
                        && path.extension().and_then(|x| x.to_str()) == Some("tpl")
                    {
                        files.push(path.to_path_buf());
                    }
                }
            }
        }
    }

    files.sort();
    files
}

fn collect_template_files(chart_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let templates = chart_dir.join("templates");
    if let Ok(entries) = fs::read_dir(&templates) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("yaml") | Some("yml")) {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("NOTES.txt") {
                continue;
            }
            files.push(path);
        }
    }
    files.sort();
    files
}

#[allow(clippy::too_many_arguments)]
fn write_helpers_cue(
    out_dir: &Path,
    pkg_name: &str,
    r: &ConvertResult,
    merged_imports: &BTreeSet<String>,
    used_helpers: &BTreeMap<String, crate::HelperDef>,
    needs_nonzero: bool,
    has_dynamic_include: bool,
    warnings: &mut Vec<ConversionWarning>,
) -> Result<()> {
    let mut out = format!("package {pkg_name}\n\n");

    // Imports needed by built-in definitions and helper expressions.
    let mut imports: BTreeSet<String> = BTreeSet::new();
    if needs_nonzero {
        imports.insert("struct".to_string());
    }
    for h in used_helpers.values() {
        for pkg in &h.imports {
            imports.insert(pkg.to_string());
        }
    }
    for name in &r.helper_order {
        let cue_name = &r.helper_exprs[name];
        if let Some(expr) = r.helpers.get(cue_name) {
            for pkg in merged_imports {
                let short = pkg.rsplit('/').next().unwrap_or(pkg);
                if expr.contains(&format!("{short}.")) {
                    imports.insert(pkg.clone());
                }
            }
        }
    }
    crate::write_import_block(&mut out, &imports);

    if needs_nonzero {
        out.push_str(helm::NONZERO_DEF);
        out.push('\n');
    }

    for h in used_helpers.values() {
        out.push_str(&h.def);
        out.push('\n');
    }

    for name in &r.helper_order {
        let cue_name = &r.helper_exprs[name];
        match r.helpers.get(cue_name) {
            Some(expr) => {
                // Validate each compiled helper in isolation; a body
                // that will not stand alone degrades to `_`.
                if let Err(e) = validate::validate_helper_expr(expr, merged_imports) {
                    warnings.push(ConversionWarning::new(
                        name.clone(),
                        format!("helper body replaced with _: {e}"),
                    ));
                    out.push_str(&format!("{cue_name}: _\n"));
                } else {
                    out.push_str(&format!("{cue_name}: {expr}\n"));
                }
            }
            None => out.push_str(&format!("{cue_name}: _\n")),
        }
    }

    let mut undefs: Vec<&String> = r
        .undefined_helpers
        .values()
        .filter(|cue_name| !r.helpers.contains_key(*cue_name))
        .collect();
    undefs.sort();
    for cue_name in undefs {
        out.push_str(&format!("{cue_name}: _\n"));
    }

    if has_dynamic_include {
        let mut entries: Vec<(&String, &String)> = r
            .helper_order
            .iter()
            .map(|orig| (orig, &r.helper_exprs[orig]))
            .chain(r.undefined_helpers.iter())
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        out.push_str("_helpers: {\n");
        for (orig, cue_name) in entries {
            out.push_str(&format!("\t{}: {}\n", cue::quote_string(orig), cue_name));
        }
        out.push_str("}\n");
    }

    fs::write(out_dir.join("helpers.cue"), out)?;
    Ok(())
}

fn write_values_cue(
    out_dir: &Path,
    pkg_name: &str,
    refs: &[Vec<String>],
    defaults: &[FieldDefault],
    required_refs: &[Vec<String>],
    range_refs: &[Vec<String>],
) -> Result<()> {
    let mut out = format!("package {pkg_name}\n\n");
    out.push_str(&schema::emit_object_schema(
        "#values",
        refs,
        defaults,
        required_refs,
        range_refs,
    ));
    fs::write(out_dir.join("values.cue"), out)?;
    Ok(())
}

fn write_context_cue(
    out_dir: &Path,
    pkg_name: &str,
    meta: &ChartMetadata,
    used_context_objects: &BTreeSet<String>,
) -> Result<()> {
    // #values has its own file.
    let needed: Vec<&String> = used_context_objects
        .iter()
        .filter(|obj| obj.as_str() != "Values")
        .collect();
    if needed.is_empty() {
        return Ok(());
    }

    let mut out = format!("package {pkg_name}\n\n");
    for obj in needed {
        match obj.as_str() {
            "Release" => {
                out.push_str("#release: {\n");
                out.push_str("\tName: _\n");
                out.push_str("\tNamespace: *\"default\" | string\n");
                out.push_str("\tService: *\"Helm\" | string\n");
                out.push_str("\tIsUpgrade: *false | bool\n");
                out.push_str("\tIsInstall: *true | bool\n");
                out.push_str("\tRevision: *1 | int\n");
                out.push_str("}\n");
            }
            "Chart" => {
                out.push_str("#chart: {\n");
                out.push_str(&format!("\tName: {}\n", cue::quote_string(&meta.name)));
                out.push_str(&format!("\tVersion: {}\n", cue::quote_string(&meta.version)));
                out.push_str(&format!(
                    "\tAppVersion: {}\n",
                    cue::quote_string(&meta.app_version)
                ));
                out.push_str("}\n");
            }
            "Capabilities" => {
                out.push_str("#capabilities: {\n");
                out.push_str("\tKubeVersion: {\n");
                out.push_str("\t\tVersion: *\"v1.28.0\" | string\n");
                out.push_str("\t\tMajor: *\"1\" | string\n");
                out.push_str("\t\tMinor: *\"28\" | string\n");
                out.push_str("\t}\n");
                out.push_str("\tAPIVersions: [...string]\n");
                out.push_str("}\n");
            }
            "Template" => {
                out.push_str("#template: {\n");
                out.push_str("\tName: *\"template\" | string\n");
                out.push_str("\tBasePath: *\"templates\" | string\n");
                out.push_str("}\n");
            }
            "Files" => {
                out.push_str("#files: _\n");
            }
            _ => {}
        }
    }

    fs::write(out_dir.join("context.cue"), out)?;
    Ok(())
}

fn write_template_cue(
    out_dir: &Path,
    pkg_name: &str,
    field_name: &str,
    r: &ConvertResult,
) -> Result<()> {
    let mut out = format!("package {pkg_name}\n\n");

    // Only imports the body actually references.
    let body = r.body.trim_end_matches('\n');
    let mut imports: BTreeSet<String> = BTreeSet::new();
    for pkg in &r.imports {
        let short = pkg.rsplit('/').next().unwrap_or(pkg);
        if body.contains(&format!("{short}.")) {
            imports.insert(pkg.clone());
        }
    }
    crate::write_import_block(&mut out, &imports);

    if body.is_empty() {
        return Ok(());
    }

    let mut indent = 0;
    for guard in &r.top_level_guards {
        cue::write_indent(&mut out, indent);
        out.push_str(&format!("if {guard} {{\n"));
        indent += 1;
    }
    cue::write_indent(&mut out, indent);
    out.push_str(&format!("{field_name}: {{\n"));
    for line in body.split('\n') {
        cue::write_indent(&mut out, indent + 1);
        out.push_str(line);
        out.push('\n');
    }
    cue::write_indent(&mut out, indent);
    out.push_str("}\n");
    for i in (0..r.top_level_guards.len()).rev() {
        cue::write_indent(&mut out, i);
        out.push_str("}\n");
    }

    fs::write(out_dir.join(format!("{field_name}.cue")), out)?;
    Ok(())
}

fn write_results_cue(out_dir: &Path, pkg_name: &str, field_names: &[String]) -> Result<()> {
    let mut out = format!("package {pkg_name}\n\n");
    out.push_str("results: [\n");
    for name in field_names {
        out.push_str(&format!("\t{name},\n"));
    }
    out.push_str("]\n");
    fs::write(out_dir.join("results.cue"), out)?;
    Ok(())
}

/// Converts a string to a valid CUE identifier.
fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_alphabetic() || ch == '_' {
            out.push(ch);
        } else if ch.is_ascii_digit() {
            if i == 0 {
                out.push('_');
            }
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        return "_unnamed".to_string();
    }
    out
}

/// Converts a template filename to a CUE field name.
fn template_field_name(filename: &str) -> String {
    let stem = filename
        .strip_suffix(".yaml")
        .or_else(|| filename.strip_suffix(".yml"))
        .unwrap_or(filename);
    sanitize_identifier(stem)
}

/// Converts a chart name to a valid CUE package name.
fn sanitize_package_name(name: &str) -> String {
    let s = sanitize_identifier(name);
    // Package names must start with a lowercase letter or underscore.
    if s.starts_with(|c: char| c.is_ascii_uppercase()) {
        format!("_{s}")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_chart(dir: &Path) {
        fs::create_dir_all(dir.join("templates")).unwrap();

        fs::write(
            dir.join("Chart.yaml"),
            "apiVersion: v2\nname: test-app\nversion: 1.0.0\nappVersion: \"2.0.0\"\n",
        )
        .unwrap();

        fs::write(
            dir.join("values.yaml"),
            "replicaCount: 1\nimage:\n  repository: nginx\n",
        )
        .unwrap();

        fs::write(
            dir.join("templates/deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ include \"test-app.name\" . }}\nspec:\n  replicas: {{ .Values.replicaCount | default 1 }}\n",
        )
        .unwrap();

        fs::write(
            dir.join("templates/service.yaml"),
            "kind: Service\nmetadata:\n  name: {{ .Release.Name }}\n",
        )
        .unwrap();

        fs::write(
            dir.join("templates/_helpers.tpl"),
            "{{- define \"test-app.name\" -}}\n{{ .Chart.Name | trunc 63 | trimSuffix \"-\" }}\n{{- end }}\n",
        )
        .unwrap();
    }

    #[test]
    fn convert_simple_chart() {
        let chart = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        create_test_chart(chart.path());

        let report =
            convert_chart(chart.path(), out.path(), &ChartOptions::default()).unwrap();

        assert_eq!(report.chart_name, "test-app");
        assert_eq!(
            report.converted,
            vec!["deployment.yaml".to_string(), "service.yaml".to_string()]
        );

        assert!(out.path().join("cue.mod/module.cue").exists());
        assert!(out.path().join("helpers.cue").exists());
        assert!(out.path().join("values.cue").exists());
        assert!(out.path().join("context.cue").exists());
        assert!(out.path().join("deployment.cue").exists());
        assert!(out.path().join("service.cue").exists());
        assert!(out.path().join("results.cue").exists());
        assert!(out.path().join("values.yaml").exists());

        let module = fs::read_to_string(out.path().join("cue.mod/module.cue")).unwrap();
        assert!(module.contains("module: \"helm.local/test-app\""));

        let values = fs::read_to_string(out.path().join("values.cue")).unwrap();
        assert!(values.contains("package test_app"));
        assert!(values.contains(
            "replicaCount: *1 | (bool | number | string | null)"
        ));

        let context = fs::read_to_string(out.path().join("context.cue")).unwrap();
        assert!(context.contains("#release: {"));
        assert!(context.contains("Name: \"test-app\""));
        assert!(context.contains("Version: \"1.0.0\""));
        assert!(context.contains("AppVersion: \"2.0.0\""));

        let helpers = fs::read_to_string(out.path().join("helpers.cue")).unwrap();
        assert!(helpers.contains("_test_app_name:"));
        assert!(helpers.contains("_trunc: {"));

        let deployment = fs::read_to_string(out.path().join("deployment.cue")).unwrap();
        assert!(deployment.contains("deployment: {"));
        assert!(deployment.contains("replicas: #values.replicaCount"));
        assert!(deployment.contains("name: _test_app_name"));

        let results = fs::read_to_string(out.path().join("results.cue")).unwrap();
        assert!(results.contains("results: [\n\tdeployment,\n\tservice,\n]"));
    }

    #[test]
    fn missing_chart_yaml_is_an_error() {
        let chart = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir_all(chart.path().join("templates")).unwrap();

        let err = convert_chart(chart.path(), out.path(), &ChartOptions::default()).unwrap_err();
        assert!(matches!(err, ConvertError::FileNotFound(_)));
    }

    #[test]
    fn broken_template_becomes_warning() {
        let chart = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        create_test_chart(chart.path());
        fs::write(
            chart.path().join("templates/broken.yaml"),
            "x: {{ lookup \"v1\" \"Pod\" \"ns\" \"name\" }}\n",
        )
        .unwrap();

        let report =
            convert_chart(chart.path(), out.path(), &ChartOptions::default()).unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| w.template == "broken.yaml"));
        assert!(!out.path().join("broken.cue").exists());
    }

    #[test]
    fn all_templates_failing_is_fatal() {
        let chart = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir_all(chart.path().join("templates")).unwrap();
        fs::write(
            chart.path().join("Chart.yaml"),
            "apiVersion: v2\nname: bad\nversion: 0.1.0\n",
        )
        .unwrap();
        fs::write(
            chart.path().join("templates/only.yaml"),
            "x: {{ merge .Values.a .Values.b }}\n",
        )
        .unwrap();

        let err = convert_chart(chart.path(), out.path(), &ChartOptions::default()).unwrap_err();
        assert!(
            err.to_string().contains("no templates converted successfully"),
            "error: {err}"
        );
    }

    #[test]
    fn field_names() {
        assert_eq!(template_field_name("deployment.yaml"), "deployment");
        assert_eq!(template_field_name("cluster-role.yml"), "cluster_role");
        assert_eq!(template_field_name("00-setup.yaml"), "_00_setup");
        assert_eq!(sanitize_package_name("My-App"), "_My_App");
        assert_eq!(sanitize_package_name("nginx"), "nginx");
    }
}
