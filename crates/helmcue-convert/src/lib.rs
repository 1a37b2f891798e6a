//! helmcue-convert — Helm/Go-template to CUE source-to-source converter.
//!
//! Translates templates that splice values into YAML into CUE that
//! exports the same structured data, replacing string interpolation and
//! whitespace wrangling with typed values and schemas. The converter
//! walks the template AST and emits CUE directly, tracking YAML block
//! context; field references and `default`s seen along the way become a
//! `#values` schema.
//!
//! # Example
//!
//! ```
//! use helmcue_convert::{convert, helm_config};
//!
//! let cue = convert(
//!     &helm_config(),
//!     "port: {{ .Values.port | default 8080 }}\n",
//!     &[],
//! )
//! .unwrap();
//! assert!(cue.contains("port: #values.port"));
//! assert!(cue.contains("port: *8080 | (bool | number | string | null)"));
//! ```

pub mod ast;
mod chart;
mod converter;
mod cue;
mod emitter;
pub mod error;
mod funcs;
mod helm;
mod helpers;
pub mod parser;
mod schema;
mod validate;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use chart::{convert_chart, ChartOptions, ChartReport};
pub use error::{ConversionWarning, ConvertError, Result};
pub use helm::{helm_config, template_config};
pub use helpers::{parse_helpers, TreeSet};
pub use schema::FieldDefault;

use converter::Converter;
use helpers::helper_to_cue_name;

/// Describes how to convert a template pipeline function to CUE.
#[derive(Clone)]
pub struct PipelineFunc {
    /// Number of explicit arguments (beyond the piped value).
    pub nargs: usize,
    /// CUE packages needed when this function is used.
    pub imports: Vec<&'static str>,
    /// CUE helper definitions to emit when this function is used.
    pub helpers: Vec<HelperDef>,
    /// Transforms (piped expression, args) → CUE expression. `None`
    /// means the function is a no-op and the expression passes through.
    /// Returning an empty string marks the function unsupported.
    pub convert: Option<fn(&str, &[String]) -> String>,
    /// The function also acts as a no-op in first-command position with
    /// a single argument: `{{ func expr }}`.
    pub passthrough: bool,
    /// The piped input may be a struct, list, or other non-scalar, so
    /// field references feeding it are not constrained to scalars.
    pub non_scalar: bool,
}

impl Default for PipelineFunc {
    fn default() -> Self {
        PipelineFunc {
            nargs: 0,
            imports: Vec::new(),
            helpers: Vec::new(),
            convert: None,
            passthrough: false,
            non_scalar: false,
        }
    }
}

/// A named CUE helper definition emitted on demand.
#[derive(Debug, Clone)]
pub struct HelperDef {
    pub name: &'static str,
    /// CUE definition text (full block).
    pub def: String,
    /// CUE imports needed by this helper.
    pub imports: Vec<&'static str>,
}

/// Configuration for the template-to-CUE converter.
pub struct Config {
    /// Maps top-level template field names to CUE definition names,
    /// e.g. {"Values": "#values", "Release": "#release"}.
    pub context_objects: HashMap<String, String>,

    /// Pipeline function handlers. Core-handled functions (printf,
    /// print, default, include, required, ternary, list, dict, get,
    /// coalesce, max, min, tpl, merge) are not configured here; use
    /// `core_funcs` to control which of those are enabled.
    pub funcs: HashMap<String, PipelineFunc>,

    /// When `Some`, only the listed core-handled functions are
    /// enabled; others produce an unsupported-function error. `None`
    /// enables all of them.
    pub core_funcs: Option<HashSet<String>>,

    /// CUE expression used for bare `{{ . }}` at the top level (outside
    /// range/with). `None` makes bare dot an error there.
    pub root_expr: Option<String>,
}

/// Structured output of converting a single template.
pub struct ConvertResult {
    pub(crate) imports: BTreeSet<String>,
    pub(crate) needs_nonzero: bool,
    pub(crate) used_helpers: BTreeMap<String, HelperDef>,
    /// CUE helper name → compiled CUE expression.
    pub(crate) helpers: HashMap<String, String>,
    /// Original template names, sorted.
    pub(crate) helper_order: Vec<String>,
    /// Original name → CUE name.
    pub(crate) helper_exprs: HashMap<String, String>,
    /// Referenced but not defined.
    pub(crate) undefined_helpers: BTreeMap<String, String>,
    pub(crate) has_dynamic_include: bool,
    pub(crate) used_context_objects: BTreeSet<String>,
    pub(crate) field_refs: HashMap<String, Vec<Vec<String>>>,
    pub(crate) required_refs: HashMap<String, Vec<Vec<String>>>,
    pub(crate) range_refs: HashMap<String, Vec<Vec<String>>>,
    pub(crate) defaults: HashMap<String, Vec<FieldDefault>>,
    pub(crate) top_level_guards: Vec<String>,
    /// Template body only (no declarations).
    pub(crate) body: String,
}

/// Converts a single template to structured output against a shared
/// helper tree set. Defines carried by the template itself are added to
/// the set first.
pub(crate) fn convert_structured(
    cfg: &Config,
    input: &str,
    tree_set: &mut TreeSet,
) -> Result<ConvertResult> {
    let tmpl = parser::parse_template(input)?;
    for (name, body) in tmpl.defines {
        tree_set.insert(name, body);
    }

    let mut c = Converter::new(cfg);

    // Phase 0: register CUE names for all defined helpers.
    for name in tree_set.keys() {
        c.bags
            .helper_exprs
            .insert(name.clone(), helper_to_cue_name(name));
        c.bags.helper_order.push(name.clone());
    }
    c.bags.helper_order.sort();

    // Phase 0b: compile helper bodies. A body that fails to compile is
    // left without an expression and emits as `_`.
    for name in c.bags.helper_order.clone() {
        let Some(nodes) = tree_set.get(&name).cloned() else {
            continue;
        };
        match c.convert_helper_body(&nodes) {
            Ok((expr, arg_refs)) => {
                let cue_name = c.bags.helper_exprs[&name].clone();
                if !arg_refs.is_empty() {
                    c.bags
                        .helper_arg_field_refs
                        .insert(cue_name.clone(), arg_refs);
                }
                c.bags.helper_cue.insert(cue_name, expr);
            }
            Err(_) => continue,
        }
    }

    // Phase 1: walk the template AST and emit CUE directly.
    c.process_nodes(&tmpl.nodes)?;
    c.emit.finish();

    let needs_nonzero = c.bags.has_conditions || !c.scope.top_level_guards.is_empty();
    Ok(ConvertResult {
        imports: c.bags.imports,
        needs_nonzero,
        used_helpers: c.bags.used_helpers,
        helpers: c.bags.helper_cue,
        helper_order: c.bags.helper_order,
        helper_exprs: c.bags.helper_exprs,
        undefined_helpers: c.bags.undefined_helpers,
        has_dynamic_include: c.bags.has_dynamic_include,
        used_context_objects: c.bags.used_context_objects,
        field_refs: c.bags.field_refs,
        required_refs: c.bags.required_refs,
        range_refs: c.bags.range_refs,
        defaults: c.bags.defaults,
        top_level_guards: c.scope.top_level_guards,
        body: c.emit.out,
    })
}

/// Assembles a complete single-file CUE output from a convert result.
pub(crate) fn assemble_single_file(cfg: &Config, r: &ConvertResult) -> Result<String> {
    let mut imports = r.imports.clone();
    if r.needs_nonzero {
        imports.insert("struct".to_string());
    }
    for h in r.used_helpers.values() {
        for pkg in &h.imports {
            imports.insert(pkg.to_string());
        }
    }

    let mut out = String::new();

    write_import_block(&mut out, &imports);

    // Context object declarations.
    let mut decls: Vec<&String> = r
        .used_context_objects
        .iter()
        .filter_map(|helm| cfg.context_objects.get(helm))
        .collect();
    decls.sort();

    let cue_to_helm: HashMap<&String, &String> =
        cfg.context_objects.iter().map(|(h, c)| (c, h)).collect();

    let has_decls = !decls.is_empty();
    let has_helpers = !r.helper_order.is_empty()
        || !r.undefined_helpers.is_empty()
        || r.has_dynamic_include;

    if has_decls || has_helpers {
        for cue_def in decls {
            let helm = cue_to_helm[cue_def].as_str();
            let empty_refs = Vec::new();
            let empty_defs = Vec::new();
            out.push_str(&schema::emit_object_schema(
                cue_def,
                r.field_refs.get(helm).unwrap_or(&empty_refs),
                r.defaults.get(helm).unwrap_or(&empty_defs),
                r.required_refs.get(helm).unwrap_or(&empty_refs),
                r.range_refs.get(helm).unwrap_or(&empty_refs),
            ));
        }

        for name in &r.helper_order {
            let cue_name = &r.helper_exprs[name];
            match r.helpers.get(cue_name) {
                Some(expr) => out.push_str(&format!("{cue_name}: {expr}\n")),
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

        if r.has_dynamic_include {
            out.push_str(&helpers_map(r));
        }

        out.push('\n');
    }

    // Body with top-level guards.
    let mut indent = 0;
    for guard in &r.top_level_guards {
        cue::write_indent(&mut out, indent);
        out.push_str(&format!("if {guard} {{\n"));
        indent += 1;
    }
    let body = r.body.trim_end_matches('\n');
    if !body.is_empty() {
        for line in body.split('\n') {
            if indent > 0 && !line.is_empty() {
                cue::write_indent(&mut out, indent);
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    for i in (0..r.top_level_guards.len()).rev() {
        cue::write_indent(&mut out, i);
        out.push_str("}\n");
    }

    if r.needs_nonzero {
        out.push_str(cue::strip_cue_comments(helm::NONZERO_DEF));
        out.push('\n');
    }

    for h in r.used_helpers.values() {
        out.push_str(cue::strip_cue_comments(&h.def));
        out.push('\n');
    }

    validate::format_source(&out)
}

/// The `_helpers` map enabling dynamic include by original name.
fn helpers_map(r: &ConvertResult) -> String {
    let mut entries: Vec<(&String, &String)> = r
        .helper_order
        .iter()
        .map(|orig| (orig, &r.helper_exprs[orig]))
        .chain(r.undefined_helpers.iter())
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::from("_helpers: {\n");
    for (orig, cue_name) in entries {
        out.push_str(&format!("\t{}: {}\n", cue::quote_string(orig), cue_name));
    }
    out.push_str("}\n");
    out
}

pub(crate) fn write_import_block(out: &mut String, imports: &BTreeSet<String>) {
    match imports.len() {
        0 => {}
        1 => {
            out.push_str(&format!(
                "import \"{}\"\n\n",
                imports.iter().next().expect("one import")
            ));
        }
        _ => {
            out.push_str("import (\n");
            for pkg in imports {
                out.push_str(&format!("\t\"{pkg}\"\n"));
            }
            out.push_str(")\n\n");
        }
    }
}

/// Splits template input on YAML document separators (`---` lines).
pub(crate) fn split_yaml_documents(input: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    let mut saw_separator = false;
    for line in input.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            saw_separator = true;
            docs.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
    }
    if !saw_separator {
        return Vec::new();
    }
    docs.push(current);
    docs.retain(|d| !d.trim().is_empty());
    docs
}

/// Transforms a template YAML file into CUE using the given config.
/// Optional helper sources contain `{{ define }}` blocks. Multi-document
/// input (separated by `---`) converts each document separately and
/// wraps the bodies in `document_N` fields.
pub fn convert(cfg: &Config, input: &str, helpers: &[&str]) -> Result<String> {
    if input.trim().is_empty() {
        return Err(ConvertError::Input("empty template".to_string()));
    }

    let (mut tree_set, _warnings) = parse_helpers(helpers, false)?;

    let docs = split_yaml_documents(input);
    if docs.len() <= 1 {
        let doc = docs.first().map(String::as_str).unwrap_or(input);
        let r = convert_structured(cfg, doc, &mut tree_set)?;
        return assemble_single_file(cfg, &r);
    }

    let mut results = Vec::with_capacity(docs.len());
    for (i, doc) in docs.iter().enumerate() {
        let r = convert_structured(cfg, doc, &mut tree_set)
            .map_err(|e| ConvertError::Input(format!("document {i}: {e}")))?;
        results.push(r);
    }

    let merged = merge_convert_results(results);
    assemble_single_file(cfg, &merged)
}

/// Merges multi-document results into one, wrapping each document body
/// in a `document_N` field. Merging is associative: bags are unioned
/// and bodies concatenated in order.
pub(crate) fn merge_convert_results(results: Vec<ConvertResult>) -> ConvertResult {
    let mut merged = ConvertResult {
        imports: BTreeSet::new(),
        needs_nonzero: false,
        used_helpers: BTreeMap::new(),
        helpers: HashMap::new(),
        helper_order: Vec::new(),
        helper_exprs: HashMap::new(),
        undefined_helpers: BTreeMap::new(),
        has_dynamic_include: false,
        used_context_objects: BTreeSet::new(),
        field_refs: HashMap::new(),
        required_refs: HashMap::new(),
        range_refs: HashMap::new(),
        defaults: HashMap::new(),
        top_level_guards: Vec::new(),
        body: String::new(),
    };

    let mut body = String::new();
    let last = results.len().saturating_sub(1);
    for (i, r) in results.into_iter().enumerate() {
        merged.imports.extend(r.imports);
        merged.needs_nonzero |= r.needs_nonzero;
        merged.used_helpers.extend(r.used_helpers);
        merged.used_context_objects.extend(r.used_context_objects);
        for (k, v) in r.field_refs {
            merged.field_refs.entry(k).or_default().extend(v);
        }
        for (k, v) in r.required_refs {
            merged.required_refs.entry(k).or_default().extend(v);
        }
        for (k, v) in r.range_refs {
            merged.range_refs.entry(k).or_default().extend(v);
        }
        for (k, v) in r.defaults {
            merged.defaults.entry(k).or_default().extend(v);
        }
        merged.has_dynamic_include |= r.has_dynamic_include;
        merged.undefined_helpers.extend(r.undefined_helpers);

        // Helper compilation state is shared through the tree set; the
        // last result saw every define, including ones added by earlier
        // documents.
        if i == last {
            merged.helpers = r.helpers;
            merged.helper_order = r.helper_order;
            merged.helper_exprs = r.helper_exprs;
        }

        let doc_body = r.body.trim_end_matches('\n');
        if doc_body.is_empty() {
            continue;
        }

        let mut indent = 0;
        for guard in &r.top_level_guards {
            cue::write_indent(&mut body, indent);
            body.push_str(&format!("if {guard} {{\n"));
            indent += 1;
        }
        cue::write_indent(&mut body, indent);
        body.push_str(&format!("document_{i}: {{\n"));
        for line in doc_body.split('\n') {
            cue::write_indent(&mut body, indent + 1);
            body.push_str(line);
            body.push('\n');
        }
        cue::write_indent(&mut body, indent);
        body.push_str("}\n");
        for j in (0..r.top_level_guards.len()).rev() {
            cue::write_indent(&mut body, j);
            body.push_str("}\n");
        }
    }

    merged.body = body;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helm(input: &str) -> String {
        convert(&helm_config(), input, &[]).unwrap()
    }

    fn helm_with(input: &str, helpers: &[&str]) -> String {
        convert(&helm_config(), input, helpers).unwrap()
    }

    // --- Concrete end-to-end scenarios ---------------------------------

    #[test]
    fn plain_yaml_passthrough() {
        assert_eq!(helm("name: test\nport: 80\n"), "name: \"test\"\nport: 80\n");
    }

    #[test]
    fn value_reference_with_default() {
        let out = helm("port: {{ .Values.port | default 8080 }}\n");
        assert!(out.contains("port: #values.port"), "output:\n{out}");
        assert!(
            out.contains("port: *8080 | (bool | number | string | null)"),
            "output:\n{out}"
        );
    }

    #[test]
    fn conditional_emits_twin_guards() {
        let out = helm(
            "{{ if .Values.debug }}logLevel: \"debug\"{{ else }}logLevel: \"info\"{{ end }}\n",
        );
        assert!(
            out.contains("if (_nonzero & {#arg: #values.debug, _}) {\n\tlogLevel: \"debug\"\n}"),
            "output:\n{out}"
        );
        assert!(
            out.contains("if !(_nonzero & {#arg: #values.debug, _}) {\n\tlogLevel: \"info\"\n}"),
            "output:\n{out}"
        );
        // _nonzero definition is appended.
        assert!(out.contains("_nonzero: {"), "output:\n{out}");
        assert!(out.contains("import \"struct\""), "output:\n{out}");
        // Condition-only access stays optional in the schema.
        assert!(
            out.contains("debug?: bool | number | string | null"),
            "output:\n{out}"
        );
    }

    #[test]
    fn range_over_list() {
        let out = helm("features:\n{{- range .Values.features }}\n  - {{ . }}\n{{- end }}\n");
        assert!(
            out.contains("features: [\n\tfor _, _range0 in #values.features {\n\t\t_range0\n\t}\n]"),
            "output:\n{out}"
        );
        assert!(out.contains("features?: _"), "output:\n{out}");
    }

    #[test]
    fn include_with_struct_field_arg() {
        let helper = "{{- define \"labels\" }}app: {{ .name }}{{- end }}";
        let out = helm_with("metadata:\n  labels: {{ include \"labels\" .Values.labels }}\n", &[helper]);
        assert!(
            out.contains("labels: _labels & {#arg: #values.labels, _}"),
            "output:\n{out}"
        );
        assert!(out.contains("_labels: {"), "output:\n{out}");
        assert!(out.contains("app: #arg.name"), "output:\n{out}");
        assert!(out.contains("#arg: {"), "output:\n{out}");
        assert!(
            out.contains("name?: bool | number | string | null"),
            "output:\n{out}"
        );
        // The helper's #arg accesses propagate into #values under the
        // call-site path.
        assert!(out.contains("labels!: {"), "output:\n{out}");
    }

    #[test]
    fn printf_composition() {
        let out = helm("name: {{ printf \"%s-%s\" .Release.Name .Chart.Name }}\n");
        assert!(
            out.contains("name: \"\\(#release.Name)-\\(#chart.Name)\""),
            "output:\n{out}"
        );
        assert!(out.contains("#release: {"), "output:\n{out}");
        assert!(out.contains("#chart: {"), "output:\n{out}");
    }

    // --- Pipelines and functions ----------------------------------------

    #[test]
    fn quote_pipeline() {
        let out = helm("name: {{ .Values.name | quote }}\n");
        assert!(out.contains("name: \"\\(#values.name)\""), "output:\n{out}");
    }

    #[test]
    fn string_function_pipeline_chain() {
        let out = helm("name: {{ .Values.name | trunc 63 | trimSuffix \"-\" }}\n");
        assert!(
            out.contains(
                "name: strings.TrimSuffix((_trunc & {#in: #values.name, #n: 63}).out, \"-\")"
            ),
            "output:\n{out}"
        );
        assert!(out.contains("import \"strings\""), "output:\n{out}");
        assert!(out.contains("_trunc: {"), "output:\n{out}");
    }

    #[test]
    fn nindent_and_to_yaml_are_noops() {
        let out = helm("labels:\n  {{- toYaml .Values.labels | nindent 2 }}\n");
        assert!(out.contains("labels: #values.labels"), "output:\n{out}");
        // Serialized value is non-scalar in the schema, and a value
        // access makes it required.
        assert!(out.contains("labels!: _"), "output:\n{out}");
    }

    #[test]
    fn ternary_uses_index_trick() {
        let out = helm("mode: {{ ternary \"on\" \"off\" .Values.enabled }}\n");
        assert!(
            out.contains(
                "mode: [if (_nonzero & {#arg: #values.enabled, _}) {\"on\"}, \"off\"][0]"
            ),
            "output:\n{out}"
        );
    }

    #[test]
    fn dict_and_list_literals() {
        let out = helm("x: {{ dict \"a\" .Values.a \"b\" 2 }}\ny: {{ list 1 2 3 }}\n");
        assert!(out.contains("x: {a: #values.a, b: 2}"), "output:\n{out}");
        assert!(out.contains("y: [1, 2, 3]"), "output:\n{out}");
    }

    #[test]
    fn dict_odd_args_is_error() {
        let err = convert(&helm_config(), "x: {{ dict \"a\" }}\n", &[]).unwrap_err();
        assert!(err.to_string().contains("dict"), "error: {err}");
    }

    #[test]
    fn get_marks_map_non_scalar() {
        let out = helm("v: {{ get .Values.conf \"key\" }}\nw: {{ get .Values.conf \"my-key\" }}\n");
        assert!(out.contains("v: #values.conf.key"), "output:\n{out}");
        assert!(out.contains("w: #values.conf[\"my-key\"]"), "output:\n{out}");
        assert!(out.contains("conf!: _"), "output:\n{out}");
    }

    #[test]
    fn coalesce_chain() {
        let out = helm("v: {{ coalesce .Values.a .Values.b \"fallback\" }}\n");
        assert!(
            out.contains(
                "v: [if (_nonzero & {#arg: #values.a, _}) {#values.a}, if (_nonzero & {#arg: #values.b, _}) {#values.b}, \"fallback\"][0]"
            ),
            "output:\n{out}"
        );
    }

    #[test]
    fn min_max_use_list_package() {
        let out = helm("v: {{ max .Values.a 3 }}\n");
        assert!(out.contains("v: list.Max([#values.a, 3])"), "output:\n{out}");
        assert!(out.contains("import \"list\""), "output:\n{out}");
    }

    #[test]
    fn merge_has_no_equivalent() {
        let err = convert(&helm_config(), "x: {{ merge .Values.a .Values.b }}\n", &[]).unwrap_err();
        assert!(err.to_string().contains("unification"), "error: {err}");
    }

    #[test]
    fn lookup_is_unsupported() {
        let err = convert(
            &helm_config(),
            "x: {{ .Values.a | lookup \"v1\" }}\n",
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("lookup"), "error: {err}");
    }

    #[test]
    fn required_attaches_comment() {
        let out = helm("host: {{ required \"host is required\" .Values.host }}\n");
        assert!(
            out.contains("host: #values.host // required: \"host is required\""),
            "output:\n{out}"
        );
        assert!(
            out.contains("host!: bool | number | string | null"),
            "output:\n{out}"
        );
    }

    #[test]
    fn sub_pipe_default_becomes_cue_default() {
        let out = helm("port: {{ printf \"%d\" (.Values.port | int) }}\n");
        assert!(
            out.contains("port: \"\\(int & #values.port)\""),
            "output:\n{out}"
        );
    }

    // --- Control flow ----------------------------------------------------

    #[test]
    fn top_level_if_becomes_guard() {
        let out = helm("{{- if .Values.enabled }}\nname: test\nport: 80\n{{- end }}\n");
        assert!(
            out.starts_with(
                "import \"struct\"\n\n#values: {\n\tenabled?: bool | number | string | null\n\t...\n}\n\nif (_nonzero & {#arg: #values.enabled, _}) {\n\tname: \"test\"\n\tport: 80\n}\n"
            ),
            "output:\n{out}"
        );
    }

    #[test]
    fn with_rebinds_dot() {
        let out = helm(
            "{{- with .Values.tls }}\ntls:\n  cert: {{ .cert }}\n{{- end }}\nname: x\n",
        );
        assert!(
            out.contains("if (_nonzero & {#arg: #values.tls, _}) {"),
            "output:\n{out}"
        );
        assert!(out.contains("cert: #values.tls.cert"), "output:\n{out}");
        // Sub-field accesses inside the body track into the schema.
        assert!(out.contains("tls?: {"), "output:\n{out}");
        assert!(out.contains("cert!: bool | number | string | null"), "output:\n{out}");
    }

    #[test]
    fn range_over_map_with_vars() {
        let out = helm(
            "env:\n{{- range $key, $value := .Values.env }}\n  {{ $key }}: {{ $value }}\n{{- end }}\n",
        );
        assert!(
            out.contains("for _key0, _val0 in #values.env {"),
            "output:\n{out}"
        );
        assert!(out.contains("(_key0): _val0"), "output:\n{out}");
        assert!(out.contains("env?: _"), "output:\n{out}");
    }

    #[test]
    fn local_variable_binding() {
        let out = helm("{{- $name := .Values.name }}\nname: {{ $name }}\n");
        assert!(out.contains("name: #values.name"), "output:\n{out}");
    }

    #[test]
    fn inline_interpolation_in_value() {
        let out = helm("image: \"{{ .Values.repo }}:{{ .Values.tag }}\"\n");
        assert!(
            out.contains("image: \"\\\"\\(#values.repo):\\(#values.tag)\\\"\""),
            "output:\n{out}"
        );
    }

    // --- Dot handling ------------------------------------------------------

    #[test]
    fn template_config_accepts_bare_dot() {
        let out = convert(&template_config(), "name: {{ . }}\n", &[]).unwrap();
        assert!(out.contains("name: #values"), "output:\n{out}");
    }

    #[test]
    fn helm_config_rejects_bare_dot() {
        let err = convert(&helm_config(), "name: {{ . }}\n", &[]).unwrap_err();
        assert!(
            err.to_string().contains("outside range/with not supported"),
            "error: {err}"
        );
    }

    // --- Function restriction ---------------------------------------------

    #[test]
    fn restricted_core_funcs_name_the_function() {
        let cfg = template_config();
        for (input, name) in [
            ("x: {{ .Values.x | default 1 }}\n", "default"),
            ("x: {{ ternary \"a\" \"b\" .Values.c }}\n", "ternary"),
            ("x: {{ include \"h\" . }}\n", "include"),
            ("x: {{ required \"m\" .Values.x }}\n", "required"),
        ] {
            let err = convert(&cfg, input, &[]).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(name), "error {msg:?} should name {name}");
            assert!(
                msg.contains("not a text/template builtin"),
                "error {msg:?} should mark the restriction"
            );
        }
        // printf stays available.
        assert!(convert(&cfg, "x: {{ printf \"%s\" .Values.x }}\n", &[]).is_ok());
    }

    // --- Helpers ------------------------------------------------------------

    #[test]
    fn string_helper_body_folds_whitespace() {
        let helper = "{{- define \"motd\" }}\nhello\nworld\n{{- end }}";
        let out = helm_with("msg: {{ include \"motd\" . }}\n", &[helper]);
        assert!(out.contains("_motd: \"hello world\""), "output:\n{out}");
        assert!(out.contains("msg: _motd"), "output:\n{out}");
    }

    #[test]
    fn undefined_helper_stubs_to_top() {
        let out = helm("x: {{ include \"missing.helper\" . }}\n");
        assert!(out.contains("_missing_helper: _"), "output:\n{out}");
        assert!(out.contains("x: _missing_helper"), "output:\n{out}");
    }

    #[test]
    fn dynamic_include_emits_helpers_map() {
        let helper = "{{- define \"modes.fast\" }}speed: 9{{- end }}";
        let out = helm_with(
            "x: {{ include (printf \"modes.%s\" .Values.mode) . }}\n",
            &[helper],
        );
        assert!(
            out.contains("x: _helpers[\"modes.\\(#values.mode)\"]"),
            "output:\n{out}"
        );
        assert!(out.contains("_helpers: {"), "output:\n{out}");
        assert!(out.contains("\"modes.fast\": _modes_fast"), "output:\n{out}");
    }

    #[test]
    fn conflicting_helpers_error() {
        let a = "{{- define \"x\" }}a: 1{{- end }}";
        let b = "{{- define \"x\" }}a: 2{{- end }}";
        let err = convert(&helm_config(), "n: 1\n", &[a, b]).unwrap_err();
        assert!(matches!(err, ConvertError::ConflictingHelper(_)), "error: {err}");
    }

    // --- Multi-document ----------------------------------------------------

    #[test]
    fn multi_document_wraps_in_document_fields() {
        let out = helm("kind: A\n---\nkind: B\n");
        assert!(out.contains("document_0: {\n\tkind: \"A\"\n}"), "output:\n{out}");
        assert!(out.contains("document_1: {\n\tkind: \"B\"\n}"), "output:\n{out}");
    }

    #[test]
    fn define_in_later_document_is_compiled() {
        let out = helm("a: {{ include \"x\" . }}\n---\n{{- define \"x\" -}}\nv: 1\n{{- end }}\nb: 2\n");
        assert!(out.contains("a: _x"), "output:\n{out}");
        assert!(out.contains("_x: {\n\tv: 1\n}"), "output:\n{out}");
        // The real definition supersedes the first document's stub.
        assert!(!out.contains("_x: _\n"), "output:\n{out}");
    }

    #[test]
    fn split_documents() {
        assert!(split_yaml_documents("a: 1\n").is_empty());
        let docs = split_yaml_documents("a: 1\n---\nb: 2\n");
        assert_eq!(docs, vec!["a: 1\n".to_string(), "b: 2\n".to_string()]);
    }

    // --- Errors -------------------------------------------------------------

    #[test]
    fn empty_template_is_input_error() {
        let err = convert(&helm_config(), "   \n", &[]).unwrap_err();
        assert!(err.to_string().contains("empty template"), "error: {err}");
    }

    #[test]
    fn unknown_function_is_unsupported() {
        let err = convert(&helm_config(), "x: {{ .Values.x | wobble }}\n", &[]).unwrap_err();
        assert!(err.to_string().contains("wobble"), "error: {err}");
    }

    // --- Output invariants --------------------------------------------------

    #[test]
    fn output_is_format_idempotent() {
        let out = helm("a:\n  b: 1\nc:\n  - x\n  - y\n");
        let again = crate::validate::format_source(&out).unwrap();
        assert_eq!(out, again);
    }

    #[test]
    fn braces_balance_in_bodies() {
        let out = helm(
            "spec:\n  containers:\n    - name: app\n      ports:\n        - port: 80\n  other: 1\n",
        );
        assert_eq!(out.matches('{').count(), out.matches('}').count(), "output:\n{out}");
        assert_eq!(out.matches('[').count(), out.matches(']').count(), "output:\n{out}");
    }

    #[test]
    fn semver_compare_condition() {
        let out = helm(
            "{{ if semverCompare \">=1.25\" .Values.kubeVersion }}ok: true{{ end }}\n",
        );
        assert!(
            out.contains(
                "if (_semverCompare & {#constraint: \">=1.25\", #version: #values.kubeVersion}).out {"
            ),
            "output:\n{out}"
        );
        assert!(out.contains("_semverCompare: {"), "output:\n{out}");
    }

    #[test]
    fn has_key_condition() {
        let out = helm("{{ if hasKey .Values.conf \"debug\" }}d: 1{{ end }}\n");
        assert!(
            out.contains("if (_nonzero & {#arg: #values.conf.debug, _}) {"),
            "output:\n{out}"
        );
        assert!(out.contains("conf?: _"), "output:\n{out}");
    }

    #[test]
    fn boolean_operators_in_conditions() {
        let out = helm("{{ if and (eq .Values.mode \"a\") (not .Values.off) }}x: 1{{ end }}\n");
        assert!(
            out.contains(
                "if #values.mode == \"a\" && !((_nonzero & {#arg: #values.off, _})) {"
            ),
            "output:\n{out}"
        );
    }
}
