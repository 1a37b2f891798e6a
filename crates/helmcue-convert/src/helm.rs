//! Helm/Sprig pipeline function mappings and the CUE helper definitions
//! they pull in.

use std::collections::{HashMap, HashSet};

use crate::{Config, HelperDef, PipelineFunc};

/// Truthiness check matching Go text/template semantics: a value is
/// falsy if it equals the zero of its type.
pub(crate) const NONZERO_DEF: &str = r#"// _nonzero tests whether a value is "truthy" (non-zero,
// non-empty, non-null), matching Go text/template semantics.
// A natural candidate for a CUE standard library builtin.
_nonzero: {
	#arg?: _
	[if #arg != _|_ {
		[
			if (#arg & int) != _|_ {#arg != 0},
			if (#arg & string) != _|_ {#arg != ""},
			if (#arg & float) != _|_ {#arg != 0.0},
			if (#arg & bool) != _|_ {#arg},
			if (#arg & [...]) != _|_ {len(#arg) > 0},
			if (#arg & {...}) != _|_ {(#arg & struct.MaxFields(0)) == _|_},
			false,
		][0]
	}, false][0]
}
"#;

pub(crate) const LAST_DEF: &str = r#"// _last extracts the last element of a list.
// A natural candidate for a CUE standard library builtin.
_last: {
	#in: [_, ...]
	_len: len(#in)
	out:  #in[_len-1]
}
"#;

pub(crate) const COMPACT_DEF: &str = r#"// _compact removes empty strings from a list.
// A natural candidate for a CUE standard library builtin.
_compact: {
	#in: [...string]
	out: [ for x in #in if x != "" {x}]
}
"#;

pub(crate) const UNIQ_DEF: &str = r#"// _uniq removes duplicate elements from a list.
// A natural candidate for a CUE standard library builtin.
_uniq: {
	#in: [...]
	out: [ for i, x in #in if !list.Contains(list.Slice(#in, 0, i), x) {x}]
}
"#;

/// Safe truncation matching Helm's trunc semantics, where strings
/// shorter than the limit pass through.
pub(crate) const TRUNC_DEF: &str = r#"// _trunc truncates a string to N runes, matching Helm's
// trunc semantics where shorter strings pass through.
// A natural candidate for a CUE standard library builtin.
_trunc: {
	#in: string
	#n:  int
	_r:  len(strings.Runes(#in))
	out: string
	if _r <= #n {out: #in}
	if _r > #n {out: strings.SliceRunes(#in, 0, #n)}
}
"#;

/// Simple semver constraint evaluation covering the subset of Helm's
/// semverCompare seen in practice (single operator + version).
pub(crate) const SEMVER_COMPARE_DEF: &str = r#"_semverCompare: {
	#constraint: string
	#version:    string

	// Detect operator prefix.
	_opLen: [
		if strings.HasPrefix(#constraint, ">=") {2},
		if strings.HasPrefix(#constraint, "<=") {2},
		if strings.HasPrefix(#constraint, "!=") {2},
		if strings.HasPrefix(#constraint, ">") {1},
		if strings.HasPrefix(#constraint, "<") {1},
		if strings.HasPrefix(#constraint, "=") {1},
		{0},
	][0]
	_op: [
		if _opLen > 0 {strings.SliceRunes(#constraint, 0, _opLen)},
		"=",
	][0]
	_cVer: [
		if _opLen > 0 {strings.TrimSpace(strings.SliceRunes(#constraint, _opLen, len(strings.Runes(#constraint))))},
		strings.TrimSpace(#constraint),
	][0]

	// Parse constraint version.
	_cRaw:   strings.TrimPrefix(_cVer, "v")
	_cParts: strings.Split(_cRaw, ".")
	_cMajor: strconv.Atoi(_cParts[0])
	_cMinorS: [if len(_cParts) > 1 {_cParts[1]}, "0"][0]
	_cPatchFull: [if len(_cParts) > 2 {_cParts[2]}, "0"][0]
	_cPatchParts: strings.Split(_cPatchFull, "-")
	_cMinor: strconv.Atoi(_cMinorS)
	_cPatch: strconv.Atoi(_cPatchParts[0])
	_cPre: [if len(_cPatchParts) > 1 {_cPatchParts[1]}, ""][0]

	// Parse input version.
	_vRaw:   strings.TrimPrefix(strings.TrimSpace(#version), "v")
	_vParts: strings.Split(_vRaw, ".")
	_vMajor: strconv.Atoi(_vParts[0])
	_vMinorS: [if len(_vParts) > 1 {_vParts[1]}, "0"][0]
	_vPatchFull: [if len(_vParts) > 2 {_vParts[2]}, "0"][0]
	_vPatchParts: strings.Split(_vPatchFull, "-")
	_vMinor: strconv.Atoi(_vMinorS)
	_vPatch: strconv.Atoi(_vPatchParts[0])
	_vPre: [if len(_vPatchParts) > 1 {_vPatchParts[1]}, ""][0]

	// Three-way comparison: -1 (less), 0 (equal), +1 (greater).
	_cmp: [
		if _vMajor < _cMajor {-1},
		if _vMajor > _cMajor {1},
		if _vMinor < _cMinor {-1},
		if _vMinor > _cMinor {1},
		if _vPatch < _cPatch {-1},
		if _vPatch > _cPatch {1},
		// Prerelease tie-break.
		if _vPre == "" && _cPre != "" {1},
		if _vPre != "" && _cPre == "" {-1},
		if _vPre < _cPre {-1},
		if _vPre > _cPre {1},
		0,
	][0]

	// Apply operator.
	out: [
		if _op == ">=" {_cmp >= 0},
		if _op == "<=" {_cmp <= 0},
		if _op == ">" {_cmp > 0},
		if _op == "<" {_cmp < 0},
		if _op == "!=" {_cmp != 0},
		_cmp == 0,
	][0]
}
"#;

fn trunc_helper() -> HelperDef {
    HelperDef {
        name: "_trunc",
        def: TRUNC_DEF.to_string(),
        imports: vec!["strings"],
    }
}

fn last_helper() -> HelperDef {
    HelperDef {
        name: "_last",
        def: LAST_DEF.to_string(),
        imports: vec![],
    }
}

fn compact_helper() -> HelperDef {
    HelperDef {
        name: "_compact",
        def: COMPACT_DEF.to_string(),
        imports: vec![],
    }
}

fn uniq_helper() -> HelperDef {
    HelperDef {
        name: "_uniq",
        def: UNIQ_DEF.to_string(),
        imports: vec!["list"],
    }
}

/// Configuration for converting pure Go text/template files: only the
/// text/template builtins are enabled, and bare `{{ . }}` resolves to
/// `#values`.
pub fn template_config() -> Config {
    let mut context_objects = HashMap::new();
    context_objects.insert("Values".to_string(), "#values".to_string());

    let mut core_funcs = HashSet::new();
    core_funcs.insert("printf".to_string());
    core_funcs.insert("print".to_string());

    Config {
        context_objects,
        funcs: HashMap::new(),
        core_funcs: Some(core_funcs),
        root_expr: Some("#values".to_string()),
    }
}

/// Configuration with Helm context objects and Sprig pipeline functions.
pub fn helm_config() -> Config {
    let mut context_objects = HashMap::new();
    for (helm, cue) in [
        ("Values", "#values"),
        ("Release", "#release"),
        ("Chart", "#chart"),
        ("Capabilities", "#capabilities"),
        ("Template", "#template"),
        ("Files", "#files"),
    ] {
        context_objects.insert(helm.to_string(), cue.to_string());
    }

    let mut funcs: HashMap<String, PipelineFunc> = HashMap::new();
    let mut add = |name: &str, pf: PipelineFunc| {
        funcs.insert(name.to_string(), pf);
    };

    // Serialization no-ops (passthrough in first-command position too).
    for name in ["toYaml", "toJson", "toRawJson", "toPrettyJson"] {
        add(
            name,
            PipelineFunc {
                passthrough: true,
                non_scalar: true,
                ..PipelineFunc::default()
            },
        );
    }
    for name in ["fromYaml", "fromJson", "toString"] {
        add(
            name,
            PipelineFunc {
                passthrough: true,
                ..PipelineFunc::default()
            },
        );
    }

    // Whitespace manipulation is meaningless in CUE.
    add("nindent", PipelineFunc::default());
    add("indent", PipelineFunc::default());

    // Sprig string functions.
    add(
        "quote",
        PipelineFunc {
            convert: Some(|expr, _| format!("\"\\({expr})\"")),
            ..PipelineFunc::default()
        },
    );
    add(
        "squote",
        PipelineFunc {
            convert: Some(|expr, _| format!("\"'\\({expr})'\"")),
            ..PipelineFunc::default()
        },
    );
    add(
        "upper",
        PipelineFunc {
            imports: vec!["strings"],
            convert: Some(|expr, _| format!("strings.ToUpper({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "lower",
        PipelineFunc {
            imports: vec!["strings"],
            convert: Some(|expr, _| format!("strings.ToLower({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "title",
        PipelineFunc {
            imports: vec!["strings"],
            convert: Some(|expr, _| format!("strings.ToTitle({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "trim",
        PipelineFunc {
            imports: vec!["strings"],
            convert: Some(|expr, _| format!("strings.TrimSpace({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "trimPrefix",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.TrimPrefix({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "trimSuffix",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.TrimSuffix({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "contains",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.Contains({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "hasPrefix",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.HasPrefix({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "hasSuffix",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.HasSuffix({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "replace",
        PipelineFunc {
            nargs: 2,
            imports: vec!["strings"],
            convert: Some(|expr, args| {
                format!("strings.Replace({expr}, {}, {}, -1)", args[0], args[1])
            }),
            ..PipelineFunc::default()
        },
    );
    add(
        "trunc",
        PipelineFunc {
            nargs: 1,
            imports: vec!["strings"],
            helpers: vec![trunc_helper()],
            convert: Some(|expr, args| {
                format!("(_trunc & {{#in: {expr}, #n: {}}}).out", args[0])
            }),
            ..PipelineFunc::default()
        },
    );
    add(
        "b64enc",
        PipelineFunc {
            imports: vec!["encoding/base64"],
            convert: Some(|expr, _| format!("base64.Encode(null, {expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "b64dec",
        PipelineFunc {
            imports: vec!["encoding/base64"],
            convert: Some(|expr, _| format!("base64.Decode(null, {expr})")),
            ..PipelineFunc::default()
        },
    );

    // Type conversions.
    add(
        "int",
        PipelineFunc {
            convert: Some(|expr, _| format!("int & {expr}")),
            ..PipelineFunc::default()
        },
    );
    add(
        "int64",
        PipelineFunc {
            convert: Some(|expr, _| format!("int & {expr}")),
            ..PipelineFunc::default()
        },
    );
    add(
        "float64",
        PipelineFunc {
            convert: Some(|expr, _| format!("number & {expr}")),
            ..PipelineFunc::default()
        },
    );
    add(
        "atoi",
        PipelineFunc {
            imports: vec!["strconv"],
            convert: Some(|expr, _| format!("strconv.Atoi({expr})")),
            ..PipelineFunc::default()
        },
    );

    // Math.
    add(
        "ceil",
        PipelineFunc {
            imports: vec!["math"],
            convert: Some(|expr, _| format!("math.Ceil({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "floor",
        PipelineFunc {
            imports: vec!["math"],
            convert: Some(|expr, _| format!("math.Floor({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "round",
        PipelineFunc {
            imports: vec!["math"],
            convert: Some(|expr, _| format!("math.Round({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "add",
        PipelineFunc {
            nargs: 1,
            convert: Some(|expr, args| format!("({expr} + {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "sub",
        PipelineFunc {
            nargs: 1,
            convert: Some(|expr, args| format!("({} - {expr})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "mul",
        PipelineFunc {
            nargs: 1,
            convert: Some(|expr, args| format!("({expr} * {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "div",
        PipelineFunc {
            nargs: 1,
            convert: Some(|expr, args| format!("div({}, {expr})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "mod",
        PipelineFunc {
            nargs: 1,
            convert: Some(|expr, args| format!("mod({}, {expr})", args[0])),
            ..PipelineFunc::default()
        },
    );

    // Lists.
    add(
        "join",
        PipelineFunc {
            nargs: 1,
            non_scalar: true,
            imports: vec!["strings"],
            convert: Some(|expr, args| format!("strings.Join({expr}, {})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "sortAlpha",
        PipelineFunc {
            non_scalar: true,
            imports: vec!["list"],
            convert: Some(|expr, _| format!("list.SortStrings({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "concat",
        PipelineFunc {
            non_scalar: true,
            imports: vec!["list"],
            convert: Some(|expr, _| format!("list.Concat({expr})")),
            ..PipelineFunc::default()
        },
    );
    add(
        "first",
        PipelineFunc {
            non_scalar: true,
            convert: Some(|expr, _| format!("{expr}[0]")),
            ..PipelineFunc::default()
        },
    );
    add(
        "append",
        PipelineFunc {
            nargs: 1,
            non_scalar: true,
            convert: Some(|expr, args| format!("{expr} + [{}]", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "last",
        PipelineFunc {
            non_scalar: true,
            helpers: vec![last_helper()],
            convert: Some(|expr, _| format!("(_last & {{#in: {expr}}}).out")),
            ..PipelineFunc::default()
        },
    );
    add(
        "compact",
        PipelineFunc {
            non_scalar: true,
            helpers: vec![compact_helper()],
            convert: Some(|expr, _| format!("(_compact & {{#in: {expr}}}).out")),
            ..PipelineFunc::default()
        },
    );
    add(
        "uniq",
        PipelineFunc {
            non_scalar: true,
            imports: vec!["list"],
            helpers: vec![uniq_helper()],
            convert: Some(|expr, _| format!("(_uniq & {{#in: {expr}}}).out")),
            ..PipelineFunc::default()
        },
    );
    add(
        "keys",
        PipelineFunc {
            non_scalar: true,
            convert: Some(|expr, _| format!("[ for k, _ in {expr} {{k}}]")),
            ..PipelineFunc::default()
        },
    );
    add(
        "values",
        PipelineFunc {
            non_scalar: true,
            convert: Some(|expr, _| format!("[ for _, v in {expr} {{v}}]")),
            ..PipelineFunc::default()
        },
    );

    // Regex.
    add(
        "regexMatch",
        PipelineFunc {
            nargs: 1,
            imports: vec!["regexp"],
            convert: Some(|expr, args| format!("regexp.Match({}, {expr})", args[0])),
            ..PipelineFunc::default()
        },
    );
    add(
        "regexReplaceAll",
        PipelineFunc {
            nargs: 2,
            imports: vec!["regexp"],
            convert: Some(|expr, args| {
                format!("regexp.ReplaceAll({}, {expr}, {})", args[0], args[1])
            }),
            ..PipelineFunc::default()
        },
    );
    add(
        "regexFind",
        PipelineFunc {
            nargs: 1,
            imports: vec!["regexp"],
            convert: Some(|expr, args| format!("regexp.Find({}, {expr})", args[0])),
            ..PipelineFunc::default()
        },
    );

    // Paths.
    add(
        "base",
        PipelineFunc {
            imports: vec!["path"],
            convert: Some(|expr, _| format!("path.Base({expr}, path.Unix)")),
            ..PipelineFunc::default()
        },
    );
    add(
        "dir",
        PipelineFunc {
            imports: vec!["path"],
            convert: Some(|expr, _| format!("path.Dir({expr}, path.Unix)")),
            ..PipelineFunc::default()
        },
    );
    add(
        "ext",
        PipelineFunc {
            imports: vec!["path"],
            convert: Some(|expr, _| format!("path.Ext({expr}, path.Unix)")),
            ..PipelineFunc::default()
        },
    );

    // Hashes.
    add(
        "sha256sum",
        PipelineFunc {
            imports: vec!["crypto/sha256", "encoding/hex"],
            convert: Some(|expr, _| format!("hex.Encode(sha256.Sum256({expr}))")),
            ..PipelineFunc::default()
        },
    );

    // Functions with no static equivalent: the empty-string sentinel
    // makes the dispatcher raise an error naming the function.
    add(
        "set",
        PipelineFunc {
            convert: Some(|_, _| String::new()),
            ..PipelineFunc::default()
        },
    );
    add(
        "lookup",
        PipelineFunc {
            convert: Some(|_, _| String::new()),
            ..PipelineFunc::default()
        },
    );

    drop(add);

    Config {
        context_objects,
        funcs,
        core_funcs: None,
        root_expr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helm_config_shape() {
        let cfg = helm_config();
        assert_eq!(cfg.context_objects["Values"], "#values");
        assert_eq!(cfg.context_objects["Release"], "#release");
        assert!(cfg.core_funcs.is_none());
        assert!(cfg.root_expr.is_none());
        assert!(cfg.funcs.contains_key("quote"));
        assert!(cfg.funcs["toYaml"].passthrough);
        assert!(cfg.funcs["toYaml"].non_scalar);
        assert!(cfg.funcs["nindent"].convert.is_none());
    }

    #[test]
    fn template_config_restricts_core_funcs() {
        let cfg = template_config();
        let core = cfg.core_funcs.as_ref().unwrap();
        assert!(core.contains("printf"));
        assert!(core.contains("print"));
        assert!(!core.contains("default"));
        assert_eq!(cfg.root_expr.as_deref(), Some("#values"));
    }

    #[test]
    fn pipeline_func_conversion_shapes() {
        let cfg = helm_config();
        let quote = cfg.funcs["quote"].convert.unwrap();
        assert_eq!(quote("#values.x", &[]), "\"\\(#values.x)\"");

        let trim_suffix = cfg.funcs["trimSuffix"].convert.unwrap();
        assert_eq!(
            trim_suffix("#values.name", &["\"-\"".to_string()]),
            "strings.TrimSuffix(#values.name, \"-\")"
        );

        let trunc = cfg.funcs["trunc"].convert.unwrap();
        assert_eq!(
            trunc("#values.name", &["63".to_string()]),
            "(_trunc & {#in: #values.name, #n: 63}).out"
        );

        let int_fn = cfg.funcs["int"].convert.unwrap();
        assert_eq!(int_fn("#values.port", &[]), "int & #values.port");

        let lookup = cfg.funcs["lookup"].convert.unwrap();
        assert_eq!(lookup("x", &[]), "");
    }
}
