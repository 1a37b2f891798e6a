//! Core function dispatch.
//!
//! Core-handled functions build custom CUE expressions and carry side
//! effects (recorded defaults, comments, imports, helper defs, schema
//! tracking). Each function is a `(piped_first, handler)` record looked
//! up by name; handlers accept a tagged argument list so first-command
//! and piped positions share one dispatch path.

use phf::phf_map;

use crate::ast::Arg;
use crate::converter::{nonzero, Converter};
use crate::cue::{cue_key, is_identifier, quote_string};
use crate::error::{ConvertError, Result};

/// Either an unresolved AST node (first-command position) or a
/// pre-resolved CUE expression (the piped value).
pub(crate) enum FuncArg<'a> {
    Node(&'a Arg),
    Resolved {
        expr: String,
        obj: String,
        path: Option<Vec<String>>,
    },
}

pub(crate) struct CoreResult {
    pub expr: String,
    pub helm_obj: String,
    /// Field path for subsequent pipeline `default` recording.
    pub field_path: Option<Vec<String>>,
}

impl CoreResult {
    fn new(expr: String, helm_obj: String) -> Self {
        CoreResult {
            expr,
            helm_obj,
            field_path: None,
        }
    }
}

type Handler = fn(&mut Converter, &[FuncArg]) -> Result<CoreResult>;

/// A core template function handler.
pub(crate) struct CoreFunc {
    /// The piped value goes first in args rather than last. Used by tpl,
    /// where the piped value is the template string.
    pub piped_first: bool,
    pub convert: Handler,
}

static CORE_FUNCS: phf::Map<&'static str, CoreFunc> = phf_map! {
    "default"        => CoreFunc { piped_first: false, convert: convert_default },
    "printf"         => CoreFunc { piped_first: false, convert: convert_printf },
    "print"          => CoreFunc { piped_first: false, convert: convert_print },
    "required"       => CoreFunc { piped_first: false, convert: convert_required },
    "include"        => CoreFunc { piped_first: false, convert: convert_include },
    "ternary"        => CoreFunc { piped_first: false, convert: convert_ternary },
    "list"           => CoreFunc { piped_first: false, convert: convert_list },
    "dict"           => CoreFunc { piped_first: false, convert: convert_dict },
    "get"            => CoreFunc { piped_first: false, convert: convert_get },
    "coalesce"       => CoreFunc { piped_first: false, convert: convert_coalesce },
    "max"            => CoreFunc { piped_first: false, convert: convert_max },
    "min"            => CoreFunc { piped_first: false, convert: convert_min },
    "tpl"            => CoreFunc { piped_first: true,  convert: convert_tpl },
    "merge"          => CoreFunc { piped_first: false, convert: convert_merge },
    "mergeOverwrite" => CoreFunc { piped_first: false, convert: convert_merge_overwrite },
};

static COMPARISON_OPS: phf::Map<&'static str, &'static str> = phf_map! {
    "eq" => "==",
    "ne" => "!=",
    "lt" => "<",
    "gt" => ">",
    "le" => "<=",
    "ge" => ">=",
};

pub(crate) fn core_func(name: &str) -> Option<&'static CoreFunc> {
    CORE_FUNCS.get(name)
}

pub(crate) fn comparison_op(name: &str) -> Option<&'static str> {
    COMPARISON_OPS.get(name).copied()
}

/// Builds the argument list for a pipeline invocation, placing the
/// piped value last (or first for piped-first functions).
pub(crate) fn build_pipe_args<'a>(
    cf: &CoreFunc,
    explicit: &'a [Arg],
    piped: FuncArg<'a>,
) -> Vec<FuncArg<'a>> {
    let mut args: Vec<FuncArg> = Vec::with_capacity(explicit.len() + 1);
    if cf.piped_first {
        args.push(piped);
        args.extend(explicit.iter().map(FuncArg::Node));
    } else {
        args.extend(explicit.iter().map(FuncArg::Node));
        args.push(piped);
    }
    args
}

// --- Argument resolution ----------------------------------------------

impl Converter<'_> {
    fn resolve_expr(&mut self, a: &FuncArg) -> Result<(String, String)> {
        match a {
            FuncArg::Node(node) => self.node_to_expr(node),
            FuncArg::Resolved { expr, obj, .. } => Ok((expr.clone(), obj.clone())),
        }
    }

    /// Resolves an argument with field tracking: returns the CUE
    /// expression, context object, and field path.
    fn resolve_field(&mut self, a: &FuncArg) -> Result<(String, String, Option<Vec<String>>)> {
        let node = match a {
            FuncArg::Resolved { expr, obj, path } => {
                return Ok((expr.clone(), obj.clone(), path.clone()))
            }
            FuncArg::Node(node) => node,
        };
        match node {
            Arg::Field(path) => {
                let (expr, helm_obj) =
                    crate::converter::field_to_cue(&self.config.context_objects, path);
                if !helm_obj.is_empty() {
                    let field_path = path[1..].to_vec();
                    self.track_field_ref(&helm_obj, field_path.clone());
                    return Ok((expr, helm_obj, Some(field_path)));
                }
                Ok((expr, helm_obj, None))
            }
            Arg::Variable(segs) if segs.len() >= 2 && segs[0] == "$" => {
                let (expr, helm_obj) =
                    crate::converter::field_to_cue(&self.config.context_objects, &segs[1..]);
                if !helm_obj.is_empty() {
                    let field_path = segs[2..].to_vec();
                    self.track_field_ref(&helm_obj, field_path.clone());
                    return Ok((expr, helm_obj, Some(field_path)));
                }
                Ok((expr, helm_obj, None))
            }
            other => {
                let (expr, helm_obj) = self.node_to_expr(other)?;
                Ok((expr, helm_obj, None))
            }
        }
    }

    fn resolve_literal(&mut self, a: &FuncArg) -> Result<String> {
        match a {
            FuncArg::Node(node) => self.literal_or_expr(node),
            FuncArg::Resolved { expr, .. } => Ok(expr.clone()),
        }
    }

    fn resolve_condition(&mut self, a: &FuncArg) -> Result<String> {
        match a {
            FuncArg::Node(node) => self.condition_node_to_expr(node),
            FuncArg::Resolved { expr, .. } => Ok(nonzero(expr)),
        }
    }
}

// --- Handler implementations ------------------------------------------

fn convert_default(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() != 2 {
        return Err(ConvertError::arity("default", 2, args.len()));
    }
    let default_val = c.resolve_literal(&args[0])?;
    let (expr, helm_obj, field_path) = c.resolve_field(&args[1])?;
    if let Some(path) = &field_path {
        if !helm_obj.is_empty() {
            c.record_default(&helm_obj, path.clone(), default_val);
        }
    }
    Ok(CoreResult {
        expr,
        helm_obj,
        field_path,
    })
}

fn convert_printf(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    let nodes = unresolved_nodes("printf", args)?;
    let (expr, helm_obj) = c.convert_printf(&nodes)?;
    Ok(CoreResult::new(expr, helm_obj))
}

fn convert_print(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    let nodes = unresolved_nodes("print", args)?;
    let expr = c.convert_print(&nodes)?;
    Ok(CoreResult::new(expr, String::new()))
}

fn convert_required(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() != 2 {
        return Err(ConvertError::arity("required", 2, args.len()));
    }
    let msg = c.resolve_literal(&args[0])?;
    let (expr, helm_obj, field_path) = c.resolve_field(&args[1])?;
    c.scope
        .comments
        .insert(expr.clone(), format!("// required: {msg}"));
    Ok(CoreResult {
        expr,
        helm_obj,
        field_path,
    })
}

pub(crate) fn convert_include(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.is_empty() {
        return Err(ConvertError::arity("include", "at least 1", 0));
    }
    let FuncArg::Node(name_node) = &args[0] else {
        return Err(ConvertError::unsupported(
            "include: template name must be an AST node",
        ));
    };

    let mut arg_expr = String::new();
    let mut ctx_obj = String::new();
    let mut ctx_base = Vec::new();
    if let Some(ctx) = args.get(1) {
        let FuncArg::Node(ctx_node) = ctx else {
            return Err(ConvertError::unsupported(
                "include: context must be an AST node",
            ));
        };
        (arg_expr, ctx_obj, ctx_base) = c.convert_include_context(ctx_node)?;
    }

    let cue_name = match name_node {
        Arg::Str(name) => c.handle_include(name),
        other => {
            let name_expr = c.convert_include_name_expr(other)?;
            c.bags.has_dynamic_include = true;
            format!("_helpers[{name_expr}]")
        }
    };

    let mut expr = cue_name.clone();
    if !ctx_obj.is_empty() {
        c.propagate_helper_arg_refs(&cue_name, &ctx_obj, &ctx_base);
    }
    if !arg_expr.is_empty() {
        expr = format!("{expr} & {{#arg: {arg_expr}, _}}");
    }
    Ok(CoreResult::new(expr, String::new()))
}

fn convert_ternary(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() != 3 {
        return Err(ConvertError::arity("ternary", 3, args.len()));
    }
    let (true_val, true_obj) = c.resolve_expr(&args[0])?;
    let (false_val, false_obj) = c.resolve_expr(&args[1])?;
    let cond = c.resolve_condition(&args[2])?;
    c.bags.has_conditions = true;
    // CUE comprehensions are field-level, so value-level selection uses
    // the list-index trick.
    let expr = format!("[if {cond} {{{true_val}}}, {false_val}][0]");
    let helm_obj = if !false_obj.is_empty() {
        false_obj
    } else {
        true_obj
    };
    Ok(CoreResult::new(expr, helm_obj))
}

fn convert_list(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    let mut helm_obj = String::new();
    let mut elems = Vec::with_capacity(args.len());
    for a in args {
        let (e, obj) = c.resolve_expr(a)?;
        if !obj.is_empty() {
            helm_obj = obj;
        }
        elems.push(e);
    }
    Ok(CoreResult::new(
        format!("[{}]", elems.join(", ")),
        helm_obj,
    ))
}

fn convert_dict(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.is_empty() {
        return Ok(CoreResult::new("{}".to_string(), String::new()));
    }
    if args.len() % 2 != 0 {
        return Err(ConvertError::arity(
            "dict",
            "an even number of",
            args.len(),
        ));
    }
    let mut helm_obj = String::new();
    let mut parts = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let FuncArg::Node(Arg::Str(key)) = &pair[0] else {
            return Err(ConvertError::unsupported("dict key must be a string literal"));
        };
        let (val, obj) = c.resolve_expr(&pair[1])?;
        if !obj.is_empty() {
            helm_obj = obj;
        }
        parts.push(format!("{}: {}", cue_key(key), val));
    }
    Ok(CoreResult::new(
        format!("{{{}}}", parts.join(", ")),
        helm_obj,
    ))
}

fn convert_get(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() != 2 {
        return Err(ConvertError::arity("get", 2, args.len()));
    }
    let (map_expr, map_obj, map_path) = c.resolve_field(&args[0])?;
    if !map_obj.is_empty() {
        // The map argument is non-scalar.
        c.track_non_scalar_ref(&map_obj, map_path.as_deref());
    }

    if let FuncArg::Node(Arg::Str(key)) = &args[1] {
        let expr = if is_identifier(key) {
            format!("{map_expr}.{key}")
        } else {
            format!("{map_expr}[{}]", quote_string(key))
        };
        return Ok(CoreResult::new(expr, map_obj));
    }
    let (key_expr, _) = c.resolve_expr(&args[1])?;
    Ok(CoreResult::new(
        format!("{map_expr}[{key_expr}]"),
        map_obj,
    ))
}

fn convert_coalesce(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.is_empty() {
        return Err(ConvertError::arity("coalesce", "at least 1", 0));
    }
    c.bags.has_conditions = true;
    let mut helm_obj = String::new();
    let mut elems = Vec::with_capacity(args.len());
    for (i, a) in args.iter().enumerate() {
        let (e, obj) = c.resolve_expr(a)?;
        if !obj.is_empty() {
            helm_obj = obj;
        }
        if i < args.len() - 1 {
            let cond = c.resolve_condition(a)?;
            elems.push(format!("if {cond} {{{e}}}"));
        } else {
            elems.push(e);
        }
    }
    Ok(CoreResult::new(
        format!("[{}][0]", elems.join(", ")),
        helm_obj,
    ))
}

fn convert_max(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() < 2 {
        return Err(ConvertError::arity("max", "at least 2", args.len()));
    }
    convert_min_max(c, args, "Max")
}

fn convert_min(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() < 2 {
        return Err(ConvertError::arity("min", "at least 2", args.len()));
    }
    convert_min_max(c, args, "Min")
}

fn convert_min_max(c: &mut Converter, args: &[FuncArg], func: &str) -> Result<CoreResult> {
    let mut helm_obj = String::new();
    let mut elems = Vec::with_capacity(args.len());
    for a in args {
        let (e, obj) = c.resolve_expr(a)?;
        if !obj.is_empty() {
            helm_obj = obj;
        }
        elems.push(e);
    }
    c.add_import("list");
    Ok(CoreResult::new(
        format!("list.{func}([{}])", elems.join(", ")),
        helm_obj,
    ))
}

pub(crate) fn convert_tpl(c: &mut Converter, args: &[FuncArg]) -> Result<CoreResult> {
    if args.len() != 2 {
        return Err(ConvertError::arity("tpl", 2, args.len()));
    }
    let (tmpl_expr, tmpl_obj) = match &args[0] {
        FuncArg::Node(node) => c.convert_tpl_arg(node)?,
        FuncArg::Resolved { expr, obj, .. } => (expr.clone(), obj.clone()),
    };

    c.convert_tpl_context();
    c.add_import("encoding/yaml");
    c.add_import("text/template");
    let h = c.tpl_context_def();
    c.use_helper(&h);

    Ok(CoreResult::new(
        format!("yaml.Unmarshal(template.Execute({tmpl_expr}, _tplContext))"),
        tmpl_obj,
    ))
}

fn convert_merge(_c: &mut Converter, _args: &[FuncArg]) -> Result<CoreResult> {
    merge_unsupported("merge")
}

fn convert_merge_overwrite(_c: &mut Converter, _args: &[FuncArg]) -> Result<CoreResult> {
    merge_unsupported("mergeOverwrite")
}

fn merge_unsupported(name: &str) -> Result<CoreResult> {
    Err(ConvertError::unsupported(format!(
        "function {name:?} has no CUE equivalent: CUE uses unification instead of mutable map merging"
    )))
}

fn unresolved_nodes(func: &str, args: &[FuncArg]) -> Result<Vec<Arg>> {
    let mut nodes = Vec::with_capacity(args.len());
    for a in args {
        match a {
            FuncArg::Node(node) => nodes.push((*node).clone()),
            FuncArg::Resolved { .. } => {
                return Err(ConvertError::unsupported(format!(
                    "{func}: unexpected pre-resolved argument"
                )))
            }
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_table_lookup() {
        assert!(core_func("default").is_some());
        assert!(core_func("ternary").is_some());
        assert!(core_func("tpl").unwrap().piped_first);
        assert!(core_func("quote").is_none());
        assert!(core_func("lookup").is_none());
    }

    #[test]
    fn comparison_table() {
        assert_eq!(comparison_op("eq"), Some("=="));
        assert_eq!(comparison_op("ge"), Some(">="));
        assert_eq!(comparison_op("and"), None);
    }
}
