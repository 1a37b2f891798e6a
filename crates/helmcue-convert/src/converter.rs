//! Template AST walking: expression translation and control flow.
//!
//! A [`Converter`] owns the emitter plus the accumulation bags for one
//! template conversion. Helper bodies are compiled by the same converter
//! with the per-body state (emitter, scope) swapped out, so schema
//! tracking accumulates across the whole conversion.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ast::{Arg, Command, Node, Pipe};
use crate::cue::{cue_key, quote_string};
use crate::emitter::{EmitState, Emitter, Frame, FrameKind};
use crate::error::{ConvertError, Result};
use crate::funcs::{self, FuncArg};
use crate::helm::SEMVER_COMPARE_DEF;
use crate::helpers::helper_to_cue_name;
use crate::schema::FieldDefault;
use crate::{Config, HelperDef};

/// What dot (`.`) refers to inside a with or range block.
#[derive(Debug, Clone)]
pub(crate) struct RangeBinding {
    /// CUE expression for dot rebinding (e.g. "#values.tls").
    pub cue_expr: String,
    /// Context object name (e.g. "Values"); empty if not context-derived.
    pub helm_obj: String,
    /// Field path prefix within the context object (e.g. ["tls"]).
    pub base_path: Vec<String>,
}

/// Accumulators shared between the main template body and helper-body
/// compilation.
#[derive(Debug, Default)]
pub(crate) struct Bags {
    pub used_context_objects: BTreeSet<String>,
    /// context object → recorded defaults.
    pub defaults: HashMap<String, Vec<FieldDefault>>,
    /// context object → field paths referenced.
    pub field_refs: HashMap<String, Vec<Vec<String>>>,
    /// context object → field paths accessed as values (not conditions).
    pub required_refs: HashMap<String, Vec<Vec<String>>>,
    /// context object → field paths used as range targets / non-scalars.
    pub range_refs: HashMap<String, Vec<Vec<String>>>,
    pub imports: BTreeSet<String>,
    pub used_helpers: BTreeMap<String, HelperDef>,
    /// template name → CUE hidden field name.
    pub helper_exprs: HashMap<String, String>,
    /// CUE hidden field name → compiled CUE expression.
    pub helper_cue: HashMap<String, String>,
    /// Original template names in deterministic (sorted) order.
    pub helper_order: Vec<String>,
    /// CUE helper name → field paths accessed on #arg in its body.
    pub helper_arg_field_refs: HashMap<String, Vec<Vec<String>>>,
    /// original template name → CUE name (referenced but not defined).
    pub undefined_helpers: BTreeMap<String, String>,
    pub has_dynamic_include: bool,
    pub has_conditions: bool,
}

/// Per-body state: locals, dot bindings, guards, comments.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    /// $varName → CUE expression.
    pub local_vars: HashMap<String, String>,
    pub range_stack: Vec<RangeBinding>,
    /// True while translating a condition: field references are not
    /// marked required.
    pub suppress_required: bool,
    /// Field paths accessed on #arg; `Some` only inside helper bodies.
    pub helper_arg_refs: Option<Vec<Vec<String>>>,
    /// CUE conditions wrapping the entire output.
    pub top_level_guards: Vec<String>,
    /// expr → trailing comment.
    pub comments: HashMap<String, String>,
}

pub(crate) struct Converter<'c> {
    pub config: &'c Config,
    pub bags: Bags,
    pub scope: Scope,
    pub emit: Emitter,
}

impl<'c> Converter<'c> {
    pub fn new(config: &'c Config) -> Self {
        Converter {
            config,
            bags: Bags::default(),
            scope: Scope::default(),
            emit: Emitter::new(),
        }
    }

    /// Reports whether the named core-handled function is enabled. With
    /// no restriction set, every core function is available.
    pub fn is_core_func(&self, name: &str) -> bool {
        match &self.config.core_funcs {
            None => true,
            Some(set) => set.contains(name),
        }
    }

    /// Records a field reference and, unless inside a condition, also
    /// records it as a required (value-accessed) reference.
    pub fn track_field_ref(&mut self, helm_obj: &str, path: Vec<String>) {
        self.bags
            .field_refs
            .entry(helm_obj.to_string())
            .or_default()
            .push(path.clone());
        if !self.scope.suppress_required {
            self.bags
                .required_refs
                .entry(helm_obj.to_string())
                .or_default()
                .push(path);
        }
    }

    /// Marks a field path as potentially non-scalar so the schema emits
    /// `_` instead of the scalar constraint.
    pub fn track_non_scalar_ref(&mut self, helm_obj: &str, path: Option<&[String]>) {
        if let (false, Some(path)) = (helm_obj.is_empty(), path) {
            self.bags
                .range_refs
                .entry(helm_obj.to_string())
                .or_default()
                .push(path.to_vec());
        }
    }

    pub fn record_default(&mut self, helm_obj: &str, path: Vec<String>, cue_value: String) {
        self.bags
            .defaults
            .entry(helm_obj.to_string())
            .or_default()
            .push(FieldDefault { path, cue_value });
    }

    pub fn add_import(&mut self, pkg: &str) {
        self.bags.imports.insert(pkg.to_string());
    }

    pub fn use_helper(&mut self, h: &HelperDef) {
        self.bags.used_helpers.insert(h.name.to_string(), h.clone());
    }

    // --- Node walking -----------------------------------------------------

    pub fn process_nodes(&mut self, nodes: &[Node]) -> Result<()> {
        if let Some(Node::If { pipe, then, .. }) = detect_top_level_if(nodes) {
            let (condition, _) = self
                .pipe_to_cue_condition(pipe)
                .map_err(|e| ConvertError::unsupported(format!("top-level if condition: {e}")))?;
            self.scope.top_level_guards.push(condition);
            let then = then.clone();
            return self.process_nodes(&then);
        }
        self.process_body_nodes(nodes)
    }

    pub fn process_body_nodes(&mut self, nodes: &[Node]) -> Result<()> {
        for (i, node) in nodes.iter().enumerate() {
            self.emit.next_node_is_inline =
                nodes.get(i + 1).map(is_inline_node).unwrap_or(false);
            self.process_node(node)?;
        }
        Ok(())
    }

    fn process_node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Text(text) => {
                self.emit.emit_text(text);
                Ok(())
            }
            Node::Action(pipe) => {
                if !pipe.decl.is_empty() {
                    let var_name = pipe.decl[0].clone();
                    let (expr, helm_obj) = self.action_to_cue(pipe)?;
                    if !helm_obj.is_empty() {
                        self.bags.used_context_objects.insert(helm_obj);
                    }
                    self.scope.local_vars.insert(var_name, expr);
                    return Ok(());
                }
                let (expr, helm_obj) = self.action_to_cue(pipe)?;
                if !helm_obj.is_empty() {
                    self.bags.used_context_objects.insert(helm_obj);
                }
                let comment = self.scope.comments.get(&expr).cloned().unwrap_or_default();
                self.emit.emit_action_expr(&expr, &comment);
                Ok(())
            }
            Node::If { pipe, then, else_ } => self.process_if(pipe, then, else_),
            Node::Range { pipe, body, else_ } => self.process_range(pipe, body, else_),
            Node::With { pipe, body, else_ } => self.process_with(pipe, body, else_),
            Node::Template { name, pipe } => self.process_template_call(name, pipe.as_ref()),
            Node::Comment(text) => {
                let text = text.trim();
                for line in text.split('\n') {
                    let cue_ind = self.emit.current_cue_indent();
                    crate::cue::write_indent(&mut self.emit.out, cue_ind);
                    let line = line.trim();
                    if line.is_empty() {
                        self.emit.out.push_str("//\n");
                    } else {
                        self.emit.out.push_str("// ");
                        self.emit.out.push_str(line);
                        self.emit.out.push('\n');
                    }
                }
                Ok(())
            }
        }
    }

    fn process_template_call(&mut self, name: &str, pipe: Option<&Pipe>) -> Result<()> {
        let cue_name = self.handle_include(name);
        let mut expr = cue_name.clone();
        if let Some(p) = pipe {
            if p.cmds.len() == 1 && p.cmds[0].args.len() == 1 {
                let (arg_expr, ctx_obj, ctx_base) =
                    self.convert_include_context(&p.cmds[0].args[0])?;
                if !arg_expr.is_empty() {
                    expr = format!("{expr} & {{#arg: {arg_expr}, _}}");
                }
                if !ctx_obj.is_empty() {
                    self.propagate_helper_arg_refs(&cue_name, &ctx_obj, &ctx_base);
                }
            }
        }
        self.emit.emit_action_expr(&expr, "");
        Ok(())
    }

    // --- Control flow -----------------------------------------------------

    fn process_if(&mut self, pipe: &Pipe, then: &[Node], else_: &[Node]) -> Result<()> {
        self.bags.has_conditions = true;
        self.emit.finalize_inline();
        self.emit.finalize_flow();
        self.emit.flush_pending_action();

        let (condition, neg_condition) = self
            .pipe_to_cue_condition(pipe)
            .map_err(|e| ConvertError::unsupported(format!("if condition: {e}")))?;

        let is_list = is_list_body(then);
        let body_indent = peek_body_indent(then);

        self.resolve_pending_before_block(is_list, body_indent);

        if body_indent >= 0 {
            self.emit.close_blocks_to(body_indent);
        }

        let cue_ind = self.emit.current_cue_indent();
        let in_list = matches!(
            self.emit.stack.last(),
            Some(f) if f.kind == FrameKind::Sequence
        );

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        self.emit.out.push_str("if ");
        self.emit.out.push_str(&condition);
        self.emit.out.push_str(" {\n");

        self.run_block_body(then, cue_ind, body_indent, in_list && is_list)?;

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        self.emit.out.push_str("}\n");

        if !else_.is_empty() {
            crate::cue::write_indent(&mut self.emit.out, cue_ind);
            self.emit.out.push_str("if ");
            self.emit.out.push_str(&neg_condition);
            self.emit.out.push_str(" {\n");

            let else_is_list = is_list_body(else_);
            let else_indent = peek_body_indent(else_);
            self.run_block_body(else_, cue_ind, else_indent, in_list && else_is_list)?;

            crate::cue::write_indent(&mut self.emit.out, cue_ind);
            self.emit.out.push_str("}\n");
        }

        Ok(())
    }

    fn process_with(&mut self, pipe: &Pipe, body: &[Node], else_: &[Node]) -> Result<()> {
        self.bags.has_conditions = true;
        self.emit.finalize_inline();
        self.emit.finalize_flow();
        self.emit.flush_pending_action();

        let (condition, neg_condition) = self
            .pipe_to_cue_condition(pipe)
            .map_err(|e| ConvertError::unsupported(format!("with condition: {e}")))?;

        let raw_expr = self.with_pipe_to_raw_expr(pipe)?;

        // Bind a declared variable: {{ with $v := .expr }}.
        if let Some(decl) = pipe.decl.first() {
            self.scope.local_vars.insert(decl.clone(), raw_expr.clone());
        }

        let is_list = is_list_body(body);
        let body_indent = peek_body_indent(body);

        self.resolve_pending_before_block(is_list, body_indent);

        if body_indent >= 0 {
            self.emit.close_blocks_to(body_indent);
        }

        let cue_ind = self.emit.current_cue_indent();
        let in_list = matches!(
            self.emit.stack.last(),
            Some(f) if f.kind == FrameKind::Sequence
        );

        let (helm_obj, base_path) = self.with_pipe_context(pipe);
        self.scope.range_stack.push(RangeBinding {
            cue_expr: raw_expr,
            helm_obj,
            base_path,
        });

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        self.emit.out.push_str("if ");
        self.emit.out.push_str(&condition);
        self.emit.out.push_str(" {\n");

        self.run_block_body(body, cue_ind, body_indent, in_list && is_list)?;

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        self.emit.out.push_str("}\n");

        // Dot is not rebound in the else branch.
        self.scope.range_stack.pop();

        if !else_.is_empty() {
            crate::cue::write_indent(&mut self.emit.out, cue_ind);
            self.emit.out.push_str("if ");
            self.emit.out.push_str(&neg_condition);
            self.emit.out.push_str(" {\n");

            let else_is_list = is_list_body(else_);
            let else_indent = peek_body_indent(else_);
            self.run_block_body(else_, cue_ind, else_indent, in_list && else_is_list)?;

            crate::cue::write_indent(&mut self.emit.out, cue_ind);
            self.emit.out.push_str("}\n");
        }

        if let Some(decl) = pipe.decl.first() {
            self.scope.local_vars.remove(decl);
        }

        Ok(())
    }

    fn process_range(&mut self, pipe: &Pipe, body: &[Node], _else: &[Node]) -> Result<()> {
        self.emit.finalize_inline();
        self.emit.finalize_flow();
        self.emit.flush_pending_action();

        // Iteration alone does not make the target required; only value
        // accesses do.
        let saved_suppress = self.scope.suppress_required;
        self.scope.suppress_required = true;
        let over = self.pipe_to_field_expr(pipe);
        self.scope.suppress_required = saved_suppress;
        let (over_expr, helm_obj, field_path) =
            over.map_err(|e| ConvertError::unsupported(format!("range: {e}")))?;
        if !helm_obj.is_empty() {
            self.bags.used_context_objects.insert(helm_obj.clone());
            if let Some(path) = &field_path {
                self.bags
                    .range_refs
                    .entry(helm_obj.clone())
                    .or_default()
                    .push(path.clone());
            }
        }

        let block_idx = self.scope.range_stack.len();

        // Generated names never collide with user variables.
        let mut key_name = String::new();
        let val_name;
        match pipe.decl.len() {
            2 => {
                key_name = format!("_key{block_idx}");
                val_name = format!("_val{block_idx}");
                self.scope
                    .local_vars
                    .insert(pipe.decl[0].clone(), key_name.clone());
                self.scope
                    .local_vars
                    .insert(pipe.decl[1].clone(), val_name.clone());
            }
            1 => {
                val_name = format!("_range{block_idx}");
                self.scope
                    .local_vars
                    .insert(pipe.decl[0].clone(), val_name.clone());
            }
            _ => {
                val_name = format!("_range{block_idx}");
            }
        }

        let is_list = is_list_body(body);
        let is_map = pipe.decl.len() == 2 && !is_list;
        let body_indent = peek_body_indent(body);

        // Flush deferred state before determining context.
        if let Some(deferred_indent) = self.emit.deferred.as_ref().map(|d| d.indent) {
            if body_indent >= 0 && body_indent > deferred_indent {
                self.emit.resolve_deferred_as_block(body_indent);
            } else {
                self.emit.flush_deferred();
            }
        }

        if self.emit.state == EmitState::PendingKey && !self.emit.pending_key.is_empty() {
            if is_list && !is_map {
                self.emit.open_pending_as_list(body_indent);
            } else {
                let child_indent = if body_indent < 0 {
                    self.emit.pending_key_ind + 2
                } else {
                    body_indent
                };
                self.emit.open_pending_as_mapping(child_indent);
            }
        } else if self.emit.state == EmitState::PendingKey {
            self.emit.state = EmitState::Normal;
        }

        if body_indent >= 0 {
            self.emit.close_blocks_to(body_indent);
        }

        let cue_ind = self.emit.current_cue_indent();
        let in_list = matches!(
            self.emit.stack.last(),
            Some(f) if f.kind == FrameKind::Sequence
        );

        let mut binding = RangeBinding {
            cue_expr: val_name.clone(),
            helm_obj: String::new(),
            base_path: Vec::new(),
        };
        if is_list && !helm_obj.is_empty() {
            if let Some(path) = &field_path {
                binding.helm_obj = helm_obj;
                binding.base_path = path.clone();
            }
        }
        self.scope.range_stack.push(binding);

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        let key_expr = if key_name.is_empty() { "_" } else { &key_name };
        self.emit
            .out
            .push_str(&format!("for {key_expr}, {val_name} in {over_expr} {{\n"));

        let saved_stack_len = self.emit.stack.len();
        let saved_state = self.emit.state;
        self.emit.state = EmitState::Normal;

        self.emit.stack.push(Frame {
            yaml_indent: body_ctx_indent(body_indent),
            cue_indent: cue_ind + 1,
            kind: if in_list && is_list && !is_map {
                FrameKind::Sequence
            } else {
                FrameKind::Mapping
            },
        });

        let saved_range_body = self.emit.in_range_body;
        self.emit.in_range_body = true;
        self.process_body_nodes(body)?;
        self.emit.finalize_inline();
        self.emit.finalize_flow();
        self.emit.flush_pending_action();
        self.emit.flush_deferred();
        self.emit.in_range_body = saved_range_body;

        while self.emit.stack.len() > saved_stack_len + 1 {
            self.emit.close_one_frame();
        }
        self.emit.stack.truncate(saved_stack_len);
        self.emit.state = saved_state;

        crate::cue::write_indent(&mut self.emit.out, cue_ind);
        self.emit.out.push_str("}\n");

        self.scope.range_stack.pop();
        for decl in &pipe.decl {
            self.scope.local_vars.remove(decl);
        }
        Ok(())
    }

    /// Flushes deferred state and resolves a pending key before opening
    /// an if/with block, choosing list vs mapping from the body shape.
    fn resolve_pending_before_block(&mut self, is_list: bool, body_indent: i32) {
        if let Some(deferred_indent) = self.emit.deferred.as_ref().map(|d| d.indent) {
            if body_indent >= 0 && body_indent > deferred_indent {
                self.emit.resolve_deferred_as_block(body_indent);
            } else {
                self.emit.flush_deferred();
            }
        }

        if self.emit.state == EmitState::PendingKey {
            if self.emit.pending_key.is_empty() {
                // Pending list item — the block lives inside the list.
                self.emit.state = EmitState::Normal;
            } else if is_list {
                self.emit.open_pending_as_list(body_indent);
            } else {
                let child_indent = if body_indent < 0 {
                    self.emit.pending_key_ind + 2
                } else {
                    body_indent
                };
                self.emit.open_pending_as_mapping(child_indent);
            }
        }
    }

    /// Processes a block body inside a guard/comprehension with the
    /// frame stack and emit state saved around it.
    fn run_block_body(
        &mut self,
        nodes: &[Node],
        cue_ind: usize,
        body_indent: i32,
        body_is_list: bool,
    ) -> Result<()> {
        let saved_stack_len = self.emit.stack.len();
        let saved_state = self.emit.state;
        self.emit.state = EmitState::Normal;

        self.emit.stack.push(Frame {
            yaml_indent: body_ctx_indent(body_indent),
            cue_indent: cue_ind + 1,
            kind: if body_is_list {
                FrameKind::Sequence
            } else {
                FrameKind::Mapping
            },
        });

        self.process_body_nodes(nodes)?;
        self.emit.finalize_inline();
        self.emit.finalize_flow();
        self.emit.flush_pending_action();
        self.emit.flush_deferred();

        while self.emit.stack.len() > saved_stack_len + 1 {
            self.emit.close_one_frame();
        }
        self.emit.stack.truncate(saved_stack_len);
        self.emit.state = saved_state;
        Ok(())
    }

    // --- With helpers -----------------------------------------------------

    /// Extracts the raw CUE expression from a with pipe for dot
    /// rebinding.
    fn with_pipe_to_raw_expr(&mut self, pipe: &Pipe) -> Result<String> {
        if pipe.cmds.len() != 1 || pipe.cmds[0].args.len() != 1 {
            return Err(ConvertError::unsupported(format!(
                "with: unsupported pipe shape: {pipe:?}"
            )));
        }
        let saved = self.scope.suppress_required;
        self.scope.suppress_required = true;
        let result = self.with_arg_to_raw_expr(&pipe.cmds[0].args[0]);
        self.scope.suppress_required = saved;
        result
    }

    fn with_arg_to_raw_expr(&mut self, arg: &Arg) -> Result<String> {
        match arg {
            Arg::Field(path) => {
                let (expr, _) = self.field_to_cue_in_context(path);
                Ok(expr)
            }
            Arg::Variable(segs) => {
                if segs.len() >= 2 && segs[0] == "$" {
                    let (expr, _) = field_to_cue(&self.config.context_objects, &segs[1..]);
                    return Ok(expr);
                }
                if let Some(local) = self.scope.local_vars.get(&segs[0]) {
                    if segs.len() == 1 {
                        return Ok(local.clone());
                    }
                    return Ok(format!("{}.{}", local, segs[1..].join(".")));
                }
                Err(ConvertError::unsupported(format!(
                    "with: unsupported variable: {segs:?}"
                )))
            }
            other => Err(ConvertError::unsupported(format!(
                "with: unsupported expression for dot rebinding: {other:?}"
            ))),
        }
    }

    /// Extracts the context object and path prefix from a with pipe so
    /// sub-field accesses in the body track into the outer schema.
    fn with_pipe_context(&self, pipe: &Pipe) -> (String, Vec<String>) {
        if pipe.cmds.len() != 1 || pipe.cmds[0].args.len() != 1 {
            return (String::new(), Vec::new());
        }
        match &pipe.cmds[0].args[0] {
            Arg::Field(path) => {
                if let Some(first) = path.first() {
                    if self.config.context_objects.contains_key(first) {
                        return (first.clone(), path[1..].to_vec());
                    }
                }
                // Inside a context-derived binding, extend the base path.
                if let Some(top) = self.scope.range_stack.last() {
                    if !top.helm_obj.is_empty() {
                        let mut bp = top.base_path.clone();
                        bp.extend(path.iter().cloned());
                        return (top.helm_obj.clone(), bp);
                    }
                }
                (String::new(), Vec::new())
            }
            Arg::Variable(segs) if segs.len() >= 2 && segs[0] == "$" => {
                if self.config.context_objects.contains_key(&segs[1]) {
                    return (segs[1].clone(), segs[2..].to_vec());
                }
                (String::new(), Vec::new())
            }
            _ => (String::new(), Vec::new()),
        }
    }

    // --- Range helpers ----------------------------------------------------

    /// Converts a range pipe to (expr, context object, field path).
    fn pipe_to_field_expr(&mut self, pipe: &Pipe) -> Result<(String, String, Option<Vec<String>>)> {
        if pipe.cmds.len() != 1 || pipe.cmds[0].args.len() != 1 {
            return Err(ConvertError::unsupported(format!(
                "unsupported pipe: {pipe:?}"
            )));
        }
        match &pipe.cmds[0].args[0] {
            Arg::Field(path) => {
                let (expr, helm_obj) = field_to_cue(&self.config.context_objects, path);
                if !helm_obj.is_empty() {
                    let field_path = path[1..].to_vec();
                    self.track_field_ref(&helm_obj, field_path.clone());
                    return Ok((expr, helm_obj, Some(field_path)));
                }
                Ok((expr, helm_obj, None))
            }
            Arg::Variable(segs) if segs.len() >= 2 && segs[0] == "$" => {
                let (expr, helm_obj) = field_to_cue(&self.config.context_objects, &segs[1..]);
                if !helm_obj.is_empty() {
                    let field_path = segs[2..].to_vec();
                    self.track_field_ref(&helm_obj, field_path.clone());
                    return Ok((expr, helm_obj, Some(field_path)));
                }
                Ok((expr, helm_obj, None))
            }
            Arg::Variable(segs) => {
                if let Some(local) = self.scope.local_vars.get(&segs[0]) {
                    let expr = if segs.len() == 1 {
                        local.clone()
                    } else {
                        format!("{}.{}", local, segs[1..].join("."))
                    };
                    return Ok((expr, String::new(), None));
                }
                Err(ConvertError::unsupported(format!(
                    "unsupported variable: {segs:?}"
                )))
            }
            Arg::Dot => {
                if let Some(top) = self.scope.range_stack.last() {
                    return Ok((top.cue_expr.clone(), String::new(), None));
                }
                Err(ConvertError::unsupported(
                    "{{ . }} outside range/with not supported",
                ))
            }
            other => Err(ConvertError::unsupported(format!(
                "unsupported node: {other:?}"
            ))),
        }
    }

    // --- Conditions -------------------------------------------------------

    /// Converts a condition pipe to (positive, negated) CUE expressions.
    pub fn pipe_to_cue_condition(&mut self, pipe: &Pipe) -> Result<(String, String)> {
        let saved = self.scope.suppress_required;
        self.scope.suppress_required = true;
        let pos = self.condition_pipe_to_expr(pipe);
        self.scope.suppress_required = saved;
        let pos = pos?;
        let neg = format!("!({pos})");
        Ok((pos, neg))
    }

    pub fn condition_node_to_expr(&mut self, arg: &Arg) -> Result<String> {
        match arg {
            Arg::Field(path) => {
                let (expr, helm_obj) = self.field_to_cue_in_context(path);
                if !helm_obj.is_empty() {
                    self.bags.used_context_objects.insert(helm_obj.clone());
                    if path.len() >= 2 {
                        self.track_field_ref(&helm_obj, path[1..].to_vec());
                    }
                }
                Ok(nonzero(&expr))
            }
            Arg::Variable(segs) => {
                if segs.len() >= 2 && segs[0] == "$" {
                    let (expr, helm_obj) = field_to_cue(&self.config.context_objects, &segs[1..]);
                    if !helm_obj.is_empty() {
                        self.bags.used_context_objects.insert(helm_obj.clone());
                        if segs.len() >= 3 {
                            self.track_field_ref(&helm_obj, segs[2..].to_vec());
                        }
                    }
                    return Ok(nonzero(&expr));
                }
                if let Some(local) = self.scope.local_vars.get(&segs[0]) {
                    let expr = if segs.len() == 1 {
                        local.clone()
                    } else {
                        format!("{}.{}", local, segs[1..].join("."))
                    };
                    return Ok(nonzero(&expr));
                }
                Err(ConvertError::unsupported(format!(
                    "unsupported variable in condition: {segs:?}"
                )))
            }
            Arg::Pipe(pipe) => self.condition_pipe_to_expr(pipe),
            Arg::Dot => {
                let expr = self.dot_expr()?;
                Ok(nonzero(&expr))
            }
            other => Err(ConvertError::unsupported(format!(
                "unsupported condition node: {other:?}"
            ))),
        }
    }

    fn condition_node_to_raw_expr(&mut self, arg: &Arg) -> Result<String> {
        match arg {
            Arg::Field(path) => {
                let (expr, helm_obj) = self.field_to_cue_in_context(path);
                if !helm_obj.is_empty() {
                    self.bags.used_context_objects.insert(helm_obj.clone());
                    if path.len() >= 2 {
                        self.track_field_ref(&helm_obj, path[1..].to_vec());
                    }
                }
                Ok(expr)
            }
            Arg::Variable(segs) => {
                if segs.len() >= 2 && segs[0] == "$" {
                    let (expr, helm_obj) = field_to_cue(&self.config.context_objects, &segs[1..]);
                    if !helm_obj.is_empty() {
                        self.bags.used_context_objects.insert(helm_obj.clone());
                        if segs.len() >= 3 {
                            self.track_field_ref(&helm_obj, segs[2..].to_vec());
                        }
                    }
                    return Ok(expr);
                }
                if let Some(local) = self.scope.local_vars.get(&segs[0]) {
                    if segs.len() == 1 {
                        return Ok(local.clone());
                    }
                    return Ok(format!("{}.{}", local, segs[1..].join(".")));
                }
                Err(ConvertError::unsupported(format!(
                    "unsupported variable in condition: {segs:?}"
                )))
            }
            Arg::Str(s) => Ok(quote_string(s)),
            Arg::Number(text) => Ok(text.clone()),
            Arg::Bool(b) => Ok(b.to_string()),
            Arg::Nil => Ok("null".to_string()),
            Arg::Dot => self.dot_expr(),
            Arg::Pipe(pipe) => self.condition_pipe_to_expr(pipe),
            other => Err(ConvertError::unsupported(format!(
                "unsupported condition node: {other:?}"
            ))),
        }
    }

    fn condition_pipe_to_expr(&mut self, pipe: &Pipe) -> Result<String> {
        if pipe.cmds.is_empty() {
            return Err(ConvertError::unsupported("empty condition pipe"));
        }
        if pipe.cmds.len() > 1 {
            return self.condition_multi_cmd_pipe(pipe);
        }

        let cmd = &pipe.cmds[0];
        if cmd.args.is_empty() {
            return Err(ConvertError::unsupported("empty condition command"));
        }

        if let Arg::Ident(name) = &cmd.args[0] {
            let args = &cmd.args[1..];
            return self.condition_function(name, args);
        }

        if cmd.args.len() == 1 {
            return self.condition_node_to_expr(&cmd.args[0]);
        }
        Err(ConvertError::unsupported(format!(
            "unsupported condition: {cmd:?}"
        )))
    }

    fn condition_function(&mut self, name: &str, args: &[Arg]) -> Result<String> {
        match name {
            "not" => {
                if args.len() != 1 {
                    return Err(ConvertError::arity("not", 1, args.len()));
                }
                let inner = self.condition_node_to_expr(&args[0])?;
                Ok(format!("!({inner})"))
            }
            "and" | "or" => {
                if args.len() < 2 {
                    return Err(ConvertError::arity(name, "at least 2", args.len()));
                }
                let op = if name == "and" { " && " } else { " || " };
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.condition_node_to_expr(a))
                    .collect::<Result<_>>()?;
                Ok(parts.join(op))
            }
            "eq" | "ne" | "lt" | "gt" | "le" | "ge" => {
                if args.len() != 2 {
                    return Err(ConvertError::arity(name, 2, args.len()));
                }
                let a = self.condition_node_to_raw_expr(&args[0])?;
                let b = self.condition_node_to_raw_expr(&args[1])?;
                let op = funcs::comparison_op(name).expect("known operator");
                Ok(format!("{a} {op} {b}"))
            }
            "empty" => {
                self.gate_condition_func(name)?;
                if args.len() != 1 {
                    return Err(ConvertError::arity("empty", 1, args.len()));
                }
                let inner = self.condition_node_to_expr(&args[0])?;
                Ok(format!("!({inner})"))
            }
            "hasKey" => {
                self.gate_condition_func(name)?;
                if args.len() != 2 {
                    return Err(ConvertError::arity("hasKey", 2, args.len()));
                }
                // The map argument is non-scalar.
                if let Arg::Field(path) = &args[0] {
                    let (_, helm_obj) = self.field_to_cue_in_context(path);
                    if !helm_obj.is_empty() && path.len() >= 2 {
                        self.track_non_scalar_ref(&helm_obj, Some(&path[1..]));
                    }
                }
                let map_expr = self.condition_node_to_raw_expr(&args[0])?;
                let Arg::Str(key) = &args[1] else {
                    return Err(ConvertError::unsupported(
                        "hasKey key must be a string literal",
                    ));
                };
                Ok(nonzero(&format!("{}.{}", map_expr, cue_key(key))))
            }
            "coalesce" => {
                self.gate_condition_func(name)?;
                if args.is_empty() {
                    return Err(ConvertError::arity("coalesce", "at least 1", 0));
                }
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.condition_node_to_expr(a))
                    .collect::<Result<_>>()?;
                Ok(parts.join(" || "))
            }
            "include" => {
                self.gate_condition_func(name)?;
                if args.is_empty() {
                    return Err(ConvertError::arity("include", "at least 1", 0));
                }
                let mut arg_expr = String::new();
                let mut ctx_obj = String::new();
                let mut ctx_base = Vec::new();
                if args.len() >= 2 {
                    (arg_expr, ctx_obj, ctx_base) = self.convert_include_context(&args[1])?;
                }
                let mut incl_expr = match &args[0] {
                    Arg::Str(name) => self.handle_include(name),
                    other => {
                        let name_expr = self.convert_include_name_expr(other)?;
                        self.bags.has_dynamic_include = true;
                        format!("_helpers[{name_expr}]")
                    }
                };
                if !ctx_obj.is_empty() {
                    self.propagate_helper_arg_refs(&incl_expr, &ctx_obj, &ctx_base);
                }
                if !arg_expr.is_empty() {
                    incl_expr = format!("{incl_expr} & {{#arg: {arg_expr}, _}}");
                }
                Ok(nonzero(&incl_expr))
            }
            "semverCompare" => {
                self.gate_condition_func(name)?;
                if args.len() != 2 {
                    return Err(ConvertError::arity("semverCompare", 2, args.len()));
                }
                let Arg::Str(constraint) = &args[0] else {
                    return Err(ConvertError::unsupported(
                        "semverCompare constraint must be a string literal",
                    ));
                };
                let ver_expr = self.condition_node_to_raw_expr(&args[1])?;
                self.use_helper(&HelperDef {
                    name: "_semverCompare",
                    def: SEMVER_COMPARE_DEF.to_string(),
                    imports: vec!["strings", "strconv"],
                });
                self.add_import("strings");
                self.add_import("strconv");
                Ok(format!(
                    "(_semverCompare & {{#constraint: {}, #version: {}}}).out",
                    quote_string(constraint),
                    ver_expr
                ))
            }
            other => Err(ConvertError::UnsupportedFunction {
                name: other.to_string(),
                gated: false,
            }),
        }
    }

    fn gate_condition_func(&self, name: &str) -> Result<()> {
        if !self.is_core_func(name) {
            return Err(ConvertError::UnsupportedFunction {
                name: name.to_string(),
                gated: true,
            });
        }
        Ok(())
    }

    /// Multi-command pipes in conditions, e.g. `.Values.x | default false`.
    fn condition_multi_cmd_pipe(&mut self, pipe: &Pipe) -> Result<String> {
        let first = &pipe.cmds[0];
        if first.args.len() != 1 {
            return Err(ConvertError::unsupported(format!(
                "unsupported multi-command condition: {pipe:?}"
            )));
        }
        let expr = self.condition_node_to_raw_expr(&first.args[0])?;

        // Track field info so defaults can be recorded.
        let (helm_obj, field_path) = self.arg_field_info(&first.args[0]);

        for cmd in &pipe.cmds[1..] {
            let Some(Arg::Ident(name)) = cmd.args.first() else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported multi-command condition: {pipe:?}"
                )));
            };
            match name.as_str() {
                "default" => {
                    self.gate_condition_func(name)?;
                    if cmd.args.len() != 2 {
                        return Err(ConvertError::arity("default", 1, cmd.args.len() - 1));
                    }
                    let default_val = self.literal_or_expr(&cmd.args[1])?;
                    if let (Some(obj), Some(path)) = (&helm_obj, &field_path) {
                        self.record_default(obj, path.clone(), default_val);
                    }
                }
                other => {
                    return Err(ConvertError::UnsupportedFunction {
                        name: other.to_string(),
                        gated: false,
                    })
                }
            }
        }

        Ok(nonzero(&expr))
    }

    /// Resolves an argument as a CUE literal, falling back to a full
    /// expression conversion.
    pub fn literal_or_expr(&mut self, arg: &Arg) -> Result<String> {
        match node_to_cue_literal(arg) {
            Ok(lit) => Ok(lit),
            Err(lit_err) => match self.node_to_expr(arg) {
                Ok((expr, _)) => Ok(expr),
                Err(_) => Err(lit_err),
            },
        }
    }

    /// Returns the context object and field path of a field-like arg.
    fn arg_field_info(&self, arg: &Arg) -> (Option<String>, Option<Vec<String>>) {
        match arg {
            Arg::Field(path) => {
                if let Some(first) = path.first() {
                    if self.config.context_objects.contains_key(first) {
                        return (Some(first.clone()), Some(path[1..].to_vec()));
                    }
                }
                (None, None)
            }
            Arg::Variable(segs) if segs.len() >= 2 && segs[0] == "$" => {
                if self.config.context_objects.contains_key(&segs[1]) {
                    return (Some(segs[1].clone()), Some(segs[2..].to_vec()));
                }
                (None, None)
            }
            _ => (None, None),
        }
    }

    // --- Value expressions ------------------------------------------------

    pub fn dot_expr(&self) -> Result<String> {
        if let Some(top) = self.scope.range_stack.last() {
            return Ok(top.cue_expr.clone());
        }
        if let Some(root) = &self.config.root_expr {
            return Ok(root.clone());
        }
        Err(ConvertError::unsupported(
            "{{ . }} outside range/with not supported",
        ))
    }

    pub fn node_to_expr(&mut self, arg: &Arg) -> Result<(String, String)> {
        match arg {
            Arg::Field(path) => {
                let (expr, helm_obj) = self.field_to_cue_in_context(path);
                if !helm_obj.is_empty() {
                    self.track_field_ref(&helm_obj, path[1..].to_vec());
                    self.bags.used_context_objects.insert(helm_obj.clone());
                }
                Ok((expr, helm_obj))
            }
            Arg::Variable(segs) => {
                if segs.len() >= 2 && segs[0] == "$" {
                    let (expr, helm_obj) = field_to_cue(&self.config.context_objects, &segs[1..]);
                    if !helm_obj.is_empty() {
                        self.track_field_ref(&helm_obj, segs[2..].to_vec());
                        self.bags.used_context_objects.insert(helm_obj.clone());
                    }
                    return Ok((expr, helm_obj));
                }
                if let Some(local) = self.scope.local_vars.get(&segs[0]) {
                    if segs.len() == 1 {
                        return Ok((local.clone(), String::new()));
                    }
                    return Ok((
                        format!("{}.{}", local, segs[1..].join(".")),
                        String::new(),
                    ));
                }
                Err(ConvertError::unsupported(format!(
                    "unsupported variable: {segs:?}"
                )))
            }
            Arg::Str(s) => Ok((quote_string(s), String::new())),
            Arg::Number(text) => Ok((text.clone(), String::new())),
            Arg::Bool(b) => Ok((b.to_string(), String::new())),
            Arg::Nil => Ok(("null".to_string(), String::new())),
            Arg::Dot => Ok((self.dot_expr()?, String::new())),
            Arg::Pipe(pipe) => self.pipe_node_to_expr(pipe),
            Arg::Ident(name) => Err(ConvertError::UnsupportedFunction {
                name: name.clone(),
                gated: false,
            }),
        }
    }

    /// Converts a PipeNode used as a sub-expression. Single-command
    /// pipes with printf/print/include/tpl produce complete expressions
    /// not suitable for further piping; everything else goes through
    /// the general sub-pipe path.
    fn pipe_node_to_expr(&mut self, pipe: &Pipe) -> Result<(String, String)> {
        if pipe.cmds.len() == 1 {
            if let Some(Arg::Ident(name)) = pipe.cmds[0].args.first() {
                match name.as_str() {
                    "printf" => return self.convert_printf(&pipe.cmds[0].args[1..]),
                    "print" => {
                        let expr = self.convert_print(&pipe.cmds[0].args[1..])?;
                        return Ok((expr, String::new()));
                    }
                    "include" => {
                        let args: Vec<FuncArg> =
                            pipe.cmds[0].args[1..].iter().map(FuncArg::Node).collect();
                        let r = funcs::convert_include(self, &args)?;
                        return Ok((r.expr, r.helm_obj));
                    }
                    "tpl" => {
                        let args: Vec<FuncArg> =
                            pipe.cmds[0].args[1..].iter().map(FuncArg::Node).collect();
                        let r = funcs::convert_tpl(self, &args)?;
                        return Ok((r.expr, r.helm_obj));
                    }
                    _ => {}
                }
            }
        }
        self.convert_sub_pipe(pipe)
    }

    /// Converts a general sub-pipe: a first value or function command,
    /// followed by zero or more configured pipeline functions.
    fn convert_sub_pipe(&mut self, pipe: &Pipe) -> Result<(String, String)> {
        if pipe.cmds.is_empty() {
            return Err(ConvertError::unsupported(format!(
                "unsupported pipe node: {pipe:?}"
            )));
        }

        let first = &pipe.cmds[0];
        let (mut expr, mut helm_obj) = (String::new(), String::new());

        if first.args.len() == 1 {
            (expr, helm_obj) = self.node_to_expr(&first.args[0])?;
        } else if first.args.len() >= 2 {
            let Arg::Ident(name) = &first.args[0] else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported pipe node: {pipe:?}"
                )));
            };
            if name == "default" && self.is_core_func(name) && first.args.len() == 3 {
                // default inside a sub-expression becomes a CUE default
                // disjunction rather than a schema side effect.
                let default_val = self.literal_or_expr(&first.args[1])?;
                let (field_expr, obj) = self.node_to_expr(&first.args[2])?;
                expr = format!("*{default_val} | {field_expr}");
                helm_obj = obj;
            } else if let Some(pf) = self.config.funcs.get(name).cloned() {
                let last = first.args.last().expect("len >= 2");
                let (piped, obj) = self.node_to_expr(last)?;
                helm_obj = obj;
                expr = piped;
                if let Some(convert) = pf.convert {
                    let mut call_args = Vec::new();
                    for a in &first.args[1..first.args.len() - 1] {
                        call_args.push(self.literal_or_expr(a)?);
                    }
                    expr = convert(&expr, &call_args);
                    self.apply_pipeline_func_effects(&pf);
                }
            } else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported pipe node: {pipe:?}"
                )));
            }
        }

        if expr.is_empty() {
            return Err(ConvertError::unsupported(format!(
                "unsupported pipe node: {pipe:?}"
            )));
        }

        for cmd in &pipe.cmds[1..] {
            let Some(Arg::Ident(name)) = cmd.args.first() else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported pipe node: {pipe:?}"
                )));
            };
            let Some(pf) = self.config.funcs.get(name).cloned() else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported pipe node: {pipe:?}"
                )));
            };
            let Some(convert) = pf.convert else {
                continue; // no-op/passthrough function
            };
            let mut call_args = Vec::new();
            for a in &cmd.args[1..] {
                call_args.push(self.literal_or_expr(a)?);
            }
            expr = convert(&expr, &call_args);
            self.apply_pipeline_func_effects(&pf);
        }

        Ok((expr, helm_obj))
    }

    pub(crate) fn apply_pipeline_func_effects(&mut self, pf: &crate::PipelineFunc) {
        for pkg in &pf.imports {
            self.add_import(pkg);
        }
        for h in &pf.helpers {
            self.use_helper(h);
        }
    }

    // --- Actions ----------------------------------------------------------

    /// Converts a full action pipe into a CUE expression, dispatching
    /// functions and applying pipeline stages.
    pub fn action_to_cue(&mut self, pipe: &Pipe) -> Result<(String, String)> {
        if pipe.cmds.is_empty() {
            return Err(ConvertError::unsupported("empty pipe in action"));
        }

        let (mut expr, mut helm_obj, mut field_path) =
            self.first_command_to_expr(&pipe.cmds[0])?;

        for cmd in &pipe.cmds[1..] {
            if cmd.args.is_empty() {
                return Err(ConvertError::unsupported("empty command in pipeline"));
            }
            let Arg::Ident(name) = &cmd.args[0] else {
                return Err(ConvertError::unsupported(format!(
                    "unsupported pipeline function: {:?}",
                    cmd.args[0]
                )));
            };

            match name.as_str() {
                // Core functions valid in piped position.
                "default" | "required" | "tpl" => {
                    if !self.is_core_func(name) {
                        return Err(ConvertError::UnsupportedFunction {
                            name: name.clone(),
                            gated: true,
                        });
                    }
                    let cf = funcs::core_func(name).expect("core function registered");
                    let piped = FuncArg::Resolved {
                        expr: expr.clone(),
                        obj: helm_obj.clone(),
                        path: field_path.clone(),
                    };
                    let args = funcs::build_pipe_args(cf, &cmd.args[1..], piped);
                    let r = (cf.convert)(self, &args)?;
                    expr = r.expr;
                    if !r.helm_obj.is_empty() {
                        helm_obj = r.helm_obj;
                    }
                }
                _ => {
                    let Some(pf) = self.config.funcs.get(name).cloned() else {
                        return Err(ConvertError::UnsupportedFunction {
                            name: name.clone(),
                            gated: false,
                        });
                    };
                    if pf.non_scalar {
                        let obj = helm_obj.clone();
                        self.track_non_scalar_ref(&obj, field_path.as_deref());
                    }
                    let Some(convert) = pf.convert else {
                        continue; // no-op (nindent, indent, toYaml, …)
                    };
                    let args = if pf.nargs > 0 {
                        self.extract_pipeline_args(name, cmd, pf.nargs)?
                    } else {
                        Vec::new()
                    };
                    let result = convert(&expr, &args);
                    if result.is_empty() {
                        // Sentinel for functions with no static equivalent.
                        return Err(ConvertError::unsupported(format!(
                            "function {name:?} has no CUE equivalent and cannot be converted"
                        )));
                    }
                    expr = result;
                    self.apply_pipeline_func_effects(&pf);
                }
            }
        }

        Ok((expr, helm_obj))
    }

    /// Converts the first command of an action pipe. Returns the CUE
    /// expression, the context object, and the field path (for pipeline
    /// `default` recording).
    fn first_command_to_expr(
        &mut self,
        cmd: &Command,
    ) -> Result<(String, String, Option<Vec<String>>)> {
        if cmd.args.is_empty() {
            return Err(ConvertError::unsupported("empty command"));
        }

        if cmd.args.len() == 1 {
            return match &cmd.args[0] {
                Arg::Ident(name) => self.dispatch_function(name, &[]),
                arg => {
                    let (expr, helm_obj) = self.node_to_expr(arg)?;
                    let field_path = self.arg_field_info(arg).1;
                    Ok((expr, helm_obj, field_path))
                }
            };
        }

        let Arg::Ident(name) = &cmd.args[0] else {
            return Err(ConvertError::unsupported(format!(
                "unsupported template action: {cmd:?}"
            )));
        };
        self.dispatch_function(name, &cmd.args[1..])
    }

    /// Dispatches a named function in first-command position: core
    /// table first, then configured pipeline functions.
    fn dispatch_function(
        &mut self,
        name: &str,
        args: &[Arg],
    ) -> Result<(String, String, Option<Vec<String>>)> {
        if let Some(cf) = funcs::core_func(name) {
            if !self.is_core_func(name) {
                return Err(ConvertError::UnsupportedFunction {
                    name: name.to_string(),
                    gated: true,
                });
            }
            let func_args: Vec<FuncArg> = args.iter().map(FuncArg::Node).collect();
            let r = (cf.convert)(self, &func_args)?;
            return Ok((r.expr, r.helm_obj, r.field_path));
        }

        if let Some(pf) = self.config.funcs.get(name).cloned() {
            // Passthrough in first-command position: {{ toYaml .Values.x }}.
            if pf.passthrough && args.len() == 1 {
                let (expr, helm_obj) = self.node_to_expr(&args[0])?;
                let mut field_path = None;
                if let Arg::Field(path) = &args[0] {
                    if !helm_obj.is_empty() && path.len() >= 2 {
                        field_path = Some(path[1..].to_vec());
                        if pf.non_scalar {
                            let obj = helm_obj.clone();
                            self.track_non_scalar_ref(&obj, Some(&path[1..]));
                        }
                    }
                }
                return Ok((expr, helm_obj, field_path));
            }
            // Explicit args plus the piped value last:
            // {{ func arg1 … argN value }}.
            if pf.convert.is_some() && args.len() == pf.nargs + 1 {
                let mut call_args = Vec::new();
                for a in &args[..pf.nargs] {
                    call_args.push(self.literal_or_expr(a)?);
                }
                let piped = &args[pf.nargs];
                let (piped_expr, helm_obj) = self.node_to_expr(piped)?;
                let mut field_path = None;
                if let Arg::Field(path) = piped {
                    if !helm_obj.is_empty() && path.len() >= 2 {
                        field_path = Some(path[1..].to_vec());
                        if pf.non_scalar {
                            let obj = helm_obj.clone();
                            self.track_non_scalar_ref(&obj, Some(&path[1..]));
                        }
                    }
                }
                let convert = pf.convert.expect("checked above");
                let expr = convert(&piped_expr, &call_args);
                if expr.is_empty() {
                    return Err(ConvertError::unsupported(format!(
                        "function {name:?} has no CUE equivalent and cannot be converted"
                    )));
                }
                self.apply_pipeline_func_effects(&pf);
                return Ok((expr, helm_obj, field_path));
            }
        }

        Err(ConvertError::UnsupportedFunction {
            name: name.to_string(),
            gated: false,
        })
    }

    pub(crate) fn extract_pipeline_args(
        &mut self,
        name: &str,
        cmd: &Command,
        n: usize,
    ) -> Result<Vec<String>> {
        if cmd.args.len() - 1 != n {
            return Err(ConvertError::arity(name, n, cmd.args.len() - 1));
        }
        let mut result = Vec::with_capacity(n);
        for arg in &cmd.args[1..] {
            result.push(self.literal_or_expr(arg)?);
        }
        Ok(result)
    }

    // --- printf / print ---------------------------------------------------

    pub(crate) fn convert_printf(&mut self, args: &[Arg]) -> Result<(String, String)> {
        let Some(Arg::Str(format)) = args.first() else {
            return Err(ConvertError::unsupported(
                "printf format must be a string literal",
            ));
        };
        let value_args = &args[1..];

        let mut helm_obj = String::new();
        let mut out = String::from("\"");
        let mut arg_idx = 0;

        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.peek().copied() {
                    Some('s') | Some('d') | Some('v') => {
                        chars.next();
                        if arg_idx >= value_args.len() {
                            return Err(ConvertError::arity(
                                "printf",
                                format!("{} format argument(s)", arg_idx + 1),
                                value_args.len(),
                            ));
                        }
                        let (arg_expr, arg_obj) = self.node_to_expr(&value_args[arg_idx])?;
                        if !arg_obj.is_empty() {
                            helm_obj = arg_obj;
                        }
                        out.push_str("\\(");
                        out.push_str(&arg_expr);
                        out.push(')');
                        arg_idx += 1;
                    }
                    Some('%') => {
                        chars.next();
                        out.push('%');
                    }
                    Some(other) => {
                        return Err(ConvertError::unsupported(format!(
                            "printf: unsupported format verb %{other}"
                        )));
                    }
                    None => out.push('%'),
                }
            } else {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
        }

        out.push('"');
        Ok((out, helm_obj))
    }

    /// Converts a `print` call (concatenation semantics) to a CUE
    /// interpolated string.
    pub(crate) fn convert_print(&mut self, args: &[Arg]) -> Result<String> {
        let mut out = String::from("\"");
        for arg in args {
            match arg {
                Arg::Str(s) => out.push_str(&crate::cue::escape_interpolation(s)),
                other => {
                    let (expr, _) = self.node_to_expr(other)?;
                    out.push_str("\\(");
                    out.push_str(&expr);
                    out.push(')');
                }
            }
        }
        out.push('"');
        Ok(out)
    }

    // --- Include ----------------------------------------------------------

    /// Resolves a helper name to its CUE hidden field name, recording a
    /// stub for names without a definition.
    pub(crate) fn handle_include(&mut self, name: &str) -> String {
        if let Some(cue_name) = self.bags.helper_exprs.get(name) {
            return cue_name.clone();
        }
        let cue_name = helper_to_cue_name(name);
        self.bags
            .undefined_helpers
            .insert(name.to_string(), cue_name.clone());
        cue_name
    }

    /// Records a helper's `#arg` sub-field accesses into the context
    /// object's refs, prefixed by the include call's argument path.
    pub(crate) fn propagate_helper_arg_refs(
        &mut self,
        cue_name: &str,
        helm_obj: &str,
        base_path: &[String],
    ) {
        let arg_refs = self
            .bags
            .helper_arg_field_refs
            .get(cue_name)
            .cloned()
            .unwrap_or_default();
        for r in arg_refs {
            let mut combined = base_path.to_vec();
            combined.extend(r);
            self.track_field_ref(helm_obj, combined);
        }
    }

    /// Converts the context argument of an include call. Returns the
    /// CUE expression for field references (empty for dot/variable/pipe
    /// arguments), plus the context object and base path.
    pub(crate) fn convert_include_context(
        &mut self,
        arg: &Arg,
    ) -> Result<(String, String, Vec<String>)> {
        match arg {
            Arg::Dot | Arg::Variable(_) => Ok((String::new(), String::new(), Vec::new())),
            Arg::Field(path) => {
                let (expr, helm_obj) = self.field_to_cue_in_context(path);
                let mut base = Vec::new();
                if !helm_obj.is_empty() {
                    self.bags.used_context_objects.insert(helm_obj.clone());
                    if path.len() >= 2 {
                        self.track_field_ref(&helm_obj, path[1..].to_vec());
                        base = path[1..].to_vec();
                    }
                }
                Ok((expr, helm_obj, base))
            }
            Arg::Pipe(pipe) => {
                self.process_context_pipe(pipe)?;
                Ok((String::new(), String::new(), Vec::new()))
            }
            other => Err(ConvertError::unsupported(format!(
                "include: unsupported context argument {other:?} \
                 (only ., $, field references, and dict/list are supported)"
            ))),
        }
    }

    /// Tracks field references inside a `dict`/`list` context pipe.
    fn process_context_pipe(&mut self, pipe: &Pipe) -> Result<()> {
        if pipe.cmds.len() != 1 {
            return Err(ConvertError::unsupported(format!(
                "include: unsupported multi-command context pipe: {pipe:?}"
            )));
        }
        let cmd = &pipe.cmds[0];
        let Some(Arg::Ident(name)) = cmd.args.first() else {
            return Err(ConvertError::unsupported(format!(
                "include: unsupported context expression: {pipe:?}"
            )));
        };
        match name.as_str() {
            "dict" => {
                let args = &cmd.args[1..];
                if args.len() % 2 != 0 {
                    return Err(ConvertError::Input(
                        "include: dict requires even number of arguments (key-value pairs)"
                            .into(),
                    ));
                }
                for value in args.iter().skip(1).step_by(2) {
                    self.track_context_node(value);
                }
            }
            "list" => {
                for value in &cmd.args[1..] {
                    self.track_context_node(value);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn track_context_node(&mut self, arg: &Arg) {
        match arg {
            Arg::Field(path) => {
                if let Some(first) = path.first() {
                    if self.config.context_objects.contains_key(first) {
                        self.bags.used_context_objects.insert(first.clone());
                        if path.len() >= 2 {
                            let obj = first.clone();
                            self.track_field_ref(&obj, path[1..].to_vec());
                        }
                    }
                }
            }
            Arg::Pipe(p) => {
                let _ = self.process_context_pipe(p);
            }
            _ => {}
        }
    }

    /// Converts a dynamic include name built from print/printf.
    pub(crate) fn convert_include_name_expr(&mut self, arg: &Arg) -> Result<String> {
        let Arg::Pipe(pipe) = arg else {
            return Err(ConvertError::unsupported(format!(
                "include: unsupported dynamic template name: {arg:?}"
            )));
        };
        if pipe.cmds.len() != 1 {
            return Err(ConvertError::unsupported(format!(
                "include: unsupported multi-command dynamic name: {pipe:?}"
            )));
        }
        let cmd = &pipe.cmds[0];
        let Some(Arg::Ident(name)) = cmd.args.first() else {
            return Err(ConvertError::unsupported(format!(
                "include: unsupported dynamic name expression: {pipe:?}"
            )));
        };
        match name.as_str() {
            "print" => self.convert_print(&cmd.args[1..]),
            "printf" => Ok(self.convert_printf(&cmd.args[1..])?.0),
            other => Err(ConvertError::unsupported(format!(
                "include: unsupported dynamic name function {other:?}"
            ))),
        }
    }

    // --- tpl --------------------------------------------------------------

    /// Converts the template expression argument of `tpl`, wrapping in
    /// yaml.Marshal when the pipeline serializes with toYaml.
    pub(crate) fn convert_tpl_arg(&mut self, arg: &Arg) -> Result<(String, String)> {
        let Arg::Pipe(pipe) = arg else {
            return self.node_to_expr(arg);
        };
        if pipe.cmds.is_empty() {
            return Err(ConvertError::unsupported("tpl: empty pipeline"));
        }

        let mut has_to_yaml = false;
        let value_node;

        let first = &pipe.cmds[0];
        match first.args.first() {
            Some(Arg::Ident(name)) if name == "toYaml" => {
                has_to_yaml = true;
                value_node = first.args.get(1).ok_or_else(|| {
                    ConvertError::unsupported("tpl: toYaml requires an argument")
                })?;
            }
            Some(Arg::Ident(_)) => return self.node_to_expr(arg),
            Some(node) => {
                value_node = node;
                for cmd in &pipe.cmds[1..] {
                    if let Some(Arg::Ident(name)) = cmd.args.first() {
                        if name == "toYaml" {
                            has_to_yaml = true;
                        }
                    }
                }
            }
            None => {
                return Err(ConvertError::unsupported(
                    "tpl: could not determine value expression",
                ))
            }
        }

        let (mut expr, helm_obj) = self.node_to_expr(value_node)?;
        if has_to_yaml {
            self.add_import("encoding/yaml");
            // Serialized values are non-scalar.
            if let Arg::Field(path) = value_node {
                if !helm_obj.is_empty() && path.len() >= 2 {
                    let obj = helm_obj.clone();
                    self.track_non_scalar_ref(&obj, Some(&path[1..]));
                }
            }
            expr = format!("yaml.Marshal({expr})");
        }
        Ok((expr, helm_obj))
    }

    /// The template string evaluated by tpl could reference any context
    /// object at runtime, so all of them count as used.
    pub(crate) fn convert_tpl_context(&mut self) {
        let names: Vec<String> = self.config.context_objects.keys().cloned().collect();
        for name in names {
            self.bags.used_context_objects.insert(name);
        }
    }

    /// Builds the `_tplContext` helper mapping context field names to
    /// their CUE definitions.
    pub(crate) fn tpl_context_def(&self) -> HelperDef {
        let mut names: Vec<&String> = self.config.context_objects.keys().collect();
        names.sort();

        let mut def = String::from("_tplContext: {\n");
        for name in names {
            let cue_def = &self.config.context_objects[name];
            def.push('\t');
            def.push_str(&cue_key(name));
            def.push_str(": ");
            def.push_str(cue_def);
            def.push('\n');
        }
        def.push_str("}\n");

        HelperDef {
            name: "_tplContext",
            def,
            imports: Vec::new(),
        }
    }

    // --- Field resolution -------------------------------------------------

    /// Resolves a dot-rooted field access, honoring the innermost
    /// range/with binding. Inside helper bodies, accesses on `#arg` are
    /// collected for the helper's argument schema.
    pub fn field_to_cue_in_context(&mut self, ident: &[String]) -> (String, String) {
        if let Some(first) = ident.first() {
            if self.config.context_objects.contains_key(first) {
                return field_to_cue(&self.config.context_objects, ident);
            }
        }
        if let Some(top) = self.scope.range_stack.last().cloned() {
            if top.cue_expr == "#arg" {
                if let Some(refs) = &mut self.scope.helper_arg_refs {
                    refs.push(ident.to_vec());
                }
            }
            if !top.helm_obj.is_empty() {
                let mut full_path = top.base_path.clone();
                full_path.extend(ident.iter().cloned());
                self.track_field_ref(&top.helm_obj, full_path);
                self.bags.used_context_objects.insert(top.helm_obj.clone());
            }
            let mut parts = vec![top.cue_expr.clone()];
            parts.extend(ident.iter().cloned());
            return (parts.join("."), String::new());
        }
        field_to_cue(&self.config.context_objects, ident)
    }
}

/// Maps a field path to CUE, replacing a leading context object with
/// its CUE definition name. Returns (expr, context object name).
pub(crate) fn field_to_cue(
    context_objects: &HashMap<String, String>,
    ident: &[String],
) -> (String, String) {
    if let Some(first) = ident.first() {
        if let Some(mapped) = context_objects.get(first) {
            let mut parts = vec![mapped.clone()];
            parts.extend(ident[1..].iter().cloned());
            return (parts.join("."), first.clone());
        }
    }
    (ident.join("."), String::new())
}

/// Converts a literal argument to a CUE literal.
pub(crate) fn node_to_cue_literal(arg: &Arg) -> Result<String> {
    match arg {
        Arg::Str(s) => Ok(quote_string(s)),
        Arg::Number(text) => Ok(text.clone()),
        Arg::Bool(b) => Ok(b.to_string()),
        Arg::Nil => Ok("null".to_string()),
        other => Err(ConvertError::unsupported(format!(
            "unsupported literal node: {other:?}"
        ))),
    }
}

/// Wraps an expression in the _nonzero truthiness check.
pub(crate) fn nonzero(expr: &str) -> String {
    format!("(_nonzero & {{#arg: {expr}, _}})")
}

/// Returns the single If node when the root consists of only
/// whitespace text, comments, and one else-less if — the condition then
/// becomes a guard around the whole output.
pub(crate) fn detect_top_level_if(nodes: &[Node]) -> Option<&Node> {
    let mut if_node = None;
    for node in nodes {
        match node {
            Node::Text(text) => {
                if !text.trim().is_empty() {
                    return None;
                }
            }
            Node::Comment(_) => {}
            Node::If { else_, .. } => {
                if if_node.is_some() || !else_.is_empty() {
                    return None;
                }
                if_node = Some(node);
            }
            _ => return None,
        }
    }
    if_node
}

/// Whether a node can continue an inline text+action sequence on the
/// same YAML line. Control structures and comments cannot.
pub(crate) fn is_inline_node(node: &Node) -> bool {
    matches!(
        node,
        Node::Action(_) | Node::Text(_) | Node::Template { .. }
    )
}

/// Concatenated raw text of the direct child text nodes.
pub(crate) fn text_content(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        if let Node::Text(text) = node {
            out.push_str(text);
        }
    }
    out
}

/// Whether the first non-empty line of the body is a list item.
pub(crate) fn is_list_body(nodes: &[Node]) -> bool {
    let text = text_content(nodes);
    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start_matches(' ').len();
        return line[indent..].starts_with("- ");
    }
    false
}

/// YAML indent of the first non-empty line, or -1 when the body has no
/// text.
pub(crate) fn peek_body_indent(nodes: &[Node]) -> i32 {
    let text = text_content(nodes);
    for line in text.split('\n') {
        if !line.trim().is_empty() {
            return (line.len() - line.trim_start_matches(' ').len()) as i32;
        }
    }
    -1
}

fn body_ctx_indent(body_indent: i32) -> i32 {
    (body_indent - 1).max(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Arg;

    #[test]
    fn field_to_cue_maps_context_objects() {
        let mut ctx = HashMap::new();
        ctx.insert("Values".to_string(), "#values".to_string());
        let (expr, obj) = field_to_cue(
            &ctx,
            &["Values".to_string(), "image".to_string(), "tag".to_string()],
        );
        assert_eq!(expr, "#values.image.tag");
        assert_eq!(obj, "Values");

        let (expr, obj) = field_to_cue(&ctx, &["Release".to_string(), "Name".to_string()]);
        assert_eq!(expr, "Release.Name");
        assert_eq!(obj, "");
    }

    #[test]
    fn literal_conversion() {
        assert_eq!(node_to_cue_literal(&Arg::Str("x".into())).unwrap(), "\"x\"");
        assert_eq!(node_to_cue_literal(&Arg::Number("42".into())).unwrap(), "42");
        assert_eq!(node_to_cue_literal(&Arg::Bool(true)).unwrap(), "true");
        assert!(node_to_cue_literal(&Arg::Dot).is_err());
    }

    #[test]
    fn detect_top_level_if_shapes() {
        let if_node = Node::If {
            pipe: Pipe::default(),
            then: vec![Node::Text("a: 1\n".into())],
            else_: vec![],
        };
        // Whitespace + single if → detected.
        let nodes = vec![Node::Text("\n".into()), if_node.clone()];
        assert!(detect_top_level_if(&nodes).is_some());

        // Non-whitespace text → not extracted.
        let nodes = vec![Node::Text("x: 1\n".into()), if_node.clone()];
        assert!(detect_top_level_if(&nodes).is_none());

        // An else branch keeps the if inline.
        let with_else = Node::If {
            pipe: Pipe::default(),
            then: vec![],
            else_: vec![Node::Text("b: 2\n".into())],
        };
        assert!(detect_top_level_if(&[with_else]).is_none());
    }

    #[test]
    fn list_body_detection() {
        let nodes = vec![Node::Text("\n  - item\n".into())];
        assert!(is_list_body(&nodes));
        assert_eq!(peek_body_indent(&nodes), 2);

        let nodes = vec![Node::Text("key: value\n".into())];
        assert!(!is_list_body(&nodes));
        assert_eq!(peek_body_indent(&nodes), 0);

        assert_eq!(peek_body_indent(&[]), -1);
    }
}
