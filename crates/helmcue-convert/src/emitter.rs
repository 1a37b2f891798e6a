//! Direct CUE emission from interleaved YAML text and template actions.
//!
//! The emitter walks raw text line by line, tracking open YAML blocks as
//! a stack of frames and emitting the corresponding CUE braces as the
//! indent context shifts. Keys and action expressions that cannot be
//! resolved immediately (a bare `key:`, an action that may become a
//! dynamic key, inline interpolation, a flow collection split across
//! nodes) are held in deferred state and flushed at block boundaries.

use crate::cue::{
    cue_key, escape_interpolation, flow_bracket_depth, inline_expr, is_flow_collection,
    scalar_to_cue, starts_incomplete_flow, write_indent,
};

/// Kind of an open YAML block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// Mapping; closes with `}`.
    Mapping,
    /// Sequence; closes with `]`.
    Sequence,
    /// Struct wrapping a list item; closes with `},`.
    ListItem,
}

/// An open YAML block context.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Content inside this block is at this YAML indent.
    pub yaml_indent: i32,
    /// CUE indent level for content inside this block.
    pub cue_indent: usize,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum EmitState {
    #[default]
    Normal,
    /// A bare `key:` was seen; its value or block follows.
    PendingKey,
}

/// A key-value pair resolved by an action that may still need to become
/// a block if deeper content follows.
#[derive(Debug, Clone)]
pub(crate) struct DeferredKV {
    pub key: String,
    pub value: String,
    pub comment: String,
    /// YAML indent of the key.
    pub indent: i32,
    /// CUE indent when the key was seen.
    pub cue_ind: usize,
    /// Dynamic keys like `(expr)` bypass cue_key().
    pub raw_key: bool,
}

/// An action expression waiting to see whether the next text starts
/// with `:` (which makes it a dynamic key).
#[derive(Debug, Clone)]
pub(crate) struct PendingAction {
    pub expr: String,
    pub comment: String,
    pub cue_ind: usize,
}

/// Accumulation state for a YAML flow collection that spans AST nodes.
#[derive(Debug, Clone)]
pub(crate) struct FlowAccum {
    pub parts: Vec<String>,
    pub exprs: Vec<String>,
    pub depth: i32,
    pub cue_ind: usize,
    pub suffix: String,
}

#[derive(Debug, Default)]
pub(crate) struct Emitter {
    pub out: String,
    pub stack: Vec<Frame>,
    pub state: EmitState,
    pub pending_key: String,
    pub pending_key_ind: i32,
    pub deferred: Option<DeferredKV>,
    /// True while processing a range body; list items emit directly
    /// without struct wrapping.
    pub in_range_body: bool,
    pub pending_action: Option<PendingAction>,
    /// Indent hint from a trailing whitespace-only line.
    pub next_action_yaml_indent: i32,
    /// Inline interpolation fragments; `Some` while inline mode is active.
    pub inline_parts: Option<Vec<String>>,
    pub inline_suffix: String,
    /// True when the next sibling AST node can continue the current line.
    pub next_node_is_inline: bool,
    pub flow: Option<FlowAccum>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_cue_indent(&self) -> usize {
        self.stack.last().map(|f| f.cue_indent).unwrap_or(0)
    }

    /// Closes all stack frames whose yaml_indent > indent. Pass -1 to
    /// close everything.
    pub fn close_blocks_to(&mut self, indent: i32) {
        while let Some(top) = self.stack.last() {
            if indent >= 0 && top.yaml_indent <= indent {
                break;
            }
            self.close_one_frame();
        }
    }

    pub fn close_one_frame(&mut self) {
        let Some(top) = self.stack.pop() else {
            return;
        };
        let close_indent = top.cue_indent.saturating_sub(1);
        write_indent(&mut self.out, close_indent);
        match top.kind {
            FrameKind::Sequence => self.out.push_str("]\n"),
            FrameKind::ListItem => self.out.push_str("},\n"),
            FrameKind::Mapping => self.out.push_str("}\n"),
        }
    }

    /// Emits any deferred action expression as a standalone expression.
    pub fn flush_pending_action(&mut self) {
        let Some(pa) = self.pending_action.take() else {
            return;
        };
        write_indent(&mut self.out, pa.cue_ind);
        self.out.push_str(&pa.expr);
        if !pa.comment.is_empty() {
            self.out.push(' ');
            self.out.push_str(&pa.comment);
        }
        self.out.push('\n');
    }

    /// Emits any deferred key-value as a simple field.
    pub fn flush_deferred(&mut self) {
        let Some(d) = self.deferred.take() else {
            return;
        };
        write_indent(&mut self.out, d.cue_ind);
        let key = if d.raw_key { d.key } else { cue_key(&d.key) };
        self.out.push_str(&key);
        self.out.push_str(": ");
        self.out.push_str(&d.value);
        if !d.comment.is_empty() {
            self.out.push(' ');
            self.out.push_str(&d.comment);
        }
        self.out.push('\n');
    }

    /// Completes in-progress inline interpolation by joining the
    /// accumulated fragments into a CUE interpolated string.
    pub fn finalize_inline(&mut self) {
        let Some(parts) = self.inline_parts.take() else {
            return;
        };
        self.out.push('"');
        for part in parts {
            self.out.push_str(&part);
        }
        self.out.push('"');
        self.out.push_str(&self.inline_suffix);
        self.inline_suffix.clear();
        self.out.push('\n');
    }

    /// Initialises flow accumulation with the given starting fragment.
    pub fn start_flow_accum(&mut self, text: &str, cue_ind: usize, suffix: &str) {
        let (_, depth) = flow_bracket_depth(text, 0);
        self.flow = Some(FlowAccum {
            parts: vec![text.to_string()],
            exprs: Vec::new(),
            depth,
            cue_ind,
            suffix: suffix.to_string(),
        });
    }

    /// Joins accumulated flow parts, converts the YAML flow collection
    /// to CUE, and substitutes each sentinel with its CUE expression.
    pub fn finalize_flow(&mut self) {
        let Some(flow) = self.flow.take() else {
            return;
        };
        let joined = flow.parts.concat();
        let mut cue_str = scalar_to_cue(&joined, flow.cue_ind);
        for (i, expr) in flow.exprs.iter().enumerate() {
            let quoted = format!("\"__h2c_{i}__\"");
            cue_str = cue_str.replacen(&quoted, expr, 1);
        }
        // Callers write the line prefix (indent and any "key: ") before
        // starting accumulation, so the result appends directly.
        self.out.push_str(&cue_str);
        self.out.push_str(&flow.suffix);
    }

    /// Converts a deferred key-value into a block with the value embedded.
    pub fn resolve_deferred_as_block(&mut self, child_yaml_indent: i32) {
        let Some(d) = self.deferred.take() else {
            return;
        };
        let key = if d.raw_key {
            d.key.clone()
        } else {
            cue_key(&d.key)
        };
        write_indent(&mut self.out, d.cue_ind);
        self.out.push_str(&key);
        self.out.push_str(": {\n");
        write_indent(&mut self.out, d.cue_ind + 1);
        self.out.push_str(&d.value);
        self.out.push('\n');
        self.stack.push(Frame {
            yaml_indent: child_yaml_indent,
            cue_indent: d.cue_ind + 1,
            kind: FrameKind::Mapping,
        });
    }

    /// Resolves a pending key as a sequence block.
    pub fn open_pending_as_list(&mut self, child_yaml_indent: i32) {
        let cue_ind = self.current_cue_indent();
        write_indent(&mut self.out, cue_ind);
        self.out.push_str(&cue_key(&self.pending_key));
        self.out.push_str(": [\n");
        self.stack.push(Frame {
            yaml_indent: child_yaml_indent,
            cue_indent: cue_ind + 1,
            kind: FrameKind::Sequence,
        });
        self.state = EmitState::Normal;
        self.pending_key.clear();
    }

    /// Resolves a pending key as a mapping block.
    pub fn open_pending_as_mapping(&mut self, child_yaml_indent: i32) {
        let cue_ind = self.current_cue_indent();
        write_indent(&mut self.out, cue_ind);
        self.out.push_str(&cue_key(&self.pending_key));
        self.out.push_str(": {\n");
        self.stack.push(Frame {
            yaml_indent: child_yaml_indent,
            cue_indent: cue_ind + 1,
            kind: FrameKind::Mapping,
        });
        self.state = EmitState::Normal;
        self.pending_key.clear();
    }

    /// Processes a YAML text fragment line by line, emitting CUE.
    pub fn emit_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut s = text;
        let owned;

        // Inline continuation: append text up to the first newline.
        if self.inline_parts.is_some() {
            if let Some(pa) = self.pending_action.take() {
                if let Some(parts) = &mut self.inline_parts {
                    parts.push(inline_expr(&pa.expr));
                }
            }
            match s.find('\n') {
                None => {
                    if let Some(parts) = &mut self.inline_parts {
                        parts.push(escape_interpolation(s));
                    }
                    return;
                }
                Some(idx) => {
                    if idx > 0 {
                        if let Some(parts) = &mut self.inline_parts {
                            parts.push(escape_interpolation(&s[..idx]));
                        }
                    }
                    self.finalize_inline();
                    if s[idx..].trim().is_empty() {
                        return;
                    }
                    owned = s[idx..].to_string();
                    s = &owned;
                }
            }
        }

        // Flow continuation: scan for where the collection ends.
        if let Some(flow) = &mut self.flow {
            let (end_pos, depth) = flow_bracket_depth(s, flow.depth);
            match end_pos {
                Some(end) => {
                    flow.parts.push(s[..end].to_string());
                    flow.depth = 0;
                    self.finalize_flow();
                    let remainder = s[end..].to_string();
                    if !remainder.trim().is_empty() {
                        self.emit_text(&remainder);
                    }
                    return;
                }
                None => {
                    flow.parts.push(s.to_string());
                    flow.depth = depth;
                    return;
                }
            }
        }

        // Whether the last line continues into the next AST node.
        let text_continues_inline = !s.ends_with('\n') && self.next_node_is_inline;

        let lines: Vec<&str> = s.split('\n').collect();
        let line_count = lines.len();

        for (i, raw_line) in lines.into_iter().enumerate() {
            let is_last_line = i == line_count - 1;
            if raw_line.trim().is_empty() {
                // Record indent hint from a trailing whitespace-only line.
                if is_last_line && !raw_line.is_empty() {
                    self.next_action_yaml_indent =
                        (raw_line.len() - raw_line.trim_start_matches(' ').len()) as i32;
                }
                continue;
            }

            let yaml_indent = (raw_line.len() - raw_line.trim_start_matches(' ').len()) as i32;
            // Left-trimmed content preserves trailing spaces ("- ").
            let content = &raw_line[yaml_indent as usize..];

            // A pending action followed by ": …" becomes a dynamic key.
            if let Some(pa) = &self.pending_action {
                if content.starts_with(": ") || content == ":" {
                    let expr = pa.expr.clone();
                    self.pending_action = None;
                    self.state = EmitState::PendingKey;
                    self.pending_key = format!("({expr})");
                    self.pending_key_ind = self.next_action_yaml_indent;
                    if content == ":" {
                        continue;
                    }
                    let val = content[2..].trim_end_matches([' ', '\t']);
                    if val.is_empty() {
                        continue; // next action provides the value
                    }
                    let cue_ind = self.current_cue_indent();
                    write_indent(&mut self.out, cue_ind);
                    self.out.push_str(&self.pending_key.clone());
                    self.out.push_str(": ");
                    self.out.push_str(&scalar_to_cue(val, 0));
                    self.out.push('\n');
                    self.state = EmitState::Normal;
                    self.pending_key.clear();
                    continue;
                }
                self.flush_pending_action();
            }

            // Deferred key-value: deeper content promotes it to a block.
            if let Some(d) = &self.deferred {
                if yaml_indent > d.indent {
                    self.resolve_deferred_as_block(yaml_indent);
                } else {
                    self.flush_deferred();
                }
            }

            // Close blocks whose content is deeper than this line.
            self.close_blocks_to(yaml_indent);

            // A non-item line at the indent of an open list closes it;
            // the line is a sibling key in the parent struct.
            if let Some(top) = self.stack.last() {
                if top.kind == FrameKind::Sequence
                    && top.yaml_indent == yaml_indent
                    && !content.starts_with("- ")
                {
                    self.close_one_frame();
                }
            }

            // Resolve a pending key from previous text.
            if self.state == EmitState::PendingKey {
                if content.starts_with("- ") {
                    self.open_pending_as_list(yaml_indent);
                } else {
                    self.open_pending_as_mapping(yaml_indent);
                }
            }

            let cue_ind = self.current_cue_indent();
            let trimmed = content.trim();
            let continues_inline = is_last_line && text_continues_inline;

            // YAML comment → CUE comment.
            if let Some(comment) = trimmed.strip_prefix('#') {
                let comment = comment.strip_prefix(' ').unwrap_or(comment);
                write_indent(&mut self.out, cue_ind);
                if comment.is_empty() {
                    self.out.push_str("//\n");
                } else {
                    self.out.push_str("// ");
                    self.out.push_str(comment);
                    self.out.push('\n');
                }
                continue;
            }

            if content.starts_with("- ") {
                self.process_list_item(content, yaml_indent, cue_ind, is_last_line, continues_inline);
            } else if is_flow_collection(trimmed) {
                write_indent(&mut self.out, cue_ind);
                self.out.push_str(&scalar_to_cue(trimmed, cue_ind));
                self.out.push('\n');
            } else if continues_inline && starts_incomplete_flow(trimmed) {
                // Actions inside the flow provide the rest; use content
                // to preserve trailing space for YAML flow parsing.
                write_indent(&mut self.out, cue_ind);
                self.start_flow_accum(content, cue_ind, "\n");
            } else if let Some(colon_idx) = find_key_colon(content) {
                let key = &content[..colon_idx];
                let raw_val = &content[colon_idx + 2..];
                let val = raw_val.trim_end_matches([' ', '\t']);
                if val == "|-" || val == "|" || val == ">-" || val == ">" {
                    self.state = EmitState::PendingKey;
                    self.pending_key = key.to_string();
                    self.pending_key_ind = yaml_indent;
                } else if val.is_empty() && is_last_line {
                    // Trailing "key: " — value comes from the next node.
                    self.state = EmitState::PendingKey;
                    self.pending_key = key.to_string();
                    self.pending_key_ind = yaml_indent;
                } else if continues_inline && !val.is_empty() && starts_incomplete_flow(val) {
                    write_indent(&mut self.out, cue_ind);
                    self.out.push_str(&cue_key(key));
                    self.out.push_str(": ");
                    self.start_flow_accum(raw_val, cue_ind, "\n");
                } else if continues_inline && !val.is_empty() {
                    // Value continues into the next node — inline mode.
                    write_indent(&mut self.out, cue_ind);
                    self.out.push_str(&cue_key(key));
                    self.out.push_str(": ");
                    self.inline_parts = Some(vec![escape_interpolation(val)]);
                } else {
                    write_indent(&mut self.out, cue_ind);
                    self.out.push_str(&cue_key(key));
                    self.out.push_str(": ");
                    self.out.push_str(&scalar_to_cue(val, cue_ind));
                    self.out.push('\n');
                }
            } else if let Some(key) = trimmed.strip_suffix(':') {
                self.state = EmitState::PendingKey;
                self.pending_key = key.to_string();
                self.pending_key_ind = yaml_indent;
            } else if continues_inline {
                // Bare value continues into the next node.
                write_indent(&mut self.out, cue_ind);
                self.inline_parts = Some(vec![escape_interpolation(trimmed)]);
            } else {
                // Bare value or embedded expression.
                write_indent(&mut self.out, cue_ind);
                self.out.push_str(&scalar_to_cue(trimmed, 0));
                self.out.push('\n');
            }
        }
    }

    /// Handles a YAML list item line (starts with "- ").
    fn process_list_item(
        &mut self,
        item: &str,
        yaml_indent: i32,
        cue_ind: usize,
        is_last_line: bool,
        continues_inline: bool,
    ) {
        let content = item.strip_prefix("- ").unwrap_or(item);

        if self.in_range_body {
            self.process_range_list_item(content, yaml_indent, cue_ind, is_last_line, continues_inline);
            return;
        }

        if is_flow_collection(content) {
            write_indent(&mut self.out, cue_ind);
            self.out.push_str(&scalar_to_cue(content, cue_ind));
            self.out.push_str(",\n");
        } else if continues_inline && starts_incomplete_flow(content) {
            write_indent(&mut self.out, cue_ind);
            self.start_flow_accum(content, cue_ind, ",\n");
        } else if let Some(colon_idx) = find_key_colon(content) {
            // "- key: value" opens a struct in the list.
            let key = content[..colon_idx].to_string();
            let raw_val = &content[colon_idx + 2..];
            let val = raw_val.trim_end_matches([' ', '\t']);
            // Content inside the item starts after "- ".
            let item_content_indent = yaml_indent + 2;

            if val.is_empty() && is_last_line {
                // "- key: " — the next action provides the value.
                write_indent(&mut self.out, cue_ind);
                self.out.push_str("{\n");
                self.stack.push(Frame {
                    yaml_indent: item_content_indent,
                    cue_indent: cue_ind + 1,
                    kind: FrameKind::ListItem,
                });
                self.state = EmitState::PendingKey;
                self.pending_key = key;
                self.pending_key_ind = item_content_indent;
            } else if continues_inline && !val.is_empty() && starts_incomplete_flow(val) {
                write_indent(&mut self.out, cue_ind);
                self.out.push_str("{\n");
                write_indent(&mut self.out, cue_ind + 1);
                self.out.push_str(&cue_key(&key));
                self.out.push_str(": ");
                self.start_flow_accum(raw_val, cue_ind + 1, "\n");
                self.stack.push(Frame {
                    yaml_indent: item_content_indent,
                    cue_indent: cue_ind + 1,
                    kind: FrameKind::ListItem,
                });
            } else {
                write_indent(&mut self.out, cue_ind);
                self.out.push_str("{\n");
                write_indent(&mut self.out, cue_ind + 1);
                self.out.push_str(&cue_key(&key));
                self.out.push_str(": ");
                self.out.push_str(&scalar_to_cue(val, cue_ind + 1));
                self.out.push('\n');
                self.stack.push(Frame {
                    yaml_indent: item_content_indent,
                    cue_indent: cue_ind + 1,
                    kind: FrameKind::ListItem,
                });
            }
        } else if let Some(key) = content.trim().strip_suffix(':') {
            // "- key:" — struct in list with a bare key.
            let item_content_indent = yaml_indent + 2;
            write_indent(&mut self.out, cue_ind);
            self.out.push_str("{\n");
            self.stack.push(Frame {
                yaml_indent: item_content_indent,
                cue_indent: cue_ind + 1,
                kind: FrameKind::ListItem,
            });
            self.state = EmitState::PendingKey;
            self.pending_key = key.to_string();
            self.pending_key_ind = item_content_indent;
        } else if content.trim_end_matches([' ', '\t']).is_empty() && is_last_line {
            // "- " at end of text — value from the next node.
            self.state = EmitState::PendingKey;
            self.pending_key.clear();
            self.pending_key_ind = yaml_indent;
        } else if continues_inline {
            write_indent(&mut self.out, cue_ind);
            self.inline_parts = Some(vec![escape_interpolation(content.trim())]);
            self.inline_suffix = ",".to_string();
        } else {
            write_indent(&mut self.out, cue_ind);
            self.out.push_str(&scalar_to_cue(content.trim(), 0));
            self.out.push_str(",\n");
        }
    }

    /// List items inside a range body emit directly without `{ … },`
    /// wrapping: the comprehension itself produces the list elements.
    fn process_range_list_item(
        &mut self,
        content: &str,
        yaml_indent: i32,
        cue_ind: usize,
        is_last_line: bool,
        continues_inline: bool,
    ) {
        let item_content_indent = yaml_indent + 2;

        if is_flow_collection(content) {
            write_indent(&mut self.out, cue_ind);
            self.out.push_str(&scalar_to_cue(content, cue_ind));
            self.out.push('\n');
        } else if continues_inline && starts_incomplete_flow(content) {
            write_indent(&mut self.out, cue_ind);
            self.start_flow_accum(content, cue_ind, "\n");
        } else if let Some(colon_idx) = find_key_colon(content) {
            let key = &content[..colon_idx];
            let raw_val = &content[colon_idx + 2..];
            let val = raw_val.trim_end_matches([' ', '\t']);

            if val.is_empty() && is_last_line {
                self.state = EmitState::PendingKey;
                self.pending_key = key.to_string();
                self.pending_key_ind = item_content_indent;
            } else if continues_inline && !val.is_empty() && starts_incomplete_flow(val) {
                write_indent(&mut self.out, cue_ind);
                self.out.push_str(&cue_key(key));
                self.out.push_str(": ");
                self.start_flow_accum(raw_val, cue_ind, "\n");
            } else {
                write_indent(&mut self.out, cue_ind);
                self.out.push_str(&cue_key(key));
                self.out.push_str(": ");
                self.out.push_str(&scalar_to_cue(val, cue_ind));
                self.out.push('\n');
            }
        } else if let Some(key) = content.trim().strip_suffix(':') {
            self.state = EmitState::PendingKey;
            self.pending_key = key.to_string();
            self.pending_key_ind = item_content_indent;
        } else if content.trim_end_matches([' ', '\t']).is_empty() && is_last_line {
            self.state = EmitState::PendingKey;
            self.pending_key.clear();
            self.pending_key_ind = yaml_indent;
        } else if continues_inline {
            write_indent(&mut self.out, cue_ind);
            self.inline_parts = Some(vec![escape_interpolation(content.trim())]);
        } else {
            write_indent(&mut self.out, cue_ind);
            self.out.push_str(content.trim());
            self.out.push('\n');
        }
    }

    /// Emits a CUE expression produced by a template action, routing it
    /// through whichever deferred state is active.
    pub fn emit_action_expr(&mut self, expr: &str, comment: &str) {
        // Inside flow accumulation, stand in with a sentinel.
        if let Some(flow) = &mut self.flow {
            let sentinel = format!("__h2c_{}__", flow.exprs.len());
            flow.parts.push(sentinel);
            flow.exprs.push(expr.to_string());
            return;
        }

        // Inside inline accumulation, append the wrapped expression.
        if let Some(parts) = &mut self.inline_parts {
            parts.push(inline_expr(expr));
            return;
        }

        self.flush_pending_action();
        self.flush_deferred();

        if self.state == EmitState::PendingKey {
            if self.pending_key.is_empty() {
                // Pending list item ("- " was seen).
                let cue_ind = self.current_cue_indent();
                write_indent(&mut self.out, cue_ind);
                self.out.push_str(expr);
                if !comment.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(comment);
                }
                self.out.push('\n');
                self.state = EmitState::Normal;
            } else {
                // Defer: deeper content may promote this to a block.
                self.deferred = Some(DeferredKV {
                    key: std::mem::take(&mut self.pending_key),
                    value: expr.to_string(),
                    comment: comment.to_string(),
                    indent: self.pending_key_ind,
                    cue_ind: self.current_cue_indent(),
                    raw_key: false,
                });
                if let Some(d) = &mut self.deferred {
                    d.raw_key = d.key.starts_with('(');
                }
                self.state = EmitState::Normal;
            }
        } else {
            // Standalone expression — defer in case the next text
            // starts with ": " (dynamic key).
            self.pending_action = Some(PendingAction {
                expr: expr.to_string(),
                comment: comment.to_string(),
                cue_ind: self.current_cue_indent(),
            });
        }
    }

    /// Runs every end-of-body flush in the required order.
    pub fn finish(&mut self) {
        self.finalize_inline();
        self.finalize_flow();
        self.flush_pending_action();
        self.flush_deferred();
        self.close_blocks_to(-1);
    }
}

/// Finds the byte offset of the first `": "` key separator, if any.
fn find_key_colon(content: &str) -> Option<usize> {
    match content.find(": ") {
        Some(0) => None,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(text: &str) -> String {
        let mut e = Emitter::new();
        e.emit_text(text);
        e.finish();
        e.out
    }

    #[test]
    fn plain_mapping_passthrough() {
        assert_eq!(emit("name: test\nport: 80\n"), "name: \"test\"\nport: 80\n");
    }

    #[test]
    fn nested_mapping_opens_and_closes_frames() {
        let out = emit("image:\n  repository: nginx\n  tag: latest\nreplicas: 2\n");
        assert_eq!(
            out,
            "image: {\n\trepository: \"nginx\"\n\ttag: \"latest\"\n}\nreplicas: 2\n"
        );
    }

    #[test]
    fn list_items_wrap_in_structs() {
        let out = emit("ports:\n  - name: http\n    port: 80\n");
        assert_eq!(
            out,
            "ports: [\n\t{\n\t\tname: \"http\"\n\t\tport: 80\n\t},\n]\n"
        );
    }

    #[test]
    fn scalar_list_items() {
        let out = emit("features:\n  - one\n  - two\n");
        assert_eq!(out, "features: [\n\t\"one\",\n\t\"two\",\n]\n");
    }

    #[test]
    fn sibling_after_list_closes_it() {
        let out = emit("items:\n  - a\nother: 1\n");
        assert_eq!(out, "items: [\n\t\"a\",\n]\nother: 1\n");
    }

    #[test]
    fn pending_key_resolved_by_action() {
        let mut e = Emitter::new();
        e.emit_text("replicas: ");
        e.emit_action_expr("#values.replicas", "");
        e.finish();
        assert_eq!(e.out, "replicas: #values.replicas\n");
    }

    #[test]
    fn deferred_key_value_promotes_to_block() {
        let mut e = Emitter::new();
        e.emit_text("metadata: ");
        e.emit_action_expr("_labels", "");
        e.emit_text("\n  name: app\n");
        e.finish();
        assert_eq!(e.out, "metadata: {\n\t_labels\n\tname: \"app\"\n}\n");
    }

    #[test]
    fn dynamic_key_from_pending_action() {
        let mut e = Emitter::new();
        e.emit_action_expr("_key0", "");
        e.emit_text(": value\n");
        e.finish();
        assert_eq!(e.out, "(_key0): \"value\"\n");
    }

    #[test]
    fn inline_interpolation() {
        let mut e = Emitter::new();
        e.next_node_is_inline = true;
        e.emit_text("image: \"nginx:");
        e.emit_action_expr("#values.tag", "");
        e.emit_text("\"\n");
        e.finish();
        assert_eq!(e.out, "image: \"\\\"nginx:\\(#values.tag)\\\"\"\n");
    }

    #[test]
    fn flow_accumulation_substitutes_sentinels() {
        let mut e = Emitter::new();
        e.next_node_is_inline = true;
        e.emit_text("selector: {app: ");
        e.emit_action_expr("#values.app", "");
        e.emit_text("}\n");
        e.finish();
        assert_eq!(e.out, "selector: {\n\tapp: #values.app\n}\n");
    }

    #[test]
    fn comments_pass_through() {
        assert_eq!(emit("# top\nname: x\n"), "// top\nname: \"x\"\n");
    }

    #[test]
    fn frames_all_closed_at_finish() {
        let out = emit("a:\n  b:\n    c: 1\n");
        let opens = out.matches('{').count();
        let closes = out.matches('}').count();
        assert_eq!(opens, closes);
    }

    #[test]
    fn list_item_value_from_action() {
        let mut e = Emitter::new();
        e.emit_text("- ");
        e.emit_action_expr("_range0", "");
        e.finish();
        assert_eq!(e.out, "_range0\n");
    }
}
