//! `#ifdef` expansion for WGSL sources.
//!
//! WGSL has no preprocessor, so shader variants are written with
//! `#ifdef NAME` / `#ifndef NAME` / `#else` / `#endif` lines and expanded
//! before module creation. Blocks nest. Directive lines and disabled lines
//! are replaced with empty lines so compiler line numbers still match the
//! source file.

use regex::Regex;

use crate::error::{RenderError, RenderResult};

const DIRECTIVE_PATTERN: &str =
    r"^\s*#\s*(ifdef|ifndef|else|endif)\b\s*([A-Za-z_][A-Za-z0-9_]*)?\s*$";

struct Frame {
    /// Whether the enclosing blocks are all active.
    parent_active: bool,
    /// Whether this block's condition held.
    condition: bool,
    in_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

/// Expand `source` with `defines` set.
pub fn preprocess(label: &str, source: &str, defines: &[&str]) -> RenderResult<String> {
    let re = Regex::new(DIRECTIVE_PATTERN).map_err(|e| RenderError::ShaderCompilation {
        label: label.to_string(),
        message: e.to_string(),
    })?;
    let mut stack: Vec<Frame> = Vec::new();
    let mut output = String::with_capacity(source.len());

    let error = |line: usize, message: &str| RenderError::ShaderCompilation {
        label: label.to_string(),
        message: format!("line {}: {}", line + 1, message),
    };

    for (number, line) in source.lines().enumerate() {
        let active = stack.last().map(Frame::active).unwrap_or(true);

        if let Some(caps) = re.captures(line) {
            let directive = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let name = caps.get(2).map(|m| m.as_str());
            match (directive, name) {
                ("ifdef", Some(name)) | ("ifndef", Some(name)) => {
                    let defined = defines.contains(&name);
                    stack.push(Frame {
                        parent_active: active,
                        condition: if directive == "ifdef" { defined } else { !defined },
                        in_else: false,
                    });
                }
                ("else", None) => match stack.last_mut() {
                    Some(frame) if !frame.in_else => frame.in_else = true,
                    Some(_) => return Err(error(number, "duplicate #else")),
                    None => return Err(error(number, "#else without #ifdef")),
                },
                ("endif", None) => {
                    if stack.pop().is_none() {
                        return Err(error(number, "#endif without #ifdef"));
                    }
                }
                _ => return Err(error(number, "malformed directive")),
            }
            output.push('\n');
            continue;
        }

        if active {
            output.push_str(line);
        }
        output.push('\n');
    }

    if !stack.is_empty() {
        return Err(error(source.lines().count(), "unterminated #ifdef"));
    }
    Ok(output)
}
