// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::ast::{Arg, CatchCodes, Expr, Stmt, StmtNode};
use crate::names::Names;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

/// A compiled verb: the statement tree the interpreter walks, the variable
/// name table, and the original source lines (what `verb_code` returns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    stmts: Arc<Vec<Stmt>>,
    names: Names,
    source: Arc<Vec<String>>,
}

impl Program {
    pub fn new(stmts: Vec<Stmt>, names: Names, source: &str) -> Self {
        let source = source.lines().map(str::to_string).collect();
        Self {
            stmts: Arc::new(stmts),
            names,
            source: Arc::new(source),
        }
    }

    pub fn stmts(&self) -> &[Stmt] {
        &self.stmts
    }

    pub fn stmts_arc(&self) -> Arc<Vec<Stmt>> {
        self.stmts.clone()
    }

    pub fn names(&self) -> &Names {
        &self.names
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source
    }

    /// A human-readable pseudo-listing of the tree, for `disassemble()`.
    /// This is diagnostic output, not a decompile.
    pub fn listing(&self) -> Vec<String> {
        let mut out = vec![];
        list_stmts(&self.stmts, 0, &mut out);
        out
    }
}

fn indented(depth: usize, text: String, out: &mut Vec<String>) {
    out.push(format!("{:indent$}{}", "", text, indent = depth * 2));
}

fn list_stmts(stmts: &[Stmt], depth: usize, out: &mut Vec<String>) {
    for stmt in stmts {
        list_stmt(stmt, depth, out);
    }
}

fn list_stmt(stmt: &Stmt, depth: usize, out: &mut Vec<String>) {
    match &stmt.node {
        StmtNode::Cond { arms, otherwise } => {
            for (i, arm) in arms.iter().enumerate() {
                let kw = if i == 0 { "if" } else { "elseif" };
                indented(
                    depth,
                    format!("[line {}] {} {}", stmt.line, kw, describe_expr(&arm.condition)),
                    out,
                );
                list_stmts(&arm.statements, depth + 1, out);
            }
            if !otherwise.is_empty() {
                indented(depth, "else".to_string(), out);
                list_stmts(otherwise, depth + 1, out);
            }
            indented(depth, "endif".to_string(), out);
        }
        StmtNode::ForList { expr, body, .. } => {
            indented(
                depth,
                format!("[line {}] for-in {}", stmt.line, describe_expr(expr)),
                out,
            );
            list_stmts(body, depth + 1, out);
            indented(depth, "endfor".to_string(), out);
        }
        StmtNode::ForRange { from, to, body, .. } => {
            indented(
                depth,
                format!(
                    "[line {}] for-range {}..{}",
                    stmt.line,
                    describe_expr(from),
                    describe_expr(to)
                ),
                out,
            );
            list_stmts(body, depth + 1, out);
            indented(depth, "endfor".to_string(), out);
        }
        StmtNode::While { condition, body, .. } => {
            indented(
                depth,
                format!("[line {}] while {}", stmt.line, describe_expr(condition)),
                out,
            );
            list_stmts(body, depth + 1, out);
            indented(depth, "endwhile".to_string(), out);
        }
        StmtNode::Fork { time, body, .. } => {
            indented(
                depth,
                format!("[line {}] fork {}", stmt.line, describe_expr(time)),
                out,
            );
            list_stmts(body, depth + 1, out);
            indented(depth, "endfork".to_string(), out);
        }
        StmtNode::TryExcept { body, excepts } => {
            indented(depth, format!("[line {}] try", stmt.line), out);
            list_stmts(body, depth + 1, out);
            for except in excepts {
                indented(depth, "except".to_string(), out);
                list_stmts(&except.statements, depth + 1, out);
            }
            indented(depth, "endtry".to_string(), out);
        }
        StmtNode::TryFinally { body, handler } => {
            indented(depth, format!("[line {}] try", stmt.line), out);
            list_stmts(body, depth + 1, out);
            indented(depth, "finally".to_string(), out);
            list_stmts(handler, depth + 1, out);
            indented(depth, "endtry".to_string(), out);
        }
        StmtNode::Break { .. } => indented(depth, format!("[line {}] break", stmt.line), out),
        StmtNode::Continue { .. } => {
            indented(depth, format!("[line {}] continue", stmt.line), out)
        }
        StmtNode::Return(expr) => {
            let suffix = expr
                .as_ref()
                .map(|e| format!(" {}", describe_expr(e)))
                .unwrap_or_default();
            indented(depth, format!("[line {}] return{}", stmt.line, suffix), out);
        }
        StmtNode::Expr(expr) => indented(
            depth,
            format!("[line {}] {}", stmt.line, describe_expr(expr)),
            out,
        ),
    }
}

fn describe_args(args: &[Arg]) -> String {
    let mut s = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        match arg {
            Arg::Normal(e) => s.push_str(&describe_expr(e)),
            Arg::Splice(e) => {
                s.push('@');
                s.push_str(&describe_expr(e));
            }
        }
    }
    s
}

fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::Assign { left, right } => {
            format!("{} = {}", describe_expr(left), describe_expr(right))
        }
        Expr::Pass { args } => format!("pass({})", describe_args(args)),
        Expr::Value(v) => format!("{v:?}"),
        Expr::Id(name) => format!("<var {}>", name.0),
        Expr::Binary(op, lhs, rhs) => {
            format!("({} {} {})", describe_expr(lhs), op, describe_expr(rhs))
        }
        Expr::And(lhs, rhs) => format!("({} && {})", describe_expr(lhs), describe_expr(rhs)),
        Expr::Or(lhs, rhs) => format!("({} || {})", describe_expr(lhs), describe_expr(rhs)),
        Expr::Unary(op, e) => format!("{}{}", op, describe_expr(e)),
        Expr::Prop { location, property } => {
            format!("{}.({})", describe_expr(location), describe_expr(property))
        }
        Expr::Call { function, args } => format!("{}({})", function, describe_args(args)),
        Expr::Verb {
            location,
            verb,
            args,
        } => format!(
            "{}:({})({})",
            describe_expr(location),
            describe_expr(verb),
            describe_args(args)
        ),
        Expr::Range { base, from, to } => format!(
            "{}[{}..{}]",
            describe_expr(base),
            describe_expr(from),
            describe_expr(to)
        ),
        Expr::Cond {
            condition,
            consequence,
            alternative,
        } => format!(
            "({} ? {} | {})",
            describe_expr(condition),
            describe_expr(consequence),
            describe_expr(alternative)
        ),
        Expr::Catch { trye, codes, except } => {
            let codes = match codes {
                CatchCodes::Any => "ANY".to_string(),
                CatchCodes::Codes(codes) => describe_args(codes),
            };
            let mut s = format!("`{} ! {}", describe_expr(trye), codes);
            if let Some(except) = except {
                let _ = write!(s, " => {}", describe_expr(except));
            }
            s.push('\'');
            s
        }
        Expr::Index(base, idx) => format!("{}[{}]", describe_expr(base), describe_expr(idx)),
        Expr::List(args) => format!("{{{}}}", describe_args(args)),
        Expr::Map(pairs) => {
            let mut s = String::from("[");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                let _ = write!(s, "{} -> {}", describe_expr(k), describe_expr(v));
            }
            s.push(']');
            s
        }
        Expr::Scatter(items, rhs) => {
            format!("{{<scatter {}>}} = {}", items.len(), describe_expr(rhs))
        }
        Expr::Length => "$".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::parse_program;

    #[test]
    fn test_listing_mentions_lines() {
        let p = parse_program("if (1)\nreturn 2;\nendif").unwrap();
        let listing = p.listing();
        assert!(listing[0].contains("[line 1] if"));
        assert!(listing.iter().any(|l| l.contains("return")));
    }

    #[test]
    fn test_source_lines_preserved() {
        let src = "x = 1;\nreturn x;";
        let p = parse_program(src).unwrap();
        assert_eq!(p.source_lines(), &["x = 1;".to_string(), "return x;".to_string()]);
    }
}
