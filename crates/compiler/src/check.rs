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

//! Post-parse validation: loop label resolution, the fork barrier for
//! `break`/`continue`, and assignment target legality. These are compile
//! errors, not runtime errors.

use crate::ast::{Arg, CatchCodes, Expr, ScatterItem, Stmt, StmtNode};
use crate::errors::CompileError;
use crate::names::{Name, Names};

struct LoopScope {
    // Innermost-last stack of enclosing loop labels; `None` for unlabeled.
    loops: Vec<Option<Name>>,
    in_fork: bool,
}

pub fn check_program(stmts: &[Stmt], names: &Names) -> Result<(), CompileError> {
    let mut scope = LoopScope {
        loops: vec![],
        in_fork: false,
    };
    check_stmts(stmts, &mut scope, names)
}

fn check_stmts(
    stmts: &[Stmt],
    scope: &mut LoopScope,
    names: &Names,
) -> Result<(), CompileError> {
    for stmt in stmts {
        check_stmt(stmt, scope, names)?;
    }
    Ok(())
}

fn label_name(names: &Names, exit: &Name) -> String {
    names
        .name_of(exit)
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn check_stmt(stmt: &Stmt, scope: &mut LoopScope, names: &Names) -> Result<(), CompileError> {
    match &stmt.node {
        StmtNode::Cond { arms, otherwise } => {
            for arm in arms {
                check_expr(&arm.condition, scope, names)?;
                check_stmts(&arm.statements, scope, names)?;
            }
            check_stmts(otherwise, scope, names)?;
        }
        StmtNode::ForList {
            value_id,
            expr,
            body,
            ..
        } => {
            check_expr(expr, scope, names)?;
            scope.loops.push(Some(*value_id));
            check_stmts(body, scope, names)?;
            scope.loops.pop();
        }
        StmtNode::ForRange { id, from, to, body } => {
            check_expr(from, scope, names)?;
            check_expr(to, scope, names)?;
            scope.loops.push(Some(*id));
            check_stmts(body, scope, names)?;
            scope.loops.pop();
        }
        StmtNode::While {
            id,
            condition,
            body,
        } => {
            check_expr(condition, scope, names)?;
            scope.loops.push(*id);
            check_stmts(body, scope, names)?;
            scope.loops.pop();
        }
        StmtNode::Fork { time, body, .. } => {
            check_expr(time, scope, names)?;
            // The fork body becomes a separate task; enclosing loops are not
            // reachable from it.
            let mut fork_scope = LoopScope {
                loops: vec![],
                in_fork: true,
            };
            check_stmts(body, &mut fork_scope, names)?;
        }
        StmtNode::TryExcept { body, excepts } => {
            check_stmts(body, scope, names)?;
            for except in excepts {
                if let CatchCodes::Codes(codes) = &except.codes {
                    for code in codes {
                        check_arg(code, scope, names)?;
                    }
                }
                check_stmts(&except.statements, scope, names)?;
            }
        }
        StmtNode::TryFinally { body, handler } => {
            check_stmts(body, scope, names)?;
            check_stmts(handler, scope, names)?;
        }
        StmtNode::Break { exit } => match exit {
            None if scope.loops.is_empty() => {
                return Err(if scope.in_fork {
                    CompileError::BreakContinueInFork
                } else {
                    CompileError::BreakOutsideLoop
                });
            }
            Some(exit) if !scope.loops.contains(&Some(*exit)) => {
                return Err(if scope.in_fork {
                    CompileError::BreakContinueInFork
                } else {
                    CompileError::UnknownBreakLabel(label_name(names, exit))
                });
            }
            _ => {}
        },
        StmtNode::Continue { exit } => match exit {
            None if scope.loops.is_empty() => {
                return Err(if scope.in_fork {
                    CompileError::BreakContinueInFork
                } else {
                    CompileError::ContinueOutsideLoop
                });
            }
            Some(exit) if !scope.loops.contains(&Some(*exit)) => {
                return Err(if scope.in_fork {
                    CompileError::BreakContinueInFork
                } else {
                    CompileError::UnknownContinueLabel(label_name(names, exit))
                });
            }
            _ => {}
        },
        StmtNode::Return(expr) => {
            if let Some(expr) = expr {
                check_expr(expr, scope, names)?;
            }
        }
        StmtNode::Expr(expr) => check_expr(expr, scope, names)?,
    }
    Ok(())
}

fn check_arg(arg: &Arg, scope: &mut LoopScope, names: &Names) -> Result<(), CompileError> {
    match arg {
        Arg::Normal(e) | Arg::Splice(e) => check_expr(e, scope, names),
    }
}

fn check_scatter(
    items: &[ScatterItem],
    scope: &mut LoopScope,
    names: &Names,
) -> Result<(), CompileError> {
    for item in items {
        if let Some(e) = &item.expr {
            check_expr(e, scope, names)?;
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, scope: &mut LoopScope, names: &Names) -> Result<(), CompileError> {
    match expr {
        Expr::Assign { left, right } => {
            if !matches!(
                **left,
                Expr::Id(_) | Expr::Prop { .. } | Expr::Index(_, _) | Expr::Range { .. }
            ) {
                return Err(CompileError::BadAssignmentTarget);
            }
            check_expr(left, scope, names)?;
            check_expr(right, scope, names)?;
        }
        Expr::Pass { args } | Expr::Call { args, .. } | Expr::List(args) => {
            for arg in args {
                check_arg(arg, scope, names)?;
            }
        }
        Expr::Value(_) | Expr::Id(_) | Expr::Length => {}
        Expr::Binary(_, lhs, rhs) | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            check_expr(lhs, scope, names)?;
            check_expr(rhs, scope, names)?;
        }
        Expr::Unary(_, e) => check_expr(e, scope, names)?,
        Expr::Prop { location, property } => {
            check_expr(location, scope, names)?;
            check_expr(property, scope, names)?;
        }
        Expr::Verb {
            location,
            verb,
            args,
        } => {
            check_expr(location, scope, names)?;
            check_expr(verb, scope, names)?;
            for arg in args {
                check_arg(arg, scope, names)?;
            }
        }
        Expr::Range { base, from, to } => {
            check_expr(base, scope, names)?;
            check_expr(from, scope, names)?;
            check_expr(to, scope, names)?;
        }
        Expr::Cond {
            condition,
            consequence,
            alternative,
        } => {
            check_expr(condition, scope, names)?;
            check_expr(consequence, scope, names)?;
            check_expr(alternative, scope, names)?;
        }
        Expr::Catch { trye, codes, except } => {
            check_expr(trye, scope, names)?;
            if let CatchCodes::Codes(codes) = codes {
                for code in codes {
                    check_arg(code, scope, names)?;
                }
            }
            if let Some(except) = except {
                check_expr(except, scope, names)?;
            }
        }
        Expr::Index(base, idx) => {
            check_expr(base, scope, names)?;
            check_expr(idx, scope, names)?;
        }
        Expr::Map(pairs) => {
            for (k, v) in pairs {
                check_expr(k, scope, names)?;
                check_expr(v, scope, names)?;
            }
        }
        Expr::Scatter(items, rhs) => {
            check_scatter(items, scope, names)?;
            check_expr(rhs, scope, names)?;
        }
    }
    Ok(())
}
