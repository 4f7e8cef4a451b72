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

/// Kicks off the Pest parser and converts the pair tree into our AST.
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use pest::Parser as PestParser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};

use corral_var::ErrorCode;
use corral_var::{SYSTEM_OBJECT, Symbol, v_errcode, v_float, v_int, v_obj, v_objid, v_str, v_bool};

use crate::ast::Arg::{Normal, Splice};
use crate::ast::{
    Arg, BinaryOp, CatchCodes, CondArm, ExceptArm, Expr, ScatterItem, ScatterKind, Stmt, StmtNode,
    UnaryOp,
};
use crate::errors::CompileError;
use crate::names::{Name, Names};
use crate::parse::moo::{MooParser, Rule};
use crate::program::Program;

pub mod moo {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "src/moo.pest"]
    pub struct MooParser;
}

struct TreeTransformer {
    // RefCell because the PrattParser closures each need shared mutable
    // access to the name table.
    names: RefCell<Names>,
}

impl TreeTransformer {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            names: RefCell::new(Names::new()),
        })
    }

    fn parse_atom(self: Rc<Self>, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        match pair.as_rule() {
            Rule::ident => {
                let name = self.names.borrow_mut().find_or_add(pair.as_str().trim());
                Ok(Expr::Id(name))
            }
            Rule::object => {
                let ostr = &pair.as_str()[1..];
                let oid = i64::from_str(ostr).map_err(|_| parse_error(&pair, "bad object id"))?;
                Ok(Expr::Value(v_objid(oid)))
            }
            Rule::integer => match pair.as_str().parse::<i64>() {
                Ok(int) => Ok(Expr::Value(v_int(int))),
                Err(_) => Err(parse_error(&pair, "integer literal out of range")),
            },
            Rule::float => {
                let float = pair
                    .as_str()
                    .parse::<f64>()
                    .map_err(|_| parse_error(&pair, "bad float literal"))?;
                Ok(Expr::Value(v_float(float)))
            }
            Rule::string => {
                let parsed = unquote_str(pair.as_str());
                Ok(Expr::Value(v_str(&parsed)))
            }
            Rule::err => {
                let code = ErrorCode::parse_str(pair.as_str())
                    .ok_or_else(|| CompileError::UnknownErrorCode(pair.as_str().to_string()))?;
                Ok(Expr::Value(v_errcode(code)))
            }
            Rule::boolean => Ok(Expr::Value(v_bool(
                pair.as_str().eq_ignore_ascii_case("true"),
            ))),
            _ => Err(parse_error(&pair, "unexpected atom")),
        }
    }

    fn parse_exprlist(self: Rc<Self>, pairs: Pairs<Rule>) -> Result<Vec<Arg>, CompileError> {
        let mut args = vec![];
        for pair in pairs {
            match pair.as_rule() {
                Rule::argument => {
                    let is_splice = pair.as_str().starts_with('@');
                    let expr = self
                        .clone()
                        .parse_expr(pair.into_inner().next().unwrap().into_inner())?;
                    args.push(if is_splice {
                        Splice(expr)
                    } else {
                        Normal(expr)
                    });
                }
                _ => unreachable!("unexpected exprlist member: {:?}", pair),
            }
        }
        Ok(args)
    }

    fn parse_arglist(self: Rc<Self>, pairs: Pairs<Rule>) -> Result<Vec<Arg>, CompileError> {
        let Some(first) = pairs.peek() else {
            return Ok(vec![]);
        };
        let Rule::exprlist = first.as_rule() else {
            unreachable!("unexpected arglist member: {:?}", first);
        };
        self.parse_exprlist(first.into_inner())
    }

    fn parse_except_codes(
        self: Rc<Self>,
        pair: Pair<Rule>,
    ) -> Result<CatchCodes, CompileError> {
        match pair.as_rule() {
            Rule::anycode => Ok(CatchCodes::Any),
            Rule::exprlist => Ok(CatchCodes::Codes(self.parse_exprlist(pair.into_inner())?)),
            _ => unreachable!("unexpected except codes: {:?}", pair),
        }
    }

    fn parse_scatter_items(
        self: Rc<Self>,
        pairs: Pairs<Rule>,
    ) -> Result<Vec<ScatterItem>, CompileError> {
        let mut items = vec![];
        for pair in pairs {
            let item = pair.into_inner().next().unwrap();
            match item.as_rule() {
                Rule::scatter_required => {
                    let id = self
                        .names
                        .borrow_mut()
                        .find_or_add(item.into_inner().next().unwrap().as_str());
                    items.push(ScatterItem {
                        kind: ScatterKind::Required,
                        id,
                        expr: None,
                    });
                }
                Rule::scatter_rest => {
                    let id = self
                        .names
                        .borrow_mut()
                        .find_or_add(item.into_inner().next().unwrap().as_str());
                    items.push(ScatterItem {
                        kind: ScatterKind::Rest,
                        id,
                        expr: None,
                    });
                }
                Rule::scatter_optional => {
                    let mut inner = item.into_inner();
                    let id = self
                        .names
                        .borrow_mut()
                        .find_or_add(inner.next().unwrap().as_str());
                    let expr = inner
                        .next()
                        .map(|e| self.clone().parse_expr(e.into_inner()))
                        .transpose()?;
                    items.push(ScatterItem {
                        kind: ScatterKind::Optional,
                        id,
                        expr,
                    });
                }
                _ => unreachable!("unexpected scatter item: {:?}", item),
            }
        }
        Ok(items)
    }

    fn parse_expr(self: Rc<Self>, pairs: Pairs<Rule>) -> Result<Expr, CompileError> {
        // Precedence from lowest to highest, mirroring the language's C-ish
        // operator table.
        let pratt = PrattParser::new()
            // Assignment & scattering assignment are lowest.
            .op(Op::postfix(Rule::assign) | Op::prefix(Rule::scatter_assign))
            // Ternary conditional.
            .op(Op::postfix(Rule::cond_expr))
            // Logical or, then and.
            .op(Op::infix(Rule::lor, Assoc::Left))
            .op(Op::infix(Rule::land, Assoc::Left))
            // Bitwise or / xor / and.
            .op(Op::infix(Rule::bor, Assoc::Left))
            .op(Op::infix(Rule::bxor, Assoc::Left))
            .op(Op::infix(Rule::band, Assoc::Left))
            // Equality, relational, and `in` share a level.
            .op(Op::infix(Rule::eq, Assoc::Left)
                | Op::infix(Rule::neq, Assoc::Left)
                | Op::infix(Rule::lt, Assoc::Left)
                | Op::infix(Rule::gt, Assoc::Left)
                | Op::infix(Rule::lte, Assoc::Left)
                | Op::infix(Rule::gte, Assoc::Left)
                | Op::infix(Rule::in_range, Assoc::Left))
            // Shifts.
            .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
            // Additive, multiplicative, exponent.
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::modulus, Assoc::Left))
            .op(Op::infix(Rule::pow, Assoc::Left))
            // Unary negation, logical not, bitwise complement.
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::not) | Op::prefix(Rule::bnot))
            // Suffix operators: indexing, calls, property access.
            .op(Op::postfix(Rule::index_range)
                | Op::postfix(Rule::index_single)
                | Op::postfix(Rule::verb_call)
                | Op::postfix(Rule::verb_expr_call)
                | Op::postfix(Rule::prop)
                | Op::postfix(Rule::prop_expr));

        let primary_self = self.clone();
        let prefix_self = self.clone();
        let postfix_self = self.clone();

        pratt
            .map_primary(|primary| match primary.as_rule() {
                Rule::atom => {
                    let mut inner = primary.into_inner();
                    primary_self.clone().parse_atom(inner.next().unwrap())
                }
                Rule::sysprop => {
                    let mut inner = primary.into_inner();
                    let property = inner.next().unwrap().as_str();
                    Ok(Expr::Prop {
                        location: Box::new(Expr::Value(v_obj(SYSTEM_OBJECT))),
                        property: Box::new(Expr::Value(v_str(property))),
                    })
                }
                Rule::sysprop_call => {
                    let mut inner = primary.into_inner();
                    let verb = inner.next().unwrap().as_str()[1..].to_string();
                    let args = primary_self
                        .clone()
                        .parse_arglist(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Verb {
                        location: Box::new(Expr::Value(v_obj(SYSTEM_OBJECT))),
                        verb: Box::new(Expr::Value(v_str(&verb))),
                        args,
                    })
                }
                Rule::list => {
                    let mut inner = primary.into_inner();
                    if let Some(arglist) = inner.next() {
                        let args = primary_self.clone().parse_exprlist(arglist.into_inner())?;
                        Ok(Expr::List(args))
                    } else {
                        Ok(Expr::List(vec![]))
                    }
                }
                Rule::map => {
                    let inner = primary.into_inner();
                    let mut pairs = vec![];
                    for pair in inner {
                        let mut kv = pair.into_inner();
                        let key = primary_self
                            .clone()
                            .parse_expr(kv.next().unwrap().into_inner())?;
                        let value = primary_self
                            .clone()
                            .parse_expr(kv.next().unwrap().into_inner())?;
                        pairs.push((key, value));
                    }
                    Ok(Expr::Map(pairs))
                }
                Rule::builtin_call => {
                    let mut inner = primary.into_inner();
                    let bf = inner.next().unwrap().as_str();
                    let args = primary_self
                        .clone()
                        .parse_arglist(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Call {
                        function: Symbol::mk(bf),
                        args,
                    })
                }
                Rule::pass_expr => {
                    let mut inner = primary.into_inner();
                    let args = if let Some(arglist) = inner.next() {
                        primary_self.clone().parse_arglist(arglist.into_inner())?
                    } else {
                        vec![]
                    };
                    Ok(Expr::Pass { args })
                }
                Rule::try_expr => {
                    let mut inner = primary.into_inner();
                    let trye = primary_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    let codes = primary_self
                        .clone()
                        .parse_except_codes(inner.next().unwrap().into_inner().next().unwrap())?;
                    let except = inner
                        .next()
                        .map(|e| primary_self.clone().parse_expr(e.into_inner()))
                        .transpose()?
                        .map(Box::new);
                    Ok(Expr::Catch {
                        trye: Box::new(trye),
                        codes,
                        except,
                    })
                }
                Rule::paren_expr => {
                    let mut inner = primary.into_inner();
                    primary_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())
                }
                Rule::range_end => Ok(Expr::Length),
                Rule::range_start => Ok(Expr::Value(v_int(1))),
                _ => unreachable!("unexpected primary: {:?}", primary),
            })
            .map_prefix(|op, rhs| match op.as_rule() {
                Rule::neg => Ok(Expr::Unary(UnaryOp::Neg, Box::new(rhs?))),
                Rule::not => Ok(Expr::Unary(UnaryOp::Not, Box::new(rhs?))),
                Rule::bnot => Ok(Expr::Unary(UnaryOp::BitNot, Box::new(rhs?))),
                Rule::scatter_assign => {
                    let items = prefix_self
                        .clone()
                        .parse_scatter_items(op.into_inner().next().unwrap().into_inner())?;
                    Ok(Expr::Scatter(items, Box::new(rhs?)))
                }
                _ => unreachable!("unexpected prefix: {:?}", op),
            })
            .map_infix(|lhs, op, rhs| {
                let binop = match op.as_rule() {
                    Rule::lor => return Ok(Expr::Or(Box::new(lhs?), Box::new(rhs?))),
                    Rule::land => return Ok(Expr::And(Box::new(lhs?), Box::new(rhs?))),
                    Rule::add => BinaryOp::Add,
                    Rule::sub => BinaryOp::Sub,
                    Rule::mul => BinaryOp::Mul,
                    Rule::div => BinaryOp::Div,
                    Rule::modulus => BinaryOp::Mod,
                    Rule::pow => BinaryOp::Exp,
                    Rule::eq => BinaryOp::Eq,
                    Rule::neq => BinaryOp::NEq,
                    Rule::lt => BinaryOp::Lt,
                    Rule::gt => BinaryOp::Gt,
                    Rule::lte => BinaryOp::LtE,
                    Rule::gte => BinaryOp::GtE,
                    Rule::in_range => BinaryOp::In,
                    Rule::band => BinaryOp::BitAnd,
                    Rule::bor => BinaryOp::BitOr,
                    Rule::bxor => BinaryOp::BitXor,
                    Rule::shl => BinaryOp::Shl,
                    Rule::shr => BinaryOp::Shr,
                    _ => unreachable!("unexpected infix: {:?}", op),
                };
                Ok(Expr::Binary(binop, Box::new(lhs?), Box::new(rhs?)))
            })
            .map_postfix(|lhs, op| match op.as_rule() {
                Rule::assign => {
                    let rhs = postfix_self
                        .clone()
                        .parse_expr(op.into_inner().next().unwrap().into_inner())?;
                    Ok(Expr::Assign {
                        left: Box::new(lhs?),
                        right: Box::new(rhs),
                    })
                }
                Rule::cond_expr => {
                    let mut inner = op.into_inner();
                    let consequence = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    let alternative = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Cond {
                        condition: Box::new(lhs?),
                        consequence: Box::new(consequence),
                        alternative: Box::new(alternative),
                    })
                }
                Rule::index_single => {
                    let rhs = postfix_self
                        .clone()
                        .parse_expr(op.into_inner().next().unwrap().into_inner())?;
                    Ok(Expr::Index(Box::new(lhs?), Box::new(rhs)))
                }
                Rule::index_range => {
                    let mut inner = op.into_inner();
                    let from = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    let to = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Range {
                        base: Box::new(lhs?),
                        from: Box::new(from),
                        to: Box::new(to),
                    })
                }
                Rule::verb_call => {
                    let mut inner = op.into_inner();
                    let verb = inner.next().unwrap().as_str();
                    let args = postfix_self
                        .clone()
                        .parse_arglist(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Verb {
                        location: Box::new(lhs?),
                        verb: Box::new(Expr::Value(v_str(verb))),
                        args,
                    })
                }
                Rule::verb_expr_call => {
                    let mut inner = op.into_inner();
                    let verb = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    let args = postfix_self
                        .clone()
                        .parse_arglist(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Verb {
                        location: Box::new(lhs?),
                        verb: Box::new(verb),
                        args,
                    })
                }
                Rule::prop => {
                    let mut inner = op.into_inner();
                    let property = inner.next().unwrap().as_str();
                    Ok(Expr::Prop {
                        location: Box::new(lhs?),
                        property: Box::new(Expr::Value(v_str(property))),
                    })
                }
                Rule::prop_expr => {
                    let mut inner = op.into_inner();
                    let property = postfix_self
                        .clone()
                        .parse_expr(inner.next().unwrap().into_inner())?;
                    Ok(Expr::Prop {
                        location: Box::new(lhs?),
                        property: Box::new(property),
                    })
                }
                _ => unreachable!("unexpected postfix: {:?}", op),
            })
            .parse(pairs)
    }

    fn parse_statements(
        self: Rc<Self>,
        pairs: Pairs<Rule>,
    ) -> Result<Vec<Stmt>, CompileError> {
        let mut statements = vec![];
        for pair in pairs {
            if let Some(stmt) = self.clone().parse_statement(pair)? {
                statements.push(stmt);
            }
        }
        Ok(statements)
    }

    fn parse_statement(
        self: Rc<Self>,
        pair: Pair<Rule>,
    ) -> Result<Option<Stmt>, CompileError> {
        let line = pair.line_col().0;
        let pair = pair.into_inner().next().unwrap();
        match pair.as_rule() {
            Rule::expr_statement => {
                let mut inner = pair.into_inner();
                let Some(expr) = inner.next() else {
                    // A bare `;` is a legal no-op.
                    return Ok(None);
                };
                let expr = self.parse_expr(expr.into_inner())?;
                Ok(Some(Stmt::new(StmtNode::Expr(expr), line)))
            }
            Rule::return_statement => {
                let mut inner = pair.into_inner();
                let expr = inner
                    .next()
                    .map(|e| self.parse_expr(e.into_inner()))
                    .transpose()?;
                Ok(Some(Stmt::new(StmtNode::Return(expr), line)))
            }
            Rule::break_statement => {
                let mut inner = pair.into_inner();
                let exit = inner
                    .next()
                    .map(|e| self.names.borrow_mut().find_or_add(e.as_str()));
                Ok(Some(Stmt::new(StmtNode::Break { exit }, line)))
            }
            Rule::continue_statement => {
                let mut inner = pair.into_inner();
                let exit = inner
                    .next()
                    .map(|e| self.names.borrow_mut().find_or_add(e.as_str()));
                Ok(Some(Stmt::new(StmtNode::Continue { exit }, line)))
            }
            Rule::if_statement => {
                let mut inner = pair.into_inner();
                let condition = self
                    .clone()
                    .parse_expr(inner.next().unwrap().into_inner())?;
                let body = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                let mut arms = vec![CondArm {
                    condition,
                    statements: body,
                }];
                let mut otherwise = vec![];
                for clause in inner {
                    match clause.as_rule() {
                        Rule::elseif_clause => {
                            let mut clause = clause.into_inner();
                            let condition = self
                                .clone()
                                .parse_expr(clause.next().unwrap().into_inner())?;
                            let statements = self
                                .clone()
                                .parse_statements(clause.next().unwrap().into_inner())?;
                            arms.push(CondArm {
                                condition,
                                statements,
                            });
                        }
                        Rule::else_clause => {
                            let mut clause = clause.into_inner();
                            otherwise = self
                                .clone()
                                .parse_statements(clause.next().unwrap().into_inner())?;
                        }
                        _ => unreachable!("unexpected if clause: {:?}", clause),
                    }
                }
                Ok(Some(Stmt::new(StmtNode::Cond { arms, otherwise }, line)))
            }
            Rule::for_statement => {
                let mut inner = pair.into_inner();
                let value_id = self
                    .names
                    .borrow_mut()
                    .find_or_add(inner.next().unwrap().as_str());
                let mut next = inner.next().unwrap();
                let mut key_id = None;
                if next.as_rule() == Rule::ident {
                    key_id = Some(self.names.borrow_mut().find_or_add(next.as_str()));
                    next = inner.next().unwrap();
                }
                match next.as_rule() {
                    Rule::for_in_clause => {
                        let expr = self
                            .clone()
                            .parse_expr(next.into_inner().next().unwrap().into_inner())?;
                        let body = self
                            .clone()
                            .parse_statements(inner.next().unwrap().into_inner())?;
                        Ok(Some(Stmt::new(
                            StmtNode::ForList {
                                value_id,
                                key_id,
                                expr,
                                body,
                            },
                            line,
                        )))
                    }
                    Rule::for_range_clause => {
                        if key_id.is_some() {
                            return Err(CompileError::ParseError {
                                line,
                                column: 0,
                                message: "range for-loops take a single loop variable".into(),
                            });
                        }
                        let mut range = next.into_inner();
                        let from = self
                            .clone()
                            .parse_expr(range.next().unwrap().into_inner())?;
                        let to = self
                            .clone()
                            .parse_expr(range.next().unwrap().into_inner())?;
                        let body = self
                            .clone()
                            .parse_statements(inner.next().unwrap().into_inner())?;
                        Ok(Some(Stmt::new(
                            StmtNode::ForRange {
                                id: value_id,
                                from,
                                to,
                                body,
                            },
                            line,
                        )))
                    }
                    _ => unreachable!("unexpected for clause: {:?}", next),
                }
            }
            Rule::while_statement => {
                let mut inner = pair.into_inner();
                let mut next = inner.next().unwrap();
                let mut id = None;
                if next.as_rule() == Rule::ident {
                    id = Some(self.names.borrow_mut().find_or_add(next.as_str()));
                    next = inner.next().unwrap();
                }
                let condition = self.clone().parse_expr(next.into_inner())?;
                let body = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                Ok(Some(Stmt::new(
                    StmtNode::While {
                        id,
                        condition,
                        body,
                    },
                    line,
                )))
            }
            Rule::fork_statement => {
                let mut inner = pair.into_inner();
                let mut next = inner.next().unwrap();
                let mut id = None;
                if next.as_rule() == Rule::ident {
                    id = Some(self.names.borrow_mut().find_or_add(next.as_str()));
                    next = inner.next().unwrap();
                }
                let time = self.clone().parse_expr(next.into_inner())?;
                let body = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                Ok(Some(Stmt::new(StmtNode::Fork { id, time, body }, line)))
            }
            Rule::try_except_statement => {
                let mut inner = pair.into_inner();
                let body = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                let mut excepts = vec![];
                for clause in inner {
                    let mut clause = clause.into_inner();
                    let mut next = clause.next().unwrap();
                    let mut id = None;
                    if next.as_rule() == Rule::ident {
                        id = Some(self.names.borrow_mut().find_or_add(next.as_str()));
                        next = clause.next().unwrap();
                    }
                    let codes = self
                        .clone()
                        .parse_except_codes(next.into_inner().next().unwrap())?;
                    let statements = self
                        .clone()
                        .parse_statements(clause.next().unwrap().into_inner())?;
                    excepts.push(ExceptArm {
                        id,
                        codes,
                        statements,
                    });
                }
                Ok(Some(Stmt::new(StmtNode::TryExcept { body, excepts }, line)))
            }
            Rule::try_finally_statement => {
                let mut inner = pair.into_inner();
                let body = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                let handler = self
                    .clone()
                    .parse_statements(inner.next().unwrap().into_inner())?;
                Ok(Some(Stmt::new(
                    StmtNode::TryFinally { body, handler },
                    line,
                )))
            }
            _ => unreachable!("unexpected statement: {:?}", pair),
        }
    }
}

fn parse_error(pair: &Pair<Rule>, message: &str) -> CompileError {
    let (line, column) = pair.line_col();
    CompileError::ParseError {
        line,
        column,
        message: message.to_string(),
    }
}

/// MOO string unquoting: backslash escapes the following character,
/// whatever it is.
fn unquote_str(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    let mut chars = s[1..s.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                output.push(escaped);
            }
        } else {
            output.push(c);
        }
    }
    output
}

/// Parse and validate a whole verb body, producing the unit the kernel
/// interprets.
pub fn parse_program(source: &str) -> Result<Program, CompileError> {
    let mut pairs =
        MooParser::parse(Rule::program, source).map_err(|e| {
            let (line, column) = match e.line_col {
                pest::error::LineColLocation::Pos((l, c)) => (l, c),
                pest::error::LineColLocation::Span((l, c), _) => (l, c),
            };
            CompileError::ParseError {
                line,
                column,
                message: e.variant.message().to_string(),
            }
        })?;

    let tx = TreeTransformer::new();
    let program_pair = pairs.next().unwrap();
    let mut statements = vec![];
    for pair in program_pair.into_inner() {
        match pair.as_rule() {
            Rule::statements => {
                statements = tx.clone().parse_statements(pair.into_inner())?;
            }
            Rule::EOI => {}
            _ => unreachable!("unexpected program member: {:?}", pair),
        }
    }

    let names = tx.names.borrow().clone();
    crate::check::check_program(&statements, &names)?;

    Ok(Program::new(statements, names, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, StmtNode};
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Program {
        parse_program(source).expect("parse failed")
    }

    #[test]
    fn test_simple_expr_statement() {
        let p = parse("1 + 2 * 3;");
        let StmtNode::Expr(Expr::Binary(BinaryOp::Add, _, rhs)) = &p.stmts()[0].node else {
            panic!("bad parse: {:?}", p.stmts());
        };
        assert_eq!(
            **rhs,
            Expr::Binary(
                BinaryOp::Mul,
                Box::new(Expr::Value(v_int(2))),
                Box::new(Expr::Value(v_int(3)))
            )
        );
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let p = parse("a = b = 2;");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(matches!(**right, Expr::Assign { .. }));
    }

    #[test]
    fn test_if_elseif_else() {
        let p = parse("if (1) return 1; elseif (2) return 2; else return 3; endif");
        let StmtNode::Cond { arms, otherwise } = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn test_for_in_two_vars() {
        let p = parse("for v, k in (m) x = {k, v}; endfor");
        let StmtNode::ForList { key_id, .. } = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(key_id.is_some());
    }

    #[test]
    fn test_for_range() {
        let p = parse("for i in [1..10] x = i; endfor");
        assert!(matches!(p.stmts()[0].node, StmtNode::ForRange { .. }));
    }

    #[test]
    fn test_scatter_assignment() {
        let p = parse("{a, ?b = 5, @rest} = args;");
        let StmtNode::Expr(Expr::Scatter(items, _)) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].kind, crate::ast::ScatterKind::Required);
        assert_eq!(items[1].kind, crate::ast::ScatterKind::Optional);
        assert_eq!(items[2].kind, crate::ast::ScatterKind::Rest);
    }

    #[test]
    fn test_map_literal() {
        let p = parse("m = [\"a\" -> 1, \"b\" -> 2];");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Map(pairs) = &**right else {
            panic!("not a map literal: {right:?}");
        };
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_sysprop_sugar() {
        let p = parse("x = $nothing;");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Prop { location, .. } = &**right else {
            panic!("not a prop ref");
        };
        assert_eq!(**location, Expr::Value(v_obj(SYSTEM_OBJECT)));
    }

    #[test]
    fn test_catch_expr() {
        let p = parse("x = `1/0 ! E_DIV => 42';");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(matches!(**right, Expr::Catch { .. }));
    }

    #[test]
    fn test_catch_expr_any() {
        let p = parse("x = `foo.bar ! ANY';");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Catch { codes, except, .. } = &**right else {
            panic!("not a catch");
        };
        assert_eq!(*codes, CatchCodes::Any);
        assert!(except.is_none());
    }

    #[test]
    fn test_dollar_in_range() {
        let p = parse("x = l[2..$];");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Range { to, .. } = &**right else {
            panic!("not a range");
        };
        assert_eq!(**to, Expr::Length);
    }

    #[test]
    fn test_caret_is_one() {
        let p = parse("x = l[^..$];");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Range { from, .. } = &**right else {
            panic!("not a range");
        };
        assert_eq!(**from, Expr::Value(v_int(1)));
    }

    #[test]
    fn test_try_except_finally() {
        let p = parse("try x = 1; except e (E_DIV, E_TYPE) y = 2; endtry");
        let StmtNode::TryExcept { excepts, .. } = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert_eq!(excepts.len(), 1);
        assert!(excepts[0].id.is_some());

        let p = parse("try x = 1; finally y = 2; endtry");
        assert!(matches!(p.stmts()[0].node, StmtNode::TryFinally { .. }));
    }

    #[test]
    fn test_fork_with_var() {
        let p = parse("fork x (0) suspend(); endfork kill_task(x);");
        let StmtNode::Fork { id, .. } = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(id.is_some());
    }

    #[test]
    fn test_verb_and_prop_expr_forms() {
        let p = parse("x = o:(vname)(1, 2); y = o.(pname);");
        assert_eq!(p.stmts().len(), 2);
    }

    #[test]
    fn test_splice_argument() {
        let p = parse("notify(player, @lines);");
        let StmtNode::Expr(Expr::Call { args, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(matches!(args[1], Arg::Splice(_)));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        assert_eq!(
            parse_program("break;"),
            Err(CompileError::BreakOutsideLoop)
        );
    }

    #[test]
    fn test_break_label_must_resolve() {
        assert_eq!(
            parse_program("while foo (1) break bar; endwhile"),
            Err(CompileError::UnknownBreakLabel("bar".into()))
        );
        assert!(parse_program("while foo (1) break foo; endwhile").is_ok());
    }

    #[test]
    fn test_break_in_fork_fails() {
        assert_eq!(
            parse_program("while (1) fork (0) break; endfork endwhile"),
            Err(CompileError::BreakContinueInFork)
        );
        // A loop wholly inside the fork is fine.
        assert!(parse_program("fork (0) while (1) break; endwhile endfork").is_ok());
    }

    #[test]
    fn test_ternary_and_bitwise() {
        let p = parse("x = a > 1 ? 1 | 2;");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert!(matches!(**right, Expr::Cond { .. }));

        let p = parse("x = 1 |. 2 &. 3;");
        assert_eq!(p.stmts().len(), 1);
    }

    #[test]
    fn test_shift_precedence_below_add() {
        // 1 + 2 << 3 parses as (1 + 2) << 3
        let p = parse("x = 1 + 2 << 3;");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        let Expr::Binary(BinaryOp::Shl, lhs, _) = &**right else {
            panic!("not a shift: {right:?}");
        };
        assert!(matches!(**lhs, Expr::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn test_negative_object_literal() {
        let p = parse("x = #-1;");
        let StmtNode::Expr(Expr::Assign { right, .. }) = &p.stmts()[0].node else {
            panic!("bad parse");
        };
        assert_eq!(**right, Expr::Value(v_objid(-1)));
    }

    #[test]
    fn test_empty_statement_dropped() {
        let p = parse(";;; return 1;");
        assert_eq!(p.stmts().len(), 1);
    }

    #[test]
    fn test_line_numbers_tracked() {
        let p = parse("x = 1;\ny = 2;\nreturn x + y;");
        assert_eq!(p.stmts()[0].line, 1);
        assert_eq!(p.stmts()[1].line, 2);
        assert_eq!(p.stmts()[2].line, 3);
    }

    #[test]
    fn test_bad_syntax_reports_position() {
        let Err(CompileError::ParseError { line, .. }) = parse_program("if (1 return 2; endif")
        else {
            panic!("expected parse error");
        };
        assert_eq!(line, 1);
    }
}
