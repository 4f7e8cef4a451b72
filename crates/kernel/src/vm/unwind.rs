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

use crate::vm::AbortReason;
use crate::vm::activation::Activation;
use corral_var::{Error, Variant};

/// A raised MOO error, with the traceback snapshotted at raise time (the
/// frames may be gone by the time anyone prints it).
#[derive(Debug, Clone)]
pub struct RaisedError {
    pub error: Error,
    pub traceback: Vec<String>,
}

/// What unwinds through the interpreter: a catchable error, or an abort
/// (kill / resource exhaustion), which nothing catches and which skips
/// `finally` handlers.
#[derive(Debug, Clone)]
pub enum Exception {
    Error(RaisedError),
    Abort(AbortReason),
}

impl Exception {
    pub fn code(&self) -> Option<&Error> {
        match self {
            Exception::Error(e) => Some(&e.error),
            Exception::Abort(_) => None,
        }
    }
}

/// Build the player-facing traceback for an error raised with the given
/// activation stack. Server-initiated frames are included here (but not in
/// `callers()`).
pub fn make_traceback(error: &Error, stack: &[Activation]) -> Vec<String> {
    let mut lines = vec![];
    for (depth, frame) in stack.iter().rev().enumerate() {
        let this = match frame.this.variant() {
            Variant::Obj(o) => format!("{o}"),
            other => format!("{other:?}"),
        };
        let line = if depth == 0 {
            format!(
                "#{} <- {}:{} (this == {}), line {}: {}",
                frame.player.id(),
                frame.verb_loc,
                frame.verb_name,
                this,
                frame.line_number,
                error.message(),
            )
        } else {
            format!(
                "... called from {}:{} (this == {}), line {}",
                frame.verb_loc, frame.verb_name, this, frame.line_number,
            )
        };
        lines.push(line);
    }
    lines.push("(End of traceback)".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_compiler::compile;
    use corral_var::ErrorCode::E_TYPE;
    use corral_var::Obj;

    #[test]
    fn test_traceback_shape() {
        let program = compile("return 1;").unwrap();
        let frame = Activation::for_eval(&program, Obj::mk_id(2), Obj::mk_id(2));
        let lines = make_traceback(&Error::from(E_TYPE), &[frame]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("#2 <- "));
        assert!(lines[0].contains("line 1: Type mismatch"));
        assert_eq!(lines.last().unwrap(), "(End of traceback)");
    }
}
