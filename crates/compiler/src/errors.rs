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

use thiserror::Error;

/// Compilation failures. `set_verb_code` renders these to the player as a
/// list of plain strings, so Display text is the user-facing artifact.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("Line {line}, column {column}: {message}")]
    ParseError {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("Unknown error code `{0}'")]
    UnknownErrorCode(String),
    #[error("`break {0}' names no enclosing loop")]
    UnknownBreakLabel(String),
    #[error("`continue {0}' names no enclosing loop")]
    UnknownContinueLabel(String),
    #[error("`break' outside of any loop")]
    BreakOutsideLoop,
    #[error("`continue' outside of any loop")]
    ContinueOutsideLoop,
    #[error("`break' and `continue' cannot cross into a fork block")]
    BreakContinueInFork,
    #[error("Illegal assignment target")]
    BadAssignmentTarget,
}
