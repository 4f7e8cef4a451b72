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

use crate::var::Var;
use ErrorCode::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// A MOO error value: a code from the closed set, plus an optional message
/// and payload value carried by `raise()`.
#[derive(Clone, Eq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub msg: Option<Box<String>>,
    pub value: Option<Box<Var>>,
}

impl Error {
    pub fn new(code: ErrorCode, msg: Option<String>, value: Option<Var>) -> Self {
        Self {
            code,
            msg: msg.map(Box::new),
            value: value.map(Box::new),
        }
    }
}

// Equality and hashing are on the code alone; try/except matching does not
// consider the message.
impl Hash for Error {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl PartialEq<Error> for Error {
    fn eq(&self, other: &Error) -> bool {
        self.code == other.code
    }
}

impl PartialEq<ErrorCode> for Error {
    fn eq(&self, other: &ErrorCode) -> bool {
        self.code == *other
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_some() {
            write!(f, "{} ({})", self.code, self.message())
        } else {
            write!(f, "{}", self.code)
        }
    }
}

impl std::error::Error for Error {}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
    strum::EnumIter,
)]
#[allow(non_camel_case_types)]
pub enum ErrorCode {
    E_NONE,
    E_TYPE,
    E_DIV,
    E_PERM,
    E_PROPNF,
    E_VERBNF,
    E_VARNF,
    E_INVIND,
    E_RECMOVE,
    E_MAXREC,
    E_RANGE,
    E_ARGS,
    E_NACC,
    E_INVARG,
    E_QUOTA,
    E_FLOAT,
    E_FILE,
    E_EXEC,
    E_INTRPT,
}

impl ErrorCode {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "E_NONE" => Some(E_NONE),
            "E_TYPE" => Some(E_TYPE),
            "E_DIV" => Some(E_DIV),
            "E_PERM" => Some(E_PERM),
            "E_PROPNF" => Some(E_PROPNF),
            "E_VERBNF" => Some(E_VERBNF),
            "E_VARNF" => Some(E_VARNF),
            "E_INVIND" => Some(E_INVIND),
            "E_RECMOVE" => Some(E_RECMOVE),
            "E_MAXREC" => Some(E_MAXREC),
            "E_RANGE" => Some(E_RANGE),
            "E_ARGS" => Some(E_ARGS),
            "E_NACC" => Some(E_NACC),
            "E_INVARG" => Some(E_INVARG),
            "E_QUOTA" => Some(E_QUOTA),
            "E_FLOAT" => Some(E_FLOAT),
            "E_FILE" => Some(E_FILE),
            "E_EXEC" => Some(E_EXEC),
            "E_INTRPT" => Some(E_INTRPT),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            E_NONE => "E_NONE",
            E_TYPE => "E_TYPE",
            E_DIV => "E_DIV",
            E_PERM => "E_PERM",
            E_PROPNF => "E_PROPNF",
            E_VERBNF => "E_VERBNF",
            E_VARNF => "E_VARNF",
            E_INVIND => "E_INVIND",
            E_RECMOVE => "E_RECMOVE",
            E_MAXREC => "E_MAXREC",
            E_RANGE => "E_RANGE",
            E_ARGS => "E_ARGS",
            E_NACC => "E_NACC",
            E_INVARG => "E_INVARG",
            E_QUOTA => "E_QUOTA",
            E_FLOAT => "E_FLOAT",
            E_FILE => "E_FILE",
            E_EXEC => "E_EXEC",
            E_INTRPT => "E_INTRPT",
        }
    }

    pub fn msg<S: ToString>(self, s: S) -> Error {
        Error::new(self, Some(s.to_string()), None)
    }

    pub fn with_msg<F>(self, f: F) -> Error
    where
        F: FnOnce() -> String,
    {
        Error::new(self, Some(f()), None)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::new(code, None, None)
    }
}

impl Error {
    #[must_use]
    pub fn message(&self) -> String {
        if let Some(msg) = &self.msg {
            return msg.deref().clone();
        }
        // Default message if one not provided.
        match self.code {
            E_NONE => "No error".into(),
            E_TYPE => "Type mismatch".into(),
            E_DIV => "Division by zero".into(),
            E_PERM => "Permission denied".into(),
            E_PROPNF => "Property not found".into(),
            E_VERBNF => "Verb not found".into(),
            E_VARNF => "Variable not found".into(),
            E_INVIND => "Invalid indirection".into(),
            E_RECMOVE => "Recursive move".into(),
            E_MAXREC => "Too many verb calls".into(),
            E_RANGE => "Range error".into(),
            E_ARGS => "Incorrect number of arguments".into(),
            E_NACC => "Move refused by destination".into(),
            E_INVARG => "Invalid argument".into(),
            E_QUOTA => "Resource limit exceeded".into(),
            E_FLOAT => "Floating-point arithmetic error".into(),
            E_FILE => "File error".into(),
            E_EXEC => "Execution error".into(),
            E_INTRPT => "Interruption".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_ignores_message() {
        let raised = E_RANGE.msg("index 4 out of range");
        assert_eq!(raised, Error::from(E_RANGE));
        assert_eq!(raised, E_RANGE);
    }

    #[test]
    fn test_parse_roundtrip() {
        for code in <ErrorCode as strum::IntoEnumIterator>::iter() {
            assert_eq!(ErrorCode::parse_str(code.name()), Some(code));
        }
        assert_eq!(ErrorCode::parse_str("E_BOGUS"), None);
    }
}
