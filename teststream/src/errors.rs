// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while parsing or draining a test-run event stream.

use std::io;
use thiserror::Error;

/// An error raised by [`StreamParser::parse`](crate::StreamParser::parse).
///
/// Carries the cumulative document position at which parsing stopped and the
/// slash-delimited path from the document root to the offending element, e.g.
/// `/stream/start-test/test/option/name`. Line and column are 1-based; the
/// column counts bytes since the last newline across every chunk fed to the
/// parser instance.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Error on line {line} char {column}: {path}: {kind}")]
pub struct ParseError {
    kind: ParseErrorKind,
    line: usize,
    column: usize,
    path: String,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, line: usize, column: usize, path: String) -> Self {
        Self {
            kind,
            line,
            column,
            path,
        }
    }

    /// What went wrong.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// 1-based line number at which the error was detected.
    pub fn line(&self) -> usize {
        self.line
    }

    /// 1-based column at which the error was detected.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Slash-delimited path from the document root to the offending element.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// The taxonomy of parse failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseErrorKind {
    /// A second `<name>` was seen inside an `<option>` that already has one.
    #[error("multiple option name: {0}")]
    MultipleOptionName(String),

    /// An `<option>` `<value>` arrived before any `<name>`.
    #[error("option name is not set")]
    OptionNameNotSet,

    /// A closing tag did not match the innermost open element.
    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClosingTag {
        /// Name of the innermost open element.
        expected: String,
        /// Name carried by the closing tag.
        found: String,
    },

    /// A closing tag was seen with no element open.
    #[error("unexpected closing tag: </{0}>")]
    UnexpectedClosingTag(String),

    /// The document root was not `<stream>`.
    #[error("unexpected root element: <{0}>")]
    UnexpectedRootElement(String),

    /// A child element was opened inside a text-only element.
    #[error("element <{element}> is not allowed inside <{leaf}>")]
    ElementInsideLeaf {
        /// The text-only element that was open.
        leaf: String,
        /// The offending child.
        element: String,
    },

    /// A tag carried no element name, e.g. `<>` or `</ >`.
    #[error("empty element name")]
    EmptyElementName,

    /// A leaf that must hold a non-negative integer held something else.
    #[error("invalid integer in <{element}>: {value}")]
    InvalidInteger {
        /// The leaf element name.
        element: String,
        /// The text that failed to parse.
        value: String,
    },

    /// A leaf that must hold a decimal number held something else.
    #[error("invalid number in <{element}>: {value}")]
    InvalidFloat {
        /// The leaf element name.
        element: String,
        /// The text that failed to parse.
        value: String,
    },

    /// A boolean leaf held something other than `true`/`false`.
    #[error("invalid boolean in <{element}>: {value}")]
    InvalidBoolean {
        /// The leaf element name.
        element: String,
        /// The text that failed to parse.
        value: String,
    },

    /// A `<start-time>` leaf was not an ISO-8601 timestamp.
    #[error("invalid timestamp in <{element}>: {value}")]
    InvalidTimestamp {
        /// The leaf element name.
        element: String,
        /// The text that failed to parse.
        value: String,
    },

    /// Character data was not valid UTF-8 or used an unknown entity reference.
    #[error("invalid character data: {0}")]
    InvalidText(String),

    /// `finish` was called, or the source ran dry, before `</stream>`.
    #[error("stream is not complete")]
    IncompleteStream,

    /// The parser already failed; it must be discarded.
    #[error("parser already failed")]
    Poisoned,
}

/// An error raised by [`StreamParser::parse_from_reader`](crate::StreamParser::parse_from_reader).
#[derive(Debug, Error)]
pub enum ReadError {
    /// Reading from the source failed.
    #[error("failed to read from stream source")]
    Io(#[from] io::Error),

    /// The bytes read so far do not form a valid stream.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Error returned when parsing a [`TestResultStatus`](crate::TestResultStatus)
/// from a string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown test result status: {0}")]
pub struct UnknownStatusError(pub(crate) String);
