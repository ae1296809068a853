// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The wire protocol spoken between a test run and whatever watches it.
//!
//! A run in progress — typically a monitored child process — serializes its
//! events with a [`StreamWriter`] as they happen: suites, cases and tests
//! becoming ready, starting, passing assertions, producing results,
//! completing, or crashing. On the other end of the pipe, a [`StreamParser`]
//! incrementally reconstructs those events from byte chunks of arbitrary size
//! and dispatches them to a [`StreamReceiver`] in arrival order.
//!
//! ```
//! use teststream::{StreamParser, StreamReceiver, TestCase, TestResult};
//!
//! #[derive(Default)]
//! struct Tally {
//!     results: usize,
//! }
//!
//! impl StreamReceiver for Tally {
//!     fn result(&mut self, _result: &TestResult) {
//!         self.results += 1;
//!     }
//! }
//!
//! let mut parser = StreamParser::new(Tally::default());
//! parser.parse(b"<stream><test-case-result><test-case><name>math</name></test-case>").unwrap();
//! parser.parse(b"<result><status>success</status><elapsed>0.01</elapsed></result>").unwrap();
//! parser.parse(b"</test-case-result></stream>").unwrap();
//! assert_eq!(parser.receiver().results, 1);
//! assert!(parser.finished());
//! ```

mod errors;
mod model;
mod parser;
mod receiver;
mod writer;

pub use errors::*;
pub use model::*;
pub use parser::*;
pub use receiver::*;
pub use writer::*;
