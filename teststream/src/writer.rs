// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serializes live test-run events as self-contained stream fragments.
//!
//! Each callback produces one complete sub-tree of the wire grammar and hands
//! it to the sink immediately; nothing is buffered across calls and nothing
//! is ever rewritten. A single lock serializes concurrent callers, so
//! triggering threads never interleave partial fragments.

use crate::model::{
    BacktraceEntry, IteratedTest, Test, TestCase, TestContext, TestData, TestIterator, TestRef,
    TestResult, TestSuite, TestUnit,
};
use crate::receiver::StreamReceiver;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use std::io;
use std::sync::{Mutex, PoisonError};
use swrite::{swriteln, SWrite};
use tracing::warn;

static STREAM_TAG: &str = "stream";
static READY_TEST_SUITE_TAG: &str = "ready-test-suite";
static START_TEST_SUITE_TAG: &str = "start-test-suite";
static READY_TEST_CASE_TAG: &str = "ready-test-case";
static START_TEST_CASE_TAG: &str = "start-test-case";
static READY_TEST_ITERATOR_TAG: &str = "ready-test-iterator";
static START_TEST_ITERATOR_TAG: &str = "start-test-iterator";
static START_ITERATED_TEST_TAG: &str = "start-iterated-test";
static START_TEST_TAG: &str = "start-test";
static PASS_ASSERTION_TAG: &str = "pass-assertion";
static TEST_RESULT_TAG: &str = "test-result";
static TEST_ITERATOR_RESULT_TAG: &str = "test-iterator-result";
static TEST_CASE_RESULT_TAG: &str = "test-case-result";
static COMPLETE_ITERATED_TEST_TAG: &str = "complete-iterated-test";
static COMPLETE_TEST_TAG: &str = "complete-test";
static COMPLETE_TEST_ITERATOR_TAG: &str = "complete-test-iterator";
static COMPLETE_TEST_CASE_TAG: &str = "complete-test-case";
static COMPLETE_TEST_SUITE_TAG: &str = "complete-test-suite";
static CRASHED_TAG: &str = "crashed";
static SUCCESS_TAG: &str = "success";
static TEST_SUITE_TAG: &str = "test-suite";
static TEST_CASE_TAG: &str = "test-case";
static TEST_ITERATOR_TAG: &str = "test-iterator";
static TEST_TAG: &str = "test";
static ITERATED_TEST_TAG: &str = "iterated-test";
static TEST_DATA_TAG: &str = "test-data";
static TEST_CONTEXT_TAG: &str = "test-context";
static RESULT_TAG: &str = "result";
static BACKTRACE_TAG: &str = "backtrace";
static ENTRY_TAG: &str = "entry";
static NAME_TAG: &str = "name";
static DESCRIPTION_TAG: &str = "description";
static OPTION_TAG: &str = "option";
static VALUE_TAG: &str = "value";
static START_TIME_TAG: &str = "start-time";
static ELAPSED_TAG: &str = "elapsed";
static STATUS_TAG: &str = "status";
static DETAIL_TAG: &str = "detail";
static FILE_TAG: &str = "file";
static LINE_TAG: &str = "line";
static INFO_TAG: &str = "info";
static FAILED_TAG: &str = "failed";
static N_TEST_CASES_TAG: &str = "n-test-cases";
static N_TESTS_TAG: &str = "n-tests";

type Sink = Box<dyn FnMut(&str) -> io::Result<()> + Send>;

/// Writes a test run as a stream of wire-format fragments.
///
/// The writer emits the opening `<stream>` tag in [`start_run`](Self::start_run)
/// and closes the document in [`complete_run`](Self::complete_run); in between,
/// every callback serializes one event sub-tree and hands it to the sink under
/// the writer's lock. A sink failure is logged and the run continues — losing
/// the transport is not fatal to the tests being run.
///
/// `StreamWriter` also implements [`StreamReceiver`], so it can sit directly
/// downstream of a [`StreamParser`](crate::StreamParser) to relay a stream.
pub struct StreamWriter {
    sink: Mutex<Sink>,
}

impl StreamWriter {
    /// Creates a writer handing each fragment to `sink`.
    pub fn new<S>(sink: S) -> Self
    where
        S: FnMut(&str) -> io::Result<()> + Send + 'static,
    {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Creates a writer over anything [`io::Write`], flushing after every
    /// fragment so downstream readers see events as they happen.
    pub fn from_writer<W>(mut writer: W) -> Self
    where
        W: io::Write + Send + 'static,
    {
        Self::new(move |fragment: &str| {
            writer.write_all(fragment.as_bytes())?;
            writer.flush()
        })
    }

    /// The run started; opens the document.
    pub fn start_run(&self) {
        self.emit(format!("<{STREAM_TAG}>\n"));
    }

    /// A suite is about to run `n_test_cases` cases totalling `n_tests` tests.
    pub fn ready_test_suite(&self, test_suite: &TestSuite, n_test_cases: usize, n_tests: usize) {
        self.emit_event(READY_TEST_SUITE_TAG, |fragment| {
            fragment.unit(TEST_SUITE_TAG, test_suite);
            fragment.leaf(N_TEST_CASES_TAG, &n_test_cases.to_string());
            fragment.leaf(N_TESTS_TAG, &n_tests.to_string());
        });
    }

    /// A suite started running.
    pub fn start_test_suite(&self, test_suite: &TestSuite) {
        self.emit_event(START_TEST_SUITE_TAG, |fragment| {
            fragment.unit(TEST_SUITE_TAG, test_suite);
        });
    }

    /// A case is about to run `n_tests` tests.
    pub fn ready_test_case(&self, test_case: &TestCase, n_tests: usize) {
        self.emit_event(READY_TEST_CASE_TAG, |fragment| {
            fragment.unit(TEST_CASE_TAG, test_case);
            fragment.leaf(N_TESTS_TAG, &n_tests.to_string());
        });
    }

    /// A case started running.
    pub fn start_test_case(&self, test_case: &TestCase) {
        self.emit_event(START_TEST_CASE_TAG, |fragment| {
            fragment.unit(TEST_CASE_TAG, test_case);
        });
    }

    /// An iterator is about to run `n_tests` invocations.
    pub fn ready_test_iterator(&self, test_iterator: &TestIterator, n_tests: usize) {
        self.emit_event(READY_TEST_ITERATOR_TAG, |fragment| {
            fragment.unit(TEST_ITERATOR_TAG, test_iterator);
            fragment.leaf(N_TESTS_TAG, &n_tests.to_string());
        });
    }

    /// An iterator started running.
    pub fn start_test_iterator(&self, test_iterator: &TestIterator) {
        self.emit_event(START_TEST_ITERATOR_TAG, |fragment| {
            fragment.unit(TEST_ITERATOR_TAG, test_iterator);
        });
    }

    /// A test started running.
    pub fn start_test(&self, test: &Test, context: &TestContext) {
        self.emit_event(START_TEST_TAG, |fragment| {
            fragment.unit(TEST_TAG, test);
            fragment.context(context);
        });
    }

    /// One data-driven invocation started running.
    pub fn start_iterated_test(&self, iterated_test: &IteratedTest, context: &TestContext) {
        self.emit_event(START_ITERATED_TEST_TAG, |fragment| {
            fragment.unit(ITERATED_TEST_TAG, iterated_test);
            fragment.context(context);
        });
    }

    /// An assertion held in the given subject.
    pub fn pass_assertion(&self, test: TestRef<'_>, context: &TestContext) {
        self.emit_event(PASS_ASSERTION_TAG, |fragment| {
            match test {
                TestRef::Test(test) => fragment.unit(TEST_TAG, test),
                TestRef::IteratedTest(iterated_test) => {
                    fragment.unit(ITERATED_TEST_TAG, iterated_test);
                }
            }
            fragment.context(context);
        });
    }

    /// A test (or iterated-test) execution produced a result. The subject is
    /// taken from the result's association fields.
    pub fn test_result(&self, result: &TestResult, context: &TestContext) {
        self.emit_event(TEST_RESULT_TAG, |fragment| {
            if let Some(test) = &result.test {
                fragment.unit(TEST_TAG, test);
            }
            if let Some(iterated_test) = &result.iterated_test {
                fragment.unit(ITERATED_TEST_TAG, iterated_test);
            }
            if let Some(test_data) = &result.test_data {
                fragment.test_data(test_data);
            }
            fragment.context(context);
            fragment.result(result);
        });
    }

    /// An iterator finished with the given aggregate result.
    pub fn test_iterator_result(&self, result: &TestResult) {
        self.emit_event(TEST_ITERATOR_RESULT_TAG, |fragment| {
            if let Some(test_iterator) = &result.test_iterator {
                fragment.unit(TEST_ITERATOR_TAG, test_iterator);
            }
            fragment.result(result);
        });
    }

    /// A case finished with the given aggregate result.
    pub fn test_case_result(&self, result: &TestResult) {
        self.emit_event(TEST_CASE_RESULT_TAG, |fragment| {
            if let Some(test_case) = &result.test_case {
                fragment.unit(TEST_CASE_TAG, test_case);
            }
            fragment.result(result);
        });
    }

    /// One data-driven invocation finished.
    pub fn complete_iterated_test(&self, iterated_test: &IteratedTest, context: &TestContext) {
        self.emit_event(COMPLETE_ITERATED_TEST_TAG, |fragment| {
            fragment.unit(ITERATED_TEST_TAG, iterated_test);
            fragment.context(context);
        });
    }

    /// A test finished.
    pub fn complete_test(&self, test: &Test, context: Option<&TestContext>) {
        self.emit_event(COMPLETE_TEST_TAG, |fragment| {
            fragment.unit(TEST_TAG, test);
            if let Some(context) = context {
                fragment.context(context);
            }
        });
    }

    /// An iterator finished.
    pub fn complete_test_iterator(&self, test_iterator: &TestIterator) {
        self.emit_event(COMPLETE_TEST_ITERATOR_TAG, |fragment| {
            fragment.unit(TEST_ITERATOR_TAG, test_iterator);
        });
    }

    /// A case finished.
    pub fn complete_test_case(&self, test_case: &TestCase) {
        self.emit_event(COMPLETE_TEST_CASE_TAG, |fragment| {
            fragment.unit(TEST_CASE_TAG, test_case);
        });
    }

    /// A suite finished.
    pub fn complete_test_suite(&self, test_suite: &TestSuite) {
        self.emit_event(COMPLETE_TEST_SUITE_TAG, |fragment| {
            fragment.unit(TEST_SUITE_TAG, test_suite);
        });
    }

    /// The process being monitored crashed.
    pub fn crashed(&self, backtrace: &[BacktraceEntry]) {
        self.emit_event(CRASHED_TAG, |fragment| {
            fragment.backtrace(backtrace);
        });
    }

    /// The run finished; records the outcome and closes the document.
    pub fn complete_run(&self, success: bool) {
        let mut fragment = Fragment::new();
        fragment.leaf(SUCCESS_TAG, bool_label(success));
        let mut text = fragment.finish();
        swriteln!(text, "</{STREAM_TAG}>");
        self.emit(text);
    }

    fn emit_event(&self, tag: &str, build: impl FnOnce(&mut Fragment)) {
        let mut fragment = Fragment::new();
        fragment.open(tag);
        build(&mut fragment);
        fragment.close(tag);
        self.emit(fragment.finish());
    }

    fn emit(&self, fragment: String) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = (*sink)(&fragment) {
            warn!("failed to write stream fragment: {error}");
        }
    }
}

impl StreamReceiver for StreamWriter {
    fn start_run(&mut self) {
        StreamWriter::start_run(self);
    }

    fn ready_test_suite(&mut self, test_suite: &TestSuite, n_test_cases: usize, n_tests: usize) {
        StreamWriter::ready_test_suite(self, test_suite, n_test_cases, n_tests);
    }

    fn start_test_suite(&mut self, test_suite: &TestSuite) {
        StreamWriter::start_test_suite(self, test_suite);
    }

    fn ready_test_case(&mut self, test_case: &TestCase, n_tests: usize) {
        StreamWriter::ready_test_case(self, test_case, n_tests);
    }

    fn start_test_case(&mut self, test_case: &TestCase) {
        StreamWriter::start_test_case(self, test_case);
    }

    fn ready_test_iterator(&mut self, test_iterator: &TestIterator, n_tests: usize) {
        StreamWriter::ready_test_iterator(self, test_iterator, n_tests);
    }

    fn start_test_iterator(&mut self, test_iterator: &TestIterator) {
        StreamWriter::start_test_iterator(self, test_iterator);
    }

    fn start_test(&mut self, test: &Test, context: &TestContext) {
        StreamWriter::start_test(self, test, context);
    }

    fn start_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {
        StreamWriter::start_iterated_test(self, iterated_test, context);
    }

    fn pass_assertion(&mut self, test: TestRef<'_>, context: &TestContext) {
        StreamWriter::pass_assertion(self, test, context);
    }

    fn test_result(&mut self, result: &TestResult, context: &TestContext) {
        StreamWriter::test_result(self, result, context);
    }

    fn test_iterator_result(&mut self, result: &TestResult) {
        StreamWriter::test_iterator_result(self, result);
    }

    fn test_case_result(&mut self, result: &TestResult) {
        StreamWriter::test_case_result(self, result);
    }

    fn result(&mut self, _result: &TestResult) {
        // The structure-specific callback has already serialized this result.
    }

    fn complete_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {
        StreamWriter::complete_iterated_test(self, iterated_test, context);
    }

    fn complete_test(&mut self, test: &Test, context: Option<&TestContext>) {
        StreamWriter::complete_test(self, test, context);
    }

    fn complete_test_iterator(&mut self, test_iterator: &TestIterator) {
        StreamWriter::complete_test_iterator(self, test_iterator);
    }

    fn complete_test_case(&mut self, test_case: &TestCase) {
        StreamWriter::complete_test_case(self, test_case);
    }

    fn complete_test_suite(&mut self, test_suite: &TestSuite) {
        StreamWriter::complete_test_suite(self, test_suite);
    }

    fn complete_run(&mut self, success: bool) {
        StreamWriter::complete_run(self, success);
    }

    fn crashed(&mut self, backtrace: &[BacktraceEntry]) {
        StreamWriter::crashed(self, backtrace);
    }
}

/// One event sub-tree being assembled, nested one level below `stream`.
struct Fragment {
    buf: String,
    depth: usize,
}

impl Fragment {
    fn new() -> Self {
        Self {
            buf: String::new(),
            depth: 1,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    fn open(&mut self, tag: &str) {
        self.indent();
        swriteln!(self.buf, "<{tag}>");
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth -= 1;
        self.indent();
        swriteln!(self.buf, "</{tag}>");
    }

    fn leaf(&mut self, tag: &str, value: &str) {
        self.indent();
        swriteln!(self.buf, "<{tag}>{}</{tag}>", escape(value));
    }

    fn unit(&mut self, tag: &str, unit: &impl TestUnit) {
        self.open(tag);
        if let Some(name) = unit.name() {
            self.leaf(NAME_TAG, name);
        }
        if let Some(description) = unit.description() {
            self.leaf(DESCRIPTION_TAG, description);
        }
        if let Some(start_time) = unit.start_time() {
            self.leaf(START_TIME_TAG, &format_start_time(start_time));
        }
        if let Some(elapsed) = unit.elapsed() {
            self.leaf(ELAPSED_TAG, &format_elapsed(elapsed));
        }
        for (name, value) in unit.options() {
            self.open(OPTION_TAG);
            self.leaf(NAME_TAG, name);
            self.leaf(VALUE_TAG, value);
            self.close(OPTION_TAG);
        }
        self.close(tag);
    }

    fn test_data(&mut self, test_data: &TestData) {
        self.open(TEST_DATA_TAG);
        if let Some(name) = &test_data.name {
            self.leaf(NAME_TAG, name);
        }
        self.close(TEST_DATA_TAG);
    }

    fn context(&mut self, context: &TestContext) {
        self.open(TEST_CONTEXT_TAG);
        if let Some(test_suite) = &context.test_suite {
            self.unit(TEST_SUITE_TAG, test_suite);
        }
        if let Some(test_case) = &context.test_case {
            self.unit(TEST_CASE_TAG, test_case);
        }
        if let Some(test_iterator) = &context.test_iterator {
            self.unit(TEST_ITERATOR_TAG, test_iterator);
        }
        if let Some(test) = &context.test {
            self.unit(TEST_TAG, test);
        }
        if let Some(iterated_test) = &context.iterated_test {
            self.unit(ITERATED_TEST_TAG, iterated_test);
        }
        if let Some(test_data) = &context.test_data {
            self.test_data(test_data);
        }
        self.leaf(FAILED_TAG, bool_label(context.failed));
        self.close(TEST_CONTEXT_TAG);
    }

    fn result(&mut self, result: &TestResult) {
        self.open(RESULT_TAG);
        self.leaf(STATUS_TAG, result.status.label());
        if let Some(message) = &result.message {
            self.leaf(DETAIL_TAG, message);
        }
        if !result.backtrace.is_empty() {
            self.backtrace(&result.backtrace);
        }
        if let Some(start_time) = result.start_time {
            self.leaf(START_TIME_TAG, &format_start_time(start_time));
        }
        self.leaf(ELAPSED_TAG, &format_elapsed(result.elapsed));
        self.close(RESULT_TAG);
    }

    fn backtrace(&mut self, entries: &[BacktraceEntry]) {
        self.open(BACKTRACE_TAG);
        for entry in entries {
            self.open(ENTRY_TAG);
            if let Some(file) = &entry.file {
                self.leaf(FILE_TAG, file);
            }
            if let Some(line) = entry.line {
                self.leaf(LINE_TAG, &line.to_string());
            }
            self.leaf(INFO_TAG, &format!("{}()", entry.function));
            self.close(ENTRY_TAG);
        }
        self.close(BACKTRACE_TAG);
    }

    fn finish(self) -> String {
        self.buf
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn format_start_time(start_time: DateTime<Utc>) -> String {
    start_time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_elapsed(elapsed: f64) -> String {
    format!("{elapsed:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_escape_markup() {
        let mut fragment = Fragment::new();
        fragment.leaf(DETAIL_TAG, "expected <1> but was \"2\" & <3>");
        assert_eq!(
            fragment.finish(),
            "  <detail>expected &lt;1&gt; but was &quot;2&quot; &amp; &lt;3&gt;</detail>\n"
        );
    }

    #[test]
    fn nested_fragments_indent_by_two() {
        let mut fragment = Fragment::new();
        fragment.open(OPTION_TAG);
        fragment.leaf(NAME_TAG, "bug");
        fragment.close(OPTION_TAG);
        assert_eq!(
            fragment.finish(),
            "  <option>\n    <name>bug</name>\n  </option>\n"
        );
    }
}
