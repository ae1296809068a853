// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The consumer-side interface for parsed stream events.

use crate::model::{
    BacktraceEntry, IteratedTest, Test, TestCase, TestContext, TestIterator, TestRef, TestResult,
    TestSuite,
};

/// Reacts to the events of one test run, in the exact order their closing tags
/// complete on the wire.
///
/// One method per event kind; every method has an empty default body, so a
/// receiver only implements what it cares about. Dispatch is synchronous and
/// blocking with respect to parser progress: no reordering, no batching, no
/// concurrency.
///
/// Entities are borrowed from the parser and are not mutated after dispatch;
/// clone whatever needs to outlive the callback.
#[allow(unused_variables)]
pub trait StreamReceiver {
    /// The run started: the opening `stream` tag was seen.
    fn start_run(&mut self) {}

    /// A suite is about to run `n_test_cases` cases totalling `n_tests` tests.
    fn ready_test_suite(&mut self, test_suite: &TestSuite, n_test_cases: usize, n_tests: usize) {}

    /// A suite started running.
    fn start_test_suite(&mut self, test_suite: &TestSuite) {}

    /// A case is about to run `n_tests` tests.
    fn ready_test_case(&mut self, test_case: &TestCase, n_tests: usize) {}

    /// A case started running.
    fn start_test_case(&mut self, test_case: &TestCase) {}

    /// An iterator is about to run `n_tests` invocations.
    fn ready_test_iterator(&mut self, test_iterator: &TestIterator, n_tests: usize) {}

    /// An iterator started running.
    fn start_test_iterator(&mut self, test_iterator: &TestIterator) {}

    /// A test started running.
    fn start_test(&mut self, test: &Test, context: &TestContext) {}

    /// One data-driven invocation started running.
    fn start_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {}

    /// An assertion held in the given subject.
    fn pass_assertion(&mut self, test: TestRef<'_>, context: &TestContext) {}

    /// A test (or iterated-test) execution produced a result. The subject
    /// travels in the result's association fields.
    fn test_result(&mut self, result: &TestResult, context: &TestContext) {}

    /// An iterator finished with the given aggregate result.
    fn test_iterator_result(&mut self, result: &TestResult) {}

    /// A case finished with the given aggregate result.
    fn test_case_result(&mut self, result: &TestResult) {}

    /// Fired for every result variant, after its structure-specific callback.
    fn result(&mut self, result: &TestResult) {}

    /// One data-driven invocation finished.
    fn complete_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {}

    /// A test finished.
    fn complete_test(&mut self, test: &Test, context: Option<&TestContext>) {}

    /// An iterator finished.
    fn complete_test_iterator(&mut self, test_iterator: &TestIterator) {}

    /// A case finished.
    fn complete_test_case(&mut self, test_case: &TestCase) {}

    /// A suite finished.
    fn complete_test_suite(&mut self, test_suite: &TestSuite) {}

    /// The run finished: the closing `stream` tag was seen. `success` defaults
    /// to `true` when the stream carried no `success` element.
    fn complete_run(&mut self, success: bool) {}

    /// The process being monitored crashed.
    fn crashed(&mut self, backtrace: &[BacktraceEntry]) {}
}
