// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A receiver that records every dispatched event, for asserting on whole
//! event sequences.

use teststream::{
    BacktraceEntry, IteratedTest, StreamReceiver, Test, TestCase, TestContext, TestIterator,
    TestRef, TestResult, TestSuite,
};

/// An owned `test | iterated-test` subject.
#[derive(Clone, Debug, PartialEq)]
pub enum Subject {
    Test(Test),
    IteratedTest(IteratedTest),
}

/// One dispatched event, with owned copies of its entities.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    StartRun,
    ReadyTestSuite {
        test_suite: TestSuite,
        n_test_cases: usize,
        n_tests: usize,
    },
    StartTestSuite(TestSuite),
    ReadyTestCase {
        test_case: TestCase,
        n_tests: usize,
    },
    StartTestCase(TestCase),
    ReadyTestIterator {
        test_iterator: TestIterator,
        n_tests: usize,
    },
    StartTestIterator(TestIterator),
    StartTest {
        test: Test,
        context: TestContext,
    },
    StartIteratedTest {
        iterated_test: IteratedTest,
        context: TestContext,
    },
    PassAssertion {
        subject: Subject,
        context: TestContext,
    },
    TestResult {
        result: TestResult,
        context: TestContext,
    },
    TestIteratorResult(TestResult),
    TestCaseResult(TestResult),
    Result(TestResult),
    CompleteIteratedTest {
        iterated_test: IteratedTest,
        context: TestContext,
    },
    CompleteTest {
        test: Test,
        context: Option<TestContext>,
    },
    CompleteTestIterator(TestIterator),
    CompleteTestCase(TestCase),
    CompleteTestSuite(TestSuite),
    CompleteRun(bool),
    Crashed(Vec<BacktraceEntry>),
}

/// Records events in dispatch order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Recorder {
    pub events: Vec<RecordedEvent>,
}

impl StreamReceiver for Recorder {
    fn start_run(&mut self) {
        self.events.push(RecordedEvent::StartRun);
    }

    fn ready_test_suite(&mut self, test_suite: &TestSuite, n_test_cases: usize, n_tests: usize) {
        self.events.push(RecordedEvent::ReadyTestSuite {
            test_suite: test_suite.clone(),
            n_test_cases,
            n_tests,
        });
    }

    fn start_test_suite(&mut self, test_suite: &TestSuite) {
        self.events
            .push(RecordedEvent::StartTestSuite(test_suite.clone()));
    }

    fn ready_test_case(&mut self, test_case: &TestCase, n_tests: usize) {
        self.events.push(RecordedEvent::ReadyTestCase {
            test_case: test_case.clone(),
            n_tests,
        });
    }

    fn start_test_case(&mut self, test_case: &TestCase) {
        self.events
            .push(RecordedEvent::StartTestCase(test_case.clone()));
    }

    fn ready_test_iterator(&mut self, test_iterator: &TestIterator, n_tests: usize) {
        self.events.push(RecordedEvent::ReadyTestIterator {
            test_iterator: test_iterator.clone(),
            n_tests,
        });
    }

    fn start_test_iterator(&mut self, test_iterator: &TestIterator) {
        self.events
            .push(RecordedEvent::StartTestIterator(test_iterator.clone()));
    }

    fn start_test(&mut self, test: &Test, context: &TestContext) {
        self.events.push(RecordedEvent::StartTest {
            test: test.clone(),
            context: context.clone(),
        });
    }

    fn start_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {
        self.events.push(RecordedEvent::StartIteratedTest {
            iterated_test: iterated_test.clone(),
            context: context.clone(),
        });
    }

    fn pass_assertion(&mut self, test: TestRef<'_>, context: &TestContext) {
        let subject = match test {
            TestRef::Test(test) => Subject::Test(test.clone()),
            TestRef::IteratedTest(iterated_test) => Subject::IteratedTest(iterated_test.clone()),
        };
        self.events.push(RecordedEvent::PassAssertion {
            subject,
            context: context.clone(),
        });
    }

    fn test_result(&mut self, result: &TestResult, context: &TestContext) {
        self.events.push(RecordedEvent::TestResult {
            result: result.clone(),
            context: context.clone(),
        });
    }

    fn test_iterator_result(&mut self, result: &TestResult) {
        self.events
            .push(RecordedEvent::TestIteratorResult(result.clone()));
    }

    fn test_case_result(&mut self, result: &TestResult) {
        self.events
            .push(RecordedEvent::TestCaseResult(result.clone()));
    }

    fn result(&mut self, result: &TestResult) {
        self.events.push(RecordedEvent::Result(result.clone()));
    }

    fn complete_iterated_test(&mut self, iterated_test: &IteratedTest, context: &TestContext) {
        self.events.push(RecordedEvent::CompleteIteratedTest {
            iterated_test: iterated_test.clone(),
            context: context.clone(),
        });
    }

    fn complete_test(&mut self, test: &Test, context: Option<&TestContext>) {
        self.events.push(RecordedEvent::CompleteTest {
            test: test.clone(),
            context: context.cloned(),
        });
    }

    fn complete_test_iterator(&mut self, test_iterator: &TestIterator) {
        self.events
            .push(RecordedEvent::CompleteTestIterator(test_iterator.clone()));
    }

    fn complete_test_case(&mut self, test_case: &TestCase) {
        self.events
            .push(RecordedEvent::CompleteTestCase(test_case.clone()));
    }

    fn complete_test_suite(&mut self, test_suite: &TestSuite) {
        self.events
            .push(RecordedEvent::CompleteTestSuite(test_suite.clone()));
    }

    fn complete_run(&mut self, success: bool) {
        self.events.push(RecordedEvent::CompleteRun(success));
    }

    fn crashed(&mut self, backtrace: &[BacktraceEntry]) {
        self.events.push(RecordedEvent::Crashed(backtrace.to_vec()));
    }
}
