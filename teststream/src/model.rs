// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The entity model shared by the stream writer and the stream parser.
//!
//! Entities are plain value objects: built once, fully populated, then treated
//! as immutable. The parser owns the entities it assembles and hands them to
//! the receiver by reference; receivers that need to retain them clone.

use crate::errors::UnknownStatusError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::{fmt, str::FromStr};

/// Read access to the fields every level of the test hierarchy shares.
///
/// Implemented by [`TestSuite`], [`TestCase`], [`TestIterator`], [`Test`] and
/// [`IteratedTest`], so that code serializing or inspecting the hierarchy can
/// treat any level uniformly.
pub trait TestUnit {
    /// The unit's name, if one was supplied.
    fn name(&self) -> Option<&str>;

    /// The unit's description, if one was supplied.
    fn description(&self) -> Option<&str>;

    /// Named options attached to the unit. Keys are unique.
    fn options(&self) -> &IndexMap<String, String>;

    /// The instant the unit started executing.
    fn start_time(&self) -> Option<DateTime<Utc>>;

    /// Wall-clock seconds the unit has taken.
    fn elapsed(&self) -> Option<f64>;
}

macro_rules! impl_test_unit {
    ($ty:ident) => {
        impl TestUnit for $ty {
            fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }

            fn description(&self) -> Option<&str> {
                self.description.as_deref()
            }

            fn options(&self) -> &IndexMap<String, String> {
                &self.options
            }

            fn start_time(&self) -> Option<DateTime<Utc>> {
                self.start_time
            }

            fn elapsed(&self) -> Option<f64> {
                self.elapsed
            }
        }

        impl $ty {
            /// Creates an empty unit; populate it with the `set_*` methods.
            pub fn new() -> Self {
                Self::default()
            }

            /// Sets the name.
            pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
                self.name = Some(name.into());
                self
            }

            /// Sets the description.
            pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
                self.description = Some(description.into());
                self
            }

            /// Adds a named option. A later option with the same name replaces
            /// the earlier one.
            pub fn add_option(
                &mut self,
                name: impl Into<String>,
                value: impl Into<String>,
            ) -> &mut Self {
                self.options.insert(name.into(), value.into());
                self
            }

            /// Sets the start instant.
            pub fn set_start_time(&mut self, start_time: DateTime<Utc>) -> &mut Self {
                self.start_time = Some(start_time);
                self
            }

            /// Sets the elapsed seconds.
            pub fn set_elapsed(&mut self, elapsed: f64) -> &mut Self {
                self.elapsed = Some(elapsed);
                self
            }
        }
    };
}

/// The whole collection of test cases making up one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestSuite {
    /// The name of this suite, if any.
    pub name: Option<String>,

    /// The description of this suite, if any.
    pub description: Option<String>,

    /// Named options attached to this suite.
    pub options: IndexMap<String, String>,

    /// The instant the suite started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the suite has taken.
    pub elapsed: Option<f64>,
}

impl_test_unit!(TestSuite);

/// A group of tests, one level below the suite.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestCase {
    /// The name of this case, if any.
    pub name: Option<String>,

    /// The description of this case, if any.
    pub description: Option<String>,

    /// Named options attached to this case.
    pub options: IndexMap<String, String>,

    /// The instant the case started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the case has taken.
    pub elapsed: Option<f64>,
}

impl_test_unit!(TestCase);

/// A data-driven test: one iterator fans out into many [`IteratedTest`]
/// invocations, one per datum.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestIterator {
    /// The name of this iterator, if any.
    pub name: Option<String>,

    /// The description of this iterator, if any.
    pub description: Option<String>,

    /// Named options attached to this iterator.
    pub options: IndexMap<String, String>,

    /// The instant the iterator started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the iterator has taken.
    pub elapsed: Option<f64>,
}

impl_test_unit!(TestIterator);

/// A single test.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Test {
    /// The name of this test, if any.
    pub name: Option<String>,

    /// The description of this test, if any.
    pub description: Option<String>,

    /// Named options attached to this test.
    pub options: IndexMap<String, String>,

    /// The instant the test started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the test has taken.
    pub elapsed: Option<f64>,
}

impl_test_unit!(Test);

/// One data-driven invocation of a [`TestIterator`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IteratedTest {
    /// The name of this invocation, if any.
    pub name: Option<String>,

    /// The description of this invocation, if any.
    pub description: Option<String>,

    /// Named options attached to this invocation.
    pub options: IndexMap<String, String>,

    /// The instant the invocation started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the invocation has taken.
    pub elapsed: Option<f64>,
}

impl_test_unit!(IteratedTest);

/// The datum driving one [`IteratedTest`] invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestData {
    /// The name of the datum, if any.
    pub name: Option<String>,
}

impl TestData {
    /// Creates a named datum.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// A borrowed `test | iterated-test` alternative, used where an event subject
/// may be either.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TestRef<'a> {
    /// A plain test.
    Test(&'a Test),
    /// One invocation of a data-driven test.
    IteratedTest(&'a IteratedTest),
}

impl TestRef<'_> {
    /// The subject's name, whichever alternative it is.
    pub fn name(&self) -> Option<&str> {
        match self {
            TestRef::Test(test) => test.name(),
            TestRef::IteratedTest(iterated_test) => iterated_test.name(),
        }
    }
}

/// A snapshot of what is executing at one moment of a run.
///
/// Built fresh for every `start-*`, `complete-*` and `pass-assertion` event;
/// never mutated after construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestContext {
    /// The enclosing suite.
    pub test_suite: Option<TestSuite>,

    /// The enclosing case.
    pub test_case: Option<TestCase>,

    /// The enclosing iterator, when a data-driven test is executing.
    pub test_iterator: Option<TestIterator>,

    /// The current test.
    pub test: Option<Test>,

    /// The current iterated-test invocation.
    pub iterated_test: Option<IteratedTest>,

    /// The datum of the current invocation.
    pub test_data: Option<TestData>,

    /// Whether anything has failed so far in this context.
    pub failed: bool,
}

impl TestContext {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the enclosing suite.
    pub fn set_test_suite(&mut self, test_suite: TestSuite) -> &mut Self {
        self.test_suite = Some(test_suite);
        self
    }

    /// Sets the enclosing case.
    pub fn set_test_case(&mut self, test_case: TestCase) -> &mut Self {
        self.test_case = Some(test_case);
        self
    }

    /// Sets the enclosing iterator.
    pub fn set_test_iterator(&mut self, test_iterator: TestIterator) -> &mut Self {
        self.test_iterator = Some(test_iterator);
        self
    }

    /// Sets the current test.
    pub fn set_test(&mut self, test: Test) -> &mut Self {
        self.test = Some(test);
        self
    }

    /// Sets the current iterated-test invocation.
    pub fn set_iterated_test(&mut self, iterated_test: IteratedTest) -> &mut Self {
        self.iterated_test = Some(iterated_test);
        self
    }

    /// Sets the datum of the current invocation.
    pub fn set_test_data(&mut self, test_data: TestData) -> &mut Self {
        self.test_data = Some(test_data);
        self
    }

    /// Sets the failure flag.
    pub fn set_failed(&mut self, failed: bool) -> &mut Self {
        self.failed = failed;
        self
    }
}

/// One stack frame of a failure or crash backtrace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacktraceEntry {
    /// Source file of the frame, when known.
    pub file: Option<String>,

    /// 1-based source line of the frame, when known.
    pub line: Option<u32>,

    /// The function executing in the frame, without its call parentheses.
    pub function: String,
}

impl BacktraceEntry {
    /// Creates an entry for the given function.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            function: function.into(),
        }
    }

    /// Creates an entry from raw frame info text: a bare trailing `()` pair is
    /// stripped, any other text is kept verbatim.
    pub fn from_info(info: &str) -> Self {
        let function = info.strip_suffix("()").unwrap_or(info);
        Self::new(function)
    }

    /// Sets the source file.
    pub fn set_file(&mut self, file: impl Into<String>) -> &mut Self {
        self.file = Some(file.into());
        self
    }

    /// Sets the source line.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for BacktraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}()", file, line, self.function),
            (Some(file), None) => write!(f, "{}: {}()", file, self.function),
            (None, _) => write!(f, "{}()", self.function),
        }
    }
}

/// How one test execution ended, ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestResultStatus {
    /// Everything the test asserted held.
    #[default]
    Success,
    /// The test raised a notification.
    Notification,
    /// The test was omitted.
    Omission,
    /// The test is marked pending.
    Pending,
    /// An assertion failed.
    Failure,
    /// The test errored outside its assertions.
    Error,
    /// The process running the test crashed.
    Crash,
}

impl TestResultStatus {
    /// The lowercase word used for this status on the wire.
    pub fn label(self) -> &'static str {
        match self {
            TestResultStatus::Success => "success",
            TestResultStatus::Notification => "notification",
            TestResultStatus::Omission => "omission",
            TestResultStatus::Pending => "pending",
            TestResultStatus::Failure => "failure",
            TestResultStatus::Error => "error",
            TestResultStatus::Crash => "crash",
        }
    }

    /// Parses a wire label, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        let status = match label.to_ascii_lowercase().as_str() {
            "success" => TestResultStatus::Success,
            "notification" => TestResultStatus::Notification,
            "omission" => TestResultStatus::Omission,
            "pending" => TestResultStatus::Pending,
            "failure" => TestResultStatus::Failure,
            "error" => TestResultStatus::Error,
            "crash" => TestResultStatus::Crash,
            _ => return None,
        };
        Some(status)
    }

    /// Whether this status should be treated as a problem with the run.
    pub fn is_critical(self) -> bool {
        self >= TestResultStatus::Pending
    }
}

impl fmt::Display for TestResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TestResultStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| UnknownStatusError(s.to_owned()))
    }
}

/// The outcome of one test execution.
///
/// The association fields at the bottom identify what the result belongs to;
/// they are copied from whichever subject entities were present in the
/// result's enclosing wrapper on the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestResult {
    /// How the execution ended.
    pub status: TestResultStatus,

    /// Detail text accompanying the status, if any.
    pub message: Option<String>,

    /// Stack frames leading to the failure, outermost last.
    pub backtrace: Vec<BacktraceEntry>,

    /// The instant the execution started.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock seconds the execution took.
    pub elapsed: f64,

    /// The test this result belongs to, when present in the wrapper.
    pub test: Option<Test>,

    /// The case this result belongs to, when present in the wrapper.
    pub test_case: Option<TestCase>,

    /// The iterator this result belongs to, when present in the wrapper.
    pub test_iterator: Option<TestIterator>,

    /// The invocation this result belongs to, when present in the wrapper.
    pub iterated_test: Option<IteratedTest>,

    /// The datum of the invocation, when present in the wrapper.
    pub test_data: Option<TestData>,
}

impl TestResult {
    /// Creates a result with the given status and everything else empty.
    pub fn new(status: TestResultStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sets the detail message.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Appends a backtrace frame.
    pub fn add_backtrace_entry(&mut self, entry: BacktraceEntry) -> &mut Self {
        self.backtrace.push(entry);
        self
    }

    /// Sets the start instant.
    pub fn set_start_time(&mut self, start_time: DateTime<Utc>) -> &mut Self {
        self.start_time = Some(start_time);
        self
    }

    /// Sets the elapsed seconds.
    pub fn set_elapsed(&mut self, elapsed: f64) -> &mut Self {
        self.elapsed = elapsed;
        self
    }

    /// Associates the result with a test.
    pub fn set_test(&mut self, test: Test) -> &mut Self {
        self.test = Some(test);
        self
    }

    /// Associates the result with a case.
    pub fn set_test_case(&mut self, test_case: TestCase) -> &mut Self {
        self.test_case = Some(test_case);
        self
    }

    /// Associates the result with an iterator.
    pub fn set_test_iterator(&mut self, test_iterator: TestIterator) -> &mut Self {
        self.test_iterator = Some(test_iterator);
        self
    }

    /// Associates the result with an iterated-test invocation.
    pub fn set_iterated_test(&mut self, iterated_test: IteratedTest) -> &mut Self {
        self.iterated_test = Some(iterated_test);
        self
    }

    /// Associates the result with a datum.
    pub fn set_test_data(&mut self, test_data: TestData) -> &mut Self {
        self.test_data = Some(test_data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_info_strips_bare_call_parentheses() {
        assert_eq!(BacktraceEntry::from_info("stub_error_test()").function, "stub_error_test");
        assert_eq!(BacktraceEntry::from_info("stub_error_test").function, "stub_error_test");
        // Only a bare trailing pair is stripped.
        assert_eq!(BacktraceEntry::from_info("run(3)").function, "run(3)");
    }

    #[test]
    fn backtrace_entry_display() {
        let mut entry = BacktraceEntry::new("test_add");
        assert_eq!(entry.to_string(), "test_add()");
        entry.set_file("test-add.c");
        assert_eq!(entry.to_string(), "test-add.c: test_add()");
        entry.set_line(12);
        assert_eq!(entry.to_string(), "test-add.c:12: test_add()");
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            TestResultStatus::Success,
            TestResultStatus::Notification,
            TestResultStatus::Omission,
            TestResultStatus::Pending,
            TestResultStatus::Failure,
            TestResultStatus::Error,
            TestResultStatus::Crash,
        ] {
            assert_eq!(TestResultStatus::from_label(status.label()), Some(status));
            assert_eq!(status.label().parse::<TestResultStatus>(), Ok(status));
        }
        assert_eq!(TestResultStatus::from_label("FAILURE"), Some(TestResultStatus::Failure));
        assert_eq!(TestResultStatus::from_label("bogus"), None);
    }

    #[test]
    fn status_severity_ordering() {
        assert!(TestResultStatus::Success < TestResultStatus::Notification);
        assert!(TestResultStatus::Failure < TestResultStatus::Crash);
        assert!(!TestResultStatus::Omission.is_critical());
        assert!(TestResultStatus::Pending.is_critical());
    }
}
