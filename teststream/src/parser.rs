// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A resumable push-parser for the test-run event stream wire format.
//!
//! The parser consumes byte chunks of arbitrary size and boundary — tags and
//! character data may be split anywhere, including mid-UTF-8-sequence — and
//! dispatches fully assembled events to a [`StreamReceiver`] in the exact
//! order their closing tags complete. It performs no I/O of its own and never
//! blocks waiting for more data; the caller owns the read loop.

use crate::errors::{ParseError, ParseErrorKind, ReadError};
use crate::model::{
    BacktraceEntry, IteratedTest, Test, TestCase, TestContext, TestData, TestIterator, TestRef,
    TestResult, TestResultStatus, TestSuite,
};
use crate::receiver::StreamReceiver;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quick_xml::escape::unescape;
use std::io::{self, Read};

/// The document root element.
const STREAM_ELEMENT: &str = "stream";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    NotStarted,
    Started,
    Finished,
}

/// An incremental parser reconstructing test-run events from a byte stream.
///
/// Feed it chunks with [`parse`](Self::parse); events are dispatched to the
/// receiver synchronously as each one completes. A parser instance handles
/// exactly one `stream` document; input arriving after the closing tag is
/// ignored, and an instance that has returned an error is unusable.
///
/// ```
/// use teststream::{StreamParser, StreamReceiver};
///
/// #[derive(Default)]
/// struct CountRuns(usize);
///
/// impl StreamReceiver for CountRuns {
///     fn start_run(&mut self) {
///         self.0 += 1;
///     }
/// }
///
/// let mut parser = StreamParser::new(CountRuns::default());
/// // A tag split across reads produces no event until it completes.
/// parser.parse(b"<stream").unwrap();
/// assert_eq!(parser.receiver().0, 0);
/// parser.parse(b">").unwrap();
/// assert_eq!(parser.receiver().0, 1);
/// ```
pub struct StreamParser<R> {
    receiver: R,
    stack: Vec<OpenElement>,
    state: RunState,
    pending_success: Option<bool>,
    poisoned: bool,
    // Tokenizer state: inside a tag, bytes seen since its `<`.
    in_tag: bool,
    tag: Vec<u8>,
    // Cursor over all bytes ever fed to this instance. `line` and `column`
    // are 1-based; `column` points at the byte after the last consumed one.
    line: usize,
    column: usize,
    offset: u64,
}

struct OpenElement {
    name: String,
    node: Node,
    text: Vec<u8>,
}

enum Node {
    Stream,
    Event(Box<EventBuilder>),
    Unit { kind: UnitKind, parts: UnitParts },
    OptionPair(OptionPair),
    Context(TestContext),
    Result(TestResult),
    Backtrace(Vec<BacktraceEntry>),
    Entry(EntryParts),
    Leaf(Leaf),
    Ignored,
}

impl Node {
    fn event(kind: EventKind) -> Self {
        Node::Event(Box::new(EventBuilder::new(kind)))
    }

    fn unit(kind: UnitKind) -> Self {
        Node::Unit {
            kind,
            parts: UnitParts::default(),
        }
    }
}

#[derive(Clone, Copy)]
enum EventKind {
    ReadyTestSuite,
    StartTestSuite,
    ReadyTestCase,
    StartTestCase,
    ReadyTestIterator,
    StartTestIterator,
    StartIteratedTest,
    StartTest,
    PassAssertion,
    TestResult,
    TestIteratorResult,
    TestCaseResult,
    CompleteIteratedTest,
    CompleteTest,
    CompleteTestIterator,
    CompleteTestCase,
    CompleteTestSuite,
    Crashed,
}

struct EventBuilder {
    kind: EventKind,
    test_suite: Option<TestSuite>,
    test_case: Option<TestCase>,
    test_iterator: Option<TestIterator>,
    test: Option<Test>,
    iterated_test: Option<IteratedTest>,
    test_data: Option<TestData>,
    context: Option<TestContext>,
    result: Option<TestResult>,
    backtrace: Vec<BacktraceEntry>,
    n_test_cases: usize,
    n_tests: usize,
}

impl EventBuilder {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            test_suite: None,
            test_case: None,
            test_iterator: None,
            test: None,
            iterated_test: None,
            test_data: None,
            context: None,
            result: None,
            backtrace: Vec::new(),
            n_test_cases: 0,
            n_tests: 0,
        }
    }
}

#[derive(Clone, Copy)]
enum UnitKind {
    Suite,
    Case,
    Iterator,
    Test,
    Iterated,
    Data,
}

#[derive(Default)]
struct UnitParts {
    name: Option<String>,
    description: Option<String>,
    options: IndexMap<String, String>,
    start_time: Option<DateTime<Utc>>,
    elapsed: Option<f64>,
}

impl UnitParts {
    fn into_test_suite(self) -> TestSuite {
        TestSuite {
            name: self.name,
            description: self.description,
            options: self.options,
            start_time: self.start_time,
            elapsed: self.elapsed,
        }
    }

    fn into_test_case(self) -> TestCase {
        TestCase {
            name: self.name,
            description: self.description,
            options: self.options,
            start_time: self.start_time,
            elapsed: self.elapsed,
        }
    }

    fn into_test_iterator(self) -> TestIterator {
        TestIterator {
            name: self.name,
            description: self.description,
            options: self.options,
            start_time: self.start_time,
            elapsed: self.elapsed,
        }
    }

    fn into_test(self) -> Test {
        Test {
            name: self.name,
            description: self.description,
            options: self.options,
            start_time: self.start_time,
            elapsed: self.elapsed,
        }
    }

    fn into_iterated_test(self) -> IteratedTest {
        IteratedTest {
            name: self.name,
            description: self.description,
            options: self.options,
            start_time: self.start_time,
            elapsed: self.elapsed,
        }
    }

    fn into_test_data(self) -> TestData {
        TestData { name: self.name }
    }
}

#[derive(Default)]
struct OptionPair {
    name: Option<String>,
    value: Option<String>,
}

#[derive(Default)]
struct EntryParts {
    file: Option<String>,
    line: Option<u32>,
    info: Option<String>,
}

#[derive(Clone, Copy)]
enum Leaf {
    Name,
    Description,
    Value,
    StartTime,
    Elapsed,
    Status,
    Detail,
    File,
    Line,
    Info,
    Failed,
    Success,
    NTestCases,
    NTests,
}

fn stream_child(name: &str) -> Node {
    match name {
        "ready-test-suite" => Node::event(EventKind::ReadyTestSuite),
        "start-test-suite" => Node::event(EventKind::StartTestSuite),
        "ready-test-case" => Node::event(EventKind::ReadyTestCase),
        "start-test-case" => Node::event(EventKind::StartTestCase),
        "ready-test-iterator" => Node::event(EventKind::ReadyTestIterator),
        "start-test-iterator" => Node::event(EventKind::StartTestIterator),
        "start-iterated-test" => Node::event(EventKind::StartIteratedTest),
        "start-test" => Node::event(EventKind::StartTest),
        "pass-assertion" => Node::event(EventKind::PassAssertion),
        "test-result" => Node::event(EventKind::TestResult),
        "test-iterator-result" => Node::event(EventKind::TestIteratorResult),
        "test-case-result" => Node::event(EventKind::TestCaseResult),
        "complete-iterated-test" => Node::event(EventKind::CompleteIteratedTest),
        "complete-test" => Node::event(EventKind::CompleteTest),
        "complete-test-iterator" => Node::event(EventKind::CompleteTestIterator),
        "complete-test-case" => Node::event(EventKind::CompleteTestCase),
        "complete-test-suite" => Node::event(EventKind::CompleteTestSuite),
        "crashed" => Node::event(EventKind::Crashed),
        "success" => Node::Leaf(Leaf::Success),
        _ => Node::Ignored,
    }
}

fn event_child(name: &str) -> Node {
    match name {
        "test-suite" => Node::unit(UnitKind::Suite),
        "test-case" => Node::unit(UnitKind::Case),
        "test-iterator" => Node::unit(UnitKind::Iterator),
        "test" => Node::unit(UnitKind::Test),
        "iterated-test" => Node::unit(UnitKind::Iterated),
        "test-data" => Node::unit(UnitKind::Data),
        "test-context" => Node::Context(TestContext::default()),
        "result" => Node::Result(TestResult::default()),
        "backtrace" => Node::Backtrace(Vec::new()),
        "n-test-cases" => Node::Leaf(Leaf::NTestCases),
        "n-tests" => Node::Leaf(Leaf::NTests),
        _ => Node::Ignored,
    }
}

fn unit_child(name: &str) -> Node {
    match name {
        "name" => Node::Leaf(Leaf::Name),
        "description" => Node::Leaf(Leaf::Description),
        "start-time" => Node::Leaf(Leaf::StartTime),
        "elapsed" => Node::Leaf(Leaf::Elapsed),
        "option" => Node::OptionPair(OptionPair::default()),
        _ => Node::Ignored,
    }
}

fn option_child(name: &str) -> Node {
    match name {
        "name" => Node::Leaf(Leaf::Name),
        "value" => Node::Leaf(Leaf::Value),
        _ => Node::Ignored,
    }
}

fn context_child(name: &str) -> Node {
    match name {
        "test-suite" => Node::unit(UnitKind::Suite),
        "test-case" => Node::unit(UnitKind::Case),
        "test-iterator" => Node::unit(UnitKind::Iterator),
        "test" => Node::unit(UnitKind::Test),
        "iterated-test" => Node::unit(UnitKind::Iterated),
        "test-data" => Node::unit(UnitKind::Data),
        "failed" => Node::Leaf(Leaf::Failed),
        _ => Node::Ignored,
    }
}

fn result_child(name: &str) -> Node {
    match name {
        "test" => Node::unit(UnitKind::Test),
        "test-case" => Node::unit(UnitKind::Case),
        "test-iterator" => Node::unit(UnitKind::Iterator),
        "iterated-test" => Node::unit(UnitKind::Iterated),
        "test-data" => Node::unit(UnitKind::Data),
        "status" => Node::Leaf(Leaf::Status),
        "detail" => Node::Leaf(Leaf::Detail),
        "start-time" => Node::Leaf(Leaf::StartTime),
        "elapsed" => Node::Leaf(Leaf::Elapsed),
        "backtrace" => Node::Backtrace(Vec::new()),
        _ => Node::Ignored,
    }
}

fn backtrace_child(name: &str) -> Node {
    match name {
        "entry" => Node::Entry(EntryParts::default()),
        _ => Node::Ignored,
    }
}

fn entry_child(name: &str) -> Node {
    match name {
        "file" => Node::Leaf(Leaf::File),
        "line" => Node::Leaf(Leaf::Line),
        "info" => Node::Leaf(Leaf::Info),
        _ => Node::Ignored,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

impl<R: StreamReceiver> StreamParser<R> {
    /// Creates a parser dispatching to `receiver`.
    pub fn new(receiver: R) -> Self {
        Self {
            receiver,
            stack: Vec::new(),
            state: RunState::NotStarted,
            pending_success: None,
            poisoned: false,
            in_tag: false,
            tag: Vec::new(),
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Shared access to the receiver.
    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    /// Exclusive access to the receiver.
    pub fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }

    /// Consumes the parser, returning its receiver.
    pub fn into_receiver(self) -> R {
        self.receiver
    }

    /// Whether the opening `stream` tag has been seen.
    pub fn started(&self) -> bool {
        self.state != RunState::NotStarted
    }

    /// Whether the closing `stream` tag has been seen.
    pub fn finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// The cursor over everything fed so far: 1-based line, 1-based column,
    /// and absolute byte offset. Useful when reporting what a truncated
    /// stream looked like.
    pub fn position(&self) -> (usize, usize, u64) {
        (self.line, self.column, self.offset)
    }

    /// Feeds the next chunk of the stream.
    ///
    /// Chunks may be split at any byte boundary, including inside a tag, a
    /// UTF-8 sequence or an entity reference; an empty chunk is a no-op.
    /// Events whose closing tag completes within `chunk` are dispatched
    /// before this call returns.
    ///
    /// On error the offending position is reported and the parser becomes
    /// unusable: every further call fails with
    /// [`ParseErrorKind::Poisoned`].
    pub fn parse(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        if self.poisoned {
            return Err(self.error(ParseErrorKind::Poisoned));
        }
        for &byte in chunk {
            self.offset += 1;
            if byte == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            if let Err(error) = self.step(byte) {
                self.poisoned = true;
                return Err(error);
            }
        }
        Ok(())
    }

    /// Declares end of input, verifying the document completed.
    ///
    /// The parser never treats end of input as a crash; what a truncated
    /// stream means is the caller's decision, and this is the hook for it.
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.poisoned {
            return Err(self.error(ParseErrorKind::Poisoned));
        }
        if self.state == RunState::Finished {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::IncompleteStream))
        }
    }

    /// Drains `reader` to end of input, then [`finish`](Self::finish)es.
    ///
    /// A convenience read loop for callers without one of their own; the
    /// incremental [`parse`](Self::parse) path stays I/O-free.
    pub fn parse_from_reader<T: Read>(&mut self, mut reader: T) -> Result<(), ReadError> {
        let mut buffer = [0_u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => self.parse(&buffer[..read])?,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }
        self.finish()?;
        Ok(())
    }

    fn step(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.in_tag {
            if byte == b'>' {
                self.in_tag = false;
                let tag = std::mem::take(&mut self.tag);
                self.handle_tag(tag)
            } else {
                self.tag.push(byte);
                Ok(())
            }
        } else if byte == b'<' {
            self.in_tag = true;
            Ok(())
        } else {
            // Character data is buffered only for text-only elements; stray
            // text elsewhere (typically indentation between fragments) is
            // dropped as it arrives so a long run cannot grow the stack.
            if let Some(top) = self.stack.last_mut() {
                if matches!(top.node, Node::Leaf(_)) {
                    top.text.push(byte);
                }
            }
            Ok(())
        }
    }

    fn handle_tag(&mut self, tag: Vec<u8>) -> Result<(), ParseError> {
        if self.state == RunState::Finished {
            return Ok(());
        }
        let text = match std::str::from_utf8(&tag) {
            Ok(text) => text.trim(),
            Err(_) => {
                return Err(self.error(ParseErrorKind::InvalidText(
                    "invalid UTF-8 in tag".to_owned(),
                )));
            }
        };
        if text.is_empty() {
            return Err(self.error(ParseErrorKind::EmptyElementName));
        }
        if text.starts_with('?') || text.starts_with('!') {
            // Declarations and comments carry no protocol data.
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix('/') {
            let name = rest.trim();
            if name.is_empty() {
                return Err(self.error(ParseErrorKind::EmptyElementName));
            }
            return self.close_element(name);
        }
        let (content, self_closing) = match text.strip_suffix('/') {
            Some(content) => (content.trim_end(), true),
            None => (text, false),
        };
        let Some(name) = content.split_whitespace().next() else {
            return Err(self.error(ParseErrorKind::EmptyElementName));
        };
        self.open_element(name)?;
        if self_closing {
            self.close_element(name)?;
        }
        Ok(())
    }

    fn open_element(&mut self, name: &str) -> Result<(), ParseError> {
        let node = match self.stack.last() {
            None => {
                if name == STREAM_ELEMENT {
                    self.state = RunState::Started;
                    self.receiver.start_run();
                    Node::Stream
                } else {
                    return Err(self.error_at(
                        ParseErrorKind::UnexpectedRootElement(name.to_owned()),
                        name,
                    ));
                }
            }
            Some(parent) => match &parent.node {
                Node::Stream => stream_child(name),
                Node::Event(_) => event_child(name),
                Node::Unit { .. } => unit_child(name),
                Node::OptionPair(_) => option_child(name),
                Node::Context(_) => context_child(name),
                Node::Result(_) => result_child(name),
                Node::Backtrace(_) => backtrace_child(name),
                Node::Entry(_) => entry_child(name),
                Node::Leaf(_) => {
                    return Err(self.error_at(
                        ParseErrorKind::ElementInsideLeaf {
                            leaf: parent.name.clone(),
                            element: name.to_owned(),
                        },
                        name,
                    ));
                }
                // Everything below an unknown element is skipped wholesale.
                Node::Ignored => Node::Ignored,
            },
        };
        self.stack.push(OpenElement {
            name: name.to_owned(),
            node,
            text: Vec::new(),
        });
        Ok(())
    }

    fn close_element(&mut self, name: &str) -> Result<(), ParseError> {
        match self.stack.last() {
            None => {
                return Err(self.error_at(
                    ParseErrorKind::UnexpectedClosingTag(name.to_owned()),
                    name,
                ));
            }
            Some(top) if top.name != name => {
                let expected = top.name.clone();
                return Err(self.error(ParseErrorKind::MismatchedClosingTag {
                    expected,
                    found: name.to_owned(),
                }));
            }
            Some(_) => {}
        }
        let Some(element) = self.stack.pop() else {
            return Ok(());
        };
        let OpenElement {
            name: closed,
            node,
            text,
        } = element;

        match node {
            Node::Leaf(leaf) => {
                let line = self.line;
                let column = self.column;
                let path = self.path_of(Some(&closed));
                let fail =
                    |kind: ParseErrorKind| ParseError::new(kind, line, column, path.clone());
                let raw = String::from_utf8(text)
                    .map_err(|_| fail(ParseErrorKind::InvalidText("invalid UTF-8".to_owned())))?;
                let value = unescape(&raw)
                    .map_err(|error| fail(ParseErrorKind::InvalidText(error.to_string())))?
                    .into_owned();
                self.close_leaf(leaf, &closed, value, &fail)?;
            }
            Node::Unit { kind, parts } => {
                if let Some(parent) = self.stack.last_mut() {
                    match &mut parent.node {
                        Node::Event(builder) => match kind {
                            UnitKind::Suite => builder.test_suite = Some(parts.into_test_suite()),
                            UnitKind::Case => builder.test_case = Some(parts.into_test_case()),
                            UnitKind::Iterator => {
                                builder.test_iterator = Some(parts.into_test_iterator());
                            }
                            UnitKind::Test => builder.test = Some(parts.into_test()),
                            UnitKind::Iterated => {
                                builder.iterated_test = Some(parts.into_iterated_test());
                            }
                            UnitKind::Data => builder.test_data = Some(parts.into_test_data()),
                        },
                        Node::Context(context) => match kind {
                            UnitKind::Suite => context.test_suite = Some(parts.into_test_suite()),
                            UnitKind::Case => context.test_case = Some(parts.into_test_case()),
                            UnitKind::Iterator => {
                                context.test_iterator = Some(parts.into_test_iterator());
                            }
                            UnitKind::Test => context.test = Some(parts.into_test()),
                            UnitKind::Iterated => {
                                context.iterated_test = Some(parts.into_iterated_test());
                            }
                            UnitKind::Data => context.test_data = Some(parts.into_test_data()),
                        },
                        Node::Result(result) => match kind {
                            UnitKind::Suite => {}
                            UnitKind::Case => result.test_case = Some(parts.into_test_case()),
                            UnitKind::Iterator => {
                                result.test_iterator = Some(parts.into_test_iterator());
                            }
                            UnitKind::Test => result.test = Some(parts.into_test()),
                            UnitKind::Iterated => {
                                result.iterated_test = Some(parts.into_iterated_test());
                            }
                            UnitKind::Data => result.test_data = Some(parts.into_test_data()),
                        },
                        _ => {}
                    }
                }
            }
            Node::OptionPair(option) => {
                if let (Some(option_name), Some(option_value)) = (option.name, option.value) {
                    if let Some(parent) = self.stack.last_mut() {
                        if let Node::Unit { parts, .. } = &mut parent.node {
                            parts.options.insert(option_name, option_value);
                        }
                    }
                }
            }
            Node::Context(context) => {
                if let Some(parent) = self.stack.last_mut() {
                    if let Node::Event(builder) = &mut parent.node {
                        builder.context = Some(context);
                    }
                }
            }
            Node::Result(result) => {
                if let Some(parent) = self.stack.last_mut() {
                    if let Node::Event(builder) = &mut parent.node {
                        builder.result = Some(result);
                    }
                }
            }
            Node::Backtrace(entries) => {
                if let Some(parent) = self.stack.last_mut() {
                    match &mut parent.node {
                        Node::Event(builder) => builder.backtrace = entries,
                        Node::Result(result) => result.backtrace = entries,
                        _ => {}
                    }
                }
            }
            Node::Entry(entry) => {
                // A frame without <info> has no function and is dropped.
                if let Some(info) = entry.info {
                    if let Some(parent) = self.stack.last_mut() {
                        if let Node::Backtrace(entries) = &mut parent.node {
                            let mut frame = BacktraceEntry::from_info(&info);
                            frame.file = entry.file;
                            frame.line = entry.line;
                            entries.push(frame);
                        }
                    }
                }
            }
            Node::Event(builder) => self.dispatch(*builder),
            Node::Stream => {
                self.state = RunState::Finished;
                let success = self.pending_success.unwrap_or(true);
                self.receiver.complete_run(success);
            }
            Node::Ignored => {}
        }
        Ok(())
    }

    fn close_leaf(
        &mut self,
        leaf: Leaf,
        element: &str,
        value: String,
        fail: &dyn Fn(ParseErrorKind) -> ParseError,
    ) -> Result<(), ParseError> {
        if let Leaf::Success = leaf {
            let flag = parse_bool(&value).ok_or_else(|| {
                fail(ParseErrorKind::InvalidBoolean {
                    element: element.to_owned(),
                    value: value.clone(),
                })
            })?;
            self.pending_success = Some(flag);
            return Ok(());
        }
        let Some(parent) = self.stack.last_mut() else {
            return Ok(());
        };
        match (leaf, &mut parent.node) {
            (Leaf::Name, Node::Unit { parts, .. }) => parts.name = Some(value),
            (Leaf::Name, Node::OptionPair(option)) => {
                if option.name.is_some() {
                    return Err(fail(ParseErrorKind::MultipleOptionName(value)));
                }
                option.name = Some(value);
            }
            (Leaf::Value, Node::OptionPair(option)) => {
                if option.name.is_none() {
                    return Err(fail(ParseErrorKind::OptionNameNotSet));
                }
                option.value = Some(value);
            }
            (Leaf::Description, Node::Unit { parts, .. }) => parts.description = Some(value),
            (Leaf::StartTime, Node::Unit { parts, .. }) => {
                let instant = parse_timestamp(&value).ok_or_else(|| {
                    fail(ParseErrorKind::InvalidTimestamp {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                parts.start_time = Some(instant);
            }
            (Leaf::StartTime, Node::Result(result)) => {
                let instant = parse_timestamp(&value).ok_or_else(|| {
                    fail(ParseErrorKind::InvalidTimestamp {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                result.start_time = Some(instant);
            }
            (Leaf::Elapsed, Node::Unit { parts, .. }) => {
                let seconds = value.parse::<f64>().map_err(|_| {
                    fail(ParseErrorKind::InvalidFloat {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                parts.elapsed = Some(seconds);
            }
            (Leaf::Elapsed, Node::Result(result)) => {
                let seconds = value.parse::<f64>().map_err(|_| {
                    fail(ParseErrorKind::InvalidFloat {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                result.elapsed = seconds;
            }
            (Leaf::Status, Node::Result(result)) => {
                // Unknown status words leave the default in place.
                if let Some(status) = TestResultStatus::from_label(&value) {
                    result.status = status;
                }
            }
            (Leaf::Detail, Node::Result(result)) => result.message = Some(value),
            (Leaf::Failed, Node::Context(context)) => {
                let flag = parse_bool(&value).ok_or_else(|| {
                    fail(ParseErrorKind::InvalidBoolean {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                context.failed = flag;
            }
            (Leaf::NTestCases, Node::Event(builder)) => {
                builder.n_test_cases = value.parse().map_err(|_| {
                    fail(ParseErrorKind::InvalidInteger {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
            }
            (Leaf::NTests, Node::Event(builder)) => {
                builder.n_tests = value.parse().map_err(|_| {
                    fail(ParseErrorKind::InvalidInteger {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
            }
            (Leaf::File, Node::Entry(entry)) => entry.file = Some(value),
            (Leaf::Line, Node::Entry(entry)) => {
                let line = value.parse::<u32>().map_err(|_| {
                    fail(ParseErrorKind::InvalidInteger {
                        element: element.to_owned(),
                        value: value.clone(),
                    })
                })?;
                entry.line = Some(line);
            }
            (Leaf::Info, Node::Entry(entry)) => entry.info = Some(value),
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, builder: EventBuilder) {
        let EventBuilder {
            kind,
            test_suite,
            test_case,
            test_iterator,
            test,
            iterated_test,
            test_data,
            context,
            result,
            backtrace,
            n_test_cases,
            n_tests,
        } = builder;
        match kind {
            EventKind::ReadyTestSuite => {
                self.receiver.ready_test_suite(
                    &test_suite.unwrap_or_default(),
                    n_test_cases,
                    n_tests,
                );
            }
            EventKind::StartTestSuite => {
                self.receiver.start_test_suite(&test_suite.unwrap_or_default());
            }
            EventKind::ReadyTestCase => {
                self.receiver
                    .ready_test_case(&test_case.unwrap_or_default(), n_tests);
            }
            EventKind::StartTestCase => {
                self.receiver.start_test_case(&test_case.unwrap_or_default());
            }
            EventKind::ReadyTestIterator => {
                self.receiver
                    .ready_test_iterator(&test_iterator.unwrap_or_default(), n_tests);
            }
            EventKind::StartTestIterator => {
                self.receiver
                    .start_test_iterator(&test_iterator.unwrap_or_default());
            }
            EventKind::StartIteratedTest => {
                self.receiver.start_iterated_test(
                    &iterated_test.unwrap_or_default(),
                    &context.unwrap_or_default(),
                );
            }
            EventKind::StartTest => {
                self.receiver
                    .start_test(&test.unwrap_or_default(), &context.unwrap_or_default());
            }
            EventKind::PassAssertion => {
                let context = context.unwrap_or_default();
                if let Some(iterated_test) = &iterated_test {
                    self.receiver
                        .pass_assertion(TestRef::IteratedTest(iterated_test), &context);
                } else {
                    let test = test.unwrap_or_default();
                    self.receiver.pass_assertion(TestRef::Test(&test), &context);
                }
            }
            EventKind::TestResult => {
                let mut result = result.unwrap_or_default();
                if result.test.is_none() {
                    result.test = test;
                }
                if result.iterated_test.is_none() {
                    result.iterated_test = iterated_test;
                }
                if result.test_data.is_none() {
                    result.test_data = test_data;
                }
                let context = context.unwrap_or_default();
                self.receiver.test_result(&result, &context);
                self.receiver.result(&result);
            }
            EventKind::TestIteratorResult => {
                let mut result = result.unwrap_or_default();
                if result.test_iterator.is_none() {
                    result.test_iterator = test_iterator;
                }
                self.receiver.test_iterator_result(&result);
                self.receiver.result(&result);
            }
            EventKind::TestCaseResult => {
                let mut result = result.unwrap_or_default();
                if result.test_case.is_none() {
                    result.test_case = test_case;
                }
                self.receiver.test_case_result(&result);
                self.receiver.result(&result);
            }
            EventKind::CompleteIteratedTest => {
                self.receiver.complete_iterated_test(
                    &iterated_test.unwrap_or_default(),
                    &context.unwrap_or_default(),
                );
            }
            EventKind::CompleteTest => {
                self.receiver
                    .complete_test(&test.unwrap_or_default(), context.as_ref());
            }
            EventKind::CompleteTestIterator => {
                self.receiver
                    .complete_test_iterator(&test_iterator.unwrap_or_default());
            }
            EventKind::CompleteTestCase => {
                self.receiver
                    .complete_test_case(&test_case.unwrap_or_default());
            }
            EventKind::CompleteTestSuite => {
                self.receiver
                    .complete_test_suite(&test_suite.unwrap_or_default());
            }
            EventKind::Crashed => self.receiver.crashed(&backtrace),
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(kind, self.line, self.column, self.path_of(None))
    }

    fn error_at(&self, kind: ParseErrorKind, element: &str) -> ParseError {
        ParseError::new(kind, self.line, self.column, self.path_of(Some(element)))
    }

    fn path_of(&self, extra: Option<&str>) -> String {
        let mut path = String::new();
        for element in &self.stack {
            path.push('/');
            path.push_str(&element.name);
        }
        if let Some(extra) = extra {
            path.push('/');
            path.push_str(extra);
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Flags {
        started: bool,
        completed: Option<bool>,
    }

    impl StreamReceiver for Flags {
        fn start_run(&mut self) {
            self.started = true;
        }

        fn complete_run(&mut self, success: bool) {
            self.completed = Some(success);
        }
    }

    #[test]
    fn empty_chunks_are_noops() {
        let mut parser = StreamParser::new(Flags::default());
        parser.parse(b"").unwrap();
        parser.parse(b"<str").unwrap();
        parser.parse(b"").unwrap();
        parser.parse(b"eam>").unwrap();
        assert!(parser.receiver().started);
        assert!(parser.started());
        assert!(!parser.finished());
    }

    #[test]
    fn self_closing_stream_completes_the_run() {
        let mut parser = StreamParser::new(Flags::default());
        parser.parse(b"<stream/>").unwrap();
        assert!(parser.finished());
        assert_eq!(parser.receiver().completed, Some(true));
        // Trailing garbage after the document is ignored.
        parser.parse(b"<whatever>junk").unwrap();
        parser.finish().unwrap();
    }

    #[test]
    fn position_cursor_spans_chunks() {
        let mut parser = StreamParser::new(Flags::default());
        parser.parse(b"<bogus").unwrap();
        let error = parser.parse(b">").unwrap_err();
        assert_eq!(error.line(), 1);
        assert_eq!(error.column(), 8);
        assert_eq!(error.path(), "/bogus");
        assert_eq!(
            *error.kind(),
            ParseErrorKind::UnexpectedRootElement("bogus".to_owned())
        );
    }

    #[test]
    fn newlines_reset_the_column() {
        let mut parser = StreamParser::new(Flags::default());
        let error = parser.parse(b"<stream>\n<oops></mismatch>").unwrap_err();
        assert_eq!(error.line(), 2);
        assert_eq!(error.column(), 18);
    }

    #[test]
    fn declarations_and_comments_are_skipped() {
        let mut parser = StreamParser::new(Flags::default());
        parser
            .parse(b"<?xml version=\"1.0\"?><stream><!-- noise --></stream>")
            .unwrap();
        assert_eq!(parser.receiver().completed, Some(true));
    }

    #[test]
    fn poisoned_parser_stays_poisoned() {
        let mut parser = StreamParser::new(Flags::default());
        assert!(parser.parse(b"<nope>").is_err());
        let error = parser.parse(b"<stream>").unwrap_err();
        assert_eq!(*error.kind(), ParseErrorKind::Poisoned);
        let error = parser.finish().unwrap_err();
        assert_eq!(*error.kind(), ParseErrorKind::Poisoned);
    }

    #[test]
    fn finish_rejects_truncated_documents() {
        let mut parser = StreamParser::new(Flags::default());
        parser.parse(b"<stream><start-test>").unwrap();
        let error = parser.finish().unwrap_err();
        assert_eq!(*error.kind(), ParseErrorKind::IncompleteStream);
        assert_eq!(error.path(), "/stream/start-test");
    }
}
