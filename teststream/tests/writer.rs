// Copyright (c) The teststream Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the stream writer: fragment emission, sink failures,
//! locking, and round-tripping through the parser.

mod helpers;

use chrono::{DateTime, TimeZone, Utc};
use helpers::Recorder;
use pretty_assertions::assert_eq;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use teststream::{
    BacktraceEntry, StreamParser, StreamReceiver, StreamWriter, Test, TestCase, TestContext,
    TestRef, TestResult, TestResultStatus, TestSuite,
};

fn capture() -> (Arc<Mutex<Vec<String>>>, StreamWriter) {
    let fragments = Arc::new(Mutex::new(Vec::new()));
    let sink_fragments = Arc::clone(&fragments);
    let writer = StreamWriter::new(move |fragment: &str| {
        sink_fragments.lock().unwrap().push(fragment.to_owned());
        Ok(())
    });
    (fragments, writer)
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().expect("valid timestamp")
}

fn suite() -> TestSuite {
    let mut test_suite = TestSuite::new();
    test_suite.set_name("integration").set_start_time(epoch());
    test_suite
}

fn case() -> TestCase {
    let mut test_case = TestCase::new();
    test_case.set_name("test-add");
    test_case
}

fn test() -> Test {
    let mut test = Test::new();
    test.set_name("test_add_small").add_option("bug", "1234");
    test
}

fn context() -> TestContext {
    let mut context = TestContext::new();
    context.set_test_case(case()).set_test(test());
    context
}

#[test]
fn start_run_opens_the_document() {
    let (fragments, writer) = capture();
    writer.start_run();
    assert_eq!(fragments.lock().unwrap().as_slice(), ["<stream>\n"]);
}

#[test]
fn complete_run_records_the_outcome_and_closes() {
    let (fragments, writer) = capture();
    writer.complete_run(false);
    assert_eq!(
        fragments.lock().unwrap().as_slice(),
        ["  <success>false</success>\n</stream>\n"]
    );
}

#[test]
fn ready_test_suite_serializes_one_fragment() {
    let (fragments, writer) = capture();
    writer.ready_test_suite(&suite(), 3, 7);
    let expected = concat!(
        "  <ready-test-suite>\n",
        "    <test-suite>\n",
        "      <name>integration</name>\n",
        "      <start-time>1970-01-01T00:00:00Z</start-time>\n",
        "    </test-suite>\n",
        "    <n-test-cases>3</n-test-cases>\n",
        "    <n-tests>7</n-tests>\n",
        "  </ready-test-suite>\n",
    );
    assert_eq!(fragments.lock().unwrap().as_slice(), [expected]);
}

#[test]
fn start_test_serializes_subject_and_context() {
    let (fragments, writer) = capture();
    writer.start_test(&test(), &context());
    let expected = concat!(
        "  <start-test>\n",
        "    <test>\n",
        "      <name>test_add_small</name>\n",
        "      <option>\n",
        "        <name>bug</name>\n",
        "        <value>1234</value>\n",
        "      </option>\n",
        "    </test>\n",
        "    <test-context>\n",
        "      <test-case>\n",
        "        <name>test-add</name>\n",
        "      </test-case>\n",
        "      <test>\n",
        "        <name>test_add_small</name>\n",
        "        <option>\n",
        "          <name>bug</name>\n",
        "          <value>1234</value>\n",
        "        </option>\n",
        "      </test>\n",
        "      <failed>false</failed>\n",
        "    </test-context>\n",
        "  </start-test>\n",
    );
    assert_eq!(fragments.lock().unwrap().as_slice(), [expected]);
}

#[test]
fn test_result_escapes_detail_text() {
    let mut entry = BacktraceEntry::new("test_add_many");
    entry.set_file("test-add.c").set_line(28);
    let mut result = TestResult::new(TestResultStatus::Failure);
    result
        .set_message("expected <3>")
        .add_backtrace_entry(entry)
        .set_elapsed(0.003);
    let mut subject = Test::new();
    subject.set_name("test_add_small");
    result.set_test(subject.clone());

    let mut context = TestContext::new();
    context.set_test(subject);

    let (fragments, writer) = capture();
    writer.test_result(&result, &context);
    let expected = concat!(
        "  <test-result>\n",
        "    <test>\n",
        "      <name>test_add_small</name>\n",
        "    </test>\n",
        "    <test-context>\n",
        "      <test>\n",
        "        <name>test_add_small</name>\n",
        "      </test>\n",
        "      <failed>false</failed>\n",
        "    </test-context>\n",
        "    <result>\n",
        "      <status>failure</status>\n",
        "      <detail>expected &lt;3&gt;</detail>\n",
        "      <backtrace>\n",
        "        <entry>\n",
        "          <file>test-add.c</file>\n",
        "          <line>28</line>\n",
        "          <info>test_add_many()</info>\n",
        "        </entry>\n",
        "      </backtrace>\n",
        "      <elapsed>0.003000</elapsed>\n",
        "    </result>\n",
        "  </test-result>\n",
    );
    assert_eq!(fragments.lock().unwrap().as_slice(), [expected]);
}

#[test]
fn sink_failure_is_not_fatal() {
    let fragments = Arc::new(Mutex::new(Vec::new()));
    let sink_fragments = Arc::clone(&fragments);
    let mut calls = 0;
    let writer = StreamWriter::new(move |fragment: &str| {
        calls += 1;
        if calls == 2 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        sink_fragments.lock().unwrap().push(fragment.to_owned());
        Ok(())
    });

    writer.start_run();
    writer.start_test_suite(&suite());
    writer.complete_run(true);

    // The second fragment was lost; emission continued regardless.
    assert_eq!(
        fragments.lock().unwrap().as_slice(),
        ["<stream>\n", "  <success>true</success>\n</stream>\n"]
    );
}

#[test]
fn concurrent_emission_never_interleaves_fragments() {
    let (fragments, writer) = capture();
    let writer = Arc::new(writer);

    let case_fragment = {
        let (probe_fragments, probe) = capture();
        probe.complete_test_case(&case());
        let fragment = probe_fragments.lock().unwrap()[0].clone();
        fragment
    };
    let suite_fragment = {
        let (probe_fragments, probe) = capture();
        probe.complete_test_suite(&suite());
        let fragment = probe_fragments.lock().unwrap()[0].clone();
        fragment
    };

    let mut threads = Vec::new();
    for spawned in 0..2 {
        let writer = Arc::clone(&writer);
        threads.push(thread::spawn(move || {
            for _ in 0..50 {
                if spawned == 0 {
                    writer.complete_test_case(&case());
                } else {
                    writer.complete_test_suite(&suite());
                }
            }
        }));
    }
    for thread in threads {
        thread.join().expect("thread completes");
    }

    let fragments = fragments.lock().unwrap();
    assert_eq!(fragments.len(), 100);
    for fragment in fragments.iter() {
        assert!(
            fragment == &case_fragment || fragment == &suite_fragment,
            "interleaved fragment: {fragment:?}"
        );
    }
}

fn drive(receiver: &mut impl StreamReceiver) {
    let suite = suite();
    let case = case();
    let test = test();
    let context = context();

    receiver.start_run();
    receiver.ready_test_suite(&suite, 1, 1);
    receiver.start_test_suite(&suite);
    receiver.ready_test_case(&case, 1);
    receiver.start_test_case(&case);
    receiver.start_test(&test, &context);
    receiver.pass_assertion(TestRef::Test(&test), &context);

    let mut entry = BacktraceEntry::new("test_add_small");
    entry.set_file("test-add.c").set_line(12);
    let mut result = TestResult::new(TestResultStatus::Failure);
    result
        .set_message("1 < 2 & \"qq\"")
        .add_backtrace_entry(entry)
        .set_start_time(epoch())
        .set_elapsed(0.25)
        .set_test(test.clone());
    receiver.test_result(&result, &context);
    receiver.result(&result);
    receiver.complete_test(&test, Some(&context));

    let mut case_result = TestResult::new(TestResultStatus::Failure);
    case_result.set_elapsed(1.5).set_test_case(case.clone());
    receiver.test_case_result(&case_result);
    receiver.result(&case_result);
    receiver.complete_test_case(&case);
    receiver.complete_test_suite(&suite);
    receiver.complete_run(false);
}

#[test]
fn written_stream_round_trips_through_the_parser() {
    let (fragments, mut writer) = capture();
    drive(&mut writer);
    let document: String = fragments.lock().unwrap().concat();

    let mut parser = StreamParser::new(Recorder::default());
    parser.parse(document.as_bytes()).expect("stream parses");
    parser.finish().expect("stream completed");

    let mut expected = Recorder::default();
    drive(&mut expected);
    assert_eq!(parser.into_receiver().events, expected.events);
}
