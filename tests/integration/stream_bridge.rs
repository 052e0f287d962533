//! Stream event bridge tests
//!
//! Streams are registered on a test case's listener and observed through the
//! event handler, the way tests of stream-driven code use the harness.

use crate::common::mock_streams::{EndlessStream, FailingWriter, NeverReadStream, RecordingWriter};
use crate::common::{test_case, test_case_with, CompletionSlot};
use async_testcase::{ByteStream, Direction, EventMask, HarnessConfig, StreamEvent};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const WAIT: Duration = Duration::from_secs(5);

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn read_linked_pair_through_bridge(name: &str, buffer_size: usize, len: usize) {
    let mut case = test_case(name);
    let (reader, mut writer) = case.create_linked_stream_pair(buffer_size);

    let received = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let sink = Arc::clone(&received);
    let end = slot.clone();
    case.on_stream_event(
        EventMask::HAS_BYTES_AVAILABLE | EventMask::END_ENCOUNTERED,
        move |stream, event| match event {
            StreamEvent::HasBytesAvailable => {
                sink.lock().unwrap().extend(stream.read_to_vec());
            }
            StreamEvent::EndEncountered => end.complete(),
            _ => unreachable!("masked out: {}", event),
        },
    );
    let id = case.register_stream(reader).unwrap();

    let data = payload(len);
    let expected = data.clone();
    let listener = Arc::clone(case.listener());
    case.wait_for_async(WAIT, |done| {
        slot.set(done);
        listener
            .spawn_task(async move {
                writer.write_all(&data).await.unwrap();
                writer.shutdown().await.unwrap();
            })
            .unwrap();
    });

    assert!(case.deregister_stream(id));
    assert_eq!(*received.lock().unwrap(), expected);
}

#[test]
fn test_linked_pair_payload_smaller_than_buffer() {
    read_linked_pair_through_bridge("small_payload", 64, 10);
}

#[test]
fn test_linked_pair_payload_larger_than_buffer() {
    read_linked_pair_through_bridge("large_payload", 16, 5_000);
}

#[test]
fn test_input_events_arrive_in_order_on_listener_thread() {
    let mut case = test_case("input_event_order");
    let (reader, mut writer) = case.create_linked_stream_pair(32);

    let events = Arc::new(Mutex::new(Vec::new()));
    let threads = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&events);
    let seen_threads = Arc::clone(&threads);
    let end = slot.clone();
    case.on_stream_event(EventMask::all(), move |stream, event| {
        seen.lock().unwrap().push(event);
        seen_threads.lock().unwrap().push(thread::current().id());
        assert_eq!(stream.direction(), Direction::Input);
        match event {
            StreamEvent::HasBytesAvailable => {
                stream.read_to_vec();
            }
            StreamEvent::EndEncountered => end.complete(),
            _ => {}
        }
    });
    let id = case.register_stream(reader).unwrap();

    let listener = Arc::clone(case.listener());
    case.wait_for_async(WAIT, |done| {
        slot.set(done);
        listener
            .spawn_task(async move {
                writer.write_all(b"abc").await.unwrap();
                drop(writer);
            })
            .unwrap();
    });
    case.deregister_stream(id);

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&StreamEvent::OpenCompleted));
    assert_eq!(events.last(), Some(&StreamEvent::EndEncountered));
    assert!(events.contains(&StreamEvent::HasBytesAvailable));
    assert!(!events.contains(&StreamEvent::ErrorOccurred));

    let listener_thread = case.listener().thread_id();
    assert!(threads.lock().unwrap().iter().all(|id| *id == listener_thread));
}

#[test]
fn test_masked_handler_receives_each_event_separately() {
    let mut case = test_case("masked_multi_event");
    let (reader, writer) = case.create_linked_stream_pair(8);

    let events = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&events);
    let end = slot.clone();
    case.on_stream_event(
        EventMask::OPEN_COMPLETED | EventMask::END_ENCOUNTERED,
        move |_stream, event| {
            seen.lock().unwrap().push(event);
            if event == StreamEvent::EndEncountered {
                end.complete();
            }
        },
    );

    // No bytes ever written: the reader sees end of stream right after open
    drop(writer);
    let id = case.register_stream(reader).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));
    case.deregister_stream(id);

    assert_eq!(
        *events.lock().unwrap(),
        vec![StreamEvent::OpenCompleted, StreamEvent::EndEncountered]
    );
}

#[test]
fn test_output_side_writes_reach_linked_reader() {
    let mut case = test_case("output_side");
    let (mut reader, writer) = case.create_linked_stream_pair(64);

    let events = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&events);
    let flushed = slot.clone();
    let mut space_events = 0;
    case.on_stream_event(EventMask::all(), move |stream, event| {
        seen.lock().unwrap().push(event);
        if event == StreamEvent::HasSpaceAvailable {
            space_events += 1;
            if space_events == 1 {
                assert_eq!(stream.write(b"hello from handler"), 18);
            } else {
                flushed.complete();
            }
        }
    });
    let id = case.register_stream(writer).unwrap();

    case.wait_for_async(WAIT, |done| slot.set(done));
    // Deregistering shuts the write side down, ending the reader
    assert!(case.deregister_stream(id));

    let received = tokio_test::block_on(async move {
        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        received
    });
    assert_eq!(received, b"hello from handler");
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            StreamEvent::OpenCompleted,
            StreamEvent::HasSpaceAvailable,
            StreamEvent::HasSpaceAvailable,
        ]
    );
}

#[test]
fn test_deregistration_closes_write_side() {
    let mut case = test_case("close_write_side");
    let recorder = RecordingWriter::new();

    let slot = CompletionSlot::new();
    let opened = slot.clone();
    let mut wrote = false;
    case.on_stream_event(EventMask::HAS_SPACE_AVAILABLE, move |stream, _event| {
        if !wrote {
            stream.write(b"bytes");
            wrote = true;
        } else {
            opened.complete();
        }
    });
    let id = case.register_stream(ByteStream::output(recorder.clone())).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));
    assert!(case.deregister_stream(id));

    let closed = recorder.clone();
    case.wait_for_async(WAIT, |done| {
        thread::spawn(move || {
            while !closed.was_shut_down() {
                thread::sleep(Duration::from_millis(5));
            }
            done.complete();
        });
    });
    assert_eq!(recorder.get_written_data(), b"bytes");
}

#[test]
fn test_output_handle_writes_after_first_space_event() {
    let mut case = test_case("late_output_writes");
    let recorder = RecordingWriter::new();

    let first = CompletionSlot::new();
    let second = CompletionSlot::new();
    let third = CompletionSlot::new();
    let spaces = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&spaces);
    let (on_first, on_second, on_third) = (first.clone(), second.clone(), third.clone());
    case.on_stream_event(EventMask::HAS_SPACE_AVAILABLE, move |_stream, _event| {
        // Never writes from the handler
        match counter.fetch_add(1, Ordering::SeqCst) + 1 {
            1 => on_first.complete(),
            2 => on_second.complete(),
            3 => on_third.complete(),
            _ => {}
        }
    });
    let id = case.register_stream(ByteStream::output(recorder.clone())).unwrap();
    let handle = case.output_handle(id).expect("write side has a handle");

    case.wait_for_async(WAIT, |done| first.set(done));
    assert!(recorder.get_written_data().is_empty());

    case.wait_for_async(WAIT, |done| {
        second.set(done);
        assert!(handle.write(b"late "));
    });
    assert_eq!(recorder.get_written_data(), b"late ");

    // A handle moved to another thread works the same way
    let remote = handle.clone();
    case.wait_for_async(WAIT, |done| {
        third.set(done);
        thread::spawn(move || assert!(remote.write(b"bytes")));
    });
    assert_eq!(recorder.get_written_data(), b"late bytes");
    assert_eq!(spaces.load(Ordering::SeqCst), 3);

    assert!(case.deregister_stream(id));
    let closed = handle.clone();
    case.wait_for_async(WAIT, |done| {
        thread::spawn(move || {
            while !closed.is_closed() {
                thread::sleep(Duration::from_millis(5));
            }
            done.complete();
        });
    });
    assert!(!handle.write(b"too late"));
    assert_eq!(recorder.get_written_data(), b"late bytes");
}

#[test]
fn test_output_handle_writes_reach_linked_reader() {
    let mut case = test_case("output_handle_pipe");
    let (mut reader, writer) = case.create_linked_stream_pair(64);
    let slot = CompletionSlot::new();

    let flushed = slot.clone();
    let mut spaces = 0;
    case.on_stream_event(EventMask::HAS_SPACE_AVAILABLE, move |_stream, _event| {
        spaces += 1;
        if spaces == 2 {
            flushed.complete();
        }
    });
    let id = case.register_stream(writer).unwrap();
    let handle = case.output_handle(id).unwrap();

    case.wait_for_async(WAIT, |done| {
        slot.set(done);
        handle.write(b"queued from the test");
    });
    assert!(case.deregister_stream(id));

    let received = tokio_test::block_on(async move {
        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        received
    });
    assert_eq!(received, b"queued from the test");
}

#[test]
fn test_broken_pipe_surfaces_as_error_event() {
    let mut case = test_case("broken_pipe");
    let (reader, writer) = case.create_linked_stream_pair(16);
    drop(reader);

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&kinds);
    let failed = slot.clone();
    case.on_stream_event(
        EventMask::HAS_SPACE_AVAILABLE | EventMask::ERROR_OCCURRED,
        move |stream, event| match event {
            StreamEvent::HasSpaceAvailable => {
                stream.write(b"nobody is listening");
            }
            StreamEvent::ErrorOccurred => {
                seen.lock().unwrap().push(stream.error().map(|e| e.kind()));
                assert_eq!(stream.space_available(), 0);
                failed.complete();
            }
            _ => {}
        },
    );
    let id = case.register_stream(writer).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));

    // No retry and no automatic teardown
    assert!(case.is_registered(id));
    assert!(case.deregister_stream(id));
    assert_eq!(*kinds.lock().unwrap(), vec![Some(io::ErrorKind::BrokenPipe)]);
}

#[test]
fn test_failing_writer_reports_error_kind() {
    let mut case = test_case("failing_writer");
    let slot = CompletionSlot::new();
    let kind = Arc::new(Mutex::new(None));

    let seen = Arc::clone(&kind);
    let failed = slot.clone();
    case.on_stream_event(
        EventMask::HAS_SPACE_AVAILABLE | EventMask::ERROR_OCCURRED,
        move |stream, event| {
            if event == StreamEvent::HasSpaceAvailable {
                stream.write(b"x");
            } else {
                *seen.lock().unwrap() = stream.error().map(|e| e.kind());
                failed.complete();
            }
        },
    );
    let id = case
        .register_stream(ByteStream::output(FailingWriter::new(
            io::ErrorKind::ConnectionAborted,
        )))
        .unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));
    case.deregister_stream(id);

    assert_eq!(*kind.lock().unwrap(), Some(io::ErrorKind::ConnectionAborted));
}

#[test]
fn test_no_events_after_deregistration() {
    let mut case = test_case("no_events_after_deregistration");
    let stream = EndlessStream::new(b"tick", Duration::from_millis(5));

    let deliveries = Arc::new(AtomicUsize::new(0));
    let slot = CompletionSlot::new();

    let counter = Arc::clone(&deliveries);
    let enough = slot.clone();
    case.on_stream_event(EventMask::HAS_BYTES_AVAILABLE, move |stream, _event| {
        stream.read_to_vec();
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            enough.complete();
        }
    });
    let id = case.register_stream(ByteStream::input(stream)).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));

    assert!(case.deregister_stream(id));
    let after_deregistration = deliveries.load(Ordering::SeqCst);

    case.run_main_loop_for(Duration::from_millis(100));
    assert_eq!(deliveries.load(Ordering::SeqCst), after_deregistration);
}

#[test]
fn test_cleared_handler_receives_nothing_more() {
    let mut case = test_case("cleared_handler");
    let stream = EndlessStream::new(b"tick", Duration::from_millis(5));

    let deliveries = Arc::new(AtomicUsize::new(0));
    let slot = CompletionSlot::new();

    let counter = Arc::clone(&deliveries);
    let enough = slot.clone();
    case.on_stream_event(EventMask::HAS_BYTES_AVAILABLE, move |stream, _event| {
        stream.read_to_vec();
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            enough.complete();
        }
    });
    let id = case.register_stream(ByteStream::input(stream)).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));

    case.clear_stream_handler();
    let after_clear = deliveries.load(Ordering::SeqCst);
    case.run_main_loop_for(Duration::from_millis(100));

    assert_eq!(deliveries.load(Ordering::SeqCst), after_clear);
    assert!(case.is_registered(id));
    assert!(case.deregister_stream(id));
}

#[test]
fn test_single_byte_reads_drain_payload_before_end() {
    let mut case = test_case("single_byte_reads");
    let (reader, mut writer) = case.create_linked_stream_pair(16);

    let received = Arc::new(Mutex::new(Vec::new()));
    let byte_events = Arc::new(AtomicUsize::new(0));
    let slot = CompletionSlot::new();

    let sink = Arc::clone(&received);
    let counter = Arc::clone(&byte_events);
    let end = slot.clone();
    case.on_stream_event(
        EventMask::HAS_BYTES_AVAILABLE | EventMask::END_ENCOUNTERED,
        move |stream, event| match event {
            StreamEvent::HasBytesAvailable => {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut byte = [0u8; 1];
                if stream.read(&mut byte) == 1 {
                    sink.lock().unwrap().push(byte[0]);
                }
            }
            StreamEvent::EndEncountered => {
                assert_eq!(stream.bytes_available(), 0);
                end.complete();
            }
            _ => unreachable!("masked out: {}", event),
        },
    );
    let id = case.register_stream(reader).unwrap();

    let data = payload(40);
    let expected = data.clone();
    let listener = Arc::clone(case.listener());
    case.wait_for_async(WAIT, |done| {
        slot.set(done);
        listener
            .spawn_task(async move {
                writer.write_all(&data).await.unwrap();
                writer.shutdown().await.unwrap();
            })
            .unwrap();
    });
    case.deregister_stream(id);

    assert_eq!(*received.lock().unwrap(), expected);
    assert!(byte_events.load(Ordering::SeqCst) >= expected.len());
}

#[test]
fn test_unread_bytes_pause_reading_at_buffer_size() {
    let config = HarnessConfig {
        transfer_buffer_size: 16,
        ..HarnessConfig::default()
    };
    let mut case = test_case_with("full_inbound_buffer", config);
    let stream = EndlessStream::new(b"four", Duration::from_millis(2));
    let produced = stream.produced();

    let byte_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&byte_events);
    case.on_stream_event(EventMask::HAS_BYTES_AVAILABLE, move |_stream, _event| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let id = case.register_stream(ByteStream::input(stream)).unwrap();

    let filling = Arc::clone(&produced);
    case.wait_for_async(WAIT, |done| {
        thread::spawn(move || {
            while filling.load(Ordering::SeqCst) < 16 {
                thread::sleep(Duration::from_millis(2));
            }
            done.complete();
        });
    });

    // Nothing is read, so the producer is never polled again
    thread::sleep(Duration::from_millis(100));
    assert_eq!(produced.load(Ordering::SeqCst), 16);
    assert_eq!(byte_events.load(Ordering::SeqCst), 4);
    assert!(case.deregister_stream(id));
}

#[test]
fn test_end_withheld_while_bytes_unread() {
    let mut case = test_case("end_withheld");
    let (reader, mut writer) = case.create_linked_stream_pair(32);

    let events = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&events);
    let arrived = slot.clone();
    case.on_stream_event(EventMask::all(), move |stream, event| {
        seen.lock().unwrap().push(event);
        if event == StreamEvent::HasBytesAvailable && stream.bytes_available() == 3 {
            arrived.complete();
        }
    });
    let id = case.register_stream(reader).unwrap();

    let listener = Arc::clone(case.listener());
    case.wait_for_async(WAIT, |done| {
        slot.set(done);
        listener
            .spawn_task(async move {
                writer.write_all(b"abc").await.unwrap();
                writer.shutdown().await.unwrap();
            })
            .unwrap();
    });

    case.run_main_loop_for(Duration::from_millis(100));
    case.deregister_stream(id);

    let events = events.lock().unwrap();
    assert!(events.contains(&StreamEvent::HasBytesAvailable));
    assert!(!events.contains(&StreamEvent::EndEncountered), "{:?}", events);
}

#[test]
fn test_stream_without_data_only_opens() {
    let mut case = test_case("never_read");
    let events = Arc::new(Mutex::new(Vec::new()));
    let slot = CompletionSlot::new();

    let seen = Arc::clone(&events);
    let opened = slot.clone();
    case.on_stream_event(EventMask::all(), move |_stream, event| {
        seen.lock().unwrap().push(event);
        opened.complete();
    });
    let id = case.register_stream(ByteStream::input(NeverReadStream)).unwrap();
    case.wait_for_async(WAIT, |done| slot.set(done));

    case.run_main_loop_for(Duration::from_millis(50));
    case.deregister_stream(id);
    assert_eq!(*events.lock().unwrap(), vec![StreamEvent::OpenCompleted]);
}

#[test]
fn test_dropping_case_closes_leftover_registrations() {
    let mut case = test_case("leftover_registration");
    let listener = Arc::clone(case.listener());
    let stream = EndlessStream::new(b"data", Duration::from_millis(5));
    let produced = stream.produced();

    case.on_stream_event(EventMask::HAS_BYTES_AVAILABLE, |stream, _event| {
        stream.read_to_vec();
    });
    let id = case.register_stream(ByteStream::input(stream)).unwrap();
    assert!(case.is_registered(id));

    // Let the stream produce for a while, then drop without deregistering
    thread::sleep(Duration::from_millis(50));
    drop(case);
    thread::sleep(Duration::from_millis(50));

    let settled = produced.load(Ordering::SeqCst);
    assert!(settled > 0);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(produced.load(Ordering::SeqCst), settled);
    assert!(listener.is_running());
}
