//! Serial transport locking and inbound queue behavior

use std::sync::Arc;
use std::time::Duration as StdDuration;

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_time::Duration;
use tnc_core::hal::mock::MockSerialSink;
use tnc_core::*;

use crate::YieldingSink;

type TestTransport = SerialTransport<NoopRawMutex, YieldingSink, u8, 8>;

fn open_transport() -> (TestTransport, YieldingSink) {
    let sink = YieldingSink::new();
    let transport = TestTransport::new(sink.clone());
    transport.open();
    (transport, sink)
}

#[tokio::test]
async fn test_writes_require_open_transport() {
    let sink = YieldingSink::new();
    let transport = TestTransport::new(sink.clone());

    assert!(!transport.is_open());
    assert_eq!(transport.write(b"early", None).await, Err(TransportError::NotOpen));

    transport.open();
    transport.open();
    assert!(transport.is_open());
    assert_eq!(transport.write(b"ok", None).await, Ok(()));

    transport.close();
    assert!(!transport.is_open());
    assert_eq!(transport.write(b"late", None).await, Err(TransportError::NotOpen));
    assert_eq!(sink.bytes(), b"ok".to_vec());
}

#[tokio::test]
async fn test_zero_timeout_fails_immediately_while_locked() {
    let (transport, sink) = open_transport();

    let guard = transport.acquire(None).await.unwrap();
    let result = transport.write(b"blocked", Some(Duration::from_ticks(0))).await;
    assert_eq!(result, Err(TransportError::AcquisitionTimeout));
    drop(guard);

    assert!(sink.bytes().is_empty());
    assert!(sink.records().is_empty());

    // Released lock is immediately available again
    assert_eq!(transport.write(b"free", Some(Duration::from_ticks(0))).await, Ok(()));
}

#[tokio::test]
async fn test_bounded_wait_times_out() {
    let (transport, sink) = open_transport();

    let _guard = transport.acquire(None).await.unwrap();
    let started = std::time::Instant::now();
    let result = transport.write(b"late", Some(Duration::from_millis(30))).await;

    assert_eq!(result, Err(TransportError::AcquisitionTimeout));
    assert!(started.elapsed() >= StdDuration::from_millis(25));
    assert!(sink.bytes().is_empty());
}

#[tokio::test]
async fn test_bounded_wait_succeeds_once_released() {
    let (transport, sink) = open_transport();

    let holder = async {
        let mut guard = transport.acquire(None).await.unwrap();
        guard.send(None, b"first").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        guard.send(None, b"-cont").await.unwrap();
    };
    let waiter = async {
        tokio::task::yield_now().await;
        transport.write(b"second", Some(Duration::from_millis(500))).await
    };

    let ((), result) = tokio::join!(holder, waiter);
    assert_eq!(result, Ok(()));
    assert_eq!(sink.bytes(), b"first-contsecond".to_vec());
}

#[tokio::test]
async fn test_concurrent_writers_never_interleave() {
    let (transport, sink) = open_transport();
    let payloads: [[u8; 16]; 3] = [[0xA1; 16], [0xB2; 16], [0xC3; 16]];

    let (a, b, c) = tokio::join!(
        transport.write(&payloads[0], None),
        transport.write_typed(0x00, &payloads[1], None),
        transport.write(&payloads[2], Some(Duration::from_secs(1))),
    );
    assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));

    let bytes = sink.bytes();
    assert_eq!(bytes.len(), 48);
    let mut seen: Vec<u8> = bytes
        .chunks(16)
        .map(|chunk| {
            assert!(chunk.iter().all(|b| *b == chunk[0]), "interleaved: {:02x?}", bytes);
            chunk[0]
        })
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0xA1, 0xB2, 0xC3]);

    let typed: Vec<_> = sink.records().into_iter().filter(|(t, _)| t.is_some()).collect();
    assert_eq!(typed, vec![(Some(0x00), payloads[1].to_vec())]);
}

#[tokio::test]
async fn test_held_guard_stops_sending_after_close() {
    let (transport, sink) = open_transport();

    let mut guard = transport.acquire(None).await.unwrap();
    guard.send(None, b"before").await.unwrap();
    transport.close();

    assert_eq!(guard.send(None, b"after-close").await, Err(TransportError::NotOpen));
    assert_eq!(guard.send(Some(0x00), b"typed").await, Err(TransportError::NotOpen));
    drop(guard);
    assert_eq!(sink.bytes(), b"before".to_vec());
}

#[tokio::test]
async fn test_writer_waiting_on_lock_sees_close() {
    let (transport, sink) = open_transport();

    let holder = async {
        let guard = transport.acquire(None).await.unwrap();
        // Let the writer park on the lock
        tokio::task::yield_now().await;
        transport.close();
        drop(guard);
    };
    let writer = transport.write(b"stale", None);

    let ((), result) = tokio::join!(holder, writer);
    assert_eq!(result, Err(TransportError::NotOpen));
    assert!(sink.bytes().is_empty());
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_frame_ownership_and_size() {
    let (transport, sink) = open_transport();

    let mut frame = SerialFrame::<8>::new(0x06);
    for byte in b"param" {
        frame.push(*byte).unwrap();
    }
    assert_eq!(frame.len(), 5);
    transport.write_frame(frame, None).await.unwrap();
    assert_eq!(sink.records(), vec![(Some(0x06), b"param".to_vec())]);

    assert_eq!(
        SerialFrame::<4>::from_slice(0x00, b"toolong").unwrap_err(),
        TransportError::FrameTooLarge
    );
    let mut full = SerialFrame::<2>::from_slice(0x00, b"ab").unwrap();
    assert_eq!(full.push(b'c'), Err(TransportError::FrameTooLarge));
}

#[tokio::test]
async fn test_sink_failure_releases_lock() {
    let transport: SerialTransport<NoopRawMutex, MockSerialSink, u8, 4> =
        SerialTransport::new(MockSerialSink::failing());
    transport.open();

    assert_eq!(
        transport.write(b"x", None).await,
        Err(TransportError::Io(HalError::Io))
    );
    assert!(transport.acquire(Some(Duration::from_ticks(0))).await.is_ok());
}

#[tokio::test]
async fn test_guard_sends_multiple_payloads_atomically() {
    let transport: SerialTransport<NoopRawMutex, MockSerialSink, u8, 4> =
        SerialTransport::new(MockSerialSink::new());
    transport.open();

    let mut guard = transport.acquire(Some(Duration::from_millis(10))).await.unwrap();
    guard.send(Some(0x00), b"head").await.unwrap();
    guard.send(None, b"tail").await.unwrap();
    assert_eq!(guard.sink().frame_count(), 2);
    assert_eq!(guard.sink().frames()[0].0, Some(0x00));
}

#[tokio::test]
async fn test_rx_fifo_order() {
    let (transport, _sink) = open_transport();
    let producer = transport.producer();

    for byte in 0..8u8 {
        assert!(producer.push(byte));
    }

    let queue = transport.queue();
    assert_eq!(queue.capacity(), 8);
    for expected in 0..8u8 {
        assert_eq!(queue.receive(Some(Duration::from_millis(100))).await, Some(expected));
    }
    assert_eq!(queue.try_receive(), None);
}

#[tokio::test]
async fn test_rx_overflow_drops_without_blocking() {
    let (transport, _sink) = open_transport();

    let accepted: Vec<bool> = (0..10u8).map(|b| transport.enqueue_from_isr(b)).collect();
    assert_eq!(&accepted[..8], &[true; 8]);
    assert_eq!(&accepted[8..], &[false, false]);
    assert_eq!(transport.overflow_count(), 2);

    let queue = transport.queue();
    let drained: Vec<u8> = std::iter::from_fn(|| queue.try_receive()).collect();
    assert_eq!(drained, (0..8).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_rx_receive_times_out_on_empty_queue() {
    let (transport, _sink) = open_transport();

    let started = std::time::Instant::now();
    assert_eq!(transport.queue().receive(Some(Duration::from_millis(20))).await, None);
    assert!(started.elapsed() >= StdDuration::from_millis(15));
}

#[tokio::test]
async fn test_close_discards_pending_input() {
    let (transport, _sink) = open_transport();

    transport.enqueue_from_isr(1);
    transport.enqueue_from_isr(2);
    for b in 0..10 {
        transport.enqueue_from_isr(b);
    }
    assert!(transport.overflow_count() > 0);

    transport.close();
    assert_eq!(transport.queue().try_receive(), None);
    assert!(!transport.enqueue_from_isr(3));

    transport.open();
    assert_eq!(transport.overflow_count(), 0);
    assert!(transport.enqueue_from_isr(4));
    assert_eq!(transport.queue().try_receive(), Some(4));
}

#[tokio::test]
async fn test_producer_thread_feeds_consumer_task() {
    let transport: Arc<SerialTransport<CriticalSectionRawMutex, MockSerialSink, u8, 16>> =
        Arc::new(SerialTransport::new(MockSerialSink::new()));
    transport.open();

    let isr = {
        let transport = Arc::clone(&transport);
        std::thread::spawn(move || {
            for byte in 0..64u8 {
                // Busy producer: retry instead of blocking inside push
                while !transport.enqueue_from_isr(byte) {
                    std::thread::yield_now();
                }
            }
        })
    };

    let queue = transport.queue();
    let mut received = Vec::new();
    while received.len() < 64 {
        match queue.receive(Some(Duration::from_secs(2))).await {
            Some(byte) => received.push(byte),
            None => panic!("producer stalled after {} bytes", received.len()),
        }
    }
    isr.join().unwrap();

    assert_eq!(received, (0..64).collect::<Vec<u8>>());
}

#[test]
fn test_zero_timeout_never_suspends() {
    let (transport, _sink) = open_transport();
    let guard = tokio_test::block_on(transport.acquire(None)).unwrap();

    let mut attempt = tokio_test::task::spawn(transport.acquire(Some(Duration::from_ticks(0))));
    let result = tokio_test::assert_ready!(attempt.poll());
    assert!(matches!(result, Err(TransportError::AcquisitionTimeout)));

    drop(attempt);
    drop(guard);
    let mut retry = tokio_test::task::spawn(transport.acquire(Some(Duration::from_ticks(0))));
    assert!(tokio_test::assert_ready!(retry.poll()).is_ok());
}
