//! Producer/consumer behavior of the bounded channel

use std::future::Future;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use fair_sync::{BoundedChannel, CancelToken, SendError};
use futures::task::noop_waker;
use rstest::rstest;

#[rstest]
#[case(1)]
#[case(3)]
#[case(16)]
fn blocking_roundtrip_preserves_order(#[case] capacity: usize) {
    let chan = BoundedChannel::new(capacity).unwrap();
    let producer = {
        let chan = chan.clone();
        thread::spawn(move || {
            for i in 0..100u32 {
                chan.blocking_send(i).unwrap();
            }
            chan.complete();
        })
    };

    let mut received = Vec::new();
    while let Some(value) = chan.blocking_recv().unwrap() {
        received.push(value);
    }
    assert_eq!(received, (0..100).collect::<Vec<_>>());
    producer.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_roundtrip_preserves_order() {
    let chan = BoundedChannel::new(4).unwrap();
    let cancel = CancelToken::new();

    let producer = {
        let chan = chan.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for i in 0..200u32 {
                chan.send(i, &cancel).await.unwrap();
            }
            chan.complete();
        })
    };

    let mut received = Vec::new();
    while let Some(value) = chan.recv(&cancel).await.unwrap() {
        received.push(value);
    }
    assert_eq!(received, (0..200).collect::<Vec<_>>());
    producer.await.unwrap();
}

#[test]
fn mpmc_delivers_every_value_exactly_once() {
    let chan = BoundedChannel::new(4).unwrap();

    let producers: Vec<_> = (0..3u32)
        .map(|p| {
            let chan = chan.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    chan.blocking_send(p * 1000 + i).unwrap();
                }
            })
        })
        .collect();
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let chan = chan.clone();
            thread::spawn(move || {
                let mut received = Vec::new();
                while let Some(value) = chan.blocking_recv().unwrap() {
                    received.push(value);
                }
                received
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    chan.complete();

    let mut all: Vec<u32> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort_unstable();
    let mut expected: Vec<u32> = (0..3u32)
        .flat_map(|p| (0..50).map(move |i| p * 1000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(all, expected);
}

/// Backpressure at `capacity = 1`, asserted by poll state rather than sleeps:
/// the second send stays pending until a receive frees the slot.
#[test]
fn second_send_suspends_until_a_receive() {
    let chan = BoundedChannel::new(1).unwrap();
    let cancel = CancelToken::new();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    chan.try_send(1).unwrap();
    let mut second = Box::pin(chan.send(2, &cancel));
    assert!(second.as_mut().poll(&mut cx).is_pending());
    assert!(second.as_mut().poll(&mut cx).is_pending());

    assert_eq!(chan.try_recv().unwrap(), Some(1));
    assert!(matches!(second.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
    assert_eq!(chan.try_recv().unwrap(), Some(2));
}

/// Scenario: capacity 3; three sends succeed immediately, the fourth blocks,
/// a receive unblocks it, and the drain order is 1, 2, 3, 4 followed by
/// end-of-stream after completion.
#[test]
fn capacity_three_backpressure_scenario() {
    let chan = BoundedChannel::new(3).unwrap();
    let cancel = CancelToken::new();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    chan.try_send(1).unwrap();
    chan.try_send(2).unwrap();
    chan.try_send(3).unwrap();

    let mut fourth = Box::pin(chan.send(4, &cancel));
    assert!(fourth.as_mut().poll(&mut cx).is_pending());

    assert_eq!(chan.try_recv().unwrap(), Some(1));
    assert!(matches!(fourth.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));

    assert_eq!(chan.try_recv().unwrap(), Some(2));
    assert_eq!(chan.try_recv().unwrap(), Some(3));
    assert_eq!(chan.try_recv().unwrap(), Some(4));

    chan.complete();
    assert_eq!(chan.try_recv().unwrap(), None);
}

/// Graceful drain: K values buffered at completion are received in order,
/// then the terminal `None` repeats.
#[test]
fn complete_drains_buffered_values_then_ends() {
    let chan = BoundedChannel::new(8).unwrap();
    for i in 0..5 {
        chan.try_send(i).unwrap();
    }
    chan.complete();

    for i in 0..5 {
        assert_eq!(chan.blocking_recv().unwrap(), Some(i));
    }
    assert_eq!(chan.blocking_recv().unwrap(), None);
    assert_eq!(chan.blocking_recv().unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn complete_releases_consumer_blocked_on_empty_channel() {
    let chan = BoundedChannel::<u32>::new(1).unwrap();
    let cancel = CancelToken::new();

    let consumer = {
        let chan = chan.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { chan.recv(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    chan.complete();
    assert_eq!(consumer.await.unwrap(), Ok(None));
}

/// A producer already parked on a full channel when `complete` fires must be
/// refused once the drain frees its slot, not allowed to sneak a value in.
#[test]
fn parked_sender_is_refused_after_complete() {
    let chan = BoundedChannel::new(1).unwrap();
    let cancel = CancelToken::new();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    chan.try_send(1).unwrap();
    let mut parked = Box::pin(chan.send(2, &cancel));
    assert!(parked.as_mut().poll(&mut cx).is_pending());

    chan.complete();
    assert_eq!(chan.try_recv().unwrap(), Some(1));
    match parked.as_mut().poll(&mut cx) {
        Poll::Ready(Err(SendError::Closed(2))) => {}
        other => panic!("expected refusal with the value back, got {other:?}"),
    }
    assert_eq!(chan.try_recv().unwrap(), None);
}

#[test]
fn cancelled_send_returns_value_without_leaking_the_slot() {
    let chan = BoundedChannel::new(1).unwrap();
    let cancel = CancelToken::new();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    chan.try_send(1).unwrap();
    let mut pending = Box::pin(chan.send(2, &cancel));
    assert!(pending.as_mut().poll(&mut cx).is_pending());

    cancel.cancel();
    match pending.as_mut().poll(&mut cx) {
        Poll::Ready(Err(SendError::Cancelled(2))) => {}
        other => panic!("expected Cancelled with the value back, got {other:?}"),
    }
    drop(pending);

    // capacity is intact for the next producer
    assert_eq!(chan.try_recv().unwrap(), Some(1));
    chan.try_send(3).unwrap();
    assert_eq!(chan.try_recv().unwrap(), Some(3));
}

/// Send-side deadline on a full channel: expiry behaves as a cancellation,
/// hands the value back, and leaves the slot queue clean for later senders.
#[test]
fn blocking_send_timeout_expires_as_cancellation() {
    let chan = BoundedChannel::new(1).unwrap();
    chan.try_send(1).unwrap();

    let start = Instant::now();
    let err = chan
        .blocking_send_timeout(2, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, SendError::Cancelled(2));
    assert!(start.elapsed() >= Duration::from_millis(50));

    // the expired waiter was withdrawn; capacity is intact once drained
    assert_eq!(chan.try_recv().unwrap(), Some(1));
    chan.blocking_send_timeout(3, Duration::from_millis(50)).unwrap();
    assert_eq!(chan.try_recv().unwrap(), Some(3));
}

#[test]
fn abort_unblocks_parked_sender() {
    let chan = BoundedChannel::new(1).unwrap();
    chan.try_send(1).unwrap();

    let sender = {
        let chan = chan.clone();
        thread::spawn(move || chan.blocking_send(2))
    };
    thread::sleep(Duration::from_millis(50));

    chan.abort();
    match sender.join().unwrap() {
        Err(SendError::Closed(2)) => {}
        other => panic!("expected Closed with the value back, got {other:?}"),
    }
}
