//! Integration test for the exclusive-write/shared-read component protocol
//! under real thread contention.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use cadence_ecs::{Component, ComponentData, ComponentHandle, Entity, OwnerToken};

#[derive(Clone, Default, Debug, PartialEq)]
struct Value(i64);

impl ComponentData for Value {}

/// Two fields that every writer keeps equal.
#[derive(Clone, Default, Debug)]
struct Pair {
    left: u64,
    right: u64,
}

impl ComponentData for Pair {}

#[test]
fn test_reader_waits_for_writer_close() {
    let x = Component::new(Value(0));
    let opened = Arc::new(Barrier::new(2));

    let writer = {
        let x = Arc::clone(&x);
        let opened = Arc::clone(&opened);
        thread::spawn(move || {
            let token = OwnerToken::new();
            let mut value = x.open_write(token);
            opened.wait();
            value.0 = 5;
            thread::sleep(Duration::from_millis(10));
            let closed_at = Instant::now();
            assert!(x.close_write(token, value).unwrap());
            closed_at
        })
    };

    let reader = {
        let x = Arc::clone(&x);
        let opened = Arc::clone(&opened);
        thread::spawn(move || {
            opened.wait();
            let value = x.read(OwnerToken::new());
            (value, Instant::now())
        })
    };

    let closed_at = writer.join().unwrap();
    let (value, read_at) = reader.join().unwrap();
    assert_eq!(value, Value(5));
    assert!(read_at >= closed_at);
}

#[test]
fn test_concurrent_reader_sees_old_or_new_value() {
    let x = Component::new(Value(0));
    let writer_token = OwnerToken::new();

    let reader = {
        let x = Arc::clone(&x);
        thread::spawn(move || x.read(OwnerToken::new()))
    };

    let mut value = x.open_write(writer_token);
    value.0 = 5;
    thread::sleep(Duration::from_millis(10));
    x.close_write(writer_token, value).unwrap();

    let seen = reader.join().unwrap();
    assert!(seen == Value(0) || seen == Value(5), "observed {seen:?}");
}

#[test]
fn test_readers_never_observe_partial_writes() {
    let pair = Component::new(Pair::default());
    let entity = Entity::with_components([Arc::clone(&pair) as ComponentHandle]).unwrap();
    assert!(entity.has_component::<Pair>());

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let pair = Arc::clone(&pair);
            thread::spawn(move || {
                let token = OwnerToken::new();
                for _ in 0..200 {
                    let mut value = pair.open_write(token);
                    value.left += 1;
                    thread::yield_now();
                    value.right += 1;
                    pair.close_write(token, value).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let pair = Arc::clone(&pair);
            thread::spawn(move || {
                for _ in 0..500 {
                    let value = pair.read_shared();
                    assert_eq!(value.left, value.right);
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let total = pair.read_shared();
    assert_eq!(total.left, 800);
    assert_eq!(total.right, 800);
}

#[test]
fn test_writer_reenters_and_reads_its_own_state() {
    let x = Component::new(Value(1));
    let token = OwnerToken::new();

    let mut outer = x.open_write(token);
    outer.0 = 2;
    let inner = x.open_write(token);
    assert_eq!(inner, Value(1));
    assert_eq!(x.read(token), Value(1));
    assert!(x.try_read().is_none());

    let foreign = OwnerToken::new();
    assert!(!x.close_write(foreign, Value(99)).unwrap());
    assert!(x.close_write(token, outer).unwrap());
    assert_eq!(x.try_read(), Some(Value(2)));
}
