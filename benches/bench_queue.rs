#[macro_use]
extern crate criterion;

use criterion::Criterion;
use crossbeam::queue::SegQueue;
use hazcurrent::structures::Queue;
use std::collections::VecDeque;

use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

fn bench_equal_lock(num_threads: usize) {
    let queue = Arc::new(Mutex::new(VecDeque::new()));
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..10000 / num_threads {
                queue_clone.lock().unwrap().push_back(i);
            }
        }));
    }

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..10000 / num_threads {
                while queue_clone.lock().unwrap().pop_front().is_none() {}
            }
        }))
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_equal(num_threads: usize) {
    let queue = Arc::new(Queue::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..10000 / num_threads {
                queue_clone.enqueue(i).unwrap();
            }
        }));
    }

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..10000 / num_threads {
                while queue_clone.dequeue().unwrap().is_none() {}
            }
        }))
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_equal_crossbeam(num_threads: usize) {
    let queue = Arc::new(SegQueue::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..10000 / num_threads {
                queue_clone.push(i);
            }
        }));
    }

    for _ in 0..num_threads / 2 {
        let queue_clone = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..10000 / num_threads {
                while queue_clone.pop().is_none() {}
            }
        }))
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_mp_sc(num_threads: usize) {
    let queue = Arc::new(Queue::new());
    let mut wait_vec = Vec::new();

    let amount = 10000 / num_threads;
    let consumer_num = amount * (num_threads - 1);

    let q = queue.clone();
    wait_vec.push(thread::spawn(move || {
        for _ in 0..consumer_num {
            while q.dequeue().unwrap().is_none() {}
        }
    }));

    for _ in 0..num_threads - 1 {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..amount {
                q.enqueue(i).unwrap();
            }
        }))
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_queue_equal_low(c: &mut Criterion) {
    c.bench_function("queue_equal_lock_low", |b| b.iter(|| bench_equal_lock(4)));
    c.bench_function("queue_equal_low", |b| b.iter(|| bench_equal(4)));
    c.bench_function("queue_equal_crossbeam_low", |b| b.iter(|| bench_equal_crossbeam(4)));
}

fn bench_queue_equal_high(c: &mut Criterion) {
    c.bench_function("queue_equal_lock_high", |b| b.iter(|| bench_equal_lock(16)));
    c.bench_function("queue_equal_high", |b| b.iter(|| bench_equal(16)));
    c.bench_function("queue_equal_crossbeam_high", |b| b.iter(|| bench_equal_crossbeam(16)));
}

fn bench_queue_mp_sc(c: &mut Criterion) {
    c.bench_function("queue_mp_sc", |b| b.iter(|| bench_mp_sc(8)));
}

criterion_group!(benches, bench_queue_equal_low, bench_queue_equal_high, bench_queue_mp_sc);
criterion_main!(benches);
