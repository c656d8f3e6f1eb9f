//! Bounded-queue throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin mpmc_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin the SPSC producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin the SPSC consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use splitq::BoundedQueue;

const QUEUE_CAPACITY: usize = 1024;
const ITERATIONS: usize = 1 << 20;

type Payload = u64;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_spsc_blocking(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let queue = Arc::new(BoundedQueue::<Payload>::with_capacity(QUEUE_CAPACITY).unwrap());

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();
    let queue_clone = Arc::clone(&queue);

    // Consumer thread
    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        // Signal ready
        ready_clone.store(true, Ordering::Release);

        for expected in 0..ITERATIONS as Payload {
            let value = queue_clone.wait_and_pop();
            if value != expected {
                panic!("Data corruption: expected {}, got {}", expected, value);
            }
        }
    });

    // Wait for consumer to be ready
    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS as Payload {
        queue.wait_to_push(i);
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("spsc blocking: {} ops/ms", ops_per_ms);
}

fn bench_mpmc_spin(producers: usize, consumers: usize) {
    let queue = Arc::new(BoundedQueue::<Payload>::with_capacity(QUEUE_CAPACITY).unwrap());
    let per_producer = ITERATIONS / producers;
    let total = per_producer * producers;

    let start = Instant::now();

    let mut producer_threads = Vec::new();
    for p in 0..producers {
        let queue = Arc::clone(&queue);
        producer_threads.push(std::thread::spawn(move || {
            for i in 0..per_producer {
                let mut value = (p * per_producer + i) as Payload;
                loop {
                    match queue.try_push(value) {
                        Ok(()) => break,
                        Err(returned) => {
                            value = returned;
                            hint::spin_loop();
                        }
                    }
                }
            }
        }));
    }

    let per_consumer = total / consumers;
    let mut consumer_threads = Vec::new();
    for c in 0..consumers {
        let count = if c == consumers - 1 {
            total - per_consumer * (consumers - 1)
        } else {
            per_consumer
        };
        let queue = Arc::clone(&queue);
        consumer_threads.push(std::thread::spawn(move || {
            let mut popped = 0usize;
            while popped < count {
                if queue.try_pop().is_some() {
                    popped += 1;
                } else {
                    hint::spin_loop();
                }
            }
        }));
    }

    for t in producer_threads {
        t.join().unwrap();
    }
    for t in consumer_threads {
        t.join().unwrap();
    }
    let elapsed = start.elapsed();

    let ops_per_ms = total as u128 * 1_000_000 / elapsed.as_nanos();
    println!(
        "mpmc {}p/{}c try+spin: {} ops/ms",
        producers, consumers, ops_per_ms
    );
}

fn main() {
    splitq::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!(
        "splitq bench: {} iterations, capacity {}",
        ITERATIONS, QUEUE_CAPACITY
    );
    bench_spsc_blocking(producer_cpu, consumer_cpu);
    bench_mpmc_spin(4, 4);
}
