//! Stress test - many concurrent timers
//!
//! Hammers the sharded timer list from several threads while one checker
//! thread drains expirations, then reports throughput and accounting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tempo::{Duration, ShardedTimerList, SystemHost, TimerHost, TimerList};

fn main() {
    env_logger::init();

    let num_threads: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);
    let timers_per_thread: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    println!("=== tempo timer stress ===\n");
    println!(
        "{} threads x {} timers, deadlines within 500ms, one third cancelled",
        num_threads, timers_per_thread
    );

    let host: Arc<dyn TimerHost> = Arc::new(SystemHost);
    let list = Arc::new(ShardedTimerList::new(host.clone()));
    let fired = Arc::new(AtomicU64::new(0));
    let cancelled = Arc::new(AtomicU64::new(0));
    let done_inserting = Arc::new(AtomicBool::new(false));

    // Checker thread: drains expirations as they come due.
    let checker = {
        let list = list.clone();
        let done = done_inserting.clone();
        std::thread::spawn(move || loop {
            match list.check(None) {
                Some(callbacks) => {
                    let idle = callbacks.is_empty();
                    for cb in callbacks {
                        cb();
                    }
                    if idle {
                        if done.load(Ordering::Acquire) {
                            break;
                        }
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                }
                None => std::thread::yield_now(),
            }
        })
    };

    let start = Instant::now();
    let inserters: Vec<_> = (0..num_threads)
        .map(|t| {
            let list = list.clone();
            let host = host.clone();
            let fired = fired.clone();
            let cancelled = cancelled.clone();
            std::thread::spawn(move || {
                for i in 0..timers_per_thread {
                    let delay = Duration::from_millis(((t * 131 + i * 17) % 500) as i64);
                    let fired = fired.clone();
                    let timer = list.init(
                        host.now() + delay,
                        Box::new(move || {
                            fired.fetch_add(1, Ordering::Relaxed);
                        }),
                    );
                    if i % 3 == 0 && list.cancel(&timer) {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in inserters {
        handle.join().unwrap();
    }
    let insert_time = start.elapsed();

    // Let the tail of deadlines pass, then stop the checker.
    std::thread::sleep(std::time::Duration::from_millis(600));
    done_inserting.store(true, Ordering::Release);
    checker.join().unwrap();

    let total = (num_threads * timers_per_thread) as u64;
    let fired = fired.load(Ordering::Relaxed);
    let cancelled = cancelled.load(Ordering::Relaxed);
    println!("\ninserted {} timers in {:?}", total, insert_time);
    println!(
        "  {:.0} inserts/sec",
        total as f64 / insert_time.as_secs_f64()
    );
    println!("fired: {fired}  cancelled: {cancelled}");
    assert_eq!(fired + cancelled, total, "every timer fired xor cancelled");
    println!("accounting OK");
}
