//! Playground - write scheduler plus z-trace walkthrough
//!
//! Runs a few scheduler quanta over uneven channels while a z-trace
//! observer records the plans, then prints the observer's JSON snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tempo::{make_scheduler, Duration, FlowZTraceCollector, ThreadPool, WorkerPool};

fn main() {
    env_logger::init();

    let config = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "spanrr:step=0.5".to_string());

    println!("=== tempo scheduler playground ===\n");
    let mut scheduler = make_scheduler(&config);
    println!("scheduler: {}", scheduler.config());

    let collector = FlowZTraceCollector::new();
    let pool: Arc<dyn WorkerPool> = Arc::new(ThreadPool::new());
    let snapshot = Arc::new(Mutex::new(None));

    // The observer completes after three captured plans, or at its
    // deadline, whichever comes first.
    let ztrace = collector.make_ztrace();
    {
        let snapshot = snapshot.clone();
        ztrace.run(
            Duration::from_millis(250),
            BTreeMap::from([("limit".to_string(), "3".to_string())]),
            pool.clone(),
            move |result| {
                *snapshot.lock().unwrap() = Some(result);
            },
        );
    }

    // Three quanta: a fast ready channel, a slow ready channel, and one
    // that is still draining its kernel queue.
    for quantum in 0..3 {
        scheduler.new_step(6000.0, 64.0);
        scheduler.add_channel(1, true, 0.000, 8000.0);
        scheduler.add_channel(2, true, 0.050, 2000.0);
        scheduler.add_channel(3, quantum == 2, 0.200, 4000.0);
        scheduler.make_plan(&collector);

        print!("quantum {quantum}: ");
        let mut declined = 0;
        for _ in 0..8 {
            match scheduler.allocate_message(512) {
                Some(id) => print!("{id} "),
                None => declined += 1,
            }
        }
        println!("({declined} declined)");
    }

    // Wait out the trace deadline, then print what the observer saw.
    std::thread::sleep(std::time::Duration::from_millis(400));
    let taken = snapshot.lock().unwrap().take();
    match taken {
        Some(Ok(json)) => println!("\ntrace snapshot:\n{}", json),
        Some(Err(error)) => println!("\ntrace ended without data: {error}"),
        None => println!("\ntrace still pending (unexpected)"),
    }
}
