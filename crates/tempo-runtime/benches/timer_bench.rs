//! Timer list throughput benchmarks

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use tempo_core::{Duration, TimerHost, Timestamp};
use tempo_runtime::timer::{
    ShardedTimerList, SlackedOptions, SlackedTimerList, SystemHost, TimerList,
};

fn bench_sharded_init_cancel(c: &mut Criterion) {
    let host: Arc<dyn TimerHost> = Arc::new(SystemHost);
    let list = ShardedTimerList::new(host.clone());
    c.bench_function("sharded_init_cancel", |b| {
        b.iter(|| {
            let deadline = host.now() + Duration::from_secs(30);
            let timer = list.init(deadline, Box::new(|| {}));
            list.cancel(&timer)
        })
    });
}

fn bench_sharded_check_idle(c: &mut Criterion) {
    let host: Arc<dyn TimerHost> = Arc::new(SystemHost);
    let list = ShardedTimerList::new(host.clone());
    // Park a population of far-future timers so check exercises the
    // fast path against a non-trivial list.
    let _timers: Vec<_> = (0..10_000)
        .map(|_| list.init(host.now() + Duration::from_secs(600), Box::new(|| {})))
        .collect();
    c.bench_function("sharded_check_idle", |b| {
        b.iter(|| {
            let mut next = Timestamp::INFINITE_FUTURE;
            list.check(Some(&mut next))
        })
    });
}

fn bench_slacked_init_cancel(c: &mut Criterion) {
    let host: Arc<dyn TimerHost> = Arc::new(SystemHost);
    let list = SlackedTimerList::new(host.clone(), SlackedOptions::default());
    c.bench_function("slacked_init_cancel", |b| {
        b.iter(|| {
            let deadline = host.now() + Duration::from_secs(30);
            let timer = list.init(deadline, Box::new(|| {}));
            list.cancel(&timer)
        })
    });
}

criterion_group!(
    benches,
    bench_sharded_init_cancel,
    bench_sharded_check_idle,
    bench_slacked_init_cancel
);
criterion_main!(benches);
