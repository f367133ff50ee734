use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use mpmc_queues::{hazard, BLQueue, LLQueue, RingsQueue, SimpleQueue};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn custom_criterion() -> Criterion {
    Criterion::default()
        .sample_size(10)
        .measurement_time(Duration::from_secs(1))
        .warm_up_time(Duration::from_secs(1))
}

/// Benches single-thread push, single-thread pop, and a small 2-thread
/// concurrent push/pop mix for one queue variant. `setup` registers
/// whichever threads the closures run on with `hazard` (a no-op for the
/// mutex-based queues, since `register` is only ever consulted by
/// `BLQueue`/`LLQueue`).
fn bench_queue<Q, New, Setup>(
    c: &mut Criterion,
    group_name: &str,
    new_queue: New,
    register_thread: Setup,
) where
    Q: Send + Sync + 'static,
    New: Fn() -> Q,
    Setup: Fn(usize, usize) + Copy + Send + Sync + 'static,
    Q: QueueOps,
{
    let mut group = c.benchmark_group(group_name);
    group.measurement_time(Duration::from_secs(1));
    group.warm_up_time(Duration::from_secs(1));
    group.sample_size(10);

    register_thread(0, 1);

    group.bench_function("push", |b| {
        b.iter_batched(
            &new_queue,
            |queue| {
                queue.do_push(42);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("pop", |b| {
        b.iter_batched(
            || {
                let queue = new_queue();
                queue.do_push(42);
                queue
            },
            |queue| {
                let _ = queue.do_pop();
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("concurrent_push_pop_2_threads", |b| {
        b.iter_batched(
            || Arc::new(new_queue()),
            |queue| {
                let queue2 = Arc::clone(&queue);

                let handle1 = thread::spawn(move || {
                    register_thread(0, 2);
                    queue.do_push(1);
                    queue.do_push(2);
                });

                let handle2 = thread::spawn(move || {
                    register_thread(1, 2);
                    let _ = queue2.do_pop();
                    let _ = queue2.do_pop();
                });

                handle1.join().expect("push thread panicked");
                handle2.join().expect("pop thread panicked");
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Thin seam so `bench_queue` can call `push`/`pop` without depending on
/// `ConcurrentQueue`'s object-safety (const-generic queues aren't all the
/// same concrete type, so a shared trait object isn't an option here).
trait QueueOps {
    fn do_push(&self, value: i64);
    fn do_pop(&self) -> i64;
}

impl<const N: usize> QueueOps for BLQueue<N> {
    fn do_push(&self, value: i64) {
        self.push(value)
    }
    fn do_pop(&self) -> i64 {
        self.pop()
    }
}

impl QueueOps for LLQueue {
    fn do_push(&self, value: i64) {
        self.push(value)
    }
    fn do_pop(&self) -> i64 {
        self.pop()
    }
}

impl<const N: usize> QueueOps for RingsQueue<N> {
    fn do_push(&self, value: i64) {
        self.push(value)
    }
    fn do_pop(&self) -> i64 {
        self.pop()
    }
}

impl QueueOps for SimpleQueue {
    fn do_push(&self, value: i64) {
        self.push(value)
    }
    fn do_pop(&self) -> i64 {
        self.pop()
    }
}

fn bl_queue_bench(c: &mut Criterion) {
    bench_queue(c, "BLQueue", BLQueue::<1024>::new, hazard::register);
}

fn ll_queue_bench(c: &mut Criterion) {
    bench_queue(c, "LLQueue", LLQueue::new, hazard::register);
}

fn rings_queue_bench(c: &mut Criterion) {
    bench_queue(c, "RingsQueue", RingsQueue::<1024>::new, |_, _| {});
}

fn simple_queue_bench(c: &mut Criterion) {
    bench_queue(c, "SimpleQueue", SimpleQueue::new, |_, _| {});
}

criterion_group! {
    name = benches;
    config = custom_criterion();
    targets = bl_queue_bench, ll_queue_bench, rings_queue_bench, simple_queue_bench
}
criterion_main!(benches);
