use clap::{Parser, ValueEnum};
use colored::*;
use mpmc_queues::{BLQueue, ConcurrentQueue, LLQueue, RingsQueue, SimpleQueue, EMPTY_VALUE};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Which queue variant the demo/stress/ABA path drives.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum QueueKind {
    /// Lock-free batched/buffered linked queue.
    Bl,
    /// Lock-free one-value-per-node linked queue.
    Ll,
    /// Mutex-guarded linked list of ring buffers.
    Rings,
    /// Mutex-guarded two-lock Michael-Scott queue.
    Simple,
}

impl QueueKind {
    fn needs_hazard_registration(self) -> bool {
        matches!(self, QueueKind::Bl | QueueKind::Ll)
    }

    fn new_queue(self) -> Box<dyn ConcurrentQueue> {
        match self {
            QueueKind::Bl => Box::new(BLQueue::new()),
            QueueKind::Ll => Box::new(LLQueue::new()),
            QueueKind::Rings => Box::new(RingsQueue::new()),
            QueueKind::Simple => Box::new(SimpleQueue::new()),
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueueKind::Bl => "BLQueue",
            QueueKind::Ll => "LLQueue",
            QueueKind::Rings => "RingsQueue",
            QueueKind::Simple => "SimpleQueue",
        };
        write!(f, "{name}")
    }
}

/// Command-line arguments for the MPMC queue demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which queue implementation to drive
    #[arg(short, long, value_enum, default_value_t = QueueKind::Bl)]
    queue: QueueKind,

    /// Enable verbose output with detailed operation logs
    #[arg(short, long)]
    verbose: bool,

    /// Run a stress test with many concurrent operations
    #[arg(short, long)]
    stress_test: bool,

    /// Run a smaller verification test (faster than full stress test)
    #[arg(long)]
    quick_test: bool,

    /// Show a visual demonstration of the ABA problem and how hazard
    /// pointers solve it
    #[arg(long, default_value_t = true)]
    show_aba_demo: bool,

    /// Skip the ABA demonstration
    #[arg(long)]
    no_show_aba_demo: bool,

    /// Run diagnostics on the selected queue implementation
    #[arg(long)]
    diagnose: bool,
}

/// Registers the calling thread with `hazard` if `kind` needs it; a no-op
/// for the mutex-based queues.
fn register_if_needed(kind: QueueKind, thread_id: usize, num_threads: usize) {
    if kind.needs_hazard_registration() {
        mpmc_queues::hazard::register(thread_id, num_threads);
    }
}

fn main() {
    let args = Args::parse();

    println!("{}", "Concurrent MPMC Queue Demonstration".green().bold());
    println!("=====================================\n");
    println!("Selected queue: {}\n", args.queue.to_string().cyan().bold());

    register_if_needed(args.queue, 0, 1);

    if args.diagnose {
        println!(
            "{}",
            "Running diagnostics on the selected queue...".yellow().bold()
        );
        diagnose_queue(args.queue);
        return;
    }

    let show_demo = args.show_aba_demo && !args.no_show_aba_demo;

    if show_demo {
        aba_demonstration(args.queue, args.verbose);
    }

    if args.stress_test {
        stress_test(args.queue, args.verbose);
    } else if args.quick_test {
        quick_verification_test(args.queue, args.verbose);
    } else if !show_demo {
        basic_demo(args.queue, args.verbose);
    }

    println!("\n{}", "Demonstration complete!".green().bold());
}

/// Demonstrates basic push/pop usage of the selected queue.
fn basic_demo(kind: QueueKind, verbose: bool) {
    println!("{}", "\nRunning basic demonstration...".yellow().bold());

    let queue = kind.new_queue();

    println!("Pushing values 1, 2, 3 onto the {kind}");
    queue.push(1);
    queue.push(2);
    queue.push(3);

    if verbose {
        println!("Queue empty before popping: {}", queue.is_empty());
    }

    println!("\nPopping values from the queue (FIFO order):");
    loop {
        let value = queue.pop();
        if value == EMPTY_VALUE {
            break;
        }
        println!("Popped: {value}");
    }

    println!("Queue is now empty: {}", queue.is_empty());
}

/// Demonstrates how hazard pointers protect a queue's head node across a
/// concurrent pop/push race on the same address. For the mutex-guarded
/// queues there is no hazard pointer to show off, so this instead
/// demonstrates that the two-lock discipline rules the race out entirely.
fn aba_demonstration(kind: QueueKind, verbose: bool) {
    println!(
        "{}",
        format!("\nDemonstrating concurrent-pop safety on {kind}...")
            .yellow()
            .bold()
    );

    if !kind.needs_hazard_registration() {
        println!(
            "{} does not use hazard pointers (mutex-guarded); a pop always \
             holds the lock for its whole duration, so there is no ABA race \
             to demonstrate here.",
            kind
        );
        return;
    }

    let num_threads = 2;
    let queue: Arc<dyn ConcurrentQueue> = match kind {
        QueueKind::Bl => Arc::new(BLQueue::new()),
        QueueKind::Ll => Arc::new(LLQueue::new()),
        _ => unreachable!("checked above"),
    };

    queue.push(1);
    queue.push(2);
    queue.push(3);
    println!("Initial queue state (FIFO order): [1] -> [2] -> [3]");

    let queue1 = Arc::clone(&queue);
    let queue2 = Arc::clone(&queue);

    let handle1 = thread::spawn(move || {
        mpmc_queues::hazard::register(0, num_threads);
        println!("{}", "Thread 1: starting a pop, then sleeping".blue());
        thread::sleep(Duration::from_millis(20));
        let result = queue1.pop();
        if verbose {
            println!("{}", format!("Thread 1: popped {result}").blue());
        }
        result
    });

    let handle2 = thread::spawn(move || {
        mpmc_queues::hazard::register(1, num_threads);
        thread::sleep(Duration::from_millis(5));
        println!(
            "{}",
            "Thread 2: racing pops and a push while Thread 1 is delayed".magenta()
        );
        let a = queue2.pop();
        let b = queue2.pop();
        queue2.push(1);
        if verbose {
            println!(
                "{}",
                format!("Thread 2: popped {a}, {b}, pushed 1 back").magenta()
            );
        }
    });

    let first = handle1.join().expect("Thread 1 panicked");
    handle2.join().expect("Thread 2 panicked");

    println!("\n{}", "What just happened?".green().bold());
    println!("Thread 1 protected the head node with a hazard pointer before");
    println!("sleeping; Thread 2 then popped ahead of it and pushed a new");
    println!("value back, which could have reused the same node's address");
    println!("under a naive reclamation scheme. The hazard pointer kept the");
    println!("node Thread 1 was inspecting alive until it cleared its own");
    println!("protection, so Thread 1's pop (which returned {first}) never");
    println!("touched freed memory.");

    let mut remaining = Vec::new();
    while !queue.is_empty() {
        let v = queue.pop();
        if v != EMPTY_VALUE {
            remaining.push(v);
        }
    }
    println!("\nRemaining values drained at teardown: {remaining:?}");
}

/// Runs a stress test with many concurrent producer/consumer threads.
fn stress_test(kind: QueueKind, verbose: bool) {
    println!(
        "{}",
        format!("\nRunning stress test on {kind}...").yellow().bold()
    );

    let num_threads = 8;
    let operations_per_thread = 2_000;
    let test_timeout = Duration::from_secs(30);

    let queue: Arc<dyn ConcurrentQueue> = Arc::from(kind.new_queue());
    let mut handles = Vec::new();

    println!(
        "Spawning {num_threads} threads with {operations_per_thread} operations each (timeout: {}s)",
        test_timeout.as_secs()
    );

    let start_time = Instant::now();

    for thread_id in 0..num_threads {
        let queue = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            register_if_needed(kind, thread_id, num_threads);
            let mut rng = rand::rng();
            let mut pushes = 0u64;
            let mut pops = 0u64;

            for op in 0..operations_per_thread {
                if verbose && op % 500 == 0 {
                    println!("Thread {thread_id} completed {op} operations");
                }
                if Instant::now().duration_since(start_time) > test_timeout {
                    println!("Thread {thread_id} timed out, returning early");
                    return (pushes, pops);
                }

                if rng.random::<f32>() < 0.6 {
                    let value = rng.random_range(0..i64::MAX - 2);
                    queue.push(value);
                    pushes += 1;
                } else if queue.pop() != EMPTY_VALUE {
                    pops += 1;
                }

                if rng.random::<f32>() < 0.005 {
                    thread::sleep(Duration::from_micros(rng.random_range(1..10)));
                }
            }

            (pushes, pops)
        });

        handles.push(handle);
    }

    let mut total_pushes = 0u64;
    let mut total_pops = 0u64;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok((pushes, pops)) => {
                total_pushes += pushes;
                total_pops += pops;
            }
            Err(e) => println!("Thread {i} panicked: {e:?}"),
        }
    }

    let elapsed = Instant::now().duration_since(start_time);
    println!("\nStress test completed in {:.2}s!", elapsed.as_secs_f32());
    println!("Total push operations: {total_pushes}");
    println!("Total pop operations: {total_pops}");
    println!(
        "Operations still queued (pushes - pops): {}",
        total_pushes.saturating_sub(total_pops)
    );

    while !queue.is_empty() {
        let _ = queue.pop();
        total_pops += 1;
    }
    assert_eq!(
        total_pushes, total_pops,
        "conservation violated: pushes and pops should balance after drain"
    );
    println!("{}", "Stress test validation passed!".green().bold());
}

/// Runs a quick, deterministic push-then-pop verification.
fn quick_verification_test(kind: QueueKind, _verbose: bool) {
    println!(
        "{}",
        format!("\nRunning quick verification test on {kind}...")
            .yellow()
            .bold()
    );

    register_if_needed(kind, 0, 1);
    let queue = kind.new_queue();
    let operations = 50;

    for i in 0..operations {
        queue.push(i);
    }
    println!("Pushed {operations} items successfully");

    let mut popped = 0;
    while queue.pop() != EMPTY_VALUE {
        popped += 1;
    }

    assert_eq!(popped, operations);
    assert!(queue.is_empty());
    println!("{}", "Quick verification test passed!".green().bold());
}

/// Runs a small sequence of push/pop operations with verbose tracing.
fn diagnose_queue(kind: QueueKind) {
    println!("Starting {kind} diagnostics");

    register_if_needed(kind, 0, 1);
    let queue = kind.new_queue();

    println!("Pushing value 42");
    queue.push(42);

    println!("Popping value");
    let value = queue.pop();
    if value == EMPTY_VALUE {
        println!("Pop failed - queue was empty");
    } else {
        println!("Popped value: {value}");
    }

    println!("\nTesting concurrent pop from a second thread");
    let num_threads = 2;
    let queue: Arc<dyn ConcurrentQueue> = Arc::from(queue);
    queue.push(7);

    let queue_clone = Arc::clone(&queue);
    let handle = thread::spawn(move || {
        register_if_needed(kind, 1, num_threads);
        println!("Thread: popping value from queue");
        let result = queue_clone.pop();
        println!("Thread: pop result: {result}");
    });
    handle.join().expect("Thread panicked");

    println!("Diagnostics complete");
}
