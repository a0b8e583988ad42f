/*!
 * Conflux CLI - Command Line Interface
 *
 * Runs the coordination pattern demonstrations against simulated units of
 * work and prints the effective configuration.
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use conflux::{
    config::{ConfluxConfig, LogLevel},
    error::{ConfluxError, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
    pipeline::{BoundedChannel, FanOutFanIn},
    resilience::{with_timeout, CircuitState, ResilienceError},
    Toolkit,
};
use rand::Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser)]
#[command(name = "conflux")]
#[command(version, about = "Async coordination patterns: rate limiting, circuit breaking, retries and work distribution", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Log level, overrides the configuration file
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pattern demonstration with simulated work
    Demo {
        #[arg(value_enum)]
        pattern: PatternArg,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum PatternArg {
    ProducerConsumer,
    WorkerPool,
    ScatterGather,
    FanOut,
    RateLimit,
    CircuitBreaker,
    Retry,
    All,
}

#[derive(Copy, Clone, Debug)]
enum Demo {
    ProducerConsumer,
    WorkerPool,
    ScatterGather,
    FanOut,
    RateLimit,
    CircuitBreaker,
    Retry,
}

impl PatternArg {
    fn demos(self) -> &'static [Demo] {
        match self {
            PatternArg::ProducerConsumer => &[Demo::ProducerConsumer],
            PatternArg::WorkerPool => &[Demo::WorkerPool],
            PatternArg::ScatterGather => &[Demo::ScatterGather],
            PatternArg::FanOut => &[Demo::FanOut],
            PatternArg::RateLimit => &[Demo::RateLimit],
            PatternArg::CircuitBreaker => &[Demo::CircuitBreaker],
            PatternArg::Retry => &[Demo::Retry],
            PatternArg::All => &[
                Demo::ProducerConsumer,
                Demo::WorkerPool,
                Demo::ScatterGather,
                Demo::FanOut,
                Demo::RateLimit,
                Demo::CircuitBreaker,
                Demo::Retry,
            ],
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(err) = error.downcast_ref::<ConfluxError>() {
        return err.exit_code();
    }
    match error.downcast_ref::<ResilienceError>() {
        Some(ResilienceError::InvalidConfig(_)) | None => EXIT_FATAL,
        Some(_) => EXIT_PARTIAL,
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ConfluxConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ConfluxConfig::default(),
    };

    // Override config with CLI arguments
    if cli.verbose {
        config.logging.verbose = true;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    config.validate()?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Demo { pattern } => {
            if let Err(e) = logging::init_logging(&config.logging) {
                eprintln!("Warning: Failed to initialize logging: {}", e);
            }

            let toolkit = Toolkit::from_config(&config)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(async {
                for demo in pattern.demos() {
                    run_demo(*demo, &toolkit).await?;
                }
                Ok::<_, anyhow::Error>(())
            })
        }
    }
}

async fn run_demo(demo: Demo, toolkit: &Toolkit) -> anyhow::Result<()> {
    match demo {
        Demo::ProducerConsumer => demo_producer_consumer(toolkit).await,
        Demo::WorkerPool => demo_worker_pool(toolkit).await,
        Demo::ScatterGather => demo_scatter_gather(toolkit).await,
        Demo::FanOut => demo_fan_out(toolkit).await,
        Demo::RateLimit => demo_rate_limit(toolkit).await,
        Demo::CircuitBreaker => demo_circuit_breaker(toolkit).await,
        Demo::Retry => demo_retry(toolkit).await,
    }
}

fn section_header(title: &str, points: &[&str]) {
    println!();
    println!("{}", title);
    println!("{}", "-".repeat(title.len()));
    for point in points {
        println!("- {}", point);
    }
    println!();
}

/// Simulated work duration in `[low, high]` milliseconds
fn random_millis(low: u64, high: u64) -> Duration {
    Duration::from_millis(rand::rng().random_range(low..=high))
}

fn circuit_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open { .. } => "open",
        CircuitState::HalfOpen => "half-open",
    }
}

async fn demo_producer_consumer(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Producer-Consumer Pattern",
        &[
            "Producer generates data asynchronously",
            "A bounded channel buffers data between producer and consumer",
            "A full channel makes the producer wait",
        ],
    );

    let channel: BoundedChannel<String> = toolkit.channel();

    let producer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                sleep(random_millis(100, 500)).await;
                let item = format!("Item {}", i);
                channel.put(item.clone()).await?;
                println!("Produced {}", item);
            }
            channel.close();
            println!("Producer finished");
            Ok::<_, ResilienceError>(())
        })
    };

    let consumer = tokio::spawn(async move {
        let mut consumed = 0usize;
        while let Some(item) = channel.get().await {
            sleep(random_millis(200, 700)).await;
            println!("Consumed {}", item);
            consumed += 1;
        }
        println!("Consumer finished");
        consumed
    });

    producer.await??;
    let consumed = consumer.await?;
    println!("Producer-consumer demo completed: {} items consumed", consumed);
    Ok(())
}

async fn demo_worker_pool(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Worker Pool Pattern",
        &[
            "Fixed pool of workers processes tasks concurrently",
            "Tasks are distributed among workers",
            "The pool size bounds concurrency",
        ],
    );

    let pool = toolkit.worker_pool(|task: String| async move {
        println!("Started processing {}", task);
        sleep(random_millis(500, 2000)).await;
        println!("Completed {}", task);
        Ok(())
    })?;

    for i in 0..10 {
        let task = format!("Task {}", i);
        pool.submit(task.clone()).await?;
        println!("Submitted {}", task);
        sleep(random_millis(100, 300)).await;
    }

    pool.join().await;
    let stats = pool.shutdown().await?;
    for worker in &stats.workers {
        println!("Worker-{} processed {} task(s)", worker.id, worker.processed);
    }
    println!(
        "Worker pool demo completed: {} processed, {} failed",
        stats.processed, stats.failed
    );
    Ok(())
}

async fn demo_scatter_gather(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Scatter-Gather Pattern (Map-Reduce)",
        &[
            "Distribute (scatter) work across concurrent partitions",
            "Collect (gather) the partial results in partition order",
            "Combine them into one result",
        ],
    );

    let scatter = toolkit.scatter_gather()?;
    let data: Vec<u64> = (1..=100).collect();

    let partitions = scatter
        .map_partitions(data, |chunk: Vec<u64>| async move {
            println!("Processing chunk: {:?}", chunk);
            sleep(random_millis(500, 1500)).await;
            Ok(chunk.iter().sum::<u64>())
        })
        .await?;

    let results: Vec<u64> = partitions.iter().map(|partition| partition.value).collect();
    println!("Split data into {} chunks", results.len());
    println!("Scattered processing completed. Results: {:?}", results);
    println!("Gathered result: {}", results.iter().sum::<u64>());
    Ok(())
}

#[derive(Debug)]
struct ProcessedItem {
    item: String,
    took: Duration,
    result: String,
}

async fn process_item(item: String) -> Result<ProcessedItem, ResilienceError> {
    let took = random_millis(200, 1000);
    sleep(took).await;
    Ok(ProcessedItem {
        result: format!("Processed {}", item),
        item,
        took,
    })
}

async fn demo_fan_out(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Fan-Out/Fan-In Pattern",
        &[
            "Fan-out: one task starts a unit of work per item",
            "Each unit runs independently",
            "Fan-in: results are collected in input order",
        ],
    );

    let items: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
    let fan = toolkit.fan_out();

    println!("Starting fan-out phase...");
    let (results, ()) = tokio::join!(fan.run(items, process_item), async {
        println!("Main task continues working while subtasks run...");
        sleep(Duration::from_millis(500)).await;
        println!("Starting fan-in phase...");
    });
    let results = results?;

    println!("All {} items processed", results.len());
    for (i, processed) in results.iter().take(3).enumerate() {
        println!(
            "Sample result {}: {} -> {} ({} ms)",
            i + 1,
            processed.item,
            processed.result,
            processed.took.as_millis()
        );
    }
    if results.len() > 3 {
        println!("... and {} more", results.len() - 3);
    }
    Ok(())
}

async fn demo_rate_limit(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Throttling and Rate Limiting",
        &[
            "A token bucket admits a fixed number of requests per period",
            "Callers over the limit wait for a token",
        ],
    );

    let limiter = toolkit.config().rate_limiter.build()?;
    println!(
        "Rate limit: {} requests per {:.1}s",
        limiter.rate_limit(),
        limiter.period().as_secs_f64()
    );

    let started = Instant::now();
    let limiter = &limiter;
    let results = FanOutFanIn::new()
        .run((0..20).collect::<Vec<u32>>(), move |id| async move {
            println!("Request {}: waiting for rate limiter...", id);
            limiter
                .execute(|| async move {
                    println!("Request {}: starting", id);
                    sleep(random_millis(100, 500)).await;
                    println!("Request {}: completed", id);
                    Ok::<_, ResilienceError>(format!("Result {}", id))
                })
                .await
        })
        .await?;

    println!(
        "All {} requests completed with rate limiting in {:.1}s",
        results.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn unreliable_service(fail_probability: f64) -> Result<&'static str, ResilienceError> {
    sleep(Duration::from_millis(100)).await;
    if rand::rng().random_bool(fail_probability) {
        return Err(ResilienceError::Connection("Service unavailable".to_string()));
    }
    Ok("Service response")
}

async fn demo_circuit_breaker(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Circuit Breaker Pattern",
        &[
            "Stops calling a failing service after repeated failures",
            "Gives the service time to recover",
            "Closed, open and half-open states",
        ],
    );

    let breaker = toolkit.breaker();
    for i in 0..15 {
        // Mostly failing at first, then the service recovers
        let fail_probability = if i < 10 { 0.8 } else { 0.2 };
        match breaker.call(|| unreliable_service(fail_probability)).await {
            Ok(response) => println!("Request {}: Success - {}", i, response),
            Err(e) => println!("Request {}: Failed - {}", i, e),
        }
        println!("  circuit is {}", circuit_label(breaker.state()));
        sleep(Duration::from_millis(500)).await;
    }

    let stats = breaker.stats();
    println!(
        "Circuit breaker demo completed: {} admitted, {} rejected, opened {} time(s)",
        stats.admitted_calls, stats.rejected_calls, stats.times_opened
    );
    Ok(())
}

async fn unreliable_operation() -> Result<&'static str, ResilienceError> {
    if rand::rng().random_bool(0.7) {
        return Err(ResilienceError::Transient("Operation failed".to_string()));
    }
    Ok("Operation succeeded")
}

async fn demo_retry(toolkit: &Toolkit) -> anyhow::Result<()> {
    section_header(
        "Timeouts and Retries",
        &[
            "Bound every operation with a timeout",
            "Retry transient failures with exponential backoff",
        ],
    );

    for timeout in [Duration::from_secs(1), Duration::from_millis(1500)] {
        let outcome = with_timeout(timeout, async {
            sleep(random_millis(500, 2000)).await;
            Ok::<_, ResilienceError>(())
        })
        .await;
        match outcome {
            Ok(()) => println!("Operation completed within {:.1}s", timeout.as_secs_f64()),
            Err(e) => println!("{}", e),
        }
    }

    let (result, attempts) = toolkit.retry().run_with_attempts(unreliable_operation).await;
    for attempt in &attempts {
        match attempt.delay_before_next {
            Some(delay) => println!(
                "Attempt {} failed ({}), retrying in {:.2}s",
                attempt.attempt,
                attempt.error,
                delay.as_secs_f64()
            ),
            None => println!("Attempt {} failed ({}), giving up", attempt.attempt, attempt.error),
        }
    }
    match result {
        Ok(value) => println!("Retry demo completed: {}", value),
        Err(e) => println!("Retry demo completed: {}", e),
    }
    Ok(())
}
