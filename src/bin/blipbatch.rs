//! blipbatch – drive a batch worker from the command line.
//
//  $ blipbatch run --producers 8 --items 100000
//  $ tail -f app.log | blipbatch --config blipbatch.toml lines
use blipbatch::core::ChannelLog;
use blipbatch::logging::init_logging;
use blipbatch::{load_config, metrics, Batch, BatchWorker, Config, ErrorLog};

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "blipbatch", version, about = "BlipBatch worker driver")]
struct Cli {
    /// Path to config TOML (env BLIPBATCH_CONFIG is used when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push synthetic items through a batch worker from several producer threads.
    Run {
        #[arg(long, default_value_t = 4)]
        producers: usize,
        #[arg(long, default_value_t = 10_000)]
        items: u64,
        /// Make every n-th batch handler call fail (0 disables).
        #[arg(long, default_value_t = 0)]
        fail_every: u64,
    },
    /// Batch stdin lines and print one line per flushed batch.
    Lines,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cfg: Config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => Config::load(None)?,
    };

    let (log, records) = ChannelLog::bounded(1024);
    let log_task = tokio::spawn(ChannelLog::drain(records));
    let log: Arc<dyn ErrorLog> = Arc::new(log);

    match cli.cmd {
        Command::Run {
            producers,
            items,
            fail_every,
        } => run(&cfg, log, producers.max(1), items, fail_every).await,
        Command::Lines => lines(&cfg, log).await?,
    }

    // Every ChannelLog clone is gone once the worker is dropped.
    let reported = log_task.await?;
    info!(reported, "error log drained");
    print!("{}", metrics::snapshot());
    Ok(())
}

async fn run(
    cfg: &Config,
    log: Arc<dyn ErrorLog>,
    producers: usize,
    items: u64,
    fail_every: u64,
) {
    let worker = BatchWorker::with_config("run", log, cfg.batch_worker());
    let calls = Arc::new(AtomicU64::new(0));
    let handler_calls = Arc::clone(&calls);
    worker.set_batch_handler(move |_batch: Batch<u64>| {
        let n = handler_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if fail_every > 0 && n % fail_every == 0 {
            return Err(format!("synthetic failure on call {n}").into());
        }
        Ok(())
    });
    worker.start();

    let started = Instant::now();
    let per_producer = items / producers as u64;
    let remainder = items % producers as u64;
    std::thread::scope(|s| {
        for p in 0..producers as u64 {
            let worker = &worker;
            let count = per_producer + u64::from(p < remainder);
            s.spawn(move || {
                for i in 0..count {
                    worker.enqueue((p << 32) | i);
                }
            });
        }
    });
    let enqueued_in = started.elapsed();

    // The age trigger picks up the tail batch.
    let give_up = Instant::now() + Duration::from_millis(cfg.batch.max_batch_age_ms) * 2
        + Duration::from_secs(1);
    while worker.stats().items < items && Instant::now() < give_up {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.stop();

    let stats = worker.stats();
    println!(
        "enqueued {items} items from {producers} producers in {enqueued_in:?}; delivered {} in {} batches (size {}, age {}, failed {}, avg {:.1}, max {}) after {:?}",
        stats.items,
        stats.batches,
        stats.flush_by_size,
        stats.flush_by_age,
        stats.failed,
        stats.avg_batch_len(),
        stats.max_batch_len,
        started.elapsed(),
    );
}

async fn lines(cfg: &Config, log: Arc<dyn ErrorLog>) -> anyhow::Result<()> {
    let worker = Arc::new(BatchWorker::with_config("lines", log, cfg.batch_worker()));
    worker.set_batch_handler(|batch: Batch<String>| {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "#{} [{} trigger, {} lines] {}",
            batch.sequence(),
            batch.trigger(),
            batch.len(),
            batch.items().join(" | ")
        )?;
        Ok(())
    });
    worker.start();

    let reader = Arc::clone(&worker);
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        for line in io::stdin().lock().lines() {
            reader.enqueue(line?);
        }
        Ok(())
    })
    .await??;

    // stop() does not flush, so wait for the tail batch to age out.
    let give_up = Instant::now() + Duration::from_millis(cfg.batch.max_batch_age_ms) * 2
        + Duration::from_secs(1);
    while (worker.pending() > 0 || worker.current_batch_len() > 0) && Instant::now() < give_up {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.stop();
    Ok(())
}
