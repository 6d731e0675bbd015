//! Tabula Stress Binary
//!
//! Hammers a background writer table with concurrent writers and readers,
//! then checks that the backing table caught up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tabula::{
    BackgroundWriterTable, Config, DataType, FieldFlags, FileTable, JournalSyncStrategy,
    MemoryTable, Row, RowLayout, Search, Table, Value, WriteWaitPolicy,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Tabula stress workload
#[derive(Parser, Debug)]
#[command(name = "tabula-stress")]
#[command(about = "Concurrent workload against a background writer table")]
#[command(version)]
struct Args {
    /// Writer threads
    #[arg(short, long, default_value = "4")]
    writers: usize,

    /// Reader threads
    #[arg(short, long, default_value = "4")]
    readers: usize,

    /// Rows inserted per writer thread
    #[arg(short, long, default_value = "10000")]
    inserts: usize,

    /// Journal file for a durable backing table (in-memory backing if absent)
    #[arg(short, long)]
    journal: Option<PathBuf>,

    /// Max transactions per writer batch
    #[arg(short, long, default_value = "256")]
    batch_size: usize,

    /// Writer spin timeout in milliseconds (0 blocks immediately)
    #[arg(short, long, default_value = "100")]
    spin_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tabula=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Tabula stress v{}", tabula::VERSION);
    tracing::info!(
        "{} writers x {} inserts, {} readers",
        args.writers,
        args.inserts,
        args.readers
    );

    if let Err(e) = run(&args) {
        tracing::error!("Stress run failed: {}", e);
        std::process::exit(1);
    }
}

fn layout() -> tabula::Result<Arc<RowLayout>> {
    let layout = RowLayout::builder("items")
        .id("id")
        .field_with("name", DataType::Text, FieldFlags::UNIQUE)
        .field_with("worker", DataType::Int, FieldFlags::INDEX)
        .field("qty", DataType::Int)
        .build()?;
    Ok(Arc::new(layout))
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let wait = if args.spin_ms == 0 {
        WriteWaitPolicy::blocking()
    } else {
        WriteWaitPolicy::spin(Duration::from_millis(args.spin_ms))
    };
    let config = Config::builder()
        .write_wait(wait)
        .writer_batch_size(args.batch_size)
        .journal_sync(JournalSyncStrategy::EveryNEntries { count: 1000 })
        .build();
    config.validate()?;

    let layout = layout()?;
    let backing: Arc<dyn Table> = match &args.journal {
        Some(path) => {
            tracing::info!("Journal: {}", path.display());
            Arc::new(FileTable::open(path, Arc::clone(&layout), &config)?)
        }
        None => Arc::new(MemoryTable::with_config(Arc::clone(&layout), &config)),
    };
    let start_rows = backing.count()?;
    let table = BackgroundWriterTable::with_config(Arc::clone(&backing), &config)?;

    let done = AtomicBool::new(false);
    let reads = AtomicU64::new(0);
    let started = Instant::now();

    let outcome = crossbeam::thread::scope(|scope| {
        for reader in 0..args.readers {
            let (table, done, reads) = (&table, &done, &reads);
            scope.spawn(move |_| {
                let search = Search::equals("worker", (reader % args.writers.max(1)) as i64);
                while !done.load(Ordering::Relaxed) {
                    if table.count_where(&search).is_ok() {
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        let writers: Vec<_> = (0..args.writers)
            .map(|worker| {
                let table = &table;
                scope.spawn(move |_| write_rows(table, worker, args.inserts, start_rows))
            })
            .collect();

        let results: Vec<_> = writers.into_iter().map(|handle| handle.join()).collect();
        done.store(true, Ordering::Relaxed);
        results
    });

    let results = outcome.map_err(|_| "a reader thread panicked")?;
    for result in results {
        result.map_err(|_| "a writer thread panicked")??;
    }

    let accepted = started.elapsed();
    table.flush()?;
    let durable = started.elapsed();

    let stats = table.writer_stats();
    tracing::info!(
        "Accepted {} rows in {:?}, durable after {:?}",
        table.count()?,
        accepted,
        durable
    );
    tracing::info!("{} reads during the run", reads.load(Ordering::Relaxed));
    tracing::info!(
        "Writer: {} written, {} requeued, {} dropped, {} failed batches",
        stats.written,
        stats.requeued,
        stats.dropped,
        stats.failures
    );

    let expected = start_rows + args.writers * args.inserts;
    let memory_rows = table.count()?;
    let backing_rows = backing.count()?;
    if memory_rows != expected || backing_rows != expected {
        tracing::warn!(
            "Row counts differ: expected {}, memory {}, backing {}",
            expected,
            memory_rows,
            backing_rows
        );
    } else {
        tracing::info!("Memory and backing agree on {} rows", backing_rows);
    }

    table.close()?;
    Ok(())
}

/// Insert rows for one worker, then bump every third row's quantity.
///
/// `run` keeps names unique when an existing journal is reused.
fn write_rows(table: &BackgroundWriterTable, worker: usize, count: usize, run: usize) -> tabula::Result<()> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let row = Row::new(vec![
            Value::Int(0),
            Value::Text(format!("r{}-w{}-{}", run, worker, n)),
            Value::Int(worker as i64),
            Value::Int(n as i64),
        ]);
        let row = table.insert(row)?;
        ids.push(table.layout().row_id(&row)?);
    }

    for id in ids.iter().step_by(3) {
        let row = table.get_row(*id)?;
        let qty = row.value(3).and_then(Value::as_int).unwrap_or(0);
        table.update(row.with_value(3, Value::Int(qty + 1)))?;
    }
    Ok(())
}
