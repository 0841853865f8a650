use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use ogr_repo::{
    AggregateFunction, AggregateRequest, Executor, FetchableModel, LiveStream, ObjectRef,
    Repository, RepositoryError, Store, TransactionAuthor,
};

use crate::cli::*;
use crate::movie::{catalogue, schema, Movie};

const LIVE_WAIT: Duration = Duration::from_secs(2);

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Demo(args) => cmd_demo(args).await,
        Command::Bench(args) => cmd_bench(args, cli.format).await,
    }
}

fn open() -> anyhow::Result<Repository> {
    let executor = Executor::current().context("no async runtime")?;
    Ok(Repository::in_memory(schema()?, executor))
}

async fn next_count(stream: &mut LiveStream<usize>) -> anyhow::Result<usize> {
    match tokio::time::timeout(LIVE_WAIT, stream.next()).await {
        Ok(Some(result)) => Ok(result?),
        Ok(None) => bail!("live count ended"),
        Err(_) => bail!("live count did not update"),
    }
}

/// Read live counts until `expected` shows up.
async fn wait_for_count(stream: &mut LiveStream<usize>, expected: usize) -> anyhow::Result<()> {
    loop {
        let count = next_count(stream).await?;
        println!("  {} {}", "live count:".cyan(), count.to_string().bold());
        if count == expected {
            return Ok(());
        }
    }
}

// ---- demo ----

async fn cmd_demo(args: DemoArgs) -> anyhow::Result<()> {
    if args.items < 1 {
        bail!("--items must be at least 1");
    }
    let repo = open()?;
    let author = args.author.map(TransactionAuthor::new);
    let all = Movie::fetch_request()?;

    println!("{} Opened in-memory repository", "✓".green().bold());
    println!("  Store: {}", repo.store().store_id().to_string().cyan());

    let mut live = repo.count_subscription(all.clone());
    wait_for_count(&mut live, 0).await?;

    let created = repo
        .create_atomically(&catalogue(args.items), author.clone())
        .await?;
    println!("{} Created {} movies in one scratchpad", "✓".green().bold(), created.len());
    for movie in &created {
        println!("  {} {} ({})", movie.encoded().dimmed(), movie.title, movie.year);
    }
    wait_for_count(&mut live, created.len()).await?;

    let first = &created[0];
    let by_id: Movie = repo.read_by_id::<Movie>(first.id).await?;
    let by_encoded: Movie = repo.read_by_encoded(&first.encoded()).await?;
    println!(
        "{} Read back {} by id and by encoded reference",
        "✓".green().bold(),
        by_id.title.yellow()
    );
    if by_id != by_encoded {
        bail!("reads by id and by reference disagree");
    }

    let mut renamed = by_id.clone();
    renamed.year += 1;
    let updated = repo.update(&renamed, author.clone()).await?;
    println!("{} Updated {} to {}", "✓".green().bold(), updated.title.yellow(), updated.year);

    let duplicate = Movie::new(first.id, "Duplicate", 2000);
    match repo.create(&duplicate, author.clone()).await {
        Err(RepositoryError::ConstraintViolation { reason, .. }) => {
            println!("{} Duplicate id rejected: {}", "✓".green().bold(), reason.dimmed());
        }
        Err(other) => return Err(other.into()),
        Ok(_) => bail!("duplicate id was accepted"),
    }

    repo.delete(&updated, author.clone()).await?;
    println!("{} Deleted {}", "✓".green().bold(), updated.title.yellow());
    wait_for_count(&mut live, created.len() - 1).await?;

    match repo.read(&updated).await {
        Err(RepositoryError::NotFound) => println!("  {} deleted movie is gone", "·".dimmed()),
        other => bail!("unexpected read after delete: {other:?}"),
    }

    let average = AggregateRequest::new(AggregateFunction::Average, all, "year");
    let average = repo.aggregate(&average).await?;
    println!("  {} {}", "average year:".cyan(), average);

    live.cancel();
    println!("{} Live count cancelled", "✓".green().bold());
    info!(contexts = repo.arena().len(), "demo finished");
    Ok(())
}

// ---- bench ----

#[derive(Debug, Serialize)]
struct BenchReport {
    scale: usize,
    samples: usize,
    create_ms: f64,
    read_by_ref_ms: f64,
    fetch_by_id_ms: f64,
    delete_ms: f64,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

async fn cmd_bench(args: BenchArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.scale == 0 {
        bail!("--scale must be at least 1");
    }
    let repo = open()?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let started = Instant::now();
    let created = repo
        .create_atomically(&catalogue(args.scale as i64), None)
        .await?;
    let create_ms = millis(started.elapsed());
    let refs: Vec<ObjectRef> = created.iter().filter_map(|m| m.reference.clone()).collect();

    let started = Instant::now();
    for _ in 0..args.samples {
        if let Some(reference) = refs.choose(&mut rng) {
            repo.read_by_ref::<Movie>(reference).await?;
        }
    }
    let read_by_ref_ms = millis(started.elapsed());

    let started = Instant::now();
    for _ in 0..args.samples {
        let id = rng.gen_range(0..args.scale as i64);
        repo.read_by_id::<Movie>(id).await?;
    }
    let fetch_by_id_ms = millis(started.elapsed());

    let started = Instant::now();
    repo.delete_atomically_by_refs(&refs, None).await?;
    let delete_ms = millis(started.elapsed());

    let remaining = repo.count(&Movie::fetch_request()?).await?;
    if remaining != 0 {
        bail!("{remaining} movies survived the delete");
    }

    let report = BenchReport {
        scale: args.scale,
        samples: args.samples,
        create_ms,
        read_by_ref_ms,
        fetch_by_id_ms,
        delete_ms,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &BenchReport) {
    println!(
        "{} scale {} ({} samples per read phase)",
        "bench".bold(),
        report.scale.to_string().yellow(),
        report.samples
    );
    let rows = [
        ("batch create", report.create_ms),
        ("read by reference", report.read_by_ref_ms),
        ("fetch by id", report.fetch_by_id_ms),
        ("batch delete", report.delete_ms),
    ];
    for (label, ms) in rows {
        println!("  {:<20} {:>10.2} ms", label, ms);
    }
    info!(scale = report.scale, "bench finished");
}
