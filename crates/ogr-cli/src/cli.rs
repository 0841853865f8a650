use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ogr",
    about = "Object graph repository: scratchpad transactions and live queries",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Walk through create, read, live count and delete on an in-memory store
    Demo(DemoArgs),
    /// Time batch create, reads and delete over an in-memory store
    Bench(BenchArgs),
}

#[derive(Args)]
pub struct DemoArgs {
    /// Number of movies to create
    #[arg(short = 'n', long, default_value = "5")]
    pub items: i64,
    /// Transaction author tag for the demo's mutations
    #[arg(long)]
    pub author: Option<String>,
}

#[derive(Args)]
pub struct BenchArgs {
    /// Number of objects to create
    #[arg(long, default_value = "1000")]
    pub scale: usize,
    /// Number of random single-object reads per read phase
    #[arg(long, default_value = "100")]
    pub samples: usize,
    /// Seed for picking read targets
    #[arg(long)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bench_scale() {
        let cli = Cli::try_parse_from(["ogr", "bench", "--scale", "50", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Bench(args) => {
                assert_eq!(args.scale, 50);
                assert_eq!(args.samples, 100);
            }
            Command::Demo(_) => panic!("expected bench"),
        }
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::try_parse_from(["ogr", "demo", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Demo(args) => {
                assert_eq!(args.items, 5);
                assert!(args.author.is_none());
            }
            Command::Bench(_) => panic!("expected demo"),
        }
    }
}
