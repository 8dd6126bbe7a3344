use clap::{Parser as ClapParser, Subcommand};
use linqtree::cli::{self, CheckOptions, CliError, CompileOptions, CompileResult};
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "linqtree")]
#[command(about = "linqtree - Compile chained lambda queries into backend-neutral expression trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a query from stages and print its tree, or run it over --input
    Compile {
        /// Stages: map:<lambda>, flat_map:<lambda>, filter:<lambda>, annotate:<json object>
        /// (read from stdin, one per line, if not provided)
        stages: Vec<String>,

        /// Capability file declaring shapes and functions
        #[arg(long)]
        shapes: Option<PathBuf>,

        /// Item shape of the root stream, e.g. Event
        #[arg(long)]
        root_shape: Option<String>,

        /// Captured variable as name=<json> (repeatable)
        #[arg(short, long = "capture")]
        captures: Vec<String>,

        /// JSON array to run the query over with the literal executor
        #[arg(short, long)]
        input: Option<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Quote and desugar a single lambda
    Check {
        /// The lambda source
        lambda: String,

        /// Capability file, for its configuration
        #[arg(long)]
        shapes: Option<PathBuf>,

        /// Captured variable as name=<json> (repeatable)
        #[arg(short, long = "capture")]
        captures: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            stages,
            shapes,
            root_shape,
            captures,
            input,
            pretty,
        } => run_compile(stages, shapes, root_shape, captures, input, pretty),
        Commands::Check {
            lambda,
            shapes,
            captures,
        } => run_check(lambda, shapes, captures),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn read_shapes(path: Option<PathBuf>) -> Result<Option<String>, CliError> {
    path.map(std::fs::read_to_string).transpose().map_err(CliError::Io)
}

fn run_compile(
    stages: Vec<String>,
    shapes: Option<PathBuf>,
    root_shape: Option<String>,
    captures: Vec<String>,
    input: Option<String>,
    pretty: bool,
) -> Result<(), CliError> {
    let stages = if stages.is_empty() && !atty::is(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).map_err(CliError::Io)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    } else {
        stages
    };

    let options = CompileOptions {
        stages,
        capabilities: read_shapes(shapes)?,
        root_shape,
        captures,
        input,
    };

    let output = match cli::execute_compile(&options)? {
        CompileResult::Tree(tree) => tree,
        CompileResult::Results(items) => items,
    };
    let json = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }?;
    println!("{}", json);
    Ok(())
}

fn run_check(lambda: String, shapes: Option<PathBuf>, captures: Vec<String>) -> Result<(), CliError> {
    let options = CheckOptions {
        lambda,
        capabilities: read_shapes(shapes)?,
        captures,
    };

    let result = cli::execute_check(&options)?;
    println!("quoted:    {}", result.quoted);
    println!("desugared: {}", result.desugared);
    Ok(())
}
