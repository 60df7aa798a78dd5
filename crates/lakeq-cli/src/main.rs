//! lakeq CLI: compile, inspect, and run query documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lakeq_compiler::dsl::yaml::parse_ast_file;
use lakeq_core::ast;
use lakeq_core::config::CompilerConfig;
use lakeq_core::error::{Error, Result};
use lakeq_core::hash::hash_serde;
use lakeq_core::lake::{DataAdaptor, Head};
use lakeq_io::readers::JsonlReader;
use lakeq_io::{LakeFixture, MemoryLake};
use lakeq_kernel::Runtime;
use lakeq_operators::Parent;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lakeq")]
#[command(about = "lakeq: query compiler and runtime for data lakes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Replica count for parallelized pool scans (overrides LAKEQ_PARALLELISM)
    #[arg(long, global = true)]
    parallelism: Option<usize>,

    /// Rows per scan batch (overrides LAKEQ_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query document and print the requested stages
    Compile {
        /// Query document (.yaml, .yml, or .json)
        file: PathBuf,

        /// Print the query as text
        #[arg(short = 'C')]
        canon: bool,

        /// Print the analyzed DAG
        #[arg(long)]
        dag: bool,

        /// Print the optimized DAG
        #[arg(short = 'O')]
        optimized: bool,

        /// Print the DAG parallelized N ways
        #[arg(short = 'P', value_name = "N")]
        parallel: Option<usize>,

        /// Lake fixture used to resolve pools (empty lake if omitted)
        #[arg(long)]
        lake: Option<PathBuf>,

        /// Current pool for HEAD references, as pool[@branch]
        #[arg(long = "use", value_name = "POOL[@BRANCH]")]
        head: Option<String>,
    },

    /// Run a query against a lake fixture and print each output as JSON lines
    Run {
        /// Query document (.yaml, .yml, or .json)
        file: PathBuf,

        /// Lake fixture (JSON)
        #[arg(long)]
        lake: PathBuf,

        /// JSON-lines file feeding the query's default input
        #[arg(long)]
        input: Option<PathBuf>,

        /// Current pool for HEAD references, as pool[@branch]
        #[arg(long = "use", value_name = "POOL[@BRANCH]")]
        head: Option<String>,
    },

    /// Run a `delete where` query against a lake fixture and report what changed
    Delete {
        /// Query document (.yaml, .yml, or .json)
        file: PathBuf,

        /// Lake fixture (JSON)
        #[arg(long)]
        lake: PathBuf,
    },

    /// Check that a query document parses and analyzes
    Validate {
        /// Query document (.yaml, .yml, or .json)
        file: PathBuf,

        /// Lake fixture used to resolve pools (empty lake if omitted)
        #[arg(long)]
        lake: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match config_from(&cli) {
        Ok(c) => c,
        Err(e) => fail(e),
    };

    let result = match cli.command {
        Commands::Compile {
            file,
            canon,
            dag,
            optimized,
            parallel,
            lake,
            head,
        } => {
            let stages = Stages {
                canon,
                dag,
                optimized,
                parallel,
            };
            compile_query(&file, lake.as_deref(), head.as_deref(), &stages, config)
        }
        Commands::Run {
            file,
            lake,
            input,
            head,
        } => run_query(&file, &lake, input.as_deref(), head.as_deref(), config),
        Commands::Delete { file, lake } => delete_query(&file, &lake, config),
        Commands::Validate { file, lake } => validate_query(&file, lake.as_deref(), config)
            .map(|()| println!("✓ Query is valid")),
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: Error) -> ! {
    eprintln!("Error: {}", e);
    for hint in e.suggestions() {
        eprintln!("  hint: {}", hint);
    }
    std::process::exit(1);
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_from(cli: &Cli) -> Result<CompilerConfig> {
    let mut config = CompilerConfig::from_env();
    if let Some(n) = cli.parallelism {
        config.parallelism = n;
    }
    if let Some(n) = cli.batch_size {
        config.batch_size = n;
    }
    config.validate()?;
    Ok(config)
}

struct Stages {
    canon: bool,
    dag: bool,
    optimized: bool,
    parallel: Option<usize>,
}

impl Stages {
    fn none(&self) -> bool {
        !self.canon && !self.dag && !self.optimized && self.parallel.is_none()
    }
}

fn load_query(path: &Path) -> Result<ast::Seq> {
    parse_ast_file(path).map_err(|e| e.with_context(path.display().to_string()))
}

fn load_lake(path: Option<&Path>, config: &CompilerConfig) -> Result<Arc<dyn DataAdaptor>> {
    let lake = match path {
        Some(p) => {
            let name = p.display().to_string();
            LakeFixture::from_path(&name)
                .and_then(|fx| fx.build(config.batch_size))
                .map_err(|e| e.into_core(name))?
        }
        None => MemoryLake::new().with_batch_size(config.batch_size),
    };
    Ok(Arc::new(lake))
}

/// `pool` or `pool@branch`; the branch defaults to main.
fn parse_head(text: &str) -> Head {
    match text.split_once('@') {
        Some((pool, branch)) => Head::new(pool, branch),
        None => Head::new(text, "main"),
    }
}

fn runtime(
    lake: Arc<dyn DataAdaptor>,
    head: Option<&str>,
    config: CompilerConfig,
) -> Result<Runtime> {
    let rt = Runtime::new(lake, config)?;
    Ok(match head {
        Some(h) => rt.with_head(parse_head(h)),
        None => rt,
    })
}

fn compile_query(
    path: &Path,
    lake: Option<&Path>,
    head: Option<&str>,
    stages: &Stages,
    mut config: CompilerConfig,
) -> Result<()> {
    let query = load_query(path)?;
    if stages.canon {
        println!("{}", ast::seq_text(&query));
    }

    // Parallelization is printed on its own when asked for.
    config.parallelism = stages.parallel.unwrap_or(1);
    let adaptor = load_lake(lake, &config)?;
    let rt = runtime(adaptor, head, config)?;

    let analyzed = rt.analyze(&query)?;
    if stages.dag {
        println!("{}", analyzed);
    }
    let optimized = rt.optimize(analyzed)?;
    if stages.optimized || stages.none() {
        println!("{}", optimized);
    }
    let last = match stages.parallel {
        Some(_) => {
            let parallel = rt.parallelize(optimized)?;
            println!("{}", parallel);
            parallel
        }
        None => optimized,
    };
    println!("Plan hash: {}", hash_serde(&last)?.to_hex());
    Ok(())
}

fn run_query(
    path: &Path,
    lake: &Path,
    input: Option<&Path>,
    head: Option<&str>,
    config: CompilerConfig,
) -> Result<()> {
    let query = load_query(path)?;
    let batch_size = config.batch_size;
    let adaptor = load_lake(Some(lake), &config)?;
    let rt = runtime(adaptor, head, config)?;

    let mut readers: Vec<Parent> = Vec::new();
    if let Some(p) = input {
        let name = p.display().to_string();
        let reader = JsonlReader::from_path(&name)
            .map_err(|e| e.into_core(name))?
            .with_batch_size(batch_size);
        readers.push(Box::new(reader));
    }

    let report = rt.run(&query, readers)?;
    let labeled = report.outputs.len() > 1;
    for (name, rows) in &report.outputs {
        if labeled {
            println!("# {}", name);
        }
        for row in rows {
            println!("{}", row.to_json());
        }
    }
    let total: usize = report.rows.values().sum();
    eprintln!("✓ Query executed successfully");
    eprintln!("  Rows: {}", total);
    eprintln!(
        "  Duration: {}ms",
        report.finished_ms.saturating_sub(report.started_ms)
    );
    eprintln!("  Plan hash: {}", report.plan_hash);
    Ok(())
}

fn delete_query(path: &Path, lake: &Path, config: CompilerConfig) -> Result<()> {
    let query = load_query(path)?;
    let adaptor = load_lake(Some(lake), &config)?;
    let rt = runtime(adaptor, None, config)?;
    let report = rt.delete(&query)?;
    match &report.commit {
        Some(commit) => {
            println!("✓ Deleted from {} objects", report.objects.len());
            println!("  Branch: {}", report.branch);
            println!("  Commit: {}", commit);
            println!("  Rows kept: {}", report.kept);
        }
        None => println!("✓ No rows matched; nothing committed"),
    }
    Ok(())
}

fn validate_query(path: &Path, lake: Option<&Path>, config: CompilerConfig) -> Result<()> {
    let query = load_query(path)?;
    let adaptor = load_lake(lake, &config)?;
    let rt = runtime(adaptor, None, config)?;
    rt.analyze(&query)?;
    Ok(())
}
