mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jac", version, about = "Jac — a graph-spatial programming language")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a Jac file
    Run {
        /// Path to the .jac file
        file: PathBuf,
    },
    /// Compile a Jac file and populate the bytecode cache
    Build {
        file: PathBuf,
    },
    /// Type-check a Jac file without generating code
    Check {
        file: PathBuf,
    },
    /// Format a file or directory in place (exit 1 when files changed)
    Format {
        path: PathBuf,
    },
    /// Run test annexes and named test blocks
    Test {
        /// Run only the named test case
        #[arg(short = 't', long)]
        test_name: Option<String>,
        /// Only test files matching this substring
        #[arg(short = 'f', long)]
        filter: Option<String>,
        /// Directory to discover tests in (default: current directory)
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,
        /// Stop at the first failure
        #[arg(short = 'x', long)]
        fail_fast: bool,
    },
    /// Start the API server with client pages
    Start {
        file: PathBuf,
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Watch sources and hot-reload on change
        #[arg(long)]
        watch: bool,
        /// Skip the client bundle
        #[arg(long)]
        no_client: bool,
        /// Print the endpoint catalog instead of serving
        #[arg(long)]
        faux: bool,
    },
    /// Serve the API without client tooling
    Serve {
        file: PathBuf,
        /// Session store directory (default: alongside the file)
        #[arg(long)]
        session: Option<PathBuf>,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Remove generated state
    Clean {
        /// Remove session databases
        #[arg(long)]
        data: bool,
        /// Remove the bytecode cache
        #[arg(long)]
        cache: bool,
        /// Remove downloaded packages
        #[arg(long)]
        packages: bool,
        /// Remove built client bundles
        #[arg(long)]
        client: bool,
        /// Remove everything
        #[arg(long)]
        all: bool,
        /// Do not prompt
        #[arg(long)]
        force: bool,
    },
    /// Inspect and edit jac.toml
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// List installed plugins
    Plugins,
    /// Render the persisted graph as Graphviz dot
    Dot {
        file: PathBuf,
    },
    /// Dump a compiler intermediate form: ast, sym, ir, or unparse
    Ir {
        kind: String,
        file: PathBuf,
    },
    /// Invoke a plugin-contributed tool
    Tool {
        name: String,
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run { file } => commands::build::run(&file),
        Commands::Build { file } => commands::build::build(&file),
        Commands::Check { file } => commands::build::check(&file),
        Commands::Format { path } => commands::fmt::format(&path),
        Commands::Test {
            test_name,
            filter,
            directory,
            fail_fast,
        } => commands::test::run_tests(
            test_name.as_deref(),
            filter.as_deref(),
            directory.as_deref(),
            fail_fast,
        ),
        Commands::Start {
            file,
            port,
            watch,
            no_client,
            faux,
        } => commands::serve::start(&file, port, watch, no_client, faux),
        Commands::Serve {
            file,
            session,
            port,
        } => commands::serve::serve(&file, session.as_deref(), port),
        Commands::Clean {
            data,
            cache,
            packages,
            client,
            all,
            force,
        } => commands::config::clean(data, cache, packages, client, all, force),
        Commands::Config { action } => commands::config::config(action),
        Commands::Plugins => commands::config::plugins(),
        Commands::Dot { file } => commands::build::dot(&file),
        Commands::Ir { kind, file } => commands::build::ir(&kind, &file),
        Commands::Tool { name, args } => commands::config::tool(&name, &args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            ExitCode::FAILURE
        }
    }
}
