//! # ccf CLI Entry Point
//!
//! Parses arguments with clap, loads the manifest and routes to the build,
//! clean and inspection handlers.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ccforge::build::{self, BuildOptions, Builder};
use ccforge::config::{MANIFEST_NAME, Manifest, load_manifest};
use ccforge::graph::{BuildOrder, ProjectGraph};
use ccforge::project::loader::{LoadOptions, Selection, load_projects};
use ccforge::toolchain;
use ccforge::ui::{self, Reporter};

#[derive(Parser)]
#[command(name = "ccf")]
#[command(about = "Parallel, incremental build orchestrator for C/C++ workspaces", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the workspace manifest
    #[arg(long, global = true, default_value = MANIFEST_NAME)]
    manifest: PathBuf,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Clone, Default)]
struct SelectArgs {
    /// Target to build (repeatable)
    #[arg(long = "target")]
    targets: Vec<String>,
    /// Architecture to build (repeatable)
    #[arg(long = "arch")]
    archs: Vec<String>,
    /// Toolchain to build with (gcc, clang, msvc)
    #[arg(long = "toolchain")]
    toolchains: Vec<String>,
    /// Only these projects and what they depend on
    #[arg(short, long = "project")]
    projects: Vec<String>,
}

impl SelectArgs {
    fn selection(&self) -> Selection {
        Selection {
            targets: self.targets.clone(),
            archs: self.archs.clone(),
            toolchains: self.toolchains.clone(),
            projects: self.projects.clone(),
        }
    }
}

#[derive(Args, Clone, Default)]
struct BuildArgs {
    #[command(flatten)]
    select: SelectArgs,
    /// Parallel compile jobs (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Parallel link jobs (default: half the compile jobs)
    #[arg(long)]
    link_jobs: Option<usize>,
    /// Start no new work after the first failure
    #[arg(long)]
    stop_on_error: bool,
    /// Compile every source on its own
    #[arg(long)]
    no_chunks: bool,
    /// One merged unit per language and project
    #[arg(long, conflicts_with = "no_chunks")]
    unity: bool,
    /// Ignore precompiled header settings
    #[arg(long)]
    no_precompile: bool,
    /// Print every compiler and linker command
    #[arg(long)]
    show_commands: bool,
    /// Write compile_commands.json next to the manifest
    #[arg(long)]
    compile_commands: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the selected projects
    Build(BuildArgs),
    /// Clean, then build everything from scratch
    Rebuild(BuildArgs),
    /// Remove objects, caches and outputs of the selected projects
    Clean(SelectArgs),
    /// Print the resolved build order
    Order(SelectArgs),
    /// Generate shell completions
    Completion {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Build(args) => build_command(&cli.manifest, args, false),
        Commands::Rebuild(args) => build_command(&cli.manifest, args, true),
        Commands::Clean(select) => {
            let (_, graph, _) = load_graph(&cli.manifest, &load_options(select, None))?;
            build::clean(graph.projects())?;
            Ok(0)
        }
        Commands::Order(select) => {
            let (_, graph, order) = load_graph(&cli.manifest, &load_options(select, None))?;
            print_order(&graph, &order);
            Ok(0)
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn load_options(select: &SelectArgs, build: Option<&BuildArgs>) -> LoadOptions {
    LoadOptions {
        selection: select.selection(),
        no_chunks: build.is_some_and(|b| b.no_chunks),
        unity: build.is_some_and(|b| b.unity),
        no_precompile: build.is_some_and(|b| b.no_precompile),
    }
}

fn manifest_root(manifest_path: &Path) -> Result<PathBuf> {
    let dir = manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    dir.canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))
}

fn load_graph(manifest_path: &Path, options: &LoadOptions) -> Result<(Manifest, ProjectGraph, BuildOrder)> {
    let manifest = load_manifest(manifest_path)?;
    let root = manifest_root(manifest_path)?;
    let projects = load_projects(&manifest, &root, options, &mut |name: &str| {
        toolchain::detect_by_name(name)
    })?;
    let mut graph = ProjectGraph::new(projects)?;
    let order = graph.finalize();
    for issue in &order.issues {
        println!("{} {}", "!".yellow(), issue);
    }
    Ok((manifest, graph, order))
}

fn build_command(manifest_path: &Path, args: &BuildArgs, rebuild: bool) -> Result<i32> {
    let (manifest, graph, order) = load_graph(manifest_path, &load_options(&args.select, Some(args)))?;
    if graph.projects().is_empty() {
        println!("{} Nothing to build", "!".yellow());
        return Ok(0);
    }
    if rebuild {
        build::clean(graph.projects())?;
    }

    let options = BuildOptions {
        jobs: args.jobs.unwrap_or(manifest.build.jobs),
        link_jobs: args.link_jobs.unwrap_or(manifest.build.link_jobs),
        stop_on_error: args.stop_on_error || manifest.build.stop_on_error,
        recompile_all: rebuild,
        compile_commands: if args.compile_commands {
            Some(manifest_root(manifest_path)?.join("compile_commands.json"))
        } else {
            None
        },
    };
    println!(
        "{} Building {} project(s) with {} jobs",
        "⚡".yellow(),
        graph.projects().len(),
        options.compile_workers()
    );

    let start = std::time::Instant::now();
    let builder = Builder::new(options, Reporter::new(args.show_commands));
    install_interrupt_handler(builder.interrupt_flag())?;
    let report = builder.build(graph, &order)?;
    report.print_summary();
    println!(
        "   {} Finished in {:.2}s",
        "⏱".dimmed(),
        start.elapsed().as_secs_f64()
    );
    Ok(report.exit_code())
}

/// The first Ctrl-C lets running compilers and linkers finish and stops new
/// work; a second one exits at once.
fn install_interrupt_handler(flag: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(2);
        }
        eprintln!("{} Interrupted, waiting for running jobs", "!".yellow());
    })
    .context("Failed to install Ctrl-C handler")
}

fn print_order(graph: &ProjectGraph, order: &BuildOrder) {
    let mut table = ui::Table::new(&["#", "Project", "Type", "Links"]);
    for (pos, &i) in order.order.iter().enumerate() {
        let project = &graph.projects()[i];
        let links: Vec<&str> = project
            .reconciled_link_depends
            .iter()
            .map(|k| k.name.as_str())
            .collect();
        table.add_row(vec![
            (pos + 1).to_string(),
            project.key.to_string().bold().to_string(),
            project.project_type.to_string(),
            links.join(", "),
        ]);
    }
    table.print();
}
