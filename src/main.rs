use std::path::PathBuf;

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use colored::Colorize;
use indoc::indoc;
use kelpc::{CompileOptions, compile, frontend::SourceFile, middle::graph::pretty_print::pretty_print_graph};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None, after_help = indoc! {"
    Each file is compiled on its own. The exit status is 1 if any file
    fails to parse or has type errors.

    Set RUST_LOG to override the log filter, e.g. RUST_LOG=kelpc=trace.
"})]
pub struct Args {
    source_files: Vec<PathBuf>,

    /// Skip the whole-graph passes and print the graph as constructed
    #[arg(long)]
    no_optimize: bool,

    /// Do not move loads and stores along the memory chain
    #[arg(long)]
    no_reorder: bool,

    /// Keep locals whose address is never taken as SSA values
    #[arg(long)]
    promote_locals: bool,

    /// Upper bound on reorder/peephole rounds
    #[arg(long, default_value_t = 8)]
    max_rounds: usize,

    /// Print the finished graph
    #[arg(long)]
    dump: bool,

    #[arg(long)]
    no_color: bool,

    /// Log construction and optimization progress
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> CompileOptions {
        CompileOptions {
            optimize: !self.no_optimize,
            reorder_memory: !self.no_reorder,
            peephole: true,
            max_peephole_rounds: self.max_rounds,
            promote_locals: self.promote_locals,
        }
    }
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "kelpc=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.no_color {
        colored::control::set_override(false);
    }

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let options = args.options();
    let mut failed = false;

    for path in &args.source_files {
        let source = match SourceFile::load(path) {
            Ok(source) => source,
            Err(error) => {
                eprintln!("{} {error}", "error:".red().bold());
                failed = true;
                continue;
            }
        };

        let compilation = match compile(&source, &options) {
            Ok(compilation) => compilation,
            Err(error) => {
                eprintln!("{} {}", "error:".red().bold(), error.render(&source));
                failed = true;
                continue;
            }
        };

        for diagnostic in &compilation.diagnostics {
            eprintln!("{} {}", "error:".red().bold(), diagnostic.render(&source));
        }

        failed |= compilation.has_errors();
        debug!(stats = ?compilation.stats, "finished {}", source.origin);

        if args.dump {
            let dump = pretty_print_graph(compilation.graph.view());

            if args.no_color {
                println!("{}", strip_ansi_escapes::strip_str(dump));
            } else {
                println!("{dump}");
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
