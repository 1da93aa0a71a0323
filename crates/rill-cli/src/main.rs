//! `rill` -- command-line shell over the rill SQL engine.
//!
//! Opens a data directory, executes SQL from the command line or an
//! interactive prompt, and renders results as tables or JSON.

mod output;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};

use rill_engine::Database;

/// Set once Ctrl+C has been received; the shell exits at the next prompt.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "rill", about = "An embedded SQL database", version)]
struct Cli {
    /// Data directory holding the databases.
    #[arg(long, global = true, default_value = "./data", env = "RILL_DATA_DIR")]
    data_dir: PathBuf,

    /// Database to open.
    #[arg(long, global = true, default_value = "main")]
    database: String,

    /// Emit results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one or more SQL statements and print the results.
    Exec {
        /// SQL text; statements separated by semicolons.
        sql: String,
    },
    /// Start an interactive SQL shell.
    Shell,
    /// List tables in the current database.
    Tables,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("rill=debug")
            .with_writer(io::stderr)
            .init();
    }

    let _ = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
    });

    let result = match &cli.command {
        Some(Commands::Exec { sql }) => run_exec(&cli, sql),
        Some(Commands::Shell) | None => run_shell(&cli),
        Some(Commands::Tables) => run_tables(&cli),
    };

    if let Err(e) = result {
        if cli.json {
            let err = serde_json::json!({ "error": format!("{e:#}") });
            eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

fn open_database(cli: &Cli) -> anyhow::Result<Database> {
    Database::open_database(&cli.data_dir, &cli.database)
        .with_context(|| format!("opening {} in {}", cli.database, cli.data_dir.display()))
}

fn run_exec(cli: &Cli, sql: &str) -> anyhow::Result<()> {
    let mut db = open_database(cli)?;
    let mut failed = false;
    for result in db.query_multiple(sql) {
        failed |= !result.success;
        print!("{}", output::render(&result, cli.json));
    }
    if failed {
        anyhow::bail!("one or more statements failed");
    }
    Ok(())
}

fn run_tables(cli: &Cli) -> anyhow::Result<()> {
    let db = open_database(cli)?;
    for table in db.list_tables() {
        println!("{table}");
    }
    Ok(())
}

fn run_shell(cli: &Cli) -> anyhow::Result<()> {
    let mut db = open_database(cli)?;
    let stdin = io::stdin();
    let mut buffer = String::new();

    eprintln!("rill shell -- database {}; end statements with ;", cli.database);
    loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            break;
        }
        let prompt = if buffer.is_empty() { "rill> " } else { "   -> " };
        eprint!("{prompt}");
        io::stderr().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let trimmed = line.trim();
        if buffer.is_empty() && matches!(trimmed, "exit" | "quit" | r"\q") {
            break;
        }
        buffer.push_str(&line);

        // Execute once the buffer holds at least one full statement.
        if trimmed.ends_with(';') {
            for result in db.query_multiple(&buffer) {
                print!("{}", output::render(&result, cli.json));
            }
            buffer.clear();
        }
    }
    Ok(())
}
