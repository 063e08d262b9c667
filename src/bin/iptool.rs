//! iptool: compile IPv4 range databases and query them.

use clap::{Parser, Subcommand};
use iptool::{BuildManifest, Database};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "iptool")]
#[command(version)]
#[command(about = "Compile and query IPv4 range databases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a database from a YAML build manifest
    Compile {
        /// Build manifest
        #[arg(short, long)]
        manifest: PathBuf,

        /// Output database file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Look up the range containing an address
    Find {
        /// Database file
        #[arg(short, long)]
        db: PathBuf,

        /// IPv4 address in dotted-quad form
        address: String,
    },

    /// Show database metadata
    About {
        /// Database file
        #[arg(short, long)]
        db: PathBuf,
    },

    /// Print every stored row of a register
    Dump {
        /// Database file
        #[arg(short, long)]
        db: PathBuf,

        /// Register name
        #[arg(short, long)]
        register: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile { manifest, output } => compile(&manifest, &output),
        Commands::Find { db, address } => {
            Database::open(&db).and_then(|db| print_json(&db.find_str(&address)?))
        }
        Commands::About { db } => Database::open(&db).and_then(|db| print_json(&db.about()?)),
        Commands::Dump { db, register } => {
            Database::open(&db).and_then(|db| print_json(&db.dump_register(&register)?))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn compile(manifest_path: &Path, output: &Path) -> iptool::Result<()> {
    let manifest = BuildManifest::from_path(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let compiler = manifest.into_compiler(base_dir)?;
    let report = compiler.compile(output)?;

    println!("Compiled {}", output.display());
    println!("  Range records: {}", report.record_count);
    for (name, items) in &report.register_items {
        println!("  Register {}: {} rows", name, items);
    }
    println!("  Size: {} bytes", report.file_size);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> iptool::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    println!("{}", json);
    Ok(())
}
