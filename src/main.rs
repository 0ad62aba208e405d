mod app;
mod config;
mod document;
mod filter;
mod highlight;
mod input;
mod logging;
mod markdown;
mod notice;
mod query;
mod theme;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "marksift", version, about = "Search-as-you-type markdown reader for the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Markdown file to open
    file: Option<PathBuf>,

    /// Start with this search query
    #[arg(short, long)]
    query: Option<String>,

    /// Print the filtered page to stdout instead of opening the viewer
    #[arg(short, long)]
    print: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the config file in $EDITOR (default: nvim)
    Config,
    /// List available themes
    Themes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        let cfg = config::load_config()?;
        init_logging(&cfg, false);
        return match command {
            Commands::Config => config::open_config_in_editor(),
            Commands::Themes => {
                let manager = theme::ThemeManager::load(&cfg)?;
                for name in manager.theme_names() {
                    let marker = if *name == cfg.theme { "*" } else { " " };
                    println!("{marker} {name}");
                }
                Ok(())
            }
        };
    }

    let file = cli
        .file
        .ok_or_else(|| anyhow::anyhow!("No file provided. Try `marksift <file.md>`."))?;

    let cfg = config::load_config()?;
    init_logging(&cfg, !cli.print);
    log::info!("opening {}", file.display());

    if cli.print {
        app::print_page(&file, cfg, cli.query)
    } else {
        app::run_app(file, cfg, cli.query)
    }
}

fn init_logging(cfg: &config::Config, to_file: bool) {
    if let Err(err) = logging::init(cfg, to_file) {
        eprintln!("marksift: logging disabled: {err:#}");
    }
}
