use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use todolist::config::{Config, DEFAULT_FILE};
use todolist::logging::{init_logging, level_for};
use todolist::{CrosstermTerminal, Editor, FileRepository, ItemList, TaskRepository, format_list};

#[derive(Debug, Parser)]
#[command(
    name = "todolist",
    about = "Full-screen modal editor for a plain-text todo list",
    version
)]
struct Cli {
    /// Todo file to open; created on first save.
    #[arg(default_value = DEFAULT_FILE)]
    file: PathBuf,
    /// Start with auto-save turned off (toggle in the editor with `a`).
    #[arg(long)]
    no_autosave: bool,
    /// Enable verbose logging for debugging.
    #[arg(long)]
    verbose: bool,
    /// Write rotating log files into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Print the list in the given format and exit instead of opening the editor.
    #[arg(long, value_enum)]
    print: Option<PrintFormat>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PrintFormat {
    Json,
    Text,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            path: self.file.clone(),
            autosave: !self.no_autosave,
            log_level: level_for(self.verbose),
            log_dir: self.log_dir.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    if let Some(dir) = &config.log_dir {
        init_logging(config.log_level, dir)?;
    }

    let repository = FileRepository::new(&config.path);
    let items = repository
        .load()
        .with_context(|| format!("loading {:?}", config.path))?;

    match cli.print {
        Some(format) => handle_print(&items, format),
        None => handle_edit(&config, items, &repository),
    }
}

fn handle_print(items: &ItemList, format: PrintFormat) -> Result<()> {
    print!("{}", render_listing(items, format)?);
    Ok(())
}

fn render_listing(items: &ItemList, format: PrintFormat) -> Result<String> {
    match format {
        PrintFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(items)?)),
        PrintFormat::Text => Ok(format_list(items)),
    }
}

fn handle_edit(config: &Config, items: ItemList, repository: &FileRepository) -> Result<()> {
    info!(
        "event=session_start module=main path={} items={} autosave={}",
        config.path.display(),
        items.len(),
        config.autosave
    );
    let mut editor = Editor::new(items, config.display_name(), config.autosave);
    let mut terminal = CrosstermTerminal::enter()?;
    todolist::run(&mut editor, &mut terminal, repository)
}
