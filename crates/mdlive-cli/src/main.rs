//! mdlive CLI
//!
//! Offline companion to the mdlive server.
//!
//! # Usage
//!
//! ```bash
//! # Classify one line
//! mdlive classify "- [ ] write docs"
//!
//! # Classify lines interactively
//! mdlive classify
//!
//! # Line diff of two files
//! mdlive diff old.md new.md
//!
//! # Render a file and list its blocks
//! mdlive blocks README.md
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use mdlive_core::{
    classify, compute_line_diff, Block, LineChangeKind, LineKind, MarkdownRenderer, RenderOptions,
    Renderer,
};

/// mdlive Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "mdlive")]
#[command(author, version, about = "mdlive CLI - markdown block and line diff tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a single line, or start an interactive prompt when none is given
    Classify {
        line: Option<String>,
    },

    /// Show the line diff between two files
    Diff {
        old: PathBuf,
        new: PathBuf,
    },

    /// Render a markdown file and list its blocks
    Blocks {
        file: PathBuf,

        /// Maximum file size in bytes
        #[arg(long, env = "MDLIVE_MAX_CONTENT_SIZE", default_value_t = mdlive_core::render::DEFAULT_MAX_CONTENT_SIZE)]
        max_content_size: usize,

        /// Disable tables, strikethrough, task lists and footnotes
        #[arg(long)]
        no_gfm: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Classify { line: Some(line) } => {
            println!("{}", describe_line(&line));
            Ok(())
        }
        Command::Classify { line: None } => classify_repl(),
        Command::Diff { old, new } => diff_files(&old, &new),
        Command::Blocks {
            file,
            max_content_size,
            no_gfm,
        } => list_blocks(
            &file,
            RenderOptions {
                max_content_size,
                gfm: !no_gfm,
            },
        ),
    }
}

fn classify_repl() -> Result<()> {
    println!(
        "{}",
        "mdlive line classifier. Type a line of markdown, 'quit' to exit.".cyan()
    );

    let mut rl = DefaultEditor::new()?;
    loop {
        let prompt = format!("{}> ", "mdlive".green());
        match rl.readline(&prompt) {
            Ok(line) => {
                if matches!(line.trim(), "quit" | "exit") {
                    break;
                }
                let _ = rl.add_history_entry(line.as_str());
                println!("{}", describe_line(&line));
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                break;
            }
        }
    }

    Ok(())
}

/// Coloured classification of one line
fn describe_line(line: &str) -> ColoredString {
    if line.trim().is_empty() {
        return "(blank, no block)".dimmed();
    }
    kind_label(classify(line)).yellow()
}

fn kind_label(kind: LineKind) -> String {
    match kind {
        LineKind::Heading(level) => format!("heading (h{})", level),
        LineKind::Checkbox { checked: true } => "checkbox [x]".to_string(),
        LineKind::Checkbox { checked: false } => "checkbox [ ]".to_string(),
        other => other.block_type().to_string(),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn diff_files(old: &Path, new: &Path) -> Result<()> {
    let old_text = read(old)?;
    let new_text = read(new)?;

    println!("{}", format!("--- {}", old.display()).red());
    println!("{}", format!("+++ {}", new.display()).green());

    for change in compute_line_diff(&old_text, &new_text) {
        let text = format!(
            "{}{:>5} {}",
            diff_prefix(change.kind),
            change.line_number,
            change.content
        );
        match change.kind {
            LineChangeKind::Added => println!("{}", text.green()),
            LineChangeKind::Removed => println!("{}", text.red()),
            LineChangeKind::Unchanged => println!("{}", text.dimmed()),
        }
    }

    Ok(())
}

fn diff_prefix(kind: LineChangeKind) -> char {
    match kind {
        LineChangeKind::Added => '+',
        LineChangeKind::Removed => '-',
        LineChangeKind::Unchanged => ' ',
    }
}

fn list_blocks(path: &Path, options: RenderOptions) -> Result<()> {
    let text = read(path)?;
    let rendered = MarkdownRenderer::new(options)
        .render(&text)
        .with_context(|| format!("Failed to render {}", path.display()))?;

    if rendered.blocks.is_empty() {
        println!("{}", "(no blocks)".dimmed());
        return Ok(());
    }

    for block in rendered.blocks.blocks() {
        print_block(block, 0);
    }
    Ok(())
}

fn print_block(block: &Block, depth: usize) {
    println!(
        "{}{} {}",
        "  ".repeat(depth),
        block.kind.to_string().cyan(),
        block_summary(block).dimmed()
    );
    for child in &block.children {
        print_block(child, depth + 1);
    }
}

fn block_summary(block: &Block) -> String {
    format!(
        "level={} line={} id={}",
        block.level, block.position.line, block.id
    )
}
