use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use metamorph::exif::{DecodeOutcome, Metadata, MetadataCodec, Rating};
use metamorph::{config, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "metamorph",
    version,
    about = "Edit the searchable EXIF metadata of JPEG photos: titles, keywords, ratings and Windows XP tags"
)]
struct Cli {
    /// JPEG files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Preview changes without writing to files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display the metadata of the image(s) and exit
    #[arg(long)]
    show: bool,

    /// Remove the EXIF segment from the image(s)
    #[arg(long)]
    clear: bool,

    /// Ask the configured AI service for title, subject, description and keywords
    #[arg(long)]
    suggest: bool,

    /// Write edited copies here, named after their title, instead of in place
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    subject: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    artist: Option<String>,

    #[arg(long)]
    copyright: Option<String>,

    #[arg(long)]
    software: Option<String>,

    /// Star rating, as a number (1-5) or star glyphs
    #[arg(long)]
    rating: Option<Rating>,

    /// Keywords separated by commas or semicolons
    #[arg(long)]
    keywords: Option<String>,

    /// Capture date, "YYYY:MM:DD HH:MM:SS" (default: now)
    #[arg(long)]
    date_time: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Metadata {
        Metadata {
            title: self.title.clone(),
            subject: self.subject.clone(),
            rating: self.rating,
            description: self.description.clone(),
            artist: self.artist.clone(),
            copyright: self.copyright.clone(),
            software: self.software.clone(),
            date_time: self.date_time.clone(),
            user_comment: self.keywords.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if let Some(ref dir) = cli.out_dir {
        config.output.out_dir = Some(dir.to_string_lossy().into_owned());
    }
    let codec = MetadataCodec::from_config(&config.codec);

    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No JPEG files found in the specified paths.");
    }

    // Handle --show
    if cli.show {
        let mut shown = Vec::new();
        for image_path in &images {
            let outcome = pipeline::inspect_image(image_path, &codec)?;
            if cli.json {
                shown.push(serde_json::json!({
                    "path": image_path.display().to_string(),
                    "metadata": decoded_metadata(&outcome),
                    "malformed_fields": malformed_fields(&outcome),
                }));
            } else {
                print_metadata(image_path, &outcome);
            }
        }
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        return Ok(());
    }

    let options = pipeline::ProcessOptions {
        suggest: cli.suggest,
        clear: cli.clear,
        overrides: cli.overrides(),
    };

    log::info!("Found {} image(s) to process", images.len());
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let services = if options.suggest {
        let services = pipeline::build_service_chain(&config);
        if services.is_empty() {
            anyhow::bail!(
                "No AI service configured. Run `metamorph --init` to create a config file, then add your Gemini API key."
            );
        }
        let names: Vec<&str> = services.iter().map(|s| s.name()).collect();
        log::info!("AI chain: {}", names.join(" → "));
        services
    } else {
        Vec::new()
    };

    let mut results = Vec::new();
    let total = images.len();

    for (i, image_path) in images.iter().enumerate() {
        log::info!(
            "[{}/{}] Processing: {}",
            i + 1,
            total,
            image_path.display()
        );

        let result = pipeline::process_image(image_path, &services, &codec, &options, &config).await;

        if let Some(ref err) = result.error {
            log::error!("  Error: {err}");
        } else {
            if let Some(ref service) = result.ai_service_used {
                log::info!("  AI service: {service}");
            }
            if !result.malformed_fields.is_empty() {
                log::info!("  Unreadable: {}", result.malformed_fields.join(", "));
            }
            if config.output.dry_run && !cli.json {
                print_preview(&result);
            }
        }

        results.push(result);
    }

    // JSON output
    if cli.json {
        let json_results: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path.display().to_string(),
                    "output_path": r.output_path.as_ref().map(|p| p.display().to_string()),
                    "ai_service": r.ai_service_used,
                    "suggestion": r.suggestion,
                    "existing": r.existing,
                    "written": r.written,
                    "malformed_fields": r.malformed_fields,
                    "metadata_written": r.metadata_written,
                    "error": r.error,
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    // Summary
    let success = results.iter().filter(|r| r.error.is_none()).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    log::info!("Done: {success} succeeded, {failed} failed out of {total} images");

    Ok(())
}

fn decoded_metadata(outcome: &DecodeOutcome) -> Option<&Metadata> {
    match outcome {
        DecodeOutcome::Decoded { metadata, .. } => Some(metadata),
        DecodeOutcome::Empty(_) => None,
    }
}

fn malformed_fields(outcome: &DecodeOutcome) -> &[&'static str] {
    match outcome {
        DecodeOutcome::Decoded { malformed, .. } => malformed,
        DecodeOutcome::Empty(_) => &[],
    }
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
const LABEL_WIDTH: usize = 22;

/// Rows shown for a metadata record, labelled by field.
fn metadata_rows(m: &Metadata) -> Vec<(&'static str, Option<String>)> {
    vec![
        ("Title", m.title.clone()),
        ("Subject", m.subject.clone()),
        ("Rating", m.rating.map(|r| r.glyphs())),
        ("Description", m.description.clone()),
        ("Artist", m.artist.clone()),
        ("Copyright", m.copyright.clone()),
        ("Software", m.software.clone()),
        ("DateTime", m.date_time.clone()),
        ("Keywords", m.user_comment.clone()),
    ]
}

/// Print the decoded metadata of one file.
fn print_metadata(path: &std::path::Path, outcome: &DecodeOutcome) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let (metadata, malformed) = match outcome {
        DecodeOutcome::Decoded {
            metadata,
            malformed,
        } => (metadata, malformed),
        DecodeOutcome::Empty(reason) => {
            println!("  {DIM}({reason}){RESET}");
            println!();
            return;
        }
    };

    for (tag, val) in metadata_rows(metadata) {
        if let Some(v) = val {
            print_row(tag, &v, RowStyle::Plain);
        }
    }
    for field in malformed {
        print_row(field, "(unreadable)", RowStyle::Muted);
    }
    println!();
}

/// Print existing and new values side by side for dry-run mode.
fn print_preview(result: &pipeline::ProcessResult) {
    let Some(ref written) = result.written else {
        return;
    };

    println!();
    println!("  {BOLD}Metadata:{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(72));

    let before = metadata_rows(&result.existing);
    for ((tag, old), (_, new)) in before.into_iter().zip(metadata_rows(written)) {
        match (old, new) {
            (old, Some(new)) if old.as_deref() != Some(new.as_str()) => {
                print_row(tag, &new, RowStyle::Changed)
            }
            (_, Some(same)) => print_row(tag, &same, RowStyle::Plain),
            (Some(_), None) => print_row(tag, "(removed)", RowStyle::Muted),
            (None, None) => {}
        }
    }

    if let Some(ref out) = result.output_path {
        println!("  {DIM}{}{RESET}", "─".repeat(72));
        print_row("Output", &out.display().to_string(), RowStyle::Plain);
    }
    println!("  {DIM}{}{RESET}", "─".repeat(72));
    println!("  {GREEN}*{RESET} = new value to be written");
    println!();
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RowStyle {
    Plain,
    /// Value that will be written, marked with a trailing `*`.
    Changed,
    Muted,
}

impl RowStyle {
    fn color(self) -> &'static str {
        match self {
            RowStyle::Plain => "",
            RowStyle::Changed => GREEN,
            RowStyle::Muted => DIM,
        }
    }
}

/// One labelled table row; long values continue under the value column.
fn print_row(label: &str, value: &str, style: RowStyle) {
    let color = style.color();
    let reset = if color.is_empty() { "" } else { RESET };
    let lines = wrap_words(value, VAL_WIDTH);
    let last = lines.len() - 1;

    for (i, line) in lines.iter().enumerate() {
        let lead = if i == 0 {
            format!("{label:<LABEL_WIDTH$} : ")
        } else {
            " ".repeat(LABEL_WIDTH + 3)
        };
        let mark = if style == RowStyle::Changed && i == last { " *" } else { "" };
        println!("  {color}{lead}{line}{mark}{reset}");
    }
}

/// Greedy word wrap; a single word longer than `width` gets its own line.
fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        match lines.last_mut() {
            Some(line) if line.chars().count() + 1 + word.chars().count() <= width => {
                line.push(' ');
                line.push_str(word);
            }
            _ => lines.push(word.to_string()),
        }
    }
    if lines.is_empty() {
        lines.push(text.to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_words_breaks_at_width() {
        assert_eq!(wrap_words("ar condicionado boa vista", 15), vec!["ar condicionado", "boa vista"]);
        assert_eq!(wrap_words("manutenção", 4), vec!["manutenção"]);
        assert_eq!(wrap_words("", 10), vec![""]);
    }
}
