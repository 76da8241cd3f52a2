use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::ai::{self, AiService, AiSuggestion};
use crate::config::Config;
use crate::exif::{DecodeOutcome, EncodeOutcome, Metadata, MetadataCodec};

/// Extensions of the files the codec can edit.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Characters that are not allowed in output file names.
const FORBIDDEN_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// What to do with each image besides reading its metadata.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Ask the AI service chain for a suggestion and apply it.
    pub suggest: bool,
    /// Remove the EXIF segment instead of writing a new one.
    pub clear: bool,
    /// Fields to set regardless of what the image or the AI says.
    pub overrides: Metadata,
}

/// The result of processing a single image.
///
/// # Example
///
/// ```rust,no_run
/// # use metamorph::pipeline::{process_image, build_service_chain, ProcessOptions};
/// # use metamorph::config::Config;
/// # use metamorph::exif::MetadataCodec;
/// # async fn example() {
/// # let config = Config::default();
/// # let services = build_service_chain(&config);
/// # let codec = MetadataCodec::from_config(&config.codec);
/// let options = ProcessOptions { suggest: true, ..Default::default() };
/// let result = process_image("photo.jpg".as_ref(), &services, &codec, &options, &config).await;
///
/// if result.error.is_none() {
///     println!("Written to: {:?}", result.output_path);
///     println!("AI service: {:?}", result.ai_service_used);
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct ProcessResult {
    pub path: PathBuf,
    /// Where the edited image went (or would go, in a dry run).
    pub output_path: Option<PathBuf>,
    /// Metadata found in the image before editing.
    pub existing: Metadata,
    /// Metadata that was encoded into the output.
    pub written: Option<Metadata>,
    pub suggestion: Option<AiSuggestion>,
    pub ai_service_used: Option<String>,
    /// Fields present in the image that could not be read.
    pub malformed_fields: Vec<&'static str>,
    pub error: Option<String>,
    /// `true` once the output file has been written to disk.
    pub metadata_written: bool,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            output_path: None,
            existing: Metadata::default(),
            written: None,
            suggestion: None,
            ai_service_used: None,
            malformed_fields: Vec::new(),
            error: None,
            metadata_written: false,
        }
    }
}

/// Collect JPEG files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks).
///
/// # Example
///
/// ```rust,no_run
/// use metamorph::pipeline::collect_images;
/// use std::path::PathBuf;
///
/// let images = collect_images(&[
///     PathBuf::from("photo.jpg"),       // single file
///     PathBuf::from("./photos/"),        // entire directory
/// ]);
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a JPEG extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Create a backup of the original file.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

/// File name for an edited image: its title without characters file
/// systems reject, plus `.jpg`. Falls back to the original file stem, then
/// to `image.jpg`.
pub fn output_file_name(metadata: &Metadata, original: &Path) -> String {
    let clean = |s: &str| {
        s.trim()
            .chars()
            .filter(|c| !FORBIDDEN_FILENAME_CHARS.contains(c))
            .collect::<String>()
            .trim()
            .to_string()
    };

    let from_title = metadata.title.as_deref().map(clean).unwrap_or_default();
    let base = if from_title.is_empty() {
        original
            .file_stem()
            .map(|s| clean(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "image".to_string())
    } else {
        from_title
    };

    format!("{base}.jpg")
}

/// `dir/name`, or `dir/<stem> (n).jpg` with the smallest `n >= 2` that is
/// not taken yet, so edited copies sharing a title never replace each other.
pub fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    (2u32..)
        .map(|n| dir.join(format!("{stem} ({n}).jpg")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Build the AI service failover chain from configuration.
///
/// Services are tried in order during [`process_image`]; if one fails, the
/// next is attempted.
///
/// # Example
///
/// ```rust,no_run
/// use metamorph::config::Config;
/// use metamorph::pipeline::build_service_chain;
///
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
/// let services = build_service_chain(&config);
/// println!("Configured {} AI services", services.len());
/// ```
pub fn build_service_chain(config: &Config) -> Vec<Box<dyn AiService>> {
    let mut services: Vec<Box<dyn AiService>> = Vec::new();

    let gemini = &config.ai.gemini;
    if config.ai_enabled() {
        services.push(Box::new(ai::GeminiService::new(
            gemini.api_key.trim().to_string(),
            gemini.model.clone(),
        )));
    } else if gemini.enabled {
        log::warn!("Gemini enabled but no API key configured");
    }

    services
}

/// Ask each service in turn until one returns a suggestion.
async fn request_suggestion(
    services: &[Box<dyn AiService>],
    image_base64: &str,
) -> Result<(AiSuggestion, String)> {
    if services.is_empty() {
        anyhow::bail!("No AI service configured");
    }

    let mut errors = Vec::new();
    for service in services {
        log::info!("  Trying {}...", service.name());
        match service.suggest(image_base64, "image/jpeg").await {
            Ok(suggestion) => {
                log::info!("  {} succeeded", service.name());
                return Ok((suggestion, service.name().to_string()));
            }
            Err(e) => {
                log::warn!("  {} failed: {e}", service.name());
                errors.push(format!("{}: {e}", service.name()));
            }
        }
    }

    anyhow::bail!("All AI services failed: {}", errors.join("; "))
}

/// Read one image and decode its metadata.
pub fn inspect_image(path: &Path, codec: &MetadataCodec) -> Result<DecodeOutcome> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(codec.decode_outcome(&bytes))
}

/// Process a single image through the full pipeline.
///
/// 1. **Read** the file and decode its existing metadata
/// 2. **Suggest** (optional) by sending the image to the AI service chain
/// 3. **Merge** the suggestion and the overrides over the existing metadata
/// 4. **Encode** a replacement EXIF segment (or remove it, when clearing)
/// 5. **Write** in place with a `.bak` backup, or into `output.out_dir`
///    under a name derived from the title (numbered when already taken)
///
/// Failures are reported in [`ProcessResult::error`]; the original file is
/// left untouched whenever no new image could be produced.
pub async fn process_image(
    path: &Path,
    services: &[Box<dyn AiService>],
    codec: &MetadataCodec,
    options: &ProcessOptions,
    config: &Config,
) -> ProcessResult {
    let mut result = ProcessResult::new(path);

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            result.error = Some(format!("Failed to read file: {e}"));
            return result;
        }
    };

    match codec.decode_outcome(&bytes) {
        DecodeOutcome::Decoded {
            metadata,
            malformed,
        } => {
            for field in &malformed {
                log::warn!("  Unreadable {field} in {}", path.display());
            }
            result.existing = metadata;
            result.malformed_fields = malformed;
        }
        DecodeOutcome::Empty(reason) => {
            result.error = Some(format!("Cannot edit {}: {reason}", path.display()));
            return result;
        }
    }

    let (output, written) = if options.clear {
        (codec.clear(&bytes), None)
    } else {
        let mut merged = result.existing.clone();

        if options.suggest {
            let image_base64 =
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);
            match request_suggestion(services, &image_base64).await {
                Ok((suggestion, service)) => {
                    merged.apply_suggestion(&suggestion);
                    result.suggestion = Some(suggestion);
                    result.ai_service_used = Some(service);
                }
                Err(e) => {
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        }

        merged.apply_overrides(&options.overrides);

        match codec.encode_outcome(&bytes, &merged) {
            EncodeOutcome::Written(out) => (out, Some(merged)),
            EncodeOutcome::Unchanged { reason, .. } => {
                result.error = Some(format!("Cannot edit {}: {reason}", path.display()));
                return result;
            }
            EncodeOutcome::Degraded { error, .. } => {
                result.error = Some(format!("Failed to write metadata: {error:#}"));
                return result;
            }
        }
    };

    let named_after = written.as_ref().unwrap_or(&result.existing);
    let output_path = match config.output.out_dir {
        Some(ref dir) => unique_output_path(Path::new(dir), &output_file_name(named_after, path)),
        None => path.to_path_buf(),
    };
    result.output_path = Some(output_path.clone());
    result.written = written;

    if config.output.dry_run {
        log::info!("  [dry run] would write {}", output_path.display());
        return result;
    }

    if let Err(e) = write_output(path, &output_path, &output, config) {
        result.error = Some(format!("{e:#}"));
        return result;
    }
    result.metadata_written = true;
    log::info!("  Wrote {}", output_path.display());

    result
}

fn write_output(original: &Path, output_path: &Path, bytes: &[u8], config: &Config) -> Result<()> {
    if output_path == original {
        if config.output.backup_originals {
            backup_file(original)?;
        }
    } else if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(output_path, bytes)
        .with_context(|| format!("Failed to write {}", output_path.display()))
}
