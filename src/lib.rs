//! # metamorph
//!
//! Read and rewrite the searchable metadata of JPEG photos: title, subject,
//! description, keywords, star rating, author and copyright. The codec
//! writes the Windows `XP*` tags, the EXIF `UserComment` and the standard
//! ASCII tags together, so Windows Explorer, photo managers and search
//! crawlers all see the same values.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metamorph::exif::{Metadata, MetadataCodec, Rating};
//!
//! let codec = MetadataCodec::default();
//! let jpeg = std::fs::read("storefront.jpg")?;
//!
//! let mut metadata = codec.decode(&jpeg);
//! metadata.title = Some("Ar-Condicionado em Boa Vista".into());
//! metadata.user_comment = Some("ar condicionado, boa vista; manutenção".into());
//! metadata.rating = Some(Rating::new(5));
//!
//! std::fs::write("storefront.jpg", codec.encode(&jpeg, &metadata))?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Batch Pipeline
//!
//! The [`pipeline`] module handles reading files, optional AI suggestions,
//! overrides, and writing results:
//!
//! ```rust,no_run
//! use metamorph::config::Config;
//! use metamorph::exif::MetadataCodec;
//! use metamorph::pipeline::{build_service_chain, collect_images, process_image, ProcessOptions};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let services = build_service_chain(&config);
//!     let codec = MetadataCodec::from_config(&config.codec);
//!     let options = ProcessOptions { suggest: true, ..Default::default() };
//!
//!     for path in &collect_images(&[PathBuf::from("./photos")]) {
//!         let result = process_image(path, &services, &codec, &options, &config).await;
//!         if let Some(ref err) = result.error {
//!             eprintln!("Error processing {}: {err}", path.display());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`exif`]: the EXIF/TIFF codec and JPEG segment splicing
//! - [`ai`]: AI suggestion trait and the Gemini implementation
//! - [`config`]: configuration types and loading/saving
//! - [`data_url`]: base64 `data:` URL helpers
//! - [`pipeline`]: high-level processing pipeline and image collection

pub mod ai;
pub mod config;
pub mod data_url;
pub mod exif;
pub mod pipeline;
