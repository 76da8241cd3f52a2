use serde::{Deserialize, Serialize};

use super::tags::Rating;
use crate::ai::AiSuggestion;

/// The editable, searchable metadata of one photo.
///
/// Every text field is optional; an empty or whitespace-only string is
/// treated the same as `None` when writing. `user_comment` holds the
/// keyword list (comma- or semicolon-separated).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub rating: Option<Rating>,
    pub description: Option<String>,
    pub artist: Option<String>,
    pub copyright: Option<String>,
    pub software: Option<String>,
    pub date_time: Option<String>,
    #[serde(alias = "keywords")]
    pub user_comment: Option<String>,
}

impl Metadata {
    /// `true` when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }

    /// The rating that will be written: the stored one, or five stars.
    pub fn effective_rating(&self) -> Rating {
        self.rating.unwrap_or_default()
    }

    /// Overwrite the fields an AI suggestion provides.
    ///
    /// Tags are joined with `", "`; they are normalized again at write time.
    pub fn apply_suggestion(&mut self, suggestion: &AiSuggestion) {
        if present(&suggestion.title) {
            self.title = suggestion.title.clone();
        }
        if present(&suggestion.subject) {
            self.subject = suggestion.subject.clone();
        }
        if present(&suggestion.description) {
            self.description = suggestion.description.clone();
        }
        if let Some(ref rating) = suggestion.rating {
            self.rating = Some(Rating::from_glyphs(rating));
        }
        if !suggestion.tags.is_empty() {
            self.user_comment = Some(suggestion.tags.join(", "));
        }
    }

    /// Replace every field that is set in `overrides`.
    pub fn apply_overrides(&mut self, overrides: &Metadata) {
        fn take(dst: &mut Option<String>, src: &Option<String>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }

        take(&mut self.title, &overrides.title);
        take(&mut self.subject, &overrides.subject);
        take(&mut self.description, &overrides.description);
        take(&mut self.artist, &overrides.artist);
        take(&mut self.copyright, &overrides.copyright);
        take(&mut self.software, &overrides.software);
        take(&mut self.date_time, &overrides.date_time);
        take(&mut self.user_comment, &overrides.user_comment);
        if overrides.rating.is_some() {
            self.rating = overrides.rating;
        }
    }
}

/// The usable text of an optional field.
pub(crate) fn text(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

fn present(field: &Option<String>) -> bool {
    text(field).is_some()
}
