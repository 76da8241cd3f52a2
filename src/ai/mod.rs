mod gemini;

pub use gemini::GeminiService;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Metadata suggested by an AI vision model for one image.
///
/// Every field may be missing: the model is asked for all of them but is
/// not trusted to comply. `rating` is a string of `★` glyphs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSuggestion {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub rating: Option<String>,
    pub tags: Vec<String>,
}

impl AiSuggestion {
    fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.title) && blank(&self.subject) && blank(&self.description) && self.tags.is_empty()
    }
}

/// Trait for AI suggestion backends.
///
/// The library ships with [`GeminiService`]; implement this trait to plug
/// in another model.
///
/// ```rust,no_run
/// use metamorph::ai::{AiService, GeminiService};
///
/// # async fn example() -> anyhow::Result<()> {
/// let service = GeminiService::new("api-key".into(), "gemini-2.0-flash".into());
/// let suggestion = service.suggest("base64data", "image/jpeg").await?;
/// println!("Title: {:?}", suggestion.title);
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait AiService: Send + Sync {
    /// Display name of this service (e.g. "Gemini").
    fn name(&self) -> &str;
    /// Suggest metadata for a base64-encoded image of the given MIME type.
    async fn suggest(&self, image_base64: &str, mime_type: &str) -> Result<AiSuggestion>;
}

/// The instruction sent along with every image.
pub fn build_prompt() -> String {
    r#"You are a senior local-SEO consultant specialized in Google Business Profile.
Analyze this photo of a business and return a JSON object with these fields:

{
  "title": "Identified service + location - business name",
  "subject": "Service category (e.g. Air Conditioning, Law Firm)",
  "description": "An SEO description of what the photo shows",
  "rating": "★★★★★",
  "tags": ["keyword1", "keyword2", "keyword3"]
}

Rules:
- "title": short and specific, written like a search result headline.
- "subject": the category of the service shown.
- "description": one or two sentences with the terms a local customer would search for.
- "rating": always five star glyphs.
- "tags": exactly 10 strategic keywords.

Return ONLY the JSON object, no markdown formatting, no code blocks, no extra text."#
        .to_string()
}

/// Parse raw model output into an [`AiSuggestion`].
///
/// Tolerates markdown code fences, text around the JSON object, trailing
/// commas, and `tags` given as one comma-separated string. A response with
/// no usable field is an error.
pub fn parse_suggestion(text: &str) -> Result<AiSuggestion> {
    log::debug!("Raw AI response:\n{text}");

    for candidate in json_candidates(text.trim()) {
        for attempt in [candidate.to_string(), strip_trailing_commas(candidate)] {
            let parsed = serde_json::from_str::<AiSuggestion>(&attempt).ok().or_else(|| {
                serde_json::from_str::<serde_json::Value>(&attempt)
                    .ok()
                    .and_then(|v| value_to_suggestion(&v))
            });
            if let Some(suggestion) = parsed.filter(|s| !s.is_empty()) {
                return Ok(suggestion);
            }
        }
    }

    anyhow::bail!("Could not parse AI response as a metadata suggestion")
}

/// Slices of `text` that may hold the JSON object, most specific first:
/// the body of a code fence, the outermost braces, the whole text.
fn json_candidates(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = Vec::with_capacity(3);
    for candidate in [fence_body(text), outer_braces(text), Some(text)]
        .into_iter()
        .flatten()
    {
        if !candidate.is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Text between an opening fence (and its language tag) and the next fence.
fn fence_body(text: &str) -> Option<&str> {
    const FENCE: &str = "```";
    let open = text.find(FENCE)? + FENCE.len();
    let body_start = open + text[open..].find('\n').map_or(0, |nl| nl + 1);
    let body = &text[body_start..];
    let body_end = body.find(FENCE).unwrap_or(body.len());
    Some(body[..body_end].trim())
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Drop commas that directly precede `}` or `]`, leaving string contents
/// alone.
fn strip_trailing_commas(json: &str) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        Str,
        Escaped,
    }

    let mut out = String::with_capacity(json.len());
    let mut state = State::Code;
    for (i, c) in json.char_indices() {
        state = match (state, c) {
            (State::Escaped, _) => State::Str,
            (State::Str, '\\') => State::Escaped,
            (State::Str, '"') => State::Code,
            (State::Code, '"') => State::Str,
            (State::Code, ',') if json[i + 1..].trim_start().starts_with(['}', ']']) => continue,
            (current, _) => current,
        };
        out.push(c);
    }
    out
}

/// Pull suggestion fields out of loosely shaped JSON.
fn value_to_suggestion(val: &serde_json::Value) -> Option<AiSuggestion> {
    let obj = val.as_object()?;
    let string = |key: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let tags = match obj.get("tags") {
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split([',', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    // Some models answer with a list of subjects
    let subject = match obj.get("subject") {
        Some(serde_json::Value::Array(arr)) => {
            let parts: Vec<&str> = arr.iter().filter_map(|v| v.as_str()).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => string("subject"),
    };

    let rating = match obj.get("rating") {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(|n| crate::exif::Rating::new(n.min(u32::MAX as u64) as u32).glyphs()),
        _ => string("rating"),
    };

    let suggestion = AiSuggestion {
        title: string("title"),
        subject,
        description: string("description"),
        rating,
        tags,
    };
    (!suggestion.is_empty()).then_some(suggestion)
}
