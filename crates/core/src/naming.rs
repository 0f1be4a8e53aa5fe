//! Filename slug rules: sanitizing model output and keeping names unique
//! within a job.
//!
//! [`sanitize`] turns arbitrary model text into a kebab-case slug and
//! [`DedupRegistry`] hands out collision-free final names. Both are pure so
//! the rename logic can be exercised without an inference backend.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Slug returned when sanitizing leaves nothing behind.
pub const FALLBACK_SLUG: &str = "image";

/// Default maximum number of words kept in a slug.
pub const DEFAULT_MAX_WORDS: usize = 10;

/// Default maximum slug length in characters.
pub const DEFAULT_MAX_LEN: usize = 60;

/// Extension used when the original filename has none.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Words that are never allowed in a generated filename.
const DENYLIST: &[&str] = &["fuck", "shit", "ass", "bitch", "slur"];

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static slug regex is valid"));

/// Instruction sent to the vision-language model alongside every image.
pub const SYSTEM_PROMPT: &str = "You are an AI that analyzes images and generates descriptive filenames. \
Analyze the image content and create a filename that describes: \
1) The main subject/object 2) Key visual elements 3) Context/setting if relevant. \
Return ONLY the filename in kebab-case format. \
Use descriptive words, ASCII only, max 10 words, max 60 characters. \
No file extension, no punctuation except hyphens. \
Examples: 'sunset-over-mountain-lake', 'red-sports-car-city-street', 'golden-retriever-playing-fetch'.";

/// Build the full prompt for one image, appending the user's own hint.
pub fn build_prompt(user_prompt: &str) -> String {
    let hint = user_prompt.trim();
    if hint.is_empty() {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{SYSTEM_PROMPT} {hint}")
    }
}

// ---------------------------------------------------------------------------
// Sanitizing
// ---------------------------------------------------------------------------

/// Limits applied by [`sanitize_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    pub max_words: usize,
    pub max_len: usize,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

/// Sanitize raw model output with the default limits.
///
/// ```
/// use renamer_core::naming::sanitize;
///
/// assert_eq!(sanitize("  A Cat, sitting on the Sofa!  "), "a-cat-sitting-on-the-sofa");
/// assert_eq!(sanitize("???"), "image");
/// ```
pub fn sanitize(raw: &str) -> String {
    sanitize_with(raw, SanitizeOptions::default())
}

/// Sanitize raw model output into a filesystem-safe kebab-case slug.
///
/// The result always matches `^[a-z0-9]+(-[a-z0-9]+)*$` or equals
/// [`FALLBACK_SLUG`].
pub fn sanitize_with(raw: &str, options: SanitizeOptions) -> String {
    let lowered = raw.to_lowercase();
    let collapsed = NON_SLUG.replace_all(&lowered, "-");

    let words: Vec<&str> = collapsed
        .split('-')
        .filter(|w| !w.is_empty())
        .filter(|w| !DENYLIST.contains(w))
        .take(options.max_words)
        .collect();

    let mut slug = words.join("-");
    // Only ASCII survives the regex, so byte truncation is on a char boundary.
    slug.truncate(options.max_len);
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

// ---------------------------------------------------------------------------
// Renaming
// ---------------------------------------------------------------------------

/// Return the extension of `filename` (without the dot), if it has one.
pub fn extension_of(filename: &str) -> Option<&str> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Combine a final slug with the original file's extension.
///
/// ```
/// use renamer_core::naming::renamed_filename;
///
/// assert_eq!(renamed_filename("cat", "IMG_0001.PNG"), "cat.PNG");
/// assert_eq!(renamed_filename("cat", "scan"), "cat.jpg");
/// ```
pub fn renamed_filename(slug: &str, original_name: &str) -> String {
    let ext = extension_of(original_name).unwrap_or(DEFAULT_EXTENSION);
    format!("{slug}.{ext}")
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Set of names already claimed within one job.
///
/// Not synchronized: the job that owns it must serialize calls to
/// [`reserve`](DedupRegistry::reserve).
#[derive(Debug, Default)]
pub struct DedupRegistry {
    names: HashSet<String>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `candidate`, or the first free `candidate-NNN` if it is taken.
    pub fn reserve(&mut self, candidate: &str) -> String {
        if self.names.insert(candidate.to_string()) {
            return candidate.to_string();
        }

        let mut suffix: u32 = 1;
        loop {
            let probe = format!("{candidate}-{suffix:03}");
            if self.names.insert(probe.clone()) {
                return probe;
            }
            suffix += 1;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
