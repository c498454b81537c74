use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

const ELLIPSIS: &str = "...";

/// Normalizes a local file or folder name into the form used remotely.
///
/// Surrounding whitespace is dropped and the text is composed (NFC), so that
/// names coming from filesystems storing decomposed characters still match the
/// names SmugMug returns.
///
/// # Examples
///
/// ```
/// use smugsync::foundation::utils::normalize_name;
///
/// assert_eq!(normalize_name("  Cafe\u{301} "), "Caf\u{e9}");
/// ```
pub fn normalize_name(name: &str) -> String {
    name.trim().nfc().collect()
}

/// Clips `line` to `max_length` visible characters by replacing a middle
/// section with `...`.
///
/// The prefix keeps five eighths of the width so the start of a path stays
/// readable while the tail (usually a percentage) remains visible.
///
/// # Arguments
///
/// * `line` - The text to clip.
/// * `max_length` - The maximum number of grapheme clusters to keep.
///
pub fn clip_long_line(line: &str, max_length: usize) -> String {
    let graphemes: Vec<&str> = line.graphemes(true).collect();
    if graphemes.len() <= max_length {
        return line.to_string();
    }

    let prefix = max_length * 5 / 8;
    let suffix = max_length.saturating_sub(prefix + ELLIPSIS.len());
    let mut clipped: String = graphemes[..prefix].concat();
    clipped.push_str(ELLIPSIS);
    clipped.push_str(&graphemes[graphemes.len() - suffix..].concat());
    clipped
}

/// Returns true for the accepted confirmation replies, `y` and `yes`.
pub fn is_affirmative(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Splits a shell line into words, honoring single and double quotes and
/// backslash escapes.
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_word = true;
                }
                None => return Err("No escaped character".to_string()),
            },
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err("No closing quotation".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
