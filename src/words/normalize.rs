use html_escape::decode_html_entities;

/// Apostrophe look-alikes folded into a straight `'`
const APOSTROPHE_VARIANTS: &[char] = &['\u{2019}', '\u{2018}', '\u{02BC}', '`'];

/// UTF-8 right single quote decoded as Windows-1252
const MOJIBAKE_APOSTROPHE: &str = "\u{e2}\u{20ac}\u{2122}";

/// Normalizes a comment body into word tokens
///
/// # Normalization Steps
///
/// 1. Decode HTML entities (`&amp;`, `&#39;`, ...)
/// 2. Fold curly apostrophes and backticks into `'`
/// 3. Drop punctuation, keeping apostrophes and `.` between two digits
/// 4. Lower-case
/// 5. Split on whitespace, discarding empty and apostrophe-only tokens
///
/// # Examples
///
/// ```
/// use thread_wordcloud::words::normalize;
///
/// assert_eq!(normalize("It's 3.14, right?"), vec!["it's", "3.14", "right"]);
/// ```
pub fn normalize(body: &str) -> Vec<String> {
    let decoded = decode_html_entities(body);
    let folded = decoded.replace(MOJIBAKE_APOSTROPHE, "'");
    let chars: Vec<char> = folded
        .chars()
        .map(|c| if APOSTROPHE_VARIANTS.contains(&c) { '\'' } else { c })
        .collect();

    let mut cleaned = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() || c.is_whitespace() || c == '\'' || is_decimal_point(&chars, i) {
            cleaned.push(c);
        }
    }

    cleaned
        .to_lowercase()
        .split_whitespace()
        .filter(|token| token.chars().any(|c| c != '\''))
        .map(str::to_string)
        .collect()
}

/// Returns true if `chars[i]` is a `.` with an ASCII digit on each side
fn is_decimal_point(chars: &[char], i: usize) -> bool {
    if chars[i] != '.' || i == 0 {
        return false;
    }
    let before = chars[i - 1];
    let after = chars.get(i + 1).copied();
    before.is_ascii_digit() && after.is_some_and(|c| c.is_ascii_digit())
}
