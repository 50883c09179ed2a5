//! Utility functions for LanShare
//!
//! Name sanitizers shared by uploads, downloads and archive entries.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but the RFC 3986 unreserved characters
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Characters that may not appear in a stored file name
const RESERVED_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Name used when sanitizing leaves nothing usable
const FALLBACK_NAME: &str = "media.bin";

/// Strip path separators and reserved filesystem characters from a
/// client-declared file name.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if RESERVED_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    guard_dot_names(cleaned.trim())
}

/// Flatten a display name into a single archive path component.
///
/// Separators are replaced so an entry can never land outside the
/// archive's flat namespace.
pub fn archive_entry_name(name: &str) -> String {
    let flattened = name.replace(['/', '\\'], "_");
    guard_dot_names(&flattened)
}

/// File name for a `Content-Disposition` header
pub fn attachment_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

fn guard_dot_names(name: &str) -> String {
    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else if name.chars().all(|c| c == '.') {
        name.replace('.', "_")
    } else {
        name.to_string()
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
/// Used for non-ASCII names carried in headers.
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

/// Reverse of [`percent_encode`]. Malformed escapes are kept literally.
pub fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// `Content-Disposition` value with an ASCII fallback and a UTF-8 name
pub fn content_disposition(name: &str) -> String {
    let name = attachment_name(name);
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        percent_encode(&name)
    )
}

/// Minimal HTML escaping for text and attribute values
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Format file size for display
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("IMG_0001.jpg"), "IMG_0001.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a:b*c?d\"e<f>g|h"), "a_b_c_d_e_f_g_h");
        assert_eq!(sanitize_filename("C:\\Users\\x.png"), "C__Users_x.png");
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_archive_entry_name() {
        assert_eq!(archive_entry_name("a/b.jpg"), "a_b.jpg");
        assert_eq!(archive_entry_name("a\\b\\c.mov"), "a_b_c.mov");
        assert_eq!(archive_entry_name("plain.heic"), "plain.heic");
        assert_eq!(archive_entry_name(".."), "__");
        assert_eq!(archive_entry_name(""), FALLBACK_NAME);
    }

    #[test]
    fn test_attachment_name() {
        assert_eq!(attachment_name("say \"cheese\".jpg"), "say cheese.jpg");
        assert_eq!(attachment_name("\""), FALLBACK_NAME);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(500), "500 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_file_size(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_percent_round_trip() {
        assert_eq!(percent_encode("a b.jpg"), "a%20b.jpg");
        assert_eq!(percent_encode("é"), "%C3%A9");
        assert_eq!(percent_decode("%C3%A9t%C3%A9.heic"), "été.heic");
        assert_eq!(percent_decode("100%.jpg"), "100%.jpg");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("tail%4"), "tail%4");
        assert_eq!(percent_decode("%FF.jpg"), "\u{FFFD}.jpg");
        assert_eq!(percent_encode("IMG_0001~v2.HEIC"), "IMG_0001~v2.HEIC");
        assert_eq!(percent_decode("plain.png"), "plain.png");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("photo.jpg"),
            "attachment; filename=\"photo.jpg\"; filename*=UTF-8''photo.jpg"
        );
        assert_eq!(
            content_disposition("café \"x\".jpg"),
            "attachment; filename=\"caf_ x.jpg\"; filename*=UTF-8''caf%C3%A9%20x.jpg"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_archive_names_are_single_component(name in "\\PC{0,40}") {
            let entry = archive_entry_name(&name);
            prop_assert!(!entry.is_empty());
            prop_assert!(!entry.contains('/'));
            prop_assert!(!entry.contains('\\'));
            prop_assert!(entry != "." && entry != "..");
        }

        #[test]
        fn prop_percent_decode_inverts_encode(name in "\\PC{0,40}") {
            let encoded = percent_encode(&name);
            prop_assert!(encoded.bytes().all(|b| b.is_ascii_graphic()));
            prop_assert_eq!(percent_decode(&encoded), name);
        }

        #[test]
        fn prop_sanitized_names_have_no_reserved_chars(name in "\\PC{0,40}") {
            let cleaned = sanitize_filename(&name);
            prop_assert!(!cleaned.is_empty());
            prop_assert!(!cleaned.chars().any(|c| RESERVED_FILENAME_CHARS.contains(&c)));
        }
    }
}
