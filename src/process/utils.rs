// src/process/utils.rs

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Final path segment of an href, without query or fragment.
/// `FileDownload/CSV/RePORTER_PRJ_C_FY2019.zip?v=2` → `RePORTER_PRJ_C_FY2019.zip`
pub fn file_name_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// True for `.csv` paths, case-insensitively.
pub fn is_csv(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn file_names_drop_directories_and_queries() {
        assert_eq!(
            file_name_from_href("FileDownload/CSV/RePORTER_PRJ_C_FY2019.zip?v=2").as_deref(),
            Some("RePORTER_PRJ_C_FY2019.zip")
        );
        assert_eq!(file_name_from_href("Patents.zip").as_deref(), Some("Patents.zip"));
        assert_eq!(file_name_from_href("files/"), None);
    }

    #[test]
    fn cleans_quotes_and_padding() {
        assert_eq!(clean_str("  \" 12 \" "), "12");
        assert_eq!(clean_str("abc"), "abc");
        assert_eq!(clean_str("\""), "\"");
    }

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(is_csv(Path::new("a/RePORTER_PRJ_C_FY2019.CSV")));
        assert!(!is_csv(Path::new("a/readme.txt")));
    }
}
