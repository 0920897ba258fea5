//! Locator sniffing. Pure functions, no I/O.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Git,
    Http,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Content,
    Git,
    Http,
    Local,
}

/// `https://host/repo.git#v1.2` -> (`https://host/repo.git`, Some(`v1.2`)).
pub fn split_revision(locator: &str) -> (&str, Option<&str>) {
    match locator.split_once('#') {
        Some((url, rev)) if !rev.trim().is_empty() => (url, Some(rev.trim())),
        Some((url, _)) => (url, None),
        None => (locator, None),
    }
}

/// Git wins over http, so `https://host/repo.git` is cloned rather than downloaded.
pub fn sniff_protocol(locator: &str) -> Option<Protocol> {
    let (url, _) = split_revision(locator.trim());
    let l = url.to_lowercase();
    if l.starts_with("git") || l.ends_with(".git") {
        Some(Protocol::Git)
    } else if l.starts_with("https") || l.starts_with("http") {
        Some(Protocol::Http)
    } else if l.starts_with(['.', '/', '~']) {
        Some(Protocol::Local)
    } else {
        None
    }
}

/// `None` means the source cannot be fetched and is skipped.
pub fn select_fetch_strategy(locator: Option<&str>, has_content: bool) -> Option<FetchStrategy> {
    match locator.map(str::trim).filter(|l| !l.is_empty()) {
        None if has_content => Some(FetchStrategy::Content),
        None => None,
        Some(l) => sniff_protocol(l).map(|p| match p {
            Protocol::Git => FetchStrategy::Git,
            Protocol::Http => FetchStrategy::Http,
            Protocol::Local => FetchStrategy::Local,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table() {
        assert_eq!(select_fetch_strategy(Some("git@github.com:org/repo.git"), false), Some(FetchStrategy::Git));
        assert_eq!(select_fetch_strategy(Some("https://github.com/org/repo.git"), false), Some(FetchStrategy::Git));
        assert_eq!(select_fetch_strategy(Some("https://example.org/app.yaml"), false), Some(FetchStrategy::Http));
        assert_eq!(select_fetch_strategy(Some("http://example.org/app.yaml"), false), Some(FetchStrategy::Http));
        assert_eq!(select_fetch_strategy(Some("./local.yaml"), false), Some(FetchStrategy::Local));
        assert_eq!(select_fetch_strategy(Some("/abs/dir"), false), Some(FetchStrategy::Local));
        assert_eq!(select_fetch_strategy(Some("~/dir"), false), Some(FetchStrategy::Local));
        assert_eq!(select_fetch_strategy(None, true), Some(FetchStrategy::Content));
        assert_eq!(select_fetch_strategy(None, false), None);
        assert_eq!(select_fetch_strategy(Some("s3://bucket/key"), false), None);
    }

    #[test]
    fn revision_suffix_is_ignored_for_sniffing() {
        assert_eq!(sniff_protocol("https://github.com/org/repo.git#main"), Some(Protocol::Git));
        assert_eq!(sniff_protocol("HTTPS://EXAMPLE.ORG/X.YAML"), Some(Protocol::Http));
        assert_eq!(split_revision("https://h/r.git#v1"), ("https://h/r.git", Some("v1")));
        assert_eq!(split_revision("https://h/r.git#"), ("https://h/r.git", None));
        assert_eq!(split_revision("./deck.yaml"), ("./deck.yaml", None));
    }
}
