//! Directory-listing pages (Apache/nginx autoindex style).

use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));

/// A link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Directory(Url),
    File(Url),
}

impl Link {
    pub fn url(&self) -> &Url {
        match self {
            Link::Directory(url) | Link::File(url) => url,
        }
    }
}

/// Extracts the links of `page` that point strictly below it.
///
/// Parent links, sort links (`?C=N;O=D`), anchors and off-site links are
/// dropped. A path ending in `/` is a directory. Order follows the page and
/// duplicates are removed.
pub fn parse_listing(page: &Url, html: &str) -> Vec<Link> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&ANCHOR) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('?') || href.starts_with('#') {
            continue;
        }
        let mut url = match page.join(href) {
            Ok(url) => url,
            Err(e) => {
                debug!(href, error = %e, "Skipping unparsable link");
                continue;
            }
        };
        url.set_fragment(None);
        if url.query().is_some() || !is_beneath(page, &url) {
            continue;
        }
        if !seen.insert(url.clone()) {
            continue;
        }

        if url.path().ends_with('/') {
            links.push(Link::Directory(url));
        } else {
            links.push(Link::File(url));
        }
    }
    links
}

/// Normalizes a listing URL so relative links resolve inside it.
pub fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// History key of a package URL: its path with percent-escapes decoded, so
/// `g%2B%2B-12_1.0_amd64.deb` is keyed and named `g++-12_1.0_amd64.deb`.
/// A path that would decode to a line break keeps its escapes.
pub fn package_key(url: &Url) -> String {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy();
    if decoded.contains(['\n', '\r']) {
        return url.path().to_string();
    }
    decoded.into_owned()
}

fn is_beneath(page: &Url, url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
        && url.origin() == page.origin()
        && url.path().len() > page.path().len()
        && url.path().starts_with(page.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTOINDEX: &str = r#"<html>
<head><title>Index of /alpine/v3.18/main/</title></head>
<body>
<h1>Index of /alpine/v3.18/main/</h1><hr><pre>
<a href="?C=N;O=D">Name</a>
<a href="../">../</a>
<a href="x86_64/">x86_64/</a>                                            12-Jun-2023 10:00       -
<a href="aarch64/">aarch64/</a>                                          12-Jun-2023 10:00       -
<a href="musl-1.2.4-r2.apk">musl-1.2.4-r2.apk</a>                        12-Jun-2023 10:00  400K
<a href="musl-1.2.4-r2.apk#top">musl-1.2.4-r2.apk</a>
<a href="/alpine/v3.18/main/APKINDEX.tar.gz">APKINDEX.tar.gz</a>
<a href="/alpine/">up</a>
<a href="https://other.example.org/alpine/v3.18/main/x.apk">mirror</a>
<a href="mailto:root@example.org">mail</a>
</pre><hr></body>
</html>"#;

    fn page() -> Url {
        Url::parse("https://mirror.example.org/alpine/v3.18/main/").unwrap()
    }

    #[test]
    fn test_parse_autoindex() {
        let links = parse_listing(&page(), AUTOINDEX);
        let base = "https://mirror.example.org/alpine/v3.18/main/";
        let expected = vec![
            Link::Directory(Url::parse(&format!("{base}x86_64/")).unwrap()),
            Link::Directory(Url::parse(&format!("{base}aarch64/")).unwrap()),
            Link::File(Url::parse(&format!("{base}musl-1.2.4-r2.apk")).unwrap()),
            Link::File(Url::parse(&format!("{base}APKINDEX.tar.gz")).unwrap()),
        ];
        assert_eq!(links, expected);
    }

    #[test]
    fn test_empty_page() {
        assert!(parse_listing(&page(), "<html><body>nothing here</body></html>").is_empty());
        assert!(parse_listing(&page(), "").is_empty());
    }

    #[test]
    fn test_directory_url() {
        let url = directory_url(Url::parse("https://mirror.example.org/ubuntu/pool").unwrap());
        assert_eq!(url.as_str(), "https://mirror.example.org/ubuntu/pool/");
        let links = parse_listing(&url, r#"<a href="main/">main/</a>"#);
        assert_eq!(links[0].url().as_str(), "https://mirror.example.org/ubuntu/pool/main/");
    }

    #[test]
    fn test_package_key_decodes_escapes() {
        let page = Url::parse("https://mirror.example.org/ubuntu/pool/main/g/").unwrap();
        let links = parse_listing(&page, r#"<a href="g%2B%2B-12_12.3.0_amd64.deb">g++</a>"#);
        assert_eq!(package_key(links[0].url()), "/ubuntu/pool/main/g/g++-12_12.3.0_amd64.deb");

        let spaced = Url::parse("https://mirror.example.org/pool/a%20b_1.0_all.deb").unwrap();
        assert_eq!(package_key(&spaced), "/pool/a b_1.0_all.deb");

        let newline = Url::parse("https://mirror.example.org/pool/a%0Ab.deb").unwrap();
        assert_eq!(package_key(&newline), "/pool/a%0Ab.deb");
    }
}
