//! Discovery of the archive index behind the monthly listing page

use crate::error::DiscoveryError;
use reqwest::{Response, Url};
use scraper::{Html, Selector};
use std::collections::BTreeSet;

/// A resolved archive location in the monthly listing
///
/// Immutable once discovered; the stem is the archive's identity and keys
/// its output artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveRef {
    /// Absolute download URL
    pub url: Box<str>,

    /// Archive file name, e.g. `Empresas0.zip`
    pub name: Box<str>,

    /// File name without the archive extension, e.g. `Empresas0`
    pub stem: Box<str>,
}
//
impl ArchiveRef {
    /// Derive an archive's identity from its absolute URL
    fn new(url: Url) -> Option<Self> {
        let name = url.path_segments()?.next_back()?.to_owned();
        if name.is_empty() {
            return None;
        }
        let stem = match name.len().checked_sub(4) {
            Some(cut) if name[cut..].eq_ignore_ascii_case(".zip") => &name[..cut],
            _ => &name[..],
        }
        .to_owned();
        Some(Self {
            url: String::from(url).into(),
            name: name.into(),
            stem: stem.into(),
        })
    }
}

/// Fetch the listing page and resolve the set of archives inside it
///
/// This is the only stage whose failure aborts the whole run: without an
/// index there is nothing to ingest. The result is deduplicated and
/// sorted, which fixes the order in which archives are processed.
pub async fn discover(
    client: &reqwest::Client,
    base_url: &Url,
) -> Result<Vec<ArchiveRef>, DiscoveryError> {
    let fetch_error = |source| DiscoveryError::Fetch {
        url: base_url.as_str().into(),
        source,
    };
    let body = client
        .get(base_url.clone())
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(fetch_error)?
        .text()
        .await
        .map_err(fetch_error)?;
    let archives = scan_listing(base_url, &body);
    if archives.is_empty() {
        return Err(DiscoveryError::NoArchives {
            url: base_url.as_str().into(),
        });
    }
    Ok(archives)
}

/// Scan a listing page body for anchors targeting archives
///
/// Pure function over the HTML so that it can be tested without a server.
/// Relative targets are resolved against `base_url`; duplicates collapse
/// and the output comes out sorted by URL.
fn scan_listing(base_url: &Url, body: &str) -> Vec<ArchiveRef> {
    let anchors =
        Selector::parse("a[href]").expect("a static CSS selector should always be valid");
    let document = Html::parse_document(body);
    let mut urls = BTreeSet::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.to_ascii_lowercase().ends_with(".zip") {
            continue;
        }
        if let Ok(resolved) = base_url.join(href) {
            urls.insert(resolved);
        }
    }
    urls.into_iter().filter_map(ArchiveRef::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn base() -> Url {
        Url::parse("http://mirror.test/dados/2025-07/").expect("static test URL")
    }

    #[test]
    fn scan_resolves_relative_and_absolute_targets() {
        let body = r#"
            <html><body>
            <a href="Empresas0.zip">Empresas0.zip</a>
            <a href="http://mirror.test/dados/2025-07/Socios0.zip">Socios0.zip</a>
            <a href="notes.txt">notes.txt</a>
            <a href="../2025-06/">previous month</a>
            </body></html>
        "#;
        let archives = scan_listing(&base(), body);
        assert_eq!(
            archives.iter().map(|a| &*a.name).collect::<Vec<_>>(),
            ["Empresas0.zip", "Socios0.zip"]
        );
        assert_eq!(
            &*archives[0].url,
            "http://mirror.test/dados/2025-07/Empresas0.zip"
        );
    }

    #[test]
    fn scan_deduplicates_and_sorts() {
        let body = r#"
            <a href="Municipios.zip">x</a>
            <a href="Empresas1.zip">x</a>
            <a href="Municipios.zip">again</a>
            <a href="Empresas0.zip">x</a>
        "#;
        let archives = scan_listing(&base(), body);
        assert_eq!(
            archives.iter().map(|a| &*a.name).collect::<Vec<_>>(),
            ["Empresas0.zip", "Empresas1.zip", "Municipios.zip"]
        );
    }

    #[test]
    fn scan_accepts_uppercase_extension() {
        let archives = scan_listing(&base(), r#"<a href="PAISES.ZIP">x</a>"#);
        assert_eq!(&*archives[0].name, "PAISES.ZIP");
        assert_eq!(&*archives[0].stem, "PAISES");
    }

    #[test]
    fn stems_drop_only_the_archive_extension() {
        let archive = ArchiveRef::new(
            Url::parse("http://mirror.test/a/K3241.K03200Y0.D50712.zip").expect("valid"),
        )
        .expect("has a file name");
        assert_eq!(&*archive.stem, "K3241.K03200Y0.D50712");
    }

    #[tokio::test]
    async fn discover_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dump/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/dump/", server.uri())).expect("valid");
        let error = discover(&reqwest::Client::new(), &url)
            .await
            .expect_err("a 500 listing should be fatal");
        assert!(matches!(error, DiscoveryError::Fetch { .. }));
    }

    #[tokio::test]
    async fn discover_fails_on_empty_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dump/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nothing here</html>"))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/dump/", server.uri())).expect("valid");
        let error = discover(&reqwest::Client::new(), &url)
            .await
            .expect_err("an archive-less listing should be fatal");
        assert!(matches!(error, DiscoveryError::NoArchives { .. }));
    }

    #[tokio::test]
    async fn discover_returns_the_sorted_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dump/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="Cnaes.zip">c</a> <a href="Empresas0.zip">e</a>"#,
            ))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/dump/", server.uri())).expect("valid");
        let archives = discover(&reqwest::Client::new(), &url)
            .await
            .expect("listing should resolve");
        assert_eq!(
            archives.iter().map(|a| &*a.stem).collect::<Vec<_>>(),
            ["Cnaes", "Empresas0"]
        );
    }
}
