use std::time::Duration;

use mdvault_core::{path, StorageError};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use roxmltree::Node;
use tracing::{debug, instrument, warn};
use url::Url;

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:getcontenttype/>
  </d:prop>
</d:propfind>"#;

/// Credentials sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebDavAuth {
    Anonymous,
    Basic { username: String, password: String },
}

impl WebDavAuth {
    /// Basic auth; both parts must be non-empty.
    pub fn basic(username: &str, password: &str) -> Result<Self, StorageError> {
        if username.is_empty() || password.is_empty() {
            return Err(StorageError::MissingCredentials);
        }
        Ok(Self::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Basic { username, .. } => Some(username),
        }
    }
}

/// One `<d:response>` of a multistatus body.
#[derive(Debug, Clone, PartialEq)]
pub struct DavResource {
    /// Absolute URL, no trailing slash
    pub href: String,
    /// Percent-decoded final path segment
    pub name: String,
    pub display_name: Option<String>,
    pub is_dir: bool,
    pub size: u64,
    /// Unix milliseconds, 0 when the server omits it
    pub last_modified: i64,
    /// ETag with quotes stripped
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

/// Minimal WebDAV client over a base URL.
///
/// Stateless: every request re-sends the credentials. Requests answered with
/// 429 or 503 are retried with exponential backoff.
pub struct WebDavClient {
    http_client: HttpClient,
    base: Url,
    base_url: String,
    auth: WebDavAuth,
}

impl WebDavClient {
    pub fn new(base_url: &str, auth: WebDavAuth) -> Result<Self, StorageError> {
        let base_url = trim_trailing_slashes(base_url.trim());
        let base = Url::parse(&format!("{}/", base_url))
            .map_err(|e| StorageError::InvalidPath(format!("{}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(StorageError::InvalidPath(format!(
                "{}: WebDAV needs an http(s) URL",
                base_url
            )));
        }
        Ok(Self {
            http_client: HttpClient::new(),
            base,
            base_url,
            auth,
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &WebDavAuth {
        &self.auth
    }

    /// Absolute request URL for `path`.
    ///
    /// `path` is either a URL already (used as-is) or a path relative to the
    /// base, whose segments are percent-encoded. Collections get a trailing
    /// slash, files none.
    pub fn url_for(&self, path: &str, is_dir: bool) -> String {
        let mut url = if path::is_url(path) {
            trim_trailing_slashes(path)
        } else {
            let segments: Vec<String> = path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| urlencoding::encode(s).into_owned())
                .collect();
            if segments.is_empty() {
                self.base_url.clone()
            } else {
                format!("{}/{}", self.base_url, segments.join("/"))
            }
        };
        if is_dir {
            url.push('/');
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.auth {
            WebDavAuth::Anonymous => builder,
            WebDavAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }

    /// Send a request with exponential backoff retry on 429 and 503.
    async fn send_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, StorageError> {
        let mut delay = Duration::from_millis(BASE_DELAY_MS);
        let mut attempt = 0;

        loop {
            let response = build_request().send().await.map_err(|e| StorageError::Request {
                status: 0,
                detail: e.to_string(),
            })?;

            let status = response.status();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::SERVICE_UNAVAILABLE;
            if !retryable || attempt == MAX_RETRIES {
                return Ok(response);
            }

            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "WebDAV server busy ({}), retrying",
                status
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check(response: Response, url: &str) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(StorageError::FileNotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StorageError::Access(format!("{} ({})", url, status)))
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(StorageError::Request {
                    status: status.as_u16(),
                    detail: if text.is_empty() {
                        url.to_string()
                    } else {
                        format!("{}: {}", url, text)
                    },
                })
            }
        }
    }

    async fn propfind(&self, url: &str, depth: u8) -> Result<Vec<DavResource>, StorageError> {
        let method = dav_method("PROPFIND")?;
        let response = self
            .send_with_retry(|| {
                self.request(method.clone(), url)
                    .header("Depth", depth.to_string())
                    .header("Content-Type", "application/xml; charset=utf-8")
                    .body(PROPFIND_BODY)
            })
            .await?;
        let response = Self::check(response, url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("{}: {}", url, e)))?;
        self.parse_multistatus(&body)
    }

    /// PROPFIND with `Depth: 0`.
    #[instrument(skip(self), level = "debug")]
    pub async fn stat(&self, path: &str, is_dir: bool) -> Result<DavResource, StorageError> {
        let url = self.url_for(path, is_dir);
        self.propfind(&url, 0)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::InvalidResponse(format!("{}: empty multistatus", url)))
    }

    /// PROPFIND with `Depth: 1`, without the collection itself.
    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self, path: &str) -> Result<Vec<DavResource>, StorageError> {
        let url = self.url_for(path, true);
        let mut resources = self.propfind(&url, 1).await?;

        let target = decoded_path(&url);
        let before = resources.len();
        resources.retain(|r| decoded_path(&r.href) != target);
        if resources.len() == before && !resources.is_empty() {
            resources.remove(0);
        }

        debug!("Listed {} resources under {}", resources.len(), url);
        Ok(resources)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.url_for(path, false);
        let response = self
            .send_with_retry(|| self.request(Method::GET, &url))
            .await?;
        let response = Self::check(response, &url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Request {
                status: 0,
                detail: format!("{}: {}", url, e),
            })?;
        debug!("GET {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let url = self.url_for(path, false);
        let response = self
            .send_with_retry(|| {
                self.request(Method::PUT, &url)
                    .header("Content-Type", "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        Self::check(response, &url).await?;
        debug!("PUT {} ({} bytes)", url, data.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, path: &str, is_dir: bool) -> Result<(), StorageError> {
        let url = self.url_for(path, is_dir);
        let response = self
            .send_with_retry(|| self.request(Method::DELETE, &url))
            .await?;
        Self::check(response, &url).await?;
        debug!("DELETE {}", url);
        Ok(())
    }

    /// MKCOL. With `recursive`, every missing ancestor below the base is
    /// created first and existing collections are accepted.
    #[instrument(skip(self), level = "debug")]
    pub async fn mkcol(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let url = self.url_for(path, true);
        if !recursive {
            return self.mkcol_one(&url, false).await;
        }

        let relative = path::relative_http_path(&self.base_url, &trim_trailing_slashes(&url))
            .ok_or_else(|| {
                StorageError::InvalidPath(format!("{} is outside {}", url, self.base_url))
            })?;
        let mut current = self.base_url.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            current = format!("{}/{}", current, segment);
            self.mkcol_one(&format!("{}/", current), true).await?;
        }
        Ok(())
    }

    async fn mkcol_one(&self, url: &str, allow_existing: bool) -> Result<(), StorageError> {
        let method = dav_method("MKCOL")?;
        let response = self
            .send_with_retry(|| self.request(method.clone(), url))
            .await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return if allow_existing {
                Ok(())
            } else {
                Err(StorageError::AlreadyExists(url.to_string()))
            };
        }
        if response.status() == StatusCode::CONFLICT {
            return Err(StorageError::FileNotFound(format!(
                "parent collection of {}",
                url
            )));
        }
        Self::check(response, url).await?;
        debug!("MKCOL {}", url);
        Ok(())
    }

    /// MOVE without overwriting an existing destination.
    #[instrument(skip(self), level = "debug")]
    pub async fn move_to(&self, from: &str, to: &str, is_dir: bool) -> Result<(), StorageError> {
        self.transfer("MOVE", from, to, is_dir, false).await
    }

    /// COPY, overwriting the destination.
    #[instrument(skip(self), level = "debug")]
    pub async fn copy_to(&self, from: &str, to: &str, is_dir: bool) -> Result<(), StorageError> {
        self.transfer("COPY", from, to, is_dir, true).await
    }

    async fn transfer(
        &self,
        verb: &'static str,
        from: &str,
        to: &str,
        is_dir: bool,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let method = dav_method(verb)?;
        let source = self.url_for(from, is_dir);
        let destination = self.url_for(to, is_dir);
        let response = self
            .send_with_retry(|| {
                self.request(method.clone(), &source)
                    .header("Destination", destination.as_str())
                    .header("Overwrite", if overwrite { "T" } else { "F" })
            })
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(StorageError::AlreadyExists(destination));
        }
        Self::check(response, &source).await?;
        debug!("{} {} -> {}", verb, source, destination);
        Ok(())
    }

    /// Parse a `207 Multi-Status` body.
    pub fn parse_multistatus(&self, body: &str) -> Result<Vec<DavResource>, StorageError> {
        let doc = roxmltree::Document::parse(body)
            .map_err(|e| StorageError::InvalidResponse(format!("malformed XML: {}", e)))?;
        let root = doc.root_element();
        if root.tag_name().name() != "multistatus" {
            return Err(StorageError::InvalidResponse(format!(
                "expected multistatus, got {}",
                root.tag_name().name()
            )));
        }

        root.children()
            .filter(|n| is_element(n, "response"))
            .map(|n| self.parse_response(n))
            .collect()
    }

    fn parse_response(&self, node: Node) -> Result<DavResource, StorageError> {
        let href = child_text(node, "href")
            .ok_or_else(|| StorageError::InvalidResponse("response without href".into()))?;
        let href = self
            .base
            .join(href.trim())
            .map(|u| trim_trailing_slashes(u.as_str()))
            .map_err(|e| StorageError::InvalidResponse(format!("bad href {}: {}", href, e)))?;

        // Prefer the propstat carrying 200; servers list 404 props separately.
        let propstats: Vec<Node> = node
            .children()
            .filter(|n| is_element(n, "propstat"))
            .collect();
        let prop = propstats
            .iter()
            .find(|ps| child_text(**ps, "status").is_some_and(|s| s.contains(" 200")))
            .or_else(|| propstats.first())
            .and_then(|ps| child(*ps, "prop"));

        let Some(prop) = prop else {
            return Ok(DavResource {
                name: path::filename(&href),
                href,
                display_name: None,
                is_dir: false,
                size: 0,
                last_modified: 0,
                etag: None,
                content_type: None,
            });
        };

        let is_dir = child(prop, "resourcetype")
            .is_some_and(|rt| rt.children().any(|n| is_element(&n, "collection")));
        let size = child_text(prop, "getcontentlength")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let last_modified = child_text(prop, "getlastmodified")
            .and_then(|s| chrono::DateTime::parse_from_rfc2822(s.trim()).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0);
        let etag = child_text(prop, "getetag")
            .map(|s| s.trim().replace('"', ""))
            .filter(|s| !s.is_empty());

        Ok(DavResource {
            name: path::filename(&href),
            href,
            display_name: child_text(prop, "displayname").filter(|s| !s.is_empty()),
            is_dir,
            size: if is_dir { 0 } else { size },
            last_modified,
            etag,
            content_type: child_text(prop, "getcontenttype"),
        })
    }
}

fn dav_method(name: &'static str) -> Result<Method, StorageError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| StorageError::Unknown(format!("invalid method {}: {}", name, e)))
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, name))
}

fn child_text(node: Node, name: &str) -> Option<String> {
    child(node, name).map(|n| n.text().unwrap_or_default().to_string())
}

fn trim_trailing_slashes(url: &str) -> String {
    let mut out = url.to_string();
    while out.ends_with('/') && !out.ends_with("://") {
        out.pop();
    }
    out
}

fn decoded_path(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let decoded = urlencoding::decode(&path)
        .map(|s| s.into_owned())
        .unwrap_or(path);
    trim_trailing_slashes(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/notes/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/notes/my%20doc.md</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>2024</d:displayname>
        <d:resourcetype/>
        <d:getcontentlength>12</d:getcontentlength>
        <d:getlastmodified>Tue, 02 Jan 2024 10:00:00 GMT</d:getlastmodified>
        <d:getetag>"abc123"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/notes/sub/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    fn client(server: &MockServer) -> WebDavClient {
        WebDavClient::new(
            &format!("{}/dav/", server.uri()),
            WebDavAuth::basic("alice", "secret").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_basic_auth_requires_both_parts() {
        assert!(matches!(
            WebDavAuth::basic("alice", ""),
            Err(StorageError::MissingCredentials)
        ));
        assert!(matches!(
            WebDavAuth::basic("", "pw"),
            Err(StorageError::MissingCredentials)
        ));
    }

    #[test]
    fn test_url_for_encodes_relative_paths() {
        let c = WebDavClient::new("https://h.example.com/dav//", WebDavAuth::Anonymous).unwrap();
        assert_eq!(c.base_url(), "https://h.example.com/dav");
        assert_eq!(c.url_for("notes/my doc.md", false), "https://h.example.com/dav/notes/my%20doc.md");
        assert_eq!(c.url_for("/notes/", true), "https://h.example.com/dav/notes/");
        assert_eq!(c.url_for("", true), "https://h.example.com/dav/");
        assert_eq!(
            c.url_for("https://h.example.com/dav/a/", false),
            "https://h.example.com/dav/a"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(WebDavClient::new("ftp://h/dav", WebDavAuth::Anonymous).is_err());
        assert!(WebDavClient::new("not a url", WebDavAuth::Anonymous).is_err());
    }

    #[test]
    fn test_parse_multistatus_fields() {
        let c = WebDavClient::new("https://h.example.com/dav", WebDavAuth::Anonymous).unwrap();
        let resources = c.parse_multistatus(LISTING).unwrap();
        assert_eq!(resources.len(), 3);

        let doc = &resources[1];
        assert_eq!(doc.href, "https://h.example.com/dav/notes/my%20doc.md");
        assert_eq!(doc.name, "my doc.md");
        assert_eq!(doc.display_name.as_deref(), Some("2024"));
        assert!(!doc.is_dir);
        assert_eq!(doc.size, 12);
        assert_eq!(doc.etag.as_deref(), Some("abc123"));
        assert_eq!(doc.last_modified, 1_704_189_600_000);

        assert!(resources[2].is_dir);
        assert_eq!(resources[2].href, "https://h.example.com/dav/notes/sub");
    }

    #[test]
    fn test_parse_rejects_non_multistatus() {
        let c = WebDavClient::new("https://h.example.com/dav", WebDavAuth::Anonymous).unwrap();
        let err = c.parse_multistatus("<html><body/></html>").unwrap_err();
        assert!(matches!(err, StorageError::InvalidResponse(_)));
        let err = c.parse_multistatus("not xml <").unwrap_err();
        assert!(matches!(err, StorageError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_list_drops_collection_itself() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(url_path("/dav/notes/"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(LISTING))
            .mount(&server)
            .await;

        let resources = client(&server).list("notes").await.unwrap();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["my doc.md", "sub"]);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/dav/missing.md"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/dav/secret.md"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/dav/broken.md"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(matches!(
            c.get("missing.md").await.unwrap_err(),
            StorageError::FileNotFound(_)
        ));
        assert!(matches!(
            c.get("secret.md").await.unwrap_err(),
            StorageError::Access(_)
        ));
        assert!(matches!(
            c.get("broken.md").await.unwrap_err(),
            StorageError::Request { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn test_put_sends_body_and_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(url_path("/dav/a.md"))
            .and(header("Authorization", "Basic YWxpY2U6c2VjcmV0"))
            .and(body_bytes(b"hello".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).put("a.md", b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_when_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/dav/busy.md"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/dav/busy.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let data = client(&server).get("busy.md").await.unwrap();
        assert_eq!(data, b"ok");
    }

    #[tokio::test]
    async fn test_move_refuses_existing_destination() {
        let server = MockServer::start().await;
        Mock::given(method("MOVE"))
            .and(url_path("/dav/a.md"))
            .and(header("Overwrite", "F"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let err = client(&server).move_to("a.md", "b.md", false).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_recursive_mkcol_accepts_existing_parents() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(url_path("/dav/a/"))
            .respond_with(ResponseTemplate::new(405))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(url_path("/dav/a/b/"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).mkcol("a/b", true).await.unwrap();
    }
}
