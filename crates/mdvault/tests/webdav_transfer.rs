use std::sync::Arc;

use mdvault::{AppContext, FileRef, Settings, StaticDialog, StaticSettings};
use mdvault_local::LocalBackend;
use mdvault_webdav::RemoteBackend;
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT_MULTISTATUS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

async fn connected_remote(server: &MockServer) -> Arc<RemoteBackend> {
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .respond_with(ResponseTemplate::new(207).set_body_string(ROOT_MULTISTATUS))
        .mount(server)
        .await;
    let remote = Arc::new(RemoteBackend::new());
    assert!(remote
        .connect(&format!("{}/dav", server.uri()), "alice", "secret")
        .await
        .unwrap());
    remote
}

fn context(temp: &TempDir, remote: Arc<RemoteBackend>) -> AppContext {
    AppContext::new(
        Arc::new(LocalBackend::new()),
        remote,
        temp.path().join("history").display().to_string(),
        Arc::new(StaticSettings::new(Settings::default())),
        Arc::new(StaticDialog { overwrite: true }),
    )
}

#[tokio::test]
async fn local_file_is_uploaded_byte_for_byte() {
    let server = MockServer::start().await;
    let remote = connected_remote(&server).await;
    Mock::given(method("PUT"))
        .and(path("/dav/shot.png"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let image: Vec<u8> = (0..2048u32).map(|i| (i * 7 % 256) as u8).collect();
    let source = temp.path().join("shot.png");
    std::fs::write(&source, &image).unwrap();

    let context = context(&temp, remote);
    context
        .files
        .copy_across_storage(
            &FileRef::local(source.display().to_string()),
            &FileRef::remote(format!("{}/dav/shot.png", server.uri())),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    assert_eq!(put.body, image);
}

#[tokio::test]
async fn remote_file_moves_to_local_disk() {
    let server = MockServer::start().await;
    let remote = connected_remote(&server).await;
    Mock::given(method("GET"))
        .and(path("/dav/notes.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# from the server\n"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/dav/notes.md"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let target = temp.path().join("notes.md");
    let context = context(&temp, remote);
    context
        .files
        .move_across_storage(
            &FileRef::remote(format!("{}/dav/notes.md", server.uri())),
            &FileRef::local(target.display().to_string()),
        )
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "# from the server\n"
    );
}
