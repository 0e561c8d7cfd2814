use std::sync::Mutex;

use super::*;

struct MockUploader {
    uploaded: Mutex<Vec<PathBuf>>,
    answer: String,
}

impl MockUploader {
    fn returning(answer: &str) -> Self {
        Self { uploaded: Mutex::new(Vec::new()), answer: answer.to_owned() }
    }
}

#[async_trait::async_trait]
impl MediaUploader for MockUploader {
    async fn upload(&self, path: &Path) -> Result<String, SyncError> {
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        Ok(self.answer.clone())
    }
}

#[test]
fn durable_urls_need_http_scheme_and_host() {
    assert!(is_durable_url("https://cdn.example.com/a.jpg"));
    assert!(is_durable_url("http://10.0.0.2:9000/b.png"));
    assert!(!is_durable_url("file:///sdcard/DCIM/a.jpg"));
    assert!(!is_durable_url("content://media/external/images/1"));
    assert!(!is_durable_url("ph://ABC-123"));
    assert!(!is_durable_url("/tmp/a.jpg"));
    assert!(!is_durable_url("photos/a.jpg"));
}

#[test]
fn parse_strips_file_scheme() {
    assert_eq!(MediaRef::parse("file:///tmp/a.jpg"), MediaRef::Local(PathBuf::from("/tmp/a.jpg")));
    assert_eq!(MediaRef::parse("https://x.io/a.jpg"), MediaRef::Remote("https://x.io/a.jpg".into()));
}

#[test]
fn ensure_durable_names_the_offending_reference() {
    let urls = vec!["https://x.io/a.jpg".to_owned(), "ph://1".to_owned()];
    assert_eq!(
        ensure_durable(&urls),
        Err(SyncError::Validation(ValidationError::LocalMedia("ph://1".into())))
    );
    assert_eq!(ensure_durable(&urls[..1]), Ok(()));
}

#[tokio::test]
async fn resolve_uploads_only_local_refs_in_order() {
    let uploader = MockUploader::returning("https://cdn.example.com/up.jpg");
    let refs = vec![MediaRef::Remote("https://x.io/first.jpg".into()), MediaRef::parse("/tmp/second.jpg")];

    let urls = resolve_media(&uploader, &refs).await.expect("resolve");

    assert_eq!(urls, vec!["https://x.io/first.jpg", "https://cdn.example.com/up.jpg"]);
    assert_eq!(*uploader.uploaded.lock().unwrap(), vec![PathBuf::from("/tmp/second.jpg")]);
}

#[tokio::test]
async fn uploader_returning_a_local_uri_is_rejected() {
    let uploader = MockUploader::returning("file:///still/local.jpg");
    let err = resolve_media(&uploader, &[MediaRef::parse("/tmp/a.jpg")]).await.expect_err("not durable");
    assert!(matches!(err, SyncError::Validation(ValidationError::LocalMedia(_))));
}

#[test]
fn http_uploader_posts_under_api_root() {
    let uploader = HttpUploader::new(reqwest::Client::new(), "http://h/api/");
    assert_eq!(uploader.endpoint(), "http://h/api/media");
}
