// Drives DifyClient against a one-shot HTTP stub on localhost.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use zeek_rag::upload::DifyClient;
use zeek_rag_core::contract::{UploadRequest, Uploader};
use zeek_rag_core::upload::{DocumentSettings, UploadError};

/// Serves one request with `status` and `body`; resolves to the raw request text.
async fn stub(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/v1", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).into_owned()
    });
    (base, handle)
}

fn request() -> UploadRequest {
    UploadRequest {
        dataset_id: "ds-1".into(),
        filename: "scripts__builtin-functions.md".into(),
        content: b"# scripts/builtin-functions\n".to_vec(),
        settings: DocumentSettings::default(),
    }
}

#[tokio::test]
async fn upload_sends_file_and_indexing_fields() {
    let (base, server) = stub("200 OK", r#"{"document": {"id": "doc-9", "name": "x"}, "batch": "b-1"}"#).await;
    let client = DifyClient::new(&base, "dataset-key", Duration::from_secs(5)).unwrap();

    let uploaded = client.upload_document(request()).await.unwrap();
    assert_eq!(uploaded.document_id.as_deref(), Some("doc-9"));
    assert_eq!(uploaded.batch.as_deref(), Some("b-1"));

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /v1/datasets/ds-1/document/create_by_file "), "{raw}");
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer dataset-key"));
    assert!(raw.contains("name=\"indexing_technique\"\r\n\r\nhigh_quality"));
    assert!(raw.contains("name=\"doc_form\"\r\n\r\ntext_model"));
    assert!(raw.contains("\"mode\":\"hierarchical\""));
    assert!(raw.contains("filename=\"scripts__builtin-functions.md\""));
    assert!(raw.contains("# scripts/builtin-functions"));
}

#[tokio::test]
async fn server_errors_are_retryable_and_client_errors_are_not() {
    let (base, server) = stub("503 Service Unavailable", r#"{"message": "busy"}"#).await;
    let client = DifyClient::new(&base, "k", Duration::from_secs(5)).unwrap();
    let err = client.upload_document(request()).await.unwrap_err();
    assert!(matches!(err, UploadError::Status { status: 503, .. }));
    assert!(err.is_retryable());
    server.await.unwrap();

    let (base, server) = stub("400 Bad Request", r#"{"code": "invalid_param"}"#).await;
    let client = DifyClient::new(&base, "k", Duration::from_secs(5)).unwrap();
    let err = client.upload_document(request()).await.unwrap_err();
    match &err {
        UploadError::Status { status, body } => {
            assert_eq!(*status, 400);
            assert!(body.contains("invalid_param"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn list_datasets_reads_the_first_page() {
    let (base, server) = stub(
        "200 OK",
        r#"{"data": [{"id": "ds-1", "name": "Zeek", "doc_form": "hierarchical_model", "provider": "vendor", "data_source_type": "upload_file", "document_count": 3, "extra": true}], "has_more": false}"#,
    )
    .await;
    let client = DifyClient::new(&base, "k", Duration::from_secs(5)).unwrap();

    let datasets = client.list_datasets().await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].doc_form.as_deref(), Some("hierarchical_model"));
    assert_eq!(datasets[0].document_count, Some(3));

    let raw = server.await.unwrap();
    assert!(raw.starts_with("GET /v1/datasets?page=1&limit=100 "), "{raw}");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/v1", listener.local_addr().unwrap());
    drop(listener);

    let client = DifyClient::new(&base, "k", Duration::from_secs(2)).unwrap();
    let err = client.list_datasets().await.unwrap_err();
    assert!(matches!(err, UploadError::Transport(_)));
    assert!(err.is_retryable());
}
