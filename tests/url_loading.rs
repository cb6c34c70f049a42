//! Loading URL references from a local HTTP server.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use doclink::chat::{ChatModel, ChatResponse};
use doclink::config::{Config, LoaderConfig, ResponseMode};
use doclink::conversation::{ChatMessage, ConversationHistory, HistoryPolicy, Role};
use doclink::error::{ConnectorError, ModelCallError};
use doclink::index::DocumentIndexBuilder;
use doclink::loader::{DocumentLoader, Loaded};
use doclink::references::DocumentReference;
use doclink::response::Outcome;
use doclink::runner::BatchRunner;

const PAGE: &str = "<html><head><script>var token = 1;</script></head>\
<body><h1>Release notes</h1><p>Faster <b>startup</b>.</p></body></html>";

struct Fixture {
    path: &'static str,
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

fn fixtures() -> Vec<Fixture> {
    vec![
        Fixture {
            path: "/page",
            status: "200 OK",
            content_type: "text/html; charset=utf-8",
            body: PAGE.as_bytes().to_vec(),
        },
        Fixture {
            path: "/big",
            status: "200 OK",
            content_type: "text/plain",
            body: vec![b'x'; 4096],
        },
    ]
}

/// Serves `fixtures` until the test ends; unknown paths get a 404.
async fn serve(fixtures: Vec<Fixture>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let fixtures = Arc::new(fixtures);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let fixtures = fixtures.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");

                let (status, content_type, body) = match fixtures.iter().find(|f| f.path == path) {
                    Some(f) => (f.status, f.content_type, f.body.clone()),
                    None => ("404 Not Found", "text/plain", b"not found".to_vec()),
                };
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    content_type,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    base
}

fn loader() -> DocumentLoader {
    let mut config = Config::default();
    config.retrieval.response_mode = ResponseMode::Compact;
    let loader_config = LoaderConfig {
        max_file_bytes: 1024,
        fetch_timeout_secs: 5,
        ..LoaderConfig::default()
    };
    DocumentLoader::new(
        &loader_config,
        Arc::new(DocumentIndexBuilder::new(&config, None, None)),
    )
    .unwrap()
}

#[tokio::test]
async fn url_without_extension_uses_content_type() {
    let base = serve(fixtures()).await;
    let reference = DocumentReference::new(format!("{}/page", base), 0);

    let doc = match loader().load(&reference).await.unwrap() {
        Loaded::Single(doc) => doc,
        Loaded::Many(_) => panic!("a URL is never a directory"),
    };
    assert_eq!(doc.source, reference.text);
    assert!(doc.text.contains("Release notes"), "got {:?}", doc.text);
    assert!(doc.text.contains("Faster startup."));
    assert!(!doc.text.contains("token"));
    assert!(!doc.text.contains('<'));
}

#[tokio::test]
async fn oversized_response_is_rejected() {
    let base = serve(fixtures()).await;
    let reference = DocumentReference::new(format!("{}/big", base), 0);

    let err = loader().load(&reference).await.unwrap_err();
    assert!(matches!(err, ConnectorError::ReferenceResolution { .. }));
    assert!(err.to_string().contains("limit is 1024"), "got {}", err);
}

#[tokio::test]
async fn non_success_status_is_reference_error() {
    let base = serve(fixtures()).await;
    let reference = DocumentReference::new(format!("{}/missing", base), 0);

    let err = loader().load(&reference).await.unwrap_err();
    assert!(matches!(err, ConnectorError::ReferenceResolution { .. }));
    assert!(err.to_string().contains("404"), "got {}", err);
}

/// Chat model that records each conversation and always answers.
struct Recorder {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatModel for Recorder {
    fn model_name(&self) -> &str {
        "recorder"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelCallError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(ChatResponse {
            content: Some("answered".to_string()),
            model: None,
            usage: None,
        })
    }
}

#[tokio::test]
async fn failed_urls_are_skipped_and_the_prompt_completes() {
    let base = serve(fixtures()).await;
    let model = Arc::new(Recorder {
        calls: Mutex::new(Vec::new()),
    });
    let runner = BatchRunner::new(model.clone(), loader(), HistoryPolicy::StrippedQuery);
    let prompt = format!(
        "compare {}/big with {}/page and {}/missing",
        base, base, base
    );

    let mut history = ConversationHistory::new("sys");
    let outcomes = runner.run_prompts(&mut history, &[prompt]).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        &outcomes[0],
        Outcome::Success { content: Some(c), .. } if c == "answered"
    ));

    let calls = model.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let sent: Vec<(Role, Option<String>)> =
        calls[0].iter().map(|m| (m.role, m.text())).collect();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1], (Role::User, Some("compare with and".to_string())));
    assert_eq!(sent[2].0, Role::System);
    assert!(sent[2].1.as_deref().is_some_and(|t| t.contains("Release notes")));

    assert_eq!(history.last().unwrap().text().as_deref(), Some("answered"));
}
