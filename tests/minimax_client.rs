//! # MiniMax Client Integration Test
//!
//! Exercises the public client API end to end against a local WebSocket server
//! that speaks the session protocol (`connected_success`, `task_start`,
//! `task_continue`, `task_finish`).
//!
//! ## Key Test Scenarios
//!
//! 1. **Parallel Streams**: concurrent streams each hold their own connection,
//!    and both connections are pooled afterwards.
//! 2. **Prewarm**: a prewarmed connection serves the first stream.
//! 3. **Configuration**: a client built from a YAML file reaches the server
//!    with the configured voice.
//! 4. **Live API**: runs only when `MINIMAX_API_KEY` and `MINIMAX_GROUP_ID` are set.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test minimax_client
//! ```

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use minimax_tts::core::tts::minimax::{ConnectOptions, PoolConfig, StreamConfig};
use minimax_tts::{AudioEvent, ClientConfig, MinimaxTTS, SynthesisOptions};

// ============================================================================
// Local protocol server
// ============================================================================

struct LocalServer {
    base_url: String,
    connections: Arc<AtomicUsize>,
    voices: Arc<Mutex<Vec<String>>>,
}

/// Start a server that answers every token with 640 bytes of PCM after `delay`.
async fn start_server(delay: Duration) -> LocalServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let voices = Arc::new(Mutex::new(Vec::new()));

    let server = LocalServer {
        base_url: format!("http://{addr}"),
        connections: Arc::clone(&connections),
        voices: Arc::clone(&voices),
    };

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            connections.fetch_add(1, Ordering::SeqCst);
            let voices = Arc::clone(&voices);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                let reply = |value: Value| Message::Text(value.to_string().into());

                if ws
                    .send(reply(json!({"event": "connected_success", "session_id": "local"})))
                    .await
                    .is_err()
                {
                    return;
                }

                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let outgoing = match value["event"].as_str() {
                        Some("task_start") => {
                            let voice = value["voice_setting"]["voice_id"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string();
                            voices.lock().await.push(voice);
                            vec![json!({"event": "task_started", "session_id": "local"})]
                        }
                        Some("task_continue") => {
                            tokio::time::sleep(delay).await;
                            vec![json!({
                                "event": "task_continued",
                                "data": {"audio": hex::encode([7u8; 640])},
                                "is_final": true,
                                "base_resp": {"status_code": 0, "status_msg": "success"}
                            })]
                        }
                        Some("task_finish") => {
                            let _ = ws.send(reply(json!({"event": "task_finished"}))).await;
                            let _ = ws.close(None).await;
                            return;
                        }
                        _ => Vec::new(),
                    };
                    for value in outgoing {
                        if ws.send(reply(value)).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    server
}

fn client_for(server: &LocalServer) -> MinimaxTTS {
    let mut options = SynthesisOptions::new("sk-local-key", "1899");
    options.base_url = server.base_url.clone();
    MinimaxTTS::with_config(
        options,
        PoolConfig::default(),
        ConnectOptions {
            timeout: Duration::from_secs(2),
            max_retry: 0,
            retry_interval: Duration::from_millis(20),
        },
        StreamConfig::default(),
    )
    .unwrap()
}

async fn collect_pcm(tts: &MinimaxTTS, text: &str) -> Vec<u8> {
    let mut stream = tts.stream().unwrap();
    stream.push_text(text).unwrap();
    stream.end_input();

    let mut pcm = Vec::new();
    while let Some(event) = stream.next().await {
        if let AudioEvent::Frame(frame) = event.unwrap() {
            pcm.extend_from_slice(&frame.data);
        }
    }
    pcm
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_parallel_streams_use_separate_connections() {
    let server = start_server(Duration::from_millis(100)).await;
    let tts = client_for(&server);

    let (first, second) = tokio::join!(
        collect_pcm(&tts, "The first stream speaks."),
        collect_pcm(&tts, "The second stream speaks.")
    );

    assert_eq!(first.len(), 640);
    assert_eq!(second.len(), 640);
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert_eq!(tts.pool().idle_count(), 2);

    tts.aclose().await;
    assert_eq!(tts.pool().idle_count(), 0);
}

#[tokio::test]
async fn test_prewarmed_connection_serves_first_stream() {
    let server = start_server(Duration::ZERO).await;
    let tts = client_for(&server);

    tts.prewarm().await.unwrap();
    assert_eq!(tts.pool().idle_count(), 1);

    let pcm = collect_pcm(&tts, "Served from the pool.").await;
    assert_eq!(pcm.len(), 640);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_from_yaml_config() {
    let server = start_server(Duration::ZERO).await;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("minimax.yaml");
    fs::write(
        &config_path,
        format!(
            "minimax:\n  api_key: \"sk-yaml-key\"\n  group_id: \"1899\"\n  base_url: \"{}\"\n\
             voice:\n  voice_id: \"female-yujie\"\n\
             connection:\n  max_retry: 0\n",
            server.base_url
        ),
    )
    .unwrap();

    let config = ClientConfig::from_file(&config_path).unwrap();
    let tts = MinimaxTTS::from_config(&config).unwrap();
    assert_eq!(tts.sample_rate(), 32000);
    assert_eq!(tts.num_channels(), 1);

    let audio = tts.synthesize("Configured from a file.").await.unwrap();
    assert_eq!(audio.pcm.len(), 640);
    assert_eq!(*server.voices.lock().await, vec!["female-yujie".to_string()]);
}

fn live_options() -> Option<SynthesisOptions> {
    let key = std::env::var("MINIMAX_API_KEY").ok()?;
    let group_id = std::env::var("MINIMAX_GROUP_ID").ok()?;
    Some(SynthesisOptions::new(key, group_id))
}

#[tokio::test]
async fn test_live_synthesis() {
    let Some(options) = live_options() else {
        eprintln!("Skipping live test: MINIMAX_API_KEY / MINIMAX_GROUP_ID not set");
        return;
    };
    let _ = rustls::crypto::ring::default_provider().install_default();

    let tts = MinimaxTTS::new(options).unwrap();
    let audio = tts.synthesize("Hello. 你好。").await.unwrap();
    assert!(!audio.pcm.is_empty());
    assert!(audio.token_errors.is_empty());
    tts.aclose().await;
}
