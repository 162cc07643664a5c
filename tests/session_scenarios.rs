// End-to-end session tests against a fake editor on loopback TCP.

use remate::session::{client, config::Config, protocol::HeaderLayout};
use std::path::Path;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

fn test_config(port: u16) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port,
        ..Config::default()
    }
}

/// Consume an open frame from the client and return (token, body).
async fn read_open_frame(reader: &mut BufReader<OwnedReadHalf>) -> (String, Vec<u8>) {
    let mut token = String::new();
    let mut len: u64 = 0;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim();
        if let Some(value) = line.strip_prefix("token:") {
            token = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            len = value.trim().parse().unwrap();
            break;
        }
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.unwrap();

    // Trailer: blank line, then a lone dot.
    let mut trailer = String::new();
    reader.read_line(&mut trailer).await.unwrap();
    assert_eq!(trailer, "\n");
    trailer.clear();
    reader.read_line(&mut trailer).await.unwrap();
    assert_eq!(trailer.trim_end(), ".");

    (token, body)
}

async fn send_save(writer: &mut OwnedWriteHalf, token: &str, body: &[u8]) {
    let header = format!("save\ntoken: {token}\ndata: {}\n", body.len());
    writer.write_all(header.as_bytes()).await.unwrap();
    writer.write_all(body).await.unwrap();
}

async fn send_close(writer: &mut OwnedWriteHalf, token: &str) {
    let frame = format!("close\ntoken: {token}\n\n");
    writer.write_all(frame.as_bytes()).await.unwrap();
    writer.flush().await.unwrap();
}

fn write_target(dir: &Path, contents: &[u8]) -> std::path::PathBuf {
    let target = dir.join("notes.txt");
    std::fs::write(&target, contents).unwrap();
    target
}

#[tokio::test]
async fn open_save_close_round_trip() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"old contents");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let (token, body) = read_open_frame(&mut reader).await;
        assert_eq!(token.len(), 32);
        assert_eq!(body, b"old contents");

        write_half.write_all(b"FakeEditor 1.0\n").await.unwrap();

        send_save(&mut write_half, &token, b"hello\nworld").await;
        send_close(&mut write_half, &token).await;
    });

    client::run_session(&test_config(port), &target)
        .await
        .unwrap();
    editor.await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"hello\nworld");
}

#[tokio::test]
async fn multiple_saves_before_close_keep_the_last() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"v0");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let (token, _) = read_open_frame(&mut reader).await;
        write_half.write_all(b"FakeEditor 1.0\n").await.unwrap();

        send_save(&mut write_half, &token, b"first draft").await;
        send_save(&mut write_half, &token, b"final draft").await;
        send_close(&mut write_half, &token).await;
    });

    client::run_session(&test_config(port), &target)
        .await
        .unwrap();
    editor.await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"final draft");
}

#[tokio::test]
async fn unknown_save_token_fails_and_leaves_file_untouched() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"old contents");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let _ = read_open_frame(&mut reader).await;
        // The client bails before reading the body, so ignore write errors.
        let _ = write_half.write_all(b"FakeEditor 1.0\n").await;
        let _ = write_half
            .write_all(b"save\ntoken: 0000feed0000feed0000feed0000feed\ndata: 11\nhello\nworld")
            .await;
        let _ = write_half.flush().await;
    });

    let err = client::run_session(&test_config(port), &target)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown token"));
    editor.await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"old contents");
}

#[tokio::test]
async fn connection_drop_after_handshake_is_fatal() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"old contents");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let _ = read_open_frame(&mut reader).await;
        write_half.write_all(b"FakeEditor 1.0\n").await.unwrap();
        // Drop the connection without sending close.
    });

    let err = client::run_session(&test_config(port), &target)
        .await
        .unwrap_err();
    assert!(err
        .chain()
        .any(|cause| cause.to_string().contains("closed the connection")));
    editor.await.unwrap();
}

#[tokio::test]
async fn dial_failure_is_fatal() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"old contents");

    // Bind then drop to get a port that very likely refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = client::run_session(&test_config(port), &target)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to connect"));
}

#[tokio::test]
async fn unrecognized_commands_keep_the_session_alive() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"old contents");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let (token, _) = read_open_frame(&mut reader).await;
        write_half.write_all(b"FakeEditor 1.0\n").await.unwrap();

        write_half.write_all(b"reactivate\n").await.unwrap();
        send_save(&mut write_half, &token, b"still here").await;
        send_close(&mut write_half, &token).await;
    });

    client::run_session(&test_config(port), &target)
        .await
        .unwrap();
    editor.await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"still here");
}

#[tokio::test]
async fn minimal_header_layout_round_trips() {
    let temp = TempDir::new().unwrap();
    let target = write_target(temp.path(), b"minimal");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let editor = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // First line must be the command.
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "open\n");

        // Minimal layout: no real-path / data-on-save / re-activate lines.
        let mut headers = Vec::new();
        let mut token = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let line = line.trim().to_string();
            if let Some(value) = line.strip_prefix("token:") {
                token = value.trim().to_string();
            }
            if line.starts_with("data:") {
                headers.push(line);
                break;
            }
            headers.push(line);
        }
        assert!(headers.iter().all(|h| !h.starts_with("real-path:")
            && !h.starts_with("data-on-save:")
            && !h.starts_with("re-activate:")));

        let mut body = vec![0u8; 7];
        reader.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"minimal");

        write_half.write_all(b"FakeEditor 1.0\n").await.unwrap();
        send_close(&mut write_half, &token).await;
    });

    let mut config = test_config(port);
    config.layout = HeaderLayout::Minimal;
    client::run_session(&config, &target).await.unwrap();
    editor.await.unwrap();
}
