// Wire protocol framing. Line-oriented text headers; save bodies are framed
// by the exact byte count declared on the `data:` line.
//
// Outbound open frame:
//   open
//   display-name: <name>
//   real-path: <path>        (full layout only)
//   data-on-save: yes        (full layout only)
//   re-activate: yes         (full layout only)
//   token: <token>
//   data: <byte count>
//   <raw bytes>
//   <blank line>
//   .
//
// Inbound frames start with a command line (`save`, `close`, or something
// unrecognized) followed by `key: value` header lines.

use crate::session::error::ProtocolError;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Which header set the open frame carries. Two historical layouts exist;
/// the choice is a single configuration knob rather than two writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// display-name, real-path, data-on-save, re-activate, token
    Full,
    /// display-name, token
    Minimal,
}

/// Header fields of an outbound open frame.
#[derive(Debug)]
pub struct OpenFrame<'a> {
    pub display_name: &'a str,
    pub real_path: &'a str,
    pub token: &'a str,
}

/// One decoded inbound command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// The body of exactly `len` bytes follows on the reader; the caller
    /// must consume it before reading the next command.
    Save { token: String, len: u64 },
    Close { token: Option<String> },
    /// Unrecognized command name. Not an error; the session keeps listening.
    Unknown(String),
}

/// Write the open frame, streaming exactly `len` body bytes from `body`.
/// The header field set and ordering is a protocol contract with the peer.
pub async fn write_open<W, R>(
    writer: &mut W,
    frame: &OpenFrame<'_>,
    layout: HeaderLayout,
    len: u64,
    body: &mut R,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut header = String::new();
    header.push_str("open\n");
    header.push_str(&format!("display-name: {}\n", frame.display_name));
    if layout == HeaderLayout::Full {
        header.push_str(&format!("real-path: {}\n", frame.real_path));
        header.push_str("data-on-save: yes\n");
        header.push_str("re-activate: yes\n");
    }
    header.push_str(&format!("token: {}\n", frame.token));
    header.push_str(&format!("data: {len}\n"));
    writer.write_all(header.as_bytes()).await?;

    let copied = tokio::io::copy(&mut body.take(len), writer).await?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file body ended after {copied} of {len} bytes"),
        ));
    }

    writer.write_all(b"\n.\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one command frame. For `save`, the declared body is left unread on
/// the reader. Any line-read failure terminates the session loop.
pub async fn read_command<R>(reader: &mut R) -> Result<Command, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_trimmed(reader)
        .await?
        .ok_or(ProtocolError::UnexpectedEof)?;
    match line.as_str() {
        "save" => read_save_headers(reader).await,
        "close" => read_close_headers(reader).await,
        other => Ok(Command::Unknown(other.to_string())),
    }
}

async fn read_trimmed<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Scan save headers for `token:` until the `data:` line is found. The
/// `data:` value must parse as a non-negative byte count.
async fn read_save_headers<R>(reader: &mut R) -> Result<Command, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut token = String::new();
    loop {
        let line = read_trimmed(reader)
            .await?
            .ok_or(ProtocolError::UnexpectedEof)?;
        if let Some(value) = line.strip_prefix("token:") {
            token = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.trim();
            let len = value.parse::<u64>().map_err(|_| ProtocolError::BadByteCount {
                value: value.to_string(),
            })?;
            return Ok(Command::Save { token, len });
        }
    }
}

/// Scan close headers until `token:` is found or the headers are exhausted
/// (blank line or EOF). The token is informational only.
async fn read_close_headers<R>(reader: &mut R) -> Result<Command, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_trimmed(reader).await? {
            None => return Ok(Command::Close { token: None }),
            Some(line) if line.is_empty() => return Ok(Command::Close { token: None }),
            Some(line) => {
                if let Some(value) = line.strip_prefix("token:") {
                    return Ok(Command::Close {
                        token: Some(value.trim().to_string()),
                    });
                }
            }
        }
    }
}
