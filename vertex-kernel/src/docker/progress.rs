//! Progress streams for pull and build
//!
//! The CLI prints human-readable lines; the kernel API speaks NDJSON
//! `DockerProgress` messages. Each line of stdout or stderr becomes one
//! message, and a failing exit status adds a final message with `error` set.

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use vertex_core::dto::docker::DockerProgress;

use super::{BodyStream, DockerError, Result};

/// Converts one CLI line into a progress message
///
/// Lines of the form `<id>: <status>` (where the id has no whitespace, as
/// layer ids and tags do) are split; everything else is a bare status.
pub fn parse_line(line: &str) -> DockerProgress {
    let line = line.trim_end();

    if let Some((id, status)) = line.split_once(": ") {
        if !id.is_empty() && !id.contains(char::is_whitespace) {
            return DockerProgress {
                id: id.to_string(),
                status: status.trim().to_string(),
                ..Default::default()
            };
        }
    }

    DockerProgress::status(line)
}

/// Turns a running `docker pull`/`docker build` into an NDJSON body
pub(super) fn stream(mut child: Child, command: &'static str) -> Result<BodyStream> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DockerError::Io(io::Error::other("missing stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DockerError::Io(io::Error::other("missing stderr")))?;

    let lines = stream::select(lines(stdout), lines(stderr))
        .filter(|line| {
            let keep = !matches!(line, Ok(l) if l.trim().is_empty());
            async move { keep }
        })
        .map(|line| line.map(|l| parse_line(&l)));

    let exit = stream::once(async move {
        match child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Ok(DockerProgress::failure(format!(
                "docker {} exited with {}",
                command, status
            )))),
            Err(e) => Some(Err(e)),
        }
    })
    .filter_map(|msg| async move { msg });

    Ok(Box::pin(lines.chain(exit).map(|msg| msg.and_then(encode))))
}

fn encode(msg: DockerProgress) -> io::Result<Bytes> {
    let mut json = serde_json::to_vec(&msg).map_err(io::Error::other)?;
    json.push(b'\n');
    Ok(Bytes::from(json))
}

/// Line stream over a child pipe, ending at EOF or on the first read error
fn lines<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(BufReader::new(reader).lines()), |state| async move {
        let mut lines = state?;
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), Some(lines))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer_line() {
        let msg = parse_line("a2abf6c4d29d: Pull complete");
        assert_eq!(msg.id, "a2abf6c4d29d");
        assert_eq!(msg.status, "Pull complete");
    }

    #[test]
    fn test_parse_tag_line() {
        let msg = parse_line("7: Pulling from library/redis");
        assert_eq!(msg.id, "7");
        assert_eq!(msg.status, "Pulling from library/redis");
    }

    #[test]
    fn test_parse_build_step() {
        let msg = parse_line("Step 1/5 : FROM alpine");
        assert_eq!(msg.id, "");
        assert_eq!(msg.status, "Step 1/5 : FROM alpine");
    }

    #[test]
    fn test_parse_plain_line() {
        let msg = parse_line("docker.io/library/redis:7\n");
        assert_eq!(msg.status, "docker.io/library/redis:7");
        assert!(msg.error.is_none());
    }
}
