use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use super::{DataChannel, RecvMode, SessionUrls};
use crate::error::{GuestwireError, Result};

/// Default per-request timeout.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(50_000);

/// Data channel over HTTP: `GET` to receive, `POST` to send.
pub struct HttpDataChannel {
    agent: ureq::Agent,
    work: Url,
    work_nonblock: Url,
}

impl HttpDataChannel {
    /// Build a channel for the session endpoints, failing any single request
    /// that takes longer than `timeout`.
    pub fn new(urls: &SessionUrls, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            work: urls.work.clone(),
            work_nonblock: urls.work_nonblock.clone(),
        }
    }
}

impl DataChannel for HttpDataChannel {
    fn fetch(&mut self, mode: RecvMode) -> Result<Bytes> {
        let url = match mode {
            RecvMode::Blocking => &self.work,
            RecvMode::NonBlocking => &self.work_nonblock,
        };

        let resp = self
            .agent
            .get(url.as_str())
            .header("Cache-Control", "no-cache")
            .call()
            .map_err(|e| request_error("GET", url, e))?;

        let mut reader = resp.into_body().into_reader();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        tracing::trace!(bytes = buf.len(), ?mode, "data channel fetch");
        Ok(Bytes::from(buf))
    }

    fn post(&mut self, data: &[u8]) -> Result<()> {
        let resp = self
            .agent
            .post(self.work.as_str())
            .header("Content-Type", "application/octet-stream")
            .send(data)
            .map_err(|e| request_error("POST", &self.work, e))?;

        // Drain the acknowledgement so the connection can be reused.
        let mut reader = resp.into_body().into_reader();
        std::io::copy(&mut reader, &mut std::io::sink())?;
        tracing::trace!(bytes = data.len(), "data channel post");
        Ok(())
    }
}

impl std::fmt::Debug for HttpDataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataChannel")
            .field("work", &self.work.as_str())
            .finish()
    }
}

fn request_error(method: &str, url: &Url, err: ureq::Error) -> GuestwireError {
    match err {
        ureq::Error::Timeout(_) => GuestwireError::Timeout,
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => GuestwireError::Timeout,
        other => GuestwireError::Transport(format!("http {} {}: {}", method, url, other)),
    }
}
