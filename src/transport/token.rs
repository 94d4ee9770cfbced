use std::fmt;

use url::Url;

use crate::error::{GuestwireError, Result};

/// Opaque identifier correlating the control channel with data requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Use a token issued elsewhere.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Endpoints of one session, all below the host's I/O base URL.
///
/// The token is the raw query string: `run?<token>`, `work?<token>`,
/// `work/nonblock?<token>`. The control channel URL uses the WebSocket
/// scheme matching the base (`http` to `ws`, `https` to `wss`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUrls {
    /// WebSocket control channel.
    pub run: Url,
    /// Blocking receive and all sends.
    pub work: Url,
    /// Non-blocking receive.
    pub work_nonblock: Url,
}

impl SessionUrls {
    pub fn new(io_url: &str, token: &SessionToken) -> Result<Self> {
        let mut base = Url::parse(io_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let endpoint = |path: &str| -> Result<Url> {
            let mut url = base.join(path)?;
            url.set_query(Some(token.as_str()));
            Ok(url)
        };

        let mut run = endpoint("run")?;
        let scheme = match run.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(GuestwireError::Config(format!(
                    "unsupported io_url scheme {:?}",
                    other
                )))
            }
        };
        run.set_scheme(scheme).map_err(|()| {
            GuestwireError::Config(format!("cannot derive control URL from {:?}", io_url))
        })?;

        Ok(Self {
            run,
            work: endpoint("work")?,
            work_nonblock: endpoint("work/nonblock")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_urls_carry_raw_token_query() {
        let token = SessionToken::from_string("abc-123");
        let urls = SessionUrls::new("http://localhost:8080/io/", &token).unwrap();

        assert_eq!(urls.run.as_str(), "ws://localhost:8080/io/run?abc-123");
        assert_eq!(urls.work.as_str(), "http://localhost:8080/io/work?abc-123");
        assert_eq!(
            urls.work_nonblock.as_str(),
            "http://localhost:8080/io/work/nonblock?abc-123"
        );
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let token = SessionToken::from_string("t");
        let urls = SessionUrls::new("https://example.com/io", &token).unwrap();
        assert_eq!(urls.work.as_str(), "https://example.com/io/work?t");
        assert_eq!(urls.run.as_str(), "wss://example.com/io/run?t");
    }

    #[test]
    fn test_invalid_base_rejected() {
        let token = SessionToken::generate();
        assert!(SessionUrls::new("not a url", &token).is_err());
        assert!(matches!(
            SessionUrls::new("ftp://example.com/io/", &token),
            Err(GuestwireError::Config(_))
        ));
    }
}
