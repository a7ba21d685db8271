use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;
use crate::Error;

/// A restore target, optionally with an explicit SSH port (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetHost {
    pub hostname: String,
    pub port: Option<u16>,
}

impl TargetHost {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: None,
        }
    }
}

impl FromStr for TargetHost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::Transport(TransportError::InvalidHost(s.to_string()));

        let (hostname, port) = match s.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') => {
                let port = p.parse::<u16>().map_err(|_| invalid())?;
                (h, Some(port))
            }
            _ => (s, None),
        };

        if hostname.is_empty()
            || hostname.starts_with('-')
            || hostname.chars().any(|c| c.is_whitespace())
        {
            return Err(invalid());
        }

        Ok(Self {
            hostname: hostname.to_string(),
            port,
        })
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.hostname, port),
            None => f.write_str(&self.hostname),
        }
    }
}
