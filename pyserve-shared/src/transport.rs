//! Endpoint of a worker's remote-call server.

use crate::constants::network::LOCALHOST;

/// Address a worker listens on.
///
/// Launched workers always bind the loopback interface. The host is kept
/// for attaching to a worker started elsewhere (`pyserve --attach host:port`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Endpoint on the loopback interface.
    pub fn local(port: u16) -> Self {
        Self {
            host: LOCALHOST.to_string(),
            port,
        }
    }

    /// URL the remote-call client posts to.
    pub fn to_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Accepts a bare port (loopback), `host:port`, or the URL form printed by
/// `Display`.
impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("http://").unwrap_or(s);
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        if let Ok(port) = rest.parse::<u16>() {
            return Ok(Self::local(port));
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid endpoint '{}': expected PORT or HOST:PORT", s))?;
        if host.is_empty() {
            return Err(format!("invalid endpoint '{}': missing host", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{}': {}", s, e))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("8613".parse::<Endpoint>().unwrap(), Endpoint::local(8613));
        assert_eq!(
            "worker.local:9001".parse::<Endpoint>().unwrap(),
            Endpoint {
                host: "worker.local".into(),
                port: 9001
            }
        );
    }

    #[test]
    fn test_display_parses_back() {
        let endpoint = Endpoint {
            host: "10.0.0.5".into(),
            port: 8700,
        };
        assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
    }

    #[test]
    fn test_parse_errors() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("localhost:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_display_is_client_url() {
        assert_eq!(Endpoint::local(8613).to_url(), "http://127.0.0.1:8613/");
        assert_eq!(Endpoint::local(8613).to_string(), "http://127.0.0.1:8613/");
    }
}
