//! Demo configuration, read from `ACLIENT_*` environment variables

use std::net::SocketAddr;
use std::time::Duration;

use crate::http::dns;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server address, `host:port`
    pub addr: String,
    /// `Host` header value (also the TLS server name)
    pub host: String,
    pub url: String,
    pub connect_timeout: Duration,
    pub rw_timeout: Duration,
    /// Name server for host lookups; the system resolver when unset
    pub name_server: Option<SocketAddr>,
    pub dns_timeout: Duration,
    pub accept_gzip: bool,
    pub unzip: bool,
    pub keep_alive: bool,
    pub debug: bool,
    pub websocket: bool,
    pub tls: bool,
    pub tls_verify: bool,
    /// Lines the producer thread writes before hanging up
    pub producer_lines: usize,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let flag = |key: &str| {
            lookup(key).is_some_and(|v| {
                matches!(
                    v.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
        };
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            addr: string("ACLIENT_ADDR", "127.0.0.1:80"),
            host: string("ACLIENT_HOST", "www.baidu.com"),
            url: string("ACLIENT_URL", "/"),
            connect_timeout: Duration::from_secs(number("ACLIENT_CONNECT_TIMEOUT", 5)),
            rw_timeout: Duration::from_secs(number("ACLIENT_RW_TIMEOUT", 5)),
            name_server: lookup("ACLIENT_NAME_SERVER").and_then(|v| dns::parse_name_server(&v)),
            dns_timeout: Duration::from_secs(number("ACLIENT_DNS_TIMEOUT", 5)),
            accept_gzip: flag("ACLIENT_GZIP"),
            unzip: flag("ACLIENT_UNZIP"),
            keep_alive: flag("ACLIENT_KEEP_ALIVE"),
            debug: flag("ACLIENT_DEBUG"),
            websocket: flag("ACLIENT_WEBSOCKET"),
            tls: flag("ACLIENT_TLS"),
            tls_verify: flag("ACLIENT_TLS_VERIFY"),
            producer_lines: number("ACLIENT_PRODUCER_LINES", 5) as usize,
        }
    }
}
