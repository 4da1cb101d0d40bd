//! Host name resolution for the client
//!
//! Resolution blocks, so the client runs [`resolve`] on a helper thread and
//! hands the answer back to the reactor. Names are looked up either with
//! the system resolver or, when a name server is configured, with a single
//! UDP `A` query to that server.

use super::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

/// Port of a name server given without one
pub const DNS_PORT: u16 = 53;

/// Default limit for one lookup
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;
const RCODE_NXDOMAIN: u16 = 3;

/// How host names are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsConfig {
    /// Query this server instead of using the system resolver
    pub name_server: Option<SocketAddr>,
    /// Give up on a lookup after this long; zero waits forever
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            name_server: None,
            timeout: DEFAULT_DNS_TIMEOUT,
        }
    }
}

impl DnsConfig {
    pub fn name_server(mut self, server: SocketAddr) -> Self {
        self.name_server = Some(server);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parse a name server address, `ip` or `ip:port`
pub fn parse_name_server(s: &str) -> Option<SocketAddr> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }
    s.trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
}

/// Resolve `host` to one address with `port`; blocks the calling thread
pub fn resolve(host: &str, port: u16, config: &DnsConfig) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    match config.name_server {
        Some(server) => {
            let ip = query(host, server, config.timeout)?;
            Ok(SocketAddr::new(ip, port))
        }
        None => (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Dns(format!("{}: {}", host, e)))?
            .next()
            .ok_or_else(|| Error::Dns(format!("{}: no address", host))),
    }
}

/// Ask `server` for the `A` record of `host`
fn query(host: &str, server: SocketAddr, timeout: Duration) -> Result<IpAddr> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local)?;
    socket.connect(server)?;

    let id = rand::random::<u16>();
    socket.send(&build_query(id, host)?)?;

    let deadline = Some(timeout)
        .filter(|t| !t.is_zero())
        .map(|t| Instant::now() + t);
    let mut buf = [0u8; 1500];
    loop {
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::Dns(format!("{}: no answer from {}", host, server)));
            }
            socket.set_read_timeout(Some(left))?;
        }
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(Error::Dns(format!("{}: no answer from {}", host, server)));
            }
            Err(e) => return Err(Error::Dns(format!("{}: {}", host, e))),
        };
        // Stray datagrams with another id are dropped.
        if let Some(ip) = parse_response(id, &buf[..n])
            .map_err(|e| Error::Dns(format!("{}: {}", host, e)))?
        {
            return Ok(ip);
        }
    }
}

/// Encode a recursive `A` query for `host`
pub(crate) fn build_query(id: u16, host: &str) -> Result<Vec<u8>> {
    let name = host.strip_suffix('.').unwrap_or(host);
    let mut msg = Vec::with_capacity(18 + name.len());
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&[0; 6]);

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(Error::Dns(format!("invalid host name {:?}", host)));
        }
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&TYPE_A.to_be_bytes());
    msg.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(msg)
}

/// Decode the answer to query `id`
///
/// `Ok(None)` means the message answers some other query.
pub(crate) fn parse_response(id: u16, msg: &[u8]) -> std::result::Result<Option<IpAddr>, String> {
    if msg.len() < 12 {
        return Err("short DNS message".to_string());
    }
    let field = |at: usize| u16::from_be_bytes([msg[at], msg[at + 1]]);
    if field(0) != id || field(2) & 0x8000 == 0 {
        return Ok(None);
    }
    match field(2) & 0x000f {
        0 => {}
        RCODE_NXDOMAIN => return Err("no such host".to_string()),
        rcode => return Err(format!("server answered rcode {}", rcode)),
    }

    let questions = field(4);
    let answers = field(6);
    let mut pos = 12;
    for _ in 0..questions {
        pos = skip_name(msg, pos)? + 4;
    }
    for _ in 0..answers {
        pos = skip_name(msg, pos)?;
        if pos + 10 > msg.len() {
            return Err("truncated answer".to_string());
        }
        let rtype = field(pos);
        let rdlen = field(pos + 8) as usize;
        let rdata = pos + 10;
        if rdata + rdlen > msg.len() {
            return Err("truncated answer".to_string());
        }
        match (rtype, rdlen) {
            (TYPE_A, 4) => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&msg[rdata..rdata + 4]);
                return Ok(Some(IpAddr::from(octets)));
            }
            (TYPE_AAAA, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&msg[rdata..rdata + 16]);
                return Ok(Some(IpAddr::from(octets)));
            }
            // CNAME and friends
            _ => pos = rdata + rdlen,
        }
    }
    Err("no address records".to_string())
}

/// Position just past the (possibly compressed) name at `pos`
fn skip_name(msg: &[u8], mut pos: usize) -> std::result::Result<usize, String> {
    loop {
        let Some(&len) = msg.get(pos) else {
            return Err("truncated name".to_string());
        };
        match len {
            0 => return Ok(pos + 1),
            len if len & 0xc0 == 0xc0 => {
                if pos + 2 > msg.len() {
                    return Err("truncated name".to_string());
                }
                return Ok(pos + 2);
            }
            len => pos += 1 + len as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Answer for `query` with one CNAME (compressed) then one A record
    fn answer(query: &[u8], ip: [u8; 4]) -> Vec<u8> {
        let mut msg = query.to_vec();
        msg[2] = 0x81; // QR, RD
        msg[3] = 0x80; // RA
        msg[7] = 2;
        // CNAME pointing back at the question name
        msg.extend_from_slice(&[0xc0, 12, 0, 5, 0, 1, 0, 0, 0, 60, 0, 2, 0xc0, 12]);
        msg.extend_from_slice(&[0xc0, 12, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4]);
        msg.extend_from_slice(&ip);
        msg
    }

    #[test]
    fn test_build_query() {
        let msg = build_query(0xabcd, "www.example.com.").unwrap();
        assert_eq!(&msg[..4], &[0xab, 0xcd, 0x01, 0x00]);
        assert_eq!(&msg[4..12], &[0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&msg[12..29], b"\x03www\x07example\x03com\x00");
        assert_eq!(&msg[29..], &[0, 1, 0, 1]);

        assert!(build_query(1, "a..b").is_err());
        assert!(build_query(1, &"x".repeat(64)).is_err());
    }

    #[test]
    fn test_parse_response() {
        let query = build_query(7, "example.com").unwrap();
        let msg = answer(&query, [10, 1, 2, 3]);
        assert_eq!(
            parse_response(7, &msg).unwrap(),
            Some(IpAddr::from([10, 1, 2, 3]))
        );
        // another query's answer
        assert_eq!(parse_response(8, &msg).unwrap(), None);
        // our own query echoed back is not an answer
        assert_eq!(parse_response(7, &query).unwrap(), None);

        let mut nxdomain = query.clone();
        nxdomain[2] = 0x81;
        nxdomain[3] = 0x83;
        assert_eq!(parse_response(7, &nxdomain).unwrap_err(), "no such host");

        let mut empty = query.clone();
        empty[2] = 0x81;
        assert!(parse_response(7, &empty).is_err());
        assert!(parse_response(7, &msg[..msg.len() - 2]).is_err());
    }

    #[test]
    fn test_parse_name_server() {
        assert_eq!(
            parse_name_server("8.8.8.8"),
            Some("8.8.8.8:53".parse().unwrap())
        );
        assert_eq!(
            parse_name_server("127.0.0.1:5353"),
            Some("127.0.0.1:5353".parse().unwrap())
        );
        assert_eq!(parse_name_server("[::1]"), Some("[::1]:53".parse().unwrap()));
        assert_eq!(parse_name_server("dns.example"), None);
    }

    #[test]
    fn test_resolve_with_name_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = DnsConfig::default().name_server(server.local_addr().unwrap());
        let responder = thread::spawn(move || {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).unwrap();
            server.send_to(&answer(&buf[..n], [127, 0, 0, 9]), peer).unwrap();
        });

        let addr = resolve("svc.test", 8080, &config).unwrap();
        responder.join().unwrap();
        assert_eq!(addr, "127.0.0.9:8080".parse().unwrap());
    }

    #[test]
    fn test_resolve_silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = DnsConfig::default()
            .name_server(server.local_addr().unwrap())
            .timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = resolve("svc.test", 80, &config).unwrap_err();
        assert!(matches!(err, Error::Dns(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_ip_literal() {
        let config = DnsConfig::default().name_server("192.0.2.1:53".parse().unwrap());
        assert_eq!(
            resolve("::1", 443, &config).unwrap(),
            "[::1]:443".parse().unwrap()
        );
    }
}
