//! Address resolution
//!
//! Bind-address expansion and peer identity lookup. Reverse DNS is
//! best-effort; a PTR record that is itself a numeric address is treated as a
//! spoofing attempt and replaced by a marker naming the real IP.

use std::ffi::CStr;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use socket2::SockAddr;

/// Buffer size for reverse lookups (glibc `NI_MAXHOST`)
const MAX_HOST_LEN: usize = 1025;

/// Resolved identity of a connected peer
///
/// Resolved once at accept time; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Socket address of the peer
    pub addr: SocketAddr,

    /// Hostname, the IP when unresolved, or the malicious marker
    pub hostname: Arc<str>,

    /// Numeric IP as text
    pub ip: Arc<str>,

    /// PTR record looked like a numeric address
    pub malicious: bool,
}

impl PeerIdentity {
    /// Identity without a name lookup
    pub fn numeric(addr: SocketAddr) -> Self {
        let ip: Arc<str> = Arc::from(addr.ip().to_string());
        Self {
            addr,
            hostname: ip.clone(),
            ip,
            malicious: false,
        }
    }

    /// Identity from the result of a reverse lookup
    ///
    /// A name that parses as an IP address is never trusted.
    pub fn from_lookup(addr: SocketAddr, name: Option<String>) -> Self {
        let Some(name) = name else {
            return Self::numeric(addr);
        };

        let ip = addr.ip().to_string();
        if name.parse::<IpAddr>().is_ok() {
            tracing::warn!(
                peer = %ip,
                ptr = %name,
                "malicious PTR record: reverse lookup returned a numeric address"
            );
            return Self {
                addr,
                hostname: Arc::from(format!("[MALICIOUS:IP={ip}]")),
                ip: Arc::from(ip),
                malicious: true,
            };
        }

        Self {
            addr,
            hostname: Arc::from(name),
            ip: Arc::from(ip),
            malicious: false,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self.hostname == *self.ip {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{} ({})", self.hostname, self.addr)
        }
    }
}

/// Address resolution seam
pub trait AddressResolver: Send + Sync {
    /// Socket addresses to bind for `address` (`None` = wildcard) and `port`
    fn resolve_bind(&self, address: Option<&str>, port: u16) -> io::Result<Vec<SocketAddr>>;

    /// Identity of an accepted peer
    fn resolve_peer(&self, addr: &SocketAddr) -> PeerIdentity;
}

/// Resolver backed by the system's getaddrinfo/getnameinfo
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver {
    dns_enabled: bool,
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self { dns_enabled: true }
    }
}

impl SystemResolver {
    /// Create a resolver; with `dns_enabled == false` peers are named by IP
    pub fn new(dns_enabled: bool) -> Self {
        Self { dns_enabled }
    }

    /// Whether reverse lookups are performed
    pub fn dns_enabled(&self) -> bool {
        self.dns_enabled
    }
}

impl AddressResolver for SystemResolver {
    fn resolve_bind(&self, address: Option<&str>, port: u16) -> io::Result<Vec<SocketAddr>> {
        match address.map(str::trim) {
            None | Some("") | Some("*") => Ok(wildcard_addrs(port)),
            Some(host) => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                let mut addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
                addrs.dedup();
                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no addresses found for {host}"),
                    ));
                }
                Ok(addrs)
            }
        }
    }

    fn resolve_peer(&self, addr: &SocketAddr) -> PeerIdentity {
        if !self.dns_enabled {
            return PeerIdentity::numeric(*addr);
        }
        PeerIdentity::from_lookup(*addr, reverse_lookup(addr))
    }
}

/// IPv6 and IPv4 wildcard candidates
pub fn wildcard_addrs(port: u16) -> Vec<SocketAddr> {
    vec![
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
    ]
}

/// PTR lookup; `None` when the address has no name
fn reverse_lookup(addr: &SocketAddr) -> Option<String> {
    let sockaddr = SockAddr::from(*addr);
    let mut host = [0 as libc::c_char; MAX_HOST_LEN];

    // SAFETY: `sockaddr` is a valid socket address of `sockaddr.len()` bytes and
    // `host` is writable for its full length; no service buffer is requested.
    let rc = unsafe {
        libc::getnameinfo(
            sockaddr.as_ptr().cast::<libc::sockaddr>(),
            sockaddr.len(),
            host.as_mut_ptr(),
            host.len() as _,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }

    // SAFETY: getnameinfo NUL-terminates `host` on success.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    let name = name.to_string_lossy().into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.0.2.7:40000".parse().unwrap()
    }

    #[test]
    fn test_numeric_identity() {
        let peer = PeerIdentity::numeric(addr());
        assert_eq!(&*peer.hostname, "192.0.2.7");
        assert_eq!(&*peer.ip, "192.0.2.7");
        assert!(!peer.malicious);
    }

    #[test]
    fn test_lookup_with_name() {
        let peer = PeerIdentity::from_lookup(addr(), Some("relay.example.net".into()));
        assert_eq!(&*peer.hostname, "relay.example.net");
        assert_eq!(&*peer.ip, "192.0.2.7");
        assert!(!peer.malicious);
    }

    #[test]
    fn test_lookup_without_name_falls_back_to_ip() {
        let peer = PeerIdentity::from_lookup(addr(), None);
        assert_eq!(&*peer.hostname, "192.0.2.7");
    }

    #[test]
    fn test_numeric_ptr_is_marked_malicious() {
        let peer = PeerIdentity::from_lookup(addr(), Some("10.0.0.1".into()));
        assert_eq!(&*peer.hostname, "[MALICIOUS:IP=192.0.2.7]");
        assert_eq!(&*peer.ip, "192.0.2.7");
        assert!(peer.malicious);

        let peer = PeerIdentity::from_lookup(addr(), Some("::1".into()));
        assert!(peer.malicious);
    }

    #[test]
    fn test_dns_disabled_uses_ip() {
        let resolver = SystemResolver::new(false);
        let peer = resolver.resolve_peer(&addr());
        assert_eq!(&*peer.hostname, "192.0.2.7");
        assert!(!peer.malicious);
    }

    #[test]
    fn test_resolve_bind_wildcard() {
        let resolver = SystemResolver::default();
        for address in [None, Some(""), Some("*")] {
            let addrs = resolver.resolve_bind(address, 514).unwrap();
            assert_eq!(addrs.len(), 2);
            assert!(addrs.iter().any(|a| a.is_ipv6() && a.ip().is_unspecified()));
            assert!(addrs.iter().any(|a| a.is_ipv4() && a.ip().is_unspecified()));
            assert!(addrs.iter().all(|a| a.port() == 514));
        }
    }

    #[test]
    fn test_resolve_bind_numeric() {
        let resolver = SystemResolver::default();
        let addrs = resolver.resolve_bind(Some("127.0.0.1"), 1514).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:1514".parse::<SocketAddr>().unwrap()]);

        let addrs = resolver.resolve_bind(Some("[::1]"), 1514).unwrap();
        assert_eq!(addrs, vec!["[::1]:1514".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_display() {
        let peer = PeerIdentity::numeric(addr());
        assert_eq!(peer.to_string(), "192.0.2.7:40000");

        let peer = PeerIdentity::from_lookup(addr(), Some("relay".into()));
        assert_eq!(peer.to_string(), "relay (192.0.2.7:40000)");
    }
}
