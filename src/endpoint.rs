use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// An IPv4 socket address: a 32-bit address and 16-bit port.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    addr: SocketAddrV4,
}

impl Endpoint {
    /// Builds an endpoint from a port and an IPv4 address string, defaulting
    /// to `127.0.0.1` if `ip` fails to parse.
    pub fn new(port: u16, ip: &str) -> Endpoint {
        let ip = Ipv4Addr::from_str(ip).unwrap_or(Ipv4Addr::LOCALHOST);
        Endpoint {
            addr: SocketAddrV4::new(ip, port),
        }
    }

    pub fn loopback(port: u16) -> Endpoint {
        Endpoint::new(port, "127.0.0.1")
    }

    pub fn from_sockaddr(addr: SocketAddr) -> Endpoint {
        match addr {
            SocketAddr::V4(v4) => Endpoint { addr: v4 },
            SocketAddr::V6(v6) => {
                // The core is IPv4-only; fold a v4-mapped v6 address down,
                // otherwise fall back to the unspecified address rather than
                // panicking on an address this library was never meant to see.
                if let Some(v4) = v6.ip().to_ipv4() {
                    Endpoint {
                        addr: SocketAddrV4::new(v4, v6.port()),
                    }
                } else {
                    Endpoint {
                        addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, v6.port()),
                    }
                }
            }
        }
    }

    pub fn to_ip(self) -> String {
        self.addr.ip().to_string()
    }

    pub fn to_ip_port(self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }

    pub fn to_port(self) -> u16 {
        self.addr.port()
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::V4(self.addr)
    }

    pub fn to_socket_addr_v4(self) -> SocketAddrV4 {
        self.addr
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ip_port())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.to_ip_port())
    }
}
