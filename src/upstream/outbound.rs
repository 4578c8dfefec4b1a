/// Outbound identity selection
///
/// Every upstream call goes out through a freshly chosen identity: a local
/// bind address with randomized trailing bits, or a proxy drawn from a list
/// loaded at startup. Selection is a pure function of the strategy and the
/// random source so it can be driven by a seeded RNG in tests.
use crate::error::{ProxyError, ProxyResult};
use rand::{seq::SliceRandom, Rng};
use reqwest::Url;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::Path,
};

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    fn parse(s: &str) -> ProxyResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyScheme::Http),
            "https" => Ok(ProxyScheme::Https),
            "socks5" | "socks5h" => Ok(ProxyScheme::Socks5),
            other => Err(ProxyError::Config(format!(
                "Unsupported proxy scheme: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

/// One entry of the proxy list
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyEntry {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEntry")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ProxyEntry {
    /// Parse `[scheme://]host:port[:username:password]`
    ///
    /// IPv6 hosts are written in brackets, e.g. `[2001:db8::1]:8080`, and
    /// keep them so the host drops straight into a URL.
    pub fn parse(line: &str) -> ProxyResult<Self> {
        let line = line.trim();
        let (scheme, rest) = match line.split_once("://") {
            Some((scheme, rest)) => (ProxyScheme::parse(scheme)?, rest),
            None => (ProxyScheme::Http, line),
        };

        let (host, remainder) = split_host(rest)
            .ok_or_else(|| ProxyError::Config(format!("Proxy entry missing port: {}", line)))?;
        if host.is_empty() || host == "[]" {
            return Err(ProxyError::Config(format!("Proxy entry missing host: {}", line)));
        }

        let mut parts = remainder.splitn(3, ':');
        let port = parts
            .next()
            .unwrap_or_default()
            .parse::<u16>()
            .map_err(|_| ProxyError::Config(format!("Invalid proxy port: {}", line)))?;

        let (username, password) = match (parts.next(), parts.next()) {
            (None, None) => (None, None),
            (Some(user), Some(pass)) => (Some(user.to_string()), Some(pass.to_string())),
            _ => {
                return Err(ProxyError::Config(format!(
                    "Proxy credentials need both username and password: {}",
                    host
                )))
            }
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// Proxy URL with credentials embedded as userinfo
    pub fn to_url(&self) -> ProxyResult<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            self.scheme.as_str(),
            self.host,
            self.port
        ))
        .map_err(|e| ProxyError::Config(format!("Invalid proxy {}: {}", self.host, e)))?;

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            url.set_username(user)
                .and_then(|_| url.set_password(Some(pass)))
                .map_err(|_| {
                    ProxyError::Config(format!("Proxy {} cannot carry credentials", self.host))
                })?;
        }

        Ok(url)
    }
}

/// Split `host:rest`, treating a bracketed host as one unit
fn split_host(rest: &str) -> Option<(&str, &str)> {
    if rest.starts_with('[') {
        let end = rest.find(']')?;
        let remainder = rest[end + 1..].strip_prefix(':')?;
        Some((&rest[..=end], remainder))
    } else {
        rest.split_once(':')
    }
}

/// Parse a proxy list, one entry per line; blank lines and `#` comments are skipped
pub fn parse_proxy_list(text: &str) -> ProxyResult<Vec<ProxyEntry>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ProxyEntry::parse)
        .collect()
}

/// Load a proxy list from disk
pub fn load_proxy_file(path: &Path) -> ProxyResult<Vec<ProxyEntry>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("Failed to read proxy file {:?}: {}", path, e))
    })?;

    let proxies = parse_proxy_list(&text)?;
    if proxies.is_empty() {
        return Err(ProxyError::Config(format!(
            "Proxy file {:?} contains no proxies",
            path
        )));
    }

    Ok(proxies)
}

/// How outbound identities are chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundStrategy {
    /// Let the OS pick the source address
    Direct,
    /// Bind to `base` with its last `random_bits` bits randomized
    LocalAddress { base: IpAddr, random_bits: u8 },
    /// Route through a uniformly chosen proxy
    Proxies(Vec<ProxyEntry>),
}

impl OutboundStrategy {
    /// Build a local-address strategy, checking the bit count fits the family
    pub fn local_address(base: IpAddr, random_bits: u8) -> ProxyResult<Self> {
        let width = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if u32::from(random_bits) > width {
            return Err(ProxyError::Config(format!(
                "IP_RANGE {} exceeds the {}-bit width of {}",
                random_bits, width, base
            )));
        }

        Ok(OutboundStrategy::LocalAddress { base, random_bits })
    }

    /// Pick the identity for one outbound call
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> OutboundIdentity {
        match self {
            OutboundStrategy::Direct => OutboundIdentity::Direct,
            OutboundStrategy::LocalAddress { base, random_bits } => {
                OutboundIdentity::LocalAddress(randomize_address(*base, *random_bits, rng))
            }
            OutboundStrategy::Proxies(proxies) => proxies
                .choose(rng)
                .cloned()
                .map(OutboundIdentity::Proxy)
                .unwrap_or(OutboundIdentity::Direct),
        }
    }
}

/// Identity used for a single outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundIdentity {
    Direct,
    LocalAddress(IpAddr),
    Proxy(ProxyEntry),
}

impl fmt::Display for OutboundIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundIdentity::Direct => write!(f, "direct"),
            OutboundIdentity::LocalAddress(addr) => write!(f, "local {}", addr),
            OutboundIdentity::Proxy(proxy) => {
                write!(f, "proxy {}://{}:{}", proxy.scheme.as_str(), proxy.host, proxy.port)
            }
        }
    }
}

/// Replace the last `random_bits` bits of `base` with random bits
///
/// Works for both address families; `random_bits` is clamped to the
/// family width.
pub fn randomize_address<R: Rng + ?Sized>(base: IpAddr, random_bits: u8, rng: &mut R) -> IpAddr {
    match base {
        IpAddr::V4(addr) => {
            let bits = u32::from(random_bits).min(32);
            let mask = if bits == 0 { 0 } else { u32::MAX >> (32 - bits) };
            let value = (u32::from(addr) & !mask) | (rng.gen::<u32>() & mask);
            IpAddr::V4(Ipv4Addr::from(value))
        }
        IpAddr::V6(addr) => {
            let bits = u32::from(random_bits).min(128);
            let mask = if bits == 0 { 0 } else { u128::MAX >> (128 - bits) };
            let value = (u128::from(addr) & !mask) | (rng.gen::<u128>() & mask);
            IpAddr::V6(Ipv6Addr::from(value))
        }
    }
}

/// Pick one of several equivalent endpoints
pub fn choose_endpoint<'a, R: Rng + ?Sized>(endpoints: &'a [String], rng: &mut R) -> Option<&'a str> {
    endpoints.choose(rng).map(String::as_str)
}
