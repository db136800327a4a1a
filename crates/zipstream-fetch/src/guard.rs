use std::net::IpAddr;

use url::{Host, Url};
use zipstream::FetchError;

/// The host of `source` if it is a literal IP address.
///
/// Hosts of non-special schemes (such as `s3`) are never parsed as IPs by
/// `url`, so dotted forms are checked by hand as well.
pub fn literal_ip_host(source: &Url) -> Option<String> {
    match source.host()? {
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Domain(domain) => domain
            .trim_matches(['[', ']'])
            .parse::<IpAddr>()
            .ok()
            .map(|ip| ip.to_string()),
    }
}

/// Reject sources that would connect to a literal IP address or that have
/// no host at all. Runs before any network I/O.
pub fn ensure_named_host(source: &Url) -> Result<(), FetchError> {
    if let Some(host) = literal_ip_host(source) {
        return Err(FetchError::IpAddressHost { host });
    }
    match source.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(FetchError::invalid(source, "missing host")),
    }
}
