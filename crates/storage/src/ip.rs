//! Public-IP discovery via an HTTP echo service, and the announce
//! multiaddrs derived from it.

use renderhive_types::error::NetworkError;
use std::net::IpAddr;

/// Asks the echo service which address this node is seen under.
///
/// The service replies with a single address in its body; failure is not
/// fatal to startup, the caller just announces nothing extra.
pub async fn discover_public_ip(
    http: &reqwest::Client,
    echo_url: &str,
) -> Result<IpAddr, NetworkError> {
    let body = http
        .get(echo_url)
        .send()
        .await
        .map_err(|e| NetworkError::Http {
            endpoint: echo_url.to_owned(),
            reason: e.to_string(),
        })?
        .text()
        .await
        .map_err(|e| NetworkError::Http {
            endpoint: echo_url.to_owned(),
            reason: e.to_string(),
        })?;
    body.trim()
        .parse()
        .map_err(|_| NetworkError::Http {
            endpoint: echo_url.to_owned(),
            reason: format!("echo service returned a non-address body: {}", body.trim()),
        })
}

/// The multiaddrs to announce for `ip`: TCP and QUIC on the swarm port.
pub fn announce_multiaddrs(ip: IpAddr, port: u16) -> Vec<String> {
    let proto = match ip {
        IpAddr::V4(_) => "ip4",
        IpAddr::V6(_) => "ip6",
    };
    vec![
        format!("/{proto}/{ip}/tcp/{port}"),
        format!("/{proto}/{ip}/udp/{port}/quic-v1"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiaddrs_for_both_families() {
        let v4 = announce_multiaddrs("203.0.113.9".parse().unwrap(), 4001);
        assert_eq!(
            v4,
            vec![
                "/ip4/203.0.113.9/tcp/4001".to_owned(),
                "/ip4/203.0.113.9/udp/4001/quic-v1".to_owned(),
            ]
        );

        let v6 = announce_multiaddrs("2001:db8::1".parse().unwrap(), 4001);
        assert!(v6[0].starts_with("/ip6/2001:db8::1/tcp/"));
        assert!(v6[1].ends_with("/quic-v1"));
    }
}
