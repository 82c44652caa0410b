//! NAT-PMP ([RFC 6886]) port mapping for the DHT socket.
//!
//! A node behind a home router only receives unsolicited queries if the
//! router forwards its UDP port. [`PortMapper`] asks the gateway to do so;
//! failure is never fatal, the node simply stays reachable only through the
//! NAT state its own queries open.
//!
//! ```no_run
//! use rdht::nat::PortMapper;
//!
//! # async fn example() -> Result<(), rdht::nat::NatError> {
//! let mapper = PortMapper::discover(None).await?;
//! let external_port = mapper.map_udp(6881, 3600).await?;
//! println!("Mapped to external port {}", external_port);
//! # Ok(())
//! # }
//! ```
//!
//! [RFC 6886]: https://www.rfc-editor.org/rfc/rfc6886

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{NATPMP_PORT, NATPMP_TIMEOUT};

const OP_EXTERNAL_ADDRESS: u8 = 0;
const OP_MAP_UDP: u8 = 1;
const RESPONSE_BIT: u8 = 128;

#[derive(Debug, Error)]
pub enum NatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Non-zero NAT-PMP result code.
    #[error("gateway refused: result code {0}")]
    Refused(u16),

    #[error("no NAT-PMP gateway found")]
    NoGateway,
}

/// A NAT-PMP capable gateway.
#[derive(Debug, Clone)]
pub struct PortMapper {
    gateway: Ipv4Addr,
}

impl PortMapper {
    /// Probes likely gateway addresses with an external-address request.
    ///
    /// When `local` is a private IPv4 address its `.1` neighbor is tried
    /// first.
    pub async fn discover(local: Option<IpAddr>) -> Result<Self, NatError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        for gateway in candidate_gateways(local) {
            let dest = SocketAddrV4::new(gateway, NATPMP_PORT);
            if socket
                .send_to(&[0, OP_EXTERNAL_ADDRESS], dest)
                .await
                .is_err()
            {
                continue;
            }

            let mut buf = [0u8; 16];
            if let Ok(Ok((n, _))) = timeout(NATPMP_TIMEOUT, socket.recv_from(&mut buf)).await {
                if parse_external_address(&buf[..n]).is_ok() {
                    debug!("NAT-PMP gateway at {}", gateway);
                    return Ok(Self { gateway });
                }
            }
        }

        Err(NatError::NoGateway)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Maps `port` for UDP and returns the external port the gateway chose.
    pub async fn map_udp(&self, port: u16, lifetime: u32) -> Result<u16, NatError> {
        let response = self.exchange(&mapping_request(port, port, lifetime)).await?;
        parse_mapping_response(&response)
    }

    /// Drops the UDP mapping for `port` (lifetime zero).
    pub async fn unmap_udp(&self, port: u16) -> Result<(), NatError> {
        let response = self.exchange(&mapping_request(port, 0, 0)).await?;
        parse_mapping_response(&response).map(|_| ())
    }

    pub async fn external_address(&self) -> Result<Ipv4Addr, NatError> {
        let response = self.exchange(&[0, OP_EXTERNAL_ADDRESS]).await?;
        parse_external_address(&response)
    }

    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, NatError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .send_to(request, SocketAddrV4::new(self.gateway, NATPMP_PORT))
            .await?;

        let mut buf = vec![0u8; 16];
        let (n, _) = timeout(NATPMP_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .map_err(|_| NatError::Timeout)??;
        buf.truncate(n);
        Ok(buf)
    }
}

fn candidate_gateways(local: Option<IpAddr>) -> Vec<Ipv4Addr> {
    let mut gateways = Vec::new();
    if let Some(IpAddr::V4(ip)) = local {
        if ip.is_private() {
            let [a, b, c, _] = ip.octets();
            gateways.push(Ipv4Addr::new(a, b, c, 1));
        }
    }
    for gateway in [
        Ipv4Addr::new(192, 168, 1, 1),
        Ipv4Addr::new(192, 168, 0, 1),
        Ipv4Addr::new(10, 0, 0, 1),
    ] {
        if !gateways.contains(&gateway) {
            gateways.push(gateway);
        }
    }
    gateways
}

fn mapping_request(internal_port: u16, external_port: u16, lifetime: u32) -> [u8; 12] {
    let mut request = [0u8; 12];
    request[1] = OP_MAP_UDP;
    request[4..6].copy_from_slice(&internal_port.to_be_bytes());
    request[6..8].copy_from_slice(&external_port.to_be_bytes());
    request[8..12].copy_from_slice(&lifetime.to_be_bytes());
    request
}

fn check_header(data: &[u8], op: u8, min_len: usize) -> Result<(), NatError> {
    if data.len() < min_len {
        return Err(NatError::InvalidResponse(format!(
            "{} bytes, expected {}",
            data.len(),
            min_len
        )));
    }
    if data[0] != 0 || data[1] != (RESPONSE_BIT | op) {
        return Err(NatError::InvalidResponse(format!(
            "unexpected version {} opcode {}",
            data[0], data[1]
        )));
    }
    match u16::from_be_bytes([data[2], data[3]]) {
        0 => Ok(()),
        code => Err(NatError::Refused(code)),
    }
}

fn parse_external_address(data: &[u8]) -> Result<Ipv4Addr, NatError> {
    check_header(data, OP_EXTERNAL_ADDRESS, 12)?;
    Ok(Ipv4Addr::new(data[8], data[9], data[10], data[11]))
}

fn parse_mapping_response(data: &[u8]) -> Result<u16, NatError> {
    check_header(data, OP_MAP_UDP, 16)?;
    Ok(u16::from_be_bytes([data[10], data[11]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_request_layout() {
        let request = mapping_request(6881, 6882, 3600);
        assert_eq!(
            request,
            [0, 1, 0, 0, 0x1a, 0xe1, 0x1a, 0xe2, 0, 0, 0x0e, 0x10]
        );
    }

    #[test]
    fn test_parse_mapping_response() {
        let mut response = [0u8; 16];
        response[1] = 129;
        response[8..10].copy_from_slice(&6881u16.to_be_bytes());
        response[10..12].copy_from_slice(&40000u16.to_be_bytes());
        assert_eq!(parse_mapping_response(&response).unwrap(), 40000);

        response[3] = 2;
        assert!(matches!(
            parse_mapping_response(&response),
            Err(NatError::Refused(2))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_opcode_and_short_reply() {
        let mut response = [0u8; 16];
        response[1] = 128;
        assert!(parse_mapping_response(&response).is_err());
        assert!(parse_external_address(&response[..8]).is_err());

        response[8..12].copy_from_slice(&[203, 0, 113, 7]);
        assert_eq!(
            parse_external_address(&response[..12]).unwrap(),
            Ipv4Addr::new(203, 0, 113, 7)
        );
    }

    #[test]
    fn test_candidate_gateways_prefers_local_subnet() {
        let local = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 7, 42)));
        let gateways = candidate_gateways(local);
        assert_eq!(gateways[0], Ipv4Addr::new(192, 168, 7, 1));
        assert_eq!(gateways.len(), 4);

        let gateways = candidate_gateways(Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert_eq!(gateways[0], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(gateways.len(), 3);
    }
}
