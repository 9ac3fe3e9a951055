use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::directory::BindingTable;
use crate::engine::{Engine, Profile, Verdict};
use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpPacket};
use crate::pool::LeasePool;
use crate::relay::RelayInfo;

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// The DHCP server: UDP transport plus the protocol state machine.
///
/// Requests are processed strictly one at a time; each datagram is fully
/// decided and replied to before the next is read, so the engine needs no
/// locking.
pub struct DhcpServer {
    config: Config,
    engine: Engine,
    socket: UdpSocket,
}

impl DhcpServer {
    pub fn new(config: Config, bindings: BindingTable) -> Result<Self> {
        let socket = Self::create_socket()?;
        let pool = LeasePool::new(config.pool_start, config.pool_size);

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, DHCP_SERVER_PORT
        );
        info!(
            "dynamic pool: {} - {} ({} addresses), {} static bindings",
            pool.ip_at(0),
            pool.ip_at(config.pool_size - 1),
            config.pool_size,
            bindings.len()
        );

        let engine = Engine::new(
            bindings,
            pool,
            config.server_ip,
            config.lease_duration_seconds,
        );

        Ok(Self {
            config,
            engine,
            socket,
        })
    }

    fn create_socket() -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket
            .bind(&bind_addr.into())
            .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DHCP server ready and listening");

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    if let Err(err) = self.handle_datagram(&buffer[..size], source).await {
                        warn!("error handling packet from {}: {}", source, err);
                    }
                }
                Err(err) => {
                    error!("error receiving packet: {}", err);
                }
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    async fn handle_datagram(&mut self, data: &[u8], source: SocketAddr) -> Result<()> {
        let packet = DhcpPacket::parse(data)?;

        if packet.op != BOOTREQUEST {
            return Err(Error::InvalidPacket("Expected BOOTREQUEST".to_string()));
        }

        let mac = packet.mac();

        if let Some(raw) = packet.relay_agent_info() {
            let relay = RelayInfo::parse(raw);
            if !relay.is_empty() {
                debug!(
                    "request from {} relayed via switch {:?} port {:?}",
                    mac, relay.switch, relay.port
                );
            }
        }

        let Some(message_type) = packet.message_type() else {
            debug!("ignoring message without a DHCP message type from {}", mac);
            return Ok(());
        };

        info!("{} from {} ({})", message_type, mac, source);

        match message_type {
            MessageType::Discover => self.handle_discover(&packet).await,
            MessageType::Request => self.handle_request(&packet).await,
            MessageType::Release | MessageType::Decline => {
                self.engine.forget(mac);
                Ok(())
            }
            MessageType::Inform => {
                info!("INFORM from {} at {}", mac, packet.ciaddr);
                Ok(())
            }
            other => {
                warn!("ignoring {} message", other);
                Ok(())
            }
        }
    }

    async fn handle_discover(&mut self, packet: &DhcpPacket) -> Result<()> {
        let Some(offer) = self.engine.offer(packet.mac()) else {
            // pool exhausted; the client retries on its own schedule
            return Ok(());
        };

        let options = self.reply_options(offer.profile, packet.parameter_request_list());
        let reply = DhcpPacket::create_reply(
            packet,
            MessageType::Offer,
            offer.ip,
            self.config.server_ip,
            options,
        );

        self.send_reply(&reply, packet).await
    }

    async fn handle_request(&mut self, packet: &DhcpPacket) -> Result<()> {
        let verdict = self.engine.confirm(
            packet.mac(),
            packet.requested_ip(),
            packet.server_identifier(),
        );

        match verdict {
            Verdict::Ack { ip, profile } => {
                let options = self.reply_options(profile, packet.parameter_request_list());
                let ack = DhcpPacket::create_reply(
                    packet,
                    MessageType::Ack,
                    ip,
                    self.config.server_ip,
                    options,
                );
                self.send_reply(&ack, packet).await
            }
            Verdict::Nak => {
                let options = vec![DhcpOption::ServerIdentifier(self.config.server_ip)];
                let nak = DhcpPacket::create_reply(
                    packet,
                    MessageType::Nak,
                    Ipv4Addr::UNSPECIFIED,
                    self.config.server_ip,
                    options,
                );
                self.send_reply(&nak, packet).await
            }
            Verdict::Ignore => Ok(()),
        }
    }

    /// Assembles the option set for an OFFER/ACK: server identifier and
    /// lease time, then the branch profile's options shaped by the
    /// client's parameter request list.
    fn reply_options(&self, profile: Profile, prl: Option<&[u8]>) -> Vec<DhcpOption> {
        let profile = match profile {
            Profile::Reserved => &self.config.reserved_options,
            Profile::Dynamic => &self.config.dynamic_options,
        };

        let mut options = vec![
            DhcpOption::ServerIdentifier(self.config.server_ip),
            DhcpOption::LeaseTime(self.config.lease_duration_seconds),
        ];
        options.extend(select_order_or_all(profile.to_options(), prl));
        options
    }

    async fn send_reply(&self, reply: &DhcpPacket, request: &DhcpPacket) -> Result<()> {
        let encoded = reply.encode();

        let is_nak = reply.message_type() == Some(MessageType::Nak);

        let destination = if request.giaddr != Ipv4Addr::UNSPECIFIED {
            SocketAddr::new(IpAddr::V4(request.giaddr), DHCP_SERVER_PORT)
        } else if is_nak || request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
        } else {
            SocketAddr::new(IpAddr::V4(request.ciaddr), DHCP_CLIENT_PORT)
        };

        self.socket.send_to(&encoded, destination).await?;

        Ok(())
    }
}

/// Returns the candidate options the client asked for, in the client's
/// preference order, or all of them when no preference list was sent.
fn select_order_or_all(candidates: Vec<DhcpOption>, prl: Option<&[u8]>) -> Vec<DhcpOption> {
    let Some(prl) = prl else {
        return candidates;
    };

    prl.iter()
        .filter_map(|code| {
            candidates
                .iter()
                .find(|option| option.option_code() == *code)
                .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryStrictness;
    use crate::directory::DirectoryRecord;
    use crate::options::OptionCode;
    use crate::packet::{HLEN_ETHERNET, HTYPE_ETHERNET, MacAddr};

    const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

    #[test]
    fn test_constants() {
        assert_eq!(DHCP_SERVER_PORT, 67);
        assert_eq!(DHCP_CLIENT_PORT, 68);
        assert_eq!(RECV_BUFFER_SIZE, 1500);
    }

    fn test_config() -> Config {
        Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 2),
            pool_start: Ipv4Addr::new(192, 168, 1, 10),
            pool_size: 5,
            lease_duration_seconds: 7200,
            network_prefix: [192, 168],
            ..Config::default()
        }
    }

    fn test_server(records: &[DirectoryRecord]) -> DhcpServer {
        let config = test_config();
        let bindings =
            BindingTable::from_records(records, config.network_prefix, DirectoryStrictness::Fatal)
                .unwrap();
        let pool = LeasePool::new(config.pool_start, config.pool_size);
        let engine = Engine::new(
            bindings,
            pool,
            config.server_ip,
            config.lease_duration_seconds,
        );

        let std_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        std_socket.set_nonblocking(true).unwrap();
        let socket = UdpSocket::from_std(std_socket).unwrap();

        DhcpServer {
            config,
            engine,
            socket,
        }
    }

    fn create_dhcp_packet(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; 400];

        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[3] = 0;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&mac);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        let mut index = 240;
        packet[index] = OptionCode::MessageType as u8;
        packet[index + 1] = 1;
        packet[index + 2] = message_type as u8;
        index += 3;

        for option in options {
            let encoded = option.encode();
            packet[index..index + encoded.len()].copy_from_slice(&encoded);
            index += encoded.len();
        }

        packet[index] = OptionCode::End as u8;
        packet
    }

    fn is_network_error(err: &Error) -> bool {
        matches!(err, Error::Io(_))
    }

    fn ok_or_network_error(result: &Result<()>) -> bool {
        result.is_ok() || result.as_ref().err().map(is_network_error).unwrap_or(false)
    }

    const MAC1: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
    const MAC2: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];

    #[tokio::test]
    async fn test_discover_reserves_a_pool_slot() {
        let mut server = test_server(&[]);

        let data = create_dhcp_packet(MessageType::Discover, MAC1, 0x12345678, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        let result = server.handle_discover(&packet).await;
        assert!(ok_or_network_error(&result));

        assert!(server.engine().pool().find_by_owner(&MacAddr(MAC1)).is_some());
    }

    #[tokio::test]
    async fn test_discover_then_request_acks_same_ip() {
        let mut server = test_server(&[]);

        let discover_data = create_dhcp_packet(MessageType::Discover, MAC1, 0xDEADBEEF, vec![]);
        let discover = DhcpPacket::parse(&discover_data).unwrap();
        let _ = server.handle_discover(&discover).await;

        let index = server.engine().pool().find_by_owner(&MacAddr(MAC1)).unwrap();
        let offered_ip = server.engine().pool().ip_at(index);

        let request_data = create_dhcp_packet(
            MessageType::Request,
            MAC1,
            0xDEADBEEF,
            vec![
                DhcpOption::RequestedIpAddress(offered_ip),
                DhcpOption::ServerIdentifier(server.config.server_ip),
            ],
        );
        let request = DhcpPacket::parse(&request_data).unwrap();
        let result = server.handle_request(&request).await;
        assert!(ok_or_network_error(&result));

        let entry = server.engine().pool().entry(index).unwrap();
        assert_eq!(entry.owner, MacAddr(MAC1));
        assert!(entry.remaining_seconds() > 7100);
    }

    #[tokio::test]
    async fn test_request_for_other_server_leaves_no_lease() {
        let mut server = test_server(&[]);
        let other_server = Ipv4Addr::new(192, 168, 1, 3);

        let data = create_dhcp_packet(
            MessageType::Request,
            MAC1,
            0x12345678,
            vec![
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 10)),
                DhcpOption::ServerIdentifier(other_server),
            ],
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        let result = server.handle_request(&packet).await;
        assert!(result.is_ok());
        assert_eq!(server.engine().pool().live_count(), 0);
    }

    #[tokio::test]
    async fn test_request_for_foreign_slot_keeps_owner() {
        let mut server = test_server(&[]);

        let discover_data = create_dhcp_packet(MessageType::Discover, MAC1, 1, vec![]);
        let discover = DhcpPacket::parse(&discover_data).unwrap();
        let _ = server.handle_discover(&discover).await;

        let index = server.engine().pool().find_by_owner(&MacAddr(MAC1)).unwrap();
        let taken_ip = server.engine().pool().ip_at(index);

        let request_data = create_dhcp_packet(
            MessageType::Request,
            MAC2,
            2,
            vec![
                DhcpOption::RequestedIpAddress(taken_ip),
                DhcpOption::ServerIdentifier(server.config.server_ip),
            ],
        );
        let request = DhcpPacket::parse(&request_data).unwrap();
        let result = server.handle_request(&request).await;
        assert!(ok_or_network_error(&result));

        assert_eq!(
            server.engine().pool().entry(index).unwrap().owner,
            MacAddr(MAC1)
        );
    }

    #[tokio::test]
    async fn test_release_drops_the_lease() {
        let mut server = test_server(&[]);

        let discover_data = create_dhcp_packet(MessageType::Discover, MAC1, 1, vec![]);
        let discover = DhcpPacket::parse(&discover_data).unwrap();
        let _ = server.handle_discover(&discover).await;
        assert!(server.engine().pool().find_by_owner(&MacAddr(MAC1)).is_some());

        let release_data = create_dhcp_packet(MessageType::Release, MAC1, 2, vec![]);
        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        server.handle_datagram(&release_data, source).await.unwrap();

        assert!(server.engine().pool().find_by_owner(&MacAddr(MAC1)).is_none());
    }

    #[tokio::test]
    async fn test_release_without_lease_is_silent() {
        let mut server = test_server(&[]);

        let release_data = create_dhcp_packet(MessageType::Release, MAC1, 2, vec![]);
        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(server.handle_datagram(&release_data, source).await.is_ok());
    }

    #[tokio::test]
    async fn test_inform_touches_no_state() {
        let mut server = test_server(&[]);

        let inform_data = create_dhcp_packet(MessageType::Inform, MAC1, 3, vec![]);
        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        server.handle_datagram(&inform_data, source).await.unwrap();

        assert_eq!(server.engine().pool().live_count(), 0);
    }

    #[tokio::test]
    async fn test_static_client_offered_reserved_address() {
        let mut server = test_server(&[DirectoryRecord {
            mac: "aa:bb:cc:dd:ee:03".to_string(),
            net: 2,
            host: 9,
            active: true,
            valid_to: None,
        }]);

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];
        let data = create_dhcp_packet(MessageType::Discover, mac, 4, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        let result = server.handle_discover(&packet).await;
        assert!(ok_or_network_error(&result));

        // no pool slot was consumed for the reserved client
        assert!(server.engine().pool().find_by_owner(&MacAddr(mac)).is_none());
    }

    #[tokio::test]
    async fn test_bootreply_rejected() {
        let mut server = test_server(&[]);

        let mut data = create_dhcp_packet(MessageType::Discover, MAC1, 5, vec![]);
        data[0] = 2;

        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(server.handle_datagram(&data, source).await.is_err());
    }

    #[tokio::test]
    async fn test_reply_options_dynamic_profile_without_prl() {
        let server = test_server(&[]);
        let options = server.reply_options(Profile::Dynamic, None);

        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::ServerIdentifier(ip) if *ip == server.config.server_ip
        )));
        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::LeaseTime(t) if *t == server.config.lease_duration_seconds
        )));
        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::SubnetMask(mask) if *mask == server.config.dynamic_options.subnet_mask
        )));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::Router(_))));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::DnsServer(_))));
    }

    #[tokio::test]
    async fn test_reply_options_reserved_profile() {
        let server = test_server(&[]);
        let options = server.reply_options(Profile::Reserved, None);

        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::SubnetMask(mask) if *mask == server.config.reserved_options.subnet_mask
        )));
    }

    #[test]
    fn test_select_order_or_all_follows_client_preference() {
        let candidates = test_config().dynamic_options.to_options();

        // client asks for DNS then subnet mask, nothing else
        let shaped = select_order_or_all(candidates.clone(), Some(&[6, 1]));
        assert_eq!(shaped.len(), 2);
        assert!(matches!(shaped[0], DhcpOption::DnsServer(_)));
        assert!(matches!(shaped[1], DhcpOption::SubnetMask(_)));

        // unknown requested codes are skipped
        let shaped = select_order_or_all(candidates.clone(), Some(&[42, 3]));
        assert_eq!(shaped.len(), 1);
        assert!(matches!(shaped[0], DhcpOption::Router(_)));

        // no list means everything
        let shaped = select_order_or_all(candidates.clone(), None);
        assert_eq!(shaped.len(), candidates.len());
    }
}
