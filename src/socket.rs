use crate::{
    config::RtpConfig,
    error::{BridgeError, BridgeResult},
};
use socket2::{Domain, Protocol as SockProto, SockAddr, Socket, TcpKeepalive, Type};
use std::{
    net::{IpAddr, SocketAddr, TcpListener, UdpSocket},
    sync::Mutex,
    time::Duration,
};
use tracing::{info, instrument};

/// Binds the framed-TCP acceptor the telephony switch connects to (§4.2).
#[instrument]
pub fn init_tcp_socket(bind_addr: IpAddr, port: u16) -> BridgeResult<TcpListener> {
    let addr = SocketAddr::new(bind_addr, port);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProto::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_keepalive(true)?;
    socket.set_tcp_keepalive(&keepalive)?;
    socket.set_tcp_nodelay(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(1024)?;

    info!("Listening for switch connections on {addr}");
    Ok(socket.into())
}

/// Allocates RTP media sockets from a fixed even-numbered port range (§4.3, §5).
///
/// Asterisk's ExternalMedia channels expect an RTP port and assume the following
/// odd port is reserved for RTCP, even though this bridge never sends RTCP itself.
pub struct RtpPortPool {
    bind_host: IpAddr,
    port_start: u16,
    port_end: u16,
    cursor: Mutex<u16>,
}

impl RtpPortPool {
    pub fn new(config: &RtpConfig) -> Self {
        Self {
            bind_host: config.bind_host,
            port_start: config.port_start,
            port_end: config.port_end,
            cursor: Mutex::new(config.port_start),
        }
    }

    /// Binds the next free even port in the pool, round-robining past ports
    /// that are already in use by the OS.
    #[instrument(skip(self))]
    pub fn allocate(&self) -> BridgeResult<UdpSocket> {
        let span = self.port_end.saturating_sub(self.port_start) / 2 + 1;
        let mut cursor = self.cursor.lock().expect("rtp port cursor poisoned");

        for _ in 0..span {
            let port = *cursor;
            *cursor = if *cursor + 2 > self.port_end {
                self.port_start
            } else {
                *cursor + 2
            };

            let addr = SocketAddr::new(self.bind_host, port);
            match create_rtp_socket(addr) {
                Ok(socket) => return Ok(socket),
                Err(_) => continue,
            }
        }

        Err(BridgeError::PortPoolExhausted)
    }
}

fn create_rtp_socket(addr: SocketAddr) -> BridgeResult<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(SockProto::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;
    Ok(socket.into())
}
