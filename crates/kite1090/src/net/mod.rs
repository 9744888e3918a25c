/**
 * The network dispatcher: five services, each either listening (passive
 * mode) or connecting out to an upstream feeder (active mode, raw and
 * SBS input only).
 *
 * Output services fan every line out through a bounded broadcast
 * channel; a client too slow to keep up is closed rather than buffered
 * without bound, so the lines any client sees are always a prefix of
 * the global sequence. Denied peers are shut down before a single byte
 * is written.
 */
pub mod http;
pub mod raw;
pub mod sbs;

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use rx1090::decode::crc::score_and_repair;
use rx1090::decode::time::now_in_s;
use rx1090::demod::ModesFrame;

use crate::{Hub, PipelineEvent};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the per-service broadcast channel; a client lagging this
/// far behind is closed.
pub const BROADCAST_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    RawOut,
    RawIn,
    SbsOut,
    SbsIn,
    Http,
}

impl ServiceId {
    pub const ALL: [ServiceId; 5] = [
        ServiceId::RawOut,
        ServiceId::RawIn,
        ServiceId::SbsOut,
        ServiceId::SbsIn,
        ServiceId::Http,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServiceId::RawOut => "raw-out",
            ServiceId::RawIn => "raw-in",
            ServiceId::SbsOut => "sbs-out",
            ServiceId::SbsIn => "sbs-in",
            ServiceId::Http => "http",
        }
    }

    fn index(self) -> usize {
        match self {
            ServiceId::RawOut => 0,
            ServiceId::RawIn => 1,
            ServiceId::SbsOut => 2,
            ServiceId::SbsIn => 3,
            ServiceId::Http => 4,
        }
    }
}

#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Every peer address ever accepted (denied ones included)
    pub unique_ips: HashSet<IpAddr>,
    pub accepted: u64,
    pub denied: u64,
    /// Clients closed because they could not keep up
    pub dropped: u64,
    /// Lines or frames moved through the service
    pub frames: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ServiceTable([ServiceStats; 5]);

impl ServiceTable {
    pub fn get(&self, id: ServiceId) -> &ServiceStats {
        &self.0[id.index()]
    }

    pub fn get_mut(&mut self, id: ServiceId) -> &mut ServiceStats {
        &mut self.0[id.index()]
    }
}

/// One network in CIDR notation, IPv4 or IPv6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (
                addr,
                Some(
                    prefix
                        .parse::<u8>()
                        .map_err(|e| format!("bad prefix in {s}: {e}"))?,
                ),
            ),
            None => (s, None),
        };
        let addr: IpAddr =
            addr.parse().map_err(|e| format!("bad address in {s}: {e}"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(format!("prefix /{prefix} too long in {s}"));
        }
        Ok(Cidr { addr, prefix })
    }
}

fn to_bits(addr: &IpAddr) -> (u128, u32) {
    match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(*v4)), 32),
        IpAddr::V6(v6) => (u128::from(*v6), 128),
    }
}

impl Cidr {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let (net, width) = to_bits(&self.addr);
        let (ip, ip_width) = to_bits(ip);
        if width != ip_width {
            return false;
        }
        if self.prefix == 0 {
            return true;
        }
        let shift = width - u32::from(self.prefix);
        (net >> shift) == (ip >> shift)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DenyList {
    rules: Vec<Cidr>,
}

impl DenyList {
    pub fn new(deny4: &[Cidr], deny6: &[Cidr]) -> Self {
        let mut rules = deny4.to_vec();
        rules.extend_from_slice(deny6);
        DenyList { rules }
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        self.rules.iter().any(|rule| rule.contains(ip))
    }
}

/// Record the accept in the service statistics and apply the deny list.
/// Returns false when the connection must be closed unanswered.
async fn admit(
    hub: &Arc<Mutex<Hub>>,
    service: ServiceId,
    deny: &DenyList,
    peer: IpAddr,
) -> bool {
    let mut hub = hub.lock().await;
    let stats = hub.services.get_mut(service);
    stats.unique_ips.insert(peer);
    if deny.matches(&peer) {
        stats.denied += 1;
        debug!("{}: denied connection from {peer}", service.name());
        false
    } else {
        stats.accepted += 1;
        info!("{}: client {peer} connected", service.name());
        true
    }
}

/// Accept loop of one output service: every admitted client gets its own
/// writer task fed from the broadcast channel.
pub async fn serve_output(
    service: ServiceId,
    listener: TcpListener,
    tx: broadcast::Sender<String>,
    deny: DenyList,
    hub: Arc<Mutex<Hub>>,
    mut exit: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        hub.lock().await.services.get_mut(service).last_error =
                            Some(e.to_string());
                        continue;
                    }
                };
                if !admit(&hub, service, &deny, peer.ip()).await {
                    let _ = stream.shutdown().await;
                    continue;
                }
                let rx = tx.subscribe();
                tokio::spawn(pump_client(
                    service,
                    stream,
                    rx,
                    hub.clone(),
                    exit.clone(),
                ));
            }
        }
    }
}

async fn pump_client(
    service: ServiceId,
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<String>,
    hub: Arc<Mutex<Hub>>,
    mut exit: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    break;
                }
            }
            line = rx.recv() => match line {
                Ok(line) => {
                    if stream.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // a slow client is closed, not buffered forever
                    warn!(
                        "{}: client lagged by {n} lines, closing",
                        service.name()
                    );
                    hub.lock().await.services.get_mut(service).dropped += 1;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    let _ = stream.shutdown().await;
}

/// Validation applied to frames arriving from the network before they
/// enter the decoding pipeline.
#[derive(Clone)]
pub struct RawSink {
    pub events: mpsc::Sender<PipelineEvent>,
    pub fix_single: bool,
    pub fix_two: bool,
}

impl RawSink {
    /// Check, repair and forward one frame; bad frames are only counted.
    async fn ingest(&self, hub: &Arc<Mutex<Hub>>, mut frame: Vec<u8>) -> bool {
        let now = now_in_s();
        let scored = {
            let mut hub = hub.lock().await;
            let scored = score_and_repair(
                &mut frame,
                self.fix_single,
                self.fix_two,
                &hub.cache,
                now,
            );
            if scored.score >= 0 {
                if scored.standalone {
                    hub.cache.insert(scored.addr, now);
                }
                hub.services.get_mut(ServiceId::RawIn).frames += 1;
            } else {
                hub.demod.rejected_bad += 1;
            }
            scored
        };
        if scored.score < 0 {
            return true;
        }
        self.events
            .send(PipelineEvent::Frame(ModesFrame {
                msg: frame,
                score: scored.score,
                corrected: scored.corrected,
                signal_level: 0.0,
                timestamp: 0,
            }))
            .await
            .is_ok()
    }
}

/// Accept loop of the passive raw input service.
pub async fn serve_raw_input(
    listener: TcpListener,
    deny: DenyList,
    hub: Arc<Mutex<Hub>>,
    sink: RawSink,
    mut exit: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        hub.lock().await
                            .services.get_mut(ServiceId::RawIn).last_error =
                            Some(e.to_string());
                        continue;
                    }
                };
                if !admit(&hub, ServiceId::RawIn, &deny, peer.ip()).await {
                    let _ = stream.shutdown().await;
                    continue;
                }
                tokio::spawn(run_raw_stream(
                    stream,
                    hub.clone(),
                    sink.clone(),
                    exit.clone(),
                ));
            }
        }
    }
}

/// Pump one raw input connection (accepted or actively established).
pub async fn run_raw_stream<S>(
    stream: S,
    hub: Arc<Mutex<Hub>>,
    sink: RawSink,
    mut exit: watch::Receiver<bool>,
) where
    S: AsyncRead + Unpin,
{
    let mut stream = stream;
    let mut deframer = raw::Deframer::new();
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    return;
                }
            }
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        deframer.feed(&buf[..n]);
                        while let Some(frame) = deframer.next_frame() {
                            if !sink.ingest(&hub, frame).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Datagram flavour of the raw input: payloads join the same stream
/// parser, datagram boundaries carry no framing meaning.
pub async fn serve_raw_udp(
    socket: UdpSocket,
    deny: DenyList,
    hub: Arc<Mutex<Hub>>,
    sink: RawSink,
    mut exit: watch::Receiver<bool>,
) {
    let mut deframer = raw::Deframer::new();
    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    return;
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = match received {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                if deny.matches(&peer.ip()) {
                    continue;
                }
                deframer.feed(&buf[..n]);
                while let Some(frame) = deframer.next_frame() {
                    if !sink.ingest(&hub, frame).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Pump one SBS input connection: CSV lines become synthetic updates.
pub async fn run_sbs_stream(
    stream: TcpStream,
    hub: Arc<Mutex<Hub>>,
    events: mpsc::Sender<PipelineEvent>,
    mut exit: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = exit.changed() => {
                if *exit.borrow() {
                    return;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(update) = sbs::parse_line(&line) {
                            hub.lock().await
                                .services.get_mut(ServiceId::SbsIn).frames += 1;
                            if events
                                .send(PipelineEvent::Sbs(update))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
        }
    }
}

/// Establish an outgoing connection to an upstream feeder, with the
/// 5-second timeout of active mode.
pub async fn connect_active(
    host: &str,
    service: ServiceId,
) -> io::Result<TcpStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(host)).await
    {
        Ok(Ok(stream)) => {
            info!("{}: connected to {host}", service.name());
            Ok(stream)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{}: timeout connecting to {host}", service.name()),
        )),
    }
}
