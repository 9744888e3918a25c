#![doc = include_str!("../readme.md")]

mod interactive;
mod net;
mod registry;

use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rx1090::decode::cpr::Position;
use rx1090::prelude::*;
use rx1090::source::file::read_iq_file;
use rx1090::demod::{demodulate2400, DemodConfig, DemodStats, ModesFrame};

use net::http::HttpConfig;
use net::sbs::SbsUpdate;
use net::{Cidr, DenyList, RawSink, ServiceId, ServiceTable};
use registry::Registry;

#[derive(Debug, Parser)]
#[command(
    name = "kite1090",
    version,
    about = "Mode S receiver with raw, SBS and HTTP/JSON network services"
)]
struct Options {
    /// Read IQ samples (unsigned 8-bit interleaved, 2.4 MHz) from a
    /// file, `-` for stdin
    #[arg(long)]
    infile: Option<String>,

    /// Replay the sample file that many times, 0 meaning forever
    #[arg(long, default_value = "1")]
    loops: u32,

    /// Print aircraft rows as they evolve
    #[arg(long, default_value = "false")]
    interactive: bool,

    /// Seconds without a message before an aircraft is dropped
    #[arg(long, default_value = "60")]
    interactive_ttl: u64,

    /// Enable the network services
    #[arg(long, default_value = "false")]
    net: bool,

    /// Network services alone, without any demodulation source
    #[arg(long, default_value = "false")]
    net_only: bool,

    /// Connect to upstream feeders instead of listening for them
    #[arg(long, default_value = "false")]
    net_active: bool,

    /// Echo accepted frames to stdout as raw hex
    #[arg(long, default_value = "false")]
    raw: bool,

    /// Also try two-bit error repair on DF 17/18
    #[arg(long, default_value = "false")]
    aggressive: bool,

    /// Disable single-bit error repair
    #[arg(long, default_value = "false")]
    no_fix: bool,

    /// Tuner frequency in Hz (device mode only)
    #[arg(long, default_value = "1090000000")]
    freq: u64,

    /// Tuner gain in dB, or `auto` (device mode only)
    #[arg(long, default_value = "auto")]
    gain: String,

    /// Tuner frequency correction in ppm (device mode only)
    #[arg(long, default_value = "0")]
    ppm: i32,

    /// Raw output port
    #[arg(long, default_value = "30002")]
    net_ro_port: u16,

    /// Raw input port (TCP, and UDP in passive mode)
    #[arg(long, default_value = "30001")]
    net_ri_port: u16,

    /// SBS output port
    #[arg(long, default_value = "30003")]
    net_sbs_port: u16,

    /// HTTP port
    #[arg(long, default_value = "8080")]
    net_http_port: u16,

    /// host:port of the upstream raw feeder (with --net-active)
    #[arg(long)]
    host_raw_in: Option<String>,

    /// host:port of the upstream SBS feeder (with --net-active)
    #[arg(long)]
    host_sbs_in: Option<String>,

    /// Receiver latitude, the local-decode reference
    #[arg(long)]
    lat: Option<f64>,

    /// Receiver longitude
    #[arg(long)]
    lon: Option<f64>,

    /// Metric units in the interactive view
    #[arg(long, default_value = "false")]
    metric: bool,

    /// IPv4 network never served, in CIDR notation (repeatable)
    #[arg(long)]
    deny4: Vec<Cidr>,

    /// IPv6 network never served, in CIDR notation (repeatable)
    #[arg(long)]
    deny6: Vec<Cidr>,

    /// Directory served for the HTTP pages
    #[arg(long, default_value = "public_html")]
    web_root: String,
}

/// Everything the decoding loop, the periodic tick and the network
/// services share. One lock, no globals; the signal handler flips a
/// watch channel instead.
pub struct Hub {
    pub registry: Registry,
    pub cache: IcaoCache,
    pub demod: DemodStats,
    pub services: ServiceTable,
    /// Messages applied to the registry
    pub messages: u64,
    /// Validated frames the field decoder still refused
    pub decode_errors: u64,
}

/// What flows into the decoding loop
pub enum PipelineEvent {
    /// A demodulated or network-received Mode S frame, CRC-checked
    Frame(ModesFrame),
    /// A synthetic update from an SBS input feed
    Sbs(SbsUpdate),
}

fn now() -> f64 {
    rx1090::decode::time::now_in_s() as f64
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return code;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // configuration errors end here, before anything starts
    let net_enabled = options.net || options.net_only || options.net_active;
    if options.net_active
        && options.host_raw_in.is_none()
        && options.host_sbs_in.is_none()
    {
        eprintln!("--net-active needs --host-raw-in or --host-sbs-in");
        return 1;
    }
    if options.net_only && options.infile.is_some() {
        eprintln!("--net-only and --infile are mutually exclusive");
        return 1;
    }
    if options.gain != "auto" && options.gain.parse::<f64>().is_err() {
        eprintln!("--gain expects a number in dB, or `auto`");
        return 1;
    }
    let reference = match (options.lat, options.lon) {
        (Some(latitude), Some(longitude)) => Some(Position {
            latitude,
            longitude,
        }),
        (None, None) => None,
        _ => {
            eprintln!("--lat and --lon must be given together");
            return 1;
        }
    };
    if options.infile.is_none() && !options.net_only {
        eprintln!(
            "SDR device support is not built in: \
             read samples with --infile, or run with --net-only"
        );
        return 2;
    }
    debug!(
        "tuner settings (device mode only): {} Hz, gain {}, {} ppm",
        options.freq, options.gain, options.ppm
    );

    let hub = Arc::new(Mutex::new(Hub {
        registry: Registry::new(options.interactive_ttl, reference),
        cache: IcaoCache::default(),
        demod: DemodStats::default(),
        services: ServiceTable::default(),
        messages: 0,
        decode_errors: 0,
    }));

    let (exit_tx, mut exit_rx) = watch::channel(false);
    let exit_tx = Arc::new(exit_tx);
    {
        let exit_tx = exit_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, exiting");
                let _ = exit_tx.send(true);
            }
        });
    }

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(100);
    let (raw_tx, _) = broadcast::channel::<String>(net::BROADCAST_DEPTH);
    let (sbs_tx, _) = broadcast::channel::<String>(net::BROADCAST_DEPTH);

    let demod_config = DemodConfig {
        fix_single_bit: !options.no_fix,
        fix_two_bits: options.aggressive,
        ..DemodConfig::default()
    };

    // the sample source fills a 2-deep queue of magnitude blocks on its
    // own thread; the demodulator drains it here
    if let Some(path) = options.infile.clone() {
        let (mag_tx, mut mag_rx) = mpsc::channel(2);
        let loops = options.loops;
        std::thread::spawn(move || {
            if let Err(e) = read_iq_file(&path, loops, mag_tx) {
                error!("sample source: {e}");
            }
        });

        let hub = hub.clone();
        let events = event_tx.clone();
        let exit_tx = exit_tx.clone();
        let mut exit = exit_rx.clone();
        let config = demod_config.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = exit.changed() => {
                        if *exit.borrow() {
                            break;
                        }
                    }
                    buf = mag_rx.recv() => match buf {
                        Some(buf) => {
                            let frames = {
                                let mut hub = hub.lock().await;
                                let hub = &mut *hub;
                                demodulate2400(
                                    &buf,
                                    &config,
                                    &mut hub.cache,
                                    &mut hub.demod,
                                )
                            };
                            for frame in frames {
                                if events
                                    .send(PipelineEvent::Frame(frame))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        None => {
                            info!("sample source exhausted");
                            let _ = exit_tx.send(true);
                            break;
                        }
                    }
                }
            }
        });
    }

    let deny = DenyList::new(&options.deny4, &options.deny6);
    if net_enabled {
        macro_rules! bind_or_die {
            ($port:expr, $what:expr) => {
                match TcpListener::bind(("0.0.0.0", $port)).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        eprintln!("cannot listen on port {} ({}): {e}", $port, $what);
                        return 2;
                    }
                }
            };
        }

        let listener = bind_or_die!(options.net_ro_port, "raw output");
        tokio::spawn(net::serve_output(
            ServiceId::RawOut,
            listener,
            raw_tx.clone(),
            deny.clone(),
            hub.clone(),
            exit_rx.clone(),
        ));

        let listener = bind_or_die!(options.net_sbs_port, "SBS output");
        tokio::spawn(net::serve_output(
            ServiceId::SbsOut,
            listener,
            sbs_tx.clone(),
            deny.clone(),
            hub.clone(),
            exit_rx.clone(),
        ));

        let sink = RawSink {
            events: event_tx.clone(),
            fix_single: demod_config.fix_single_bit,
            fix_two: demod_config.fix_two_bits,
        };

        if options.net_active {
            if let Some(host) = &options.host_raw_in {
                match net::connect_active(host, ServiceId::RawIn).await {
                    Ok(stream) => {
                        tokio::spawn(net::run_raw_stream(
                            stream,
                            hub.clone(),
                            sink.clone(),
                            exit_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        eprintln!("cannot reach raw feeder {host}: {e}");
                        return 2;
                    }
                }
            }
            if let Some(host) = &options.host_sbs_in {
                match net::connect_active(host, ServiceId::SbsIn).await {
                    Ok(stream) => {
                        tokio::spawn(net::run_sbs_stream(
                            stream,
                            hub.clone(),
                            event_tx.clone(),
                            exit_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        eprintln!("cannot reach SBS feeder {host}: {e}");
                        return 2;
                    }
                }
            }
        } else {
            let listener = bind_or_die!(options.net_ri_port, "raw input");
            tokio::spawn(net::serve_raw_input(
                listener,
                deny.clone(),
                hub.clone(),
                sink.clone(),
                exit_rx.clone(),
            ));
            match UdpSocket::bind(("0.0.0.0", options.net_ri_port)).await {
                Ok(socket) => {
                    tokio::spawn(net::serve_raw_udp(
                        socket,
                        deny.clone(),
                        hub.clone(),
                        sink,
                        exit_rx.clone(),
                    ));
                }
                Err(e) => debug!("no UDP raw input: {e}"),
            }
        }

        let listener = bind_or_die!(options.net_http_port, "http");
        tokio::spawn(net::http::serve(
            hub.clone(),
            HttpConfig {
                refresh_ms: 1000,
                history: 0,
                latitude: options.lat,
                longitude: options.lon,
                web_root: options.web_root.clone(),
                page: "/gmap.html".to_string(),
            },
            listener,
            deny.clone(),
            exit_rx.clone(),
        ));
    }

    if options.interactive {
        interactive::print_header();
    }

    // the decoding loop: strictly in arrival order, one frame at a time
    let mut tick = interval(Duration::from_millis(125));
    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = exit_rx.changed() => {
                if *exit_rx.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                let mut hub = hub.lock().await;
                let events = hub.registry.tick(now());
                if options.interactive {
                    interactive::print_events(&hub.registry, &events);
                    ticks += 1;
                    if ticks % 8 == 0 {
                        for aircraft in hub.registry.iter() {
                            interactive::print_row(aircraft, options.metric);
                        }
                    }
                }
            }
            event = event_rx.recv() => match event {
                Some(PipelineEvent::Frame(frame)) => {
                    handle_frame(
                        frame,
                        &hub,
                        &raw_tx,
                        &sbs_tx,
                        options.raw,
                    )
                    .await;
                }
                Some(PipelineEvent::Sbs(update)) => {
                    hub.lock().await.registry.apply_sbs(&update, now());
                }
                None => break,
            }
        }
    }

    print_statistics(&hub).await;
    0
}

/// Decode one validated frame, update the registry and fan the message
/// out to the raw and SBS services.
async fn handle_frame(
    frame: ModesFrame,
    hub: &Arc<Mutex<Hub>>,
    raw_tx: &broadcast::Sender<String>,
    sbs_tx: &broadcast::Sender<String>,
    echo_raw: bool,
) {
    let now = now();
    match Message::from_bytes((&frame.msg, 0)) {
        Ok((_, msg)) => {
            let mut hub = hub.lock().await;
            hub.messages += 1;
            let rssi = (frame.signal_level > 0.0).then(|| frame.rssi());
            hub.registry.apply(&msg, now, rssi);

            let line = net::raw::raw_line(&frame.msg);
            if echo_raw {
                print!("{line}");
            }
            if raw_tx.receiver_count() > 0 && raw_tx.send(line).is_ok() {
                hub.services.get_mut(ServiceId::RawOut).frames += 1;
            }

            if sbs_tx.receiver_count() > 0 {
                let line = msg
                    .icao24()
                    .and_then(|icao24| hub.registry.find(&icao24))
                    .and_then(|aircraft| {
                        net::sbs::sbs_line(&msg, aircraft, chrono::Utc::now())
                    });
                if let Some(line) = line {
                    if sbs_tx.send(line).is_ok() {
                        hub.services.get_mut(ServiceId::SbsOut).frames += 1;
                    }
                }
            }
        }
        Err(e) => {
            debug!("undecodable frame: {e}");
            hub.lock().await.decode_errors += 1;
        }
    }
}

async fn print_statistics(hub: &Arc<Mutex<Hub>>) {
    let hub = hub.lock().await;
    println!(
        "{} messages decoded ({} undecodable frames)",
        hub.messages, hub.decode_errors
    );
    println!(
        "demodulator: {} samples, {} preambles, {} accepted \
         ({} with one bit repaired, {} with two), {} rejected",
        hub.demod.samples_processed,
        hub.demod.preambles,
        hub.demod.accepted_total(),
        hub.demod.accepted[1],
        hub.demod.accepted[2],
        hub.demod.rejected_bad,
    );
    for service in ServiceId::ALL {
        let stats = hub.services.get(service);
        println!(
            "{:8} {} unique clients, {} accepted, {} denied, \
             {} dropped, {} lines",
            service.name(),
            stats.unique_ips.len(),
            stats.accepted,
            stats.denied,
            stats.dropped,
            stats.frames,
        );
    }
}
