/**
 * The HTTP/JSON service, on warp: aircraft lists under `/data`, a
 * receiver descriptor, an embedded favicon, a websocket echo endpoint
 * and static files from the web root.
 *
 * GET and HEAD only (anything else is a 400); JSON replies carry
 * `Access-Control-Allow-Origin: *`; denied peers are dropped before the
 * request line is even read.
 */
use std::convert::Infallible;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};
use warp::http::{StatusCode, Uri};
use warp::{Filter, Rejection, Reply};

use super::{admit, DenyList, ServiceId};
use crate::Hub;

const FAVICON: &[u8] = include_bytes!("../../assets/favicon.png");

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Suggested client refresh interval, milliseconds
    pub refresh_ms: u64,
    /// Number of history snapshots advertised (none are kept)
    pub history: usize,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Directory served for static files
    pub web_root: String,
    /// Redirect target for `/`
    pub page: String,
}

#[derive(Serialize)]
struct ReceiverJson {
    version: &'static str,
    refresh: u64,
    history: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
}

#[derive(Serialize)]
struct AircraftJson {
    hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    flight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_baro: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    baro_rate: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    seen: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    seen_pos: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<f32>,
    messages: u64,
}

#[derive(Serialize)]
struct AircraftList {
    now: f64,
    messages: u64,
    aircraft: Vec<AircraftJson>,
}

/// The dump1090 legacy `/data.json` shape
#[derive(Serialize)]
struct LegacyAircraft {
    hex: String,
    flight: String,
    lat: f64,
    lon: f64,
    altitude: i32,
    track: i32,
    speed: i32,
    validposition: u8,
    validtrack: u8,
}

async fn aircraft_json(hub: Arc<Mutex<Hub>>) -> Result<impl Reply, Infallible> {
    let hub = hub.lock().await;
    let now = rx1090::decode::time::now_in_s() as f64;
    let aircraft = hub
        .registry
        .iter()
        .map(|ac| AircraftJson {
            hex: format!("{}", ac.icao24),
            flight: ac.callsign.clone(),
            squawk: ac.squawk.map(|s| format!("{s}")),
            alt_baro: ac.altitude,
            gs: ac.groundspeed.map(|g| (g * 10.).round() / 10.),
            track: ac.track.map(|t| (t * 10.).round() / 10.),
            baro_rate: ac.vertical_rate,
            lat: ac.position.map(|p| p.latitude),
            lon: ac.position.map(|p| p.longitude),
            seen: ac.seen(now),
            seen_pos: ac.seen_pos(now),
            rssi: ac.rssi(),
            messages: ac.messages,
        })
        .collect();
    Ok(warp::reply::json(&AircraftList {
        now,
        messages: hub.messages,
        aircraft,
    }))
}

async fn legacy_json(hub: Arc<Mutex<Hub>>) -> Result<impl Reply, Infallible> {
    let hub = hub.lock().await;
    let aircraft: Vec<LegacyAircraft> = hub
        .registry
        .iter()
        .map(|ac| LegacyAircraft {
            hex: format!("{}", ac.icao24),
            flight: ac.callsign.clone().unwrap_or_default(),
            lat: ac.position.map(|p| p.latitude).unwrap_or(0.0),
            lon: ac.position.map(|p| p.longitude).unwrap_or(0.0),
            altitude: ac.altitude.map(i32::from).unwrap_or(0),
            track: ac.track.map(|t| t.round() as i32).unwrap_or(0),
            speed: ac.groundspeed.map(|g| g.round() as i32).unwrap_or(0),
            validposition: u8::from(ac.position.is_some()),
            validtrack: u8::from(ac.track.is_some()),
        })
        .collect();
    Ok(warp::reply::json(&aircraft))
}

/// Rejection raised for any method other than GET or HEAD
#[derive(Debug)]
struct MethodNotServed;

impl warp::reject::Reject for MethodNotServed {}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<MethodNotServed>().is_some()
        || err.find::<warp::reject::MethodNotAllowed>().is_some()
    {
        // only GET and HEAD are served
        StatusCode::BAD_REQUEST
    } else {
        error!("unhandled rejection: {err:?}");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(warp::reply::with_status(
        code.canonical_reason().unwrap_or("error").to_string(),
        code,
    ))
}

/// Run the HTTP service until the exit flag flips.
pub async fn serve(
    hub: Arc<Mutex<Hub>>,
    config: HttpConfig,
    listener: TcpListener,
    deny: DenyList,
    mut exit: watch::Receiver<bool>,
) {
    let HttpConfig {
        refresh_ms,
        history,
        latitude,
        longitude,
        web_root,
        page,
    } = config;
    let page: Uri =
        page.parse().unwrap_or_else(|_| Uri::from_static("/gmap.html"));
    let home = warp::path::end()
        .map(move || {
            Box::new(warp::redirect::redirect(page.clone())) as Box<dyn Reply>
        })
        .boxed();

    let with_hub = {
        let hub = hub.clone();
        warp::any().map(move || hub.clone())
    };

    let receiver = warp::path!("data" / "receiver.json").map(move || {
        Box::new(warp::reply::json(&ReceiverJson {
            version: env!("CARGO_PKG_VERSION"),
            refresh: refresh_ms,
            history,
            lat: latitude,
            lon: longitude,
        })) as Box<dyn Reply>
    });

    let aircraft = warp::path!("data" / "aircraft.json")
        .or(warp::path!("chunks" / "chunks.json"))
        .unify()
        .and(with_hub.clone())
        .and_then(aircraft_json)
        .map(|r| Box::new(r) as Box<dyn Reply>);

    let legacy = warp::path!("data.json")
        .and(with_hub.clone())
        .and_then(legacy_json)
        .map(|r| Box::new(r) as Box<dyn Reply>);

    // every JSON reply is fair game for cross-origin pages
    let json_routes = receiver
        .or(aircraft)
        .unify()
        .or(legacy)
        .unify()
        .map(|reply: Box<dyn Reply>| {
            Box::new(warp::reply::with_header(
                reply,
                "Access-Control-Allow-Origin",
                "*",
            )) as Box<dyn Reply>
        })
        .boxed();

    let favicon = warp::path("favicon.png")
        .or(warp::path("favicon.ico"))
        .unify()
        .and(warp::path::end())
        .map(|| {
            let mut res = warp::http::Response::new(
                warp::hyper::Body::from(FAVICON),
            );
            res.headers_mut().insert(
                warp::http::header::CONTENT_TYPE,
                warp::http::HeaderValue::from_static("image/png"),
            );
            Box::new(res) as Box<dyn Reply>
        })
        .boxed();

    let echo = warp::path("echo")
        .and(warp::path::end())
        .and(warp::ws())
        .map(|ws: warp::ws::Ws| {
            Box::new(ws.on_upgrade(|websocket| async move {
                let (mut tx, mut rx) = websocket.split();
                while let Some(Ok(message)) = rx.next().await {
                    if message.is_close() {
                        break;
                    }
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            })) as Box<dyn Reply>
        })
        .boxed();

    let static_files = warp::fs::dir(web_root)
        .map(|r| Box::new(r) as Box<dyn Reply>)
        .boxed();

    let get_or_head = warp::filters::method::method()
        .and_then(|m: warp::http::Method| async move {
            if m == warp::http::Method::GET || m == warp::http::Method::HEAD {
                Ok(())
            } else {
                Err(warp::reject::custom(MethodNotServed))
            }
        })
        .untuple_one();

    let routes = get_or_head
        .and(
            home.or(json_routes)
                .unify()
                .or(favicon)
                .unify()
                .or(echo)
                .unify()
                .or(static_files)
                .unify()
                .boxed(),
        )
        .recover(handle_rejection);

    // the deny list applies before a single byte is answered
    let incoming = futures::stream::unfold(
        (listener, deny, hub),
        |(listener, deny, hub)| async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if !admit(&hub, ServiceId::Http, &deny, peer.ip())
                            .await
                        {
                            drop(stream);
                            continue;
                        }
                        return Some((
                            Ok::<_, std::io::Error>(stream),
                            (listener, deny, hub),
                        ));
                    }
                    Err(e) => {
                        error!("http accept: {e}");
                        continue;
                    }
                }
            }
        },
    );

    let shutdown = async move {
        while !*exit.borrow() {
            if exit.changed().await.is_err() {
                break;
            }
        }
        info!("http service stopping");
    };

    warp::serve(routes)
        .serve_incoming_with_graceful_shutdown(incoming, shutdown)
        .await;
}
