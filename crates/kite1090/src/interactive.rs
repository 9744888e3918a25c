/**
 * The interactive view: plain rows on stdout, one per tracked aircraft,
 * refreshed every second, plus a line when an aircraft appears or goes.
 */
use crate::registry::{Aircraft, Registry, TickEvent};

const KM_PER_NM: f64 = 1.852;
const FT_PER_M: f64 = 3.28084;

pub fn print_header() {
    println!(
        "{:6} {:8} {:6} {:>6} {:>5} {:>4} {:>9} {:>10} {:>6} {:>5}",
        "Hex", "Flight", "Squawk", "Alt", "Spd", "Trk", "Lat", "Lon",
        "Dist", "Msgs"
    );
}

pub fn print_row(aircraft: &Aircraft, metric: bool) {
    let fmt_opt = |v: Option<String>| v.unwrap_or_default();
    let altitude = aircraft.altitude.map(|a| {
        if metric {
            format!("{:.0}", f64::from(a) / FT_PER_M)
        } else {
            a.to_string()
        }
    });
    let distance = aircraft.distance_km.map(|d| {
        if metric {
            format!("{d:.1}")
        } else {
            format!("{:.1}", d / KM_PER_NM)
        }
    });
    let position = aircraft.estimated.or(aircraft.position);
    println!(
        "{:6} {:8} {:6} {:>6} {:>5} {:>4} {:>9} {:>10} {:>6} {:>5}",
        format!("{}", aircraft.icao24),
        fmt_opt(aircraft.callsign.clone()),
        fmt_opt(aircraft.squawk.map(|s| format!("{s}"))),
        fmt_opt(altitude),
        fmt_opt(aircraft.groundspeed.map(|g| format!("{g:.0}"))),
        fmt_opt(aircraft.track.map(|t| format!("{t:.0}"))),
        fmt_opt(position.map(|p| format!("{:.4}", p.latitude))),
        fmt_opt(position.map(|p| format!("{:.4}", p.longitude))),
        fmt_opt(distance),
        aircraft.messages,
    )
}

pub fn print_events(registry: &Registry, events: &[TickEvent]) {
    for event in events {
        match event {
            TickEvent::Appeared(icao24) => {
                let callsign = registry
                    .find(icao24)
                    .and_then(|ac| ac.callsign.clone())
                    .unwrap_or_default();
                println!("+ {icao24} {callsign}");
            }
            TickEvent::Removed(icao24) => println!("- {icao24}"),
        }
    }
}
