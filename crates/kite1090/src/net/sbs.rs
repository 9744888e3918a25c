/**
 * SBS/BaseStation CSV format: 22 comma-separated fields, one message per
 * CRLF-terminated line. Field 5 is the 6-digit hex ICAO; fields that do
 * not apply stay empty.
 *
 * Emitted types: MSG,1 identification, MSG,3 position, MSG,4 velocity,
 * MSG,5 altitude, MSG,6 squawk, MSG,7 air-to-air altitude, MSG,8
 * all-call.
 */
use chrono::{DateTime, Utc};
use rx1090::decode::bds::bds09::VelocityKind;
use rx1090::decode::FlightStatus;
use rx1090::prelude::*;
use std::str::FromStr;

use crate::registry::Aircraft;

/// A synthetic aircraft update parsed from an SBS input feed
#[derive(Debug, Clone, PartialEq)]
pub struct SbsUpdate {
    pub icao24: ICAO,
    pub msg_type: u8,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub groundspeed: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<u16>,
}

/// Parse one `MSG,<subtype>` record; anything else (SEL, ID, AIR, STA,
/// CLK or malformed lines) yields None.
pub fn parse_line(line: &str) -> Option<SbsUpdate> {
    let fields: Vec<&str> = line.trim_end().split(',').collect();
    if fields.len() < 22 || fields[0] != "MSG" {
        return None;
    }
    let msg_type = fields[1].parse().ok()?;
    let icao24 = ICAO::from_str(fields[4]).ok()?;

    let non_empty = |i: usize| Some(fields[i]).filter(|s| !s.is_empty());
    Some(SbsUpdate {
        icao24,
        msg_type,
        callsign: non_empty(10).map(|s| s.trim().to_string()),
        altitude: non_empty(11).and_then(|s| s.parse().ok()),
        groundspeed: non_empty(12).and_then(|s| s.parse().ok()),
        track: non_empty(13).and_then(|s| s.parse().ok()),
        latitude: non_empty(14).and_then(|s| s.parse().ok()),
        longitude: non_empty(15).and_then(|s| s.parse().ok()),
        vertical_rate: non_empty(16).and_then(|s| s.parse().ok()),
        squawk: non_empty(17).and_then(|s| u16::from_str_radix(s, 16).ok()),
    })
}

struct SbsFields {
    msg_type: u8,
    callsign: Option<String>,
    altitude: Option<i32>,
    groundspeed: Option<f64>,
    track: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    vertical_rate: Option<i32>,
    squawk: Option<u16>,
    alert: Option<bool>,
    spi: Option<bool>,
    on_ground: Option<bool>,
}

impl SbsFields {
    fn new(msg_type: u8) -> Self {
        SbsFields {
            msg_type,
            callsign: None,
            altitude: None,
            groundspeed: None,
            track: None,
            latitude: None,
            longitude: None,
            vertical_rate: None,
            squawk: None,
            alert: None,
            spi: None,
            on_ground: None,
        }
    }
}

/// Serialize one decoded message for the SBS output service. `aircraft`
/// is the registry record the message was just applied to: position
/// messages take the resolved latitude/longitude from there.
pub fn sbs_line(
    msg: &Message,
    aircraft: &Aircraft,
    now: DateTime<Utc>,
) -> Option<String> {
    let icao24 = msg.icao24()?;

    let fs_fields = |f: &mut SbsFields, fs: &FlightStatus| {
        f.alert = Some(fs.alert());
        f.spi = Some(fs.spi());
        f.on_ground = fs.on_ground();
    };

    let mut f = match &msg.df {
        AirToAirShort { altitude, .. } | AirToAirLong { altitude, .. } => {
            let mut f = SbsFields::new(7);
            f.altitude = Some(i32::from(altitude.0));
            f
        }
        AltitudeReply {
            status, altitude, ..
        }
        | CommBAltitude {
            status, altitude, ..
        } => {
            let mut f = SbsFields::new(5);
            f.altitude = Some(i32::from(altitude.0));
            fs_fields(&mut f, status);
            f
        }
        IdentityReply { status, squawk, .. }
        | CommBIdentity { status, squawk, .. } => {
            let mut f = SbsFields::new(6);
            f.squawk = Some(squawk.0);
            fs_fields(&mut f, status);
            f
        }
        AllCall { capability, .. } => {
            let mut f = SbsFields::new(8);
            f.on_ground = capability.on_ground();
            f
        }
        Adsb(squitter) => content_fields(&squitter.content)?,
        Tisb { content, .. } => content_fields(content)?,
        _ => return None,
    };

    // emergency squawks: hijack, radio failure, emergency
    let emergency = f
        .squawk
        .map(|s| matches!(s, 0x7500 | 0x7600 | 0x7700));

    if f.msg_type == 3 {
        f.latitude = aircraft.position.map(|p| p.latitude);
        f.longitude = aircraft.position.map(|p| p.longitude);
    }

    let date = now.format("%Y/%m/%d");
    let time = now.format("%H:%M:%S%.3f");
    let flag = |b: Option<bool>| match b {
        Some(true) => "-1",
        Some(false) => "0",
        None => "",
    };

    let mut line = format!(
        "MSG,{},111,11111,{:06X},111111,{date},{time},{date},{time},",
        f.msg_type, icao24.0
    );
    line.push_str(&f.callsign.unwrap_or_default());
    line.push(',');
    if let Some(alt) = f.altitude {
        line.push_str(&alt.to_string());
    }
    line.push(',');
    if let Some(gs) = f.groundspeed {
        line.push_str(&format!("{}", gs.round()));
    }
    line.push(',');
    if let Some(trk) = f.track {
        line.push_str(&format!("{}", trk.round()));
    }
    line.push(',');
    if let Some(lat) = f.latitude {
        line.push_str(&format!("{lat:.5}"));
    }
    line.push(',');
    if let Some(lon) = f.longitude {
        line.push_str(&format!("{lon:.5}"));
    }
    line.push(',');
    if let Some(vr) = f.vertical_rate {
        line.push_str(&vr.to_string());
    }
    line.push(',');
    if let Some(squawk) = f.squawk {
        line.push_str(&format!("{squawk:04x}"));
    }
    line.push_str(&format!(
        ",{},{},{},{}\r\n",
        flag(f.alert),
        flag(emergency),
        flag(f.spi),
        flag(f.on_ground)
    ));
    Some(line)
}

fn content_fields(content: &SquitterContent) -> Option<SbsFields> {
    match content {
        SquitterContent::BDS08(ident) => {
            let mut f = SbsFields::new(1);
            f.callsign = Some(ident.callsign.clone());
            Some(f)
        }
        SquitterContent::BDS05(position) => {
            let mut f = SbsFields::new(3);
            f.altitude = position.altitude.map(i32::from);
            Some(f)
        }
        SquitterContent::BDS06(surface) => {
            let mut f = SbsFields::new(3);
            f.groundspeed = surface.groundspeed;
            f.track = surface.track;
            f.on_ground = Some(true);
            Some(f)
        }
        SquitterContent::BDS09(velocity) => {
            let mut f = SbsFields::new(4);
            f.vertical_rate = velocity.vertical_rate.map(i32::from);
            if let VelocityKind::GroundReferenced(ground) = &velocity.kind {
                f.groundspeed = ground.groundspeed;
                f.track = ground.track;
            }
            Some(f)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use chrono::TimeZone;
    use hexlit::hex;

    fn decode(bytes: &[u8]) -> Message {
        Message::from_bytes((bytes, 0)).unwrap().1
    }

    #[test]
    fn test_emit_callsign() {
        let mut registry = Registry::new(60, None);
        let msg = decode(&hex!("8d406b902015a678d4d220aa4bda"));
        registry.apply(&msg, 1000.0, None);
        let ac = registry.find(&"406b90".parse().unwrap()).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 7, 14, 12, 0, 0).unwrap();
        let line = sbs_line(&msg, ac, now).unwrap();
        assert!(line.starts_with("MSG,1,111,11111,406B90,111111,"));
        assert!(line.contains(",EZY85MH,"));
        assert!(line.ends_with("\r\n"));
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 22);
    }

    #[test]
    fn test_emit_squawk_roundtrip() {
        // synthesised DF5 frames cannot easily carry a chosen squawk, so
        // check the column layout through the parser instead
        let mut registry = Registry::new(60, None);
        let msg = decode(&hex!("8D485020994409940838175B284F"));
        registry.apply(&msg, 1000.0, None);
        let ac = registry.find(&"485020".parse().unwrap()).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 7, 14, 12, 0, 0).unwrap();
        let line = sbs_line(&msg, ac, now).unwrap();
        let update = parse_line(&line).unwrap();
        assert_eq!(update.msg_type, 4);
        assert_eq!(update.icao24, "485020".parse().unwrap());
        assert_eq!(update.groundspeed, Some(159.0));
        assert_eq!(update.track, Some(183.0));
        assert_eq!(update.vertical_rate, Some(-832));
    }

    #[test]
    fn test_position_roundtrip() {
        let mut registry = Registry::new(60, None);
        let even = decode(&hex!("8D40621D58C382D690C8AC2863A7"));
        let odd = decode(&hex!("8D40621D58C386435CC412692AD6"));
        registry.apply(&odd, 1000.0, None);
        registry.apply(&even, 1001.0, None);
        let ac = registry.find(&"40621d".parse().unwrap()).unwrap();
        assert!(ac.position.is_some());

        let now = Utc.with_ymd_and_hms(2024, 7, 14, 12, 0, 0).unwrap();
        let line = sbs_line(&even, ac, now).unwrap();
        let update = parse_line(&line).unwrap();
        assert_eq!(update.msg_type, 3);
        assert_eq!(update.altitude, Some(38000));
        let lat = update.latitude.unwrap();
        let lon = update.longitude.unwrap();
        assert!((lat - 52.2572).abs() < 1e-4);
        assert!((lon - 3.91937).abs() < 1e-4);
    }

    #[test]
    fn test_parse_ignores_other_records() {
        assert!(parse_line("SEL,,496,2286,4CA4E5,27215,...").is_none());
        assert!(parse_line("garbage").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_parse_sbs_record() {
        let line = "MSG,3,111,11111,400000,111111,2024/07/14,12:00:00.000,\
                    2024/07/14,12:00:00.000,,38000,,,51.47000,-0.45430,,,0,0,0,0";
        let update = parse_line(line).unwrap();
        assert_eq!(update.icao24, "400000".parse().unwrap());
        assert_eq!(update.altitude, Some(38000));
        assert_eq!(update.latitude, Some(51.47));
        assert_eq!(update.longitude, Some(-0.4543));
        assert_eq!(update.callsign, None);
        assert_eq!(update.squawk, None);
    }
}
