/**
 * The aircraft registry, keyed on the 24-bit ICAO address.
 *
 * Every decoded message updates one record; a 125 ms tick drives the
 * show-state machine (a record is announced once when it appears, once
 * when it expires), evicts silent aircraft and dead-reckons an estimated
 * position between real fixes.
 */
use std::collections::BTreeMap;

use rx1090::decode::bds::bds05::AirbornePosition;
use rx1090::decode::bds::bds06::SurfacePosition;
use rx1090::decode::bds::bds09::VelocityKind;
use rx1090::decode::cpr::{
    global_airborne, haversine, local_airborne, local_surface, CprParity,
    Position,
};
use rx1090::prelude::*;

use crate::net::sbs::SbsUpdate;

/// Both parities must be this fresh for a global decode
const AIRBORNE_PAIR_WINDOW: f64 = 10.0;
const SURFACE_PAIR_WINDOW: f64 = 50.0;
/// How long the last fix stays usable as a local-decode reference
const LOCAL_DECODE_WINDOW: f64 = 180.0;
/// A fix farther than this from the previous one is discarded (km)
const MAX_JUMP_KM: f64 = 50.0;

/// Lifecycle of a record in the interactive view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowState {
    /// Created, not announced yet
    FirstTime,
    /// Announced, updated in place
    Normal,
    /// Expired, announced one last time before removal
    LastTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickEvent {
    Appeared(ICAO),
    Removed(ICAO),
}

#[derive(Debug, Clone)]
pub struct Aircraft {
    pub icao24: ICAO,
    pub callsign: Option<String>,
    pub squawk: Option<Squawk>,
    /// Barometric altitude in feet
    pub altitude: Option<u16>,
    /// Ground speed in knots
    pub groundspeed: Option<f64>,
    /// Track angle in degrees, None while not valid
    pub track: Option<f64>,
    /// Vertical rate in ft/min
    pub vertical_rate: Option<i16>,
    pub on_ground: Option<bool>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub messages: u64,
    /// Last four signal levels, dBFS
    rssi_ring: [f32; 4],
    rssi_idx: usize,
    rssi_count: usize,
    even_cpr: Option<(AirbornePosition, f64)>,
    odd_cpr: Option<(AirbornePosition, f64)>,
    /// Last resolved position
    pub position: Option<Position>,
    pub position_time: f64,
    /// Position extrapolated along the track between fixes
    pub estimated: Option<Position>,
    pub estimated_time: f64,
    /// Distance from the receiver reference, km
    pub distance_km: Option<f64>,
    pub show: ShowState,
}

impl Aircraft {
    fn new(icao24: ICAO, now: f64) -> Self {
        Aircraft {
            icao24,
            callsign: None,
            squawk: None,
            altitude: None,
            groundspeed: None,
            track: None,
            vertical_rate: None,
            on_ground: None,
            first_seen: now,
            last_seen: now,
            messages: 0,
            rssi_ring: [0.0; 4],
            rssi_idx: 0,
            rssi_count: 0,
            even_cpr: None,
            odd_cpr: None,
            position: None,
            position_time: 0.0,
            estimated: None,
            estimated_time: 0.0,
            distance_km: None,
            show: ShowState::FirstTime,
        }
    }

    fn push_rssi(&mut self, rssi: f32) {
        self.rssi_ring[self.rssi_idx] = rssi;
        self.rssi_idx = (self.rssi_idx + 1) % self.rssi_ring.len();
        self.rssi_count = (self.rssi_count + 1).min(self.rssi_ring.len());
    }

    /// Mean of the last recorded signal levels, dBFS
    pub fn rssi(&self) -> Option<f32> {
        if self.rssi_count == 0 {
            return None;
        }
        let sum: f32 = self.rssi_ring[..self.rssi_count].iter().sum();
        Some(sum / self.rssi_count as f32)
    }

    /// Seconds since the last message
    pub fn seen(&self, now: f64) -> f64 {
        (now - self.last_seen).max(0.0)
    }

    /// Seconds since the last position fix, None without one
    pub fn seen_pos(&self, now: f64) -> Option<f64> {
        self.position.map(|_| (now - self.position_time).max(0.0))
    }

    fn set_position(&mut self, pos: Position, now: f64, reference: &Option<Position>) {
        self.position = Some(pos);
        self.position_time = now;
        self.estimated = Some(pos);
        self.estimated_time = now;
        if let Some(reference) = reference {
            self.distance_km = Some(haversine(reference, &pos));
        }
    }
}

pub struct Registry {
    aircraft: BTreeMap<ICAO, Aircraft>,
    /// Seconds without a message before a record is evicted
    ttl: u64,
    /// Receiver location, used as a local-decode reference and for
    /// distance estimation
    pub reference: Option<Position>,
}

impl Registry {
    pub fn new(ttl: u64, reference: Option<Position>) -> Self {
        Registry {
            aircraft: BTreeMap::new(),
            ttl,
            reference,
        }
    }

    pub fn find(&self, icao24: &ICAO) -> Option<&Aircraft> {
        self.aircraft.get(icao24)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aircraft> {
        self.aircraft.values()
    }

    /// Apply one decoded message: update the record fields, resolve CPR
    /// positions when possible.
    pub fn apply(&mut self, msg: &Message, now: f64, rssi: Option<f32>) {
        let Some(icao24) = msg.icao24() else {
            return;
        };
        let reference = self.reference;
        let aircraft = self
            .aircraft
            .entry(icao24)
            .or_insert_with(|| Aircraft::new(icao24, now));
        aircraft.last_seen = now;
        aircraft.messages += 1;
        if aircraft.show == ShowState::LastTime {
            // heard again after being announced as gone
            aircraft.show = ShowState::FirstTime;
        }
        if let Some(rssi) = rssi {
            aircraft.push_rssi(rssi);
        }

        match &msg.df {
            AirToAirShort {
                vertical_status,
                altitude,
                ..
            }
            | AirToAirLong {
                vertical_status,
                altitude,
                ..
            } => {
                if altitude.0 > 0 {
                    aircraft.altitude = Some(altitude.0);
                }
                aircraft.on_ground = Some(*vertical_status == 1);
            }
            AltitudeReply {
                status, altitude, ..
            }
            | CommBAltitude {
                status, altitude, ..
            } => {
                if altitude.0 > 0 {
                    aircraft.altitude = Some(altitude.0);
                }
                if let Some(g) = status.on_ground() {
                    aircraft.on_ground = Some(g);
                }
            }
            IdentityReply { status, squawk, .. }
            | CommBIdentity { status, squawk, .. } => {
                aircraft.squawk = Some(*squawk);
                if let Some(g) = status.on_ground() {
                    aircraft.on_ground = Some(g);
                }
            }
            AllCall { capability, .. } => {
                if let Some(g) = capability.on_ground() {
                    aircraft.on_ground = Some(g);
                }
            }
            Adsb(squitter) => {
                Self::apply_content(
                    aircraft,
                    &squitter.content,
                    now,
                    &reference,
                );
            }
            Tisb { content, .. } => {
                Self::apply_content(aircraft, content, now, &reference);
            }
            _ => {}
        }
    }

    fn apply_content(
        aircraft: &mut Aircraft,
        content: &SquitterContent,
        now: f64,
        reference: &Option<Position>,
    ) {
        match content {
            SquitterContent::BDS08(ident) => {
                aircraft.callsign = Some(ident.callsign.clone());
            }
            SquitterContent::BDS05(airborne) => {
                if airborne.altitude.is_some() {
                    aircraft.altitude = airborne.altitude;
                }
                aircraft.on_ground = Some(false);
                Self::apply_airborne_cpr(aircraft, airborne, now, reference);
            }
            SquitterContent::BDS06(surface) => {
                if surface.groundspeed.is_some() {
                    aircraft.groundspeed = surface.groundspeed;
                }
                if surface.track.is_some() {
                    aircraft.track = surface.track;
                }
                aircraft.on_ground = Some(true);
                Self::apply_surface_cpr(aircraft, surface, now, reference);
            }
            SquitterContent::BDS09(velocity) => {
                if velocity.vertical_rate.is_some() {
                    aircraft.vertical_rate = velocity.vertical_rate;
                }
                match &velocity.kind {
                    VelocityKind::GroundReferenced(ground) => {
                        if ground.groundspeed.is_some() {
                            aircraft.groundspeed = ground.groundspeed;
                        }
                        if ground.track.is_some() {
                            aircraft.track = ground.track;
                        }
                    }
                    VelocityKind::AirReferenced(air) => {
                        if air.heading.is_some() {
                            aircraft.track = air.heading;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Pair the message with the freshest opposite-parity one for a
    /// global decode; fall back to a local decode against the last fix
    /// or the receiver reference. Implausible jumps are dropped.
    fn apply_airborne_cpr(
        aircraft: &mut Aircraft,
        airborne: &AirbornePosition,
        now: f64,
        reference: &Option<Position>,
    ) {
        let other = match airborne.parity {
            CprParity::Even => &aircraft.odd_cpr,
            CprParity::Odd => &aircraft.even_cpr,
        };

        let mut pos = None;
        if let Some((paired, ts)) = other {
            if (now - ts) >= 0.0 && (now - ts) < AIRBORNE_PAIR_WINDOW {
                let (even, odd) = match airborne.parity {
                    CprParity::Even => (airborne, paired),
                    CprParity::Odd => (paired, airborne),
                };
                pos = global_airborne(even, odd, airborne.parity);
            }
        }

        if pos.is_none() && (now - aircraft.position_time) < LOCAL_DECODE_WINDOW {
            if let Some(last) = aircraft.position {
                pos = local_airborne(airborne, &last);
            }
        }
        if pos.is_none() && aircraft.position.is_none() {
            if let Some(home) = reference {
                pos = local_airborne(airborne, home);
            }
        }

        if let (Some(new_pos), Some(last)) = (pos, aircraft.position) {
            if haversine(&new_pos, &last) > MAX_JUMP_KM {
                pos = None;
            }
        }

        match airborne.parity {
            CprParity::Even => aircraft.even_cpr = Some((*airborne, now)),
            CprParity::Odd => aircraft.odd_cpr = Some((*airborne, now)),
        }

        if let Some(pos) = pos {
            aircraft.set_position(pos, now, reference);
        }
    }

    /// Surface positions decode locally, against the last fix while it
    /// is fresh, the receiver reference otherwise.
    fn apply_surface_cpr(
        aircraft: &mut Aircraft,
        surface: &SurfacePosition,
        now: f64,
        reference: &Option<Position>,
    ) {
        let mut pos = None;
        if (now - aircraft.position_time) < SURFACE_PAIR_WINDOW {
            if let Some(last) = aircraft.position {
                pos = local_surface(surface, &last);
            }
        }
        if pos.is_none() {
            if let Some(home) = reference {
                pos = local_surface(surface, home);
            }
        }

        if let (Some(new_pos), Some(last)) = (pos, aircraft.position) {
            // taxiing aircraft do not jump either
            if haversine(&new_pos, &last) > MAX_JUMP_KM {
                pos = None;
            }
        }

        if let Some(pos) = pos {
            aircraft.set_position(pos, now, reference);
        }
    }

    /// Apply a synthetic update from an SBS input feed.
    pub fn apply_sbs(&mut self, update: &SbsUpdate, now: f64) {
        let reference = self.reference;
        let aircraft = self
            .aircraft
            .entry(update.icao24)
            .or_insert_with(|| Aircraft::new(update.icao24, now));
        aircraft.last_seen = now;
        aircraft.messages += 1;

        if let Some(callsign) = &update.callsign {
            aircraft.callsign = Some(callsign.clone());
        }
        if let Some(altitude) = update.altitude {
            aircraft.altitude = u16::try_from(altitude).ok();
        }
        if update.groundspeed.is_some() {
            aircraft.groundspeed = update.groundspeed;
        }
        if update.track.is_some() {
            aircraft.track = update.track;
        }
        if let Some(vr) = update.vertical_rate {
            aircraft.vertical_rate = i16::try_from(vr).ok();
        }
        if let Some(squawk) = update.squawk {
            aircraft.squawk = Some(Squawk(squawk));
        }
        if let (Some(latitude), Some(longitude)) =
            (update.latitude, update.longitude)
        {
            aircraft.set_position(
                Position {
                    latitude,
                    longitude,
                },
                now,
                &reference,
            );
        }
    }

    /// Periodic (125 ms) maintenance: announce new aircraft, evict
    /// silent ones, advance estimated positions once per second.
    pub fn tick(&mut self, now: f64) -> Vec<TickEvent> {
        let mut events = Vec::new();
        let ttl = self.ttl as f64;

        let mut expired = Vec::new();
        for (icao24, aircraft) in self.aircraft.iter_mut() {
            if aircraft.show == ShowState::FirstTime {
                aircraft.show = ShowState::Normal;
                events.push(TickEvent::Appeared(*icao24));
            }

            if now - aircraft.last_seen > ttl {
                match aircraft.show {
                    ShowState::LastTime => expired.push(*icao24),
                    _ => {
                        aircraft.show = ShowState::LastTime;
                        events.push(TickEvent::Removed(*icao24));
                    }
                }
                continue;
            }

            // dead reckoning between fixes, for the interactive view
            if now - aircraft.estimated_time >= 1.0 {
                if let (Some(est), Some(gs), Some(track)) =
                    (aircraft.estimated, aircraft.groundspeed, aircraft.track)
                {
                    let dt = now - aircraft.estimated_time;
                    // nautical miles travelled, 1 nm = 1/60 degree
                    let nm = gs * dt / 3600.0;
                    let heading = track.to_radians();
                    let lat = est.latitude + nm / 60.0 * heading.cos();
                    let lon = est.longitude
                        + nm / 60.0 * heading.sin()
                            / est.latitude.to_radians().cos().max(0.01);
                    let pos = Position {
                        latitude: lat,
                        longitude: lon,
                    };
                    aircraft.estimated = Some(pos);
                    aircraft.estimated_time = now;
                    if let Some(reference) = &self.reference {
                        aircraft.distance_km =
                            Some(haversine(reference, &pos));
                    }
                }
            }
        }

        for icao24 in expired {
            self.aircraft.remove(&icao24);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    fn decode(bytes: &[u8]) -> Message {
        Message::from_bytes((bytes, 0)).unwrap().1
    }

    #[test]
    fn test_registry_tracks_fields() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8d406b902015a678d4d220aa4bda")),
            1000.0,
            Some(-12.5),
        );
        registry.apply(
            &decode(&hex!("8D485020994409940838175B284F")),
            1000.5,
            Some(-20.0),
        );

        assert_eq!(registry.len(), 2);
        let ac = registry.find(&"406b90".parse().unwrap()).unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("EZY85MH"));
        assert_eq!(ac.messages, 1);
        assert_eq!(ac.rssi(), Some(-12.5));

        let ac = registry.find(&"485020".parse().unwrap()).unwrap();
        assert_eq!(ac.groundspeed.map(|g| g.round()), Some(159.0));
        assert_eq!(ac.track.map(|t| t.round()), Some(183.0));
        assert_eq!(ac.vertical_rate, Some(-832));
    }

    #[test]
    fn test_global_position_from_pair() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8D40621D58C386435CC412692AD6")),
            1000.0,
            None,
        );
        registry.apply(
            &decode(&hex!("8D40621D58C382D690C8AC2863A7")),
            1001.0,
            None,
        );

        let ac = registry.find(&"40621d".parse().unwrap()).unwrap();
        let pos = ac.position.unwrap();
        assert!((pos.latitude - 52.2572).abs() < 1e-3);
        assert!((pos.longitude - 3.91937).abs() < 1e-3);
        assert_eq!(ac.altitude, Some(38000));
        assert_eq!(ac.seen_pos(1001.0), Some(0.0));
    }

    #[test]
    fn test_stale_pair_does_not_decode() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8D40621D58C386435CC412692AD6")),
            1000.0,
            None,
        );
        // outside the 10 s pairing window
        registry.apply(
            &decode(&hex!("8D40621D58C382D690C8AC2863A7")),
            1011.0,
            None,
        );

        let ac = registry.find(&"40621d".parse().unwrap()).unwrap();
        assert!(ac.position.is_none());
    }

    #[test]
    fn test_local_decode_from_receiver_reference() {
        let home = Position {
            latitude: 49.0,
            longitude: 6.0,
        };
        let mut registry = Registry::new(60, Some(home));
        registry.apply(
            &decode(&hex!("8D40058B58C901375147EFD09357")),
            1000.0,
            None,
        );

        let ac = registry.find(&"40058b".parse().unwrap()).unwrap();
        let pos = ac.position.unwrap();
        assert!((pos.latitude - 49.8241).abs() < 1e-3);
        assert!((pos.longitude - 6.06785).abs() < 1e-3);
        assert!(ac.distance_km.is_some());
    }

    #[test]
    fn test_show_state_machine() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8d406b902015a678d4d220aa4bda")),
            1000.0,
            None,
        );

        let events = registry.tick(1000.1);
        assert_eq!(
            events,
            vec![TickEvent::Appeared("406b90".parse().unwrap())]
        );
        assert_eq!(registry.tick(1000.2), vec![]);

        // past the TTL: announced once as removed, then dropped
        let events = registry.tick(1061.0);
        assert_eq!(
            events,
            vec![TickEvent::Removed("406b90".parse().unwrap())]
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tick(1061.2), vec![]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_eviction_matches_ttl() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8d406b902015a678d4d220aa4bda")),
            1000.0,
            None,
        );
        registry.apply(
            &decode(&hex!("8D485020994409940838175B284F")),
            1030.0,
            None,
        );
        registry.tick(1030.0);

        // at t=1061 only the first aircraft is silent for more than ttl
        registry.tick(1061.0);
        registry.tick(1061.2);
        assert_eq!(registry.len(), 1);
        assert!(registry.find(&"485020".parse().unwrap()).is_some());
    }

    #[test]
    fn test_estimated_position_advances() {
        let mut registry = Registry::new(60, None);
        registry.apply(
            &decode(&hex!("8D40621D58C386435CC412692AD6")),
            1000.0,
            None,
        );
        registry.apply(
            &decode(&hex!("8D40621D58C382D690C8AC2863A7")),
            1001.0,
            None,
        );
        // northbound at 300 kn
        let icao24: ICAO = "40621d".parse().unwrap();
        {
            let ac = registry.aircraft.get_mut(&icao24).unwrap();
            ac.groundspeed = Some(300.0);
            ac.track = Some(0.0);
        }
        registry.tick(1011.0);

        let ac = registry.find(&icao24).unwrap();
        let est = ac.estimated.unwrap();
        let pos = ac.position.unwrap();
        // ten seconds at 300 kn, heading north: 5/6 nm
        assert!((est.latitude - pos.latitude - 5.0 / 6.0 / 60.0).abs() < 1e-4);
        assert!((est.longitude - pos.longitude).abs() < 1e-6);
        // the real fix is untouched
        assert!((pos.latitude - 52.2572).abs() < 1e-3);
    }

    #[test]
    fn test_sbs_update() {
        let mut registry = Registry::new(60, None);
        let update = SbsUpdate {
            icao24: "400000".parse().unwrap(),
            msg_type: 3,
            callsign: Some("BAW123".to_string()),
            altitude: Some(38000),
            groundspeed: None,
            track: None,
            latitude: Some(51.47),
            longitude: Some(-0.4543),
            vertical_rate: None,
            squawk: None,
        };
        registry.apply_sbs(&update, 1000.0);

        let ac = registry.find(&"400000".parse().unwrap()).unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("BAW123"));
        assert_eq!(ac.altitude, Some(38000));
        let pos = ac.position.unwrap();
        assert!((pos.latitude - 51.47).abs() < 1e-6);
    }
}
