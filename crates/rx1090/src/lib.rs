#![doc = include_str!("../readme.md")]
pub mod decode;
pub mod demod;
pub mod source;

pub mod prelude {
    /// This re-export is necessary to decode messages
    pub use deku::prelude::*;

    pub use crate::decode::adsb::{ExtendedSquitter, SquitterContent};
    pub use crate::decode::bds::bds05::AirbornePosition;
    pub use crate::decode::bds::bds06::SurfacePosition;
    pub use crate::decode::bds::bds08::AircraftIdentification;
    pub use crate::decode::bds::bds09::AirborneVelocity;
    pub use crate::decode::cpr::{CprParity, Position};
    pub use crate::decode::crc::IcaoCache;
    /// The root structure to decode messages
    pub use crate::decode::Message;
    pub use crate::decode::DF::*;
    pub use crate::decode::{Squawk, ICAO};
    pub use crate::demod::{
        demodulate2400, DemodConfig, DemodStats, ModesFrame,
    };
}
