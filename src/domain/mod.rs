pub mod bbw;
pub mod calendar;
pub mod candle;
pub mod errors;
pub mod events;
pub mod filter;
pub mod group;
pub mod indicators;
pub mod master_data;
pub mod ports;
pub mod repositories;
