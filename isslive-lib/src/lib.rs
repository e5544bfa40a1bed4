#![doc = include_str!("../README.md")]

mod error;
mod session;
mod value;

pub mod catalog;
pub mod decode;
pub mod ingest;
pub mod store;
pub mod transport;

pub use catalog::{Catalog, Channel};
pub use error::{Error, Result};
pub use ingest::ItemUpdate;
pub use session::{decode_channel, Reading, Session};
pub use store::{LiveValueStore, Sample};
pub use value::{FromValue, Kind, Value};
