//! Simulated hardware for the host
//!
//! Everything here is single-threaded (`Rc`/`RefCell`) and shares one
//! [`VirtualClock`], so busy-wait codecs run instantly and deterministically
//! while their waveforms stay observable.

mod broker;
mod clock;
mod dht11_line;
mod pins;
mod store;

pub use broker::{BrokerError, PublishedMessage, RecordingClient};
pub use clock::VirtualClock;
pub use dht11_line::{DhtBehaviour, SimulatedDht11Line};
pub use pins::{AdcFault, PinEvent, RecordingPin, SharedAnalog};
pub use store::{MemoryStore, MemoryStoreError};
