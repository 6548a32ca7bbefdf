//! witness-core: shared types for observed traffic, witnesses, and the
//! report wire format. All other witness crates depend on this one.

pub mod config;
pub mod frame;
pub mod wire;
pub mod witness;

pub use frame::{Header, HttpRequest, HttpResponse, NetworkContent, NetworkTraffic};
pub use wire::{LearnSessionId, NetworkDirection, WitnessReport};
pub use witness::{merge, PairKey, PartialWitness, Side, Witness};
