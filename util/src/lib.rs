mod coalescing_receiver;
mod generation;
mod notifier;

pub use coalescing_receiver::*;
pub use generation::*;
pub use notifier::*;
