//! Network side of the bridge: TCP transport and the elastic playback buffer

pub mod elastic;
pub mod tcp;

pub use elastic::ElasticBuffer;
pub use tcp::{BroadcastServer, ServerStats};
