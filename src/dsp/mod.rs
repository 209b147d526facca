//! Signal processing used by the link simulator

pub mod bandpass;

pub use bandpass::BandPass;
