pub mod epoch_sealer;

pub use epoch_sealer::EpochSealer;
