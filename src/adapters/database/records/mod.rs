pub mod keys;
pub mod transparency;

pub use keys::{IdentityKeyRecord, OneTimePreKeyRecord, SealedSenderKeyRecord, SignedPreKeyRecord};
pub use transparency::{CommittedLeafRecord, EpochRecord, MerkleNodeRecord, SigningKeyRecord};
