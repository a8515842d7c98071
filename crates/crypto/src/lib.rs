//! Cryptographic primitives for FedRelay.
//!
//! This crate is stateless. It provides:
//!
//! - **Hashing**: BLAKE3 digests over canonical, allow-listed payloads
//! - **Signatures**: Ed25519 signing of proof digests and verification against
//!   registered public keys
//! - **Merkle trees**: padded binary trees over proof digests, inclusion paths,
//!   and the global root across federations
//!
//! # Security Principles
//!
//! - BLAKE3 is used for every integrity hash
//! - Only digests are signed; payloads never leave the creating node
//! - Secret key material is zeroized after use and never logged

pub mod hashing;
pub mod merkle;
pub mod signing;

pub use hashing::{canonicalize, hash, hash_pair, payload_digest, payload_fields};
pub use merkle::{
    compute_root, global_root, verify_path, MerkleError, MerklePath, MerkleTree, PathStep, Side,
};
pub use signing::{key_id, parse_public_key, verify_digest_signature, NodeSigner, SigningError};
