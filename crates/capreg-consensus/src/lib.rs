//! BFT Consensus Plumbing for DONs
//!
//! Everything between raw node key material and a consensus configuration
//! the registry can store:
//!
//! - [`threshold`]: `n >= 3f + 1` checks
//! - [`keys`]: chain families and the packed multi-chain on-chain key
//! - [`identity`]: raw node keys to a checked [`NodeIdentity`]
//! - [`assembler`]: oracle set validation around an external generator
//!
//! # Example
//!
//! ```
//! use capreg_consensus::{check_fault_tolerance, max_faulty};
//!
//! assert!(check_fault_tolerance(4, 1).is_ok());
//! assert!(check_fault_tolerance(4, 2).is_err());
//! assert_eq!(max_faulty(7), 2);
//! ```

pub mod assembler;
pub mod identity;
pub mod keys;
pub mod threshold;

pub use assembler::{
    parse_hex_or_string, parse_transmitter, ConsensusConfig, ConsensusConfigAssembler,
    ConsensusConfigGenerator, GeneratedConfig, GeneratorError, OracleIdentity, TimingParameters,
};
pub use capreg_core::{Error, Result};
pub use identity::{extract, NodeIdentity, NodeKeys};
pub use keys::{marshal_multichain_public_key, unmarshal_multichain_public_key, ChainFamily};
pub use threshold::{check_fault_tolerance, is_valid_fault_tolerance, max_faulty, min_members};
