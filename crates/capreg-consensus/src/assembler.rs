//! Consensus configuration assembly.
//!
//! The byte-level derivation of signer, transmitter and timing blobs belongs
//! to an external [`ConsensusConfigGenerator`]. The assembler owns what
//! surrounds it:
//!
//! 1. validate the oracle set (non-empty, unique peers, unique on-chain keys,
//!    `n >= 3f + 1`, schedule covers every oracle)
//! 2. hand the identities to the generator in the order supplied
//! 3. check the generator's output shape
//! 4. convert transmit accounts to chain-native bytes for the target chain

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use capreg_core::ids::{decode_hex, hex_bytes};
use capreg_core::{Address, Error, Key32, P2pId, Result, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::NodeIdentity;
use crate::keys::ChainFamily;
use crate::threshold::check_fault_tolerance;

/// BFT protocol timing and reporting parameters for one DON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingParameters {
    #[serde(with = "millis")]
    pub delta_progress: Duration,
    #[serde(with = "millis")]
    pub delta_resend: Duration,
    #[serde(with = "millis")]
    pub delta_initial: Duration,
    #[serde(with = "millis")]
    pub delta_round: Duration,
    #[serde(with = "millis")]
    pub delta_grace: Duration,
    #[serde(with = "millis")]
    pub delta_certified_commit_request: Duration,
    #[serde(with = "millis")]
    pub delta_stage: Duration,
    pub r_max: u64,
    /// Transmission slots per stage. Empty means one slot per oracle.
    pub transmission_schedule: Vec<usize>,
    #[serde(with = "millis")]
    pub max_duration_query: Duration,
    #[serde(with = "millis")]
    pub max_duration_observation: Duration,
    #[serde(with = "millis")]
    pub max_duration_should_accept_attested_report: Duration,
    #[serde(with = "millis")]
    pub max_duration_should_transmit_accepted_report: Duration,
    /// Opaque on-chain config passed through to the generator.
    #[serde(with = "hex_bytes")]
    pub onchain_config: Vec<u8>,
    /// Opaque reporting plugin config passed through to the generator.
    #[serde(with = "hex_bytes")]
    pub reporting_plugin_config: Vec<u8>,
}

impl Default for TimingParameters {
    fn default() -> Self {
        Self {
            delta_progress: Duration::from_secs(30),
            delta_resend: Duration::from_secs(10),
            delta_initial: Duration::from_secs(20),
            delta_round: Duration::from_secs(2),
            delta_grace: Duration::from_secs(2),
            delta_certified_commit_request: Duration::from_secs(10),
            delta_stage: Duration::from_secs(10),
            r_max: 3,
            transmission_schedule: Vec::new(),
            max_duration_query: Duration::from_millis(50),
            max_duration_observation: Duration::from_secs(5),
            max_duration_should_accept_attested_report: Duration::from_secs(10),
            max_duration_should_transmit_accepted_report: Duration::from_secs(10),
            onchain_config: Vec::new(),
            reporting_plugin_config: Vec::new(),
        }
    }
}

impl TimingParameters {
    /// Effective transmission schedule for `n` oracles.
    pub fn schedule_for(&self, n: usize) -> std::result::Result<Vec<usize>, ValidationError> {
        if self.transmission_schedule.is_empty() {
            return Ok(vec![1; n]);
        }
        let total = self
            .transmission_schedule
            .iter()
            .try_fold(0usize, |acc, slot| acc.checked_add(*slot))
            .ok_or_else(|| ValidationError::Invalid("transmission schedule overflows".into()))?;
        if total != n {
            return Err(ValidationError::Invalid(format!(
                "transmission schedule covers {total} oracles, DON has {n}"
            )));
        }
        Ok(self.transmission_schedule.clone())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod hex_list {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        items
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| capreg_core::ids::decode_hex("bytes", s).map_err(de::Error::custom))
            .collect()
    }
}

/// What the generator learns about one oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleIdentity {
    pub p2p_id: P2pId,
    pub onchain_public_key: Vec<u8>,
    pub offchain_public_key: Key32,
    pub config_encryption_public_key: Key32,
    pub transmit_account: String,
}

impl From<&NodeIdentity> for OracleIdentity {
    fn from(node: &NodeIdentity) -> Self {
        Self {
            p2p_id: node.p2p_id,
            onchain_public_key: node.onchain_public_key.clone(),
            offchain_public_key: node.offchain_public_key,
            config_encryption_public_key: node.config_encryption_public_key,
            transmit_account: node.transmit_account.clone(),
        }
    }
}

/// Raw generator output. `signers` and `transmitters` follow oracle order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    pub signers: Vec<Vec<u8>>,
    pub transmitters: Vec<String>,
    pub f: u8,
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    pub offchain_config: Vec<u8>,
}

/// Failure reported by a generator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct GeneratorError(pub String);

/// External BFT configuration algorithm.
pub trait ConsensusConfigGenerator: Send + Sync {
    fn generate(
        &self,
        oracles: &[OracleIdentity],
        timing: &TimingParameters,
        schedule: &[usize],
        max_faulty: u8,
    ) -> std::result::Result<GeneratedConfig, GeneratorError>;
}

/// Consensus configuration ready for on-chain submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub p2p_ids: Vec<P2pId>,
    #[serde(with = "hex_list")]
    pub signers: Vec<Vec<u8>>,
    #[serde(with = "hex_list")]
    pub transmitters: Vec<Vec<u8>>,
    pub f: u8,
    #[serde(with = "hex_bytes")]
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    #[serde(with = "hex_bytes")]
    pub offchain_config: Vec<u8>,
}

impl ConsensusConfig {
    /// Number of oracles.
    pub fn n(&self) -> usize {
        self.p2p_ids.len()
    }

    /// Binary form stored as a DON capability configuration.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Consistency(format!("encoding consensus config: {e}")))
    }

    /// Parse the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Consistency(format!("decoding consensus config: {e}")))
    }
}

/// Builds consensus configs for one target chain.
#[derive(Clone)]
pub struct ConsensusConfigAssembler {
    generator: Arc<dyn ConsensusConfigGenerator>,
    target: ChainFamily,
}

impl std::fmt::Debug for ConsensusConfigAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusConfigAssembler")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl ConsensusConfigAssembler {
    pub fn new(generator: Arc<dyn ConsensusConfigGenerator>, target: ChainFamily) -> Self {
        Self { generator, target }
    }

    pub fn target(&self) -> ChainFamily {
        self.target
    }

    /// Assemble a config for `nodes`, in the order given.
    pub fn assemble(
        &self,
        nodes: &[NodeIdentity],
        timing: &TimingParameters,
        max_faulty: u8,
    ) -> Result<ConsensusConfig> {
        let oracles = validate_oracles(nodes)?;
        let n = oracles.len();
        check_fault_tolerance(n, max_faulty)?;
        let schedule = timing.schedule_for(n)?;

        debug!(
            oracles = n,
            f = max_faulty,
            target = %self.target,
            "Generating consensus config"
        );
        let generated = self
            .generator
            .generate(&oracles, timing, &schedule, max_faulty)
            .map_err(|e| Error::Generator(e.0))?;

        if generated.signers.len() != n || generated.transmitters.len() != n {
            return Err(Error::Consistency(format!(
                "generator returned {} signers and {} transmitters for {} oracles",
                generated.signers.len(),
                generated.transmitters.len(),
                n
            )));
        }
        if generated.f != max_faulty {
            return Err(Error::Consistency(format!(
                "generator returned f={} but f={} was requested",
                generated.f, max_faulty
            )));
        }

        let transmitters = generated
            .transmitters
            .iter()
            .map(|t| parse_transmitter(self.target, t))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ConsensusConfig {
            p2p_ids: oracles.iter().map(|o| o.p2p_id).collect(),
            signers: generated.signers,
            transmitters,
            f: generated.f,
            onchain_config: generated.onchain_config,
            offchain_config_version: generated.offchain_config_version,
            offchain_config: generated.offchain_config,
        })
    }
}

fn validate_oracles(nodes: &[NodeIdentity]) -> std::result::Result<Vec<OracleIdentity>, ValidationError> {
    if nodes.is_empty() {
        return Err(ValidationError::Empty("oracle identities"));
    }

    let mut peers = HashSet::with_capacity(nodes.len());
    // Checked per chain family; packed blobs differ whenever family sets do.
    let mut keys: HashMap<(ChainFamily, &[u8]), P2pId> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if !peers.insert(node.p2p_id) {
            return Err(ValidationError::DuplicateMember {
                p2p_id: node.p2p_id,
                context: "oracle identities".into(),
            });
        }
        for (family, key) in &node.onchain_keys {
            if let Some(first) = keys.insert((*family, key.as_slice()), node.p2p_id) {
                return Err(ValidationError::DuplicateSigningKey {
                    first,
                    second: node.p2p_id,
                });
            }
        }
    }
    Ok(nodes.iter().map(OracleIdentity::from).collect())
}

/// Convert a transmit account to the bytes the target chain expects.
pub fn parse_transmitter(target: ChainFamily, account: &str) -> std::result::Result<Vec<u8>, ValidationError> {
    if target.has_native_address() {
        if !account.starts_with("0x") {
            return Err(ValidationError::Invalid(format!(
                "transmitter {account:?} is not a 0x-prefixed address"
            )));
        }
        return Address::from_hex_field("transmitter", account).map(|a| a.as_bytes().to_vec());
    }
    parse_hex_or_string(account)
}

/// `0x`-prefixed input is hex, anything else is taken as raw text.
pub fn parse_hex_or_string(s: &str) -> std::result::Result<Vec<u8>, ValidationError> {
    if s.starts_with("0x") {
        decode_hex("transmitter", s)
    } else {
        Ok(s.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Echoes oracle data back so tests can check ordering.
    #[derive(Default)]
    struct EchoGenerator {
        seen: Mutex<Vec<P2pId>>,
        drop_one: bool,
    }

    impl ConsensusConfigGenerator for EchoGenerator {
        fn generate(
            &self,
            oracles: &[OracleIdentity],
            _timing: &TimingParameters,
            schedule: &[usize],
            max_faulty: u8,
        ) -> std::result::Result<GeneratedConfig, GeneratorError> {
            assert_eq!(schedule.len(), oracles.len());
            *self.seen.lock().unwrap() = oracles.iter().map(|o| o.p2p_id).collect();
            let mut signers: Vec<Vec<u8>> =
                oracles.iter().map(|o| o.onchain_public_key.clone()).collect();
            if self.drop_one {
                signers.pop();
            }
            Ok(GeneratedConfig {
                signers,
                transmitters: oracles.iter().map(|o| o.transmit_account.clone()).collect(),
                f: max_faulty,
                onchain_config: vec![1],
                offchain_config_version: 30,
                offchain_config: vec![2, 3],
            })
        }
    }

    struct FailingGenerator;

    impl ConsensusConfigGenerator for FailingGenerator {
        fn generate(
            &self,
            _: &[OracleIdentity],
            _: &TimingParameters,
            _: &[usize],
            _: u8,
        ) -> std::result::Result<GeneratedConfig, GeneratorError> {
            Err(GeneratorError("bad offchain key".into()))
        }
    }

    fn node(seed: u8) -> NodeIdentity {
        let mut onchain_keys = BTreeMap::new();
        onchain_keys.insert(ChainFamily::Evm, vec![seed; 20]);
        NodeIdentity {
            p2p_id: P2pId::from_bytes([seed; 32]),
            onchain_public_key: crate::keys::marshal_multichain_public_key(&onchain_keys).unwrap(),
            onchain_keys,
            offchain_public_key: Key32::from_bytes([seed; 32]),
            config_encryption_public_key: Key32::from_bytes([seed; 32]),
            transmit_account: format!("0x{}", hex::encode([seed; 20])),
            signer: Key32::from_bytes([seed; 32]),
            encryption_public_key: Key32::from_bytes([seed; 32]),
        }
    }

    fn assembler(generator: Arc<dyn ConsensusConfigGenerator>) -> ConsensusConfigAssembler {
        ConsensusConfigAssembler::new(generator, ChainFamily::Evm)
    }

    #[test]
    fn oracle_order_follows_input() {
        let generator = Arc::new(EchoGenerator::default());
        let nodes = vec![node(4), node(1), node(3), node(2)];
        let cfg = assembler(generator.clone())
            .assemble(&nodes, &TimingParameters::default(), 1)
            .unwrap();

        let expected: Vec<P2pId> = nodes.iter().map(|n| n.p2p_id).collect();
        assert_eq!(*generator.seen.lock().unwrap(), expected);
        assert_eq!(cfg.p2p_ids, expected);
        assert_eq!(cfg.n(), 4);
        assert_eq!(cfg.transmitters[0], vec![4u8; 20]);
        assert_eq!(cfg.offchain_config_version, 30);
    }

    #[test]
    fn duplicate_onchain_key_rejected_before_generation() {
        let generator = Arc::new(EchoGenerator::default());
        let mut twin = node(2);
        twin.onchain_keys = node(1).onchain_keys;
        twin.onchain_public_key = node(1).onchain_public_key;
        let nodes = vec![node(1), twin, node(3), node(4)];

        let err = assembler(generator.clone())
            .assemble(&nodes, &TimingParameters::default(), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateSigningKey { .. })
        ));
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn shared_evm_key_rejected_when_other_families_differ() {
        let generator = Arc::new(EchoGenerator::default());
        let mut twin = node(2);
        twin.onchain_keys = node(1).onchain_keys;
        twin.onchain_keys.insert(ChainFamily::Solana, vec![9; 32]);
        twin.onchain_public_key =
            crate::keys::marshal_multichain_public_key(&twin.onchain_keys).unwrap();
        assert_ne!(twin.onchain_public_key, node(1).onchain_public_key);

        let nodes = vec![node(1), twin, node(3), node(4)];
        let err = assembler(generator.clone())
            .assemble(&nodes, &TimingParameters::default(), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateSigningKey { first, second })
                if first == node(1).p2p_id && second == node(2).p2p_id
        ));
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn fault_tolerance_checked() {
        let nodes = vec![node(1), node(2), node(3), node(4)];
        let err = assembler(Arc::new(EchoGenerator::default()))
            .assemble(&nodes, &TimingParameters::default(), 2)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::FaultTolerance { n: 4, f: 2 })
        ));
    }

    #[test]
    fn empty_oracle_set_rejected() {
        let err = assembler(Arc::new(EchoGenerator::default()))
            .assemble(&[], &TimingParameters::default(), 0)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn schedule_must_cover_all_oracles() {
        let timing = TimingParameters {
            transmission_schedule: vec![2, 1],
            ..Default::default()
        };
        assert_eq!(timing.schedule_for(3).unwrap(), vec![2, 1]);
        assert!(timing.schedule_for(4).is_err());
        assert_eq!(TimingParameters::default().schedule_for(3).unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn overflowing_schedule_rejected() {
        let timing = TimingParameters {
            transmission_schedule: vec![usize::MAX, 2],
            ..Default::default()
        };
        assert!(matches!(
            timing.schedule_for(1),
            Err(ValidationError::Invalid(msg)) if msg.contains("overflows")
        ));
    }

    #[test]
    fn short_generator_output_is_consistency_error() {
        let generator = Arc::new(EchoGenerator {
            drop_one: true,
            ..Default::default()
        });
        let nodes = vec![node(1), node(2), node(3), node(4)];
        let err = assembler(generator)
            .assemble(&nodes, &TimingParameters::default(), 1)
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn generator_failure_surfaces() {
        let err = assembler(Arc::new(FailingGenerator))
            .assemble(&[node(1)], &TimingParameters::default(), 0)
            .unwrap_err();
        assert!(matches!(err, Error::Generator(msg) if msg == "bad offchain key"));
    }

    #[test]
    fn transmitter_parsing_per_target() {
        let addr = format!("0x{}", hex::encode([0xab; 20]));
        assert_eq!(parse_transmitter(ChainFamily::Evm, &addr).unwrap(), vec![0xab; 20]);
        assert!(parse_transmitter(ChainFamily::Evm, &hex::encode([0xab; 20])).is_err());
        assert!(parse_transmitter(ChainFamily::Evm, "0x1234").is_err());

        assert_eq!(
            parse_transmitter(ChainFamily::Solana, "GcdR3x").unwrap(),
            b"GcdR3x".to_vec()
        );
        assert_eq!(parse_transmitter(ChainFamily::Aptos, "0x0102").unwrap(), vec![1, 2]);
    }

    #[test]
    fn config_bytes_round_trip() {
        let nodes = vec![node(1)];
        let cfg = assembler(Arc::new(EchoGenerator::default()))
            .assemble(&nodes, &TimingParameters::default(), 0)
            .unwrap();
        let bytes = cfg.to_bytes().unwrap();
        assert_eq!(ConsensusConfig::from_bytes(&bytes).unwrap(), cfg);
    }

    #[test]
    fn timing_defaults_and_json() {
        let timing = TimingParameters::default();
        assert_eq!(timing.delta_progress, Duration::from_secs(30));
        assert_eq!(timing.r_max, 3);

        let parsed: TimingParameters =
            serde_json::from_str(r#"{"delta_round": 500, "r_max": 5}"#).unwrap();
        assert_eq!(parsed.delta_round, Duration::from_millis(500));
        assert_eq!(parsed.r_max, 5);
        assert_eq!(parsed.delta_progress, Duration::from_secs(30));
    }
}
