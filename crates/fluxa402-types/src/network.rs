//! CAIP-2-style network identifiers.
//!
//! A network identifier consists of two parts separated by a colon:
//!
//! - **Namespace**: the payment ecosystem (e.g., `eip155` for EVM chains,
//!   `fluxa` for the logical credit network)
//! - **Reference**: the network-specific identifier (e.g., `84532` for
//!   Base Sepolia, `monetize` for the Fluxa credit network)
//!
//! Scheme implementations may register against a concrete network
//! (`eip155:84532`) or against a whole family (`eip155:*`); see
//! [`NetworkPattern`].
//!
//! # Examples
//!
//! ```
//! use fluxa402_types::network::Network;
//!
//! let base_sepolia: Network = "eip155:84532".parse().unwrap();
//! assert_eq!(base_sepolia.namespace(), "eip155");
//! assert_eq!(base_sepolia.reference(), "84532");
//! assert_eq!(base_sepolia.to_string(), "eip155:84532");
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Namespace of EVM networks.
pub const EIP155_NAMESPACE: &str = "eip155";
/// Namespace of the logical Fluxa credit network.
pub const FLUXA_NAMESPACE: &str = "fluxa";

/// A CAIP-2-style network identifier, `namespace:reference`.
///
/// # Serialization
///
/// Serializes to/from a colon-separated string: `"eip155:84532"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Network {
    /// The payment ecosystem (e.g., `eip155`, `fluxa`).
    pub namespace: String,
    /// The network-specific reference (e.g., `84532`, `monetize`).
    pub reference: String,
}

impl Network {
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// For `eip155` networks, the numeric chain id.
    pub fn eip155_chain_id(&self) -> Option<u64> {
        if self.namespace == EIP155_NAMESPACE {
            self.reference.parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl From<Network> for String {
    fn from(value: Network) -> Self {
        value.to_string()
    }
}

/// Error returned when parsing an invalid network identifier or pattern.
#[derive(Debug, thiserror::Error)]
#[error("Invalid network identifier format {0}")]
pub struct NetworkFormatError(String);

impl FromStr for Network {
    type Err = NetworkFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or(NetworkFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() || reference == "*" {
            return Err(NetworkFormatError(s.into()));
        }
        Ok(Network::new(namespace, reference))
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Network::from_str(&s).map_err(de::Error::custom)
    }
}

/// A pattern matching one or many networks.
///
/// - **Exact** matches one concrete network (`eip155:84532`).
/// - **Family** matches any network in a namespace (`eip155:*`). The registry
///   consults families only after exact lookups miss.
///
/// # Example
///
/// ```
/// use fluxa402_types::network::{Network, NetworkPattern};
///
/// let evm: NetworkPattern = "eip155:*".parse().unwrap();
/// assert!(evm.matches(&Network::new("eip155", "84532")));
/// assert!(!evm.matches(&Network::new("fluxa", "monetize")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkPattern {
    /// Matches exactly one network.
    Exact(Network),
    /// Matches any network within the namespace.
    Family {
        /// The namespace to match (e.g., `eip155`).
        namespace: String,
    },
}

impl NetworkPattern {
    pub fn exact<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self::Exact(Network::new(namespace, reference))
    }

    pub fn family<S: Into<String>>(namespace: S) -> Self {
        Self::Family {
            namespace: namespace.into(),
        }
    }

    pub fn matches(&self, network: &Network) -> bool {
        match self {
            NetworkPattern::Exact(exact) => exact == network,
            NetworkPattern::Family { namespace } => network.namespace == *namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            NetworkPattern::Exact(network) => &network.namespace,
            NetworkPattern::Family { namespace } => namespace,
        }
    }
}

impl fmt::Display for NetworkPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPattern::Exact(network) => write!(f, "{network}"),
            NetworkPattern::Family { namespace } => write!(f, "{namespace}:*"),
        }
    }
}

impl FromStr for NetworkPattern {
    type Err = NetworkFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or(NetworkFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(NetworkFormatError(s.into()));
        }
        if reference == "*" {
            Ok(NetworkPattern::family(namespace))
        } else {
            Ok(NetworkPattern::exact(namespace, reference))
        }
    }
}

impl Serialize for NetworkPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NetworkPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NetworkPattern::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<Network> for NetworkPattern {
    fn from(network: Network) -> Self {
        NetworkPattern::Exact(network)
    }
}
