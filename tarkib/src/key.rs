//! Contract identification.
//!
//! A [`ContractKey`] is what callers resolve against: the [`TypeId`] of the
//! contract (usually a trait object or a concrete service type) plus its
//! human-readable name for error messages. A [`Qualifier`] is the optional
//! secondary identifier that disambiguates multiple resolvers registered
//! under the same contract.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Optional secondary identifier attached to a registration or a
/// constructor parameter.
///
/// Pre-extracted by the metadata layer; the engine only compares it.
pub type Qualifier = &'static str;

/// Identifies the contract a resolver is registered under.
///
/// # Examples
/// ```
/// use tarkib::key::ContractKey;
///
/// let key = ContractKey::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
///
/// trait Logger {}
/// let key = ContractKey::of::<dyn Logger>();
/// assert!(key.type_name().contains("Logger"));
/// ```
#[derive(Clone)]
pub struct ContractKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ContractKey {
    /// Creates the key for contract `T`. Works for `dyn Trait` contracts.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Creates a key from a raw [`TypeId`] and type name.
    ///
    /// Prefer [`ContractKey::of`] when possible; this exists for callers
    /// that carry type identity through erased registration descriptors.
    #[inline]
    pub fn from_raw(type_id: TypeId, type_name: &'static str) -> Self {
        Self { type_id, type_name }
    }

    /// Returns the [`TypeId`] of the contract.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the human-readable type name, used in error messages.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

// Equality and hashing go through the TypeId only; the name is display metadata.
impl PartialEq for ContractKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ContractKey {}

impl Hash for ContractKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractKey({})", self.type_name)
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MyService;

    #[test]
    fn key_of_type() {
        let key = ContractKey::of::<MyService>();
        assert!(key.type_name().contains("MyService"));
    }

    #[test]
    fn key_equality_same_type() {
        assert_eq!(ContractKey::of::<String>(), ContractKey::of::<String>());
    }

    #[test]
    fn key_inequality_different_types() {
        assert_ne!(ContractKey::of::<String>(), ContractKey::of::<i32>());
    }

    #[test]
    fn key_in_hashmap() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ContractKey::of::<String>(), "string");
        map.insert(ContractKey::of::<i32>(), "i32");
        assert_eq!(map.get(&ContractKey::of::<String>()), Some(&"string"));
        assert_eq!(map.get(&ContractKey::of::<bool>()), None);
    }

    #[test]
    fn unsized_contract_key() {
        trait MyTrait {}
        let _key = ContractKey::of::<dyn MyTrait>();
    }

    #[test]
    fn from_raw_matches_of() {
        use std::any::{TypeId, type_name};
        let raw = ContractKey::from_raw(TypeId::of::<u64>(), type_name::<u64>());
        assert_eq!(raw, ContractKey::of::<u64>());
    }
}
