//! Extras merge policies
//!
//! Extras are the mutable annotations of a node. When an archived node
//! already exists in the target store its extras are merged according to an
//! [`ExtrasMode`], written in its compact form as a three letter code:
//!
//! | position | letters | meaning |
//! |----------|---------|---------|
//! | 1 | `k` / `n` | keep or drop stored keys absent from the archive |
//! | 2 | `c` / `n` | create or skip archive-only keys |
//! | 3 | `l` / `u` / `d` | leave, update or delete keys whose values differ |

use prov_graph::{Attributes, ConfigError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const FIELD: &str = "extras_mode_existing";

/// What happens to stored keys the archive does not mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeepPolicy {
    /// `k`: stored-only keys survive
    Keep,
    /// `n`: stored-only keys are removed
    Discard,
}

/// What happens to archive keys the store does not have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreatePolicy {
    /// `c`: archive-only keys are added
    Create,
    /// `n`: archive-only keys are ignored
    Skip,
}

/// Resolution for keys present on both sides with different values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictPolicy {
    /// `l`: keep the stored value
    Leave,
    /// `u`: take the archive value
    Update,
    /// `d`: remove the key
    Delete,
}

/// Merge policy for extras of nodes that already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtrasMode {
    pub keep: KeepPolicy,
    pub create: CreatePolicy,
    pub conflict: ConflictPolicy,
}

impl ExtrasMode {
    /// Create mode from its three policies
    #[inline]
    #[must_use]
    pub const fn new(keep: KeepPolicy, create: CreatePolicy, conflict: ConflictPolicy) -> Self {
        Self {
            keep,
            create,
            conflict,
        }
    }

    /// Parse a mode code supplied as an arbitrary JSON value
    ///
    /// # Errors
    /// `ConfigError::InvalidMode` for non-string values and malformed codes
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::String(code) => code.parse(),
            other => Err(ConfigError::invalid_mode(
                FIELD,
                other.to_string(),
                "expected a three letter string",
            )),
        }
    }

    /// Three letter code of this mode
    #[must_use]
    pub fn code(&self) -> String {
        let keep = match self.keep {
            KeepPolicy::Keep => 'k',
            KeepPolicy::Discard => 'n',
        };
        let create = match self.create {
            CreatePolicy::Create => 'c',
            CreatePolicy::Skip => 'n',
        };
        let conflict = match self.conflict {
            ConflictPolicy::Leave => 'l',
            ConflictPolicy::Update => 'u',
            ConflictPolicy::Delete => 'd',
        };
        [keep, create, conflict].iter().collect()
    }

    /// Merge stored extras with archived ones
    #[must_use]
    pub fn merge(&self, stored: &Attributes, incoming: &Attributes) -> Attributes {
        let mut merged = Attributes::new();

        for (key, value) in stored {
            match incoming.get(key) {
                None => {
                    if self.keep == KeepPolicy::Keep {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Some(other) if other == value => {
                    merged.insert(key.clone(), value.clone());
                }
                Some(other) => match self.conflict {
                    ConflictPolicy::Leave => {
                        merged.insert(key.clone(), value.clone());
                    }
                    ConflictPolicy::Update => {
                        merged.insert(key.clone(), other.clone());
                    }
                    ConflictPolicy::Delete => {}
                },
            }
        }

        if self.create == CreatePolicy::Create {
            for (key, value) in incoming {
                if !stored.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }

        merged
    }
}

impl Default for ExtrasMode {
    fn default() -> Self {
        Self::new(KeepPolicy::Keep, CreatePolicy::Create, ConflictPolicy::Leave)
    }
}

impl FromStr for ExtrasMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let letters: Vec<char> = s.chars().collect();
        let [keep, create, conflict] = letters.as_slice() else {
            return Err(ConfigError::invalid_mode(
                FIELD,
                s,
                format!("expected 3 letters, got {}", letters.len()),
            ));
        };

        let keep = match keep {
            'k' => KeepPolicy::Keep,
            'n' => KeepPolicy::Discard,
            c => {
                return Err(ConfigError::invalid_mode(
                    FIELD,
                    s,
                    format!("first letter must be 'k' or 'n', got '{c}'"),
                ))
            }
        };
        let create = match create {
            'c' => CreatePolicy::Create,
            'n' => CreatePolicy::Skip,
            c => {
                return Err(ConfigError::invalid_mode(
                    FIELD,
                    s,
                    format!("second letter must be 'c' or 'n', got '{c}'"),
                ))
            }
        };
        let conflict = match conflict {
            'l' => ConflictPolicy::Leave,
            'u' => ConflictPolicy::Update,
            'd' => ConflictPolicy::Delete,
            c => {
                return Err(ConfigError::invalid_mode(
                    FIELD,
                    s,
                    format!("third letter must be 'l', 'u' or 'd', got '{c}'"),
                ))
            }
        };

        Ok(Self::new(keep, create, conflict))
    }
}

impl TryFrom<String> for ExtrasMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExtrasMode> for String {
    fn from(mode: ExtrasMode) -> Self {
        mode.code()
    }
}

impl fmt::Display for ExtrasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Extras handling for nodes the import creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NewExtrasMode {
    /// Copy the archived extras
    #[default]
    Import,
    /// Create the node without extras
    None,
}

impl NewExtrasMode {
    /// Extras a newly created node starts with
    #[must_use]
    pub fn apply(&self, incoming: &Attributes) -> Attributes {
        match self {
            NewExtrasMode::Import => incoming.clone(),
            NewExtrasMode::None => Attributes::new(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NewExtrasMode::Import => "import",
            NewExtrasMode::None => "none",
        }
    }
}

impl FromStr for NewExtrasMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(NewExtrasMode::Import),
            "none" => Ok(NewExtrasMode::None),
            other => Err(ConfigError::invalid_mode(
                "extras_mode_new",
                other,
                "expected 'import' or 'none'",
            )),
        }
    }
}

impl TryFrom<String> for NewExtrasMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NewExtrasMode> for String {
    fn from(mode: NewExtrasMode) -> Self {
        mode.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn extras(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn merged(code: &str) -> Attributes {
        let stored = extras(json!({"a": 1, "b": 1000}));
        let incoming = extras(json!({"b": 2, "c": 3}));
        code.parse::<ExtrasMode>().unwrap().merge(&stored, &incoming)
    }

    #[test]
    fn merge_matrix() {
        assert_eq!(merged("kcl"), extras(json!({"a": 1, "b": 1000, "c": 3})));
        assert_eq!(merged("kcu"), extras(json!({"a": 1, "b": 2, "c": 3})));
        assert_eq!(merged("ncu"), extras(json!({"b": 2, "c": 3})));
        assert_eq!(merged("knl"), extras(json!({"a": 1, "b": 1000})));
        assert_eq!(merged("kcd"), extras(json!({"a": 1, "c": 3})));
    }

    #[test]
    fn equal_values_survive_delete_policy() {
        let stored = extras(json!({"same": true}));
        let mode: ExtrasMode = "ncd".parse().unwrap();
        assert_eq!(mode.merge(&stored, &stored), stored);
    }

    #[test]
    fn invalid_codes_rejected() {
        for code in ["", "kc", "kclx", "xcl", "kxl", "kcx", "KCL"] {
            let err = code.parse::<ExtrasMode>().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidMode { field: FIELD, .. }),
                "{code} -> {err:?}"
            );
        }
    }

    #[test]
    fn non_string_value_rejected() {
        assert!(ExtrasMode::from_value(&json!(3)).is_err());
        assert!(ExtrasMode::from_value(&json!(["k", "c", "l"])).is_err());
        assert_eq!(
            ExtrasMode::from_value(&json!("kcu")).unwrap().conflict,
            ConflictPolicy::Update
        );
    }

    #[test]
    fn code_round_trips_through_display() {
        let mode: ExtrasMode = "ncd".parse().unwrap();
        assert_eq!(mode.to_string(), "ncd");
        assert_eq!(ExtrasMode::default().code(), "kcl");
    }

    #[test]
    fn new_extras_mode_parsing() {
        assert_eq!("none".parse::<NewExtrasMode>().unwrap(), NewExtrasMode::None);
        assert!("all".parse::<NewExtrasMode>().is_err());

        let incoming = extras(json!({"x": 1}));
        assert!(NewExtrasMode::None.apply(&incoming).is_empty());
        assert_eq!(NewExtrasMode::Import.apply(&incoming), incoming);
    }

    fn mode_strategy() -> impl Strategy<Value = ExtrasMode> {
        (
            prop_oneof![Just(KeepPolicy::Keep), Just(KeepPolicy::Discard)],
            prop_oneof![Just(CreatePolicy::Create), Just(CreatePolicy::Skip)],
            prop_oneof![
                Just(ConflictPolicy::Leave),
                Just(ConflictPolicy::Update),
                Just(ConflictPolicy::Delete)
            ],
        )
            .prop_map(|(keep, create, conflict)| ExtrasMode::new(keep, create, conflict))
    }

    fn extras_strategy() -> impl Strategy<Value = Attributes> {
        prop::collection::btree_map("[a-e]", (0i64..4).prop_map(Value::from), 0..5)
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(
            mode in mode_strategy(),
            stored in extras_strategy(),
            incoming in extras_strategy(),
        ) {
            let once = mode.merge(&stored, &incoming);
            let twice = mode.merge(&once, &incoming);
            // Delete removes conflicting keys, which create may then re-add
            if mode.conflict != ConflictPolicy::Delete {
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn prop_merge_keys_come_from_either_side(
            mode in mode_strategy(),
            stored in extras_strategy(),
            incoming in extras_strategy(),
        ) {
            let out = mode.merge(&stored, &incoming);
            for key in out.keys() {
                prop_assert!(stored.contains_key(key) || incoming.contains_key(key));
            }
        }
    }
}
