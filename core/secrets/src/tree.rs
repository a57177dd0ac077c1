//! Nested secret documents and the structure-preserving walk over them.
//!
//! A document is a mapping whose values are either nested mappings (groups)
//! or leaves. Encryption replaces every leaf with a [`Ciphertext`] and keeps
//! keys, order and nesting untouched; decryption is the exact inverse.
//!
//! On disk an enveloped leaf is itself a mapping, so decryption tells leaves
//! from groups by shape: a mapping holding both `key` and `ciphertext` is an
//! envelope, any other mapping is a group. A nested plaintext group using both
//! names for its own entries would be misread, so encryption refuses it. The
//! document root is always a group.

use serde_json::{Map, Value};
use tracing::debug;

use publicpillar_common::{Error, KeyPath, Result};
use publicpillar_crypto::{Ciphertext, HybridEngine, CIPHERTEXT_FIELD, KEY_FIELD};

/// A value in a secret document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretNode<L> {
    /// Nested mapping.
    Group(SecretTree<L>),
    /// Plaintext or ciphertext value.
    Leaf(L),
}

/// Ordered mapping of names to nested groups or leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretTree<L> {
    entries: Vec<(String, SecretNode<L>)>,
}

/// A document of plaintext values.
pub type PlainTree = SecretTree<String>;

/// A document of encrypted values.
pub type SealedTree = SecretTree<Ciphertext>;

impl<L> SecretTree<L> {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert an entry, replacing any existing entry of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, node: SecretNode<L>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = node,
            None => self.entries.push((name, node)),
        }
    }

    /// Get an entry by name.
    pub fn get(&self, name: &str) -> Option<&SecretNode<L>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, node)| node)
    }

    /// Check whether an entry exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretNode<L>)> {
        self.entries.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Number of direct entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of leaves at any depth.
    pub fn leaf_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, node)| match node {
                SecretNode::Group(group) => group.leaf_count(),
                SecretNode::Leaf(_) => 1,
            })
            .sum()
    }
}

impl<L> Default for SecretTree<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> FromIterator<(String, SecretNode<L>)> for SecretTree<L> {
    fn from_iter<I: IntoIterator<Item = (String, SecretNode<L>)>>(iter: I) -> Self {
        let mut tree = Self::new();
        for (name, node) in iter {
            tree.insert(name, node);
        }
        tree
    }
}

impl PlainTree {
    /// Build a plaintext tree from a parsed document.
    ///
    /// Numbers and booleans are kept as their textual form; an empty
    /// document yields an empty tree.
    ///
    /// # Errors
    /// - `InvalidInput` if the root is not a mapping
    /// - `UnsupportedValue` for nulls and sequences
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => plain_group(map, &KeyPath::root()),
            Value::Null => Ok(Self::new()),
            _ => Err(root_not_mapping()),
        }
    }

    /// Convert back to a document value.
    pub fn to_value(&self) -> Value {
        tree_to_value(self, |leaf| Value::String(leaf.clone()))
    }
}

impl SealedTree {
    /// Build an encrypted tree from a parsed document.
    ///
    /// # Errors
    /// - `InvalidInput` if the root is not a mapping
    /// - `MalformedCiphertext` for leaves that are not base64 strings or
    ///   well-formed envelopes
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => sealed_group(map, &KeyPath::root()),
            Value::Null => Ok(Self::new()),
            _ => Err(root_not_mapping()),
        }
    }

    /// Convert back to a document value.
    pub fn to_value(&self) -> Value {
        tree_to_value(self, ciphertext_to_value)
    }
}

/// Encrypt every leaf of `tree`.
///
/// Fails on the first leaf that cannot be encrypted; no partial tree is
/// returned.
pub fn encrypt_tree(engine: &HybridEngine, tree: &PlainTree) -> Result<SealedTree> {
    encrypt_group(engine, tree, &KeyPath::root())
}

/// Decrypt every leaf of `tree`.
///
/// Fails on the first leaf that cannot be decrypted; no partial tree is
/// returned.
pub fn decrypt_tree(engine: &HybridEngine, tree: &SealedTree) -> Result<PlainTree> {
    decrypt_group(engine, tree, &KeyPath::root())
}

/// Encrypt a parsed plaintext document into a ciphertext document.
pub fn encrypt_value(engine: &HybridEngine, value: &Value) -> Result<Value> {
    let plain = PlainTree::from_value(value)?;
    Ok(encrypt_tree(engine, &plain)?.to_value())
}

/// Decrypt a parsed ciphertext document into a plaintext document.
pub fn decrypt_value(engine: &HybridEngine, value: &Value) -> Result<Value> {
    let sealed = SealedTree::from_value(value)?;
    Ok(decrypt_tree(engine, &sealed)?.to_value())
}

fn encrypt_group(engine: &HybridEngine, tree: &PlainTree, path: &KeyPath) -> Result<SealedTree> {
    // The root is always read back as a group, so only nested groups collide.
    if !path.is_root() && tree.contains(KEY_FIELD) && tree.contains(CIPHERTEXT_FIELD) {
        return Err(Error::AmbiguousGroup(path.to_string()));
    }

    let mut sealed = SealedTree::new();
    for (name, node) in tree.iter() {
        let child = path.join(name);
        let node = match node {
            SecretNode::Group(group) => SecretNode::Group(encrypt_group(engine, group, &child)?),
            SecretNode::Leaf(plaintext) => {
                debug!(path = %child, "Encrypting leaf");
                SecretNode::Leaf(engine.encrypt(plaintext)?)
            }
        };
        sealed.insert(name, node);
    }
    Ok(sealed)
}

fn decrypt_group(engine: &HybridEngine, tree: &SealedTree, path: &KeyPath) -> Result<PlainTree> {
    let mut plain = PlainTree::new();
    for (name, node) in tree.iter() {
        let child = path.join(name);
        let node = match node {
            SecretNode::Group(group) => SecretNode::Group(decrypt_group(engine, group, &child)?),
            SecretNode::Leaf(ciphertext) => {
                debug!(path = %child, enveloped = ciphertext.is_enveloped(), "Decrypting leaf");
                SecretNode::Leaf(engine.decrypt(ciphertext)?)
            }
        };
        plain.insert(name, node);
    }
    Ok(plain)
}

fn plain_group(map: &Map<String, Value>, path: &KeyPath) -> Result<PlainTree> {
    let mut tree = PlainTree::new();
    for (name, value) in map {
        let child = path.join(name);
        let node = match value {
            Value::Object(inner) => SecretNode::Group(plain_group(inner, &child)?),
            Value::String(s) => SecretNode::Leaf(s.clone()),
            Value::Number(n) => SecretNode::Leaf(n.to_string()),
            Value::Bool(b) => SecretNode::Leaf(b.to_string()),
            Value::Null | Value::Array(_) => {
                return Err(Error::UnsupportedValue(child.to_string()));
            }
        };
        tree.insert(name.clone(), node);
    }
    Ok(tree)
}

fn sealed_group(map: &Map<String, Value>, path: &KeyPath) -> Result<SealedTree> {
    let mut tree = SealedTree::new();
    for (name, value) in map {
        let child = path.join(name);
        let node = match value {
            Value::Object(inner) if is_envelope_shape(inner) => {
                SecretNode::Leaf(envelope_leaf(inner, &child)?)
            }
            Value::Object(inner) => SecretNode::Group(sealed_group(inner, &child)?),
            Value::String(s) => SecretNode::Leaf(Ciphertext::Direct(s.clone())),
            _ => {
                return Err(Error::MalformedCiphertext(format!(
                    "'{}' is neither a base64 string nor an envelope",
                    child
                )));
            }
        };
        tree.insert(name.clone(), node);
    }
    Ok(tree)
}

fn is_envelope_shape(map: &Map<String, Value>) -> bool {
    map.contains_key(KEY_FIELD) && map.contains_key(CIPHERTEXT_FIELD)
}

fn envelope_leaf(map: &Map<String, Value>, path: &KeyPath) -> Result<Ciphertext> {
    if map.len() != 2 {
        return Err(Error::MalformedCiphertext(format!(
            "envelope '{}' has fields other than '{}' and '{}'",
            path, KEY_FIELD, CIPHERTEXT_FIELD
        )));
    }

    let field = |name: &str| -> Result<String> {
        map.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::MalformedCiphertext(format!("envelope '{}' field '{}' is not a string", path, name))
            })
    };

    Ok(Ciphertext::Enveloped {
        key: field(KEY_FIELD)?,
        ciphertext: field(CIPHERTEXT_FIELD)?,
    })
}

fn ciphertext_to_value(ciphertext: &Ciphertext) -> Value {
    match ciphertext {
        Ciphertext::Direct(value) => Value::String(value.clone()),
        Ciphertext::Enveloped { key, ciphertext } => {
            let mut map = Map::new();
            map.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
            map.insert(CIPHERTEXT_FIELD.to_string(), Value::String(ciphertext.clone()));
            Value::Object(map)
        }
    }
}

fn tree_to_value<L>(tree: &SecretTree<L>, leaf: impl Fn(&L) -> Value + Copy) -> Value {
    let map = tree
        .iter()
        .map(|(name, node)| {
            let value = match node {
                SecretNode::Group(group) => tree_to_value(group, leaf),
                SecretNode::Leaf(l) => leaf(l),
            };
            (name.to_string(), value)
        })
        .collect();
    Value::Object(map)
}

fn root_not_mapping() -> Error {
    Error::InvalidInput("Document root must be a mapping".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use publicpillar_crypto::KeyMaterial;
    use serde_json::json;

    const KEY_2048: &str = include_str!("../../crypto/testdata/key2048.pem");

    fn engine() -> HybridEngine {
        HybridEngine::new(KeyMaterial::parse(KEY_2048, None).unwrap())
    }

    fn sample() -> Value {
        json!({
            "database": {
                "password": "supersecretdbpassword",
                "port": 5432,
            },
            "webserver": {
                "secret_key": "signstuffwiththiskey".repeat(20),
                "tls": { "enabled": true },
            },
            "api_token": "t0k3n",
        })
    }

    #[test]
    fn test_roundtrip_preserves_shape_and_order() {
        let engine = engine();
        let document = sample();

        let encrypted = encrypt_value(&engine, &document).unwrap();
        let decrypted = decrypt_value(&engine, &encrypted).unwrap();

        let expected = json!({
            "database": { "password": "supersecretdbpassword", "port": "5432" },
            "webserver": {
                "secret_key": "signstuffwiththiskey".repeat(20),
                "tls": { "enabled": "true" },
            },
            "api_token": "t0k3n",
        });
        assert_eq!(decrypted, expected);

        let names: Vec<&String> = decrypted.as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["database", "webserver", "api_token"]);
    }

    #[test]
    fn test_encrypted_leaf_shapes() {
        let engine = engine();
        let encrypted = encrypt_value(&engine, &sample()).unwrap();

        assert!(encrypted["database"]["password"].is_string());
        let envelope = encrypted["webserver"]["secret_key"].as_object().unwrap();
        let fields: Vec<&String> = envelope.keys().collect();
        assert_eq!(fields, vec![KEY_FIELD, CIPHERTEXT_FIELD]);
        assert!(encrypted["webserver"]["tls"].is_object());
    }

    #[test]
    fn test_tree_roundtrip() {
        let engine = engine();
        let plain = PlainTree::from_value(&sample()).unwrap();

        let sealed = encrypt_tree(&engine, &plain).unwrap();
        assert_eq!(sealed.leaf_count(), plain.leaf_count());
        assert_eq!(decrypt_tree(&engine, &sealed).unwrap(), plain);
    }

    #[test]
    fn test_group_with_one_envelope_name_is_a_group() {
        let engine = engine();
        let document = json!({ "ssh": { "key": "-----BEGIN...", "comment": "deploy" } });

        let encrypted = encrypt_value(&engine, &document).unwrap();
        let decrypted = decrypt_value(&engine, &encrypted).unwrap();
        assert_eq!(decrypted, document);
    }

    #[test]
    fn test_ambiguous_group_rejected() {
        let engine = engine();
        let document = json!({ "outer": { "key": "a", "ciphertext": "b" } });

        let err = encrypt_value(&engine, &document).unwrap_err();
        match err {
            Error::AmbiguousGroup(path) => assert_eq!(path, "outer"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_root_with_envelope_names_is_a_group() {
        let engine = engine();
        let document = json!({ "key": "a", "ciphertext": "b" });

        let encrypted = encrypt_value(&engine, &document).unwrap();
        assert_eq!(SealedTree::from_value(&encrypted).unwrap().leaf_count(), 2);
        assert_eq!(decrypt_value(&engine, &encrypted).unwrap(), document);
    }

    #[test]
    fn test_unsupported_values() {
        for document in [json!({ "a": null }), json!({ "a": { "b": [1, 2] } })] {
            let err = PlainTree::from_value(&document).unwrap_err();
            assert!(matches!(err, Error::UnsupportedValue(_)));
        }
    }

    #[test]
    fn test_root_must_be_mapping() {
        assert!(matches!(
            PlainTree::from_value(&json!("scalar")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            SealedTree::from_value(&json!([1])),
            Err(Error::InvalidInput(_))
        ));
        assert!(PlainTree::from_value(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_envelope_with_extra_field_is_malformed() {
        let document = json!({ "a": { "key": "QQ==", "ciphertext": "Qg==", "iv": "x" } });
        assert!(matches!(
            SealedTree::from_value(&document),
            Err(Error::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_envelope_with_non_string_field_is_malformed() {
        let document = json!({ "a": { "key": 12, "ciphertext": "Qg==" } });
        assert!(matches!(
            SealedTree::from_value(&document),
            Err(Error::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_non_string_sealed_leaf_is_malformed() {
        assert!(matches!(
            SealedTree::from_value(&json!({ "a": 42 })),
            Err(Error::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_one_bad_leaf_fails_whole_tree() {
        let engine = engine();
        let mut encrypted = encrypt_value(&engine, &sample()).unwrap();
        encrypted["database"]["password"] = json!("!!not base64!!");

        assert!(matches!(
            decrypt_value(&engine, &encrypted),
            Err(Error::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut tree = PlainTree::new();
        tree.insert("a", SecretNode::Leaf("1".to_string()));
        tree.insert("b", SecretNode::Leaf("2".to_string()));
        tree.insert("a", SecretNode::Leaf("3".to_string()));

        assert_eq!(tree.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(tree.get("a"), Some(&SecretNode::Leaf("3".to_string())));
        assert_eq!(tree.len(), 2);
    }

    fn plain_tree() -> impl Strategy<Value = PlainTree> {
        let leaf = "[ -~]{0,200}".prop_map(SecretNode::Leaf);
        leaf.prop_recursive(3, 12, 4, |inner| {
            prop::collection::btree_map("[a-j]{1,6}", inner, 0..4)
                .prop_map(|entries| SecretNode::Group(entries.into_iter().collect()))
        })
        .prop_map(|node| match node {
            SecretNode::Group(tree) => tree,
            leaf => std::iter::once(("value".to_string(), leaf)).collect(),
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_structure_preserved(tree in plain_tree()) {
            let engine = engine();
            let sealed = encrypt_tree(&engine, &tree).unwrap();
            let reparsed = SealedTree::from_value(&sealed.to_value()).unwrap();

            prop_assert_eq!(decrypt_tree(&engine, &reparsed).unwrap(), tree);
        }
    }
}
