//! Property-based test generators using proptest.
//!
//! Provides strategies for property values, short strings drawn from each
//! packing table, and sequences of graph operations together with a plain
//! model that predicts their committed effect.

use proptest::prelude::*;
use ridgedb_codec::PropertyValue;
use ridgedb_core::{CoreResult, GraphDatabase, NodeId, TransactionId};
use std::collections::BTreeMap;

/// Strategy for property keys.
pub fn property_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Digits and the numeric punctuation that fit 15 characters.
pub fn numerical_string_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9 +,.\\-]{0,15}").expect("Invalid regex")
}

/// Upper-case text that fits 12 characters.
pub fn upper_string_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z _:.\\-]{0,12}").expect("Invalid regex")
}

/// Letters, digits and spaces that fit 10 characters.
pub fn alnum_string_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{0,10}").expect("Invalid regex")
}

/// Latin-1 text that fits 7 characters.
pub fn latin1_string_strategy() -> impl Strategy<Value = String> {
    let printable = prop_oneof![0x20u8..=0x7E, 0xA0u8..=0xFF];
    prop::collection::vec(printable, 0..=7)
        .prop_map(|bytes| bytes.into_iter().map(char::from).collect())
}

/// Strategy for any property value, long ones included.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::Int),
        any::<f64>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(PropertyValue::Float),
        numerical_string_strategy().prop_map(PropertyValue::String),
        upper_string_strategy().prop_map(PropertyValue::String),
        latin1_string_strategy().prop_map(PropertyValue::String),
        ".{0,400}".prop_map(PropertyValue::String),
        prop::collection::vec(any::<u8>(), 0..600).prop_map(PropertyValue::Bytes),
    ]
}

/// One step against a graph of a few fixed nodes.
#[derive(Debug, Clone)]
pub enum GraphOp {
    /// Set `key` on node `node` (an index into the fixed nodes).
    Set {
        /// Node index.
        node: usize,
        /// Property key.
        key: String,
        /// New value.
        value: PropertyValue,
    },
    /// Remove `key` from node `node`.
    Remove {
        /// Node index.
        node: usize,
        /// Property key.
        key: String,
    },
}

/// Strategy for operations over `nodes` fixed nodes.
pub fn graph_op_strategy(nodes: usize) -> impl Strategy<Value = GraphOp> {
    let key = prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string);
    prop_oneof![
        3 => (0..nodes, key.clone(), property_value_strategy())
            .prop_map(|(node, key, value)| GraphOp::Set { node, key, value }),
        1 => (0..nodes, key).prop_map(|(node, key)| GraphOp::Remove { node, key }),
    ]
}

/// A transaction's worth of operations and whether it commits.
pub fn transaction_strategy(nodes: usize) -> impl Strategy<Value = (Vec<GraphOp>, bool)> {
    (prop::collection::vec(graph_op_strategy(nodes), 1..8), any::<bool>())
}

/// The committed properties a sequence of transactions should leave behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphModel {
    /// `(node index, key) -> value`.
    pub properties: BTreeMap<(usize, String), PropertyValue>,
}

impl GraphModel {
    /// Applies one committed operation.
    pub fn apply(&mut self, op: &GraphOp) {
        match op {
            GraphOp::Set { node, key, value } => {
                self.properties.insert((*node, key.clone()), value.clone());
            }
            GraphOp::Remove { node, key } => {
                self.properties.remove(&(*node, key.clone()));
            }
        }
    }

    /// Reads the committed state of `nodes` back from a database.
    pub fn read(db: &GraphDatabase, nodes: &[NodeId]) -> CoreResult<Self> {
        let mut model = Self::default();
        for (index, node) in nodes.iter().enumerate() {
            for key in db.property_keys((*node).into()) {
                if let Some(value) = db.get_property((*node).into(), &key)? {
                    model.properties.insert((index, key), value);
                }
            }
        }
        Ok(model)
    }
}

/// Runs one operation inside `tx`.
///
/// # Errors
///
/// Returns the database error.
pub fn run_op(db: &GraphDatabase, tx: TransactionId, nodes: &[NodeId], op: &GraphOp) -> CoreResult<()> {
    match op {
        GraphOp::Set { node, key, value } => {
            db.set_property(tx, nodes[*node].into(), key, value.clone())
        }
        GraphOp::Remove { node, key } => db.remove_property(tx, nodes[*node].into(), key).map(|_| ()),
    }
}

/// Configuration for property tests.
pub fn proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgedb_codec::{encode_value, EncodedValue};

    proptest! {
        #[test]
        fn table_strategies_stay_inline(
            s in prop_oneof![
                numerical_string_strategy(),
                upper_string_strategy(),
                alnum_string_strategy(),
                latin1_string_strategy(),
            ]
        ) {
            let encoded = encode_value(&PropertyValue::String(s));
            prop_assert!(matches!(encoded, EncodedValue::Inline { .. }), "{encoded:?}");
        }

        #[test]
        fn keys_are_valid(key in property_key_strategy()) {
            prop_assert!(!key.is_empty() && key.len() <= 16);
        }
    }
}
