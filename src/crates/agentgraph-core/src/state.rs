//! Typed workflow state with per-field reducers
//!
//! Every workflow carries one state value through the graph. Nodes never mutate
//! it directly: they return a partial **update**, and the executor merges the
//! update into the current state field by field. Each field names the reducer
//! used for that merge.
//!
//! ```text
//!   current state ──┐
//!                   ├──► reducer per field ──► next state
//!   node update  ───┘    (replace / append / merge / merge_by_id / union)
//! ```
//!
//! # Reducers
//!
//! | Reducer | Field type | Semantics |
//! |---------|------------|-----------|
//! | [`replace`](reducers::replace) | any `T` | last writer wins |
//! | [`append`](reducers::append) | `Vec<T>` | concatenate |
//! | [`merge`](reducers::merge) | `BTreeMap<K, V>` | shallow key merge |
//! | [`merge_by_id`](reducers::merge_by_id) | `Vec<T: Identified>` | replace matching ids, append new ones |
//! | [`union`](reducers::union) | `Vec<T: PartialEq>` | append values not already present |
//!
//! # Declaring a state
//!
//! [`workflow_state!`](crate::workflow_state) generates the state struct, its
//! update struct and both trait impls. Every state also carries three built-in
//! fields: `execution_id`, `last_updated` and `outputs` (node id → last output,
//! merged with [`merge`](reducers::merge)).
//!
//! ```rust
//! use agentgraph_core::prelude::*;
//!
//! workflow_state! {
//!     pub struct Review => ReviewUpdate {
//!         notes: Vec<String> => append,
//!         score: u32 => replace,
//!     }
//! }
//!
//! let state = Review::new("run-1");
//! let next = state.merge(ReviewUpdate::default().notes(vec!["looks good".into()]).score(7));
//! assert_eq!(next.notes, vec!["looks good".to_string()]);
//! assert_eq!(next.score, 7);
//! ```
//!
//! Merging is pure: [`WorkflowState::merge`] returns a new value and the
//! caller's state is left untouched.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A workflow's state record.
///
/// Implemented by [`workflow_state!`](crate::workflow_state); hand-written
/// implementations must keep `apply` consistent with the field reducers so that
/// checkpoints replay to the same value.
pub trait WorkflowState:
    Debug + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Partial update produced by nodes.
    type Update: StateUpdate;

    fn execution_id(&self) -> &str;

    fn set_execution_id(&mut self, execution_id: String);

    fn last_updated(&self) -> DateTime<Utc>;

    fn touch(&mut self, at: DateTime<Utc>);

    /// Latest output recorded per node id.
    fn outputs(&self) -> &BTreeMap<String, Value>;

    /// Apply every field present in `update` with that field's reducer.
    fn apply(&mut self, update: Self::Update);

    /// Return a new state with `update` applied; `self` is unchanged.
    fn merge(&self, update: Self::Update) -> Self {
        let mut next = self.clone();
        next.apply(update);
        next
    }
}

/// A partial state update. Absent fields leave the state untouched.
pub trait StateUpdate:
    Debug + Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Fold `other` into `self` with the same reducers used for the state, so
    /// that `state.merge(a.combine(b)) == state.merge(a).merge(b)`.
    fn combine(self, other: Self) -> Self;

    fn is_empty(&self) -> bool;

    /// Record `value` as the output of `node`.
    fn with_output(self, node: &str, value: Value) -> Self;
}

/// Items addressable by a stable id, for [`reducers::merge_by_id`].
pub trait Identified {
    fn id(&self) -> &str;
}

/// Field reducers: `(current, incoming) -> current'`, applied in place.
pub mod reducers {
    use super::Identified;
    use std::collections::BTreeMap;

    /// Last writer wins.
    pub fn replace<T>(current: &mut T, incoming: T) {
        *current = incoming;
    }

    pub fn append<T>(current: &mut Vec<T>, incoming: Vec<T>) {
        current.extend(incoming);
    }

    /// Shallow key merge; incoming keys overwrite existing ones.
    pub fn merge<K: Ord, V>(current: &mut BTreeMap<K, V>, incoming: BTreeMap<K, V>) {
        current.extend(incoming);
    }

    /// Replace items whose id already exists, append the rest in order.
    pub fn merge_by_id<T: Identified>(current: &mut Vec<T>, incoming: Vec<T>) {
        for item in incoming {
            match current.iter().position(|existing| existing.id() == item.id()) {
                Some(index) => current[index] = item,
                None => current.push(item),
            }
        }
    }

    pub fn union<T: PartialEq>(current: &mut Vec<T>, incoming: Vec<T>) {
        for item in incoming {
            if !current.contains(&item) {
                current.push(item);
            }
        }
    }
}

/// Combine two optional update fields with a reducer.
#[doc(hidden)]
pub fn combine_field<T, F>(first: Option<T>, second: Option<T>, reduce: F) -> Option<T>
where
    F: FnOnce(&mut T, T),
{
    match (first, second) {
        (Some(mut current), Some(incoming)) => {
            reduce(&mut current, incoming);
            Some(current)
        }
        (current, None) => current,
        (None, incoming) => incoming,
    }
}

/// Declare a workflow state struct and its update struct.
///
/// ```rust
/// use agentgraph_core::prelude::*;
/// use std::collections::BTreeMap;
///
/// workflow_state! {
///     /// Counters keyed by name.
///     pub struct Counters => CountersUpdate {
///         totals: BTreeMap<String, u64> => merge,
///         seen: Vec<String> => union,
///     }
/// }
/// ```
///
/// Expands to:
///
/// - `struct Counters` with `execution_id`, `last_updated`, `outputs` and the
///   listed fields, plus `Counters::new(execution_id)`;
/// - `struct CountersUpdate` with one `Option` per field (unknown keys are
///   rejected on deserialization) and a same-named setter per field;
/// - [`WorkflowState`] and [`StateUpdate`] impls.
///
/// Field types must implement `Clone + Debug + PartialEq + Default` and serde's
/// traits. The invoking crate must depend on `serde`.
#[macro_export]
macro_rules! workflow_state {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident => $update:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty => $reducer:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            pub execution_id: ::std::string::String,
            pub last_updated: $crate::__private::DateTime<$crate::__private::Utc>,
            #[serde(default)]
            pub outputs: ::std::collections::BTreeMap<::std::string::String, $crate::__private::Value>,
            $(
                $(#[$field_meta])*
                #[serde(default)]
                pub $field: $ty,
            )*
        }

        impl $name {
            pub fn new(execution_id: impl ::std::convert::Into<::std::string::String>) -> Self {
                Self {
                    execution_id: execution_id.into(),
                    last_updated: $crate::__private::Utc::now(),
                    outputs: ::std::default::Default::default(),
                    $( $field: ::std::default::Default::default(), )*
                }
            }
        }

        #[derive(Debug, Clone, Default, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        $vis struct $update {
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub outputs: ::std::option::Option<
                ::std::collections::BTreeMap<::std::string::String, $crate::__private::Value>,
            >,
            $(
                $(#[$field_meta])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: ::std::option::Option<$ty>,
            )*
        }

        impl $update {
            $(
                pub fn $field(mut self, value: $ty) -> Self {
                    self.$field = ::std::option::Option::Some(value);
                    self
                }
            )*
        }

        impl $crate::state::StateUpdate for $update {
            fn combine(self, other: Self) -> Self {
                Self {
                    outputs: $crate::state::combine_field(
                        self.outputs,
                        other.outputs,
                        $crate::state::reducers::merge,
                    ),
                    $(
                        $field: $crate::state::combine_field(
                            self.$field,
                            other.$field,
                            $crate::state::reducers::$reducer,
                        ),
                    )*
                }
            }

            fn is_empty(&self) -> bool {
                self.outputs.is_none() $( && self.$field.is_none() )*
            }

            fn with_output(mut self, node: &str, value: $crate::__private::Value) -> Self {
                self.outputs
                    .get_or_insert_with(::std::default::Default::default)
                    .insert(node.to_string(), value);
                self
            }
        }

        impl $crate::state::WorkflowState for $name {
            type Update = $update;

            fn execution_id(&self) -> &str {
                &self.execution_id
            }

            fn set_execution_id(&mut self, execution_id: ::std::string::String) {
                self.execution_id = execution_id;
            }

            fn last_updated(&self) -> $crate::__private::DateTime<$crate::__private::Utc> {
                self.last_updated
            }

            fn touch(&mut self, at: $crate::__private::DateTime<$crate::__private::Utc>) {
                self.last_updated = at;
            }

            fn outputs(
                &self,
            ) -> &::std::collections::BTreeMap<::std::string::String, $crate::__private::Value> {
                &self.outputs
            }

            fn apply(&mut self, update: Self::Update) {
                if let ::std::option::Option::Some(value) = update.outputs {
                    $crate::state::reducers::merge(&mut self.outputs, value);
                }
                $(
                    if let ::std::option::Option::Some(value) = update.$field {
                        $crate::state::reducers::$reducer(&mut self.$field, value);
                    }
                )*
            }
        }
    };
}
