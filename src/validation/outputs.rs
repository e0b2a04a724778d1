//! Nested model outputs
//!
//! Model forward passes return more than one tensor: logits next to cached
//! keys/values, hidden states per layer, named heads. `Outputs` is the tree
//! those values form, independent of which runtime produced them.

use anyhow::Result;
use candle_core::Tensor;
use indexmap::IndexMap;

/// Tree of tensors as returned by a model
#[derive(Debug, Clone)]
pub enum Outputs {
    /// Single numeric tensor
    Tensor(Tensor),
    /// Ordered sequence of sub-outputs (tuple / list)
    Sequence(Vec<Outputs>),
    /// Named sub-outputs, in insertion order
    Mapping(IndexMap<String, Outputs>),
    /// Any value that is not a tensor or a container (absent cache, flags, ...)
    None,
}

impl Outputs {
    /// Build a mapping from key/value pairs, keeping their order
    pub fn mapping<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Outputs>,
        I: IntoIterator<Item = (K, V)>,
    {
        Outputs::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Outputs::Tensor(_) => "tensor",
            Outputs::Sequence(_) => "sequence",
            Outputs::Mapping(_) => "mapping",
            Outputs::None => "none",
        }
    }

    /// The tensor, if this is a leaf tensor
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Outputs::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Child under `key`, if this is a mapping that has it
    pub fn get(&self, key: &str) -> Option<&Outputs> {
        match self {
            Outputs::Mapping(m) => m.get(key),
            _ => None,
        }
    }

    /// Number of tensors in the tree
    pub fn num_tensors(&self) -> usize {
        match self {
            Outputs::Tensor(_) => 1,
            Outputs::Sequence(items) => items.iter().map(Outputs::num_tensors).sum(),
            Outputs::Mapping(m) => m.values().map(Outputs::num_tensors).sum(),
            Outputs::None => 0,
        }
    }

    /// Rebuild a tree from flat dotted names.
    ///
    /// `past_key_values.0.key` becomes mapping `past_key_values` → sequence
    /// element 0 → mapping key `key`. A level whose keys are exactly
    /// `0..n` becomes a sequence; any other level stays a mapping whose
    /// keys keep the order in which they were first seen.
    pub fn from_named_tensors<I>(named: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let mut root = Node::Branch(IndexMap::new());
        for (name, tensor) in named {
            root.insert(&name, tensor)?;
        }
        Ok(root.into_outputs())
    }
}

impl From<Tensor> for Outputs {
    fn from(t: Tensor) -> Self {
        Outputs::Tensor(t)
    }
}

impl<T: Into<Outputs>> From<Vec<T>> for Outputs {
    fn from(items: Vec<T>) -> Self {
        Outputs::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Outputs>> From<Option<T>> for Outputs {
    fn from(value: Option<T>) -> Self {
        value.map_or(Outputs::None, Into::into)
    }
}

/// Intermediate tree used while unflattening names
enum Node {
    Leaf(Tensor),
    Branch(IndexMap<String, Node>),
}

impl Node {
    fn insert(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            anyhow::bail!("Invalid output name '{}': empty segment", name);
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| anyhow::anyhow!("Invalid output name '{}'", name))?;

        let mut node = self;
        for segment in parents {
            node = match node {
                Node::Branch(children) => children
                    .entry(segment.to_string())
                    .or_insert_with(|| Node::Branch(IndexMap::new())),
                Node::Leaf(_) => anyhow::bail!(
                    "Output name '{}' nests under a name that is already a tensor",
                    name
                ),
            };
        }

        match node {
            Node::Branch(children) => {
                if children.contains_key(*last) {
                    anyhow::bail!(
                        "Output name '{}' is defined twice or also used as a prefix",
                        name
                    );
                }
                children.insert(last.to_string(), Node::Leaf(tensor));
                Ok(())
            }
            Node::Leaf(_) => anyhow::bail!(
                "Output name '{}' nests under a name that is already a tensor",
                name
            ),
        }
    }

    fn into_outputs(self) -> Outputs {
        match self {
            Node::Leaf(t) => Outputs::Tensor(t),
            Node::Branch(children) if is_index_range(children.keys()) => {
                let mut items: Vec<(usize, Outputs)> = children
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v.into_outputs())))
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                Outputs::Sequence(items.into_iter().map(|(_, v)| v).collect())
            }
            Node::Branch(children) => Outputs::Mapping(
                children
                    .into_iter()
                    .map(|(k, v)| (k, v.into_outputs()))
                    .collect(),
            ),
        }
    }
}

/// Keys are exactly "0", "1", ..., "n-1" in some order
fn is_index_range<'a>(keys: impl Iterator<Item = &'a String>) -> bool {
    let mut indices = Vec::new();
    for key in keys {
        match key.parse::<usize>() {
            Ok(i) if i.to_string() == *key => indices.push(i),
            _ => return false,
        }
    }
    indices.sort_unstable();
    !indices.is_empty() && indices.iter().enumerate().all(|(i, &v)| i == v)
}
