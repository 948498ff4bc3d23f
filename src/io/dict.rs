// Ordered name-indexed collection and its radix-tree node encoding

use crate::error::{ArchiveError, Result};

/// An ordered collection of named values.
///
/// Insertion order is the on-disk order; the position of a key is
/// meaningful (option choices are addressed by index).
#[derive(Debug, Clone, PartialEq)]
pub struct ResDict<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for ResDict<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> ResDict<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        match self.index_of(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn get_index(&self, index: usize) -> Option<(&str, &T)> {
        self.entries.get(index).map(|(k, v)| (k.as_str(), v))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl<T> FromIterator<(String, T)> for ResDict<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut dict = ResDict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// One node of the on-disk radix tree. Node 0 is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictNode {
    pub reference: i32,
    pub left: u16,
    pub right: u16,
}

/// Bit `bit` of `key`, counting from the last byte's least significant bit.
fn key_bit(key: &[u8], bit: u32) -> u32 {
    let byte = (bit >> 3) as usize;
    if byte >= key.len() {
        return 0;
    }
    u32::from((key[key.len() - byte - 1] >> (bit & 7)) & 1)
}

fn first_diff_bit(a: &[u8], b: &[u8]) -> Option<u32> {
    let bits = (a.len().max(b.len()) * 8) as u32;
    (0..bits).find(|&bit| key_bit(a, bit) != key_bit(b, bit))
}

fn child(node: &DictNode, key: &[u8]) -> usize {
    if key_bit(key, node.reference as u32) == 1 {
        node.right as usize
    } else {
        node.left as usize
    }
}

/// Builds the radix-tree nodes for `keys`, root first.
pub(crate) fn build_tree(keys: &[&str]) -> Result<Vec<DictNode>> {
    let mut nodes = vec![DictNode {
        reference: -1,
        left: 0,
        right: 0,
    }];
    let mut node_keys: Vec<&[u8]> = vec![b""];

    for name in keys {
        let key = name.as_bytes();

        let mut prev = 0usize;
        let mut cur = nodes[0].left as usize;
        while nodes[cur].reference > nodes[prev].reference {
            prev = cur;
            cur = child(&nodes[cur], key);
        }
        let bit = first_diff_bit(node_keys[cur], key).ok_or_else(|| {
            ArchiveError::malformed(format!("dictionary key '{name}' is empty or duplicated"))
        })?;

        prev = 0;
        cur = nodes[0].left as usize;
        while nodes[cur].reference > nodes[prev].reference && nodes[cur].reference < bit as i32 {
            prev = cur;
            cur = child(&nodes[cur], key);
        }

        let index = u16::try_from(nodes.len())
            .map_err(|_| ArchiveError::malformed("dictionary has more than 65535 entries"))?;
        let node = if key_bit(key, bit) == 1 {
            DictNode {
                reference: bit as i32,
                left: cur as u16,
                right: index,
            }
        } else {
            DictNode {
                reference: bit as i32,
                left: index,
                right: cur as u16,
            }
        };
        nodes.push(node);
        node_keys.push(key);

        if prev == 0 {
            nodes[0].left = index;
        } else if key_bit(key, nodes[prev].reference as u32) == 1 {
            nodes[prev].right = index;
        } else {
            nodes[prev].left = index;
        }
    }

    Ok(nodes)
}
