//! Messages and message sets.
//!
//! A message is an integer carried as its decimal text encoding. Verification
//! is order-independent, so received sequences are folded into a
//! [`MessageSet`] that remembers how many duplicates it collapsed.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// An opaque, uniquely identifiable payload.
///
/// Identity is value equality. Messages are never mutated after creation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Message(u64);

impl Message {
    /// Creates a message from its integer value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the integer value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Decodes a message from a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is empty, not UTF-8, or not an integer.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::InvalidPayload {
                reason: "empty payload",
            });
        }
        let text = std::str::from_utf8(payload).map_err(|_| Error::InvalidPayload {
            reason: "payload is not utf-8",
        })?;
        text.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| Error::InvalidPayload {
                reason: "payload is not an integer",
            })
    }

    /// Encodes the message as a record payload.
    #[must_use]
    pub fn to_payload(self) -> Bytes {
        Bytes::from(self.0.to_string())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg({})", self.0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Message {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// An unordered collection of messages with set semantics.
///
/// Only constructible from an ordered sequence of received or acknowledged
/// messages. The length of that sequence is kept so the number of collapsed
/// duplicates can be reported. Equality compares the sets only.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    /// Distinct messages.
    messages: BTreeSet<Message>,
    /// Length of the sequence the set was built from.
    sequence_len: usize,
}

impl MessageSet {
    /// Builds a set from a received or acknowledged sequence.
    #[must_use]
    pub fn from_sequence(sequence: &[Message]) -> Self {
        Self {
            messages: sequence.iter().copied().collect(),
            sequence_len: sequence.len(),
        }
    }

    /// Returns the number of distinct messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the set holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the length of the sequence the set was built from.
    #[must_use]
    pub const fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    /// Returns how many entries of the source sequence were duplicates.
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.sequence_len.abs_diff(self.messages.len())
    }

    /// Returns true if the set contains the message.
    #[must_use]
    pub fn contains(&self, message: Message) -> bool {
        self.messages.contains(&message)
    }

    /// Returns the messages in `self` that are not in `other`, in ascending order.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Vec<Message> {
        self.messages.difference(&other.messages).copied().collect()
    }

    /// Iterates the distinct messages in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Message> + '_ {
        self.messages.iter().copied()
    }
}

impl PartialEq for MessageSet {
    fn eq(&self, other: &Self) -> bool {
        self.messages == other.messages
    }
}

impl Eq for MessageSet {}

impl From<&[Message]> for MessageSet {
    fn from(sequence: &[Message]) -> Self {
        Self::from_sequence(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(values: &[u64]) -> Vec<Message> {
        values.iter().copied().map(Message::new).collect()
    }

    #[test]
    fn test_message_payload_round_trip() {
        let msg = Message::new(99_999);
        assert_eq!(msg.to_payload(), Bytes::from_static(b"99999"));
        assert_eq!(Message::parse(b"99999").unwrap(), msg);
    }

    #[test]
    fn test_message_parse_rejects_garbage() {
        assert!(Message::parse(b"").is_err());
        assert!(Message::parse(b"abc").is_err());
        assert!(Message::parse(b"-1").is_err());
        assert!(Message::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_message_parse_tolerates_trailing_newline() {
        assert_eq!(Message::parse(b"42\n").unwrap(), Message::new(42));
    }

    #[test]
    fn test_set_discards_order() {
        let a = MessageSet::from_sequence(&msgs(&[3, 1, 2]));
        let b = MessageSet::from_sequence(&msgs(&[1, 2, 3]));
        assert_eq!(a, b);
        assert_eq!(a.duplicate_count(), 0);
    }

    #[test]
    fn test_set_counts_duplicates() {
        let set = MessageSet::from_sequence(&msgs(&[1, 2, 2, 3, 3, 3]));
        assert_eq!(set.len(), 3);
        assert_eq!(set.sequence_len(), 6);
        assert_eq!(set.duplicate_count(), 3);
    }

    #[test]
    fn test_set_difference() {
        let input = MessageSet::from_sequence(&msgs(&[1, 2, 3, 4]));
        let output = MessageSet::from_sequence(&msgs(&[2, 4, 5]));
        assert_eq!(input.difference(&output), msgs(&[1, 3]));
        assert_eq!(output.difference(&input), msgs(&[5]));
        assert!(input.contains(Message::new(4)));
        assert!(!input.contains(Message::new(5)));
    }

    #[test]
    fn test_set_equality_ignores_duplicates() {
        let clean = MessageSet::from_sequence(&msgs(&[1, 2]));
        let dirty = MessageSet::from_sequence(&msgs(&[1, 2, 2]));
        assert_eq!(clean, dirty);
        assert_ne!(clean.duplicate_count(), dirty.duplicate_count());
    }
}
