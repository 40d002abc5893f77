//! Material tags and the table mapping them to human-readable labels.

use crate::{
    error::{DecompositionError, Result},
    io::parse_ron_file,
};
use nohash_hasher::BuildNoHashHasher;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashMap, fmt, path::Path};

/// A single-byte material code identifying the content of a voxel.
///
/// The zero byte is reserved as a placeholder for "no tag" and never occurs in
/// a well-formed [`VoxelGrid`](crate::grid::VoxelGrid).
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tag(u8);

/// Lookup table from [`Tag`]s to labels.
#[derive(Clone, Debug, Default)]
pub struct TagTable {
    labels: HashMap<u8, String, BuildNoHashHasher<u8>>,
}

/// Serializable mapping from tag characters to labels, as stored in RON tag
/// table files, e.g. `{ 'A': "air", 'R': "rock" }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagTableSpecification(pub HashMap<char, String>);

impl Tag {
    /// The reserved placeholder tag.
    pub const NONE: Self = Self(0);

    /// Wraps the given byte in a tag without checking whether it is reserved.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Creates the tag for the given character.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ReservedTag`] if the character is `'\0'`
    /// or does not fit in a single byte.
    pub fn from_char(character: char) -> Result<Self> {
        match u8::try_from(character) {
            Ok(byte) if byte != 0 => Ok(Self(byte)),
            _ => Err(DecompositionError::ReservedTag(character)),
        }
    }

    /// Returns the byte value of the tag.
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Returns the raw tag character.
    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TagTable {
    /// Creates an empty tag table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tag table from the given pairs of tag characters and labels.
    /// Later pairs override earlier ones with the same character.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ReservedTag`] if any character is not a
    /// valid tag.
    pub fn from_labels<L: Into<String>>(
        labels: impl IntoIterator<Item = (char, L)>,
    ) -> Result<Self> {
        let mut table = Self::new();
        for (character, label) in labels {
            table.insert(Tag::from_char(character)?, label.into());
        }
        Ok(table)
    }

    /// Creates a tag table from the given specification.
    ///
    /// # Errors
    /// See [`Self::from_labels`].
    pub fn from_specification(specification: TagTableSpecification) -> Result<Self> {
        Self::from_labels(specification.0)
    }

    /// Reads a [`TagTableSpecification`] from the RON file at the given path
    /// and creates the corresponding tag table.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or parsed, or if it
    /// contains an invalid tag.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_specification(parse_ron_file(file_path)?)
    }

    /// Associates the given label with the given tag, returning the label it
    /// replaced, if any.
    pub fn insert(&mut self, tag: Tag, label: String) -> Option<String> {
        self.labels.insert(tag.byte(), label)
    }

    /// Returns the number of labeled tags.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table has no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the label of the given tag, or [`None`] if the table has no
    /// entry for it.
    pub fn get_label(&self, tag: Tag) -> Option<&str> {
        self.labels.get(&tag.byte()).map(String::as_str)
    }

    /// Returns the label of the given tag, falling back to the raw tag
    /// character when the table has no entry for it.
    pub fn label(&self, tag: Tag) -> Cow<'_, str> {
        match self.get_label(tag) {
            Some(label) => Cow::Borrowed(label),
            None => Cow::Owned(tag.as_char().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_tag_from_ascii_character() {
        let tag = Tag::from_char('R').unwrap();
        assert_eq!(tag.byte(), b'R');
        assert_eq!(tag.as_char(), 'R');
        assert_eq!(tag.to_string(), "R");
        assert_ne!(tag, Tag::NONE);
    }

    #[test]
    fn should_reject_reserved_and_wide_characters_as_tags() {
        assert!(matches!(
            Tag::from_char('\0'),
            Err(DecompositionError::ReservedTag('\0'))
        ));
        assert!(matches!(
            Tag::from_char('ø'),
            Ok(tag) if tag.byte() == 0xF8
        ));
        assert!(Tag::from_char('€').is_err());
    }

    #[test]
    fn should_look_up_registered_label() {
        let table = TagTable::from_labels([('A', "air"), ('R', "rock")]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_label(Tag::from_byte(b'R')), Some("rock"));
        assert_eq!(table.label(Tag::from_byte(b'A')), "air");
    }

    #[test]
    fn should_fall_back_to_raw_character_for_missing_label() {
        let table = TagTable::from_labels([('A', "air")]).unwrap();
        assert_eq!(table.get_label(Tag::from_byte(b'W')), None);
        assert_eq!(table.label(Tag::from_byte(b'W')), "W");
    }

    #[test]
    fn later_labels_override_earlier_ones() {
        let table = TagTable::from_labels([('A', "air"), ('A', "atmosphere")]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.label(Tag::from_byte(b'A')), "atmosphere");
    }

    #[test]
    fn should_parse_tag_table_specification_from_ron() {
        let specification: TagTableSpecification =
            ron::from_str(r#"{ 'A': "air", 'R': "rock" }"#).unwrap();
        let table = TagTable::from_specification(specification).unwrap();
        assert_eq!(table.label(Tag::from_byte(b'A')), "air");
        assert_eq!(table.label(Tag::from_byte(b'R')), "rock");
    }

    #[test]
    fn should_fail_to_create_table_with_reserved_tag() {
        assert!(TagTable::from_labels([('\0', "nothing")]).is_err());
    }
}
