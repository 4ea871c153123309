use crate::error::{FsError, Result};
use crate::node::InodeId;

/// Size of a directory item record.
pub const DIR_ITEM_SIZE: usize = 32;
/// Longest name, in bytes, a directory item stores.
pub const MAX_NAME_LEN: usize = DIR_ITEM_SIZE - 5;

pub const SELF_NAME: &str = ".";
pub const PARENT_NAME: &str = "..";

/// Rejects names that cannot be stored in a directory item.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == SELF_NAME
        || name == PARENT_NAME
        || name.contains('/')
        || name.contains('\0')
    {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A name bound to an inode.
///
/// Encoded as a big endian inode id, a one byte name length and the name bytes
/// padded with zeros to [`DIR_ITEM_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryItem {
    pub name: String,
    pub inode: InodeId,
}

impl DirectoryItem {
    pub fn new<S: Into<String>>(name: S, inode: InodeId) -> Self {
        Self {
            name: name.into(),
            inode,
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let name = self.name.as_bytes();
        buf[..4].copy_from_slice(&self.inode.to_be_bytes());
        buf[4] = name.len() as u8;
        buf[5..5 + name.len()].copy_from_slice(name);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut id = [0; 4];
        id.copy_from_slice(&buf[..4]);
        let len = buf[4] as usize;
        let name = buf
            .get(5..5 + len)
            .filter(|_| len > 0 && len <= MAX_NAME_LEN)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .ok_or_else(|| FsError::Corrupted("malformed directory item".to_string()))?;
        Ok(Self::new(name, u32::from_be_bytes(id)))
    }
}

/// The decoded content of a directory inode. The first two items are always `.`
/// and `..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    items: Vec<DirectoryItem>,
}

impl Directory {
    pub fn new(id: InodeId, parent: InodeId) -> Self {
        Self {
            items: vec![
                DirectoryItem::new(SELF_NAME, id),
                DirectoryItem::new(PARENT_NAME, parent),
            ],
        }
    }

    pub fn parse(content: &[u8]) -> Result<Self> {
        if content.len() % DIR_ITEM_SIZE != 0 {
            return Err(FsError::Corrupted(format!(
                "directory content of {} bytes is not a whole number of items",
                content.len()
            )));
        }
        let items = content
            .chunks_exact(DIR_ITEM_SIZE)
            .map(DirectoryItem::decode)
            .collect::<Result<Vec<_>>>()?;
        let well_formed = items.len() >= 2
            && items[0].name == SELF_NAME
            && items[1].name == PARENT_NAME;
        if !well_formed {
            return Err(FsError::Corrupted(
                "directory does not start with '.' and '..'".to_string(),
            ));
        }
        Ok(Self { items })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0; self.items.len() * DIR_ITEM_SIZE];
        for (item, chunk) in self.items.iter().zip(buf.chunks_exact_mut(DIR_ITEM_SIZE)) {
            item.encode(chunk);
        }
        buf
    }

    /// Number of bytes the directory occupies once serialized.
    pub fn byte_len(&self) -> u64 {
        (self.items.len() * DIR_ITEM_SIZE) as u64
    }

    pub fn id(&self) -> InodeId {
        self.items[0].inode
    }

    pub fn parent(&self) -> InodeId {
        self.items[1].inode
    }

    pub fn lookup(&self, name: &str) -> Option<InodeId> {
        self.items.iter().find(|i| i.name == name).map(|i| i.inode)
    }

    /// Name under which `id` is listed, skipping `.` and `..`.
    pub fn name_of(&self, id: InodeId) -> Option<&str> {
        self.entries().find(|i| i.inode == id).map(|i| i.name.as_str())
    }

    /// All items including `.` and `..`.
    pub fn items(&self) -> &[DirectoryItem] {
        &self.items
    }

    /// Items other than `.` and `..`.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryItem> {
        self.items.iter().skip(2)
    }

    pub fn is_empty(&self) -> bool {
        self.items.len() == 2
    }

    pub fn insert(&mut self, item: DirectoryItem) -> Result<()> {
        validate_name(&item.name)?;
        if self.lookup(&item.name).is_some() {
            return Err(FsError::AlreadyExists(item.name));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<DirectoryItem> {
        let pos = self.entries().position(|i| i.name == name)? + 2;
        Some(self.items.remove(pos))
    }

    pub fn rebind_parent(&mut self, parent: InodeId) {
        self.items[1].inode = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        let long = "a".repeat(MAX_NAME_LEN + 1);
        for bad in ["", ".", "..", "a/b", long.as_str()] {
            assert!(matches!(validate_name(bad), Err(FsError::InvalidName(_))), "{}", bad);
        }
    }

    #[test]
    fn item_layout_is_fixed() {
        let mut dir = Directory::new(3, 0);
        dir.insert(DirectoryItem::new("abc", 0x0102_0304)).unwrap();
        let bytes = dir.serialize();

        assert_eq!(bytes.len(), 3 * DIR_ITEM_SIZE);
        let item = &bytes[2 * DIR_ITEM_SIZE..];
        assert_eq!(&item[..4], &[1, 2, 3, 4]);
        assert_eq!(item[4], 3);
        assert_eq!(&item[5..8], b"abc");
        assert!(item[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn can_parse_serialized_directory() {
        let mut dir = Directory::new(7, 2);
        dir.insert(DirectoryItem::new("x", 8)).unwrap();
        dir.insert(DirectoryItem::new("y", 9)).unwrap();

        let parsed = Directory::parse(&dir.serialize()).unwrap();
        assert_eq!(parsed, dir);
        assert_eq!(parsed.id(), 7);
        assert_eq!(parsed.parent(), 2);
        assert_eq!(parsed.lookup("y"), Some(9));
        assert_eq!(parsed.name_of(8), Some("x"));
    }

    #[test]
    fn insert_rejects_duplicates_and_remove_keeps_dot_entries() {
        let mut dir = Directory::new(1, 0);
        dir.insert(DirectoryItem::new("a", 2)).unwrap();
        assert!(matches!(
            dir.insert(DirectoryItem::new("a", 3)),
            Err(FsError::AlreadyExists(_))
        ));
        assert_eq!(dir.remove(".."), None);
        assert_eq!(dir.remove("a"), Some(DirectoryItem::new("a", 2)));
        assert!(dir.is_empty());
    }

    #[test]
    fn parse_rejects_content_without_dot_entries() {
        assert!(Directory::parse(&[]).is_err());
        assert!(Directory::parse(&[0; 31]).is_err());
        let mut bogus = Directory::new(1, 0).serialize();
        bogus[4] = 0;
        assert!(matches!(Directory::parse(&bogus), Err(FsError::Corrupted(_))));
    }
}
