//! Where executable images come from when a binary page is first touched.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// A readable executable file.
pub trait ExecutableImage {
    fn size(&self) -> u64;

    /// Fills as much of `buf` as the image has from `offset` on and returns
    /// the number of bytes read. Reads past the end return 0.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;
}

impl ExecutableImage for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(start) = usize::try_from(offset) else {
            return 0;
        };
        let Some(available) = self.get(start..) else {
            return 0;
        };
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        count
    }
}

/// Finds the image a process was started from by its name.
pub trait ImageResolver {
    fn resolve(&self, name: &str) -> Option<&dyn ExecutableImage>;
}

/// In-memory images keyed by program name.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: BTreeMap<String, Vec<u8>>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` under `name`, returning the image it replaces.
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.images.insert(String::from(name), bytes)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.images.remove(name)
    }
}

impl ImageResolver for ImageStore {
    fn resolve(&self, name: &str) -> Option<&dyn ExecutableImage> {
        self.images
            .get(name)
            .map(|image| image as &dyn ExecutableImage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn short_read_at_end_of_image() {
        let image: Vec<u8> = (0..10).collect();
        let mut buf = [0xFFu8; 4];
        assert_eq!(image.read_at(8, &mut buf), 2);
        assert_eq!(buf, [8, 9, 0xFF, 0xFF]);
        assert_eq!(image.read_at(10, &mut buf), 0);
        assert_eq!(image.read_at(u64::MAX, &mut buf), 0);
    }

    #[test]
    fn store_resolves_by_name() {
        let mut store = ImageStore::new();
        assert!(store.insert("init", vec![1, 2, 3]).is_none());
        assert_eq!(store.resolve("init").map(|image| image.size()), Some(3));
        assert!(store.resolve("sh").is_none());
        assert!(store.remove("init").is_some());
        assert!(store.resolve("init").is_none());
    }
}
