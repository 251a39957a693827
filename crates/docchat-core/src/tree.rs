//! Depth-first traversal over directory snapshots.

use crate::models::{DirectorySnapshot, DocumentRecord};

/// Pre-order depth-first walk yielding `(depth, directory)` pairs.
pub struct Walk<'a> {
    stack: Vec<(usize, &'a DirectorySnapshot)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a DirectorySnapshot);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, dir) = self.stack.pop()?;
        // Reverse so the first child is visited first.
        self.stack
            .extend(dir.subdirectories.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, dir))
    }
}

/// Walk `root` and all its descendants, root first.
pub fn walk(root: &DirectorySnapshot) -> Walk<'_> {
    Walk {
        stack: vec![(0, root)],
    }
}

/// First value produced by `f` in depth-first order.
pub fn find_map<'a, T>(
    root: &'a DirectorySnapshot,
    mut f: impl FnMut(&'a DirectorySnapshot) -> Option<T>,
) -> Option<T> {
    walk(root).find_map(|(_, dir)| f(dir))
}

/// Find a directory by id anywhere in the tree.
pub fn find_directory<'a>(root: &'a DirectorySnapshot, id: &str) -> Option<&'a DirectorySnapshot> {
    find_map(root, |dir| (dir.id == id).then_some(dir))
}

/// Find a document by id anywhere in the tree.
pub fn find_document<'a>(root: &'a DirectorySnapshot, id: &str) -> Option<&'a DocumentRecord> {
    find_map(root, |dir| dir.documents.iter().find(|doc| doc.id == id))
}

/// Number of documents in the tree.
pub fn document_count(root: &DirectorySnapshot) -> usize {
    walk(root).map(|(_, dir)| dir.documents.len()).sum()
}
