//! Index-based intrusive doubly linked lists
//!
//! Kernel allocations and media states live in flat `Vec` slabs and move
//! between several lists (free, allocated, submitted, ...) in O(1). Each node
//! carries its own `prev`/`next` indices plus a tag naming the list that
//! currently owns it, so a node can never sit in two lists at once.

use std::fmt::Debug;

use crate::error::HeapResult;
use crate::internal_error;

/// Per-node link fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links<L> {
    prev: Option<usize>,
    next: Option<usize>,
    owner: Option<L>,
}

impl<L> Default for Links<L> {
    fn default() -> Self {
        Links {
            prev: None,
            next: None,
            owner: None,
        }
    }
}

impl<L: Copy> Links<L> {
    pub fn new() -> Self {
        Links {
            prev: None,
            next: None,
            owner: None,
        }
    }

    /// List currently holding the node
    pub fn owner(&self) -> Option<L> {
        self.owner
    }

    pub fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn prev(&self) -> Option<usize> {
        self.prev
    }
}

/// Slab element that can be threaded onto an [`IndexList`]
pub trait Linked<L> {
    fn links(&self) -> &Links<L>;
    fn links_mut(&mut self) -> &mut Links<L>;
}

/// Head/tail/count for one list over a shared slab
#[derive(Debug, Clone)]
pub struct IndexList<L> {
    kind: L,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<L: Copy + Eq + Debug> IndexList<L> {
    pub fn new(kind: L) -> Self {
        IndexList {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn kind(&self) -> L {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Append `idx` at the tail
    pub fn push_back<T: Linked<L>>(&mut self, slab: &mut [T], idx: usize) -> HeapResult<()> {
        self.check_detached(slab, idx)?;
        let old_tail = self.tail;
        {
            let links = slab[idx].links_mut();
            links.prev = old_tail;
            links.next = None;
            links.owner = Some(self.kind);
        }
        match old_tail {
            Some(tail) => slab[tail].links_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
        Ok(())
    }

    /// Insert `idx` at the head
    pub fn push_front<T: Linked<L>>(&mut self, slab: &mut [T], idx: usize) -> HeapResult<()> {
        self.check_detached(slab, idx)?;
        let old_head = self.head;
        {
            let links = slab[idx].links_mut();
            links.prev = None;
            links.next = old_head;
            links.owner = Some(self.kind);
        }
        match old_head {
            Some(head) => slab[head].links_mut().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
        Ok(())
    }

    /// Unlink `idx`; it must currently belong to this list
    pub fn remove<T: Linked<L>>(&mut self, slab: &mut [T], idx: usize) -> HeapResult<()> {
        let (prev, next) = {
            let links = slab
                .get(idx)
                .ok_or_else(|| internal_error!("{:?} list: index {} out of range", self.kind, idx))?
                .links();
            if links.owner != Some(self.kind) {
                return Err(internal_error!(
                    "{:?} list: node {} is owned by {:?}",
                    self.kind,
                    idx,
                    links.owner
                ));
            }
            (links.prev, links.next)
        };

        match prev {
            Some(p) => slab[p].links_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => slab[n].links_mut().prev = prev,
            None => self.tail = prev,
        }

        let links = slab[idx].links_mut();
        links.prev = None;
        links.next = None;
        links.owner = None;
        self.len -= 1;
        Ok(())
    }

    /// Detach and return the head node
    pub fn pop_front<T: Linked<L>>(&mut self, slab: &mut [T]) -> Option<usize> {
        let head = self.head?;
        // head is owned by construction
        self.remove(slab, head).ok()?;
        Some(head)
    }

    /// Walk the list head to tail
    pub fn iter<'a, T: Linked<L>>(&self, slab: &'a [T]) -> ListIter<'a, T, L> {
        ListIter {
            slab,
            cursor: self.head,
            _kind: std::marker::PhantomData,
        }
    }

    /// Snapshot of the node order, for walks that move nodes between lists
    pub fn indices<T: Linked<L>>(&self, slab: &[T]) -> Vec<usize> {
        self.iter(slab).collect()
    }

    /// Forget every node without touching the slab
    ///
    /// Callers must reset the nodes' links themselves.
    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn check_detached<T: Linked<L>>(&self, slab: &[T], idx: usize) -> HeapResult<()> {
        let node = slab
            .get(idx)
            .ok_or_else(|| internal_error!("{:?} list: index {} out of range", self.kind, idx))?;
        if let Some(owner) = node.links().owner {
            return Err(internal_error!(
                "{:?} list: node {} still linked into {:?}",
                self.kind,
                idx,
                owner
            ));
        }
        Ok(())
    }
}

/// Iterator over node indices
pub struct ListIter<'a, T, L> {
    slab: &'a [T],
    cursor: Option<usize>,
    _kind: std::marker::PhantomData<L>,
}

impl<'a, T: Linked<L>, L: Copy> Iterator for ListIter<'a, T, L> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cursor?;
        self.cursor = self.slab.get(idx).and_then(|node| node.links().next);
        Some(idx)
    }
}

/// Reset every node's links (used when a whole list is cleared)
pub fn unlink_all<T: Linked<L>, L: Copy>(slab: &mut [T]) {
    for node in slab.iter_mut() {
        *node.links_mut() = Links::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Which {
        A,
        B,
    }

    #[derive(Debug, Default)]
    struct Node {
        links: Links<Which>,
    }

    impl Linked<Which> for Node {
        fn links(&self) -> &Links<Which> {
            &self.links
        }
        fn links_mut(&mut self) -> &mut Links<Which> {
            &mut self.links
        }
    }

    fn slab(n: usize) -> Vec<Node> {
        (0..n).map(|_| Node::default()).collect()
    }

    #[test]
    fn test_push_back_preserves_order() {
        let mut nodes = slab(4);
        let mut list = IndexList::new(Which::A);
        for i in 0..4 {
            list.push_back(&mut nodes, i).unwrap();
        }
        assert_eq!(list.indices(&nodes), vec![0, 1, 2, 3]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.head(), Some(0));
        assert_eq!(list.tail(), Some(3));
    }

    #[test]
    fn test_push_front() {
        let mut nodes = slab(3);
        let mut list = IndexList::new(Which::A);
        list.push_front(&mut nodes, 0).unwrap();
        list.push_front(&mut nodes, 1).unwrap();
        list.push_back(&mut nodes, 2).unwrap();
        assert_eq!(list.indices(&nodes), vec![1, 0, 2]);
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut nodes = slab(5);
        let mut list = IndexList::new(Which::A);
        for i in 0..5 {
            list.push_back(&mut nodes, i).unwrap();
        }
        list.remove(&mut nodes, 2).unwrap();
        list.remove(&mut nodes, 0).unwrap();
        list.remove(&mut nodes, 4).unwrap();
        assert_eq!(list.indices(&nodes), vec![1, 3]);
        assert_eq!(list.head(), Some(1));
        assert_eq!(list.tail(), Some(3));
        assert_eq!(nodes[2].links.owner(), None);
    }

    #[test]
    fn test_move_between_lists() {
        let mut nodes = slab(3);
        let mut a = IndexList::new(Which::A);
        let mut b = IndexList::new(Which::B);
        for i in 0..3 {
            a.push_back(&mut nodes, i).unwrap();
        }

        a.remove(&mut nodes, 1).unwrap();
        b.push_back(&mut nodes, 1).unwrap();

        assert_eq!(a.indices(&nodes), vec![0, 2]);
        assert_eq!(b.indices(&nodes), vec![1]);
        assert_eq!(nodes[1].links.owner(), Some(Which::B));
    }

    #[test]
    fn test_double_insert_rejected() {
        let mut nodes = slab(1);
        let mut a = IndexList::new(Which::A);
        let mut b = IndexList::new(Which::B);
        a.push_back(&mut nodes, 0).unwrap();
        assert!(b.push_back(&mut nodes, 0).is_err());
        assert!(a.push_back(&mut nodes, 0).is_err());
    }

    #[test]
    fn test_remove_from_wrong_list_rejected() {
        let mut nodes = slab(1);
        let mut a = IndexList::new(Which::A);
        let mut b = IndexList::new(Which::B);
        a.push_back(&mut nodes, 0).unwrap();
        assert!(b.remove(&mut nodes, 0).is_err());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_pop_front_drains() {
        let mut nodes = slab(3);
        let mut a = IndexList::new(Which::A);
        for i in 0..3 {
            a.push_back(&mut nodes, i).unwrap();
        }
        assert_eq!(a.pop_front(&mut nodes), Some(0));
        assert_eq!(a.pop_front(&mut nodes), Some(1));
        assert_eq!(a.pop_front(&mut nodes), Some(2));
        assert_eq!(a.pop_front(&mut nodes), None);
        assert!(a.is_empty());
        assert_eq!(a.tail(), None);
    }

    #[test]
    fn test_clear_and_unlink_all() {
        let mut nodes = slab(2);
        let mut a = IndexList::new(Which::A);
        a.push_back(&mut nodes, 0).unwrap();
        a.push_back(&mut nodes, 1).unwrap();
        a.clear();
        unlink_all(&mut nodes);
        assert!(a.is_empty());
        a.push_back(&mut nodes, 1).unwrap();
        assert_eq!(a.indices(&nodes), vec![1]);
    }
}
