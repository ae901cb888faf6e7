//! Index-linked timer lists over a fixed node pool
//!
//! Every node sits in exactly one list at a time: the pool's free list or
//! one active list owned by a timer queue. Links are `u32` indices into the
//! pool with [`NONE`] as the null link.

use crate::error::{Result, SedaError};

/// Null link.
pub const NONE: u32 = u32::MAX;

/// Stable reference to an armed timer.
///
/// The generation is bumped every time a node returns to the free list, so a
/// handle kept after its timer fired or was cancelled is rejected instead of
/// aliasing the node's next owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

impl TimerHandle {
    /// A handle that never resolves.
    pub const INVALID: TimerHandle = TimerHandle {
        index: NONE,
        generation: 0,
    };

    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.index != NONE
    }
}

pub(crate) struct TimerNode<P> {
    pub param: Option<P>,
    pub interval: u64,
    pub expire_at: u64,
    pub cyclic: bool,
    pub active: bool,
    pub generation: u32,
    prev: u32,
    next: u32,
}

/// Head/tail of one list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListHead {
    head: u32,
    tail: u32,
    len: usize,
}

impl ListHead {
    pub const fn new() -> Self {
        Self {
            head: NONE,
            tail: NONE,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn front(&self) -> Option<u32> {
        (self.head != NONE).then_some(self.head)
    }
}

/// Fixed pool of timer nodes plus its free list.
pub(crate) struct TimerPool<P> {
    nodes: Vec<TimerNode<P>>,
    free: ListHead,
}

impl<P> TimerPool<P> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SedaError::InvalidArgument("timer capacity must be > 0"));
        }
        if capacity >= NONE as usize {
            return Err(SedaError::InvalidArgument("timer capacity too large"));
        }
        let mut pool = Self {
            nodes: Vec::with_capacity(capacity),
            free: ListHead::new(),
        };
        for i in 0..capacity {
            pool.nodes.push(TimerNode {
                param: None,
                interval: 0,
                expire_at: 0,
                cyclic: false,
                active: false,
                generation: 0,
                prev: NONE,
                next: NONE,
            });
            let mut free = pool.free;
            pool.push_back(&mut free, i as u32);
            pool.free = free;
        }
        Ok(pool)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.free.len
    }

    #[inline]
    pub fn node(&self, index: u32) -> &TimerNode<P> {
        &self.nodes[index as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, index: u32) -> &mut TimerNode<P> {
        &mut self.nodes[index as usize]
    }

    /// Take a node off the free list and arm it.
    pub fn acquire(&mut self, param: P, interval: u64, expire_at: u64, cyclic: bool) -> Result<u32> {
        let mut free = self.free;
        let index = self.pop_front(&mut free).ok_or(SedaError::TimerPoolExhausted);
        self.free = free;
        let index = index?;
        let node = &mut self.nodes[index as usize];
        node.param = Some(param);
        node.interval = interval;
        node.expire_at = expire_at;
        node.cyclic = cyclic;
        node.active = true;
        Ok(index)
    }

    /// Return an unlinked node to the free list, yielding its parameter.
    pub fn release(&mut self, index: u32) -> Option<P> {
        let node = &mut self.nodes[index as usize];
        node.active = false;
        node.generation = node.generation.wrapping_add(1);
        let param = node.param.take();
        let mut free = self.free;
        self.push_back(&mut free, index);
        self.free = free;
        param
    }

    #[inline]
    pub fn handle(&self, index: u32) -> TimerHandle {
        TimerHandle::new(index, self.nodes[index as usize].generation)
    }

    /// Node index for a live handle.
    pub fn resolve(&self, handle: TimerHandle) -> Result<u32> {
        match self.nodes.get(handle.index as usize) {
            Some(n) if n.active && n.generation == handle.generation => Ok(handle.index),
            _ => Err(SedaError::TimerNotFound),
        }
    }

    pub fn push_back(&mut self, list: &mut ListHead, index: u32) {
        let tail = list.tail;
        {
            let node = &mut self.nodes[index as usize];
            node.prev = tail;
            node.next = NONE;
        }
        if tail == NONE {
            list.head = index;
        } else {
            self.nodes[tail as usize].next = index;
        }
        list.tail = index;
        list.len += 1;
    }

    pub fn unlink(&mut self, list: &mut ListHead, index: u32) {
        let (prev, next) = {
            let node = &mut self.nodes[index as usize];
            let links = (node.prev, node.next);
            node.prev = NONE;
            node.next = NONE;
            links
        };
        if prev == NONE {
            list.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NONE {
            list.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
        list.len -= 1;
    }

    pub fn pop_front(&mut self, list: &mut ListHead) -> Option<u32> {
        let head = list.front()?;
        self.unlink(list, head);
        Some(head)
    }

    /// Fire expired timers at the front of `list`.
    ///
    /// Looks at no more than the list's length on entry, so a cyclic timer
    /// re-armed to `now` is not fired twice in one pass.
    pub fn expire_list<F>(&mut self, list: &mut ListHead, now: u64, f: &mut F) -> usize
    where
        F: FnMut(TimerHandle, &P),
    {
        let budget = list.len;
        let mut fired = 0;
        while fired < budget {
            let Some(index) = list.front() else { break };
            if self.nodes[index as usize].expire_at > now {
                break;
            }
            self.unlink(list, index);
            let handle = self.handle(index);
            if let Some(param) = self.nodes[index as usize].param.as_ref() {
                f(handle, param);
            }
            let node = &mut self.nodes[index as usize];
            if node.cyclic {
                node.expire_at = now.saturating_add(node.interval);
                self.push_back(list, index);
            } else {
                self.release(index);
            }
            fired += 1;
        }
        fired
    }

    /// Walk `list` front to back, checking links and ordering.
    #[cfg(any(test, feature = "debug-assertions"))]
    pub fn check_list(&self, list: &ListHead) {
        let mut count = 0;
        let mut prev = NONE;
        let mut cursor = list.head;
        let mut last_expiry = 0;
        while cursor != NONE {
            let node = &self.nodes[cursor as usize];
            assert_eq!(node.prev, prev, "broken back-link at {}", cursor);
            assert!(node.expire_at >= last_expiry, "list out of order at {}", cursor);
            last_expiry = node.expire_at;
            prev = cursor;
            cursor = node.next;
            count += 1;
        }
        assert_eq!(prev, list.tail);
        assert_eq!(count, list.len);
    }
}
