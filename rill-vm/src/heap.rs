//! # Managed Heap
//!
//! A fixed-node, word-addressed memory: the backing store is a single
//! `Vec<u64>` interpreted as a sequence of ten-word nodes. Word 0 of every
//! node is a byte-precise header, words 1..=8 are child slots, and word 9 is
//! the extension link chaining continuation nodes for objects with more than
//! eight children.
//!
//! ## Header layout (word 0)
//!
//! | Bits | Field | Meaning |
//! |------|-------|---------|
//! | 0..8 | tag | node kind ([`Tag`]) |
//! | 8..16 | mark | collector mark bit |
//! | 16..32 | count | logical child-slot count |
//! | 32..64 | meta | per-tag payload (array length, builtin id, closure arity + entry, free-list link) |
//!
//! ## Allocation and collection
//!
//! Free nodes form a singly linked list threaded through the metadata field.
//! Allocation is first-fit from that list; on a miss the mark-and-sweep
//! collector runs, and if the list is still empty the backing buffer doubles.
//! Collection needs the full root set, so every allocator entry point takes a
//! [`RootProvider`] — the scheduler implements it by walking every task's
//! stacks, environment, and wait tokens. Addresses that are live only in
//! local variables of the VM itself must be enrolled in the heap's *working
//! set* across any allocation that could collect.
//!
//! The heap is single-threaded and not reentrant: no allocator call may
//! begin until the previous one returns, and collection runs only from
//! allocation.

use std::collections::HashMap;

use thiserror::Error;

use crate::value::{Addr, Tag, Value};

/// Words per node.
pub const NODE_WORDS: usize = 10;
/// Child slots per node (words 1..=8).
pub const NODE_CHILDREN: usize = 8;
/// Bytes per machine word.
pub const WORD_BYTES: usize = 8;
/// Bytes per node.
pub const NODE_BYTES: usize = NODE_WORDS * WORD_BYTES;

/// Word offset of the extension link within a node.
const EXT_OFFSET: usize = 9;
/// Free-list terminator in the metadata field.
const FREE_NIL: u32 = u32::MAX;

/// A heap fault. All variants are fatal for the VM.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeapError {
    /// The heap cannot grow any further.
    #[error("out of memory: heap cannot grow past {words} words")]
    OutOfMemory {
        /// Current buffer size in words.
        words: usize,
    },

    /// The configured heap cannot fit a single node.
    #[error("heap of {bytes} bytes is below the one-node minimum of {min} bytes", min = NODE_BYTES)]
    BelowMinimum {
        /// Requested size.
        bytes: usize,
    },

    /// A typed accessor was applied to a node of the wrong tag. This is an
    /// invariant breach in the VM or the compiler, not in the running
    /// program.
    #[error("expected a {expected} node at {at}, found {found}")]
    TagMismatch {
        /// The tag the accessor requires.
        expected: Tag,
        /// The tag actually present.
        found: Tag,
        /// The offending address.
        at: Addr,
    },

    /// A child index is outside an object's recorded child count.
    #[error("child index {index} out of range at {at} (count {count})")]
    ChildOutOfRange {
        /// The offending address.
        at: Addr,
        /// The requested index.
        index: usize,
        /// The recorded logical child count.
        count: usize,
    },

    /// An allocation requested more children than the header can record.
    #[error("allocation of {requested} children exceeds the per-object maximum of {max}", max = u16::MAX)]
    TooManyChildren {
        /// The requested child count.
        requested: usize,
    },

    /// `addr_to_value` was applied to a node that does not box a primitive.
    #[error("a {tag} node does not unbox to a primitive value")]
    NotBoxable {
        /// The node's tag.
        tag: Tag,
    },
}

/// The set of roots the collector must trace, beyond the heap's own
/// singletons and working set.
///
/// The scheduler is the canonical implementor: it presents the global
/// environment and every task's environment, operand stack, runtime stack,
/// wait tokens, and working set.
pub trait RootProvider {
    /// Call `visitor` once per root address.
    fn visit_roots(&self, visitor: &mut dyn FnMut(Addr));
}

/// A root provider with no roots, for bootstrap and tests.
pub struct NoRoots;

impl RootProvider for NoRoots {
    fn visit_roots(&self, _visitor: &mut dyn FnMut(Addr)) {}
}

impl RootProvider for Vec<Addr> {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Addr)) {
        for &addr in self {
            visitor(addr);
        }
    }
}

impl<const N: usize> RootProvider for [Addr; N] {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Addr)) {
        for &addr in self {
            visitor(addr);
        }
    }
}

/// Addresses of the five literal singletons, allocated once at heap creation.
/// Singleton identity equals value, and the addresses never change across a
/// collection or a resize.
#[derive(Debug, Clone, Copy)]
pub struct Singletons {
    /// The `false` literal.
    pub false_obj: Addr,
    /// The `true` literal.
    pub true_obj: Addr,
    /// The `null` literal.
    pub null_obj: Addr,
    /// The `undefined` literal.
    pub undefined_obj: Addr,
    /// The "no value written yet" sentinel.
    pub unallocated: Addr,
}

/// Allocation and collection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Nodes the buffer currently holds.
    pub nodes_total: usize,
    /// Nodes currently on the free list.
    pub nodes_free: usize,
    /// Completed collection cycles.
    pub collections: usize,
    /// Nodes reclaimed across all cycles.
    pub nodes_freed_total: usize,
    /// Times the backing buffer doubled.
    pub grows: usize,
}

/// One interned string: its node address and its text.
#[derive(Debug, Clone)]
struct StringEntry {
    addr: Addr,
    text: String,
}

/// The managed heap.
pub struct Heap {
    /// The backing buffer, addressed in words.
    words: Vec<u64>,
    /// First word index past the last usable node.
    node_limit: usize,
    /// Head of the free list (a word address), or [`FREE_NIL`].
    free_head: u32,
    /// String pool: 32-bit hash → (node address, text).
    strings: HashMap<u32, StringEntry>,
    /// Temporary roots protecting mid-construction addresses.
    working: Vec<Addr>,
    /// The literal singletons.
    singletons: Singletons,
    /// Counters.
    stats: HeapStats,
}

// ---------------------------------------------------------------------------
// Header encoding
// ---------------------------------------------------------------------------

fn pack_header(tag: Tag, marked: bool, count: u16, meta: u32) -> u64 {
    (tag as u64) | ((marked as u64) << 8) | ((count as u64) << 16) | ((meta as u64) << 32)
}

fn header_tag(word: u64) -> Tag {
    Tag::from_u8((word & 0xFF) as u8).expect("valid tag byte in node header")
}

fn header_marked(word: u64) -> bool {
    (word >> 8) & 0xFF != 0
}

fn header_count(word: u64) -> u16 {
    ((word >> 16) & 0xFFFF) as u16
}

fn header_meta(word: u64) -> u32 {
    (word >> 32) as u32
}

fn with_mark(word: u64, marked: bool) -> u64 {
    (word & !0xFF00) | ((marked as u64) << 8)
}

fn with_meta(word: u64, meta: u32) -> u64 {
    (word & 0xFFFF_FFFF) | ((meta as u64) << 32)
}

/// The DJB2 string hash, folded to 32 bits.
fn djb2(text: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in text.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(byte as u32);
    }
    hash
}

impl Heap {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create a heap of `bytes` bytes and allocate the literal singletons.
    ///
    /// The buffer is rounded down to a whole number of nodes and must fit at
    /// least one; it grows by doubling whenever collection cannot satisfy an
    /// allocation.
    pub fn new(bytes: usize) -> Result<Self, HeapError> {
        let node_count = bytes / NODE_BYTES;
        if node_count == 0 {
            return Err(HeapError::BelowMinimum { bytes });
        }

        let node_limit = node_count * NODE_WORDS;
        let mut heap = Self {
            words: vec![0; node_limit],
            node_limit,
            free_head: FREE_NIL,
            strings: HashMap::new(),
            working: Vec::new(),
            singletons: Singletons {
                false_obj: Addr(0),
                true_obj: Addr(0),
                null_obj: Addr(0),
                undefined_obj: Addr(0),
                unallocated: Addr(0),
            },
            stats: HeapStats {
                nodes_total: node_count,
                ..HeapStats::default()
            },
        };

        // Thread every node onto the free list, low addresses first.
        for idx in (0..node_limit).step_by(NODE_WORDS).rev() {
            heap.free_node(idx);
        }
        // free_node counts reclamation; creation is not a collection.
        heap.stats.nodes_freed_total = 0;

        // The singletons are the first five allocations. Nothing can be
        // garbage yet, so allocation during bootstrap grows instead of
        // collecting.
        heap.singletons.unallocated = heap.bootstrap_singleton(Tag::Unallocated)?;
        heap.singletons.false_obj = heap.bootstrap_singleton(Tag::False)?;
        heap.singletons.true_obj = heap.bootstrap_singleton(Tag::True)?;
        heap.singletons.null_obj = heap.bootstrap_singleton(Tag::Null)?;
        heap.singletons.undefined_obj = heap.bootstrap_singleton(Tag::Undefined)?;

        Ok(heap)
    }

    fn bootstrap_singleton(&mut self, tag: Tag) -> Result<Addr, HeapError> {
        let idx = match self.pop_free() {
            Some(idx) => idx,
            None => {
                self.grow()?;
                self.pop_free().expect("free node after growth")
            }
        };
        self.words[idx] = pack_header(tag, false, 0, 0);
        // Singletons have no children; the slots stay self-referential and
        // are never read.
        for slot in 1..NODE_WORDS {
            self.words[idx + slot] = idx as u64;
        }
        Ok(Addr(idx))
    }

    /// The literal singleton addresses.
    pub fn singletons(&self) -> &Singletons {
        &self.singletons
    }

    /// The boolean singleton for `b`.
    pub fn bool_addr(&self, b: bool) -> Addr {
        if b {
            self.singletons.true_obj
        } else {
            self.singletons.false_obj
        }
    }

    /// Current counters.
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Free list, growth
    // -----------------------------------------------------------------------

    fn free_node(&mut self, idx: usize) {
        debug_assert!(idx % NODE_WORDS == 0 && idx < self.node_limit);
        self.words[idx] = pack_header(Tag::Free, false, 0, self.free_head);
        self.free_head = idx as u32;
        self.stats.nodes_free += 1;
        self.stats.nodes_freed_total += 1;
    }

    fn pop_free(&mut self) -> Option<usize> {
        if self.free_head == FREE_NIL {
            return None;
        }
        let idx = self.free_head as usize;
        self.free_head = header_meta(self.words[idx]);
        self.stats.nodes_free -= 1;
        Some(idx)
    }

    /// Double the backing buffer and thread the new tail onto the free list.
    fn grow(&mut self) -> Result<(), HeapError> {
        let old_limit = self.node_limit;
        let new_words = self.words.len() * 2;
        if new_words > FREE_NIL as usize {
            return Err(HeapError::OutOfMemory { words: self.words.len() });
        }
        self.words.resize(new_words, 0);

        let new_limit = (new_words / NODE_WORDS) * NODE_WORDS;
        self.node_limit = new_limit;
        let freed_before = self.stats.nodes_freed_total;
        for idx in ((old_limit..new_limit).step_by(NODE_WORDS)).rev() {
            self.free_node(idx);
        }
        self.stats.nodes_freed_total = freed_before;
        self.stats.nodes_total = new_limit / NODE_WORDS;
        self.stats.grows += 1;
        tracing::debug!(
            nodes = self.stats.nodes_total,
            "heap grown by doubling"
        );
        Ok(())
    }

    /// Take a node off the free list, collecting and then growing on a miss.
    fn fresh_node(&mut self, roots: &dyn RootProvider) -> Result<usize, HeapError> {
        if self.free_head == FREE_NIL {
            self.collect(roots);
            if self.free_head == FREE_NIL {
                self.grow()?;
            }
        }
        Ok(self.pop_free().expect("free node after collection or growth"))
    }

    fn init_node(&mut self, idx: usize, tag: Tag, count: u16, meta: u32) {
        self.words[idx] = pack_header(tag, false, count, meta);
        let unallocated = self.singletons.unallocated.0 as u64;
        for slot in 1..NODE_WORDS {
            self.words[idx + slot] = unallocated;
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocate a node (chain) with the given tag and logical child count.
    ///
    /// Counts above eight build an extension chain; every child slot starts
    /// out `UNALLOCATED`. The partially built chain is protected through the
    /// working set, since each continuation node may trigger a collection.
    pub fn allocate(
        &mut self,
        roots: &dyn RootProvider,
        tag: Tag,
        count: usize,
    ) -> Result<Addr, HeapError> {
        if count > u16::MAX as usize {
            return Err(HeapError::TooManyChildren { requested: count });
        }

        let head = self.fresh_node(roots)?;
        self.init_node(head, tag, count as u16, 0);

        if count > NODE_CHILDREN {
            self.working.push(Addr(head));
            let mut prev = head;
            let mut remaining = count - NODE_CHILDREN;
            while remaining > 0 {
                let chunk = remaining.min(NODE_CHILDREN);
                let ext = match self.fresh_node(roots) {
                    Ok(idx) => idx,
                    Err(e) => {
                        self.working.pop();
                        return Err(e);
                    }
                };
                self.init_node(ext, Tag::Extension, chunk as u16, 0);
                self.words[prev + EXT_OFFSET] = ext as u64;
                prev = ext;
                remaining -= chunk;
            }
            self.working.pop();
        }

        Ok(Addr(head))
    }

    /// Box a number.
    pub fn allocate_number(&mut self, roots: &dyn RootProvider, n: f64) -> Result<Addr, HeapError> {
        let addr = self.allocate(roots, Tag::Number, 1)?;
        self.words[addr.0 + 1] = n.to_bits();
        Ok(addr)
    }

    /// Intern a string. Allocating text whose hash already has a pool entry
    /// returns the existing address.
    pub fn allocate_string(
        &mut self,
        roots: &dyn RootProvider,
        text: &str,
    ) -> Result<Addr, HeapError> {
        let hash = djb2(text);
        if let Some(entry) = self.strings.get(&hash) {
            return Ok(entry.addr);
        }
        let addr = self.allocate(roots, Tag::Str, 1)?;
        self.words[addr.0 + 1] = hash as u64;
        self.strings.insert(
            hash,
            StringEntry {
                addr,
                text: text.to_owned(),
            },
        );
        Ok(addr)
    }

    /// Allocate an empty rendezvous channel.
    pub fn allocate_channel(&mut self, roots: &dyn RootProvider) -> Result<Addr, HeapError> {
        let addr = self.allocate(roots, Tag::Chan, 2)?;
        self.words[addr.0 + 1] = self.singletons.false_obj.0 as u64;
        self.words[addr.0 + 2] = self.singletons.unallocated.0 as u64;
        Ok(addr)
    }

    /// Allocate a fixed-length array with every element `UNALLOCATED`.
    pub fn allocate_array(
        &mut self,
        roots: &dyn RootProvider,
        len: usize,
    ) -> Result<Addr, HeapError> {
        let addr = self.allocate(roots, Tag::Array, len)?;
        self.set_meta(addr, len as u32);
        Ok(addr)
    }

    /// Allocate a closure capturing `env`.
    pub fn allocate_closure(
        &mut self,
        roots: &dyn RootProvider,
        arity: u16,
        entry: u16,
        env: Addr,
    ) -> Result<Addr, HeapError> {
        self.expect_tag(env, Tag::Environment)?;
        self.push_working(env);
        let result = self.allocate(roots, Tag::Closure, 1);
        self.pop_working(1);
        let addr = result?;
        self.set_meta(addr, ((arity as u32) << 16) | entry as u32);
        self.words[addr.0 + 1] = env.0 as u64;
        Ok(addr)
    }

    /// Allocate a builtin reference by registry id.
    pub fn allocate_builtin(
        &mut self,
        roots: &dyn RootProvider,
        id: u32,
    ) -> Result<Addr, HeapError> {
        let addr = self.allocate(roots, Tag::Builtin, 0)?;
        self.set_meta(addr, id);
        Ok(addr)
    }

    /// Allocate a binding frame of `slots` unassigned slots.
    pub fn allocate_frame(
        &mut self,
        roots: &dyn RootProvider,
        slots: usize,
    ) -> Result<Addr, HeapError> {
        self.allocate(roots, Tag::Frame, slots)
    }

    /// Allocate an environment with room for `frames` frame pointers.
    pub fn allocate_environment(
        &mut self,
        roots: &dyn RootProvider,
        frames: usize,
    ) -> Result<Addr, HeapError> {
        let addr = self.allocate(roots, Tag::Environment, frames)?;
        self.set_meta(addr, frames as u32);
        Ok(addr)
    }

    /// Allocate a block frame capturing `env`.
    pub fn allocate_block_frame(
        &mut self,
        roots: &dyn RootProvider,
        env: Addr,
    ) -> Result<Addr, HeapError> {
        self.expect_tag(env, Tag::Environment)?;
        self.push_working(env);
        let result = self.allocate(roots, Tag::BlockFrame, 1);
        self.pop_working(1);
        let addr = result?;
        self.words[addr.0 + 1] = env.0 as u64;
        Ok(addr)
    }

    /// Allocate a call frame capturing `env` and the return program counter.
    ///
    /// The return address occupies the second child slot as a raw encoded
    /// word; the collector knows not to trace it.
    pub fn allocate_call_frame(
        &mut self,
        roots: &dyn RootProvider,
        env: Addr,
        return_pc: usize,
    ) -> Result<Addr, HeapError> {
        self.expect_tag(env, Tag::Environment)?;
        self.push_working(env);
        let result = self.allocate(roots, Tag::CallFrame, 2);
        self.pop_working(1);
        let addr = result?;
        self.words[addr.0 + 1] = env.0 as u64;
        self.words[addr.0 + 2] = return_pc as u64;
        Ok(addr)
    }

    /// Allocate a wait token for a task blocked sending on `chan`.
    pub fn allocate_wait_send(
        &mut self,
        roots: &dyn RootProvider,
        chan: Addr,
    ) -> Result<Addr, HeapError> {
        self.allocate_wait(roots, Tag::WaitSend, chan)
    }

    /// Allocate a wait token for a task blocked receiving on `chan`.
    pub fn allocate_wait_receive(
        &mut self,
        roots: &dyn RootProvider,
        chan: Addr,
    ) -> Result<Addr, HeapError> {
        self.allocate_wait(roots, Tag::WaitReceive, chan)
    }

    fn allocate_wait(
        &mut self,
        roots: &dyn RootProvider,
        tag: Tag,
        chan: Addr,
    ) -> Result<Addr, HeapError> {
        self.expect_tag(chan, Tag::Chan)?;
        self.push_working(chan);
        let result = self.allocate(roots, tag, 1);
        self.pop_working(1);
        let addr = result?;
        self.words[addr.0 + 1] = chan.0 as u64;
        Ok(addr)
    }

    /// Create a new environment extending `env` with `frame` at the end.
    /// The original environment is left untouched.
    pub fn extend_environment(
        &mut self,
        roots: &dyn RootProvider,
        env: Addr,
        frame: Addr,
    ) -> Result<Addr, HeapError> {
        self.expect_tag(env, Tag::Environment)?;
        self.expect_tag(frame, Tag::Frame)?;

        let len = self.environment_len(env)?;
        self.push_working(env);
        self.push_working(frame);
        let result = self.allocate_environment(roots, len + 1);
        self.pop_working(2);
        let new_env = result?;

        for i in 0..len {
            let f = self.child_get(env, i)?;
            self.child_set(new_env, i, f)?;
        }
        self.child_set(new_env, len, frame)?;
        Ok(new_env)
    }

    // -----------------------------------------------------------------------
    // Working set
    // -----------------------------------------------------------------------

    /// Enroll an address as a temporary root across upcoming allocations.
    /// Pair every push with a [`Heap::pop_working`] on all exit paths.
    pub fn push_working(&mut self, addr: Addr) {
        self.working.push(addr);
    }

    /// Release the `n` most recent working-set entries.
    pub fn pop_working(&mut self, n: usize) {
        let len = self.working.len();
        debug_assert!(n <= len, "working set underflow");
        self.working.truncate(len.saturating_sub(n));
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    /// The tag of the node at `addr`.
    pub fn tag_of(&self, addr: Addr) -> Tag {
        debug_assert!(addr.0 % NODE_WORDS == 0 && addr.0 < self.node_limit);
        header_tag(self.words[addr.0])
    }

    fn expect_tag(&self, addr: Addr, expected: Tag) -> Result<(), HeapError> {
        let found = self.tag_of(addr);
        if found != expected {
            return Err(HeapError::TagMismatch {
                expected,
                found,
                at: addr,
            });
        }
        Ok(())
    }

    /// True when `addr` is the `UNALLOCATED` sentinel.
    pub fn is_unallocated(&self, addr: Addr) -> bool {
        addr == self.singletons.unallocated
    }

    fn set_meta(&mut self, addr: Addr, meta: u32) {
        self.words[addr.0] = with_meta(self.words[addr.0], meta);
    }

    /// Resolve logical child index `i` to a word index, walking the
    /// extension chain.
    fn chain_word(&self, addr: Addr, i: usize) -> Result<usize, HeapError> {
        let count = header_count(self.words[addr.0]) as usize;
        if i >= count {
            return Err(HeapError::ChildOutOfRange {
                at: addr,
                index: i,
                count,
            });
        }
        let mut node = addr.0;
        for _ in 0..i / NODE_CHILDREN {
            node = self.words[node + EXT_OFFSET] as usize;
            debug_assert_ne!(node, self.singletons.unallocated.0, "broken extension chain");
        }
        Ok(node + 1 + i % NODE_CHILDREN)
    }

    /// Read logical child slot `i`.
    pub fn child_get(&self, addr: Addr, i: usize) -> Result<Addr, HeapError> {
        let word = self.chain_word(addr, i)?;
        Ok(Addr(self.words[word] as usize))
    }

    /// Write logical child slot `i`.
    pub fn child_set(&mut self, addr: Addr, i: usize, value: Addr) -> Result<(), HeapError> {
        let word = self.chain_word(addr, i)?;
        self.words[word] = value.0 as u64;
        Ok(())
    }

    /// The unboxed number stored at a `Number` node.
    pub fn number_value(&self, addr: Addr) -> Result<f64, HeapError> {
        self.expect_tag(addr, Tag::Number)?;
        Ok(f64::from_bits(self.words[addr.0 + 1]))
    }

    /// The text of an interned string node.
    pub fn string_text(&self, addr: Addr) -> Result<&str, HeapError> {
        self.expect_tag(addr, Tag::Str)?;
        let hash = self.words[addr.0 + 1] as u32;
        let entry = self
            .strings
            .get(&hash)
            .filter(|e| e.addr == addr)
            .expect("interned string has a pool entry");
        Ok(&entry.text)
    }

    /// The registry id of a builtin node.
    pub fn builtin_id(&self, addr: Addr) -> Result<u32, HeapError> {
        self.expect_tag(addr, Tag::Builtin)?;
        Ok(header_meta(self.words[addr.0]))
    }

    /// A closure's parameter count.
    pub fn closure_arity(&self, addr: Addr) -> Result<u16, HeapError> {
        self.expect_tag(addr, Tag::Closure)?;
        Ok((header_meta(self.words[addr.0]) >> 16) as u16)
    }

    /// A closure's entry program counter.
    pub fn closure_entry(&self, addr: Addr) -> Result<u16, HeapError> {
        self.expect_tag(addr, Tag::Closure)?;
        Ok((header_meta(self.words[addr.0]) & 0xFFFF) as u16)
    }

    /// The environment a closure captured at its creation site.
    pub fn closure_env(&self, addr: Addr) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::Closure)?;
        Ok(Addr(self.words[addr.0 + 1] as usize))
    }

    /// An array's element count.
    pub fn array_len(&self, addr: Addr) -> Result<usize, HeapError> {
        self.expect_tag(addr, Tag::Array)?;
        Ok(header_meta(self.words[addr.0]) as usize)
    }

    /// Read an array element.
    pub fn array_get(&self, addr: Addr, i: usize) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::Array)?;
        self.child_get(addr, i)
    }

    /// Write an array element.
    pub fn array_set(&mut self, addr: Addr, i: usize, value: Addr) -> Result<(), HeapError> {
        self.expect_tag(addr, Tag::Array)?;
        self.child_set(addr, i, value)
    }

    /// The number of frames in an environment.
    pub fn environment_len(&self, addr: Addr) -> Result<usize, HeapError> {
        self.expect_tag(addr, Tag::Environment)?;
        Ok(header_meta(self.words[addr.0]) as usize)
    }

    /// The frame at position `i` of an environment (0 = outermost).
    pub fn environment_frame(&self, addr: Addr, i: usize) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::Environment)?;
        self.child_get(addr, i)
    }

    /// The number of binding slots in a frame.
    pub fn frame_len(&self, addr: Addr) -> Result<usize, HeapError> {
        self.expect_tag(addr, Tag::Frame)?;
        Ok(header_count(self.words[addr.0]) as usize)
    }

    /// Read a binding slot.
    pub fn frame_get(&self, addr: Addr, slot: usize) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::Frame)?;
        self.child_get(addr, slot)
    }

    /// Write a binding slot. Bindings are mutable in place.
    pub fn frame_set(&mut self, addr: Addr, slot: usize, value: Addr) -> Result<(), HeapError> {
        self.expect_tag(addr, Tag::Frame)?;
        self.child_set(addr, slot, value)
    }

    /// The environment captured by a block frame.
    pub fn block_frame_env(&self, addr: Addr) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::BlockFrame)?;
        Ok(Addr(self.words[addr.0 + 1] as usize))
    }

    /// The environment captured by a call frame.
    pub fn call_frame_env(&self, addr: Addr) -> Result<Addr, HeapError> {
        self.expect_tag(addr, Tag::CallFrame)?;
        Ok(Addr(self.words[addr.0 + 1] as usize))
    }

    /// The return program counter stored in a call frame.
    pub fn call_frame_return_pc(&self, addr: Addr) -> Result<usize, HeapError> {
        self.expect_tag(addr, Tag::CallFrame)?;
        Ok(self.words[addr.0 + 2] as usize)
    }

    /// The channel a wait token refers to.
    pub fn wait_channel(&self, addr: Addr) -> Result<Addr, HeapError> {
        let tag = self.tag_of(addr);
        if tag != Tag::WaitSend && tag != Tag::WaitReceive {
            return Err(HeapError::TagMismatch {
                expected: Tag::WaitSend,
                found: tag,
                at: addr,
            });
        }
        Ok(Addr(self.words[addr.0 + 1] as usize))
    }

    // -----------------------------------------------------------------------
    // Channel cell
    // -----------------------------------------------------------------------

    /// True when the channel holds no value.
    pub fn channel_is_empty(&self, chan: Addr) -> Result<bool, HeapError> {
        self.expect_tag(chan, Tag::Chan)?;
        Ok(self.words[chan.0 + 2] as usize == self.singletons.unallocated.0)
    }

    /// True when the channel holds a value awaiting its receiver.
    pub fn channel_is_full(&self, chan: Addr) -> Result<bool, HeapError> {
        Ok(!self.channel_is_empty(chan)?)
    }

    /// Deposit `item` into an empty channel. Callers check
    /// [`Heap::channel_is_full`] first.
    pub fn channel_push_item(&mut self, chan: Addr, item: Addr) -> Result<(), HeapError> {
        self.expect_tag(chan, Tag::Chan)?;
        debug_assert!(
            self.words[chan.0 + 2] as usize == self.singletons.unallocated.0,
            "push into an occupied channel"
        );
        self.words[chan.0 + 1] = self.singletons.true_obj.0 as u64;
        self.words[chan.0 + 2] = item.0 as u64;
        Ok(())
    }

    /// Take the value out of a full channel. Callers check
    /// [`Heap::channel_is_empty`] first.
    pub fn channel_pop_item(&mut self, chan: Addr) -> Result<Addr, HeapError> {
        self.expect_tag(chan, Tag::Chan)?;
        let item = Addr(self.words[chan.0 + 2] as usize);
        debug_assert!(
            item.0 != self.singletons.unallocated.0,
            "pop from an empty channel"
        );
        self.words[chan.0 + 1] = self.singletons.false_obj.0 as u64;
        self.words[chan.0 + 2] = self.singletons.unallocated.0 as u64;
        Ok(item)
    }

    // -----------------------------------------------------------------------
    // Boxing
    // -----------------------------------------------------------------------

    /// Box an unboxed value into the heap, returning its address. Booleans,
    /// `null`, and `undefined` map to their singletons; strings intern.
    pub fn value_to_addr(
        &mut self,
        roots: &dyn RootProvider,
        value: &Value,
    ) -> Result<Addr, HeapError> {
        match value {
            Value::Number(n) => self.allocate_number(roots, *n),
            Value::Bool(b) => Ok(self.bool_addr(*b)),
            Value::Str(s) => self.allocate_string(roots, s),
            Value::Null => Ok(self.singletons.null_obj),
            Value::Undefined => Ok(self.singletons.undefined_obj),
        }
    }

    /// Unbox a primitive node back into a value.
    pub fn addr_to_value(&self, addr: Addr) -> Result<Value, HeapError> {
        match self.tag_of(addr) {
            Tag::Number => Ok(Value::Number(self.number_value(addr)?)),
            Tag::True => Ok(Value::Bool(true)),
            Tag::False => Ok(Value::Bool(false)),
            Tag::Str => Ok(Value::Str(self.string_text(addr)?.to_owned())),
            Tag::Null => Ok(Value::Null),
            Tag::Undefined => Ok(Value::Undefined),
            tag => Err(HeapError::NotBoxable { tag }),
        }
    }

    /// A printable rendering of any node, primitive or not. Used by the
    /// `display` builtin and diagnostics.
    pub fn describe(&self, addr: Addr) -> String {
        match self.tag_of(addr) {
            Tag::Number | Tag::True | Tag::False | Tag::Str | Tag::Null | Tag::Undefined => self
                .addr_to_value(addr)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "<corrupt>".into()),
            Tag::Unallocated => "<unassigned>".into(),
            Tag::Chan => "<channel>".into(),
            Tag::Closure => "<closure>".into(),
            Tag::Builtin => "<builtin>".into(),
            Tag::Array => {
                let len = header_meta(self.words[addr.0]) as usize;
                let mut parts = Vec::with_capacity(len);
                for i in 0..len {
                    match self.child_get(addr, i) {
                        Ok(elem) => parts.push(self.describe(elem)),
                        Err(_) => parts.push("<corrupt>".into()),
                    }
                }
                format!("[{}]", parts.join(", "))
            }
            tag => format!("<{}>", tag),
        }
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    /// Run a full mark-and-sweep cycle.
    ///
    /// Marks the singletons, the working set, and everything `roots`
    /// presents, then sweeps every unmarked, non-free node back onto the
    /// free list. Interned strings lose their pool entry when their node is
    /// reclaimed. After the cycle no surviving node has its mark bit set.
    pub fn collect(&mut self, roots: &dyn RootProvider) {
        self.stats.collections += 1;

        // Mark phase: explicit work queue so deep object graphs cannot
        // overflow the Rust call stack.
        let mut queue: Vec<Addr> = Vec::with_capacity(64);
        queue.push(self.singletons.unallocated);
        queue.push(self.singletons.false_obj);
        queue.push(self.singletons.true_obj);
        queue.push(self.singletons.null_obj);
        queue.push(self.singletons.undefined_obj);
        queue.extend(self.working.iter().copied());
        roots.visit_roots(&mut |addr| queue.push(addr));

        while let Some(addr) = queue.pop() {
            let header = self.words[addr.0];
            if header_tag(header) == Tag::Free || header_marked(header) {
                continue;
            }
            self.words[addr.0] = with_mark(header, true);
            self.trace_children(addr, &mut queue);
        }

        // Sweep phase.
        let mut freed = 0usize;
        for idx in (0..self.node_limit).step_by(NODE_WORDS) {
            let header = self.words[idx];
            let tag = header_tag(header);
            if tag == Tag::Free {
                continue;
            }
            if header_marked(header) {
                self.words[idx] = with_mark(header, false);
            } else {
                if tag == Tag::Str {
                    let hash = self.words[idx + 1] as u32;
                    if self.strings.get(&hash).is_some_and(|e| e.addr.0 == idx) {
                        self.strings.remove(&hash);
                    }
                }
                self.free_node(idx);
                freed += 1;
            }
        }

        tracing::debug!(
            freed,
            live = self.stats.nodes_total - self.stats.nodes_free,
            cycle = self.stats.collections,
            "heap collection"
        );
    }

    /// Push every child *address* of `addr` onto the mark queue.
    ///
    /// Slots holding raw payloads are skipped: a number's bits, a string's
    /// hash key, and the return counter in a call frame's second slot.
    fn trace_children(&self, addr: Addr, queue: &mut Vec<Addr>) {
        let idx = addr.0;
        match self.tag_of(addr) {
            Tag::Chan => {
                queue.push(Addr(self.words[idx + 1] as usize));
                queue.push(Addr(self.words[idx + 2] as usize));
            }
            Tag::Closure
            | Tag::BlockFrame
            | Tag::CallFrame
            | Tag::WaitSend
            | Tag::WaitReceive => {
                queue.push(Addr(self.words[idx + 1] as usize));
            }
            Tag::Array
            | Tag::Struct
            | Tag::Slice
            | Tag::Environment
            | Tag::Frame
            | Tag::Extension => {
                let count = header_count(self.words[idx]) as usize;
                for slot in 0..count.min(NODE_CHILDREN) {
                    queue.push(Addr(self.words[idx + 1 + slot] as usize));
                }
                let ext = self.words[idx + EXT_OFFSET] as usize;
                if ext != self.singletons.unallocated.0 {
                    queue.push(Addr(ext));
                }
            }
            // Numbers and strings carry raw payloads; builtins and the
            // singletons have no children at all.
            _ => {}
        }
    }

    /// Test-support: true when `addr` is currently on the free list.
    #[cfg(test)]
    fn on_free_list(&self, addr: Addr) -> bool {
        let mut cursor = self.free_head;
        while cursor != FREE_NIL {
            if cursor as usize == addr.0 {
                return true;
            }
            cursor = header_meta(self.words[cursor as usize]);
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(64 * NODE_BYTES).unwrap()
    }

    #[test]
    fn test_below_minimum_rejected() {
        assert!(matches!(
            Heap::new(NODE_BYTES - 1),
            Err(HeapError::BelowMinimum { .. })
        ));
        assert!(Heap::new(NODE_BYTES).is_ok());
    }

    #[test]
    fn test_singletons_have_expected_tags() {
        let heap = small_heap();
        let s = *heap.singletons();
        assert_eq!(heap.tag_of(s.false_obj), Tag::False);
        assert_eq!(heap.tag_of(s.true_obj), Tag::True);
        assert_eq!(heap.tag_of(s.null_obj), Tag::Null);
        assert_eq!(heap.tag_of(s.undefined_obj), Tag::Undefined);
        assert_eq!(heap.tag_of(s.unallocated), Tag::Unallocated);
    }

    #[test]
    fn test_tag_soundness_across_allocators() {
        let mut heap = small_heap();
        let env = heap.allocate_environment(&NoRoots, 0).unwrap();

        let number = heap.allocate_number(&NoRoots, 1.5).unwrap();
        let string = heap.allocate_string(&NoRoots, "abc").unwrap();
        let chan = heap.allocate_channel(&NoRoots).unwrap();
        let array = heap.allocate_array(&NoRoots, 3).unwrap();
        let closure = heap.allocate_closure(&NoRoots, 2, 7, env).unwrap();
        let builtin = heap.allocate_builtin(&NoRoots, 4).unwrap();
        let frame = heap.allocate_frame(&NoRoots, 2).unwrap();
        let block = heap.allocate_block_frame(&NoRoots, env).unwrap();
        let call = heap.allocate_call_frame(&NoRoots, env, 9).unwrap();
        let ws = heap.allocate_wait_send(&NoRoots, chan).unwrap();
        let wr = heap.allocate_wait_receive(&NoRoots, chan).unwrap();

        let expectations = [
            (number, Tag::Number),
            (string, Tag::Str),
            (chan, Tag::Chan),
            (array, Tag::Array),
            (closure, Tag::Closure),
            (builtin, Tag::Builtin),
            (frame, Tag::Frame),
            (block, Tag::BlockFrame),
            (call, Tag::CallFrame),
            (ws, Tag::WaitSend),
            (wr, Tag::WaitReceive),
            (env, Tag::Environment),
        ];
        for (addr, tag) in expectations {
            assert_eq!(heap.tag_of(addr), tag, "allocator for {} mis-tagged", tag);
        }

        // A typed accessor on the wrong tag is a fault, never a wrong answer.
        assert!(matches!(
            heap.number_value(string),
            Err(HeapError::TagMismatch { .. })
        ));
        assert!(matches!(
            heap.array_len(number),
            Err(HeapError::TagMismatch { .. })
        ));
    }

    #[test]
    fn test_closure_metadata() {
        let mut heap = small_heap();
        let env = heap.allocate_environment(&NoRoots, 0).unwrap();
        let closure = heap.allocate_closure(&NoRoots, 3, 91, env).unwrap();

        assert_eq!(heap.closure_arity(closure).unwrap(), 3);
        assert_eq!(heap.closure_entry(closure).unwrap(), 91);
        assert_eq!(heap.closure_env(closure).unwrap(), env);
    }

    #[test]
    fn test_number_roundtrip() {
        let mut heap = small_heap();
        for n in [0.0, -1.5, 6.02e23, f64::MIN_POSITIVE, -0.0] {
            let addr = heap.allocate_number(&NoRoots, n).unwrap();
            assert_eq!(heap.number_value(addr).unwrap().to_bits(), n.to_bits());
        }
    }

    #[test]
    fn test_string_interning() {
        let mut heap = small_heap();
        let a = heap.allocate_string(&NoRoots, "hello").unwrap();
        let b = heap.allocate_string(&NoRoots, "hello").unwrap();
        let c = heap.allocate_string(&NoRoots, "world").unwrap();

        assert_eq!(a, b, "equal text must intern to the same address");
        assert_ne!(a, c);
        assert_eq!(heap.string_text(a).unwrap(), "hello");
        assert_eq!(heap.string_text(c).unwrap(), "world");
    }

    #[test]
    fn test_channel_cell_invariant() {
        let mut heap = small_heap();
        let chan = heap.allocate_channel(&NoRoots).unwrap();
        let payload = heap.allocate_number(&NoRoots, 42.0).unwrap();

        assert!(heap.channel_is_empty(chan).unwrap());
        assert!(!heap.channel_is_full(chan).unwrap());

        heap.channel_push_item(chan, payload).unwrap();
        assert!(heap.channel_is_full(chan).unwrap());
        // hasItem flag agrees with the item slot.
        assert_eq!(
            Addr(heap.words[chan.0 + 1] as usize),
            heap.singletons().true_obj
        );

        let item = heap.channel_pop_item(chan).unwrap();
        assert_eq!(item, payload);
        assert!(heap.channel_is_empty(chan).unwrap());
        assert_eq!(
            Addr(heap.words[chan.0 + 1] as usize),
            heap.singletons().false_obj
        );
    }

    #[test]
    fn test_extension_chain_indexing() {
        let mut heap = small_heap();
        let array = heap.allocate_array(&NoRoots, 21).unwrap();
        assert_eq!(heap.array_len(array).unwrap(), 21);

        // Every element starts unassigned.
        for i in 0..21 {
            assert!(heap.is_unallocated(heap.array_get(array, i).unwrap()));
        }

        // Write through the chain and read back.
        let mut values = Vec::new();
        for i in 0..21 {
            let v = heap.push_protected_number(array, i as f64);
            heap.array_set(array, i, v).unwrap();
            values.push(v);
        }
        for (i, v) in values.iter().enumerate() {
            assert_eq!(heap.array_get(array, i).unwrap(), *v);
        }

        // Out of range is a fault.
        assert!(matches!(
            heap.array_get(array, 21),
            Err(HeapError::ChildOutOfRange { .. })
        ));
    }

    impl Heap {
        /// Test helper: allocate a number while `protect` stays rooted.
        fn push_protected_number(&mut self, protect: Addr, n: f64) -> Addr {
            self.push_working(protect);
            let addr = self.allocate_number(&NoRoots, n).unwrap();
            self.pop_working(1);
            addr
        }
    }

    #[test]
    fn test_extend_environment_preserves_original() {
        let mut heap = small_heap();
        let base = heap.allocate_environment(&NoRoots, 1).unwrap();
        let f0 = heap.allocate_frame(&NoRoots, 1).unwrap();
        heap.child_set(base, 0, f0).unwrap();

        let f1 = heap.allocate_frame(&NoRoots, 2).unwrap();
        let extended = heap.extend_environment(&NoRoots, base, f1).unwrap();

        assert_eq!(heap.environment_len(base).unwrap(), 1);
        assert_eq!(heap.environment_len(extended).unwrap(), 2);
        assert_eq!(heap.environment_frame(extended, 0).unwrap(), f0);
        assert_eq!(heap.environment_frame(extended, 1).unwrap(), f1);
        assert_eq!(heap.environment_frame(base, 0).unwrap(), f0);
    }

    #[test]
    fn test_collect_frees_unreachable_keeps_reachable() {
        let mut heap = small_heap();
        let keep = heap.allocate_number(&NoRoots, 1.0).unwrap();
        let dead = heap.allocate_number(&NoRoots, 2.0).unwrap();

        heap.collect(&[keep]);

        assert_eq!(heap.tag_of(keep), Tag::Number);
        assert_eq!(heap.number_value(keep).unwrap(), 1.0);
        assert_eq!(heap.tag_of(dead), Tag::Free);
        assert!(heap.on_free_list(dead));
        assert!(!heap.on_free_list(keep));
    }

    #[test]
    fn test_collect_traces_object_graphs() {
        let mut heap = small_heap();
        let env = heap.allocate_environment(&NoRoots, 1).unwrap();
        let frame = heap.allocate_frame(&NoRoots, 1).unwrap();
        heap.child_set(env, 0, frame).unwrap();
        let number = heap.allocate_number(&NoRoots, 7.0).unwrap();
        heap.frame_set(frame, 0, number).unwrap();
        let closure = heap.allocate_closure(&NoRoots, 0, 3, env).unwrap();

        // Only the closure is a root; everything hangs off it.
        heap.collect(&[closure]);

        assert_eq!(heap.tag_of(closure), Tag::Closure);
        assert_eq!(heap.tag_of(env), Tag::Environment);
        assert_eq!(heap.tag_of(frame), Tag::Frame);
        assert_eq!(heap.number_value(number).unwrap(), 7.0);
    }

    #[test]
    fn test_collect_handles_cycles() {
        let mut heap = small_heap();
        // A closure whose captured environment's frame binds the closure
        // itself: the canonical recursion cycle.
        let env = heap.allocate_environment(&NoRoots, 1).unwrap();
        let frame = heap.allocate_frame(&NoRoots, 1).unwrap();
        heap.child_set(env, 0, frame).unwrap();
        let closure = heap.allocate_closure(&NoRoots, 1, 5, env).unwrap();
        heap.frame_set(frame, 0, closure).unwrap();

        heap.collect(&[closure]);
        assert_eq!(heap.tag_of(closure), Tag::Closure);
        assert_eq!(heap.closure_env(closure).unwrap(), env);

        // Unrooted, the whole cycle goes at once.
        heap.collect(&NoRoots);
        assert_eq!(heap.tag_of(closure), Tag::Free);
        assert_eq!(heap.tag_of(env), Tag::Free);
        assert_eq!(heap.tag_of(frame), Tag::Free);
    }

    #[test]
    fn test_collect_drops_string_pool_entries() {
        let mut heap = small_heap();
        let addr = heap.allocate_string(&NoRoots, "ephemeral").unwrap();
        heap.collect(&NoRoots);
        assert_eq!(heap.tag_of(addr), Tag::Free);

        // Re-interning after the sweep allocates a fresh node.
        let again = heap.allocate_string(&NoRoots, "ephemeral").unwrap();
        assert_eq!(heap.string_text(again).unwrap(), "ephemeral");
    }

    #[test]
    fn test_call_frame_pc_not_traced() {
        let mut heap = small_heap();
        let env = heap.allocate_environment(&NoRoots, 0).unwrap();
        // A return pc that happens to equal a node address must not keep
        // that node alive.
        let victim = heap.allocate_number(&NoRoots, 3.0).unwrap();
        let call = heap
            .allocate_call_frame(&NoRoots, env, victim.index())
            .unwrap();

        heap.collect(&[call]);

        assert_eq!(heap.tag_of(victim), Tag::Free);
        assert_eq!(heap.call_frame_return_pc(call).unwrap(), victim.index());
    }

    #[test]
    fn test_working_set_protects_across_collection() {
        let mut heap = small_heap();
        let pending = heap.allocate_number(&NoRoots, 9.0).unwrap();
        heap.push_working(pending);
        heap.collect(&NoRoots);
        assert_eq!(heap.number_value(pending).unwrap(), 9.0);
        heap.pop_working(1);
        heap.collect(&NoRoots);
        assert_eq!(heap.tag_of(pending), Tag::Free);
    }

    #[test]
    fn test_growth_under_pressure() {
        let mut heap = Heap::new(8 * NODE_BYTES).unwrap();
        let before = heap.stats();
        let singleton_addrs = *heap.singletons();

        // Keep everything alive so collection cannot help; the heap must
        // double instead.
        let mut roots: Vec<Addr> = Vec::new();
        for i in 0..64 {
            let addr = heap.allocate_number(&roots, i as f64).unwrap();
            roots.push(addr);
        }

        let after = heap.stats();
        assert!(after.grows > before.grows);
        assert!(after.nodes_total > before.nodes_total);
        for (i, addr) in roots.iter().enumerate() {
            assert_eq!(heap.number_value(*addr).unwrap(), i as f64);
        }
        // Singleton addresses survive every resize.
        assert_eq!(heap.singletons().false_obj, singleton_addrs.false_obj);
        assert_eq!(heap.singletons().unallocated, singleton_addrs.unallocated);
    }

    #[test]
    fn test_churn_reclaims_without_unbounded_growth() {
        let mut heap = Heap::new(8 * NODE_BYTES).unwrap();
        for i in 0..10_000 {
            // No roots: every allocation is garbage by the next one.
            heap.allocate_number(&NoRoots, i as f64).unwrap();
        }
        let stats = heap.stats();
        assert!(stats.collections > 0, "churn must trigger collection");
        assert!(
            stats.nodes_total <= 64,
            "dead numbers must be reclaimed, not grown past: {:?}",
            stats
        );
    }

    #[test]
    fn test_free_list_disjoint_from_reachable() {
        let mut heap = small_heap();
        let mut roots: Vec<Addr> = Vec::new();
        for i in 0..10 {
            let addr = heap.allocate_number(&roots, i as f64).unwrap();
            roots.push(addr);
        }
        // Drop half the roots and collect.
        roots.truncate(5);
        heap.collect(&roots);

        for addr in &roots {
            assert!(!heap.on_free_list(*addr));
        }
    }

    #[test]
    fn test_boxing_roundtrip() {
        let mut heap = small_heap();
        let values = [
            Value::Number(4.25),
            Value::Bool(true),
            Value::Bool(false),
            Value::Str("boxed".into()),
            Value::Null,
            Value::Undefined,
        ];
        for value in values {
            let addr = heap.value_to_addr(&NoRoots, &value).unwrap();
            assert_eq!(heap.addr_to_value(addr).unwrap(), value);
        }

        // Booleans, null, and undefined box to their singletons.
        let t = heap.value_to_addr(&NoRoots, &Value::Bool(true)).unwrap();
        assert_eq!(t, heap.singletons().true_obj);
    }

    #[test]
    fn test_describe() {
        let mut heap = small_heap();
        let n = heap.allocate_number(&NoRoots, 3.0).unwrap();
        assert_eq!(heap.describe(n), "3");

        let chan = heap.allocate_channel(&NoRoots).unwrap();
        assert_eq!(heap.describe(chan), "<channel>");

        let array = heap.allocate_array(&NoRoots, 2).unwrap();
        heap.push_working(array);
        let a = heap.allocate_number(&NoRoots, 1.0).unwrap();
        heap.array_set(array, 0, a).unwrap();
        let b = heap.allocate_string(&NoRoots, "x").unwrap();
        heap.array_set(array, 1, b).unwrap();
        heap.pop_working(1);
        assert_eq!(heap.describe(array), "[1, x]");
    }

    #[test]
    fn test_djb2_reference_values() {
        // Spot checks against the classic DJB2 sequence.
        assert_eq!(djb2(""), 5381);
        assert_eq!(djb2("a"), 5381u32.wrapping_mul(33).wrapping_add(b'a' as u32));
    }
}
