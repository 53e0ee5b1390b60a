use crate::config::PagerConfig;
use crate::error::PagingError;
use crate::mem::{PageTable, SimulatedPageTable};
use crate::swapping::SwapSpace;
use crate::user_program::heap::HeapTracker;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use lazypage_shared::mem::{page_round_up, PAGE_FRAME_SIZE};

pub type Pid = u16;

/// The paging view of a process: its address space, its heap pages and the
/// name its executable image is stored under.
pub struct Process<P: PageTable = SimulatedPageTable> {
    pub pid: Pid,
    name: String,
    page_table: P,
    heap: HeapTracker,
    heap_start: u64,
    heap_end: u64,
}

impl<P: PageTable> Process<P> {
    /// The heap starts empty at the first page boundary at or after
    /// `heap_start`.
    pub fn new(pid: Pid, name: &str, page_table: P, heap_start: u64, config: &PagerConfig) -> Self {
        let heap_start = page_round_up(heap_start);
        Self {
            pid,
            name: String::from(name),
            page_table,
            heap: HeapTracker::new(config.max_heap_pages),
            heap_start,
            heap_end: heap_start,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_table(&self) -> &P {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut P {
        &mut self.page_table
    }

    pub fn heap(&self) -> &HeapTracker {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut HeapTracker {
        &mut self.heap
    }

    pub fn resident_heap_pages(&self) -> usize {
        self.heap.resident_pages()
    }

    pub fn heap_start(&self) -> u64 {
        self.heap_start
    }

    pub fn heap_end(&self) -> u64 {
        self.heap_end
    }

    pub fn in_heap(&self, addr: u64) -> bool {
        (self.heap_start..self.heap_end).contains(&addr)
    }

    /// Extends the heap by `pages` pages and returns the old end. The new
    /// pages are only registered; nothing is mapped until they fault.
    pub fn grow_heap(&mut self, pages: usize) -> Result<u64, PagingError> {
        let available = self.heap.free_slots();
        if pages > available {
            return Err(PagingError::HeapLimit {
                requested: pages,
                available,
            });
        }

        let old_end = self.heap_end;
        for _ in 0..pages {
            self.heap.register(self.heap_end)?;
            self.heap_end += PAGE_FRAME_SIZE as u64;
        }
        Ok(old_end)
    }

    /// Drops every heap page: resident ones are unmapped and swapped ones
    /// give their group back to `swap`.
    ///
    /// A failure on one page does not stop the others from being released;
    /// the first error is returned once the whole heap is gone.
    pub fn release_swap(&mut self, swap: &SwapSpace) -> Result<(), PagingError> {
        let mut first_err = None;
        for entry in self.heap.drain() {
            let Some(addr) = entry.address() else {
                continue;
            };
            if entry.is_resident() {
                if let Err(err) = self.page_table.unmap_range(addr, 1, true) {
                    first_err.get_or_insert(PagingError::from_page_table(err, addr));
                }
            }
            if let Some(slot) = entry.backing() {
                if let Err(err) = swap.release(slot) {
                    first_err.get_or_insert(err);
                }
            }
        }
        self.page_table.flush();
        self.heap_end = self.heap_start;
        first_err.map_or(Ok(()), Err)
    }
}

pub struct ProcessTable<P: PageTable = SimulatedPageTable> {
    table: BTreeMap<Pid, Box<Process<P>>>,
}

impl<P: PageTable> ProcessTable<P> {
    pub fn new() -> Self {
        ProcessTable {
            table: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, process: Box<Process<P>>) {
        assert!(
            !self.table.contains_key(&process.pid),
            "process with pid {} already added to process table.",
            process.pid
        );
        self.table.insert(process.pid, process);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Box<Process<P>>> {
        self.table.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process<P>> {
        self.table.get(&pid).map(|process| &**process)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process<P>> {
        self.table.get_mut(&pid).map(|process| &mut **process)
    }
}

impl<P: PageTable> Default for ProcessTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
