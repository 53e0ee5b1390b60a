//! User page fault resolution.
//!
//! Every user page starts out unmapped. The first touch of a page of a
//! loadable segment reads it from the program's image; the first touch of a
//! heap page maps a zeroed page. Each process keeps at most
//! `max_resident_heap_pages` heap pages mapped. Past that, the oldest one is
//! written to the swap area and read back the next time it faults.

use crate::config::PagerConfig;
use crate::diag::{DiagnosticsSink, PagingEvent};
use crate::error::{ConfigError, PagingError, Termination};
use crate::mem::{PageBuf, PageTable, PtePermissions};
use crate::swapping::page_replacement::{OldestLoaded, PageReplacementPolicy};
use crate::swapping::SwapSpace;
use crate::time::Clock;
use crate::user_program::elf::{Elf, ElfProgramHeader};
use crate::user_program::image::ImageResolver;
use crate::user_program::process::{Pid, Process, ProcessTable};
use crate::user_program::segment_loader::load_segment_page;
use lazypage_shared::eprintln;
use lazypage_shared::mem::{page_round_down, PAGE_FRAME_SIZE};

/// What a faulting page turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Part of a loadable segment of the program image.
    BinarySegment(ElfProgramHeader),
    /// A heap page that has never been mapped. `slot` is `None` when the
    /// page has no tracker slot yet.
    HeapFirstTouch { slot: Option<usize> },
    /// A heap page whose contents are on swap.
    HeapReload { slot: usize },
    Invalid,
}

pub struct Pager<'a, R: PageReplacementPolicy = OldestLoaded> {
    config: PagerConfig,
    swap: &'a SwapSpace,
    images: &'a dyn ImageResolver,
    clock: &'a dyn Clock,
    diagnostics: &'a dyn DiagnosticsSink,
    policy: R,
}

impl<'a> Pager<'a> {
    pub fn new(
        config: PagerConfig,
        swap: &'a SwapSpace,
        images: &'a dyn ImageResolver,
        clock: &'a dyn Clock,
        diagnostics: &'a dyn DiagnosticsSink,
    ) -> Result<Self, ConfigError> {
        Self::with_policy(config, swap, images, clock, diagnostics, OldestLoaded)
    }
}

impl<'a, R: PageReplacementPolicy> Pager<'a, R> {
    pub fn with_policy(
        config: PagerConfig,
        swap: &'a SwapSpace,
        images: &'a dyn ImageResolver,
        clock: &'a dyn Clock,
        diagnostics: &'a dyn DiagnosticsSink,
        policy: R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            swap,
            images,
            clock,
            diagnostics,
            policy,
        })
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    /// Resolves a fault at `fault_addr` in `process`.
    ///
    /// The translation state of the process is flushed before returning,
    /// whether or not the fault was resolved.
    pub fn handle_fault<P: PageTable>(
        &self,
        process: &mut Process<P>,
        fault_addr: u64,
    ) -> Result<FaultKind, PagingError> {
        let addr = page_round_down(fault_addr);
        self.diagnostics.record(&PagingEvent::PageFault {
            process: process.name(),
            addr,
        });

        let result = self
            .classify(process, addr)
            .and_then(|kind| self.resolve(process, addr, kind).map(|()| kind));

        process.page_table_mut().flush();
        result
    }

    /// Works out what the page at `addr` is. Heap pages take precedence
    /// over the program image.
    pub fn classify<P: PageTable>(
        &self,
        process: &Process<P>,
        addr: u64,
    ) -> Result<FaultKind, PagingError> {
        if let Some(slot) = process.heap().find(addr) {
            let entry = process.heap().entry(slot);
            return if entry.is_resident() {
                Err(PagingError::TrackerInconsistent(addr))
            } else if entry.is_swapped() {
                Ok(FaultKind::HeapReload { slot })
            } else {
                Ok(FaultKind::HeapFirstTouch { slot: Some(slot) })
            };
        }

        if process.in_heap(addr) {
            return Ok(FaultKind::HeapFirstTouch { slot: None });
        }

        let image = self
            .images
            .resolve(process.name())
            .ok_or(PagingError::ImageMissing)?;
        let elf = Elf::read(image)?;

        Ok(elf
            .segment_containing(addr)
            .map_or(FaultKind::Invalid, |segment| FaultKind::BinarySegment(*segment)))
    }

    fn resolve<P: PageTable>(
        &self,
        process: &mut Process<P>,
        addr: u64,
        kind: FaultKind,
    ) -> Result<(), PagingError> {
        match kind {
            FaultKind::BinarySegment(segment) => self.load_binary_page(process, &segment, addr),
            FaultKind::HeapFirstTouch { slot } => {
                let slot = match slot {
                    Some(slot) => slot,
                    None => process.heap_mut().register(addr)?,
                };
                self.load_heap_page(process, slot, addr)
            }
            FaultKind::HeapReload { slot } => self.load_heap_page(process, slot, addr),
            FaultKind::Invalid => Err(PagingError::SegmentNotFound(addr)),
        }
    }

    fn load_binary_page<P: PageTable>(
        &self,
        process: &mut Process<P>,
        segment: &ElfProgramHeader,
        addr: u64,
    ) -> Result<(), PagingError> {
        let image = self
            .images
            .resolve(process.name())
            .ok_or(PagingError::ImageMissing)?;
        let load = load_segment_page(process.page_table_mut(), image, segment, addr)?;

        self.diagnostics.record(&PagingEvent::SegmentLoad {
            addr,
            file_offset: load.file_offset,
            size: PAGE_FRAME_SIZE,
        });
        Ok(())
    }

    fn load_heap_page<P: PageTable>(
        &self,
        process: &mut Process<P>,
        slot: usize,
        addr: u64,
    ) -> Result<(), PagingError> {
        if process.resident_heap_pages() >= self.config.max_resident_heap_pages {
            self.evict(process)?;
        }

        process
            .page_table_mut()
            .map_range(addr, addr + PAGE_FRAME_SIZE as u64, PtePermissions::user_read_write())
            .map_err(|err| PagingError::from_page_table(err, addr))?;

        if process.heap().entry(slot).is_swapped() {
            if let Err(err) = self.retrieve(process, addr) {
                process
                    .page_table_mut()
                    .unmap_range(addr, 1, true)
                    .map_err(|err| PagingError::from_page_table(err, addr))?;
                return Err(err);
            }
        }

        process.heap_mut().mark_resident(slot, self.clock.now())
    }

    /// Writes the resident heap page chosen by the replacement policy out to
    /// swap and unmaps it. Returns the address of the evicted page.
    pub fn evict<P: PageTable>(&self, process: &mut Process<P>) -> Result<u64, PagingError> {
        let inconsistent = PagingError::TrackerInconsistent(process.heap_start());
        let slot = self
            .policy
            .select_victim(process.heap().entries())
            .ok_or(inconsistent)?;
        let victim = process.heap().entry(slot).address().ok_or(inconsistent)?;

        let mut page = PageBuf::new_zeroed();
        process
            .page_table()
            .copy_in(&mut page.0, victim)
            .map_err(|err| PagingError::from_page_table(err, victim))?;
        let backing = self.swap.swap_out(&page)?;

        if let Err(err) = process.page_table_mut().unmap_range(victim, 1, true) {
            self.swap.release(backing)?;
            return Err(PagingError::from_page_table(err, victim));
        }
        process.heap_mut().mark_evicted(slot, backing)?;

        self.diagnostics.record(&PagingEvent::Evict {
            addr: victim,
            psa_block: backing.psa_block(),
        });
        Ok(victim)
    }

    /// Reads the swapped heap page at `addr` into its freshly mapped page
    /// and gives its swap group back.
    pub fn retrieve<P: PageTable>(
        &self,
        process: &mut Process<P>,
        addr: u64,
    ) -> Result<(), PagingError> {
        let slot = process
            .heap()
            .find_swapped(addr)
            .ok_or(PagingError::TrackerInconsistent(addr))?;
        let backing = process
            .heap()
            .entry(slot)
            .backing()
            .ok_or(PagingError::TrackerInconsistent(addr))?;

        self.diagnostics.record(&PagingEvent::Retrieve {
            addr,
            psa_block: backing.psa_block(),
        });

        let mut page = PageBuf::new_zeroed();
        self.swap.read_page(backing, &mut page)?;
        process
            .page_table_mut()
            .copy_out(addr, &page.0)
            .map_err(|err| PagingError::from_page_table(err, addr))?;

        self.swap.release(backing)?;
        process.heap_mut().clear_backing(slot);
        Ok(())
    }
}

/// Trap-handler entry point: resolves a fault of process `pid`, or reports
/// what has to happen instead.
pub fn handle_page_fault<P: PageTable, R: PageReplacementPolicy>(
    pager: &Pager<'_, R>,
    table: &mut ProcessTable<P>,
    pid: Pid,
    fault_addr: u64,
) -> Result<(), Termination> {
    table
        .get_mut(pid)
        .ok_or(PagingError::UnknownProcess(pid))
        .and_then(|process| pager.handle_fault(process, fault_addr))
        .map(|_| ())
        .map_err(|err| {
            eprintln!("page fault at {fault_addr:#x} in pid {pid}: {err}");
            err.termination()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::test::RecordingSink;
    use crate::mem::SimulatedPageTable;
    use crate::swapping::test::swap_space;
    use crate::time::TickClock;
    use crate::user_program::elf::test::build_elf64;
    use crate::user_program::elf::{ElfError, PF_R, PF_X};
    use crate::user_program::image::ImageStore;
    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;

    const HEAP: u64 = 0x10000;
    const A: u64 = HEAP;
    const B: u64 = HEAP + 0x1000;
    const C: u64 = HEAP + 0x2000;

    fn byte_at(offset: usize) -> u8 {
        (offset % 251) as u8
    }

    struct Harness {
        swap: SwapSpace,
        images: ImageStore,
        clock: TickClock,
        sink: RecordingSink,
    }

    impl Harness {
        fn new(swap_groups: u32) -> Self {
            let mut images = ImageStore::new();
            images.insert(
                "init",
                build_elf64(&[(PF_R | PF_X, 0x78, 0x1000, 0x1f88, 0x2000)], 0x2000, byte_at),
            );
            Self {
                swap: swap_space(swap_groups),
                images,
                clock: TickClock::new(),
                sink: RecordingSink::default(),
            }
        }

        fn pager(&self, max_resident_heap_pages: usize) -> Pager<'_> {
            let config = PagerConfig {
                max_heap_pages: 16,
                max_resident_heap_pages,
                ..PagerConfig::DEFAULT
            };
            Pager::new(config, &self.swap, &self.images, &self.clock, &self.sink).unwrap()
        }
    }

    fn process(name: &str, frames: usize, heap_pages: usize) -> Process {
        let config = PagerConfig {
            max_heap_pages: 16,
            ..PagerConfig::DEFAULT
        };
        let mut process = Process::new(1, name, SimulatedPageTable::new(frames), HEAP, &config);
        process.grow_heap(heap_pages).unwrap();
        process
    }

    fn read_byte(process: &Process, addr: u64) -> u8 {
        let mut byte = [0];
        process.page_table().copy_in(&mut byte, addr).unwrap();
        byte[0]
    }

    fn check_invariants(process: &Process, swap: &SwapSpace, max_resident: usize) {
        let used: Vec<_> = process
            .heap()
            .entries()
            .iter()
            .filter(|e| e.address().is_some())
            .collect();

        let resident = used.iter().filter(|e| e.is_resident()).count();
        assert_eq!(process.resident_heap_pages(), resident);
        assert!(resident <= max_resident);

        let mut addresses: Vec<_> = used.iter().filter_map(|e| e.address()).collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), used.len());

        let mut backings = Vec::new();
        for entry in &used {
            let addr = entry.address().unwrap();
            assert_eq!(process.page_table().is_mapped(addr), entry.is_resident());
            assert!(!(entry.is_resident() && entry.is_swapped()));
            if let Some(slot) = entry.backing() {
                assert!(swap.is_allocated(slot));
                backings.push(slot);
            }
        }
        let held = backings.len();
        backings.sort();
        backings.dedup();
        assert_eq!(backings.len(), held);
        assert_eq!(swap.free_groups(), swap.groups() - held);
    }

    #[test]
    fn binary_fault_loads_one_page() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 0);

        let kind = pager.handle_fault(&mut p, 0x1234).unwrap();
        assert!(matches!(kind, FaultKind::BinarySegment(segment) if segment.offset == 0x78));
        assert_eq!(p.page_table().mapped_pages(), 1);
        assert_eq!(read_byte(&p, 0x1000), byte_at(0x78));
        assert_eq!(p.page_table().flush_count(), 1);
        assert_eq!(
            h.sink.lines(),
            [
                "#PF: Proc name (init), Page fault at address (0x1000)",
                "Loading segment at 0x1000 from file offset 0x78 (4096 bytes)",
            ]
        );
    }

    #[test]
    fn second_segment_page_reads_further_into_the_file() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 0);

        pager.handle_fault(&mut p, 0x2010).unwrap();
        assert!(!p.page_table().is_mapped(0x1000));
        assert_eq!(read_byte(&p, 0x2000), byte_at(0x1078));
        assert_eq!(
            h.sink.count_starting_with("Loading segment at 0x2000 from file offset 0x1078"),
            1
        );
    }

    #[test]
    fn unmapped_address_kills_the_process() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 1);

        let err = pager.handle_fault(&mut p, 0x9000).unwrap_err();
        assert_eq!(err, PagingError::SegmentNotFound(0x9000));
        assert_eq!(err.termination(), Termination::KillProcess);
        // Flushed on the error path too.
        assert_eq!(p.page_table().flush_count(), 1);
    }

    #[test]
    fn write_to_text_page_is_an_access_violation() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 0);

        pager.handle_fault(&mut p, 0x1000).unwrap();
        assert_eq!(
            pager.handle_fault(&mut p, 0x1008),
            Err(PagingError::AccessViolation(0x1000))
        );
    }

    #[test]
    fn image_problems() {
        let mut h = Harness::new(1);
        h.images.insert("garbage", vec![0; 64]);
        let pager = h.pager(2);

        let mut ghost = process("ghost", 4, 0);
        assert_eq!(pager.handle_fault(&mut ghost, 0x1000), Err(PagingError::ImageMissing));

        let mut garbage = process("garbage", 4, 0);
        assert_eq!(
            pager.handle_fault(&mut garbage, 0x1000),
            Err(PagingError::ImageCorrupt(ElfError::InvalidMagicNumber))
        );
    }

    #[test]
    fn first_touch_maps_a_zeroed_page() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 2);

        assert_eq!(
            pager.handle_fault(&mut p, B + 0x10),
            Ok(FaultKind::HeapFirstTouch { slot: Some(1) })
        );
        assert_eq!(read_byte(&p, B + 0x10), 0);

        let perms = p.page_table().translate(B).unwrap();
        assert!(perms.readable() && perms.writable() && perms.user());
        assert!(!perms.executable());
        assert_eq!(p.resident_heap_pages(), 1);
    }

    #[test]
    fn fault_on_resident_heap_page_halts() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 4, 1);

        pager.handle_fault(&mut p, A).unwrap();
        let err = pager.handle_fault(&mut p, A).unwrap_err();
        assert_eq!(err, PagingError::TrackerInconsistent(A));
        assert_eq!(err.termination(), Termination::HaltKernel);
    }

    #[test]
    fn oldest_page_is_swapped_out_and_back_in() {
        let h = Harness::new(4);
        let pager = h.pager(2);
        let mut p = process("init", 4, 3);

        for (addr, tag) in [(A, b"page A"), (B, b"page B"), (C, b"page C")] {
            pager.handle_fault(&mut p, addr).unwrap();
            p.page_table_mut().copy_out(addr, tag).unwrap();
            h.clock.tick();
        }

        assert!(!p.page_table().is_mapped(A));
        assert!(p.heap().entry(0).is_swapped());
        assert_eq!(p.resident_heap_pages(), 2);
        assert_eq!(h.sink.count_starting_with("Evicting heap page 0x10000 to PSA block 0"), 1);

        assert_eq!(pager.handle_fault(&mut p, A + 0x10), Ok(FaultKind::HeapReload { slot: 0 }));
        assert_eq!(h.sink.count_starting_with("Evicting heap page 0x11000 to PSA block 4"), 1);
        assert_eq!(h.sink.count_starting_with("Retrieving heap page 0x10000 from PSA block 0"), 1);

        let mut tag = [0u8; 6];
        p.page_table().copy_in(&mut tag, A).unwrap();
        assert_eq!(&tag, b"page A");
        assert!(!p.page_table().is_mapped(B));
        assert!(p.page_table().is_mapped(C));
        assert!(!p.heap().entry(0).is_swapped());
        assert_eq!(h.swap.free_groups(), 3);
        check_invariants(&p, &h.swap, 2);
    }

    #[test]
    fn swapped_page_is_byte_identical() {
        let h = Harness::new(2);
        let pager = h.pager(1);
        let mut p = process("init", 1, 2);

        let contents: Vec<u8> = (0..PAGE_FRAME_SIZE).map(|i| (i * 7 + i / 1024) as u8).collect();
        pager.handle_fault(&mut p, A).unwrap();
        p.page_table_mut().copy_out(A, &contents).unwrap();

        pager.handle_fault(&mut p, B).unwrap();
        pager.handle_fault(&mut p, A).unwrap();

        let mut back = vec![0u8; PAGE_FRAME_SIZE];
        p.page_table().copy_in(&mut back, A).unwrap();
        assert!(back == contents);
    }

    #[test]
    fn pages_loaded_on_the_same_tick_leave_in_slot_order() {
        let h = Harness::new(4);
        let pager = h.pager(2);
        let mut p = process("init", 4, 3);

        pager.handle_fault(&mut p, B).unwrap();
        pager.handle_fault(&mut p, A).unwrap();
        assert_eq!(pager.evict(&mut p), Ok(A));
    }

    #[test]
    fn retrieving_twice_fails() {
        let h = Harness::new(2);
        let pager = h.pager(1);
        let mut p = process("init", 2, 2);

        pager.handle_fault(&mut p, A).unwrap();
        pager.handle_fault(&mut p, B).unwrap();
        pager.handle_fault(&mut p, A).unwrap();
        assert_eq!(
            pager.retrieve(&mut p, A),
            Err(PagingError::TrackerInconsistent(A))
        );
    }

    #[test]
    fn swap_exhaustion_leaves_the_victim_resident() {
        let h = Harness::new(1);
        let pager = h.pager(1);
        let mut p = process("init", 4, 3);

        pager.handle_fault(&mut p, A).unwrap();
        pager.handle_fault(&mut p, B).unwrap();
        let err = pager.handle_fault(&mut p, C).unwrap_err();
        assert_eq!(err, PagingError::SwapExhausted);
        assert_eq!(err.termination(), Termination::KillProcess);

        assert!(p.page_table().is_mapped(B));
        assert!(!p.page_table().is_mapped(C));
        assert!(p.heap().entry(0).is_swapped());
        check_invariants(&p, &h.swap, 1);
    }

    #[test]
    fn out_of_frames() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut p = process("init", 1, 1);

        pager.handle_fault(&mut p, 0x1000).unwrap();
        assert_eq!(
            pager.handle_fault(&mut p, A),
            Err(PagingError::AllocationExhausted(A))
        );
        assert!(!p.heap().entry(0).is_resident());
        assert_eq!(p.resident_heap_pages(), 0);
    }

    #[test]
    fn bookkeeping_holds_across_many_faults() {
        let h = Harness::new(8);
        let pager = h.pager(3);
        let mut p = process("init", 3, 8);
        let mut expected = [0u8; 8];

        let touches = [0, 1, 2, 3, 0, 4, 5, 1, 6, 7, 2, 0, 3, 3, 7, 5, 1];
        for (step, &page) in touches.iter().enumerate() {
            let addr = HEAP + 0x1000 * page as u64;
            if !p.page_table().is_mapped(addr) {
                pager.handle_fault(&mut p, addr).unwrap();
            }
            assert_eq!(read_byte(&p, addr), expected[page]);

            expected[page] = step as u8 + 1;
            p.page_table_mut().copy_out(addr, &[expected[page]]).unwrap();
            h.clock.tick();
            check_invariants(&p, &h.swap, 3);
        }
    }

    #[test]
    fn trap_entry_reports_termination() {
        let h = Harness::new(1);
        let pager = h.pager(2);
        let mut table = ProcessTable::new();
        table.add(Box::new(process("init", 4, 1)));

        assert_eq!(handle_page_fault(&pager, &mut table, 1, 0x1000), Ok(()));
        assert_eq!(
            handle_page_fault(&pager, &mut table, 1, 0x9000),
            Err(Termination::KillProcess)
        );
        assert_eq!(
            handle_page_fault(&pager, &mut table, 2, 0x1000),
            Err(Termination::HaltKernel)
        );
    }

    #[test]
    fn teardown_after_swapping() {
        let h = Harness::new(2);
        let pager = h.pager(1);
        let mut p = process("init", 2, 3);

        for addr in [A, B, C] {
            pager.handle_fault(&mut p, addr).unwrap();
        }
        assert_eq!(h.swap.free_groups(), 0);

        p.release_swap(&h.swap).unwrap();
        assert_eq!(h.swap.free_groups(), 2);
        assert_eq!(p.page_table().free_frames(), 2);
    }
}
