use alloc::boxed::Box;
use alloc::vec::Vec;
use bitbybit::bitfield;
use lazypage_shared::mem::PAGE_FRAME_SIZE;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// One page of memory: a physical frame, or a staging buffer for swap I/O.
#[derive(FromZeroes, FromBytes, AsBytes)]
#[repr(C, align(4096))]
pub struct PageBuf(pub [u8; PAGE_FRAME_SIZE]);

impl PageBuf {
    /// A zeroed page allocated directly on the heap.
    pub fn new_zeroed() -> Box<Self> {
        Self::new_box_zeroed()
    }
}

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
}

/// A fixed number of page frames handed out one at a time.
///
/// Frames are searched next-fit from the last allocation, and their memory is
/// only created on first use.
pub struct FramePool {
    core_map: Box<[CoreMapEntry]>,
    memory: Vec<Box<PageBuf>>,
    position: usize,
    frames_allocated: usize,
}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        Self {
            core_map: alloc::vec![CoreMapEntry::DEFAULT; frames].into_boxed_slice(),
            memory: Vec::new(),
            position: 0,
            frames_allocated: 0,
        }
    }

    /// Allocates one zeroed frame and returns its number, or `None` if every
    /// frame is in use.
    pub fn alloc(&mut self) -> Option<usize> {
        let total_frames = self.core_map.len();
        if self.frames_allocated == total_frames {
            return None;
        }

        let frame = (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&i| !self.core_map[i].allocated())?;

        while self.memory.len() <= frame {
            self.memory.push(PageBuf::new_zeroed());
        }
        self.memory[frame].0.fill(0);

        self.core_map[frame] = self.core_map[frame].with_allocated(true);
        self.position = (frame + 1) % total_frames;
        self.frames_allocated += 1;
        Some(frame)
    }

    pub fn dealloc(&mut self, frame: usize) {
        assert!(
            self.core_map[frame].allocated(),
            "double free of frame {frame}"
        );
        self.core_map[frame] = self.core_map[frame].with_allocated(false);
        self.frames_allocated -= 1;
    }

    pub fn frame(&self, frame: usize) -> &PageBuf {
        debug_assert!(self.core_map[frame].allocated());
        &self.memory[frame]
    }

    pub fn frame_mut(&mut self, frame: usize) -> &mut PageBuf {
        debug_assert!(self.core_map[frame].allocated());
        &mut self.memory[frame]
    }

    pub fn free_frames(&self) -> usize {
        self.core_map.len() - self.frames_allocated
    }
}
