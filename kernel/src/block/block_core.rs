use super::block_error::BlockError;
use alloc::{boxed::Box, string::String};
use core::fmt;
use lazypage_shared::sizes::BLOCK_SIZE;

/// Size of a block device sector in bytes.
///
/// Four sectors make up one virtual page.
pub const BLOCK_SECTOR_SIZE: usize = BLOCK_SIZE;

/// Index of a block device sector.
pub type BlockSector = u32;

/// Types of blocks
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum BlockType {
    /// File system
    FileSystem,
    /// Swap
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
    /// Owned by another operating system, never written
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
            BlockType::Foreign => write!(f, "Foreign"),
        }
    }
}

/// Lower-level interface to block device drivers
pub trait BlockOp {
    /// Read a block sector
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Write a block sector
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// One sector's worth of data, tagged with the sector it belongs to.
///
/// Obtained from [`Block::bread`] and handed back with [`Block::bwrite`];
/// dropping it releases the buffer.
pub struct BlockBuf {
    sector: BlockSector,
    data: [u8; BLOCK_SECTOR_SIZE],
}

impl BlockBuf {
    /// A zeroed buffer for `sector`, for callers that overwrite the whole sector.
    pub fn new(sector: BlockSector) -> Self {
        Self {
            sector,
            data: [0; BLOCK_SECTOR_SIZE],
        }
    }

    pub fn sector(&self) -> BlockSector {
        self.sector
    }

    pub fn data(&self) -> &[u8; BLOCK_SECTOR_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SECTOR_SIZE] {
        &mut self.data
    }
}

/// A block device
pub struct Block {
    /// Tha name of the block device
    block_name: String,

    /// The type of block
    block_type: BlockType,
    /// The block driver
    driver: Box<dyn BlockOp + Send>,

    /// The size of the block device in sectors
    block_size: BlockSector,

    /// The read count
    read_count: u32,
    /// The write count
    write_count: u32,
}

impl Block {
    pub fn new(
        block_type: BlockType,
        block_name: &str,
        block_size: BlockSector,
        driver: Box<dyn BlockOp + Send>,
    ) -> Self {
        Self {
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Verifies that `buf` is a valid buffer for reading or writing a block sector.
    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        Ok(())
    }

    /// Verifies that `sector` is a valid offset within the block device.
    fn check_sector(&self, sector: BlockSector) -> Result<(), BlockError> {
        if sector >= self.block_size {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(())
    }

    /// Reads sector `sector` from the block device into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        self.driver.read(sector, buf)?;
        self.read_count += 1;
        Ok(())
    }

    /// Writes sector `sector` from `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes. Returns
    /// after the block device has acknowledged receiving the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check_sector(sector)?;
        Self::verify_buffer(buf)?;

        if self.block_type == BlockType::Foreign {
            return Err(BlockError::WriteError);
        }

        self.driver.write(sector, buf)?;
        self.write_count += 1;
        Ok(())
    }

    /// Reads `sector` into a fresh buffer.
    pub fn bread(&mut self, sector: BlockSector) -> Result<BlockBuf, BlockError> {
        let mut buf = BlockBuf::new(sector);
        self.read(sector, &mut buf.data)?;
        Ok(buf)
    }

    /// Writes `buf` back to the sector it was read from.
    pub fn bwrite(&mut self, buf: &BlockBuf) -> Result<(), BlockError> {
        self.write(buf.sector, &buf.data)
    }

    // Block getters -----------------------------------------------------------

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
    pub fn read_count(&self) -> u32 {
        self.read_count
    }
    pub fn write_count(&self) -> u32 {
        self.write_count
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.block_name, self.block_type, self.block_size, self.read_count, self.write_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RamDisk;

    fn disk(sectors: BlockSector, block_type: BlockType) -> Block {
        Block::new(block_type, "test", sectors, Box::new(RamDisk::new(sectors)))
    }

    #[test]
    fn read_back_written_sector() {
        let mut block = disk(8, BlockType::Raw);
        let mut buf = BlockBuf::new(3);
        buf.data_mut()[..5].copy_from_slice(b"hello");
        block.bwrite(&buf).unwrap();

        let read = block.bread(3).unwrap();
        assert_eq!(&read.data()[..5], b"hello");
        assert_eq!(block.read_count(), 1);
        assert_eq!(block.write_count(), 1);
    }

    #[test]
    fn rejects_out_of_range_sector() {
        let mut block = disk(4, BlockType::Raw);
        assert_eq!(block.bread(4).err(), Some(BlockError::SectorOutOfBounds));
        assert_eq!(block.read_count(), 0);
    }

    #[test]
    fn rejects_short_buffer() {
        let mut block = disk(4, BlockType::Raw);
        let mut short = [0u8; 16];
        assert_eq!(block.read(0, &mut short), Err(BlockError::BufferInvalid));
    }

    #[test]
    fn foreign_blocks_are_read_only() {
        let mut block = disk(4, BlockType::Foreign);
        assert_eq!(block.bwrite(&BlockBuf::new(0)), Err(BlockError::WriteError));
        assert!(block.bread(0).is_ok());
    }
}
