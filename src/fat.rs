//! Block-chain plumbing: the big-block reader and the FAT, XBAT and
//! mini-FAT walkers.
//!
//! All block indices are signed; the format's sentinels (-1 end of
//! chain, -2 free, -3 FAT, -4 DIF) terminate traversal and are never an
//! error on their own. Every loop here is bounded by a budget derived
//! from the source length so crafted chains cannot spin forever.

use crate::{constants, endian::read_i32, error::Error, Ole2Extractor, Readable, Result};

impl<R: Readable> Ole2Extractor<R> {
    /// Chain-walk budget: a well-formed chain cannot have more links
    /// than the source has blocks.
    pub(crate) fn chain_budget(&self, block_size: usize) -> u64 {
        self.source.len() / block_size as u64 + 3
    }

    /// Read big block `block` in full.
    pub(crate) async fn read_big_block(&mut self, block: i32) -> Result<Vec<u8>> {
        if block < 0 {
            return Err(Error::BrokenChain(block));
        }
        let mut buf = vec![0u8; self.header.big_block_size()];
        self.source
            .read_at(self.header.big_block_offset(block), &mut buf)
            .await?;
        Ok(buf)
    }

    /// Resolve the successor of `current` in the big-FAT.
    ///
    /// The FAT sector holding the entry is one of the 109 direct
    /// pointers in the header, or is found through the XBAT chain for
    /// indices beyond that.
    pub(crate) async fn next_big(&mut self, current: i32) -> Result<i32> {
        if current < 0 {
            return Err(Error::BrokenChain(current));
        }

        let per = self.header.entries_per_block();
        let fat_sector_index = current / per;
        if fat_sector_index >= self.header.bat_count {
            return Err(Error::FatIndexOutOfRange {
                index: fat_sector_index,
                count: self.header.bat_count,
            });
        }

        let fat_sector = if (fat_sector_index as usize) < constants::BAT_ARRAY_LENGTH {
            self.header.bat_array[fat_sector_index as usize]
        } else {
            self.xbat_fat_sector(fat_sector_index).await?
        };

        let block = self.read_big_block(fat_sector).await?;
        Ok(read_i32(&block, (current % per) as usize * 4))
    }

    /// Locate a FAT sector through the XBAT (DIF) chain. Each XBAT block
    /// holds `entries_per_block - 1` FAT sector pointers; the last entry
    /// links to the next XBAT block.
    async fn xbat_fat_sector(&mut self, fat_sector_index: i32) -> Result<i32> {
        let per = self.header.entries_per_block();
        let stride = per - 1;

        let relative = fat_sector_index - constants::BAT_ARRAY_LENGTH as i32;
        let mut links = relative / stride;
        let slot = relative % stride;

        let budget = self.chain_budget(self.header.big_block_size());
        let mut steps = 0u64;
        let mut current = self.header.xbat_start;
        while links > 0 {
            steps += 1;
            if steps > budget {
                return Err(Error::ChainCycle(budget));
            }
            let block = self.read_big_block(current).await?;
            current = read_i32(&block, stride as usize * 4);
            links -= 1;
        }

        let block = self.read_big_block(current).await?;
        Ok(read_i32(&block, slot as usize * 4))
    }

    /// Resolve the successor of `current` in the mini-FAT. The mini-FAT
    /// is itself a big-FAT-backed stream headed at `sbat_start`.
    pub(crate) async fn next_small(&mut self, current: i32) -> Result<i32> {
        if current < 0 {
            return Err(Error::BrokenChain(current));
        }

        let per = self.header.entries_per_block();
        let mut links = current / per;

        let budget = self.chain_budget(self.header.big_block_size());
        let mut steps = 0u64;
        let mut sbat_block = self.header.sbat_start;
        while links > 0 {
            steps += 1;
            if steps > budget {
                return Err(Error::ChainCycle(budget));
            }
            sbat_block = self.next_big(sbat_block).await?;
            links -= 1;
        }

        let block = self.read_big_block(sbat_block).await?;
        Ok(read_i32(&block, (current % per) as usize * 4))
    }

    /// Fetch the big block of the mini-stream holding small block
    /// `index`. The caller slices the small block out of it.
    pub(crate) async fn sbat_data_block(&mut self, index: i32) -> Result<Vec<u8>> {
        if self.sbat_root_start < 0 {
            return Err(Error::NoMiniRoot);
        }
        if index < 0 {
            return Err(Error::BrokenChain(index));
        }

        let mut links = index / self.header.small_per_big();

        let budget = self.chain_budget(self.header.big_block_size());
        let mut steps = 0u64;
        let mut current = self.sbat_root_start;
        while links > 0 {
            steps += 1;
            if steps > budget {
                return Err(Error::ChainCycle(budget));
            }
            current = self.next_big(current).await?;
            links -= 1;
        }

        self.read_big_block(current).await
    }
}
