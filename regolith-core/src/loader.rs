//! ELF image ingest.
//!
//! Parsing is separated from loading so the board can be sized around the image first (the
//! `.tohost` section decides where the host-interface windows go): parse, build a board with
//! [`crate::board::Config::for_image`], then load.

use goblin::elf::header::ET_EXEC;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::debug;
use thiserror::Error;

use crate::bus::Bus;
use crate::hart::{AccessError, AccessType, Address, Hart};
use crate::Allocator;

/// A parsed executable: the loadable segments plus the symbols the host interface needs.
#[derive(Debug, Clone)]
pub struct Image {
    entry: u64,
    tohost: Option<u64>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
struct Segment {
    vaddr: u64,
    data: Vec<u8>,
}

impl Image {
    /// Parse an ELF executable.
    ///
    /// Only segments with a non-zero file size are collected. The `.tohost` section, if present,
    /// provides the address of the host-communication cells.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < 4 {
            return Err(LoadError::Truncated);
        }
        let elf = Elf::parse(bytes).map_err(LoadError::Parse)?;
        if elf.header.e_type != ET_EXEC {
            return Err(LoadError::NotExecutable);
        }

        let mut segments = Vec::new();
        for header in elf
            .program_headers
            .iter()
            .filter(|header| header.p_type == PT_LOAD && header.p_filesz > 0)
        {
            let data = bytes
                .get(header.file_range())
                .ok_or(LoadError::Truncated)?
                .to_vec();
            debug!(
                "image segment of {} bytes at {:#x}",
                data.len(),
                header.p_vaddr
            );
            segments.push(Segment {
                vaddr: header.p_vaddr,
                data,
            });
        }

        let mut tohost = None;
        for section in &elf.section_headers {
            if elf.shdr_strtab.get_at(section.sh_name) == Some(".tohost") {
                tohost = Some(section.sh_addr);
            }
        }

        Ok(Self {
            entry: elf.entry,
            tohost,
            segments,
        })
    }

    /// The executable's entry point.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// The address of the `.tohost` section, if the image defines one.
    pub fn tohost(&self) -> Option<u64> {
        self.tohost
    }

    /// Write every segment into memory at its virtual address, through the hart's debug path so
    /// no device side effects fire.
    pub fn load_into<A: Allocator, B: Bus<A>>(
        &self,
        allocator: &mut A,
        hart: &Hart<A, B>,
    ) -> Result<(), AccessError> {
        for segment in &self.segments {
            hart.write(
                allocator,
                Address::mem(segment.vaddr, AccessType::write().debug().physical()),
                &segment.data,
            )?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("input file has insufficient size")]
    Truncated,
    #[error("could not process elf file: {0}")]
    Parse(goblin::error::Error),
    #[error("wrong elf type in file")]
    NotExecutable,
}
