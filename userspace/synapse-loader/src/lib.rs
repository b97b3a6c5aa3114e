// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: ELF32/i386 executable loader
//! OWNERS: @runtime
//! PUBLIC API: parse_elf32_i386(), load_with(), exec(), Mapper, ImageMemory
//! DEPENDS_ON: goblin (header/program-header parsing), synapse_abi::Rights
//! INVARIANTS: Section headers are never read; only PT_LOAD is mapped; bytes past
//!             filesz are zero up to memsz; control transfers only after every
//!             segment mapped

use std::collections::BTreeMap;

use bitflags::bitflags;
use goblin::container::{Container, Ctx, Endian};
use goblin::elf::header::{self, header32};
use goblin::elf::program_header::{self, program_header32, ProgramHeader, PT_LOAD};
use goblin::elf::Elf;
use synapse_abi::Rights;
use thiserror::Error;

/// Page size of the target.
pub const PAGE_SIZE: u32 = 4096;

bitflags! {
    /// Memory protection bits for a mapped segment.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Prot: u32 {
        const R = 0x1;
        const W = 0x2;
        const X = 0x4;
    }
}

impl Prot {
    fn from_flags(flags: u32) -> Self {
        let mut prot = Prot::empty();
        if flags & program_header::PF_R != 0 {
            prot |= Prot::R;
        }
        if flags & program_header::PF_W != 0 {
            prot |= Prot::W;
        }
        if flags & program_header::PF_X != 0 {
            prot |= Prot::X;
        }
        prot
    }

    /// Page rights the kernel ledger records for this protection.
    pub fn rights(self) -> Rights {
        let mut rights = Rights::empty();
        rights.set(Rights::READABLE, self.contains(Prot::R));
        rights.set(Rights::WRITABLE, self.contains(Prot::W));
        rights.set(Rights::EXECUTABLE, self.contains(Prot::X));
        rights
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 32-bit ELF")]
    WrongClass,
    #[error("not little endian")]
    WrongByteOrder,
    #[error("unsupported ELF version")]
    WrongVersion,
    #[error("not an executable (e_type {0})")]
    NotExecutable(u16),
    #[error("unexpected machine {0}")]
    WrongMachine(u16),
    #[error("entry point is zero")]
    NoEntry,
    #[error("program header offset is zero")]
    NoProgramHeaders,
    #[error("ELF truncated")]
    Truncated,
    #[error("segment filesz larger than memsz")]
    FileszExceedsMemsz,
    #[error("segment address range overflows")]
    AddressOverflow,
    #[error("mapper failed: {0}")]
    Map(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub vaddr: u32,
    pub memsz: u32,
    pub filesz: u32,
    pub off: u32,
    pub prot: Prot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub entry: u32,
    pub segments: Vec<SegmentPlan>,
}

/// Installs a segment: copy `src` (exactly `filesz` bytes) to `vaddr`, zero up to `memsz`.
pub trait Mapper {
    fn map_segment(&mut self, seg: &SegmentPlan, src: &[u8]) -> Result<(), Error>;
}

/// Validates the ELF header and collects the `PT_LOAD` segments in file order.
pub fn parse_elf32_i386(bytes: &[u8]) -> Result<LoadPlan, Error> {
    if bytes.len() < header::SELFMAG || &bytes[..header::SELFMAG] != header::ELFMAG {
        return Err(Error::BadMagic);
    }
    if bytes.len() < header32::SIZEOF_EHDR {
        return Err(Error::Truncated);
    }
    if bytes[header::EI_CLASS] != header::ELFCLASS32 {
        return Err(Error::WrongClass);
    }
    if bytes[header::EI_DATA] != header::ELFDATA2LSB {
        return Err(Error::WrongByteOrder);
    }
    if bytes[header::EI_VERSION] != header::EV_CURRENT {
        return Err(Error::WrongVersion);
    }

    let hdr = Elf::parse_header(bytes).map_err(|_| Error::Truncated)?;
    if hdr.e_version != u32::from(header::EV_CURRENT) {
        return Err(Error::WrongVersion);
    }
    if hdr.e_type != header::ET_EXEC {
        return Err(Error::NotExecutable(hdr.e_type));
    }
    if hdr.e_machine != header::EM_386 {
        return Err(Error::WrongMachine(hdr.e_machine));
    }
    if hdr.e_entry == 0 {
        return Err(Error::NoEntry);
    }
    if hdr.e_phoff == 0 {
        return Err(Error::NoProgramHeaders);
    }

    let phoff = usize::try_from(hdr.e_phoff).map_err(|_| Error::Truncated)?;
    let phnum = usize::from(hdr.e_phnum);
    let table_end = phnum
        .checked_mul(program_header32::SIZEOF_PHDR)
        .and_then(|len| len.checked_add(phoff))
        .ok_or(Error::Truncated)?;
    if table_end > bytes.len() {
        return Err(Error::Truncated);
    }
    let ctx = Ctx::new(Container::Little, Endian::Little);
    let headers = ProgramHeader::parse(bytes, phoff, phnum, ctx).map_err(|_| Error::Truncated)?;

    let segments = headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .map(|ph| segment_from_program(ph, bytes))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadPlan {
        // e_entry was read from a 32-bit field
        entry: hdr.e_entry as u32,
        segments,
    })
}

fn segment_from_program(ph: &ProgramHeader, bytes: &[u8]) -> Result<SegmentPlan, Error> {
    let narrow = |v: u64| u32::try_from(v).map_err(|_| Error::AddressOverflow);
    let seg = SegmentPlan {
        vaddr: narrow(ph.p_vaddr)?,
        memsz: narrow(ph.p_memsz)?,
        filesz: narrow(ph.p_filesz)?,
        off: narrow(ph.p_offset)?,
        prot: Prot::from_flags(ph.p_flags),
    };
    if seg.filesz > seg.memsz {
        return Err(Error::FileszExceedsMemsz);
    }
    seg.vaddr.checked_add(seg.memsz).ok_or(Error::AddressOverflow)?;
    let end = seg.off.checked_add(seg.filesz).ok_or(Error::Truncated)?;
    if end as usize > bytes.len() {
        return Err(Error::Truncated);
    }
    Ok(seg)
}

/// Parses `bytes` and maps every `PT_LOAD` segment through `mapper`.
pub fn load_with<M: Mapper + ?Sized>(bytes: &[u8], mapper: &mut M) -> Result<LoadPlan, Error> {
    let plan = parse_elf32_i386(bytes)?;
    for seg in &plan.segments {
        let start = seg.off as usize;
        let src = bytes.get(start..start + seg.filesz as usize).ok_or(Error::Truncated)?;
        mapper.map_segment(seg, src)?;
    }
    Ok(plan)
}

/// Loads `bytes` and hands the entry point to `enter`, which performs the jump.
pub fn exec<M, F, R>(bytes: &[u8], mapper: &mut M, enter: F) -> Result<R, Error>
where
    M: Mapper + ?Sized,
    F: FnOnce(u32) -> R,
{
    let plan = load_with(bytes, mapper)?;
    Ok(enter(plan.entry))
}

/// Sparse, page-backed address space. Unmapped pages read as absent.
#[derive(Debug, Default)]
pub struct ImageMemory {
    pages: BTreeMap<u32, Page>,
}

#[derive(Debug)]
struct Page {
    bytes: Box<[u8; PAGE_SIZE as usize]>,
    prot: Prot,
}

impl ImageMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `len` bytes starting at `addr`; `None` if any byte is unmapped.
    pub fn read(&self, addr: u32, len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let a = addr.checked_add(u32::try_from(i).ok()?)?;
            let page = self.pages.get(&(a / PAGE_SIZE))?;
            out.push(page.bytes[(a % PAGE_SIZE) as usize]);
        }
        Some(out)
    }

    /// Protection of the page holding `addr`.
    pub fn prot_of(&self, addr: u32) -> Option<Prot> {
        self.pages.get(&(addr / PAGE_SIZE)).map(|page| page.prot)
    }

    /// Mapped page indices with the rights the kernel ledger should record.
    pub fn page_rights(&self) -> impl Iterator<Item = (u32, Rights)> + '_ {
        self.pages.iter().map(|(&index, page)| (index, page.prot.rights()))
    }

    fn page_mut(&mut self, index: u32, prot: Prot) -> &mut Page {
        let page = self
            .pages
            .entry(index)
            .or_insert_with(|| Page { bytes: Box::new([0; PAGE_SIZE as usize]), prot: Prot::empty() });
        page.prot |= prot;
        page
    }
}

impl Mapper for ImageMemory {
    fn map_segment(&mut self, seg: &SegmentPlan, src: &[u8]) -> Result<(), Error> {
        if src.len() != seg.filesz as usize {
            return Err(Error::Map("source length differs from filesz"));
        }
        let end = seg.vaddr.checked_add(seg.memsz).ok_or(Error::AddressOverflow)?;
        let mut addr = seg.vaddr;
        while addr < end {
            let index = addr / PAGE_SIZE;
            let in_page = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min((end - addr) as usize);
            let seg_off = (addr - seg.vaddr) as usize;
            let page = self.page_mut(index, seg.prot);
            for (i, slot) in page.bytes[in_page..in_page + chunk].iter_mut().enumerate() {
                *slot = src.get(seg_off + i).copied().unwrap_or(0);
            }
            addr += chunk as u32;
        }
        Ok(())
    }
}
