//! CONTEXT: Integration tests for synapse-loader ELF32/i386 loading
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 6 integration tests
//!
//! TEST_SCOPE:
//!   - Header validation (each rejection reason)
//!   - PT_LOAD copy and zero-fill into a sparse image
//!   - Control transfer to the entry point
//!
//! TEST_SCENARIOS:
//!   - exec_copies_filesz_and_zero_fills_memsz(): 11 bytes + 4085 zeros at 0x00100000, entry reached
//!   - non_load_headers_are_skipped(): PT_NOTE is never mapped
//!   - header_rejections(): magic, class, byte order, version, type, machine, entry, phoff
//!   - structural_errors_are_typed(): filesz > memsz, truncated segment, truncated table
//!   - nothing_runs_when_loading_fails(): entry closure not invoked on error
//!   - image_rights_follow_segment_flags(): ledger rights derived from p_flags
//!
//! DEPENDENCIES:
//!   - synapse_loader::{exec, load_with, parse_elf32_i386, ImageMemory}
//!   - byteorder-built ELF32 fixture

use byteorder::{LittleEndian, WriteBytesExt};
use goblin::elf::{header, program_header};
use synapse_abi::Rights;
use synapse_loader::{exec, load_with, parse_elf32_i386, Error, ImageMemory, Mapper, Prot, SegmentPlan};

const ENTRY: u32 = 0x0010_0000;
const PHOFF: u32 = 52;
const TEXT_OFF: u32 = 0x80;
const TEXT: &[u8; 11] = b"hello world";

fn fixture() -> Vec<u8> {
    let mut e_ident = [0u8; 16];
    e_ident[..4].copy_from_slice(header::ELFMAG);
    e_ident[header::EI_CLASS] = header::ELFCLASS32;
    e_ident[header::EI_DATA] = header::ELFDATA2LSB;
    e_ident[header::EI_VERSION] = header::EV_CURRENT;

    let mut cursor = std::io::Cursor::new(Vec::new());
    std::io::Write::write_all(&mut cursor, &e_ident).unwrap();
    cursor.write_u16::<LittleEndian>(header::ET_EXEC).unwrap(); // e_type
    cursor.write_u16::<LittleEndian>(header::EM_386).unwrap(); // e_machine
    cursor.write_u32::<LittleEndian>(1).unwrap(); // e_version
    cursor.write_u32::<LittleEndian>(ENTRY).unwrap(); // e_entry
    cursor.write_u32::<LittleEndian>(PHOFF).unwrap(); // e_phoff
    cursor.write_u32::<LittleEndian>(0).unwrap(); // e_shoff
    cursor.write_u32::<LittleEndian>(0).unwrap(); // e_flags
    cursor.write_u16::<LittleEndian>(52).unwrap(); // e_ehsize
    cursor.write_u16::<LittleEndian>(32).unwrap(); // e_phentsize
    cursor.write_u16::<LittleEndian>(2).unwrap(); // e_phnum
    cursor.write_u16::<LittleEndian>(0).unwrap(); // e_shentsize
    cursor.write_u16::<LittleEndian>(0).unwrap(); // e_shnum
    cursor.write_u16::<LittleEndian>(0).unwrap(); // e_shstrndx

    // PT_LOAD: 11 bytes of text, one page of memory
    for field in [
        program_header::PT_LOAD,
        TEXT_OFF,
        ENTRY,
        ENTRY,
        TEXT.len() as u32,
        4096,
        program_header::PF_R | program_header::PF_X,
        4096,
    ] {
        cursor.write_u32::<LittleEndian>(field).unwrap();
    }
    // PT_NOTE pointing at the same bytes somewhere else
    for field in [program_header::PT_NOTE, TEXT_OFF, 0x0040_0000, 0, TEXT.len() as u32, 16, program_header::PF_R, 4] {
        cursor.write_u32::<LittleEndian>(field).unwrap();
    }

    let mut data = cursor.into_inner();
    data.resize(TEXT_OFF as usize, 0);
    data.extend_from_slice(TEXT);
    // trailing file bytes must not leak past filesz
    data.extend_from_slice(&[0xEE; 32]);
    data
}

fn patch_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn patch_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn exec_copies_filesz_and_zero_fills_memsz() {
    let mut memory = ImageMemory::new();
    let entered = exec(&fixture(), &mut memory, |entry| entry).expect("exec");
    assert_eq!(entered, ENTRY);

    let page = memory.read(ENTRY, 4096).expect("segment mapped");
    assert_eq!(&page[..11], TEXT);
    assert!(page[11..].iter().all(|&b| b == 0));
    assert_eq!(page.len() - 11, 4085);
    assert_eq!(memory.read(ENTRY + 4096, 1), None);
}

#[test]
fn non_load_headers_are_skipped() {
    let plan = parse_elf32_i386(&fixture()).expect("parse");
    assert_eq!(plan.entry, ENTRY);
    assert_eq!(
        plan.segments,
        vec![SegmentPlan { vaddr: ENTRY, memsz: 4096, filesz: 11, off: TEXT_OFF, prot: Prot::R | Prot::X }]
    );
    let mut memory = ImageMemory::new();
    load_with(&fixture(), &mut memory).expect("load");
    assert_eq!(memory.prot_of(0x0040_0000), None);
}

#[test]
fn header_rejections() {
    let cases: [(fn(&mut Vec<u8>), Error); 9] = [
        (|b| b[0] = 0x7E, Error::BadMagic),
        (|b| b.truncate(3), Error::BadMagic),
        (|b| b[header::EI_CLASS] = header::ELFCLASS64, Error::WrongClass),
        (|b| b[header::EI_DATA] = header::ELFDATA2MSB, Error::WrongByteOrder),
        (|b| b[header::EI_VERSION] = 0, Error::WrongVersion),
        (|b| patch_u16(b, 16, header::ET_DYN), Error::NotExecutable(header::ET_DYN)),
        (|b| patch_u16(b, 18, header::EM_X86_64), Error::WrongMachine(header::EM_X86_64)),
        (|b| patch_u32(b, 24, 0), Error::NoEntry),
        (|b| patch_u32(b, 28, 0), Error::NoProgramHeaders),
    ];
    for (mutate, expected) in cases {
        let mut bytes = fixture();
        mutate(&mut bytes);
        assert_eq!(parse_elf32_i386(&bytes), Err(expected));
    }
}

#[test]
fn structural_errors_are_typed() {
    let first_ph = PHOFF as usize;

    let mut oversized = fixture();
    patch_u32(&mut oversized, first_ph + 16, 8192); // p_filesz
    assert_eq!(parse_elf32_i386(&oversized), Err(Error::FileszExceedsMemsz));

    let mut beyond = fixture();
    patch_u32(&mut beyond, first_ph + 4, 0x1000); // p_offset
    assert_eq!(parse_elf32_i386(&beyond), Err(Error::Truncated));

    let mut wrapping = fixture();
    patch_u32(&mut wrapping, first_ph + 8, u32::MAX - 10); // p_vaddr
    assert_eq!(parse_elf32_i386(&wrapping), Err(Error::AddressOverflow));

    let mut short_table = fixture();
    short_table.truncate(PHOFF as usize + 40);
    assert_eq!(parse_elf32_i386(&short_table), Err(Error::Truncated));
}

#[test]
fn nothing_runs_when_loading_fails() {
    struct Refusing;
    impl Mapper for Refusing {
        fn map_segment(&mut self, _seg: &SegmentPlan, _src: &[u8]) -> Result<(), Error> {
            Err(Error::Map("out of frames"))
        }
    }

    let mut ran = false;
    let result = exec(&fixture(), &mut Refusing, |_| ran = true);
    assert_eq!(result, Err(Error::Map("out of frames")));
    assert!(!ran);
}

#[test]
fn image_rights_follow_segment_flags() {
    let mut memory = ImageMemory::new();
    load_with(&fixture(), &mut memory).expect("load");
    let rights: Vec<(u32, Rights)> = memory.page_rights().collect();
    assert_eq!(rights, vec![(ENTRY / 4096, Rights::READABLE | Rights::EXECUTABLE)]);
}
