//! Product version embedded in Windows PE executables.
//!
//! Reads the `RT_VERSION` resource and decodes the `VS_FIXEDFILEINFO`
//! block's product version as `a.b.c.d`.

use object::pe;
use object::read::pe::{ImageNtHeaders, PeFile, ResourceDirectoryEntryData, ResourceNameOrId};
use object::{FileKind, LittleEndian as LE};
use std::path::Path;

/// `VS_FIXEDFILEINFO.dwSignature`, little-endian.
const FIXED_FILE_INFO_SIGNATURE: [u8; 4] = 0xFEEF_04BD_u32.to_le_bytes();

/// Offset of `dwProductVersionMS` from the signature.
const PRODUCT_VERSION_OFFSET: usize = 16;

/// Read the product version of the PE file at `path`.
///
/// Returns `None` for unreadable files, non-PE files, and executables
/// without a version resource.
#[must_use]
pub fn product_version(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    let resource = match FileKind::parse(&*data).ok()? {
        FileKind::Pe32 => version_resource::<pe::ImageNtHeaders32>(&data),
        FileKind::Pe64 => version_resource::<pe::ImageNtHeaders64>(&data),
        _ => None,
    }?;
    fixed_file_info_version(resource)
}

fn version_resource<Pe: ImageNtHeaders>(data: &[u8]) -> Option<&[u8]> {
    let file = PeFile::<Pe, &[u8]>::parse(data).ok()?;
    let sections = file.section_table();
    let directory = file
        .data_directories()
        .resource_directory(data, &sections)
        .ok()??;
    let root = directory.root().ok()?;

    // Type, then name, then language; take the first entry at each level.
    let mut entry = root
        .entries
        .iter()
        .find(|e| matches!(e.name_or_id(), ResourceNameOrId::Id(pe::RT_VERSION)))?;
    loop {
        match entry.data(directory).ok()? {
            ResourceDirectoryEntryData::Table(table) => entry = table.entries.first()?,
            ResourceDirectoryEntryData::Data(leaf) => {
                let bytes = sections.pe_data_at(data, leaf.offset_to_data.get(LE))?;
                let size = usize::try_from(leaf.size.get(LE)).ok()?;
                return bytes.get(..size);
            }
        }
    }
}

/// Decode the product version from a `VS_VERSIONINFO` resource body.
///
/// # Examples
///
/// ```
/// use probe_forge::version::pe::fixed_file_info_version;
///
/// let mut block = vec![0_u8; 8];
/// block.extend_from_slice(&0xFEEF_04BD_u32.to_le_bytes());
/// block.extend_from_slice(&[0; 12]);
/// block.extend_from_slice(&((2_u32 << 16) | 9).to_le_bytes());
/// block.extend_from_slice(&(1_u32 << 16).to_le_bytes());
/// assert_eq!(fixed_file_info_version(&block).as_deref(), Some("2.9.1.0"));
/// ```
#[must_use]
pub fn fixed_file_info_version(resource: &[u8]) -> Option<String> {
    let start = resource
        .windows(FIXED_FILE_INFO_SIGNATURE.len())
        .position(|window| window == FIXED_FILE_INFO_SIGNATURE)?;
    let word = |offset: usize| -> Option<u32> {
        let bytes = resource.get(offset..offset + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    };
    let ms = word(start + PRODUCT_VERSION_OFFSET)?;
    let ls = word(start + PRODUCT_VERSION_OFFSET + 4)?;
    Some(format!(
        "{}.{}.{}.{}",
        ms >> 16,
        ms & 0xFFFF,
        ls >> 16,
        ls & 0xFFFF
    ))
}
