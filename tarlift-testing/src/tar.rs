//! Verify produced tar archives by reading them back with the canonical `tar` crate.
use crate::Result;
use std::collections::HashMap;
use std::io::Read;

/// One member read back out of an archive.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub mode: u32,
}

/// Parse archive bytes into its entries, in order.
///
/// Any archive this fails on would also be unreadable by real tar implementations, so tests use
/// it both to validate structure and to get at the member contents.
pub fn read_archive_entries(archive: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut reader = tar::Archive::new(std::io::Cursor::new(archive));

    let mut entries = Vec::new();
    for entry in reader.entries()? {
        let mut entry = entry?;

        let name = entry.path()?.display().to_string();
        let mode = entry.header().mode()?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;

        entries.push(ArchiveEntry { name, data, mode });
    }

    Ok(entries)
}

/// Assert that the archive holds exactly `expected` (name → contents), in any order.
pub fn validate_archive_contents(
    archive: &[u8],
    expected: &HashMap<String, Vec<u8>>,
) -> Result<()> {
    let entries = read_archive_entries(archive)?;

    assert_eq!(
        entries.len(),
        expected.len(),
        "archive member count doesn't match the expected objects"
    );

    for entry in entries {
        let want = expected
            .get(&entry.name)
            .unwrap_or_else(|| panic!("archive has unexpected member '{}'", entry.name));
        assert_eq!(
            crate::test_data::hash_of(want),
            crate::test_data::hash_of(&entry.data),
            "contents of member '{}' don't match the source object",
            entry.name
        );
    }

    Ok(())
}
