//! Sector placement from the `<sector>_<sub_sector>.<ext>` file naming convention.
//!
//! The file name is authoritative: row content never moves a file's data to
//! another sector.

use std::path::Path;

use crate::error::IngestError;
use crate::identity::Name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorPath {
    pub sector: Name,
    pub sub_sector: Option<Name>,
}

/// Split the file stem at its first `_`: the head is the sector, the
/// remainder (if any, and not blank) the sub-sector.
pub fn resolve(path: &Path) -> Result<SectorPath, IngestError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            IngestError::NamingConvention(format!(
                "'{}' has no usable file name",
                path.display()
            ))
        })?;

    let (sector_raw, sub_raw) = match stem.split_once('_') {
        Some((head, rest)) => (head, Some(rest)),
        None => (stem, None),
    };

    let sector = Name::parse(sector_raw).ok_or_else(|| {
        IngestError::NamingConvention(format!(
            "'{}': expected <sector>_<sub_sector>, found no sector token",
            stem
        ))
    })?;

    Ok(SectorPath {
        sector,
        sub_sector: sub_raw.and_then(Name::parse),
    })
}
