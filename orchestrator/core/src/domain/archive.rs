// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment archives.
//!
//! Building the zip (topology document plus artifacts) belongs to the
//! management layer. The lifecycle core only asks an archive for its bytes at
//! the moment a submission action runs, so packaging failures surface as
//! action failures.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Something that can produce the `application/zip` body for a topology
/// submission.
pub trait DeploymentArchive: Send + Sync + fmt::Debug {
    fn package(&self) -> Result<Bytes, ArchiveError>;
}

impl DeploymentArchive for Bytes {
    fn package(&self) -> Result<Bytes, ArchiveError> {
        if self.is_empty() {
            return Err(ArchiveError::Empty);
        }
        Ok(self.clone())
    }
}

impl DeploymentArchive for Vec<u8> {
    fn package(&self) -> Result<Bytes, ArchiveError> {
        Bytes::from(self.clone()).package()
    }
}

#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Deployment archive is empty")]
    Empty,

    #[error("No deployment archive attached to the request")]
    Missing,

    #[error("Failed to package deployment archive: {0}")]
    Packaging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_archive_is_rejected() {
        assert!(matches!(Bytes::new().package(), Err(ArchiveError::Empty)));
        assert!(matches!(Vec::<u8>::new().package(), Err(ArchiveError::Empty)));
    }

    #[test]
    fn test_bytes_archive_packages_itself() {
        let archive = Bytes::from_static(b"PK\x03\x04topology");
        assert_eq!(archive.package().unwrap(), archive);
    }
}
