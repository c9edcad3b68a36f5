use crate::models::{FileCandidate, FilePair, FileRole, StorageLocator};
use thiserror::Error;

/// Maximum size of either file: the content-length limit carried by each grant
pub const MAX_FILE_SIZE: u64 = 200_000_000;

/// Extension of the compressed VCF
pub const PRIMARY_EXTENSION: &str = ".vcf.gz";

/// Extensions accepted for the positional index
pub const INDEX_EXTENSIONS: &[&str] = &[".tbi", ".csi"];

/// Scheme prefix of a storage locator
pub const LOCATOR_SCHEME: &str = "s3://";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Must be two files at most, vcf and index ({0} given)")]
    TooManyFiles(usize),

    #[error("'{0}' did not match vcf (.vcf.gz) or index (.tbi, .csi)")]
    UnrecognizedExtension(String),

    #[error("VCF and index file names must match ('{primary}' and '{index}')")]
    NameMismatch { primary: String, index: String },

    #[error("'{name}' is {size} bytes, above the {max} byte limit")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("The {0} file is missing")]
    MissingCounterpart(FileRole),

    #[error("'{0}' is not a location of the form s3://bucket/path.vcf.gz")]
    MalformedLocator(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::TooManyFiles(_) => "TOO_MANY_FILES",
            ValidationError::UnrecognizedExtension(_) => "UNRECOGNIZED_EXTENSION",
            ValidationError::NameMismatch { .. } => "NAME_MISMATCH",
            ValidationError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ValidationError::MissingCounterpart(_) => "MISSING_COUNTERPART",
            ValidationError::MalformedLocator(_) => "MALFORMED_LOCATOR",
        }
    }
}

/// ASCII case-insensitive `ends_with`
fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Classifies a file name by extension
pub fn role_of(name: &str) -> Option<FileRole> {
    if ends_with_ignore_case(name, PRIMARY_EXTENSION) {
        Some(FileRole::Primary)
    } else if INDEX_EXTENSIONS
        .iter()
        .any(|ext| ends_with_ignore_case(name, ext))
    {
        Some(FileRole::Index)
    } else {
        None
    }
}

/// Removes a trailing `.tbi`/`.csi`, leaving the name of the file it indexes
pub fn strip_index_suffix(name: &str) -> &str {
    INDEX_EXTENSIONS
        .iter()
        .find(|ext| ends_with_ignore_case(name, ext))
        .map(|ext| &name[..name.len() - ext.len()])
        .unwrap_or(name)
}

/// Validates file size against maximum limit
pub fn validate_file_size(file: &FileCandidate, max_size: u64) -> Result<(), ValidationError> {
    if file.size > max_size {
        return Err(ValidationError::FileTooLarge {
            name: file.name.clone(),
            size: file.size,
            max: max_size,
        });
    }
    Ok(())
}

/// Checks count and extensions of a candidate set
fn check_candidates(candidates: &[FileCandidate]) -> Result<(), ValidationError> {
    if candidates.len() > 2 {
        return Err(ValidationError::TooManyFiles(candidates.len()));
    }

    if let Some(bad) = candidates.iter().find(|c| role_of(&c.name).is_none()) {
        return Err(ValidationError::UnrecognizedExtension(bad.name.clone()));
    }

    Ok(())
}

/// Pairs a primary with its index once both roles are known
fn pair(
    primary: &FileCandidate,
    index: &FileCandidate,
    max_size: u64,
) -> Result<FilePair, ValidationError> {
    if strip_index_suffix(&index.name) != primary.name {
        return Err(ValidationError::NameMismatch {
            primary: primary.name.clone(),
            index: index.name.clone(),
        });
    }

    validate_file_size(primary, max_size)?;
    validate_file_size(index, max_size)?;

    Ok(FilePair::new(primary.clone(), index.clone()))
}

/// Full validation of one candidate set.
///
/// Returns `Ok(None)` when the set is acceptable but does not yet hold one
/// primary and one index (a lone file, or two files of the same role).
pub fn validate(
    candidates: &[FileCandidate],
    max_size: u64,
) -> Result<Option<FilePair>, ValidationError> {
    // 1. Count and extension checks
    check_candidates(candidates)?;

    // 2. Role assignment
    let primary = candidates
        .iter()
        .find(|c| role_of(&c.name) == Some(FileRole::Primary));
    let index = candidates
        .iter()
        .find(|c| role_of(&c.name) == Some(FileRole::Index));

    // 3. Name match and size
    match (primary, index) {
        (Some(primary), Some(index)) => pair(primary, index, max_size).map(Some),
        _ => Ok(None),
    }
}

/// Accumulates files across several picks or drops until a pair forms.
///
/// A lone file is held until its counterpart arrives. A later file of the
/// same role replaces the held one. A name mismatch discards both.
#[derive(Debug)]
pub struct FileSelection {
    primary: Option<FileCandidate>,
    index: Option<FileCandidate>,
    max_size: u64,
}

impl FileSelection {
    pub fn new(max_size: u64) -> Self {
        Self {
            primary: None,
            index: None,
            max_size,
        }
    }

    pub fn offer(
        &mut self,
        candidates: Vec<FileCandidate>,
    ) -> Result<Option<FilePair>, ValidationError> {
        check_candidates(&candidates)?;

        for candidate in candidates {
            match role_of(&candidate.name) {
                Some(FileRole::Primary) => self.primary = Some(candidate),
                Some(FileRole::Index) => self.index = Some(candidate),
                None => {}
            }
        }

        let (Some(primary), Some(index)) = (&self.primary, &self.index) else {
            return Ok(None);
        };

        match pair(primary, index, self.max_size) {
            Err(e @ ValidationError::NameMismatch { .. }) => {
                tracing::debug!("Clearing selection after name mismatch: {}", e);
                self.clear();
                Err(e)
            }
            other => other.map(Some),
        }
    }

    pub fn pending(&self, role: FileRole) -> Option<&FileCandidate> {
        match role {
            FileRole::Primary => self.primary.as_ref(),
            FileRole::Index => self.index.as_ref(),
        }
    }

    pub fn clear(&mut self) {
        self.primary = None;
        self.index = None;
    }
}

/// Parses a user-supplied `s3://bucket/path.vcf.gz` location
pub fn parse_locator(input: &str) -> Result<StorageLocator, ValidationError> {
    let malformed = || ValidationError::MalformedLocator(input.to_string());

    // Line breaks and other control characters never belong to a location
    if input
        .chars()
        .any(|c| c.is_control() || c == '\u{2028}' || c == '\u{2029}')
    {
        return Err(malformed());
    }

    let scheme_len = LOCATOR_SCHEME.len();
    if input.len() <= scheme_len
        || !input.is_char_boundary(scheme_len)
        || !input[..scheme_len].eq_ignore_ascii_case(LOCATOR_SCHEME)
    {
        return Err(malformed());
    }

    let (bucket, key) = input[scheme_len..].split_once('/').ok_or_else(malformed)?;
    if bucket.is_empty() {
        return Err(malformed());
    }

    // The path needs at least one character ahead of the extension
    if key.len() <= PRIMARY_EXTENSION.len() || !ends_with_ignore_case(key, PRIMARY_EXTENSION) {
        return Err(malformed());
    }

    Ok(StorageLocator {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileCandidate {
        FileCandidate::from_bytes(name, vec![0u8; size as usize])
    }

    #[test]
    fn test_role_of() {
        assert_eq!(role_of("sample.vcf.gz"), Some(FileRole::Primary));
        assert_eq!(role_of("SAMPLE.VCF.GZ"), Some(FileRole::Primary));
        assert_eq!(role_of("sample.vcf.gz.tbi"), Some(FileRole::Index));
        assert_eq!(role_of("sample.vcf.gz.CSI"), Some(FileRole::Index));
        assert_eq!(role_of("sample.vcf"), None);
        assert_eq!(role_of("sample.gz"), None);
        assert_eq!(role_of("tbi"), None);
    }

    #[test]
    fn test_strip_index_suffix() {
        assert_eq!(strip_index_suffix("sample.vcf.gz.tbi"), "sample.vcf.gz");
        assert_eq!(strip_index_suffix("sample.vcf.gz.TBI"), "sample.vcf.gz");
        assert_eq!(strip_index_suffix("sample.vcf.gz.csi"), "sample.vcf.gz");
        assert_eq!(strip_index_suffix("sample.tbi"), "sample");
        // Only the trailing suffix is stripped
        assert_eq!(strip_index_suffix("a.tbi.csi"), "a.tbi");
        assert_eq!(strip_index_suffix("sample.vcf.gz"), "sample.vcf.gz");
    }

    #[test]
    fn test_too_many_files() {
        let files = vec![
            file("a.vcf.gz", 1),
            file("a.vcf.gz.tbi", 1),
            file("a.vcf.gz.csi", 1),
        ];
        assert_eq!(
            validate(&files, MAX_FILE_SIZE).unwrap_err(),
            ValidationError::TooManyFiles(3)
        );

        // Count is checked before extensions
        let files = vec![file("x.txt", 1), file("y.txt", 1), file("z.txt", 1)];
        assert_eq!(
            validate(&files, MAX_FILE_SIZE).unwrap_err().code(),
            "TOO_MANY_FILES"
        );
    }

    #[test]
    fn test_unrecognized_extension() {
        let files = vec![file("a.vcf.gz", 1), file("a.vcf.gz.idx", 1)];
        assert_eq!(
            validate(&files, MAX_FILE_SIZE).unwrap_err(),
            ValidationError::UnrecognizedExtension("a.vcf.gz.idx".to_string())
        );
    }

    #[test]
    fn test_valid_pairs() {
        for index in ["name.vcf.gz.tbi", "name.vcf.gz.csi", "name.vcf.gz.TBI"] {
            let files = vec![file(index, 5), file("name.vcf.gz", 10)];
            let pair = validate(&files, MAX_FILE_SIZE).unwrap().unwrap();
            assert_eq!(pair.primary().name, "name.vcf.gz");
            assert_eq!(pair.index().name, index);
            assert_eq!(pair.total_size(), 15);
        }
    }

    #[test]
    fn test_index_with_vcf_gz_prefix_pairs() {
        let files = vec![file("sample.vcf.gz", 1024), file("sample.vcf.gz.tbi", 16)];
        let pair = validate(&files, MAX_FILE_SIZE).unwrap().unwrap();
        assert_eq!(pair.primary().name, "sample.vcf.gz");

        // Dropping the `.vcf.gz` from the index name breaks the match
        let files = vec![file("sample.vcf.gz", 1024), file("sample.tbi", 16)];
        assert_eq!(
            validate(&files, MAX_FILE_SIZE).unwrap_err().code(),
            "NAME_MISMATCH"
        );
    }

    #[test]
    fn test_name_match_is_exact() {
        let files = vec![file("Sample.vcf.gz", 1), file("sample.vcf.gz.tbi", 1)];
        assert!(matches!(
            validate(&files, MAX_FILE_SIZE),
            Err(ValidationError::NameMismatch { .. })
        ));
    }

    #[test]
    fn test_pending_sets() {
        assert!(validate(&[], MAX_FILE_SIZE).unwrap().is_none());
        assert!(validate(&[file("a.vcf.gz", 1)], MAX_FILE_SIZE).unwrap().is_none());
        let two_primaries = vec![file("a.vcf.gz", 1), file("b.vcf.gz", 1)];
        assert!(validate(&two_primaries, MAX_FILE_SIZE).unwrap().is_none());
        let two_indexes = vec![file("a.vcf.gz.tbi", 1), file("a.vcf.gz.csi", 1)];
        assert!(validate(&two_indexes, MAX_FILE_SIZE).unwrap().is_none());
    }

    #[test]
    fn test_file_too_large() {
        let files = vec![file("a.vcf.gz", 11), file("a.vcf.gz.tbi", 1)];
        assert_eq!(
            validate(&files, 10).unwrap_err(),
            ValidationError::FileTooLarge {
                name: "a.vcf.gz".to_string(),
                size: 11,
                max: 10
            }
        );
        assert!(validate(&files, 11).unwrap().is_some());
    }

    #[test]
    fn test_selection_holds_lone_file() {
        let mut selection = FileSelection::new(MAX_FILE_SIZE);
        assert!(selection.offer(vec![file("a.vcf.gz", 1)]).unwrap().is_none());
        assert!(selection.pending(FileRole::Primary).is_some());

        let pair = selection
            .offer(vec![file("a.vcf.gz.csi", 1)])
            .unwrap()
            .unwrap();
        assert_eq!(pair.index().name, "a.vcf.gz.csi");
    }

    #[test]
    fn test_selection_cleared_on_mismatch() {
        let mut selection = FileSelection::new(MAX_FILE_SIZE);
        selection.offer(vec![file("a.vcf.gz", 1)]).unwrap();

        let err = selection.offer(vec![file("b.vcf.gz.tbi", 1)]).unwrap_err();
        assert_eq!(err.code(), "NAME_MISMATCH");
        assert!(selection.pending(FileRole::Primary).is_none());
        assert!(selection.pending(FileRole::Index).is_none());

        // A later matching index alone does not pair with the discarded primary
        assert!(selection.offer(vec![file("a.vcf.gz.tbi", 1)]).unwrap().is_none());
    }

    #[test]
    fn test_selection_keeps_state_on_rejected_offer() {
        let mut selection = FileSelection::new(MAX_FILE_SIZE);
        selection.offer(vec![file("a.vcf.gz", 1)]).unwrap();
        assert!(selection.offer(vec![file("notes.txt", 1)]).is_err());
        assert!(selection.pending(FileRole::Primary).is_some());
    }

    #[test]
    fn test_parse_locator() {
        let locator = parse_locator("s3://mybucket/path/file.vcf.gz").unwrap();
        assert_eq!(locator.bucket, "mybucket");
        assert_eq!(locator.key, "path/file.vcf.gz");
        assert_eq!(locator.to_string(), "s3://mybucket/path/file.vcf.gz");

        assert!(parse_locator("S3://Bucket/File.VCF.GZ").is_ok());

        for bad in [
            "",
            "s3://",
            "s3:///file.vcf.gz",
            "s3://bucket",
            "s3://bucket/",
            "s3://bucket/.vcf.gz",
            "s3://bucket/file.vcf",
            "https://bucket/file.vcf.gz",
            "bucket/file.vcf.gz",
            "s3://b/a\nb.vcf.gz",
            "s3://b/a\rb.vcf.gz",
            "s3://b\n/file.vcf.gz",
            "s3://b/file.vcf.gz\n",
            "s3://b/a\tb.vcf.gz",
            "s3://b/a\u{2028}b.vcf.gz",
        ] {
            assert_eq!(
                parse_locator(bad).unwrap_err(),
                ValidationError::MalformedLocator(bad.to_string()),
                "{bad}"
            );
        }
    }
}
