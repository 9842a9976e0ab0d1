//! Text encoding of FILE column values.
//!
//! A value is a list of `original_name|blob_name` pairs joined with `;;`:
//!
//! ```text
//! invoice.pdf|3f2a...e1.enc;;scan.png|9c41...07.enc
//! ```
//!
//! Values written before pairs existed hold a bare blob name; those parse to a
//! single reference whose display name and blob name are both that string.

pub const PAIR_DELIMITER: char = '|';
pub const LIST_DELIMITER: &str = ";;";
/// Display name used when a file has none (or only whitespace).
pub const FALLBACK_NAME: &str = "attachment";

/// One attached file: the name the user sees and the opaque blob on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentRef {
    pub original_name: String,
    pub blob_name: String,
}

impl AttachmentRef {
    /// Build a reference, replacing delimiter characters in the display name so the
    /// pair always survives a format/parse cycle. A blank name becomes
    /// [`FALLBACK_NAME`].
    pub fn new(original_name: impl AsRef<str>, blob_name: impl Into<String>) -> Self {
        Self {
            original_name: sanitize_display_name(original_name.as_ref()),
            blob_name: blob_name.into(),
        }
    }

    /// Reference for a legacy value that only stored the blob name.
    pub fn legacy(value: &str) -> Self {
        Self {
            original_name: value.to_string(),
            blob_name: value.to_string(),
        }
    }

    /// Extension of the original file name including the dot (`".pdf"`), if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.original_name.rsplit(['/', '\\']).next().unwrap_or_default();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }
}

pub fn sanitize_display_name(name: &str) -> String {
    if name.trim().is_empty() {
        return FALLBACK_NAME.to_string();
    }
    name.chars()
        .map(|c| match c {
            PAIR_DELIMITER | ';' => '_',
            c => c,
        })
        .collect()
}

pub fn format_ref(reference: &AttachmentRef) -> String {
    format!(
        "{}{PAIR_DELIMITER}{}",
        reference.original_name, reference.blob_name
    )
}

/// Parse a single pair. `None` for an empty value.
pub fn parse_ref(value: &str) -> Option<AttachmentRef> {
    if value.is_empty() {
        return None;
    }
    match value.split_once(PAIR_DELIMITER) {
        Some((original, blob)) if !original.is_empty() && !blob.is_empty() => Some(AttachmentRef {
            original_name: original.to_string(),
            blob_name: blob.to_string(),
        }),
        Some(_) => None,
        None => Some(AttachmentRef::legacy(value)),
    }
}

pub fn format_refs(refs: &[AttachmentRef]) -> String {
    refs.iter()
        .map(format_ref)
        .collect::<Vec<_>>()
        .join(LIST_DELIMITER)
}

/// Parse a column value into its references. Empty and whitespace-only segments
/// are skipped, so an empty value is an empty list.
pub fn parse_refs(value: &str) -> Vec<AttachmentRef> {
    value
        .split(LIST_DELIMITER)
        .filter(|part| !part.trim().is_empty())
        .filter_map(parse_ref)
        .collect()
}

/// Comma-separated display names, as shown in a table cell.
pub fn display_names(value: &str) -> String {
    parse_refs(value)
        .into_iter()
        .map(|r| r.original_name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_value_is_empty_list() {
        assert_eq!(parse_refs(""), Vec::new());
        assert_eq!(format_refs(&[]), "");
    }

    #[test]
    fn legacy_bare_value() {
        assert_eq!(
            parse_refs("old-report.docx"),
            vec![AttachmentRef::legacy("old-report.docx")]
        );
    }

    #[test]
    fn delimiters_are_stripped_from_display_names() {
        let r = AttachmentRef::new("a|b;c.txt", "x.enc");
        assert_eq!(r.original_name, "a_b_c.txt");
        assert_eq!(parse_refs(&format_refs(&[r.clone()])), vec![r]);
    }

    #[test]
    fn extension_of_original_name() {
        assert_eq!(AttachmentRef::new("scan.PNG", "b").extension(), Some(".PNG"));
        assert_eq!(AttachmentRef::new("archive.tar.gz", "b").extension(), Some(".gz"));
        assert_eq!(AttachmentRef::new(".bashrc", "b").extension(), None);
        assert_eq!(AttachmentRef::new("README", "b").extension(), None);
    }

    #[test]
    fn display_names_join_with_commas() {
        let value = "a.pdf|1.enc;;b.png|2.enc";
        assert_eq!(display_names(value), "a.pdf, b.png");
    }
}
