//! IMAP folder listing and resolution

/// Represents an IMAP folder/mailbox from a LIST response
#[derive(Debug, Clone)]
pub struct Folder {
    /// Full path including hierarchy delimiter
    pub full_path: String,
    /// Hierarchy delimiter (e.g., "/" for Gmail)
    pub delimiter: Option<char>,
    /// LIST attributes
    pub attributes: Vec<String>,
}

impl Folder {
    pub fn new(full_path: String, delimiter: Option<char>, attributes: Vec<String>) -> Self {
        Self {
            full_path,
            delimiter,
            attributes,
        }
    }

    /// Last path component
    pub fn name(&self) -> &str {
        match self.delimiter {
            Some(delim) => self
                .full_path
                .rsplit(delim)
                .next()
                .unwrap_or(&self.full_path),
            None => &self.full_path,
        }
    }

    /// Check if this folder can be selected
    pub fn is_selectable(&self) -> bool {
        !self.attributes.iter().any(|a| {
            let lower = a.to_lowercase();
            lower.contains("noselect") || lower.contains("nonexistent")
        })
    }
}

/// Find the folder matching `wanted`, ignoring case. An exact path match
/// wins over a match on the last path component.
pub fn resolve_folder<'a>(folders: &'a [Folder], wanted: &str) -> Option<&'a Folder> {
    let selectable = || folders.iter().filter(|f| f.is_selectable());

    selectable()
        .find(|f| f.full_path == wanted)
        .or_else(|| selectable().find(|f| f.full_path.eq_ignore_ascii_case(wanted)))
        .or_else(|| selectable().find(|f| f.name().eq_ignore_ascii_case(wanted)))
}
