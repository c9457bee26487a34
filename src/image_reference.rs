use std::fmt;

const DEFAULT_TAG: &str = "latest";

/// A container image reference of the form `repository[:tag][@digest]`.
///
/// The repository may carry a registry host with a port (`host:5000/team/app`), so a
/// colon only separates a tag when it comes after the last `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    raw: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

/// Normalized image identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Self {
        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (s, None),
        };

        let last_slash = name.rfind('/');
        let (repository, tag) = match name.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => {
                (&name[..pos], Some(name[pos + 1..].to_string()))
            }
            _ => (name, None),
        };

        Self {
            raw: s.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        }
    }

    /// `repository:tag` when tagged, otherwise the reference exactly as written.
    pub fn identity_key(&self) -> DedupKey {
        match &self.tag {
            Some(tag) => DedupKey(format!("{}:{}", self.repository, tag)),
            None => DedupKey(self.raw.clone()),
        }
    }

    pub fn extract_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

/// The current image of one container next to the best known previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChange {
    pub container: String,
    pub new_image: ImageReference,
    pub old_image: ImageReference,
}

impl ImageChange {
    pub fn new(container: impl Into<String>, new_image: &str, old_image: &str) -> Self {
        Self {
            container: container.into(),
            new_image: ImageReference::parse(new_image),
            old_image: ImageReference::parse(old_image),
        }
    }

    pub fn has_changed(&self) -> bool {
        self.new_image.identity_key() != self.old_image.identity_key()
    }
}
