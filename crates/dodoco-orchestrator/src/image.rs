//! Image allow-list and reference normalization.

use dodoco_common::config::ImageAllowList;
use dodoco_common::constants::DEFAULT_IMAGE_TAG;
use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::PortSpec;

/// A validated image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Base image name, guaranteed to be on the allow-list.
    pub base: String,
    /// Tag, `latest` when the request omitted one.
    pub tag: String,
}

impl ImageRef {
    /// Returns the normalized `base:tag` reference.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.base, self.tag)
    }
}

/// Decides which images may be provisioned.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    allowed: ImageAllowList,
}

impl ImagePolicy {
    /// Creates a policy over the given allow-list.
    #[must_use]
    pub const fn new(allowed: ImageAllowList) -> Self {
        Self { allowed }
    }

    /// Base image names that pass validation, sorted.
    #[must_use]
    pub fn allowed(&self) -> Vec<String> {
        self.allowed.0.keys().cloned().collect()
    }

    /// Splits `name[:tag]` and checks the base against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns `BadImage` for an empty reference, an empty part, more than
    /// one `:`, or a base that is not allowed.
    pub fn validate(&self, reference: &str) -> Result<ImageRef> {
        let (base, tag) = match reference.split_once(':') {
            Some((base, tag)) => (base, tag),
            None => (reference, DEFAULT_IMAGE_TAG),
        };
        if base.is_empty() || tag.is_empty() || tag.contains(':') {
            return Err(self.reject(reference));
        }
        if !self.allowed.0.contains_key(base) {
            return Err(self.reject(reference));
        }
        Ok(ImageRef {
            base: base.to_owned(),
            tag: tag.to_owned(),
        })
    }

    /// Port specs applied when a create request names none.
    ///
    /// # Errors
    ///
    /// Returns `BadImage` if the base is not allowed, or `Validation` if a
    /// configured spec does not parse.
    pub fn default_ports(&self, base: &str) -> Result<Vec<PortSpec>> {
        let entry = self
            .allowed
            .0
            .get(base)
            .ok_or_else(|| self.reject(base))?;
        entry.default_ports.iter().map(|s| s.parse()).collect()
    }

    fn reject(&self, image: &str) -> DodocoError {
        DodocoError::BadImage {
            image: image.to_owned(),
            allowed: self.allowed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dodoco_common::config::ImageEntry;
    use dodoco_common::error::ErrorKind;
    use dodoco_common::types::{Protocol, ProtocolSpec};

    use super::*;

    fn policy() -> ImagePolicy {
        ImagePolicy::new(ImageAllowList::default())
    }

    #[test]
    fn tag_defaults_to_latest() {
        let image = policy().validate("ubuntu").expect("valid");
        assert_eq!(image.base, "ubuntu");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.reference(), "ubuntu:latest");
    }

    #[test]
    fn explicit_tag_is_kept() {
        let image = policy().validate("ubuntu:20.04").expect("valid");
        assert_eq!((image.base.as_str(), image.tag.as_str()), ("ubuntu", "20.04"));
    }

    #[test]
    fn unknown_base_lists_allowed_images() {
        let err = policy().validate("centos").expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(
            &err,
            DodocoError::BadImage { image, allowed }
                if image == "centos" && allowed == &["ubuntu".to_owned()]
        ));
    }

    #[test]
    fn malformed_references_are_rejected() {
        for bad in ["", ":latest", "ubuntu:", "ubuntu:20.04:x"] {
            assert!(
                matches!(policy().validate(bad), Err(DodocoError::BadImage { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn default_ports_come_from_allow_list() {
        let specs = policy().default_ports("ubuntu").expect("ports");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].container_port, 22);
        assert_eq!(specs[0].protocol, ProtocolSpec::All);
    }

    #[test]
    fn custom_allow_list() {
        let mut images = BTreeMap::new();
        let _ = images.insert(
            "debian".to_owned(),
            ImageEntry {
                default_ports: vec!["80/tcp".into()],
            },
        );
        let policy = ImagePolicy::new(ImageAllowList(images));
        assert!(policy.validate("ubuntu").is_err());
        let specs = policy.default_ports("debian").expect("ports");
        assert_eq!(specs[0].protocol, ProtocolSpec::One(Protocol::Tcp));
    }
}
