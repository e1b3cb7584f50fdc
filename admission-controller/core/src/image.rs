use crate::patch;
use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Records, on the admitted resource, which images were verified.
pub const VERIFY_IMAGES_ANNOTATION: &str = "kyverno.io/verify-images";

/// The verification outcome of each image of a resource, keyed by image
/// reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageVerificationMetadata(BTreeMap<String, ImageVerificationStatus>);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageVerificationStatus {
    Pass,
    Fail,
    Skip,
}

// === impl ImageVerificationMetadata ===

impl ImageVerificationMetadata {
    pub fn add(&mut self, image: impl Into<String>, status: ImageVerificationStatus) {
        self.0.insert(image.into(), status);
    }

    pub fn get(&self, image: &str) -> Option<ImageVerificationStatus> {
        self.0.get(image).copied()
    }

    /// Folds `other` into this set. An image present in both takes the status
    /// from `other`.
    pub fn merge(&mut self, other: ImageVerificationMetadata) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Builds the patch that records this metadata in the resource's
    /// annotations.
    pub fn patches(&self, resource: &Value) -> serde_json::Result<Patch> {
        let value = serde_json::to_string(&self.0)?;
        let op = patch::set_annotation(resource, VERIFY_IMAGES_ANNOTATION, value)?;
        Ok(Patch(vec![op]))
    }
}

impl FromIterator<(String, ImageVerificationStatus)> for ImageVerificationMetadata {
    fn from_iter<T: IntoIterator<Item = (String, ImageVerificationStatus)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
