use crate::matcher::glob_matches;
use kyverno_admission_core::{
    ContainerImage, ImageVerificationMetadata, ImageVerificationStatus, RuleResponse, RuleStatus,
    RuleType,
};
use kyverno_admission_k8s_api::policy::{ImageVerification, Rule};

/// Checks every image of the resource selected by the rule's
/// `imageReferences`, recording each outcome in `ivm`.
///
/// Signature and attestation checks need a registry-aware verifier, so images
/// that require them are reported as errors. Images that must be pinned by
/// digest fail when they are not.
pub(crate) fn verify(
    rule: &Rule,
    verifications: &[ImageVerification],
    images: &[ContainerImage],
    ivm: &mut ImageVerificationMetadata,
) -> RuleResponse {
    let mut failed = Vec::new();
    let mut errored = Vec::new();
    let mut verified = 0;

    for iv in verifications {
        let selected = images.iter().filter(|image| {
            iv.image_references
                .iter()
                .any(|pattern| glob_matches(pattern, &image.reference))
        });
        for image in selected {
            if iv.attestors.as_ref().is_some_and(|a| !a.is_empty()) {
                errored.push(format!(
                    "image {}: signature verification is not supported",
                    image.reference
                ));
                ivm.add(&image.reference, ImageVerificationStatus::Fail);
            } else if iv.verify_digest && image.digest.is_none() {
                failed.push(format!("image {}: missing digest", image.reference));
                ivm.add(&image.reference, ImageVerificationStatus::Fail);
            } else {
                verified += 1;
                ivm.add(&image.reference, ImageVerificationStatus::Pass);
            }
        }
    }

    let (status, message) = if !failed.is_empty() {
        failed.extend(errored);
        (RuleStatus::Fail, failed.join("; "))
    } else if !errored.is_empty() {
        (RuleStatus::Error, errored.join("; "))
    } else if verified == 0 {
        (RuleStatus::Skip, "no matching images".to_string())
    } else {
        (RuleStatus::Pass, format!("{verified} image(s) verified"))
    };
    RuleResponse::new(&rule.name, RuleType::ImageVerify, status, message)
}
