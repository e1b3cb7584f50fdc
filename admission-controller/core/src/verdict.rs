use json_patch::Patch;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse},
    DynamicObject,
};
use tracing::warn;

/// The single decision returned for an admission request.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    allowed: bool,
    patch: Option<Patch>,
    warnings: Vec<String>,
    message: String,
}

// === impl Verdict ===

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            patch: None,
            warnings: Vec::new(),
            message: String::new(),
        }
    }

    /// A denial. Denials never carry a patch and always carry a message.
    pub fn deny(message: impl ToString) -> Self {
        let mut message = message.to_string();
        if message.trim().is_empty() {
            message = "admission request denied".to_string();
        }
        Self {
            allowed: false,
            patch: None,
            warnings: Vec::new(),
            message,
        }
    }

    /// Attaches a patch to an allowed verdict. Ignored for denials, and an
    /// empty patch is recorded as no patch.
    pub fn with_patch(mut self, patch: Option<Patch>) -> Self {
        if self.allowed {
            self.patch = patch.filter(|p| !p.0.is_empty());
        }
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_response(self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let mut rsp = AdmissionResponse::from(req);
        if !self.warnings.is_empty() {
            rsp.warnings = Some(self.warnings);
        }
        if !self.allowed {
            return rsp.deny(self.message);
        }
        match self.patch {
            None => rsp,
            Some(patch) => match rsp.clone().with_patch(patch) {
                Ok(rsp) => rsp,
                Err(error) => {
                    warn!(%error, "Failed to encode patch");
                    rsp.deny(format!("failed to encode patch: {error}"))
                }
            },
        }
    }
}
