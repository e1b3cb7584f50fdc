//! Admission-time validation of `CleanupPolicy` and `ClusterCleanupPolicy`
//! objects.

use crate::{
    core::Verdict,
    k8s::{cleanup::CleanupPolicySpec, DynamicObject},
};
use anyhow::{anyhow, bail, ensure, Context, Result};
use kube::core::admission::{AdmissionRequest, Operation};
use tracing::debug;

const DESCRIPTORS: &[&str] = &[
    "yearly", "annually", "monthly", "weekly", "daily", "midnight", "hourly",
];

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const WEEKDAYS: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const FIELDS: [Field; 5] = [
    Field {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
    },
    Field {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
    },
    Field {
        name: "day of month",
        min: 1,
        max: 31,
        names: &[],
    },
    Field {
        name: "month",
        min: 1,
        max: 12,
        names: MONTHS,
    },
    Field {
        name: "day of week",
        min: 0,
        max: 7,
        names: WEEKDAYS,
    },
];

pub(crate) fn validate(req: &AdmissionRequest<DynamicObject>) -> Verdict {
    if req.sub_resource.as_deref().is_some_and(|s| !s.is_empty()) {
        debug!("Skipping validation of a sub-resource update");
        return Verdict::allow();
    }
    if req.operation == Operation::Delete {
        return Verdict::allow();
    }

    match parse_spec(req).and_then(|spec| validate_spec(&spec)) {
        Ok(()) => Verdict::allow(),
        Err(error) => {
            debug!(%error, "Invalid cleanup policy");
            Verdict::deny(format!("{error:#}"))
        }
    }
}

fn parse_spec(req: &AdmissionRequest<DynamicObject>) -> Result<CleanupPolicySpec> {
    let obj = req
        .object
        .as_ref()
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let spec = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| anyhow!("cleanup policy has no spec"))?;
    serde_json::from_value(spec).context("failed to parse cleanup policy")
}

pub(crate) fn validate_spec(spec: &CleanupPolicySpec) -> Result<()> {
    ensure!(
        !spec.match_resources.kinds().is_empty(),
        "at least one kind is required in match"
    );
    validate_schedule(&spec.schedule)
}

/// Accepts standard 5-field cron expressions and the `@`-descriptors.
pub(crate) fn validate_schedule(schedule: &str) -> Result<()> {
    let schedule = schedule.trim();
    ensure!(!schedule.is_empty(), "schedule is required");

    if let Some(descriptor) = schedule.strip_prefix('@') {
        if let Some(every) = descriptor.strip_prefix("every ") {
            ensure!(
                !every.trim().is_empty(),
                "schedule {schedule:?} has no interval"
            );
            return Ok(());
        }
        ensure!(
            DESCRIPTORS.contains(&descriptor),
            "unknown schedule descriptor {schedule:?}"
        );
        return Ok(());
    }

    let fields = schedule.split_whitespace().collect::<Vec<_>>();
    ensure!(
        fields.len() == FIELDS.len(),
        "schedule {schedule:?} must have {} fields, found {}",
        FIELDS.len(),
        fields.len()
    );
    for (value, field) in fields.into_iter().zip(FIELDS.iter()) {
        field
            .validate(value)
            .with_context(|| format!("invalid schedule {schedule:?}"))?;
    }
    Ok(())
}

// === impl Field ===

impl Field {
    fn validate(&self, expr: &str) -> Result<()> {
        for item in expr.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            if let Some(step) = step {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| anyhow!("invalid {} step {step:?}", self.name))?;
                ensure!(
                    step <= self.max,
                    "{} step {step} exceeds {}",
                    self.name,
                    self.max
                );
            }
            if range == "*" || range == "?" {
                continue;
            }

            let (lo, hi) = range.split_once('-').unwrap_or((range, range));
            let (lo, hi) = (self.value(lo)?, self.value(hi)?);
            ensure!(lo <= hi, "invalid {} range {range:?}", self.name);
        }
        Ok(())
    }

    fn value(&self, s: &str) -> Result<u32> {
        if let Some(i) = self.names.iter().position(|n| n.eq_ignore_ascii_case(s)) {
            // Months are numbered from one and weekdays from zero.
            return Ok(i as u32 + self.min);
        }
        let Ok(v) = s.parse::<u32>() else {
            bail!("invalid {} value {s:?}", self.name);
        };
        ensure!(
            (self.min..=self.max).contains(&v),
            "{} value {v} is out of range {}-{}",
            self.name,
            self.min,
            self.max
        );
        Ok(v)
    }
}
