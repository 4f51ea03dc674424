//! Consistency checks for a device description
//!
//! The validator is a pure function of the in-memory model; it performs no
//! I/O and never mutates the data. It exists to catch mistakes that the
//! binary codec would happily serialize but that would surface as confusing
//! runtime behavior on a real imager, such as a raw-frame-set list that
//! disagrees with the per-frame frequency list.
//!
//! Findings are data, not errors: callers decide what is fatal. The findings
//! recommended to treat as fatal carry [`Severity::Error`]; those are the
//! ones that produce silently wrong device behavior (duplicate names or
//! guids, out-of-bounds exposure group indices) rather than merely off-spec
//! settings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::DeviceData;
use crate::use_case::{RegisterAction, UseCase};

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Off-spec or suspicious, but possibly intentional
    Warning,
    /// Recommended-fatal: would produce silently wrong device behavior
    Error,
}

/// One validator finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Name of the offending use case, if the finding is use-case-scoped
    pub use_case: Option<String>,
    pub detail: String,
}

impl Finding {
    fn warning(use_case: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            use_case: use_case.map(str::to_string),
            detail: detail.into(),
        }
    }

    fn error(use_case: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            use_case: use_case.map(str::to_string),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.use_case {
            Some(name) => write!(f, "{}: use case \"{}\": {}", level, name, self.detail),
            None => write!(f, "{}: {}", level, self.detail),
        }
    }
}

/// Check a device description for internal consistency.
///
/// Returns all findings; an empty list means the description is clean.
pub fn validate(device: &DeviceData) -> Vec<Finding> {
    let mut findings = Vec::new();

    if device.product_issuer.len() != 4 || !device.product_issuer.is_ascii() {
        findings.push(Finding::warning(
            None,
            format!(
                "product issuer {:?} is not exactly 4 ASCII bytes",
                device.product_issuer
            ),
        ));
    }
    if device.use_cases.is_empty() {
        findings.push(Finding::warning(None, "device has no use cases"));
    }

    for uc in &device.use_cases {
        check_use_case(uc, &mut findings);
    }
    for (i, a) in device.use_cases.iter().enumerate() {
        for b in &device.use_cases[i + 1..] {
            check_use_case_pair(a, b, &mut findings);
        }
    }

    findings
}

fn check_use_case(uc: &UseCase, findings: &mut Vec<Finding>) {
    let name = Some(uc.name.as_str());

    if !uc.name.is_ascii() || uc.name.len() > 255 {
        findings.push(Finding::warning(
            name,
            "name must be ASCII and at most 255 bytes",
        ));
    }
    if uc.reserved_block.len() > 255 {
        findings.push(Finding::warning(
            name,
            format!(
                "reserved block is {} bytes, the on-disk length field is one byte",
                uc.reserved_block.len()
            ),
        ));
    }

    let (fps_min, fps_max) = uc.fps_limits;
    if uc.start_fps < fps_min || uc.start_fps > fps_max {
        findings.push(Finding::warning(
            name,
            format!(
                "start FPS {} outside limits [{}, {}]",
                uc.start_fps, fps_min, fps_max
            ),
        ));
    }

    for (i, group) in uc.exposure_groups.iter().enumerate() {
        if group.exposure < group.min || group.exposure > group.max {
            findings.push(Finding::warning(
                name,
                format!(
                    "exposure group {} has nominal exposure {} outside its limits [{}, {}]",
                    i, group.exposure, group.min, group.max
                ),
            ));
        }
    }

    for (i, set) in uc.raw_frame_sets.iter().enumerate() {
        if usize::from(set.exposure_group) >= uc.exposure_groups.len() {
            findings.push(Finding::error(
                name,
                format!(
                    "raw frame set {} references exposure group {} but only {} exist",
                    i,
                    set.exposure_group,
                    uc.exposure_groups.len()
                ),
            ));
        }
    }

    let expanded = uc.expanded_frequencies();
    if expanded != uc.imager_frequencies {
        findings.push(Finding::warning(
            name,
            "raw frame sets expanded per frame do not match the imager frequency list",
        ));
    }

    // There are several counts that must agree with the raw frame count; the
    // measurement blocks are the reference, as they are usually a single number.
    let block_sum: usize = uc.measurement_blocks.iter().map(|&b| usize::from(b)).sum();
    if block_sum != uc.imager_frequencies.len() {
        findings.push(Finding::warning(
            name,
            format!(
                "measurement blocks sum to {} raw frames but there are {} imager frequencies",
                block_sum,
                uc.imager_frequencies.len()
            ),
        ));
    }
    if block_sum != uc.raw_frame_count() {
        findings.push(Finding::warning(
            name,
            format!(
                "measurement blocks sum to {} raw frames but raw frame sets contain {}",
                block_sum,
                uc.raw_frame_count()
            ),
        ));
    }
}

fn check_use_case_pair(a: &UseCase, b: &UseCase, findings: &mut Vec<Finding>) {
    if a.name == b.name {
        findings.push(Finding::error(
            Some(&a.name),
            "another use case has the same name",
        ));
    }
    if a.guid == b.guid {
        findings.push(Finding::error(
            Some(&a.name),
            format!("use case \"{}\" has the same guid {}", b.name, b.guid),
        ));
    }

    // Catches entries copy-and-pasted from another use case where the
    // register settings weren't updated. Two use cases that deliberately
    // differ only in processing parameters trip this too, which is why it is
    // a warning and not an error.
    let same_payload = match (&a.register_action, &b.register_action) {
        (RegisterAction::TimedList(x), RegisterAction::TimedList(y)) => {
            !x.is_empty() && x == y
        }
        (RegisterAction::SequentialBlock(x), RegisterAction::SequentialBlock(y)) => {
            !x.values.is_empty() && x == y
        }
        _ => false,
    };
    if same_payload {
        findings.push(Finding::warning(
            Some(&a.name),
            format!(
                "use case \"{}\" has identical register settings; intentional only if they differ in processing parameters",
                b.name
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TimedRegEntry;
    use crate::use_case::{AccessLevel, ExposureGroup, RawFrameSet};
    use uuid::Uuid;

    fn guid(last: u8) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[15] = last;
        Uuid::from_bytes(bytes)
    }

    fn video_use_case(name: &str, last_guid_byte: u8) -> UseCase {
        UseCase {
            name: name.to_string(),
            guid: guid(last_guid_byte),
            image_size: (224, 172),
            imager_frequencies: vec![60_240_000],
            stream_ids: vec![0x1234],
            start_fps: 5,
            fps_limits: (1, 10),
            processing_params: guid(0x80 | last_guid_byte),
            wait_time: 0,
            access_level: AccessLevel::Normal,
            measurement_blocks: vec![1],
            exposure_groups: vec![ExposureGroup {
                exposure: 670,
                min: 50,
                max: 670,
            }],
            raw_frame_sets: vec![RawFrameSet {
                frame_count: 1,
                frequency: 60_240_000,
                exposure_group: 0,
            }],
            register_action: RegisterAction::TimedList(vec![TimedRegEntry::new(
                0x9000,
                u16::from(last_guid_byte),
            )]),
            reserved_block: vec![],
        }
    }

    fn device(use_cases: Vec<UseCase>) -> DeviceData {
        DeviceData {
            name: "TestDevice".to_string(),
            product_issuer: "PMD ".to_string(),
            product_code: guid(0x42),
            system_frequency: 24_000_000,
            use_cases,
            register_maps: Default::default(),
        }
    }

    #[test]
    fn clean_device_has_no_findings() {
        let findings = validate(&device(vec![
            video_use_case("Video 5fps", 1),
            video_use_case("Video 10fps", 2),
        ]));
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[test]
    fn frequency_mismatch_is_flagged() {
        let mut uc = video_use_case("Video", 1);
        uc.raw_frame_sets[0].frequency = 80_320_000;
        let findings = validate(&device(vec![uc]));
        assert!(findings
            .iter()
            .any(|f| f.detail.contains("do not match the imager frequency list")));
    }

    #[test]
    fn matching_frequencies_are_not_flagged() {
        let mut uc = video_use_case("Video", 1);
        uc.raw_frame_sets = vec![
            RawFrameSet {
                frame_count: 1,
                frequency: 60_240_000,
                exposure_group: 0,
            },
            RawFrameSet {
                frame_count: 2,
                frequency: 80_320_000,
                exposure_group: 0,
            },
        ];
        uc.imager_frequencies = vec![60_240_000, 80_320_000, 80_320_000];
        uc.measurement_blocks = vec![3];
        let findings = validate(&device(vec![uc]));
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[test]
    fn duplicate_guid_is_an_error() {
        let a = video_use_case("First", 1);
        let mut b = video_use_case("Second", 2);
        b.guid = a.guid;
        let findings = validate(&device(vec![a, b]));
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Error && f.detail.contains("same guid")));
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let findings = validate(&device(vec![
            video_use_case("Video", 1),
            video_use_case("Video", 2),
        ]));
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Error && f.detail.contains("same name")));
    }

    #[test]
    fn out_of_bounds_exposure_group_is_an_error() {
        let mut uc = video_use_case("Video", 1);
        uc.raw_frame_sets[0].exposure_group = 3;
        let findings = validate(&device(vec![uc]));
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Error && f.detail.contains("exposure group 3")));
    }

    #[test]
    fn shared_register_payload_is_a_warning_only() {
        let a = video_use_case("First", 1);
        let mut b = video_use_case("Second", 2);
        b.register_action = a.register_action.clone();
        let findings = validate(&device(vec![a, b]));
        let shared: Vec<_> = findings
            .iter()
            .filter(|f| f.detail.contains("identical register settings"))
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].severity, Severity::Warning);
    }

    #[test]
    fn start_fps_outside_limits_is_flagged() {
        let mut uc = video_use_case("Video", 1);
        uc.start_fps = 20;
        let findings = validate(&device(vec![uc]));
        assert!(findings.iter().any(|f| f.detail.contains("start FPS")));
    }

    #[test]
    fn exposure_outside_group_limits_is_flagged() {
        let mut uc = video_use_case("Video", 1);
        uc.exposure_groups[0] = ExposureGroup {
            exposure: 700,
            min: 50,
            max: 670,
        };
        let findings = validate(&device(vec![uc]));
        assert!(findings
            .iter()
            .any(|f| f.detail.contains("nominal exposure 700")));
    }

    #[test]
    fn measurement_block_mismatch_is_flagged() {
        let mut uc = video_use_case("Video", 1);
        uc.measurement_blocks = vec![2];
        let findings = validate(&device(vec![uc]));
        assert!(findings
            .iter()
            .any(|f| f.detail.contains("measurement blocks sum to 2")));
    }
}
