//! Screen, window and host integrity checks

use super::{candidate, EvaluationContext};
use crate::sample::{SampleRecord, ScreenSample};
use crate::types::{CandidateViolation, ViolationSeverity, ViolationType};

/// Screen flags are reported by the exam client itself, so every candidate
/// carries full confidence.
const FLAG_CONFIDENCE: f64 = 1.0;

pub fn evaluate(
    record: &SampleRecord,
    sample: &ScreenSample,
    ctx: &EvaluationContext<'_>,
) -> Vec<CandidateViolation> {
    let settings = ctx.settings;
    let mut out = Vec::new();
    let mut flag = |violation_type: ViolationType, severity: ViolationSeverity, description: String| {
        out.push(candidate(
            record,
            violation_type,
            severity,
            FLAG_CONFIDENCE,
            description,
        ));
    };

    if !settings.allow_tab_switching {
        if sample.tab_switch_detected {
            flag(
                ViolationType::TabSwitching,
                ViolationSeverity::Medium,
                "Switched browser tab".to_string(),
            );
        }
        if sample.window_change_detected {
            flag(
                ViolationType::WindowChange,
                ViolationSeverity::Medium,
                "Focus moved to another window".to_string(),
            );
        }
    }

    if settings.require_full_screen && !sample.is_full_screen {
        flag(
            ViolationType::FullScreenExit,
            ViolationSeverity::High,
            "Exited full-screen mode".to_string(),
        );
    }

    if sample.screenshot_attempted || sample.print_screen_detected {
        flag(
            ViolationType::ScreenshotAttempt,
            ViolationSeverity::High,
            "Screen capture attempted".to_string(),
        );
    }

    if sample.virtual_machine_detected || sample.remote_desktop_detected {
        let what = match (sample.virtual_machine_detected, sample.remote_desktop_detected) {
            (true, true) => "Virtual machine and remote desktop detected",
            (true, false) => "Virtual machine detected",
            _ => "Remote desktop session detected",
        };
        flag(
            ViolationType::SystemTampering,
            ViolationSeverity::Critical,
            what.to_string(),
        );
    }

    if !sample.suspicious_applications.is_empty() {
        flag(
            ViolationType::SuspiciousApplication,
            ViolationSeverity::High,
            format!(
                "Suspicious applications running: {}",
                sample.suspicious_applications.join(", ")
            ),
        );
    }

    if let Some(monitors) = sample.monitor_count {
        if monitors > 1 && !settings.allow_multiple_monitors {
            flag(
                ViolationType::UnauthorizedDevice,
                ViolationSeverity::High,
                format!("{} monitors connected", monitors),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::sample::{Sample, ScreenSample};
    use crate::types::{ViolationSeverity, ViolationType};

    fn normal() -> ScreenSample {
        ScreenSample {
            is_full_screen: true,
            tab_switch_detected: false,
            window_change_detected: false,
            screenshot_attempted: false,
            print_screen_detected: false,
            virtual_machine_detected: false,
            remote_desktop_detected: false,
            running_processes: vec!["exam-client".into()],
            suspicious_applications: vec![],
            monitor_count: Some(1),
        }
    }

    #[test]
    fn test_normal_screen_is_clean() {
        let mut h = Harness::new();
        assert!(h.feed(0.0, Sample::Screen(normal())).is_empty());
    }

    #[test]
    fn test_tab_and_window_switches() {
        let mut h = Harness::new();
        let out = h.feed(
            0.0,
            Sample::Screen(ScreenSample {
                tab_switch_detected: true,
                window_change_detected: true,
                ..normal()
            }),
        );
        assert_eq!(
            types(&out),
            vec![ViolationType::TabSwitching, ViolationType::WindowChange]
        );
        assert!(out.iter().all(|c| c.severity == ViolationSeverity::Medium));
    }

    #[test]
    fn test_tab_switching_allowed() {
        let mut h = Harness::new();
        h.settings.allow_tab_switching = true;
        let out = h.feed(
            0.0,
            Sample::Screen(ScreenSample {
                tab_switch_detected: true,
                ..normal()
            }),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_full_screen_exit() {
        let mut h = Harness::new();
        let sample = ScreenSample {
            is_full_screen: false,
            ..normal()
        };
        let out = h.feed(0.0, Sample::Screen(sample.clone()));
        assert_eq!(types(&out), vec![ViolationType::FullScreenExit]);
        assert_eq!(out[0].severity, ViolationSeverity::High);

        h.settings.require_full_screen = false;
        assert!(h.feed(1.0, Sample::Screen(sample)).is_empty());
    }

    #[test]
    fn test_print_screen_counts_as_screenshot() {
        let mut h = Harness::new();
        let out = h.feed(
            0.0,
            Sample::Screen(ScreenSample {
                print_screen_detected: true,
                ..normal()
            }),
        );
        assert_eq!(types(&out), vec![ViolationType::ScreenshotAttempt]);
    }

    #[test]
    fn test_remote_desktop_is_critical_tampering() {
        let mut h = Harness::new();
        let out = h.feed(
            0.0,
            Sample::Screen(ScreenSample {
                remote_desktop_detected: true,
                ..normal()
            }),
        );
        assert_eq!(types(&out), vec![ViolationType::SystemTampering]);
        assert_eq!(out[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn test_suspicious_applications_listed() {
        let mut h = Harness::new();
        let out = h.feed(
            0.0,
            Sample::Screen(ScreenSample {
                suspicious_applications: vec!["teamviewer".into(), "discord".into()],
                ..normal()
            }),
        );
        assert_eq!(types(&out), vec![ViolationType::SuspiciousApplication]);
        assert!(out[0].description.contains("teamviewer, discord"));
    }

    #[test]
    fn test_extra_monitor() {
        let mut h = Harness::new();
        let sample = ScreenSample {
            monitor_count: Some(2),
            ..normal()
        };
        let out = h.feed(0.0, Sample::Screen(sample.clone()));
        assert_eq!(types(&out), vec![ViolationType::UnauthorizedDevice]);

        h.settings.allow_multiple_monitors = true;
        assert!(h.feed(1.0, Sample::Screen(sample)).is_empty());
    }
}
