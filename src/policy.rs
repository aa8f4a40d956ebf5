//! Registration policy: when submissions are accepted and when a
//! student counts as having completed registration.
//!
//! Everything in here is pure. Callers pass the settings snapshot and the
//! current time explicitly and take care of persistence themselves.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{RegistrationSettings, Student, Submission};

/// Number of elective exam subjects every complete submission carries.
pub const EXAM_SUBJECT_COUNT: usize = 2;

/// Tunables that are not part of the admin-editable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRules {
    /// Most review subjects a student may pick.
    pub review_subject_limit: usize,
    pub completion: CompletionThresholds,
}

impl Default for RegistrationRules {
    fn default() -> Self {
        Self {
            review_subject_limit: 4,
            completion: CompletionThresholds::default(),
        }
    }
}

/// Subject counts a student needs for the registration to count as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionThresholds {
    pub review_subjects: usize,
    pub exam_subjects: usize,
}

impl Default for CompletionThresholds {
    fn default() -> Self {
        Self {
            review_subjects: 2,
            exam_subjects: EXAM_SUBJECT_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("Registration is locked, changes can no longer be saved.")]
    Locked,
    #[error("Exactly 2 elective exam subjects must be selected.")]
    IncompleteExamSubjects,
    #[error("Required field `{0}` must be filled in.")]
    MissingRequiredField(String),
    #[error("At most {limit} review subjects may be selected.")]
    TooManyReviewSubjects { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Incomplete,
}

/// `true` when the manual lock is set or `now` is past the deadline.
pub fn evaluate_lock_state(settings: &RegistrationSettings, now: DateTime<Utc>) -> bool {
    settings.is_registration_locked || now > settings.registration_deadline
}

/// Decides whether `submission` may be saved.
///
/// The lock check runs first, so a locked window reports `Locked` even
/// when the submission is also incomplete.
pub fn validate_submission(
    settings: &RegistrationSettings,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<Accepted, RejectionReason> {
    if evaluate_lock_state(settings, now) {
        return Err(RejectionReason::Locked);
    }
    check_form(settings, submission)
}

/// The content checks of [`validate_submission`] without the lock. Used
/// when an admin saves a registration on a student's behalf.
pub fn check_form(
    settings: &RegistrationSettings,
    submission: &Submission,
) -> Result<Accepted, RejectionReason> {
    let toggles = &settings.registration_settings;

    if toggles.show_exam_subjects && submission.exam_subjects.len() != EXAM_SUBJECT_COUNT {
        return Err(RejectionReason::IncompleteExamSubjects);
    }

    if toggles.show_custom_fields {
        let missing = settings
            .custom_form_fields
            .iter()
            .filter(|field| field.required)
            .find(|field| {
                submission
                    .custom_data
                    .get(&field.id)
                    .map(|value| value.trim().is_empty())
                    .unwrap_or(true)
            });
        if let Some(field) = missing {
            return Err(RejectionReason::MissingRequiredField(field.id.clone()));
        }
    }

    Ok(Accepted)
}

/// Selection cap the student form enforces. Not part of
/// [`validate_submission`]; handlers run it once the policy accepts.
pub fn check_review_limit(
    settings: &RegistrationSettings,
    submission: &Submission,
    rules: &RegistrationRules,
) -> Result<(), RejectionReason> {
    let shown = settings.registration_settings.show_review_subjects;
    if shown && submission.review_subjects.len() > rules.review_subject_limit {
        return Err(RejectionReason::TooManyReviewSubjects {
            limit: rules.review_subject_limit,
        });
    }
    Ok(())
}

pub fn compute_completion_status(
    student: &Student,
    settings: &RegistrationSettings,
    thresholds: &CompletionThresholds,
) -> CompletionStatus {
    let toggles = &settings.registration_settings;
    let review_done = !toggles.show_review_subjects
        || student.review_subjects.len() == thresholds.review_subjects;
    let exam_done =
        !toggles.show_exam_subjects || student.exam_subjects.len() == thresholds.exam_subjects;

    if review_done && exam_done {
        CompletionStatus::Completed
    } else {
        CompletionStatus::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomField, CustomFieldType, Role};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn settings(deadline: DateTime<Utc>, locked: bool) -> RegistrationSettings {
        let mut settings = RegistrationSettings::initial(deadline);
        settings.registration_deadline = deadline;
        settings.is_registration_locked = locked;
        settings
    }

    fn submission(review: &[i32], exam: &[i32], data: &[(&str, &str)]) -> Submission {
        Submission {
            review_subjects: review.to_vec(),
            exam_subjects: exam.to_vec(),
            custom_data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn student(review: &[i32], exam: &[i32]) -> Student {
        Student {
            id: 2,
            ma_hocsinh: "HS2025001".into(),
            hoten: "Nguyen Van A".into(),
            ngaysinh: "2006-05-12".into(),
            lop: "12A1".into(),
            role: Role::Student,
            must_change_password: false,
            review_subjects: review.to_vec(),
            exam_subjects: exam.to_vec(),
            registration_date: None,
            custom_data: BTreeMap::new(),
        }
    }

    #[test]
    fn past_deadline_locks_regardless_of_flag() {
        let deadline = at(2024, 1, 1);
        let now = at(2024, 1, 2);
        assert!(evaluate_lock_state(&settings(deadline, false), now));
        assert!(evaluate_lock_state(&settings(deadline, true), now));
    }

    #[test]
    fn manual_flag_locks_before_deadline() {
        let deadline = at(2024, 1, 10);
        assert!(evaluate_lock_state(&settings(deadline, true), at(2024, 1, 2)));
        assert!(!evaluate_lock_state(&settings(deadline, false), at(2024, 1, 2)));
    }

    #[test]
    fn deadline_instant_itself_is_still_open() {
        let deadline = at(2024, 1, 1);
        assert!(!evaluate_lock_state(&settings(deadline, false), deadline));
        assert!(evaluate_lock_state(
            &settings(deadline, false),
            deadline + Duration::milliseconds(1)
        ));
    }

    #[test]
    fn lock_takes_precedence_over_other_failures() {
        let settings = settings(at(2024, 1, 10), true);
        let bad = submission(&[1, 2, 3, 4, 5], &[4, 5, 6], &[("phone", "")]);
        assert_eq!(
            validate_submission(&settings, &bad, at(2024, 1, 2)),
            Err(RejectionReason::Locked)
        );
    }

    #[test]
    fn form_check_ignores_the_lock() {
        let settings = settings(at(2024, 1, 1), true);
        let good = submission(&[1, 2], &[4, 5], &[("phone", "0900000000")]);
        assert_eq!(check_form(&settings, &good), Ok(Accepted));
        let bad = submission(&[1, 2], &[4], &[("phone", "0900000000")]);
        assert_eq!(
            check_form(&settings, &bad),
            Err(RejectionReason::IncompleteExamSubjects)
        );
    }

    #[test]
    fn three_exam_subjects_are_incomplete() {
        let settings = settings(at(2024, 1, 10), false);
        let sub = submission(&[1, 2], &[4, 5, 6], &[("phone", "0900000000")]);
        assert_eq!(
            validate_submission(&settings, &sub, at(2024, 1, 2)),
            Err(RejectionReason::IncompleteExamSubjects)
        );
    }

    #[test]
    fn exam_count_ignored_when_exam_subjects_hidden() {
        let mut settings = settings(at(2024, 1, 10), false);
        settings.registration_settings.show_exam_subjects = false;
        let sub = submission(&[1], &[], &[("phone", "0900000000")]);
        assert_eq!(
            validate_submission(&settings, &sub, at(2024, 1, 2)),
            Ok(Accepted)
        );
    }

    #[test]
    fn blank_required_field_is_reported_by_id() {
        let settings = settings(at(2024, 1, 10), false);
        for value in ["", "   "] {
            let sub = submission(&[1, 2], &[4, 5], &[("phone", value)]);
            assert_eq!(
                validate_submission(&settings, &sub, at(2024, 1, 2)),
                Err(RejectionReason::MissingRequiredField("phone".into()))
            );
        }
        let absent = submission(&[1, 2], &[4, 5], &[]);
        assert_eq!(
            validate_submission(
                &settings,
                &absent,
                at(2024, 1, 2)
            ),
            Err(RejectionReason::MissingRequiredField("phone".into()))
        );
    }

    #[test]
    fn first_missing_field_in_schema_order_wins() {
        let mut settings = settings(at(2024, 1, 10), false);
        settings.custom_form_fields.insert(
            0,
            CustomField {
                id: "guardian".into(),
                label: "Guardian".into(),
                field_type: CustomFieldType::Text,
                required: true,
            },
        );
        let sub = submission(&[], &[4, 5], &[]);
        assert_eq!(
            validate_submission(&settings, &sub, at(2024, 1, 2)),
            Err(RejectionReason::MissingRequiredField("guardian".into()))
        );
    }

    #[test]
    fn optional_and_hidden_fields_are_not_required() {
        let mut settings = settings(at(2024, 1, 10), false);
        let sub = submission(&[1, 2], &[4, 5], &[("phone", "0900000000")]);
        assert_eq!(
            validate_submission(&settings, &sub, at(2024, 1, 2)),
            Ok(Accepted)
        );

        settings.registration_settings.show_custom_fields = false;
        let no_phone = submission(&[1, 2], &[4, 5], &[]);
        assert_eq!(
            validate_submission(
                &settings,
                &no_phone,
                at(2024, 1, 2)
            ),
            Ok(Accepted)
        );
    }

    #[test]
    fn review_selection_limit_is_not_a_policy_rule() {
        let settings = settings(at(2024, 1, 10), false);
        let five = submission(&[1, 2, 3, 4, 5], &[4, 5], &[("phone", "0900000000")]);
        assert_eq!(
            validate_submission(&settings, &five, at(2024, 1, 2)),
            Ok(Accepted)
        );
    }

    #[test]
    fn review_limit_guard_caps_selection() {
        let mut settings = settings(at(2024, 1, 10), false);
        let rules = RegistrationRules::default();
        let five = submission(&[1, 2, 3, 4, 5], &[4, 5], &[("phone", "0900000000")]);
        let four = submission(&[1, 2, 3, 4], &[4, 5], &[("phone", "0900000000")]);
        assert_eq!(
            check_review_limit(&settings, &five, &rules),
            Err(RejectionReason::TooManyReviewSubjects { limit: 4 })
        );
        assert_eq!(check_review_limit(&settings, &four, &rules), Ok(()));

        settings.registration_settings.show_review_subjects = false;
        assert_eq!(check_review_limit(&settings, &five, &rules), Ok(()));
    }

    #[test]
    fn validation_is_repeatable() {
        let settings = settings(at(2024, 1, 10), false);
        let sub = submission(&[1, 2], &[4, 5, 6], &[]);
        let now = at(2024, 1, 2);
        let first = validate_submission(&settings, &sub, now);
        let second = validate_submission(&settings, &sub, now);
        assert_eq!(first, second);
    }

    #[test]
    fn completion_uses_configured_thresholds() {
        let settings = settings(at(2024, 1, 10), false);
        let defaults = CompletionThresholds::default();

        assert_eq!(
            compute_completion_status(&student(&[1, 2], &[4, 5]), &settings, &defaults),
            CompletionStatus::Completed
        );
        assert_eq!(
            compute_completion_status(&student(&[1, 2, 3], &[4, 5]), &settings, &defaults),
            CompletionStatus::Incomplete
        );

        let four = CompletionThresholds {
            review_subjects: 4,
            exam_subjects: 2,
        };
        assert_eq!(
            compute_completion_status(&student(&[1, 2, 3, 4], &[4, 5]), &settings, &four),
            CompletionStatus::Completed
        );
    }

    #[test]
    fn disabled_sections_do_not_block_completion() {
        let mut settings = settings(at(2024, 1, 10), false);
        settings.registration_settings.show_review_subjects = false;
        let thresholds = CompletionThresholds::default();
        assert_eq!(
            compute_completion_status(&student(&[], &[4, 5]), &settings, &thresholds),
            CompletionStatus::Completed
        );
        settings.registration_settings.show_exam_subjects = false;
        assert_eq!(
            compute_completion_status(&student(&[], &[]), &settings, &thresholds),
            CompletionStatus::Completed
        );
    }
}
