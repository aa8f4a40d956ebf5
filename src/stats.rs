//! Registration analytics for the admin dashboard.

use std::collections::{BTreeMap, HashMap};

use axum::extract::Query;
use axum::Extension;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::auth::AdminOnly;
use crate::models::{RegistrationSettings, Student, Subject};
use crate::policy::{compute_completion_status, CompletionStatus, CompletionThresholds};
use crate::store::StudentFilter;
use crate::{proceeds, AppState, Error, Payload};

/// Inclusive range of calendar days (UTC). Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectCount {
    pub subject_id: i32,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStats {
    pub total: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub review_popularity: Vec<SubjectCount>,
    pub exam_popularity: Vec<SubjectCount>,
    pub completed_by_day: Vec<DayCount>,
}

/// Most chosen first; ties keep catalog order. Ids outside the catalog
/// are ignored.
fn popularity<'a, I>(catalog: &[Subject], picks: I) -> Vec<SubjectCount>
where
    I: Iterator<Item = &'a Vec<i32>>,
{
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for ids in picks {
        for id in ids {
            *counts.entry(*id).or_default() += 1;
        }
    }

    let mut ranked: Vec<SubjectCount> = catalog
        .iter()
        .filter_map(|subject| {
            counts.get(&subject.id).map(|count| SubjectCount {
                subject_id: subject.id,
                name: subject.name.clone(),
                count: *count,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked
}

pub fn compute_stats(
    students: &[Student],
    settings: &RegistrationSettings,
    thresholds: &CompletionThresholds,
    range: DateRange,
) -> RegistrationStats {
    let completed: Vec<&Student> = students
        .iter()
        .filter(|s| {
            compute_completion_status(s, settings, thresholds) == CompletionStatus::Completed
        })
        .collect();

    let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for student in &completed {
        if let Some(at) = student.registration_date {
            let day = at.date_naive();
            if range.contains(day) {
                *by_day.entry(day).or_default() += 1;
            }
        }
    }

    RegistrationStats {
        total: students.len(),
        completed: completed.len(),
        incomplete: students.len() - completed.len(),
        review_popularity: popularity(
            &settings.review_subjects,
            students.iter().map(|s| &s.review_subjects),
        ),
        exam_popularity: popularity(
            &settings.exam_subjects,
            students.iter().map(|s| &s.exam_subjects),
        ),
        completed_by_day: by_day
            .into_iter()
            .map(|(date, count)| DayCount { date, count })
            .collect(),
    }
}

pub async fn registration_stats(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Query(range): Query<DateRange>,
) -> Payload<RegistrationStats> {
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if from > to {
            return Err(Error::invalid_payload("`from` must not be after `to`"));
        }
    }
    let settings = state.store.load().await?;
    let students = state.store.list(&StudentFilter::students()).await?;
    proceeds(compute_stats(
        &students,
        &settings,
        &state.rules.completion,
        range,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{TimeZone, Utc};

    fn student(id: i32, review: &[i32], exam: &[i32], day: Option<u32>) -> Student {
        Student {
            id,
            ma_hocsinh: format!("HS{}", id),
            hoten: format!("Student {}", id),
            ngaysinh: "2006-01-01".into(),
            lop: "12A1".into(),
            role: Role::Student,
            must_change_password: false,
            review_subjects: review.to_vec(),
            exam_subjects: exam.to_vec(),
            registration_date: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 10, 0, 0).unwrap()),
            custom_data: Default::default(),
        }
    }

    fn settings() -> RegistrationSettings {
        RegistrationSettings::initial(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn counts_completed_and_incomplete() {
        let students = vec![
            student(1, &[4, 5], &[7, 8], Some(20)),
            student(2, &[1, 3], &[6, 8], Some(21)),
            student(3, &[], &[], None),
        ];
        let stats = compute_stats(
            &students,
            &settings(),
            &CompletionThresholds::default(),
            DateRange::default(),
        );
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(
            stats.completed_by_day,
            vec![
                DayCount {
                    date: day(20),
                    count: 1
                },
                DayCount {
                    date: day(21),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn popularity_is_sorted_descending() {
        let students = vec![
            student(1, &[4, 5], &[7, 8], Some(20)),
            student(2, &[1, 5], &[7, 9], Some(21)),
            student(3, &[5, 42], &[8, 9], Some(21)),
        ];
        let stats = compute_stats(
            &students,
            &settings(),
            &CompletionThresholds::default(),
            DateRange::default(),
        );
        assert_eq!(stats.review_popularity[0].subject_id, 5);
        assert_eq!(stats.review_popularity[0].count, 3);
        assert!(stats.review_popularity.iter().all(|c| c.subject_id != 42));
        let exam: Vec<(i32, usize)> = stats
            .exam_popularity
            .iter()
            .map(|c| (c.subject_id, c.count))
            .collect();
        assert_eq!(exam, vec![(7, 2), (8, 2), (9, 2)]);
    }

    #[test]
    fn date_range_limits_daily_counts() {
        let students = vec![
            student(1, &[4, 5], &[7, 8], Some(19)),
            student(2, &[1, 5], &[7, 9], Some(20)),
            student(3, &[1, 2], &[8, 9], Some(22)),
            student(4, &[1], &[8, 9], Some(20)),
        ];
        let range = DateRange {
            from: Some(day(20)),
            to: Some(day(21)),
        };
        let stats = compute_stats(
            &students,
            &settings(),
            &CompletionThresholds::default(),
            range,
        );
        assert_eq!(
            stats.completed_by_day,
            vec![DayCount {
                date: day(20),
                count: 1
            }]
        );
        assert_eq!(stats.completed, 3);
    }
}
