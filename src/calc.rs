use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Implicit total for legacy bare-number marks.
pub const LEGACY_TOTAL: f64 = 100.0;

/// One subject's score on one test.
///
/// Anything that is neither `{obtained, total}` nor a bare number lands in
/// `Unreadable` and never contributes to an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mark {
    Scored { obtained: f64, total: f64 },
    Legacy(f64),
    Unreadable(serde_json::Value),
}

impl Mark {
    pub fn percent(&self) -> Option<f64> {
        let (obtained, total) = match *self {
            Mark::Scored { obtained, total } => (obtained, total),
            Mark::Legacy(obtained) => (obtained, LEGACY_TOTAL),
            Mark::Unreadable(_) => return None,
        };
        if !(total > 0.0) {
            return None;
        }
        let pct = (obtained / total) * 100.0;
        pct.is_finite().then_some(pct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub date: String,
    #[serde(
        default,
        deserialize_with = "lenient_week",
        skip_serializing_if = "Option::is_none"
    )]
    pub week: Option<u32>,
    #[serde(default)]
    pub marks: BTreeMap<String, Mark>,
}

fn lenient_week<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(week_from_value))
}

/// Explicit week tags are positive integers; numeric strings count, `0` and
/// fractions fall back to calendar weeks.
pub fn week_from_value(v: &serde_json::Value) -> Option<u32> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.fract() != 0.0 || n < 1.0 || n > u32::MAX as f64 {
        return None;
    }
    Some(n as u32)
}

/// Calendar date of a record, ignoring time of day and offset.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

pub fn is_month_key(s: &str) -> bool {
    s.len() == 7 && NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKeys {
    pub week: String,
    pub month: String,
    pub year: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    InvalidDate { date: String },
}

pub fn period_keys(record: &TestRecord) -> Result<PeriodKeys, SkipReason> {
    let date = parse_record_date(&record.date).ok_or_else(|| SkipReason::InvalidDate {
        date: record.date.clone(),
    })?;
    let month = month_key(date);
    let week = match record.week {
        Some(n) => format!("{}-w{}", month, n),
        None => week_start(date).format("%Y-%m-%d").to_string(),
    };
    Ok(PeriodKeys {
        week,
        month,
        year: format!("{:04}", date.year()),
    })
}

/// 2-decimal rounding used for every percentage the engine reports.
pub fn round2(x: f64) -> f64 {
    let r = (x * 100.0).round() / 100.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Half-up rounding to one decimal place (`floor(10*x + 0.5) / 10`).
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, Default)]
struct Running {
    sum: f64,
    count: usize,
}

impl Running {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSummary {
    pub per_subject: BTreeMap<String, f64>,
    pub overall: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStat {
    pub period_key: String,
    pub stats: StatSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub weekly: Vec<PeriodStat>,
    pub monthly: Vec<PeriodStat>,
    pub annual: Vec<PeriodStat>,
    pub overall: StatSummary,
    pub skipped: Vec<SkippedRecord>,
}

/// Rollup of every valid mark in `records`. `overall` is the mean of all
/// samples, so subjects with more graded tests weigh more.
pub fn summarize<'a, I>(records: I) -> StatSummary
where
    I: IntoIterator<Item = &'a TestRecord>,
{
    let mut subjects: BTreeMap<&str, Running> = BTreeMap::new();
    let mut overall = Running::default();
    for record in records {
        for (subject, mark) in &record.marks {
            let Some(pct) = mark.percent() else {
                continue;
            };
            subjects.entry(subject.as_str()).or_default().push(pct);
            overall.push(pct);
        }
    }
    StatSummary {
        per_subject: subjects
            .into_iter()
            .filter_map(|(k, r)| r.mean().map(|m| (k.to_string(), round2(m))))
            .collect(),
        overall: overall.mean().map(round2),
    }
}

fn rollup(buckets: BTreeMap<String, Vec<&TestRecord>>) -> Vec<PeriodStat> {
    // Keys are zero padded, so reverse lexicographic order is most recent first.
    buckets
        .into_iter()
        .rev()
        .map(|(period_key, records)| PeriodStat {
            period_key,
            stats: summarize(records),
        })
        .collect()
}

/// Weekly, monthly, annual and overall rollups. `None` means there was no
/// input at all, which callers must keep apart from an average of zero.
pub fn compute_stats(tests: &[TestRecord]) -> Option<StatsReport> {
    if tests.is_empty() {
        return None;
    }

    let mut by_week: BTreeMap<String, Vec<&TestRecord>> = BTreeMap::new();
    let mut by_month: BTreeMap<String, Vec<&TestRecord>> = BTreeMap::new();
    let mut by_year: BTreeMap<String, Vec<&TestRecord>> = BTreeMap::new();
    let mut kept: Vec<&TestRecord> = Vec::with_capacity(tests.len());
    let mut skipped = Vec::new();

    for (index, t) in tests.iter().enumerate() {
        match period_keys(t) {
            Ok(keys) => {
                by_week.entry(keys.week).or_default().push(t);
                by_month.entry(keys.month).or_default().push(t);
                by_year.entry(keys.year).or_default().push(t);
                kept.push(t);
            }
            Err(reason) => skipped.push(SkippedRecord {
                index,
                id: t.id.clone(),
                reason,
            }),
        }
    }

    Some(StatsReport {
        weekly: rollup(by_week),
        monthly: rollup(by_month),
        annual: rollup(by_year),
        overall: summarize(kept),
        skipped,
    })
}

/// Position of a weekly key inside its month. Tagged weeks order before
/// calendar weeks when a month mixes both styles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum WeekIndex {
    Tagged(u32),
    Calendar(NaiveDate),
    Unknown,
}

pub fn week_index(key: &str) -> WeekIndex {
    if let Some((_, n)) = key.rsplit_once("-w") {
        if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = n.parse::<u32>() {
                return WeekIndex::Tagged(n);
            }
        }
    }
    match NaiveDate::parse_from_str(key, "%Y-%m-%d") {
        Ok(d) => WeekIndex::Calendar(d),
        Err(_) => WeekIndex::Unknown,
    }
}

pub fn week_label(key: &str) -> String {
    match week_index(key) {
        WeekIndex::Tagged(n) => format!("Week {}", n),
        WeekIndex::Calendar(d) => format!("Week {}", (d.day() - 1) / 7 + 1),
        WeekIndex::Unknown => key.to_string(),
    }
}

/// Running averages over weekly rollups, oldest week first.
///
/// Each step averages the weekly values seen so far (not the raw samples)
/// and rounds at every step.
pub fn cumulative_weekly(weekly: &[PeriodStat]) -> Vec<PeriodStat> {
    let mut ordered: Vec<&PeriodStat> = weekly.iter().collect();
    ordered.sort_by_key(|p| week_index(&p.period_key));

    let mut subjects: BTreeMap<&str, Running> = BTreeMap::new();
    let mut overall = Running::default();
    let mut out = Vec::with_capacity(ordered.len());
    for week in ordered {
        for (subject, pct) in &week.stats.per_subject {
            subjects.entry(subject.as_str()).or_default().push(*pct);
        }
        if let Some(v) = week.stats.overall {
            overall.push(v);
        }
        out.push(PeriodStat {
            period_key: week.period_key.clone(),
            stats: StatSummary {
                per_subject: subjects
                    .iter()
                    .filter_map(|(k, r)| r.mean().map(|m| (k.to_string(), round2(m))))
                    .collect(),
                overall: overall.mean().map(round2),
            },
        });
    }
    out
}

/// OLS slope of percentage over test index, in points per test.
/// `None` below two scores.
pub fn progress_rate(scores: &[f64]) -> Option<f64> {
    if scores.len() < 2 {
        return None;
    }
    let n = scores.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in scores.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    Some(round2(slope))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

pub fn classify_trend(rate: f64, stable_band: f64) -> Trend {
    if rate > stable_band {
        Trend::Improving
    } else if rate < -stable_band {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsistencyStatus {
    New,
    #[serde(rename = "Very Stable")]
    VeryStable,
    Consistent,
    Variable,
    Volatile,
}

impl ConsistencyStatus {
    /// Upper bounds are inclusive.
    pub fn from_deviation(sd: f64) -> Self {
        if sd <= 5.0 {
            ConsistencyStatus::VeryStable
        } else if sd <= 10.0 {
            ConsistencyStatus::Consistent
        } else if sd <= 15.0 {
            ConsistencyStatus::Variable
        } else {
            ConsistencyStatus::Volatile
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            ConsistencyStatus::New => "var(--muted)",
            ConsistencyStatus::VeryStable => "#22c55e",
            ConsistencyStatus::Consistent => "var(--accent)",
            ConsistencyStatus::Variable => "#eab308",
            ConsistencyStatus::Volatile => "#ef4444",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyResult {
    pub subject: String,
    pub variation: f64,
    pub status: ConsistencyStatus,
    pub color: &'static str,
    pub count: usize,
}

pub fn population_std_dev(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

pub fn classify_consistency(subject: &str, scores: &[f64]) -> ConsistencyResult {
    let (variation, status) = if scores.len() < 2 {
        (0.0, ConsistencyStatus::New)
    } else {
        let sd = population_std_dev(scores);
        (round_off_1_decimal(sd), ConsistencyStatus::from_deviation(sd))
    };
    ConsistencyResult {
        subject: subject.to_string(),
        variation,
        status,
        color: status.color(),
        count: scores.len(),
    }
}

/// Valid percentages per subject, subjects in first-encounter order and
/// scores in input order.
pub fn scores_by_subject(tests: &[TestRecord]) -> Vec<(String, Vec<f64>)> {
    let mut out: Vec<(String, Vec<f64>)> = Vec::new();
    for t in tests {
        for (subject, mark) in &t.marks {
            let Some(pct) = mark.percent() else {
                continue;
            };
            match out.iter_mut().find(|(s, _)| s == subject) {
                Some((_, scores)) => scores.push(pct),
                None => out.push((subject.clone(), vec![pct])),
            }
        }
    }
    out
}

pub fn subject_scores(tests: &[TestRecord], subject: &str) -> Vec<f64> {
    tests
        .iter()
        .filter_map(|t| t.marks.get(subject).and_then(Mark::percent))
        .collect()
}

pub fn consistency(tests: &[TestRecord]) -> Vec<ConsistencyResult> {
    scores_by_subject(tests)
        .iter()
        .map(|(subject, scores)| classify_consistency(subject, scores))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject: String,
    pub total_tests: usize,
    pub average_score: Option<f64>,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub progress_rate: Option<f64>,
    pub trend: Option<Trend>,
}

/// One row per configured subject, including subjects nobody has been
/// graded in yet. `tests` must already be in chronological order.
pub fn subject_progress(
    tests: &[TestRecord],
    subjects: &[String],
    stable_band: f64,
) -> Vec<SubjectProgress> {
    subjects
        .iter()
        .map(|subject| {
            let scores = subject_scores(tests, subject);
            let progress_rate = progress_rate(&scores);
            let average_score = if scores.is_empty() {
                None
            } else {
                Some(round_off_1_decimal(
                    scores.iter().sum::<f64>() / scores.len() as f64,
                ))
            };
            SubjectProgress {
                subject: subject.clone(),
                total_tests: scores.len(),
                average_score,
                highest: scores
                    .iter()
                    .copied()
                    .reduce(f64::max)
                    .map(round_off_1_decimal),
                lowest: scores
                    .iter()
                    .copied()
                    .reduce(f64::min)
                    .map(round_off_1_decimal),
                progress_rate,
                trend: progress_rate.map(|r| classify_trend(r, stable_band)),
            }
        })
        .collect()
}

pub fn month_of(record: &TestRecord) -> Option<String> {
    parse_record_date(&record.date).map(month_key)
}

pub fn filter_month(tests: &[TestRecord], month: &str) -> Vec<TestRecord> {
    tests
        .iter()
        .filter(|t| month_of(t).as_deref() == Some(month))
        .cloned()
        .collect()
}

/// `compute_stats` over the records of one month. Records whose date does not
/// parse belong to no month and are reported as skipped, indexed into `tests`.
pub fn compute_stats_for_month(tests: &[TestRecord], month: &str) -> Option<StatsReport> {
    let (origin, in_month): (Vec<usize>, Vec<TestRecord>) = tests
        .iter()
        .enumerate()
        .filter(|(_, t)| month_of(t).map_or(true, |m| m == month))
        .map(|(i, t)| (i, t.clone()))
        .unzip();
    let mut report = compute_stats(&in_month)?;
    for s in &mut report.skipped {
        s.index = origin[s.index];
    }
    Some(report)
}

pub fn latest_month(tests: &[TestRecord]) -> Option<String> {
    tests.iter().filter_map(month_of).max()
}
