//! Trend and recurrence analysis over a series of metric snapshots.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::breakdown::CountBreakdown;
use crate::config::AnalyticsConfig;
use crate::models::{
    percentage, AggregateStatistics, CategoryTrend, MetricSnapshot, RecurringProblem, TicketEvent,
    TrendAnalysisResult, TrendPoint,
};

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    recurrence_threshold: u64,
    similarity_threshold: f64,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}

impl TrendAnalyzer {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            recurrence_threshold: config.recurrence_threshold,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Analyze snapshots of one period type together with the tickets behind them.
    ///
    /// Tickets opened outside the span covered by the snapshots are ignored for
    /// recurrence detection. No snapshots means an empty result, not an error.
    pub fn analyze(&self, snapshots: &[MetricSnapshot], tickets: &[TicketEvent]) -> TrendAnalysisResult {
        let mut ordered: Vec<&MetricSnapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|snapshot| snapshot.period_date);

        let (Some(first), Some(latest)) = (ordered.first(), ordered.last()) else {
            return TrendAnalysisResult::default();
        };

        let previous = ordered.len().checked_sub(2).map(|index| ordered[index]);

        let span_start = start_of_day(first.period_date);
        let span_end = start_of_day(latest.period_type.period_end(latest.period_date));
        let in_span: Vec<&TicketEvent> = tickets
            .iter()
            .filter(|ticket| span_start <= ticket.opened_at && ticket.opened_at < span_end)
            .collect();

        tracing::debug!(
            snapshots = ordered.len(),
            tickets = in_span.len(),
            "Running trend analysis"
        );

        TrendAnalysisResult {
            category_trends: category_trends(latest, previous),
            time_trend: time_trend(&ordered),
            recurring_problems: self.recurring_problems(&in_span),
            statistics: aggregate_statistics(&ordered),
        }
    }

    /// Cluster descriptions and keep clusters whose frequency exceeds the threshold.
    ///
    /// Most frequent first; equal frequencies put the most recently seen first.
    pub fn recurring_problems(&self, tickets: &[&TicketEvent]) -> Vec<RecurringProblem> {
        let mut groups: HashMap<String, Cluster> = HashMap::new();
        for ticket in tickets {
            let key = normalize_description(&ticket.description);
            if key.is_empty() {
                continue;
            }
            groups
                .entry(key.clone())
                .or_insert_with(|| Cluster::new(key))
                .record(ticket);
        }

        let mut groups: Vec<Cluster> = groups.into_values().collect();
        groups.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.description.cmp(&b.description)));

        let mut clusters: Vec<Cluster> = Vec::new();
        for group in groups {
            match clusters
                .iter_mut()
                .find(|cluster| jaccard(&cluster.tokens, &group.tokens) >= self.similarity_threshold)
            {
                Some(cluster) => cluster.absorb(group),
                None => clusters.push(group),
            }
        }

        let mut recurring: Vec<RecurringProblem> = clusters
            .into_iter()
            .filter(|cluster| cluster.frequency > self.recurrence_threshold)
            .map(Cluster::into_problem)
            .collect();

        recurring.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
                .then_with(|| a.description.cmp(&b.description))
        });
        recurring
    }
}

/// Category counts in the latest snapshot against the one before it.
fn category_trends(latest: &MetricSnapshot, previous: Option<&MetricSnapshot>) -> Vec<CategoryTrend> {
    let mut trends: Vec<CategoryTrend> = latest
        .tickets_by_category
        .iter()
        .map(|(category, &count)| {
            let previous_count = previous
                .map(|snapshot| snapshot.tickets_by_category.count(category))
                .unwrap_or(0);
            let variation_percent = (previous_count > 0)
                .then(|| (count as f64 - previous_count as f64) / previous_count as f64 * 100.0);

            CategoryTrend {
                category: category.clone(),
                count,
                previous_count,
                variation_percent,
            }
        })
        .collect();

    trends.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    trends
}

fn time_trend(ordered: &[&MetricSnapshot]) -> Vec<TrendPoint> {
    ordered
        .iter()
        .map(|snapshot| TrendPoint {
            date: snapshot.period_date,
            ticket_count: snapshot.total_tickets(),
            mean_resolution_minutes: snapshot.mean_resolution_minutes,
        })
        .collect()
}

fn aggregate_statistics(ordered: &[&MetricSnapshot]) -> AggregateStatistics {
    let total_tickets: u64 = ordered.iter().map(|snapshot| snapshot.total_tickets()).sum();
    let resolved: u64 = ordered.iter().map(|snapshot| snapshot.resolved_count).sum();

    // Each mean averages the resolutions that fell inside its period
    let (weighted_sum, weight) = ordered
        .iter()
        .filter_map(|snapshot| {
            let weight = snapshot.resolution_samples;
            match snapshot.mean_resolution_minutes {
                Some(mean) if weight > 0 => Some((mean * weight as f64, weight)),
                _ => None,
            }
        })
        .fold((0.0, 0u64), |(sum, total), (value, weight)| (sum + value, total + weight));

    let mean_resolution_minutes = if weight == 0 { 0.0 } else { weighted_sum / weight as f64 };

    let mut cumulative: BTreeMap<&str, u64> = BTreeMap::new();
    for snapshot in ordered {
        for (category, count) in snapshot.tickets_by_category.iter() {
            *cumulative.entry(category.as_str()).or_insert(0) += count;
        }
    }

    // BTreeMap iterates lexically, so the first maximum wins ties
    let most_common_category = cumulative
        .into_iter()
        .fold(None::<(&str, u64)>, |best, (category, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((category, count)),
        })
        .map(|(category, _)| category.to_string());

    AggregateStatistics {
        total_tickets,
        mean_resolution_minutes,
        resolution_rate: percentage(resolved, total_tickets),
        most_common_category,
    }
}

/// Lowercase, collapse whitespace and drop surrounding punctuation.
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.union(b).count();
    shared as f64 / union as f64
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug)]
struct Cluster {
    description: String,
    tokens: HashSet<String>,
    frequency: u64,
    last_seen_at: Option<DateTime<Utc>>,
    categories: CountBreakdown,
}

impl Cluster {
    fn new(description: String) -> Self {
        let tokens = description.split(' ').map(str::to_string).collect();
        Self {
            description,
            tokens,
            frequency: 0,
            last_seen_at: None,
            categories: CountBreakdown::new(),
        }
    }

    fn record(&mut self, ticket: &TicketEvent) {
        self.frequency += 1;
        self.last_seen_at = self.last_seen_at.max(Some(ticket.opened_at));
        if let Some(category) = &ticket.category {
            self.categories.increment(category);
        }
    }

    fn absorb(&mut self, other: Cluster) {
        self.frequency += other.frequency;
        self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
        for (category, count) in other.categories.iter() {
            let merged = self.categories.count(category) + count;
            self.categories.insert(category.clone(), merged);
        }
    }

    fn into_problem(self) -> RecurringProblem {
        let category = self
            .categories
            .iter()
            .fold(None::<(&String, u64)>, |best, (category, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((category, count)),
            })
            .map(|(category, _)| category.clone());

        RecurringProblem {
            description: self.description,
            frequency: self.frequency,
            category,
            last_seen_at: self.last_seen_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}
