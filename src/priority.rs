//! Rolls individual request priorities into one priority per
//! (framework, reporting period, company) group.
use crate::model::{
    AggregatedDataRequest, AggregatedDataRequestWithAggregatedPriority, AggregatedRequestPriority,
    Framework, RequestPriority,
};
use std::collections::BTreeMap;

/// Request counts per priority bucket for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityCounts {
    pub low: i64,
    pub baseline: i64,
    pub high: i64,
    pub urgent: i64,
}

impl PriorityCounts {
    fn add(&mut self, priority: RequestPriority, count: i64) {
        match priority {
            RequestPriority::Low => self.low += count,
            RequestPriority::Baseline => self.baseline += count,
            RequestPriority::High => self.high += count,
            RequestPriority::Urgent => self.urgent += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.low + self.baseline + self.high + self.urgent
    }

    /// Highest-tier bucket decides; more requests in it bump one tier.
    pub fn classify(&self) -> AggregatedRequestPriority {
        if self.urgent > 0 {
            AggregatedRequestPriority::Urgent
        } else if self.high >= 2 {
            AggregatedRequestPriority::VeryHigh
        } else if self.high == 1 {
            AggregatedRequestPriority::High
        } else if self.baseline >= 2 {
            AggregatedRequestPriority::Baseline
        } else if self.baseline == 1 {
            AggregatedRequestPriority::Normal
        } else {
            AggregatedRequestPriority::Low
        }
    }
}

/// One aggregated entry per group, in (framework, period, company) order.
pub fn aggregate_request_priority(
    requests: &[AggregatedDataRequest],
) -> Vec<AggregatedDataRequestWithAggregatedPriority> {
    let mut groups: BTreeMap<(Framework, String, String), PriorityCounts> = BTreeMap::new();
    for r in requests {
        groups
            .entry((r.data_type, r.reporting_period.clone(), r.company_id.clone()))
            .or_default()
            .add(r.priority, r.count);
    }
    groups
        .into_iter()
        .map(
            |((data_type, reporting_period, company_id), counts)| {
                AggregatedDataRequestWithAggregatedPriority {
                    data_type,
                    reporting_period,
                    company_id,
                    aggregated_priority: counts.classify(),
                    request_count: counts.total(),
                }
            },
        )
        .collect()
}

pub fn filter_based_on_aggregated_priority(
    requests: &[AggregatedDataRequestWithAggregatedPriority],
    target: AggregatedRequestPriority,
) -> Vec<AggregatedDataRequestWithAggregatedPriority> {
    requests
        .iter()
        .filter(|r| r.aggregated_priority == target)
        .cloned()
        .collect()
}
