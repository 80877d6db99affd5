// Workload module - the per-pod record the collector fills in and rates
//
// Records are produced by the inventory step with limits/requests populated,
// mutated in place exactly once by a collector worker (usage + rating), and
// then read by the ranking/report code.

use serde::Serialize;
use std::fmt;

/// Outcome of comparing a declared request against observed usage.
///
/// The numeric codes are what ranking by rating sorts on. Over- and
/// under-provisioning both map to `Misconfigured`, so the two directions are
/// not distinguishable downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Rating {
    /// The classifier has not run on this record yet.
    #[default]
    Unrated,
    /// Request is below twice the usage or above three times the usage.
    Misconfigured,
    /// Request sits between 2x and 3x the usage.
    Balanced,
    /// No request is declared, nothing to judge.
    Unset,
}

impl Rating {
    /// Numeric code used for ordering records by rating.
    pub fn code(self) -> i32 {
        match self {
            Rating::Unrated => 0,
            Rating::Misconfigured => 5,
            Rating::Balanced => 100,
            Rating::Unset => 999,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rating::Unrated => "unrated",
            Rating::Misconfigured => "misconfigured",
            Rating::Balanced => "balanced",
            Rating::Unset => "unset",
        };
        f.write_str(label)
    }
}

/// Rates a single resource request against its observed usage.
///
/// # Rules
/// - `request == 0` => `Unset`
/// - `request < 2 * usage` => `Misconfigured` (too little headroom)
/// - `request > 3 * usage` => `Misconfigured` (far above what is used)
/// - otherwise => `Balanced`
pub fn classify(request: f64, usage: f64) -> Rating {
    if request == 0.0 {
        Rating::Unset
    } else if request < 2.0 * usage || request > 3.0 * usage {
        Rating::Misconfigured
    } else {
        Rating::Balanced
    }
}

/// Replaces characters that break the cgroup `id` matcher in usage queries.
///
/// Pod UIDs appear in cgroup paths with underscores instead of hyphens.
pub fn normalize_instance_id(uid: &str) -> String {
    uid.replace('-', "_")
}

/// One monitored pod with its declared resources and observed usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadRecord {
    pub name: String,
    pub namespace: String,
    pub datacenter: String,
    /// Value of the pod's `app` label (empty when absent)
    pub application_label: String,
    /// Pod UID, normalized with [`normalize_instance_id`]
    pub instance_id: String,

    pub cpu_limit_millicores: f64,
    pub ram_limit_mebibytes: f64,
    pub cpu_request_millicores: f64,
    pub ram_request_mebibytes: f64,

    pub cpu_usage_millicores: f64,
    pub ram_usage_mebibytes: f64,

    pub cpu_rating: Rating,
    pub ram_rating: Rating,
}

impl WorkloadRecord {
    /// Creates a record with empty resources and zeroed usage.
    pub fn new(datacenter: &str, namespace: &str, name: &str, uid: &str) -> Self {
        WorkloadRecord {
            name: name.to_string(),
            namespace: namespace.to_string(),
            datacenter: datacenter.to_string(),
            instance_id: normalize_instance_id(uid),
            ..Default::default()
        }
    }

    /// Stores raw backend samples as usage.
    ///
    /// # Arguments
    /// * `cpu_cores` - CPU usage in cores, stored as millicores (x1000)
    /// * `ram_bytes` - RSS in bytes, stored as mebibytes (/1024^2)
    pub fn record_usage(&mut self, cpu_cores: f64, ram_bytes: f64) {
        debug_assert!(
            !self.is_rated(),
            "usage written twice for {}/{}",
            self.namespace,
            self.name
        );
        self.cpu_usage_millicores = cpu_cores * 1000.0;
        self.ram_usage_mebibytes = ram_bytes / 1024.0 / 1024.0;
    }

    /// Rates CPU and RAM requests against the recorded usage.
    pub fn apply_rating(&mut self) {
        self.cpu_rating = classify(self.cpu_request_millicores, self.cpu_usage_millicores);
        self.ram_rating = classify(self.ram_request_mebibytes, self.ram_usage_mebibytes);
    }

    pub fn is_rated(&self) -> bool {
        self.cpu_rating != Rating::Unrated || self.ram_rating != Rating::Unrated
    }
}

/// A named cluster and the records that belong to it.
#[derive(Debug, Clone, Default)]
pub struct Datacenter {
    pub name: String,
    pub records: Vec<WorkloadRecord>,
}

impl Datacenter {
    pub fn new(name: impl Into<String>, records: Vec<WorkloadRecord>) -> Self {
        Datacenter {
            name: name.into(),
            records,
        }
    }

    /// Flattens the records of every datacenter, in datacenter order.
    ///
    /// Used for cross-datacenter rankings.
    pub fn all_records(datacenters: &[Datacenter]) -> Vec<&WorkloadRecord> {
        datacenters.iter().flat_map(|dc| dc.records.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rules() {
        assert_eq!(classify(0.0, 0.0), Rating::Unset);
        assert_eq!(classify(0.0, 12.0), Rating::Unset);
        // request < 2x usage
        assert_eq!(classify(1.0, 1.0), Rating::Misconfigured);
        // request > 3x usage
        assert_eq!(classify(10.0, 1.0), Rating::Misconfigured);
        // 4 <= 5 <= 6
        assert_eq!(classify(5.0, 2.0), Rating::Balanced);
        // both bounds are inclusive
        assert_eq!(classify(4.0, 2.0), Rating::Balanced);
        assert_eq!(classify(6.0, 2.0), Rating::Balanced);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let pairs = [(0.0, 3.0), (1.0, 1.0), (10.0, 1.0), (5.0, 2.0), (250.0, 0.0)];
        for (request, usage) in pairs {
            let first = classify(request, usage);
            for _ in 0..10 {
                assert_eq!(classify(request, usage), first);
            }
        }
    }

    #[test]
    fn test_misconfigured_directions_are_indistinguishable() {
        // Under- and over-provisioned requests get the same rating.
        assert_eq!(classify(1.0, 1.0), classify(100.0, 1.0));
    }

    #[test]
    fn test_idle_workload_with_request_is_misconfigured() {
        assert_eq!(classify(100.0, 0.0), Rating::Misconfigured);
    }

    #[test]
    fn test_record_usage_converts_units() {
        let mut record = WorkloadRecord::new("dc1", "default", "api", "a-b-c");
        record.record_usage(0.25, 64.0 * 1024.0 * 1024.0);

        assert_eq!(record.cpu_usage_millicores, 250.0);
        assert_eq!(record.ram_usage_mebibytes, 64.0);
        assert!(!record.is_rated());
    }

    #[test]
    fn test_apply_rating_sets_both_fields() {
        let mut record = WorkloadRecord::new("dc1", "default", "api", "uid");
        record.cpu_request_millicores = 500.0;
        record.ram_request_mebibytes = 0.0;
        record.record_usage(0.2, 10.0 * 1024.0 * 1024.0);
        record.apply_rating();

        assert_eq!(record.cpu_rating, Rating::Balanced);
        assert_eq!(record.ram_rating, Rating::Unset);
        assert!(record.is_rated());
    }

    #[test]
    fn test_normalize_instance_id() {
        assert_eq!(
            normalize_instance_id("1f0e-22aa-bc01"),
            "1f0e_22aa_bc01"
        );
        assert_eq!(normalize_instance_id("plain"), "plain");
    }

    #[test]
    fn test_rating_codes() {
        assert_eq!(Rating::Unrated.code(), 0);
        assert_eq!(Rating::Misconfigured.code(), 5);
        assert_eq!(Rating::Balanced.code(), 100);
        assert_eq!(Rating::Unset.code(), 999);
    }

    #[test]
    fn test_all_records_flattens_in_order() {
        let dcs = vec![
            Datacenter::new(
                "a",
                vec![
                    WorkloadRecord::new("a", "ns", "a1", "1"),
                    WorkloadRecord::new("a", "ns", "a2", "2"),
                ],
            ),
            Datacenter::new("b", vec![WorkloadRecord::new("b", "ns", "b1", "3")]),
        ];

        let names: Vec<_> = Datacenter::all_records(&dcs)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["a1", "a2", "b1"]);
    }
}
