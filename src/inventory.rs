// Inventory module - lists pods and their declared resources per datacenter
//
// Produces the initial record set for a collection run: limits and requests
// filled in, usage and ratings zeroed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::workload::WorkloadRecord;

/// Errors raised while listing workloads
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("kubeconfig is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Kubernetes API request failed: {0}")]
    Api(#[from] kube::Error),
}

/// Source of the initial workload records for one datacenter.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Lists every workload of `datacenter` using its cluster credentials.
    ///
    /// # Arguments
    /// * `datacenter` - Datacenter name stamped on each record
    /// * `kubeconfig` - Raw kubeconfig document for the cluster
    async fn list_workloads(
        &self,
        datacenter: &str,
        kubeconfig: &[u8],
    ) -> Result<Vec<WorkloadRecord>, InventoryError>;
}

/// Inventory backed by the Kubernetes API.
pub struct KubeInventory {
    /// Restricts listing to a single namespace when set
    namespace: Option<String>,
}

impl KubeInventory {
    pub fn new(namespace: Option<String>) -> Self {
        KubeInventory { namespace }
    }

    async fn client(kubeconfig: &[u8]) -> Result<Client, InventoryError> {
        let document = std::str::from_utf8(kubeconfig)?;
        let kubeconfig = Kubeconfig::from_yaml(document)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        Ok(Client::try_from(config)?)
    }
}

#[async_trait]
impl InventorySource for KubeInventory {
    async fn list_workloads(
        &self,
        datacenter: &str,
        kubeconfig: &[u8],
    ) -> Result<Vec<WorkloadRecord>, InventoryError> {
        let client = Self::client(kubeconfig).await?;

        let mut params = ListParams::default();
        if let Some(namespace) = &self.namespace {
            params = params.fields(&format!("metadata.name={}", namespace));
        }

        info!(datacenter, "Listing namespaces");
        let namespaces: Api<Namespace> = Api::all(client.clone());
        let namespaces = namespaces.list(&params).await?;

        let mut records = Vec::new();
        for namespace in namespaces.items {
            let Some(namespace) = namespace.metadata.name else {
                continue;
            };

            let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
            let pods = pods.list(&ListParams::default()).await?;
            debug!(
                datacenter,
                namespace = %namespace,
                pods = pods.items.len(),
                "Found pods"
            );

            records.extend(
                pods.items
                    .iter()
                    .map(|pod| pod_to_record(datacenter, &namespace, pod)),
            );
        }

        info!(datacenter, workloads = records.len(), "Inventory complete");
        Ok(records)
    }
}

/// Builds a record from a pod, summing resources over its containers.
fn pod_to_record(datacenter: &str, namespace: &str, pod: &Pod) -> WorkloadRecord {
    let metadata = &pod.metadata;
    let mut record = WorkloadRecord::new(
        datacenter,
        namespace,
        metadata.name.as_deref().unwrap_or_default(),
        metadata.uid.as_deref().unwrap_or_default(),
    );
    record.application_label = metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("app"))
        .cloned()
        .unwrap_or_default();

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        record.cpu_limit_millicores += resource(container, Kind::Limits, "cpu", parse_cpu_millicores);
        record.ram_limit_mebibytes += resource(container, Kind::Limits, "memory", parse_memory_mebibytes);
        record.cpu_request_millicores += resource(container, Kind::Requests, "cpu", parse_cpu_millicores);
        record.ram_request_mebibytes +=
            resource(container, Kind::Requests, "memory", parse_memory_mebibytes);
    }

    record
}

enum Kind {
    Limits,
    Requests,
}

fn resource(container: &Container, kind: Kind, name: &str, parse: fn(&str) -> Option<f64>) -> f64 {
    let quantities = container.resources.as_ref().and_then(|r| match kind {
        Kind::Limits => r.limits.as_ref(),
        Kind::Requests => r.requests.as_ref(),
    });

    let Some(quantity) = quantities.and_then(|q| q.get(name)) else {
        return 0.0;
    };

    parse(&quantity.0).unwrap_or_else(|| {
        warn!(
            container = %container.name,
            quantity = %quantity.0,
            "Unparseable {} quantity, counting it as zero",
            name
        );
        0.0
    })
}

/// Parses a CPU quantity ("250m", "1", "0.5", "500000u") to millicores.
pub fn parse_cpu_millicores(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();

    let (number, multiplier, divisor) = if let Some(n) = quantity.strip_suffix('n') {
        (n, 1.0, 1e6)
    } else if let Some(n) = quantity.strip_suffix('u') {
        (n, 1.0, 1e3)
    } else if let Some(n) = quantity.strip_suffix('m') {
        (n, 1.0, 1.0)
    } else {
        (quantity, 1000.0, 1.0)
    };

    number
        .parse::<f64>()
        .ok()
        .map(|value| value * multiplier / divisor)
}

/// Parses a memory quantity ("128Mi", "1Gi", "1G", "65536") to mebibytes.
pub fn parse_memory_mebibytes(quantity: &str) -> Option<f64> {
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let quantity = quantity.trim();
    // Millibytes show up when memory is derived from a fractional expression.
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<f64>().ok().map(|value| value / 1000.0 / 1048576.0);
    }

    let (number, bytes_per_unit) = SUFFIXES
        .iter()
        .find_map(|(suffix, factor)| quantity.strip_suffix(*suffix).map(|n| (n, *factor)))
        .unwrap_or((quantity, 1.0));

    number
        .parse::<f64>()
        .ok()
        .map(|value| value * bytes_per_unit / 1048576.0)
}
