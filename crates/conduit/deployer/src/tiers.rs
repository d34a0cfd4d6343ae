//! Resource tier selection and scaling normalization
//!
//! The platform only offers a fixed list of (CPU, memory) bundles and caps
//! instance counts and per-instance concurrency. These helpers turn a free
//! form resource request into something the platform accepts.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A platform-fixed (CPU, memory) bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTier {
    pub cpu: f64,
    pub cpu_label: String,
    pub memory_gb: f64,
    pub memory_label: String,
}

impl ResourceTier {
    pub fn new(
        cpu: f64,
        cpu_label: impl Into<String>,
        memory_gb: f64,
        memory_label: impl Into<String>,
    ) -> Self {
        Self {
            cpu,
            cpu_label: cpu_label.into(),
            memory_gb,
            memory_label: memory_label.into(),
        }
    }

    /// Labelled as `"{n} vCPU"` / `"{n} GB"`
    pub fn labelled(cpu: f64, memory_gb: f64) -> Self {
        Self::new(
            cpu,
            format!("{} vCPU", cpu),
            memory_gb,
            format!("{} GB", memory_gb),
        )
    }

    fn satisfies(&self, cpu: Option<f64>, memory_gb: Option<f64>) -> bool {
        cpu.map_or(true, |c| self.cpu >= c) && memory_gb.map_or(true, |m| self.memory_gb >= m)
    }

    /// CPU over-provisioning weighs ten times as much as memory
    fn overage_score(&self, cpu: Option<f64>, memory_gb: Option<f64>) -> f64 {
        let cpu_over = cpu.map_or(0.0, |c| self.cpu - c);
        let mem_over = memory_gb.map_or(0.0, |m| self.memory_gb - m);
        cpu_over * 10.0 + mem_over
    }
}

/// The tiers a platform supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCatalog {
    tiers: Vec<ResourceTier>,
    /// Used when nothing is requested
    default: ResourceTier,
    /// Used when nothing satisfies the request
    maximum: ResourceTier,
}

impl Default for TierCatalog {
    fn default() -> Self {
        let tiers = vec![
            ResourceTier::labelled(0.25, 0.5),
            ResourceTier::labelled(0.25, 1.0),
            ResourceTier::labelled(0.5, 1.0),
            ResourceTier::labelled(1.0, 2.0),
            ResourceTier::labelled(1.0, 3.0),
            ResourceTier::labelled(1.0, 4.0),
            ResourceTier::labelled(2.0, 4.0),
            ResourceTier::labelled(2.0, 6.0),
            ResourceTier::labelled(4.0, 8.0),
            ResourceTier::labelled(4.0, 10.0),
            ResourceTier::labelled(4.0, 12.0),
        ];
        Self {
            default: ResourceTier::labelled(0.25, 0.5),
            maximum: ResourceTier::labelled(4.0, 12.0),
            tiers,
        }
    }
}

impl TierCatalog {
    pub fn new(tiers: Vec<ResourceTier>, default: ResourceTier, maximum: ResourceTier) -> Self {
        Self {
            tiers,
            default,
            maximum,
        }
    }

    /// Catalog whose default is the first tier and maximum the last.
    ///
    /// Returns `None` for an empty list.
    pub fn from_tiers(tiers: Vec<ResourceTier>) -> Option<Self> {
        let default = tiers.first()?.clone();
        let maximum = tiers.last()?.clone();
        Some(Self::new(tiers, default, maximum))
    }

    pub fn tiers(&self) -> &[ResourceTier] {
        &self.tiers
    }

    pub fn default_tier(&self) -> &ResourceTier {
        &self.default
    }

    pub fn maximum_tier(&self) -> &ResourceTier {
        &self.maximum
    }

    /// Smallest tier satisfying the request; ties keep list order.
    pub fn select(&self, cpu: Option<f64>, memory_gb: Option<f64>) -> &ResourceTier {
        if cpu.is_none() && memory_gb.is_none() {
            return &self.default;
        }

        let mut best: Option<(&ResourceTier, f64)> = None;
        for tier in self.tiers.iter().filter(|t| t.satisfies(cpu, memory_gb)) {
            let score = tier.overage_score(cpu, memory_gb);
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((tier, score));
            }
        }

        match best {
            Some((tier, _)) => tier,
            None => {
                warn!(
                    requested_cpu = ?cpu,
                    requested_memory_gb = ?memory_gb,
                    cpu = %self.maximum.cpu_label,
                    memory = %self.maximum.memory_label,
                    "No tier satisfies the request, using the maximum tier"
                );
                &self.maximum
            }
        }
    }
}

/// Scaling values accepted by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingBounds {
    pub min_instances: u32,
    pub max_instances: u32,
    pub max_concurrency: u32,
}

/// Platform scaling limits and defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformLimits {
    pub max_instances: u32,
    pub max_concurrency: u32,
    pub default_min_instances: u32,
    pub default_max_instances: u32,
    pub default_max_concurrency: u32,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            max_instances: 1000,
            max_concurrency: 1000,
            default_min_instances: 1,
            default_max_instances: 25,
            default_max_concurrency: 100,
        }
    }
}

impl PlatformLimits {
    /// Clamp a scaling request to the platform.
    ///
    /// `max == 0` means unlimited and maps to the platform ceiling.
    pub fn normalize(
        &self,
        min_replicas: Option<u32>,
        max_replicas: Option<u32>,
        max_concurrency: Option<u32>,
    ) -> ScalingBounds {
        let min_instances = min_replicas
            .unwrap_or(self.default_min_instances)
            .clamp(1, self.max_instances.max(1));

        let max_instances = match max_replicas {
            None => self.default_max_instances.min(self.max_instances),
            Some(0) => self.max_instances,
            Some(n) => n.min(self.max_instances),
        };

        let max_concurrency = max_concurrency
            .unwrap_or(self.default_max_concurrency)
            .clamp(1, self.max_concurrency.max(1));

        let min_instances = if min_instances > max_instances {
            warn!(
                min_instances,
                max_instances, "Minimum instances exceed maximum, lowering minimum"
            );
            max_instances.max(1)
        } else {
            min_instances
        };

        ScalingBounds {
            min_instances,
            max_instances,
            max_concurrency,
        }
    }
}
