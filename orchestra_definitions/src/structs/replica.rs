/// Replica group parameters.
///
/// When present, deployment produces a single job hosting
/// `gpu / gpu_per_replica` instances per allocated node, one background
/// container per replica, bound to consecutive ports starting at
/// `base_port`.
///
/// ```yaml
/// gpu_per_replica: 1
/// base_port: 8001
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReplicaConfig {
    pub gpu_per_replica: u32,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_base_port() -> u16 { 8001 }

impl ReplicaConfig {
    /// Number of replicas per node, given the recipe's total GPU request.
    /// Caller is responsible for having already validated divisibility via
    /// `Resources::verify`.
    pub fn replicas_per_node(&self, gpu: u32) -> u32 {
        if self.gpu_per_replica == 0 {
            return 0;
        }
        gpu / self.gpu_per_replica
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_count_divides_evenly() {
        let rc = ReplicaConfig { gpu_per_replica: 1, base_port: 8001 };
        assert_eq!(rc.replicas_per_node(4), 4);
        let rc2 = ReplicaConfig { gpu_per_replica: 2, base_port: 8001 };
        assert_eq!(rc2.replicas_per_node(4), 2);
    }
}
