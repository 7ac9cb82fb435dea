use error::OrchestraErrorKind as EK;
use Result;

/// Batch resource request for a recipe or deployment spec.
///
/// ```yaml
/// resources:
///   nodes: 1
///   cpu: 8
///   memory: 32G
///   gpu: 1
///   time_limit_minutes: 120
/// ```
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub gpu: u32,
    #[serde(default = "default_time_limit")]
    pub time_limit_minutes: u32,
}

fn default_nodes() -> u32 { 1 }
fn default_time_limit() -> u32 { 60 }

impl Resources {
    /// Validate the numeric fields: `nodes >= 1`, `time_limit >= 1`, and
    /// (when a replica config is present) `gpu` divisible by `gpu_per_replica`.
    pub fn verify(&self, gpu_per_replica: Option<u32>) -> Result<()> {
        if self.nodes < 1 {
            return Err(EK::ValidationError("nodes must be at least 1".into()).into());
        }
        if self.time_limit_minutes < 1 {
            return Err(EK::ValidationError("time_limit_minutes must be at least 1".into()).into());
        }
        if let Some(gpr) = gpu_per_replica {
            if gpr == 0 {
                return Err(EK::ValidationError("gpu_per_replica must be at least 1".into()).into());
            }
            if self.gpu % gpr != 0 {
                return Err(EK::ValidationError(format!(
                    "gpu ({}) is not divisible by gpu_per_replica ({})",
                    self.gpu, gpr
                )).into());
            }
        }
        Ok(())
    }
}
