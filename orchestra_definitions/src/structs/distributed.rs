/// Multi-node distributed launch parameters.
///
/// When present, the run block emits a multi-process launcher across all
/// allocated nodes instead of a single container.
///
/// ```yaml
/// distributed:
///   nproc_per_node: 8
///   master_port: 29500
///   rdzv_backend: c10d
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Distributed {
    #[serde(default = "default_nproc")]
    pub nproc_per_node: u32,
    #[serde(default = "default_master_port")]
    pub master_port: u16,
    #[serde(default = "default_rdzv_backend")]
    pub rdzv_backend: String,
}

fn default_nproc() -> u32 { 1 }
fn default_master_port() -> u16 { 29500 }
fn default_rdzv_backend() -> String { "c10d".to_string() }

impl Default for Distributed {
    fn default() -> Self {
        Distributed {
            nproc_per_node: default_nproc(),
            master_port: default_master_port(),
            rdzv_backend: default_rdzv_backend(),
        }
    }
}
